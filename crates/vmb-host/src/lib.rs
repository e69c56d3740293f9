//! Node-side bridge to an out-of-process smart-contract VM.
//!
//! The bridge sends each transaction to the VM over the execution channel,
//! serves the VM's state reads and writes over the data-source channel while
//! it runs, and commits the VM's answer to the ledger.

pub mod bridge;
pub mod client;
pub mod config;
pub mod ds_server;
pub mod error;
pub mod events;
pub mod genesis;
pub mod processor;
pub mod session;
pub mod storage;
pub mod transport;

pub mod testvm;

pub use bridge::{ExecContext, ExecutionReport, MsgDeployModule, MsgExecuteScript, VmBridge};
pub use client::{BlockInfo, ExecutionClient, VmClient, VmService};
pub use config::{BridgeConfig, Endpoint, FaultAction};
pub use ds_server::DataSourceServer;
pub use error::{BridgeError, DsError, ProtocolViolation, TxRejection, VmFault};
pub use events::{EVENT_DISCARD, EVENT_KEEP, EventManager, EventSink};
pub use genesis::{VmGenesis, export_genesis, init_genesis};
pub use session::{SessionGuard, SessionId, SessionRegistry};
pub use storage::VmStorage;
pub use transport::TransportManager;
