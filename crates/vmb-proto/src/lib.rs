//! Wire protocol between the bridge and the external VM.
//!
//! Both directions use newline-delimited JSON envelopes: the bridge sends
//! `execute` requests to the VM, and the VM calls back into the bridge's
//! data-source service with `get`/`multi_get`/`set`/`delete` while it runs.

pub mod ds;
pub mod envelope;
pub mod framing;
pub mod vm;

pub use ds::DsCall;
pub use envelope::{RequestEnvelope, ResponseEnvelope, RpcError, codes};
pub use framing::{DEFAULT_MAX_FRAME_LEN, FrameError, FrameReader, FrameWriter};
pub use vm::{ExecuteParams, ExecuteResponse, WireExecution, WireStatus, WireWriteKind, WireWriteOp};

pub const PROTOCOL_VERSION: u8 = 1;
