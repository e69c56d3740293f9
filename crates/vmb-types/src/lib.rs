//! Value types shared by the VM bridge: addresses, access paths, execution
//! requests/results and the events relayed from the VM.

pub mod access_path;
pub mod address;
pub mod b64;
mod event;
mod exec;

pub use access_path::{AccessPath, AccessPathError, CODE_TAG, RESOURCE_TAG, encode_oracle_price};
pub use address::{ADDRESS_LENGTH, Address, AddressError};
pub use event::{Event, EventAttribute};
pub use exec::{
    ArgKind, DiscardReason, ExecStatus, ExecutionRequest, ExecutionResult, OUT_OF_GAS, Payload,
    PayloadKind, ScriptArg, WriteKind, WriteOp,
};
