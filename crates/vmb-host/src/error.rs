use std::time::Duration;

use thiserror::Error;
use vmb_proto::{RpcError, codes};
use vmb_store::StoreError;
use vmb_types::DiscardReason;

use crate::config::ConfigError;

/// Start-up and lifecycle failures of the bridge itself.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to bind data-source listener on {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to connect to vm at {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
    #[error("timed out connecting to vm at {0}")]
    ConnectTimeout(String),
}

/// The VM produced no verifiable answer. Never turned into a transaction
/// rejection: the bridge halts the process instead (see `FaultAction`).
#[derive(Debug, Clone, Error)]
pub enum VmFault {
    #[error("vm did not answer {kind} request within {timeout:?}")]
    Timeout {
        kind: &'static str,
        timeout: Duration,
    },
    #[error("vm transport failure: {0}")]
    Transport(String),
    #[error("vm connection closed")]
    Disconnected,
    #[error("vm returned an error: {0}")]
    Rejected(RpcError),
    #[error("ledger storage failure: {0}")]
    Storage(String),
}

/// A response that every validator will see identically and that cannot be
/// applied.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("expected exactly one execution in response, got {0}")]
    ExecutionCount(usize),
    #[error("malformed execution response: {0}")]
    MalformedResponse(String),
    #[error("write-set entry {index} is malformed: {reason}")]
    MalformedWriteOp { index: usize, reason: String },
    #[error("discarded execution carries no discard reason")]
    MissingDiscardReason,
}

/// Recoverable outcome: the transaction is rejected, the ledger is untouched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TxRejection {
    #[error("invalid message: {0}")]
    InvalidMessage(&'static str),
    #[error("protocol violation: {0}")]
    ProtocolViolation(#[from] ProtocolViolation),
    #[error("execution discarded (major status {}): gas used {gas_used}", reason.major_status)]
    Discarded { gas_used: u64, reason: DiscardReason },
    #[error("out of gas: used {gas_used} of {gas_limit}")]
    OutOfGas { gas_used: u64, gas_limit: u64 },
}

impl TxRejection {
    /// Gas the surrounding module should still charge.
    pub fn gas_used(&self) -> u64 {
        match self {
            TxRejection::InvalidMessage(_) | TxRejection::ProtocolViolation(_) => 0,
            TxRejection::Discarded { gas_used, .. } | TxRejection::OutOfGas { gas_used, .. } => {
                *gas_used
            }
        }
    }
}

/// Errors answered to the VM by the data-source server.
#[derive(Debug, Error)]
pub enum DsError {
    #[error("unknown request session {0}")]
    UnknownRequest(u64),
    #[error("invalid access path: {0}")]
    InvalidAccessPath(&'static str),
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl From<DsError> for RpcError {
    fn from(err: DsError) -> Self {
        match &err {
            DsError::UnknownRequest(_) => RpcError::new(codes::UNKNOWN_REQUEST, err.to_string()),
            DsError::InvalidAccessPath(_) => RpcError::invalid_request(err.to_string()),
            DsError::Storage(_) => RpcError::new(codes::STORAGE_ERROR, err.to_string()),
        }
    }
}
