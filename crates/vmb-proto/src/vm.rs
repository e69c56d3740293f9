//! Bridge → VM messages.
//!
//! The response body is deliberately loose (`WireWriteOp` keeps the address
//! and path as strings) so that a malformed entry can be reported as a
//! protocol violation by the bridge instead of failing the whole decode.

use base64::prelude::*;
use serde::{Deserialize, Serialize};
use vmb_types::{DiscardReason, Event, ExecutionRequest, WriteKind, WriteOp};

pub const EXECUTE: &str = "execute";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecuteParams {
    /// Correlation id the VM must echo in every data-source call it makes
    /// while serving this request.
    pub session: u64,
    pub request: ExecutionRequest,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecuteResponse {
    #[serde(default)]
    pub executions: Vec<WireExecution>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WireStatus {
    Keep,
    Discard,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WireExecution {
    pub status: WireStatus,
    pub gas_used: u64,
    #[serde(default)]
    pub write_set: Vec<WireWriteOp>,
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discard: Option<DiscardReason>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WireWriteKind {
    Write,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WireWriteOp {
    /// `0x`-prefixed hex address.
    pub address: String,
    /// Base64 path bytes.
    pub path: String,
    pub kind: WireWriteKind,
    /// Base64 value; required for `write`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl WireExecution {
    pub fn keep(gas_used: u64, write_set: &[WriteOp], events: Vec<Event>) -> Self {
        Self {
            status: WireStatus::Keep,
            gas_used,
            write_set: write_set.iter().map(WireWriteOp::from).collect(),
            events,
            discard: None,
        }
    }

    pub fn discard(gas_used: u64, reason: DiscardReason) -> Self {
        Self {
            status: WireStatus::Discard,
            gas_used,
            write_set: Vec::new(),
            events: Vec::new(),
            discard: Some(reason),
        }
    }
}

impl From<&WriteOp> for WireWriteOp {
    fn from(op: &WriteOp) -> Self {
        let (kind, value) = match &op.kind {
            WriteKind::Write(value) => (WireWriteKind::Write, Some(BASE64_STANDARD.encode(value))),
            WriteKind::Delete => (WireWriteKind::Delete, None),
        };
        Self {
            address: op.access_path.address.to_hex(),
            path: BASE64_STANDARD.encode(&op.access_path.path),
            kind,
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmb_types::{AccessPath, Address};

    #[test]
    fn write_ops_encode_to_wire_strings() {
        let ap = AccessPath::new(Address::ZERO, vec![1, 2, 3]);
        let wire = WireWriteOp::from(&WriteOp::write(ap.clone(), b"v".to_vec()));
        assert_eq!(wire.address, Address::ZERO.to_hex());
        assert_eq!(wire.path, "AQID");
        assert_eq!(wire.kind, WireWriteKind::Write);
        assert_eq!(wire.value.as_deref(), Some("dg=="));

        let wire = WireWriteOp::from(&WriteOp::delete(ap));
        assert_eq!(wire.kind, WireWriteKind::Delete);
        assert!(wire.value.is_none());
    }

    #[test]
    fn response_without_executions_decodes_empty() {
        let resp: ExecuteResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.executions.is_empty());
    }
}
