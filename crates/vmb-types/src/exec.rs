use serde::{Deserialize, Serialize};

use crate::access_path::AccessPath;
use crate::address::Address;
use crate::event::Event;

/// VM major status reported when execution ran out of gas.
pub const OUT_OF_GAS: u64 = 4002;

/// One transaction's worth of work for the VM. Built per transaction and
/// consumed by a single call; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub sender: Address,
    pub block_height: u64,
    /// Block time as unix seconds.
    pub block_time: u64,
    pub gas_limit: u64,
    pub payload: Payload,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    Script {
        #[serde(with = "crate::b64")]
        code: Vec<u8>,
        #[serde(default)]
        type_args: Vec<String>,
        #[serde(default)]
        args: Vec<ScriptArg>,
    },
    Module {
        #[serde(with = "crate::b64")]
        code: Vec<u8>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    Script,
    Module,
}

impl Payload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Script { .. } => PayloadKind::Script,
            Payload::Module { .. } => PayloadKind::Module,
        }
    }

    pub fn code(&self) -> &[u8] {
        match self {
            Payload::Script { code, .. } | Payload::Module { code } => code,
        }
    }
}

impl PayloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadKind::Script => "script",
            PayloadKind::Module => "module",
        }
    }
}

/// Typed script argument; the value is the VM's canonical encoding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScriptArg {
    pub kind: ArgKind,
    #[serde(with = "crate::b64")]
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArgKind {
    U8,
    U64,
    U128,
    Bool,
    Address,
    Vector,
}

impl ScriptArg {
    pub fn u64(value: u64) -> Self {
        Self {
            kind: ArgKind::U64,
            value: value.to_le_bytes().to_vec(),
        }
    }

    pub fn u128(value: u128) -> Self {
        Self {
            kind: ArgKind::U128,
            value: value.to_le_bytes().to_vec(),
        }
    }

    pub fn bool(value: bool) -> Self {
        Self {
            kind: ArgKind::Bool,
            value: vec![value as u8],
        }
    }

    pub fn address(value: Address) -> Self {
        Self {
            kind: ArgKind::Address,
            value: value.as_bytes().to_vec(),
        }
    }
}

/// A validated write-set entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOp {
    pub access_path: AccessPath,
    pub kind: WriteKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteKind {
    Write(Vec<u8>),
    Delete,
}

impl WriteOp {
    pub fn write(access_path: AccessPath, value: impl Into<Vec<u8>>) -> Self {
        Self {
            access_path,
            kind: WriteKind::Write(value.into()),
        }
    }

    pub fn delete(access_path: AccessPath) -> Self {
        Self {
            access_path,
            kind: WriteKind::Delete,
        }
    }

    pub fn value(&self) -> Option<&[u8]> {
        match &self.kind {
            WriteKind::Write(value) => Some(value),
            WriteKind::Delete => None,
        }
    }
}

/// Why the VM discarded an execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscardReason {
    pub major_status: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_status: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl DiscardReason {
    pub fn new(major_status: u64) -> Self {
        Self {
            major_status,
            sub_status: None,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_out_of_gas(&self) -> bool {
        self.major_status == OUT_OF_GAS
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecStatus {
    Keep,
    Discard(DiscardReason),
}

/// Validated outcome of one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub status: ExecStatus,
    pub gas_used: u64,
    pub write_set: Vec<WriteOp>,
    pub events: Vec<Event>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_tagged_by_kind() {
        let payload = Payload::Module { code: vec![1, 2] };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "module");
        assert_eq!(json["code"], "AQI=");
        assert_eq!(payload.kind(), PayloadKind::Module);

        let script: Payload =
            serde_json::from_value(serde_json::json!({ "kind": "script", "code": "AA==" }))
                .unwrap();
        assert_eq!(
            script,
            Payload::Script {
                code: vec![0],
                type_args: vec![],
                args: vec![]
            }
        );
    }

    #[test]
    fn out_of_gas_is_detected_by_major_status() {
        assert!(DiscardReason::new(OUT_OF_GAS).is_out_of_gas());
        assert!(!DiscardReason::new(4016).is_out_of_gas());
    }
}
