//! VM → bridge data-source calls.

use serde::{Deserialize, Serialize};
use vmb_types::AccessPath;

use crate::envelope::{RequestEnvelope, RpcError};

pub const GET: &str = "get";
pub const MULTI_GET: &str = "multi_get";
pub const SET: &str = "set";
pub const DELETE: &str = "delete";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GetParams {
    pub session: u64,
    pub access_path: AccessPath,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GetResult {
    /// `None` when nothing is stored at the path.
    #[serde(default, with = "vmb_types::b64::option")]
    pub value: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MultiGetParams {
    pub session: u64,
    pub access_paths: Vec<AccessPath>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MultiGetResult {
    /// Same order as the requested paths.
    #[serde(with = "vmb_types::b64::option_list")]
    pub values: Vec<Option<Vec<u8>>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SetParams {
    pub session: u64,
    pub access_path: AccessPath,
    #[serde(with = "vmb_types::b64")]
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteParams {
    pub session: u64,
    pub access_path: AccessPath,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ack {}

/// A decoded data-source call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DsCall {
    Get(GetParams),
    MultiGet(MultiGetParams),
    Set(SetParams),
    Delete(DeleteParams),
}

impl DsCall {
    pub fn from_envelope(req: &RequestEnvelope) -> Result<Self, RpcError> {
        match req.cmd.as_str() {
            GET => Ok(DsCall::Get(req.payload()?)),
            MULTI_GET => Ok(DsCall::MultiGet(req.payload()?)),
            SET => Ok(DsCall::Set(req.payload()?)),
            DELETE => Ok(DsCall::Delete(req.payload()?)),
            other => Err(RpcError::unknown_method(other)),
        }
    }

    pub fn cmd(&self) -> &'static str {
        match self {
            DsCall::Get(_) => GET,
            DsCall::MultiGet(_) => MULTI_GET,
            DsCall::Set(_) => SET,
            DsCall::Delete(_) => DELETE,
        }
    }

    pub fn session(&self) -> u64 {
        match self {
            DsCall::Get(p) => p.session,
            DsCall::MultiGet(p) => p.session,
            DsCall::Set(p) => p.session,
            DsCall::Delete(p) => p.session,
        }
    }

    pub fn into_envelope(self, id: u64) -> Result<RequestEnvelope, serde_json::Error> {
        match self {
            DsCall::Get(p) => RequestEnvelope::new(id, GET, &p),
            DsCall::MultiGet(p) => RequestEnvelope::new(id, MULTI_GET, &p),
            DsCall::Set(p) => RequestEnvelope::new(id, SET, &p),
            DsCall::Delete(p) => RequestEnvelope::new(id, DELETE, &p),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::codes;
    use serde_json::json;
    use vmb_types::Address;

    #[test]
    fn envelope_dispatches_on_cmd() {
        let call = DsCall::Set(SetParams {
            session: 9,
            access_path: AccessPath::new(Address::ZERO, vec![1]),
            value: b"abc".to_vec(),
        });
        let env = call.clone().into_envelope(3).unwrap();
        assert_eq!(env.cmd, SET);
        assert_eq!(env.payload["value"], "YWJj");
        let back = DsCall::from_envelope(&env).unwrap();
        assert_eq!(back, call);
        assert_eq!(back.session(), 9);
    }

    #[test]
    fn unknown_cmd_and_bad_address_are_errors() {
        let env = RequestEnvelope {
            v: 1,
            id: 1,
            cmd: "scan".into(),
            payload: json!({}),
        };
        assert!(DsCall::from_envelope(&env).unwrap_err().is(codes::UNKNOWN_METHOD));

        let env = RequestEnvelope {
            v: 1,
            id: 1,
            cmd: GET.into(),
            payload: json!({ "session": 1, "access_path": { "address": "0x01", "path": "AA==" } }),
        };
        assert!(DsCall::from_envelope(&env).unwrap_err().is(codes::DECODE_ERROR));
    }

    #[test]
    fn absent_values_serialize_as_null() {
        let result = MultiGetResult {
            values: vec![Some(vec![1]), None],
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json, json!({ "values": ["AQ==", null] }));
        let get: GetResult = serde_json::from_value(json!({})).unwrap();
        assert_eq!(get.value, None);
    }
}
