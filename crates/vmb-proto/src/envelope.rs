use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::PROTOCOL_VERSION;

/// Error codes carried in [`RpcError::code`].
pub mod codes {
    pub const INVALID_REQUEST: &str = "invalid_request";
    pub const UNSUPPORTED_VERSION: &str = "unsupported_version";
    pub const UNKNOWN_METHOD: &str = "unknown_method";
    pub const DECODE_ERROR: &str = "decode_error";
    pub const UNKNOWN_REQUEST: &str = "unknown_request";
    pub const STORAGE_ERROR: &str = "storage_error";
    pub const VM_ERROR: &str = "vm_error";
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestEnvelope {
    pub v: u8,
    pub id: u64,
    pub cmd: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseEnvelope {
    pub id: u64,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RpcError {
    pub code: String,
    pub message: String,
}

impl RpcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::new(codes::INVALID_REQUEST, msg)
    }

    pub fn unknown_method(cmd: &str) -> Self {
        Self::new(codes::UNKNOWN_METHOD, format!("unknown command '{cmd}'"))
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::new(codes::DECODE_ERROR, msg)
    }

    pub fn is(&self, code: &str) -> bool {
        self.code == code
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl RequestEnvelope {
    pub fn new<T: Serialize>(id: u64, cmd: &str, payload: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            v: PROTOCOL_VERSION,
            id,
            cmd: cmd.into(),
            payload: serde_json::to_value(payload)?,
        })
    }

    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, RpcError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| RpcError::decode(e.to_string()))
    }
}

impl ResponseEnvelope {
    pub fn success<T: Serialize>(id: u64, result: &T) -> Self {
        match serde_json::to_value(result) {
            Ok(value) => Self {
                id,
                ok: true,
                result: Some(value),
                error: None,
            },
            Err(e) => Self::failure(id, RpcError::decode(e.to_string())),
        }
    }

    pub fn failure(id: u64, error: RpcError) -> Self {
        Self {
            id,
            ok: false,
            result: None,
            error: Some(error),
        }
    }

    /// Unpack into the typed result or the remote error.
    pub fn into_result<T: DeserializeOwned>(self) -> Result<T, RpcError> {
        if !self.ok {
            return Err(self
                .error
                .unwrap_or_else(|| RpcError::invalid_request("error response without error body")));
        }
        let value = self.result.unwrap_or(serde_json::Value::Null);
        serde_json::from_value(value).map_err(|e| RpcError::decode(e.to_string()))
    }
}
