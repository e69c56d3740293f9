use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use url::Url;
use vmb_proto::DEFAULT_MAX_FRAME_LEN;
use vmb_types::PayloadKind;

pub const ENV_VM_ADDRESS: &str = "VMB_VM_ADDRESS";
pub const ENV_DATA_LISTEN: &str = "VMB_DATA_LISTEN";
pub const ENV_TIMEOUT_EXECUTE_MS: &str = "VMB_TIMEOUT_EXECUTE_MS";
pub const ENV_TIMEOUT_DEPLOY_MS: &str = "VMB_TIMEOUT_DEPLOY_MS";
pub const ENV_CONNECT_TIMEOUT_MS: &str = "VMB_CONNECT_TIMEOUT_MS";
pub const ENV_MAX_FRAME_LEN: &str = "VMB_MAX_FRAME_LEN";
pub const ENV_FAULT_ACTION: &str = "VMB_FAULT_ACTION";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid endpoint '{input}': {reason}")]
    InvalidEndpoint { input: String, reason: String },
    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },
}

/// Where a socket lives. Written as `tcp://host:port` or `unix:///path`; a
/// bare `host:port` is taken as TCP.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Tcp(String),
    Unix(PathBuf),
}

impl Endpoint {
    pub fn tcp(addr: impl Into<String>) -> Self {
        Endpoint::Tcp(addr.into())
    }

    pub fn unix(path: impl Into<PathBuf>) -> Self {
        Endpoint::Unix(path.into())
    }

    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidEndpoint {
            input: input.to_string(),
            reason,
        };
        if !input.contains("://") {
            if input.rsplit_once(':').is_none() {
                return Err(invalid("expected host:port".into()));
            }
            return Endpoint::parse(&format!("tcp://{input}"));
        }

        let url = Url::parse(input).map_err(|e| invalid(e.to_string()))?;
        match url.scheme() {
            "tcp" => {
                let host = url
                    .host_str()
                    .filter(|h| !h.is_empty())
                    .ok_or_else(|| invalid("missing host".into()))?;
                let port = url.port().ok_or_else(|| invalid("missing port".into()))?;
                Ok(Endpoint::Tcp(format!("{host}:{port}")))
            }
            "unix" => {
                let path = url.path();
                if path.is_empty() || path == "/" {
                    return Err(invalid("missing socket path".into()));
                }
                Ok(Endpoint::Unix(PathBuf::from(path)))
            }
            other => Err(invalid(format!("unsupported scheme '{other}'"))),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "tcp://{addr}"),
            Endpoint::Unix(path) => write!(f, "unix://{}", path.display()),
        }
    }
}

impl FromStr for Endpoint {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Endpoint::parse(s)
    }
}

/// What the bridge does when the VM fails to produce a verifiable answer.
///
/// Either way the node stops processing the block: continuing would risk a
/// different ledger than the rest of the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultAction {
    /// Unwind with the [`VmFault`](crate::error::VmFault) as payload.
    #[default]
    Panic,
    /// Abort the process without unwinding.
    Abort,
}

impl FromStr for FaultAction {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "panic" => Ok(FaultAction::Panic),
            "abort" => Ok(FaultAction::Abort),
            _ => Err(ConfigError::InvalidValue {
                key: ENV_FAULT_ACTION,
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Address of the VM's execution service.
    pub vm_address: Endpoint,
    /// Address the data-source server listens on.
    pub data_listen: Endpoint,
    pub execute_timeout: Duration,
    pub deploy_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_frame_len: usize,
    pub fault_action: FaultAction,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            vm_address: Endpoint::tcp("127.0.0.1:50051"),
            data_listen: Endpoint::tcp("127.0.0.1:50052"),
            execute_timeout: Duration::from_secs(5),
            deploy_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(3),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            fault_action: FaultAction::Panic,
        }
    }
}

impl BridgeConfig {
    /// Defaults overridden by `VMB_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Some(v) = lookup(ENV_VM_ADDRESS) {
            cfg.vm_address = Endpoint::parse(&v)?;
        }
        if let Some(v) = lookup(ENV_DATA_LISTEN) {
            cfg.data_listen = Endpoint::parse(&v)?;
        }
        if let Some(v) = lookup(ENV_TIMEOUT_EXECUTE_MS) {
            cfg.execute_timeout = parse_millis(ENV_TIMEOUT_EXECUTE_MS, &v)?;
        }
        if let Some(v) = lookup(ENV_TIMEOUT_DEPLOY_MS) {
            cfg.deploy_timeout = parse_millis(ENV_TIMEOUT_DEPLOY_MS, &v)?;
        }
        if let Some(v) = lookup(ENV_CONNECT_TIMEOUT_MS) {
            cfg.connect_timeout = parse_millis(ENV_CONNECT_TIMEOUT_MS, &v)?;
        }
        if let Some(v) = lookup(ENV_MAX_FRAME_LEN) {
            cfg.max_frame_len = match v.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: ENV_MAX_FRAME_LEN,
                        value: v,
                    });
                }
            };
        }
        if let Some(v) = lookup(ENV_FAULT_ACTION) {
            cfg.fault_action = v.parse()?;
        }
        Ok(cfg)
    }

    /// Deadline for one VM request; deploys get the longer bound.
    pub fn timeout_for(&self, kind: PayloadKind) -> Duration {
        match kind {
            PayloadKind::Script => self.execute_timeout,
            PayloadKind::Module => self.deploy_timeout,
        }
    }
}

fn parse_millis(key: &'static str, value: &str) -> Result<Duration, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(Duration::from_millis(ms)),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}
