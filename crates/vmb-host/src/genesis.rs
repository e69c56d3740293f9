//! VM state carried in the chain's genesis file.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use vmb_store::{LedgerStore, StoreError};
use vmb_types::{AccessPath, Address, WriteOp};

use crate::processor::apply_write_set;

#[derive(Debug, Error)]
pub enum GenesisError {
    #[error("genesis entry {index}: {reason}")]
    InvalidEntry { index: usize, reason: String },
    #[error("ledger key {key} is not an access path")]
    ForeignKey { key: String },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One stored value; every field is hex.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenesisWrite {
    pub address: String,
    pub path: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VmGenesis {
    #[serde(default)]
    pub write_set: Vec<GenesisWrite>,
}

impl VmGenesis {
    pub fn from_json(bytes: &[u8]) -> Result<Self, GenesisError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, GenesisError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Decode every entry; fails on the first bad one.
    pub fn validate(&self) -> Result<Vec<WriteOp>, GenesisError> {
        self.write_set
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let invalid = |reason: String| GenesisError::InvalidEntry { index, reason };
                let address =
                    Address::from_hex(&entry.address).map_err(|e| invalid(format!("address: {e}")))?;
                let path = hex::decode(strip_0x(&entry.path))
                    .map_err(|e| invalid(format!("path: {e}")))?;
                if path.is_empty() {
                    return Err(invalid("empty path".into()));
                }
                let value = hex::decode(strip_0x(&entry.value))
                    .map_err(|e| invalid(format!("value: {e}")))?;
                Ok(WriteOp::write(AccessPath::new(address, path), value))
            })
            .collect()
    }
}

fn strip_0x(s: &str) -> &str {
    s.strip_prefix("0x").unwrap_or(s)
}

/// Write the genesis state into `ledger`. Nothing is written unless every
/// entry decodes.
pub fn init_genesis(ledger: &dyn LedgerStore, genesis: &VmGenesis) -> Result<usize, GenesisError> {
    let ops = genesis.validate()?;
    apply_write_set(ledger, &ops)?;
    info!(entries = ops.len(), "vm genesis applied");
    Ok(ops.len())
}

/// Dump every value in `ledger`, which must hold only VM state, in key order.
pub fn export_genesis(ledger: &dyn LedgerStore) -> Result<VmGenesis, GenesisError> {
    let mut write_set = Vec::new();
    for (key, value) in ledger.iter_prefix(&[])? {
        let ap = AccessPath::from_ledger_key(&key).map_err(|_| GenesisError::ForeignKey {
            key: hex::encode(&key),
        })?;
        write_set.push(GenesisWrite {
            address: ap.address.to_hex(),
            path: hex::encode(&ap.path),
            value: hex::encode(&value),
        });
    }
    Ok(VmGenesis { write_set })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use vmb_store::{MemLedger, PrefixLedger};

    fn sample() -> VmGenesis {
        VmGenesis {
            write_set: vec![
                GenesisWrite {
                    address: Address::new([1; 20]).to_hex(),
                    path: "0x0102".into(),
                    value: "ff".into(),
                },
                GenesisWrite {
                    address: Address::ZERO.to_hex(),
                    path: "00".into(),
                    value: "".into(),
                },
            ],
        }
    }

    #[test]
    fn init_then_export_reproduces_state() {
        let shared = MemLedger::new();
        let vm = PrefixLedger::new(Arc::new(shared.clone()), b"vm/".to_vec());
        assert_eq!(init_genesis(&vm, &sample()).unwrap(), 2);

        let exported = export_genesis(&vm).unwrap();
        assert_eq!(exported.write_set.len(), 2);
        assert_eq!(exported.write_set[0].address, Address::ZERO.to_hex());
        assert_eq!(exported.write_set[1].path, "0102");
        assert_eq!(exported.write_set[1].value, "ff");
        assert!(shared.snapshot().unwrap().iter().all(|(k, _)| k.starts_with(b"vm/")));

        let fresh = MemLedger::new();
        init_genesis(&fresh, &exported).unwrap();
        assert_eq!(export_genesis(&fresh).unwrap(), exported);
    }

    #[test]
    fn bad_entry_writes_nothing() {
        let mut genesis = sample();
        genesis.write_set[1].value = "zz".into();
        let ledger = MemLedger::new();
        let err = init_genesis(&ledger, &genesis).unwrap_err();
        assert!(matches!(err, GenesisError::InvalidEntry { index: 1, .. }));
        assert!(ledger.is_empty());
    }

    #[test]
    fn genesis_json_defaults_to_empty() {
        let genesis = VmGenesis::from_json(b"{}").unwrap();
        assert!(genesis.write_set.is_empty());
        let json = sample().to_json_pretty().unwrap();
        assert_eq!(VmGenesis::from_json(json.as_bytes()).unwrap(), sample());
    }

    #[test]
    fn foreign_keys_fail_export() {
        let ledger = MemLedger::new();
        ledger.set(b"short", b"x").unwrap();
        assert!(matches!(
            export_genesis(&ledger),
            Err(GenesisError::ForeignKey { .. })
        ));
    }
}
