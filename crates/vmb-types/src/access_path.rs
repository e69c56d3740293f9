//! Access path codec: the deterministic mapping between a VM
//! `(address, path)` pair and the key it occupies in the ledger.
//!
//! A ledger key is the fixed-width address followed by the raw path bytes.
//! Since every address is exactly [`ADDRESS_LENGTH`] bytes, the split point is
//! never ambiguous and the mapping is injective.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

use crate::address::{ADDRESS_LENGTH, Address};

/// Leading path byte for published module code.
pub const CODE_TAG: u8 = 0;
/// Leading path byte for resources stored under an account.
pub const RESOURCE_TAG: u8 = 1;

const ORACLE_PRICE_STRUCT: &str = "Coins::Price";

/// One piece of VM-addressable ledger state.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccessPath {
    pub address: Address,
    #[serde(with = "crate::b64")]
    pub path: Vec<u8>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccessPathError {
    #[error("ledger key of {0} bytes is too short for an access path")]
    KeyTooShort(usize),
}

impl AccessPath {
    pub fn new(address: Address, path: impl Into<Vec<u8>>) -> Self {
        Self {
            address,
            path: path.into(),
        }
    }

    /// Path of a resource identified by its fully qualified struct tag
    /// (e.g. `0x1::Account::Balance`).
    pub fn resource(address: Address, struct_tag: &str) -> Self {
        Self::new(address, tagged_hash(RESOURCE_TAG, struct_tag))
    }

    /// Path of a module published under `address`.
    pub fn code(address: Address, module_name: &str) -> Self {
        let mut path = Vec::with_capacity(1 + module_name.len());
        path.push(CODE_TAG);
        path.extend_from_slice(module_name.as_bytes());
        Self::new(address, path)
    }

    /// Well-known cell holding the current price of `asset_code`, owned by the
    /// standard address.
    pub fn oracle_price(asset_code: &str) -> Self {
        let tag = format!(
            "{}::{ORACLE_PRICE_STRUCT}<{}>",
            Address::ZERO.to_hex(),
            asset_code.to_ascii_lowercase()
        );
        Self::new(Address::ZERO, tagged_hash(RESOURCE_TAG, &tag))
    }

    /// Ledger key for this access path.
    pub fn to_ledger_key(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(ADDRESS_LENGTH + self.path.len());
        key.extend_from_slice(self.address.as_bytes());
        key.extend_from_slice(&self.path);
        key
    }

    /// Inverse of [`AccessPath::to_ledger_key`].
    pub fn from_ledger_key(key: &[u8]) -> Result<Self, AccessPathError> {
        if key.len() <= ADDRESS_LENGTH {
            return Err(AccessPathError::KeyTooShort(key.len()));
        }
        let (addr, path) = key.split_at(ADDRESS_LENGTH);
        let address =
            Address::from_bytes(addr).map_err(|_| AccessPathError::KeyTooShort(key.len()))?;
        Ok(Self::new(address, path))
    }

    /// Ledger key prefix covering every path stored under `address`.
    pub fn address_prefix(address: &Address) -> Vec<u8> {
        address.as_bytes().to_vec()
    }
}

impl fmt::Debug for AccessPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessPath")
            .field("address", &self.address.to_hex())
            .field("path", &hex::encode(&self.path))
            .finish()
    }
}

impl fmt::Display for AccessPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, hex::encode(&self.path))
    }
}

/// Encode an oracle price as the VM expects it in the price cell (u128 LE).
pub fn encode_oracle_price(price: u128) -> Vec<u8> {
    price.to_le_bytes().to_vec()
}

fn tagged_hash(tag: u8, value: &str) -> Vec<u8> {
    let digest = Sha256::digest(value.as_bytes());
    let mut path = Vec::with_capacity(1 + digest.len());
    path.push(tag);
    path.extend_from_slice(&digest);
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn addr(byte: u8) -> Address {
        Address::new([byte; ADDRESS_LENGTH])
    }

    #[test]
    fn key_is_address_then_path() {
        let ap = AccessPath::new(addr(7), vec![1, 2, 3]);
        let key = ap.to_ledger_key();
        assert_eq!(&key[..ADDRESS_LENGTH], addr(7).as_bytes());
        assert_eq!(&key[ADDRESS_LENGTH..], &[1, 2, 3]);
        assert_eq!(AccessPath::from_ledger_key(&key).unwrap(), ap);
    }

    #[test]
    fn distinct_paths_map_to_distinct_keys() {
        // Pairs that would collide under a naive variable-width concatenation.
        let mut a = [0u8; ADDRESS_LENGTH];
        a[ADDRESS_LENGTH - 1] = 1;
        let candidates = vec![
            AccessPath::new(Address::new(a), vec![2]),
            AccessPath::new(Address::ZERO, vec![1, 2]),
            AccessPath::new(Address::ZERO, vec![1]),
            AccessPath::new(Address::ZERO, vec![1, 0]),
            AccessPath::new(addr(1), vec![0]),
            AccessPath::new(addr(1), vec![0, 0]),
            AccessPath::resource(addr(2), "0x1::Account::Balance"),
            AccessPath::resource(addr(3), "0x1::Account::Balance"),
            AccessPath::code(addr(2), "Account"),
            AccessPath::oracle_price("eth_usdt"),
            AccessPath::oracle_price("btc_usdt"),
        ];
        let unique: HashSet<_> = candidates.iter().collect();
        assert_eq!(unique.len(), candidates.len());
        let keys: HashSet<_> = candidates.iter().map(|ap| ap.to_ledger_key()).collect();
        assert_eq!(keys.len(), candidates.len());
    }

    #[test]
    fn oracle_path_is_stable_and_case_insensitive() {
        let a = AccessPath::oracle_price("ETH_USDT");
        let b = AccessPath::oracle_price("eth_usdt");
        assert_eq!(a, b);
        assert_eq!(a.address, Address::ZERO);
        assert_eq!(a.path[0], RESOURCE_TAG);
        assert_eq!(a.path.len(), 33);
    }

    #[test]
    fn short_keys_do_not_decode() {
        assert_eq!(
            AccessPath::from_ledger_key(&[0u8; ADDRESS_LENGTH]),
            Err(AccessPathError::KeyTooShort(ADDRESS_LENGTH))
        );
    }

    #[test]
    fn oracle_price_is_little_endian() {
        let bytes = encode_oracle_price(0x0102);
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[..2], &[0x02, 0x01]);
    }
}
