//! Direct ledger access by access path, for other node modules.

use vmb_store::{LedgerStore, StoreResult};
use vmb_types::{AccessPath, encode_oracle_price};

/// Reads and writes VM state outside of any execution. Writes go straight to
/// the given ledger, so callers use this only where the node itself owns the
/// state (genesis, the price oracle).
pub trait VmStorage {
    fn oracle_access_path(&self, asset_code: &str) -> AccessPath {
        AccessPath::oracle_price(asset_code)
    }

    fn get_value(
        &self,
        ledger: &dyn LedgerStore,
        access_path: &AccessPath,
    ) -> StoreResult<Option<Vec<u8>>> {
        ledger.get(&access_path.to_ledger_key())
    }

    fn has_value(&self, ledger: &dyn LedgerStore, access_path: &AccessPath) -> StoreResult<bool> {
        ledger.has(&access_path.to_ledger_key())
    }

    fn set_value(
        &self,
        ledger: &dyn LedgerStore,
        access_path: &AccessPath,
        value: &[u8],
    ) -> StoreResult<()> {
        ledger.set(&access_path.to_ledger_key(), value)
    }

    fn del_value(&self, ledger: &dyn LedgerStore, access_path: &AccessPath) -> StoreResult<()> {
        ledger.delete(&access_path.to_ledger_key())
    }

    /// Publish a price where VM scripts expect to find it.
    fn set_oracle_price(
        &self,
        ledger: &dyn LedgerStore,
        asset_code: &str,
        price: u128,
    ) -> StoreResult<()> {
        let path = self.oracle_access_path(asset_code);
        self.set_value(ledger, &path, &encode_oracle_price(price))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmb_store::MemLedger;
    use vmb_types::Address;

    struct Plain;
    impl VmStorage for Plain {}

    #[test]
    fn values_round_trip_through_ledger_keys() {
        let ledger = MemLedger::new();
        let ap = AccessPath::resource(Address::new([3; 20]), "0x1::Account::Balance");

        assert_eq!(Plain.get_value(&ledger, &ap).unwrap(), None);
        Plain.set_value(&ledger, &ap, b"100").unwrap();
        assert!(Plain.has_value(&ledger, &ap).unwrap());
        assert_eq!(
            ledger.get(&ap.to_ledger_key()).unwrap(),
            Some(b"100".to_vec())
        );
        Plain.del_value(&ledger, &ap).unwrap();
        assert!(ledger.is_empty());
    }

    #[test]
    fn oracle_price_lands_at_case_insensitive_path() {
        let ledger = MemLedger::new();
        Plain.set_oracle_price(&ledger, "ETH_USDT", 1_500).unwrap();
        let path = Plain.oracle_access_path("eth_usdt");
        assert_eq!(path.address, Address::ZERO);
        assert_eq!(
            Plain.get_value(&ledger, &path).unwrap(),
            Some(1_500u128.to_le_bytes().to_vec())
        );
    }
}
