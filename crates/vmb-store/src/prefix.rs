use crate::{DynLedger, LedgerStore, PrefixIter, StoreResult};

/// A module's namespace inside a shared ledger: every key is transparently
/// prefixed on the way in and stripped on the way out.
#[derive(Clone)]
pub struct PrefixLedger {
    prefix: Vec<u8>,
    inner: DynLedger,
}

impl std::fmt::Debug for PrefixLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefixLedger")
            .field("prefix", &String::from_utf8_lossy(&self.prefix))
            .finish()
    }
}

impl PrefixLedger {
    pub fn new(inner: DynLedger, prefix: impl Into<Vec<u8>>) -> Self {
        Self {
            prefix: prefix.into(),
            inner,
        }
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    fn full_key(&self, key: &[u8]) -> Vec<u8> {
        let mut full = Vec::with_capacity(self.prefix.len() + key.len());
        full.extend_from_slice(&self.prefix);
        full.extend_from_slice(key);
        full
    }
}

impl LedgerStore for PrefixLedger {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        self.inner.get(&self.full_key(key))
    }

    fn set(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.inner.set(&self.full_key(key), value)
    }

    fn delete(&self, key: &[u8]) -> StoreResult<()> {
        self.inner.delete(&self.full_key(key))
    }

    fn has(&self, key: &[u8]) -> StoreResult<bool> {
        self.inner.has(&self.full_key(key))
    }

    fn iter_prefix(&self, prefix: &[u8]) -> StoreResult<PrefixIter> {
        let strip = self.prefix.len();
        let entries = self
            .inner
            .iter_prefix(&self.full_key(prefix))?
            .map(|(key, value)| (key[strip..].to_vec(), value))
            .collect();
        Ok(PrefixIter::new(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemLedger;
    use std::sync::Arc;

    #[test]
    fn namespaces_do_not_overlap() {
        let shared = MemLedger::new();
        let vm = PrefixLedger::new(Arc::new(shared.clone()), b"vm/".to_vec());
        let oracle = PrefixLedger::new(Arc::new(shared.clone()), b"oracle/".to_vec());

        vm.set(b"k", b"1").unwrap();
        oracle.set(b"k", b"2").unwrap();

        assert_eq!(vm.get(b"k").unwrap(), Some(b"1".to_vec()));
        assert_eq!(oracle.get(b"k").unwrap(), Some(b"2".to_vec()));
        assert_eq!(shared.get(b"vm/k").unwrap(), Some(b"1".to_vec()));

        let keys: Vec<_> = vm.iter_prefix(b"").unwrap().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"k".to_vec()]);

        vm.delete(b"k").unwrap();
        assert!(!vm.has(b"k").unwrap());
        assert!(oracle.has(b"k").unwrap());
    }
}
