use crate::{KvPair, LedgerStore, PrefixIter, StoreError, StoreResult, prefix_end};
use std::{
    collections::BTreeMap,
    ops::Bound,
    sync::{Arc, RwLock},
};

/// In-memory ordered ledger. Clones share the same underlying map.
#[derive(Clone, Default)]
pub struct MemLedger {
    entries: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl std::fmt::Debug for MemLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self.entries.read().map(|guard| guard.len()).unwrap_or(0);
        f.debug_struct("MemLedger").field("entries", &len).finish()
    }
}

impl MemLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full copy of the current contents, in key order.
    pub fn snapshot(&self) -> StoreResult<Vec<KvPair>> {
        let guard = self
            .entries
            .read()
            .map_err(|_| StoreError::Poisoned("mem ledger"))?;
        Ok(guard.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub(crate) fn range_of<V: Clone>(
    map: &BTreeMap<Vec<u8>, V>,
    prefix: &[u8],
) -> Vec<(Vec<u8>, V)> {
    let start = Bound::Included(prefix.to_vec());
    let end = match prefix_end(prefix) {
        Some(end) => Bound::Excluded(end),
        None => Bound::Unbounded,
    };
    map.range((start, end))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

impl LedgerStore for MemLedger {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        let guard = self
            .entries
            .read()
            .map_err(|_| StoreError::Poisoned("mem ledger"))?;
        Ok(guard.get(key).cloned())
    }

    fn set(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        let mut guard = self
            .entries
            .write()
            .map_err(|_| StoreError::Poisoned("mem ledger"))?;
        guard.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> StoreResult<()> {
        let mut guard = self
            .entries
            .write()
            .map_err(|_| StoreError::Poisoned("mem ledger"))?;
        guard.remove(key);
        Ok(())
    }

    fn has(&self, key: &[u8]) -> StoreResult<bool> {
        let guard = self
            .entries
            .read()
            .map_err(|_| StoreError::Poisoned("mem ledger"))?;
        Ok(guard.contains_key(key))
    }

    fn iter_prefix(&self, prefix: &[u8]) -> StoreResult<PrefixIter> {
        let guard = self
            .entries
            .read()
            .map_err(|_| StoreError::Poisoned("mem ledger"))?;
        Ok(PrefixIter::new(range_of(&*guard, prefix)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_set_delete() {
        let ledger = MemLedger::new();
        assert_eq!(ledger.get(b"k").unwrap(), None);
        assert!(!ledger.has(b"k").unwrap());

        ledger.set(b"k", b"v").unwrap();
        assert_eq!(ledger.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert!(ledger.has(b"k").unwrap());

        ledger.delete(b"k").unwrap();
        assert_eq!(ledger.get(b"k").unwrap(), None);
    }

    #[test]
    fn empty_value_is_not_absent() {
        let ledger = MemLedger::new();
        ledger.set(b"k", b"").unwrap();
        assert_eq!(ledger.get(b"k").unwrap(), Some(vec![]));
    }

    #[test]
    fn iter_prefix_is_ordered_and_bounded() {
        let ledger = MemLedger::new();
        ledger.set(&[1, 2], b"b").unwrap();
        ledger.set(&[1, 1], b"a").unwrap();
        ledger.set(&[1, 0xff, 0], b"c").unwrap();
        ledger.set(&[2], b"x").unwrap();
        ledger.set(&[0, 9], b"y").unwrap();

        let keys: Vec<_> = ledger.iter_prefix(&[1]).unwrap().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![vec![1, 1], vec![1, 2], vec![1, 0xff, 0]]);

        let all: Vec<_> = ledger.iter_prefix(&[]).unwrap().collect();
        assert_eq!(all.len(), 5);
    }

    #[test]
    fn iter_prefix_is_a_snapshot() {
        let ledger = MemLedger::new();
        ledger.set(&[1, 1], b"a").unwrap();
        let iter = ledger.iter_prefix(&[1]).unwrap();
        ledger.set(&[1, 2], b"b").unwrap();
        ledger.delete(&[1, 1]).unwrap();

        let seen: Vec<_> = iter.collect();
        assert_eq!(seen, vec![(vec![1, 1], b"a".to_vec())]);
    }

    #[test]
    fn clones_share_state() {
        let ledger = MemLedger::new();
        let other = ledger.clone();
        other.set(b"k", b"v").unwrap();
        assert_eq!(ledger.get(b"k").unwrap(), Some(b"v".to_vec()));
        assert_eq!(ledger.len(), 1);
    }
}
