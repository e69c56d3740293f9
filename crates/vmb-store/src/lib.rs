//! Ledger storage abstractions used by both directions of the VM bridge,
//! plus in-memory, block-branch and prefix-namespaced backends.

mod cache;
mod mem_ledger;
mod prefix;

pub use cache::CacheLedger;
pub use mem_ledger::MemLedger;
pub use prefix::PrefixLedger;

use std::sync::Arc;

pub type StoreResult<T> = Result<T, StoreError>;
pub type DynLedger = Arc<dyn LedgerStore>;
pub type KvPair = (Vec<u8>, Vec<u8>);

/// Ordered key-value store scoped to the current block context.
///
/// Writes are visible to later reads through the same handle; whether they
/// survive is decided by the owner of the block context (commit or discard).
pub trait LedgerStore: Send + Sync {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;
    fn set(&self, key: &[u8], value: &[u8]) -> StoreResult<()>;
    fn delete(&self, key: &[u8]) -> StoreResult<()>;

    fn has(&self, key: &[u8]) -> StoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Entries whose key starts with `prefix`, in ascending key order, as of
    /// the call.
    fn iter_prefix(&self, prefix: &[u8]) -> StoreResult<PrefixIter>;
}

impl<T: LedgerStore + ?Sized> LedgerStore for Arc<T> {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn set(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        (**self).set(key, value)
    }

    fn delete(&self, key: &[u8]) -> StoreResult<()> {
        (**self).delete(key)
    }

    fn has(&self, key: &[u8]) -> StoreResult<bool> {
        (**self).has(key)
    }

    fn iter_prefix(&self, prefix: &[u8]) -> StoreResult<PrefixIter> {
        (**self).iter_prefix(prefix)
    }
}

/// Iterator over a point-in-time view of a key range.
///
/// Backends collect the range while holding their read lock, so the iterator
/// itself never blocks writers.
#[derive(Debug)]
pub struct PrefixIter {
    inner: std::vec::IntoIter<KvPair>,
}

impl PrefixIter {
    pub fn new(entries: Vec<KvPair>) -> Self {
        Self {
            inner: entries.into_iter(),
        }
    }
}

impl Iterator for PrefixIter {
    type Item = KvPair;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("ledger lock poisoned: {0}")]
    Poisoned(&'static str),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Smallest key strictly greater than every key starting with `prefix`, or
/// `None` when the prefix is all `0xff` (the range is unbounded).
pub(crate) fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_end_increments_last_byte() {
        assert_eq!(prefix_end(b"ab"), Some(b"ac".to_vec()));
        assert_eq!(prefix_end(&[1, 0xff]), Some(vec![2]));
        assert_eq!(prefix_end(&[0xff, 0xff]), None);
        assert_eq!(prefix_end(&[]), None);
    }
}
