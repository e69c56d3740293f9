use std::collections::BTreeMap;
use std::sync::RwLock;

use tracing::debug;

use crate::mem_ledger::range_of;
use crate::{DynLedger, LedgerStore, PrefixIter, StoreError, StoreResult};

type Dirty = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

/// Uncommitted branch over a parent ledger.
///
/// Reads see the branch's own writes first and fall through to the parent.
/// Nothing reaches the parent until [`CacheLedger::commit`]. A block context
/// is one branch; a non-committing simulation gets its own branch over the
/// same parent and is simply dropped.
pub struct CacheLedger {
    parent: DynLedger,
    dirty: RwLock<Dirty>,
}

impl std::fmt::Debug for CacheLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let dirty = self.dirty.read().map(|guard| guard.len()).unwrap_or(0);
        f.debug_struct("CacheLedger").field("dirty", &dirty).finish()
    }
}

impl CacheLedger {
    pub fn new(parent: DynLedger) -> Self {
        Self {
            parent,
            dirty: RwLock::new(BTreeMap::new()),
        }
    }

    fn read_dirty(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, Dirty>> {
        self.dirty
            .read()
            .map_err(|_| StoreError::Poisoned("cache ledger"))
    }

    fn write_dirty(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, Dirty>> {
        self.dirty
            .write()
            .map_err(|_| StoreError::Poisoned("cache ledger"))
    }

    /// Number of keys touched since the last commit or discard.
    pub fn dirty_len(&self) -> StoreResult<usize> {
        Ok(self.read_dirty()?.len())
    }

    /// Flush pending writes to the parent in key order.
    pub fn commit(&self) -> StoreResult<usize> {
        let pending = std::mem::take(&mut *self.write_dirty()?);
        let count = pending.len();
        for (key, value) in pending {
            match value {
                Some(value) => self.parent.set(&key, &value)?,
                None => self.parent.delete(&key)?,
            }
        }
        debug!(entries = count, "committed ledger branch");
        Ok(count)
    }

    /// Drop pending writes.
    pub fn discard(&self) -> StoreResult<()> {
        self.write_dirty()?.clear();
        Ok(())
    }
}

impl LedgerStore for CacheLedger {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        if let Some(entry) = self.read_dirty()?.get(key) {
            return Ok(entry.clone());
        }
        self.parent.get(key)
    }

    fn set(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.write_dirty()?.insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> StoreResult<()> {
        self.write_dirty()?.insert(key.to_vec(), None);
        Ok(())
    }

    fn iter_prefix(&self, prefix: &[u8]) -> StoreResult<PrefixIter> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = self.parent.iter_prefix(prefix)?.collect();
        let dirty = self.read_dirty()?;
        for (key, value) in range_of(&*dirty, prefix) {
            match value {
                Some(value) => {
                    merged.insert(key, value);
                }
                None => {
                    merged.remove(&key);
                }
            }
        }
        Ok(PrefixIter::new(merged.into_iter().collect()))
    }
}
