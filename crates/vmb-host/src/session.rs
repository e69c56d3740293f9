//! Per-request sessions the data-source server resolves VM calls against.
//!
//! A session lives exactly as long as the [`SessionGuard`] the bridge holds
//! while waiting on the VM. Writes the VM makes through the data source land
//! in the session overlay only; the ledger changes solely from a validated
//! write-set.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tracing::debug;
use vmb_store::DynLedger;

use crate::error::DsError;

pub type SessionId = u64;

type Overlay = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

pub struct Session {
    id: SessionId,
    height: u64,
    ledger: DynLedger,
    overlay: Mutex<Overlay>,
    fault: Mutex<Option<String>>,
}

impl Session {
    fn new(id: SessionId, ledger: DynLedger, height: u64) -> Self {
        Self {
            id,
            height,
            ledger,
            overlay: Mutex::new(BTreeMap::new()),
            fault: Mutex::new(None),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    // Calls within one session are serialized by holding this lock for the
    // whole call, ledger reads included.
    fn overlay(&self) -> MutexGuard<'_, Overlay> {
        self.overlay.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, DsError> {
        let overlay = self.overlay();
        self.read(&overlay, key)
    }

    pub fn multi_get<'a>(
        &self,
        keys: impl IntoIterator<Item = &'a [u8]>,
    ) -> Result<Vec<Option<Vec<u8>>>, DsError> {
        let overlay = self.overlay();
        keys.into_iter().map(|key| self.read(&overlay, key)).collect()
    }

    pub fn set(&self, key: Vec<u8>, value: Vec<u8>) {
        self.overlay().insert(key, Some(value));
    }

    pub fn delete(&self, key: Vec<u8>) {
        self.overlay().insert(key, None);
    }

    /// Number of keys the VM touched through the data source.
    pub fn overlay_len(&self) -> usize {
        self.overlay().len()
    }

    /// First ledger failure hit while serving this session. The VM only sees
    /// `storage_error` and may carry on, so the bridge checks this slot itself.
    pub fn storage_fault(&self) -> Option<String> {
        self.fault.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn read(&self, overlay: &Overlay, key: &[u8]) -> Result<Option<Vec<u8>>, DsError> {
        match overlay.get(key) {
            Some(entry) => Ok(entry.clone()),
            None => self.ledger.get(key).map_err(|err| {
                self.fault
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .get_or_insert_with(|| err.to_string());
                DsError::Storage(err)
            }),
        }
    }
}

/// Live sessions keyed by correlation id. Cheap to clone.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session over `ledger`. Ids are never reused, so a call
    /// carrying a stale id cannot reach a newer session.
    pub fn open(&self, ledger: DynLedger, height: u64) -> SessionGuard {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let session = Arc::new(Session::new(id, ledger, height));
        self.inner
            .sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, session.clone());
        debug!(session = id, height, "session opened");
        SessionGuard {
            registry: self.clone(),
            session,
        }
    }

    pub fn lookup(&self, id: SessionId) -> Result<Arc<Session>, DsError> {
        self.inner
            .sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
            .ok_or(DsError::UnknownRequest(id))
    }

    pub fn len(&self) -> usize {
        self.inner
            .sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict(&self, id: SessionId) {
        let removed = self
            .inner
            .sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        if let Some(session) = removed {
            debug!(session = id, touched = session.overlay_len(), "session closed");
        }
    }
}

/// Keeps a session registered; dropping it evicts the session along with its
/// overlay.
pub struct SessionGuard {
    registry: SessionRegistry,
    session: Arc<Session>,
}

impl SessionGuard {
    pub fn id(&self) -> SessionId {
        self.session.id
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.evict(self.session.id);
    }
}
