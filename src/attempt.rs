//! The mutable state shared by every component acting on one lock attempt
//! (§3 "LockAttempt", §5 "Shared state discipline").

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::Error;
use crate::external::{NearCacheEntry, TxHandle};
use crate::types::{Key, LockVersion, NodeId, ThreadId, VersionedValue};

/// A near-cache entry this attempt has successfully enlisted (§3
/// "EnlistedEntry"). `index` is stable for the lifetime of the attempt so a
/// peer response can be correlated back to it even if the underlying entry
/// handle is later replaced (evicted and recreated).
#[derive(Clone)]
pub struct EnlistedEntry {
    pub key: Key,
    pub entry: Arc<dyn NearCacheEntry>,
}

pub type Filter = Arc<dyn Fn(&dyn NearCacheEntry) -> bool + Send + Sync>;

/// Immutable-after-construction fields plus the mutable fields the
/// components above advance (§3). `LockAttempt` itself never drives state
/// transitions; [`crate::lock_future::LockFuture`] owns that behavior and
/// holds one of these.
pub struct LockAttempt {
    pub lock_version: LockVersion,
    pub future_id: Uuid,
    pub thread_id: ThreadId,
    pub keys: Vec<Key>,
    pub read: bool,
    pub ret_val: bool,
    pub timeout_ms: i64,
    pub filter: Filter,
    pub tx: Option<Arc<dyn TxHandle>>,

    topology_version: AtomicI64,
    entries: Mutex<Vec<EnlistedEntry>>,
    val_map: RwLock<HashMap<Key, VersionedValue>>,
    left_nodes: RwLock<HashSet<NodeId>>,
    error: Mutex<Option<Error>>,
    timed_out: AtomicBool,
    trackable: AtomicBool,
    initialized: AtomicBool,
}

const TOPOLOGY_VERSION_UNSET: i64 = -1;

impl LockAttempt {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        lock_version: LockVersion,
        future_id: Uuid,
        thread_id: ThreadId,
        keys: Vec<Key>,
        read: bool,
        ret_val: bool,
        timeout_ms: i64,
        filter: Filter,
        tx: Option<Arc<dyn TxHandle>>,
    ) -> Self {
        LockAttempt {
            lock_version,
            future_id,
            thread_id,
            keys,
            read,
            ret_val,
            timeout_ms,
            filter,
            tx,
            topology_version: AtomicI64::new(TOPOLOGY_VERSION_UNSET),
            entries: Mutex::new(Vec::new()),
            val_map: RwLock::new(HashMap::new()),
            left_nodes: RwLock::new(HashSet::new()),
            error: Mutex::new(None),
            timed_out: AtomicBool::new(false),
            trackable: AtomicBool::new(true),
            initialized: AtomicBool::new(false),
        }
    }

    /// Sets the topology version exactly once (I2); subsequent calls are
    /// no-ops and return the value that actually stuck.
    pub fn init_topology_version(&self, version: i64) -> i64 {
        match self.topology_version.compare_exchange(
            TOPOLOGY_VERSION_UNSET,
            version,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => version,
            Err(existing) => existing,
        }
    }

    pub fn topology_version(&self) -> i64 {
        self.topology_version.load(Ordering::SeqCst)
    }

    pub fn push_entry(&self, entry: EnlistedEntry) {
        self.entries.lock().push(entry);
    }

    /// A lock-free snapshot for `check_locks`/undo iteration (§5
    /// "entries_copy()").
    pub fn entries_copy(&self) -> Vec<EnlistedEntry> {
        self.entries.lock().clone()
    }

    pub fn entries_len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn record_versioned_value(&self, key: Key, value: VersionedValue) {
        self.val_map.write().insert(key, value);
    }

    pub fn versioned_value(&self, key: &Key) -> Option<VersionedValue> {
        self.val_map.read().get(key).cloned()
    }

    pub fn add_left_node(&self, node: NodeId) {
        self.left_nodes.write().insert(node);
    }

    pub fn left_nodes(&self) -> HashSet<NodeId> {
        self.left_nodes.read().clone()
    }

    /// Write-once: the first non-sentinel error wins (§7 "Propagation
    /// policy"). Returns `true` if this call set the error.
    pub fn set_error_once(&self, err: Error) -> bool {
        let mut guard = self.error.lock();
        if guard.is_none() {
            *guard = Some(err);
            true
        } else {
            false
        }
    }

    pub fn take_error(&self) -> Option<Error> {
        self.error.lock().take()
    }

    pub fn set_timed_out(&self) {
        self.timed_out.store(true, Ordering::SeqCst);
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }

    pub fn set_trackable(&self, trackable: bool) {
        self.trackable.store(trackable, Ordering::SeqCst);
    }

    pub fn trackable(&self) -> bool {
        self.trackable.load(Ordering::SeqCst)
    }

    pub fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::SeqCst);
    }

    pub fn initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }
}
