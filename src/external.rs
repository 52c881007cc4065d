//! Contracts for the external collaborators named in §1 and §6. The
//! coordinator only ever sees these traits; concrete production bindings
//! (a real gRPC transport, a real partitioned near cache, ...) live outside
//! this crate. [`crate::registry::InMemoryRegistry`] and
//! [`crate::timeout::TokioTimeoutWheel`] are the two collaborators simple
//! enough to ship a real implementation of; the rest only get test doubles,
//! under the `testing` feature.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::error::Result;
use crate::messages::LockRequest;
use crate::types::{CandidateOutcome, CandidateRequest, Isolation, Key, LockVersion, NodeId, ThreadId, VersionedValue};

/// A frozen view of cluster membership, taken once per mapping pass so
/// every key in that pass sees the same node list (§4.1, I2, P4).
#[derive(Clone, Debug)]
pub struct TopologySnapshot {
    pub version: i64,
    pub nodes: Vec<NodeId>,
}

pub trait Topology: Send + Sync {
    /// The topology version currently in effect. Only consulted on the
    /// *first* mapping pass of an attempt; remaps reuse the version already
    /// stamped onto the attempt (I2).
    fn current_version(&self) -> i64;

    /// All nodes known to hold a primary replica at `version`. Remaps pass
    /// the attempt's frozen version back in here, not a fresh one.
    fn nodes_at(&self, version: i64) -> Vec<NodeId>;

    fn snapshot(&self) -> TopologySnapshot {
        let version = self.current_version();
        TopologySnapshot {
            nodes: self.nodes_at(version),
            version,
        }
    }
}

/// Maps a key to its primary node given a candidate node list (§4.1).
pub trait Affinity: Send + Sync {
    fn primary(&self, key: &Key, nodes: &[NodeId]) -> Option<NodeId>;
}

/// A near-cache entry handle (§6 "Near cache"). Implementations are
/// expected to be cheap `Clone`s (e.g. an `Arc` around the real entry).
pub trait NearCacheEntry: Send + Sync {
    fn key(&self) -> &Key;

    /// §4.2 step 3.
    fn add_near_local_candidate(&self, request: &CandidateRequest) -> Result<CandidateOutcome>;

    /// The entry's locally-known (version, value, value-bytes), if any.
    fn versioned_value(&self) -> Option<VersionedValue>;

    /// Idempotent: repeated calls after the first are a no-op (P9).
    fn remove_lock(&self, version: &LockVersion);

    fn locked_locally_by(&self, version: &LockVersion, thread_id: ThreadId) -> bool;

    /// §4.6 step 4: install the authoritative value under the just-acquired
    /// lock.
    fn reset_from_primary(
        &self,
        value: Option<Vec<u8>>,
        value_bytes: Option<Vec<u8>>,
        version: &LockVersion,
        dht_version: u64,
        peer: NodeId,
    );

    /// §4.6 step 5.
    fn done_remote(
        &self,
        version: &LockVersion,
        min_version_for_visibility: &LockVersion,
        pending: &[LockVersion],
        committed: &[LockVersion],
        rolled_back: &[LockVersion],
    );

    /// §4.6 step 6: record a read event and bump the entry's read metric.
    fn record_read_event(&self);

    /// §4.6 step 7: eventually-consistent recheck.
    fn recheck(&self);
}

pub trait NearCache: Send + Sync {
    /// Obtain or refresh the entry object for `key` (§4.2 step 1).
    fn entry_exx(&self, key: &Key) -> Arc<dyn NearCacheEntry>;

    /// §7 propagation policy: ask the near cache to send release messages
    /// to the peers that hold remote candidates for `(lock_version, keys)`.
    fn release_remote(&self, lock_version: &LockVersion, keys: &[Key]);
}

/// The DHT tier's locally-reachable, non-networked surface (§6 "DHT
/// tier").
pub trait DhtTier: Send + Sync {
    /// A best-effort peek at the tier's locally-held copy, used as a
    /// fallback when the near-cache entry has no versioned value of its
    /// own (§4.2 step 3).
    fn peek(&self, key: &Key) -> Option<VersionedValue>;

    /// The local-primary shortcut (§4.4): invoked directly, bypassing the
    /// transport, when the mapped peer for a group is this node.
    fn lock_all_async(&self, local_node: NodeId, request: LockRequest) -> BoxFuture<'static, Result<crate::messages::LockResponse>>;
}

/// What a [`Transport::send`] call resolves to; maps 1:1 onto the three
/// terminal events a mini-future can observe (§4.3).
pub enum TransportOutcome {
    Response(crate::messages::LockResponse),
    PeerLeft,
    Error(crate::error::Error),
}

pub trait Transport: Send + Sync {
    fn send(&self, node: NodeId, request: LockRequest) -> BoxFuture<'static, TransportOutcome>;
}

/// A non-owning callback surface the MVCC registry can invoke without
/// holding a strong reference to the compound future, breaking the cycle
/// described in §9 "Cyclic ownership".
pub trait LockFutureSink: Send + Sync {
    /// §4.4 `on_owner_changed`.
    fn on_owner_changed(&self, key: &Key, new_owner: &LockVersion) -> bool;
    /// §4.4 `on_node_left`.
    fn on_node_left(&self, node: NodeId) -> bool;
}

/// The process-wide MVCC future registry (§6, §9). Injected rather than a
/// singleton so tests can use an isolated instance per attempt.
pub trait MvccRegistry: Send + Sync {
    fn register(&self, future_id: Uuid, sink: std::sync::Weak<dyn LockFutureSink>);
    fn remove_future(&self, future_id: Uuid);
    fn recheck_pending_locks(&self);
}

/// The timeout wheel (§6, §4.5). `add` fires `callback` no earlier than
/// `delay` from now, exactly once, unless cancelled first via `remove`.
pub trait TimeoutWheel: Send + Sync {
    fn add(&self, timeout_id: Uuid, delay: Duration, callback: Box<dyn FnOnce() + Send>);
    fn remove(&self, timeout_id: Uuid);
}

/// The enclosing transaction, when an attempt is part of one (§6).
pub trait TxHandle: Send + Sync {
    fn xid_version(&self) -> LockVersion;
    fn min_version(&self) -> LockVersion;
    fn implicit(&self) -> bool;
    fn implicit_single(&self) -> bool;
    fn ec(&self) -> bool;
    fn is_invalidate(&self) -> bool;
    fn sync_commit(&self) -> bool;
    fn sync_rollback(&self) -> bool;
    fn isolation(&self) -> Isolation;

    fn add_key_mapping(&self, node: NodeId, keys: Vec<Key>);
    /// Records that this node's lock was acquired outside the tx's normal
    /// enlistment flow (a reentry candidate, §4.2 step 3 second bullet).
    fn mark_explicit(&self, node: NodeId);
    fn remove_mapping(&self, node: NodeId);
    fn set_rollback_only(&self);
}
