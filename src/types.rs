//! Core data types shared by every component of the coordinator.

use std::cmp::Ordering;
use std::fmt;

use serde_derive::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies a cluster member. Kept as a thin newtype rather than a raw
/// integer so call sites read as node identifiers, not counters.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// A raw key. The coordinator never interprets key bytes; it only hashes,
/// compares and forwards them to the affinity function and the wire
/// protocol.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key(pub Vec<u8>);

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", hex_preview(&self.0))
    }
}

fn hex_preview(bytes: &[u8]) -> String {
    let n = bytes.len().min(8);
    let mut s = String::with_capacity(n * 2);
    for b in &bytes[..n] {
        s.push_str(&format!("{:02x}", b));
    }
    if bytes.len() > n {
        s.push_str("..");
    }
    s
}

impl From<Vec<u8>> for Key {
    fn from(v: Vec<u8>) -> Self {
        Key(v)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key(s.as_bytes().to_vec())
    }
}

/// Logical owner of lock candidates, distinct from the OS thread id: two
/// near-cache operations issued by the same logical caller (e.g. the same
/// connection) reentrantly share a `ThreadId`.
pub type ThreadId = u64;

/// A globally unique, monotonically ordered lock attempt identifier.
///
/// Ordering is by `order` first so two versions minted on the same node can
/// be compared without looking at the uuid; the uuid exists purely to break
/// ties across nodes that might otherwise race on the same counter value.
#[derive(Clone, Eq, Serialize, Deserialize)]
pub struct LockVersion {
    pub order: u64,
    pub id: Uuid,
}

impl LockVersion {
    pub fn new(order: u64) -> Self {
        LockVersion {
            order,
            id: Uuid::new_v4(),
        }
    }
}

impl fmt::Debug for LockVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LockVersion({}, {})", self.order, self.id)
    }
}

impl PartialEq for LockVersion {
    fn eq(&self, other: &Self) -> bool {
        self.order == other.order && self.id == other.id
    }
}

impl std::hash::Hash for LockVersion {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.order.hash(state);
        self.id.hash(state);
    }
}

impl PartialOrd for LockVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LockVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order.cmp(&other.order).then_with(|| self.id.cmp(&other.id))
    }
}

/// A monotonic allocator for `LockVersion::order`. One instance is normally
/// shared per node; tests may each own a private allocator.
#[derive(Default)]
pub struct LockVersionAllocator {
    next: std::sync::atomic::AtomicU64,
}

impl LockVersionAllocator {
    pub fn new() -> Self {
        LockVersionAllocator {
            next: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn alloc(&self) -> LockVersion {
        let order = self.next.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        LockVersion::new(order)
    }
}

/// The locally-observed (pre-lock) version/value pair used to de-duplicate
/// read events and to reconstruct an unchanged value when a peer's response
/// omits it (see the response applier, §4.6 step 3).
#[derive(Clone, Debug)]
pub struct VersionedValue {
    pub dht_version: u64,
    pub value: Option<Vec<u8>>,
    pub value_bytes: Option<Vec<u8>>,
}

/// Isolation level carried on the wire so a remote primary can apply the
/// right visibility rule to the lock it grants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Isolation {
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// Inputs to `NearCacheEntry::add_near_local_candidate` (§4.2 step 3),
/// bundled so the enlister and its trait boundary don't grow a seven-tuple.
#[derive(Clone, Debug)]
pub struct CandidateRequest {
    pub dht_node_id: NodeId,
    pub thread_id: ThreadId,
    pub lock_version: LockVersion,
    pub timeout_ms: i64,
    pub in_tx: bool,
    pub ec_mode: bool,
    pub implicit_single_tx: bool,
}

/// What `add_near_local_candidate` produced for one key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CandidateOutcome {
    /// A brand-new candidate was appended to the entry's MVCC queue.
    Fresh,
    /// The caller already holds a compatible candidate; granted immediately.
    Reentry,
    /// No candidate could be granted without blocking, and the caller's
    /// timeout forbids waiting (§4.2 step 3, third bullet).
    WouldBlock,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_version_orders_by_counter_first() {
        let a = LockVersion::new(1);
        let b = LockVersion::new(2);
        assert!(a < b);
    }

    #[test]
    fn lock_version_allocator_is_monotonic() {
        let alloc = LockVersionAllocator::new();
        let a = alloc.alloc();
        let b = alloc.alloc();
        assert!(a.order < b.order);
    }

    #[test]
    fn key_debug_truncates_long_keys() {
        let k = Key(vec![0xab; 32]);
        let rendered = format!("{:?}", k);
        assert!(rendered.ends_with(".."));
    }
}
