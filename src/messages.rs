//! Wire messages exchanged between the coordinator and a peer's lock
//! service (§6). The transport itself (gRPC, raw TCP, whatever the
//! embedding cluster uses) is out of scope; these types are just the
//! payload, the same split `tikv` draws between `kvproto`'s generated
//! messages and the logic in `storage::txn` that fills them in.

use serde_derive::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Isolation, LockVersion, NodeId, ThreadId};

/// One key's contribution to a [`LockRequest`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PerKeyRequest {
    /// Omitted when the candidate was a reentry, or when the target node is
    /// the local node (the DHT shortcut already has the key in hand and
    /// does not need it serialized back to itself).
    pub key_bytes: Option<Vec<u8>>,
    pub want_return: bool,
    /// Count of candidates the entry already carried before this one;
    /// informational only, lets the peer skip re-describing locks it
    /// already knows about.
    pub existing_candidates: u32,
    pub dht_version: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LockRequest {
    pub topology_version: i64,
    pub sender_node: NodeId,
    pub thread_id: ThreadId,
    pub future_id: Uuid,
    pub lock_version: LockVersion,
    pub in_tx: bool,
    pub implicit_tx: bool,
    pub implicit_single_tx: bool,
    pub read: bool,
    pub isolation: Option<Isolation>,
    pub invalidate: bool,
    pub timeout_ms: i64,
    pub sync_commit: bool,
    pub sync_rollback: bool,
    pub mini_id: Uuid,
    pub keys: Vec<PerKeyRequest>,
}

/// One key's contribution to a [`LockResponse`], index-aligned with the
/// `keys` of the [`LockRequest`] it answers (§4.1 "Ordering").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PerKeyResponse {
    pub value: Option<Vec<u8>>,
    pub value_bytes: Option<Vec<u8>>,
    pub dht_version: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LockResponse {
    pub lock_version: LockVersion,
    pub future_id: Uuid,
    pub mini_id: Uuid,
    pub keys: Vec<PerKeyResponse>,
    pub pending_versions: Vec<LockVersion>,
    pub committed_versions: Vec<LockVersion>,
    pub rolled_back_versions: Vec<LockVersion>,
}
