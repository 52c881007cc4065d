//! Error taxonomy for the coordinator (§7).
//!
//! `LockTimeout` is deliberately absent from this enum: it is a sentinel,
//! swallowed at the point it would be raised and turned into a plain `false`
//! result (see [`crate::lock_future::LockOutcome::TimedOut`]). Everything
//! else here is a real failure that propagates to the caller.

use crate::types::{Key, NodeId};

quick_error::quick_error! {
    #[derive(Debug)]
    pub enum ErrorInner {
        /// A peer left the cluster before responding to its lock request.
        /// Non-fatal by itself; the mini-future converts this into a remap.
        TopologyChanged(node: NodeId) {
            display("peer {:?} left before the lock request completed", node)
        }
        /// Re-mapping a key would re-target a node that already held it
        /// during this attempt (§4.1, P6).
        RemapToSameNode(key: Key, node: NodeId) {
            display("remap of {:?} would re-target {:?}, which already held it in this attempt", key, node)
        }
        /// `filter(entry)` returned false for an enlisted entry, either
        /// during enlistment or in the final `check_locks` pass.
        FilterRejected(key: Key) {
            display("filter rejected entry {:?}", key)
        }
        /// A candidate could not be granted without blocking and the
        /// caller's timeout forbids waiting.
        WouldBlock(key: Key) {
            display("lock on {:?} would block and timeout_ms <= 0 forbids waiting", key)
        }
        /// A peer's response omitted the dht version for a key it was asked
        /// to lock: a broken peer invariant, always fatal.
        MissingDhtVersion(key: Key) {
            display("peer response for {:?} is missing a dht version", key)
        }
        /// The affinity function returned no primary for a key, e.g.
        /// because every candidate node has since left (§4.1).
        NoPrimaryAvailable(key: Key) {
            display("no primary node available for {:?}", key)
        }
        /// The final `check_locks` pass found an entry not held by this
        /// attempt's lock version, even though every mini-future resolved
        /// successfully. Not named in the upstream taxonomy but required by
        /// the state machine in §4.4; see DESIGN.md.
        LockVerificationFailed(key: Key) {
            display("entry {:?} is not held by this attempt after all responses were applied", key)
        }
        /// The transport failed to deliver a request or response.
        Transport(message: String) {
            display("transport failure: {}", message)
        }
        /// The caller explicitly cancelled the attempt.
        Cancelled {
            display("lock attempt cancelled")
        }
        /// The near cache reported that an entry was concurrently evicted
        /// and recreated one time too many; bounded by
        /// `Config::max_enlist_retries`.
        EntryRemoved(key: Key) {
            display("near-cache entry for {:?} was removed too many times while enlisting", key)
        }
    }
}

/// A boxed `ErrorInner`; boxing keeps `LockOutcome` (which wraps this in an
/// `Arc`) and `Result<T>` cheap to move around despite `ErrorInner` carrying
/// owned keys.
#[derive(Debug)]
pub struct Error(pub Box<ErrorInner>);

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.0)
    }
}

impl From<ErrorInner> for Error {
    fn from(inner: ErrorInner) -> Self {
        Error(Box::new(inner))
    }
}

impl Error {
    /// Transient failures the entry enlister retries locally rather than
    /// propagating to the attempt (§4.2 step 4, §7 `EntryRemoved`).
    pub fn is_entry_removed(&self) -> bool {
        matches!(&*self.0, ErrorInner::EntryRemoved(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
