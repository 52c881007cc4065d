//! C3: Per-Peer Mini-Future. Tracks the outstanding request to one node and
//! consumes exactly one terminal event (§4.3, I4, P2).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;

use uuid::Uuid;

use crate::error::Error;
use crate::lock_future::LockFuture;
use crate::messages::LockResponse;
use crate::types::{Key, NodeId};

pub struct MiniFuture {
    pub mini_id: Uuid,
    pub node: NodeId,
    pub keys: Vec<Key>,
    received: AtomicBool,
    parent: Weak<LockFuture>,
}

impl MiniFuture {
    pub fn new(mini_id: Uuid, node: NodeId, keys: Vec<Key>, parent: Weak<LockFuture>) -> Self {
        MiniFuture {
            mini_id,
            node,
            keys,
            received: AtomicBool::new(false),
            parent,
        }
    }

    /// Non-authoritative peek used by `LockFuture::on_node_left` to decide
    /// whether it's worth calling `on_peer_left` at all; the actual
    /// single-shot guarantee is still enforced by the CAS inside each
    /// `on_*` method (I4).
    pub fn is_received(&self) -> bool {
        self.received.load(Ordering::SeqCst)
    }

    fn claim(&self) -> bool {
        self.received
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn on_response(&self, response: LockResponse) {
        if self.claim() {
            if let Some(parent) = self.parent.upgrade() {
                parent.handle_mini_response(self, response);
            }
        }
    }

    pub fn on_error(&self, err: Error) {
        if self.claim() {
            if let Some(parent) = self.parent.upgrade() {
                parent.handle_mini_error(err);
            }
        }
    }

    pub fn on_peer_left(&self) {
        if self.claim() {
            if let Some(parent) = self.parent.upgrade() {
                parent.handle_mini_peer_left(self);
            }
        }
    }
}
