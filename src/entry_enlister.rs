//! C2: Entry Enlister. For one node's share of an attempt's keys, obtains
//! each near-cache entry, appends a local lock candidate, and records
//! what's needed to build that node's `LockRequest` (§4.2).

use crate::attempt::{EnlistedEntry, LockAttempt};
use crate::config::Config;
use crate::error::{ErrorInner, Result};
use crate::external::{DhtTier, NearCache};
use crate::messages::PerKeyRequest;
use crate::types::{CandidateOutcome, CandidateRequest, Key, NodeId};

/// Result of enlisting one node's group of keys.
#[derive(Default)]
pub struct EnlistOutcome {
    /// Per-key request blocks, in the same order as `dispatched_keys`, for
    /// keys that got a *fresh* candidate. Reentries never reach this list:
    /// no request is needed for them (§4.2 step 3, scenario 6).
    pub per_key_requests: Vec<PerKeyRequest>,
    /// The keys `per_key_requests` describes, same order, used as the
    /// mini-future's key list so response indices line up.
    pub dispatched_keys: Vec<Key>,
    /// Set when a reentry candidate was granted for a key the enclosing
    /// transaction does not yet hold at its own xid version (§4.2 step 3
    /// second bullet): the caller should call `tx.mark_explicit(node)`.
    pub explicit_mapping_needed: bool,
}

pub struct EntryEnlister<'a> {
    near_cache: &'a dyn NearCache,
    dht: &'a dyn DhtTier,
    config: &'a Config,
    local_node: NodeId,
}

impl<'a> EntryEnlister<'a> {
    pub fn new(near_cache: &'a dyn NearCache, dht: &'a dyn DhtTier, config: &'a Config, local_node: NodeId) -> Self {
        EntryEnlister {
            near_cache,
            dht,
            config,
            local_node,
        }
    }

    /// Enlists every key in `keys`, all mapped to `node`. Returns as soon as
    /// the attempt is observed to have timed out, abandoning the rest of
    /// the group (§4.2 step 5) rather than treating that as an error — the
    /// caller checks `attempt.timed_out()` afterwards.
    pub fn enlist(&self, node: NodeId, keys: &[Key], attempt: &LockAttempt) -> Result<EnlistOutcome> {
        let mut outcome = EnlistOutcome::default();

        for key in keys {
            if attempt.timed_out() {
                break;
            }

            if let Some(candidate) = self.enlist_one(node, key, attempt, &mut outcome)? {
                if attempt.timed_out() {
                    // §4.2 step 5: drop what we just won and stop.
                    candidate.entry.remove_lock(&attempt.lock_version);
                    break;
                }
            }
        }

        Ok(outcome)
    }

    /// Enlists a single key, retrying on `EntryRemoved` up to
    /// `config.max_enlist_retries` times. Returns the freshly pushed entry
    /// (if any) so the caller can unwind it if a timeout raced the call.
    fn enlist_one(
        &self,
        node: NodeId,
        key: &Key,
        attempt: &LockAttempt,
        outcome: &mut EnlistOutcome,
    ) -> Result<Option<EnlistedEntry>> {
        let mut retries_left = self.config.max_enlist_retries;

        loop {
            let entry = self.near_cache.entry_exx(key);

            if !(attempt.filter)(&*entry) {
                return Err(ErrorInner::FilterRejected(key.clone()).into());
            }

            let request = CandidateRequest {
                dht_node_id: node,
                thread_id: attempt.thread_id,
                lock_version: attempt.lock_version.clone(),
                timeout_ms: attempt.timeout_ms,
                in_tx: attempt.tx.is_some(),
                ec_mode: self.config.ec_mode,
                implicit_single_tx: attempt.tx.as_ref().map_or(false, |tx| tx.implicit_single()),
            };

            match entry.add_near_local_candidate(&request) {
                Ok(CandidateOutcome::Fresh) => {
                    let versioned = entry.versioned_value().or_else(|| self.dht.peek(key));
                    let local_dht_version = versioned.as_ref().map(|v| v.dht_version);
                    if let Some(v) = versioned {
                        attempt.record_versioned_value(key.clone(), v);
                    }

                    let enlisted = EnlistedEntry {
                        key: key.clone(),
                        entry: entry.clone(),
                    };
                    attempt.push_entry(enlisted.clone());

                    outcome.per_key_requests.push(PerKeyRequest {
                        key_bytes: if node == self.local_node {
                            None
                        } else {
                            Some(key.0.clone())
                        },
                        want_return: attempt.ret_val && local_dht_version.is_none(),
                        existing_candidates: 0,
                        dht_version: local_dht_version,
                    });
                    outcome.dispatched_keys.push(key.clone());

                    return Ok(Some(enlisted));
                }
                Ok(CandidateOutcome::Reentry) => {
                    let enlisted = EnlistedEntry {
                        key: key.clone(),
                        entry: entry.clone(),
                    };
                    attempt.push_entry(enlisted.clone());

                    if let Some(tx) = &attempt.tx {
                        if !entry.locked_locally_by(&tx.xid_version(), attempt.thread_id) {
                            outcome.explicit_mapping_needed = true;
                        }
                    }

                    return Ok(Some(enlisted));
                }
                Ok(CandidateOutcome::WouldBlock) => {
                    return Err(ErrorInner::WouldBlock(key.clone()).into());
                }
                Err(e) if e.is_entry_removed() => {
                    if retries_left == 0 {
                        return Err(e);
                    }
                    retries_left -= 1;
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
