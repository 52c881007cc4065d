//! C6: Response Applier. Installs a peer's response onto the local
//! near-cache entries it answers for (§4.6).

use crate::attempt::LockAttempt;
use crate::config::Config;
use crate::error::{ErrorInner, Result};
use crate::external::NearCache;
use crate::messages::LockResponse;
use crate::mini_future::MiniFuture;

pub struct ResponseApplier<'a> {
    near_cache: &'a dyn NearCache,
    config: &'a Config,
}

impl<'a> ResponseApplier<'a> {
    pub fn new(near_cache: &'a dyn NearCache, config: &'a Config) -> Self {
        ResponseApplier { near_cache, config }
    }

    pub fn apply(&self, attempt: &LockAttempt, mini: &MiniFuture, response: &LockResponse) -> Result<()> {
        fail::fail_point!("lock_coordinator::response_applier::apply");

        if response.keys.len() != mini.keys.len() {
            // A peer invariant violation: it must answer exactly the keys
            // it was asked about, in the same order.
            let offending = mini.keys.first().cloned().unwrap_or_else(|| crate::types::Key(Vec::new()));
            return Err(ErrorInner::MissingDhtVersion(offending).into());
        }

        for (key, per_key) in mini.keys.iter().zip(response.keys.iter()) {
            let dht_version = per_key
                .dht_version
                .ok_or_else(|| ErrorInner::MissingDhtVersion(key.clone()))?;

            let old = attempt.versioned_value(key);
            let (new_value, new_bytes) = match &per_key.value {
                Some(v) => (Some(v.clone()), per_key.value_bytes.clone()),
                None => match &old {
                    Some(old) if old.dht_version == dht_version => (old.value.clone(), old.value_bytes.clone()),
                    _ => (None, None),
                },
            };

            let entry = self.near_cache.entry_exx(key);
            entry.reset_from_primary(new_value, new_bytes, &attempt.lock_version, dht_version, mini.node);

            let min_version_for_visibility = attempt
                .tx
                .as_ref()
                .map(|tx| tx.min_version())
                .unwrap_or_else(|| attempt.lock_version.clone());
            entry.done_remote(
                &attempt.lock_version,
                &min_version_for_visibility,
                &response.pending_versions,
                &response.committed_versions,
                &response.rolled_back_versions,
            );

            if attempt.ret_val {
                // §4.6 step 6, §9 open question: preserve this condition
                // exactly as specified even though it reads as an odd
                // special case — it's the line between double-counting a
                // read the DHT tier already recorded and missing one it
                // didn't.
                let already_observed = old.as_ref().map_or(false, |o| o.dht_version == dht_version);
                if !already_observed {
                    entry.record_read_event();
                }
            }

            if self.config.ec_mode {
                entry.recheck();
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::NearCacheEntry;
    use crate::messages::PerKeyResponse;
    use crate::types::{CandidateOutcome, CandidateRequest, Key, LockVersion, NodeId, ThreadId, VersionedValue};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Weak};
    use uuid::Uuid;

    struct FakeEntry {
        key: Key,
        reset_calls: Mutex<Vec<(Option<Vec<u8>>, u64)>>,
        read_events: AtomicUsize,
        recheck_calls: AtomicUsize,
    }

    impl NearCacheEntry for FakeEntry {
        fn key(&self) -> &Key {
            &self.key
        }
        fn add_near_local_candidate(&self, _r: &CandidateRequest) -> Result<CandidateOutcome> {
            Ok(CandidateOutcome::Fresh)
        }
        fn versioned_value(&self) -> Option<VersionedValue> {
            None
        }
        fn remove_lock(&self, _v: &LockVersion) {}
        fn locked_locally_by(&self, _v: &LockVersion, _t: ThreadId) -> bool {
            true
        }
        fn reset_from_primary(
            &self,
            value: Option<Vec<u8>>,
            _value_bytes: Option<Vec<u8>>,
            _version: &LockVersion,
            dht_version: u64,
            _peer: NodeId,
        ) {
            self.reset_calls.lock().push((value, dht_version));
        }
        fn done_remote(
            &self,
            _v: &LockVersion,
            _min: &LockVersion,
            _p: &[LockVersion],
            _c: &[LockVersion],
            _r: &[LockVersion],
        ) {
        }
        fn record_read_event(&self) {
            self.read_events.fetch_add(1, Ordering::SeqCst);
        }
        fn recheck(&self) {
            self.recheck_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FakeNearCache {
        entry: Arc<FakeEntry>,
    }
    impl NearCache for FakeNearCache {
        fn entry_exx(&self, _key: &Key) -> Arc<dyn NearCacheEntry> {
            self.entry.clone()
        }
        fn release_remote(&self, _v: &LockVersion, _keys: &[Key]) {}
    }

    fn attempt_with(ret_val: bool) -> LockAttempt {
        LockAttempt::new(
            LockVersion::new(1),
            Uuid::new_v4(),
            1,
            vec![Key(b"k1".to_vec())],
            false,
            ret_val,
            1000,
            Arc::new(|_: &dyn NearCacheEntry| true),
            None,
        )
    }

    #[test]
    fn applies_value_and_records_read_event_when_requested() {
        let entry = Arc::new(FakeEntry {
            key: Key(b"k1".to_vec()),
            reset_calls: Mutex::new(vec![]),
            read_events: AtomicUsize::new(0),
            recheck_calls: AtomicUsize::new(0),
        });
        let near_cache = FakeNearCache { entry: entry.clone() };
        let cfg = Config::default();
        let applier = ResponseApplier::new(&near_cache, &cfg);

        let attempt = attempt_with(true);
        let mini = MiniFuture::new(Uuid::new_v4(), NodeId(1), vec![Key(b"k1".to_vec())], Weak::new());
        let response = LockResponse {
            lock_version: attempt.lock_version.clone(),
            future_id: attempt.future_id,
            mini_id: mini.mini_id,
            keys: vec![PerKeyResponse {
                value: Some(b"v".to_vec()),
                value_bytes: None,
                dht_version: Some(7),
            }],
            pending_versions: vec![],
            committed_versions: vec![],
            rolled_back_versions: vec![],
        };

        applier.apply(&attempt, &mini, &response).unwrap();
        assert_eq!(entry.reset_calls.lock().len(), 1);
        assert_eq!(entry.reset_calls.lock()[0], (Some(b"v".to_vec()), 7));
        assert_eq!(entry.read_events.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn preserves_local_value_when_response_omits_it_and_version_matches() {
        let entry = Arc::new(FakeEntry {
            key: Key(b"k1".to_vec()),
            reset_calls: Mutex::new(vec![]),
            read_events: AtomicUsize::new(0),
            recheck_calls: AtomicUsize::new(0),
        });
        let near_cache = FakeNearCache { entry: entry.clone() };
        let cfg = Config::default();
        let applier = ResponseApplier::new(&near_cache, &cfg);

        let attempt = attempt_with(true);
        attempt.record_versioned_value(
            Key(b"k1".to_vec()),
            VersionedValue {
                dht_version: 7,
                value: Some(b"cached".to_vec()),
                value_bytes: None,
            },
        );
        let mini = MiniFuture::new(Uuid::new_v4(), NodeId(1), vec![Key(b"k1".to_vec())], Weak::new());
        let response = LockResponse {
            lock_version: attempt.lock_version.clone(),
            future_id: attempt.future_id,
            mini_id: mini.mini_id,
            keys: vec![PerKeyResponse {
                value: None,
                value_bytes: None,
                dht_version: Some(7),
            }],
            pending_versions: vec![],
            committed_versions: vec![],
            rolled_back_versions: vec![],
        };

        applier.apply(&attempt, &mini, &response).unwrap();
        assert_eq!(entry.reset_calls.lock()[0], (Some(b"cached".to_vec()), 7));
        // old.dht_version == dht_version, so the read event is suppressed.
        assert_eq!(entry.read_events.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn missing_dht_version_is_fatal() {
        let entry = Arc::new(FakeEntry {
            key: Key(b"k1".to_vec()),
            reset_calls: Mutex::new(vec![]),
            read_events: AtomicUsize::new(0),
            recheck_calls: AtomicUsize::new(0),
        });
        let near_cache = FakeNearCache { entry };
        let cfg = Config::default();
        let applier = ResponseApplier::new(&near_cache, &cfg);

        let attempt = attempt_with(true);
        let mini = MiniFuture::new(Uuid::new_v4(), NodeId(1), vec![Key(b"k1".to_vec())], Weak::new());
        let response = LockResponse {
            lock_version: attempt.lock_version.clone(),
            future_id: attempt.future_id,
            mini_id: mini.mini_id,
            keys: vec![PerKeyResponse {
                value: None,
                value_bytes: None,
                dht_version: None,
            }],
            pending_versions: vec![],
            committed_versions: vec![],
            rolled_back_versions: vec![],
        };

        let err = applier.apply(&attempt, &mini, &response).unwrap_err();
        assert!(matches!(&*err.0, ErrorInner::MissingDhtVersion(_)));
    }
}
