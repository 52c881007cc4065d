//! C4: Compound Lock Future. Aggregates mini-futures, drives fan-out,
//! applies responses, and resolves once every enlisted entry is held or a
//! fatal error occurs (§4.4).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use slog_global::{debug, info, warn};
use uuid::Uuid;

use crate::attempt::{Filter, LockAttempt};
use crate::config::Config;
use crate::entry_enlister::EntryEnlister;
use crate::error::{Error, ErrorInner, Result};
use crate::external::{
    Affinity, DhtTier, LockFutureSink, MvccRegistry, NearCache, TimeoutWheel, Topology, Transport, TransportOutcome,
    TxHandle,
};
use crate::key_mapper::KeyMapper;
use crate::messages::{LockRequest, LockResponse, PerKeyRequest};
use crate::metrics::{LOCK_ATTEMPT_COUNTER_VEC, LOCK_ATTEMPT_DURATION_SECONDS, LOCK_REMAP_COUNTER};
use crate::mini_future::MiniFuture;
use crate::response_applier::ResponseApplier;
use crate::timeout::saturating_deadline_ms;
use crate::types::{Key, LockVersion, NodeId, ThreadId};

/// What a lock attempt resolved to. `TimedOut` is deliberately distinct from
/// `Failed`: the §9 open question asks for an explicit variant rather than
/// type-testing a sentinel error, so the CAS into `LockAttempt::error` never
/// even sees a timeout.
#[derive(Debug)]
enum LockOutcome {
    Acquired,
    TimedOut,
    Failed(Arc<Error>),
}

struct FutureState {
    outcome: Option<LockOutcome>,
    waker: Option<Waker>,
}

/// Bundles one [`LockAttempt`] with the backend collaborators it needs to
/// drive itself to completion (§6). Always held behind an `Arc`: mini-futures
/// and the MVCC registry keep weak handles back to it, and `self_ref` lets
/// its own methods mint a fresh strong `Arc` when they need to move one into
/// a spawned task, without the caller ever seeing the bookkeeping.
pub struct LockFuture {
    attempt: LockAttempt,
    local_node: NodeId,
    config: Config,

    topology: Arc<dyn Topology>,
    affinity: Arc<dyn Affinity>,
    near_cache: Arc<dyn NearCache>,
    dht: Arc<dyn DhtTier>,
    transport: Arc<dyn Transport>,
    registry: Arc<dyn MvccRegistry>,
    timer: Arc<dyn TimeoutWheel>,

    self_ref: Mutex<Option<Weak<LockFuture>>>,
    done: AtomicBool,
    state: StdMutex<FutureState>,
    started_at: Instant,

    mini_futures: Mutex<Vec<Arc<MiniFuture>>>,
    /// node -> keys last dispatched to it, used as `prior_mapping` on remap
    /// (§4.1) and as the target of release messages on failure (§7).
    node_mapping: Mutex<HashMap<NodeId, Vec<Key>>>,
    /// Set the first time any group (local or remote) is actually
    /// dispatched; `distribute` at failure time is just this flag (§4.2
    /// step 2, §4.6 scenario 5).
    any_dispatched: AtomicBool,
}

#[allow(clippy::too_many_arguments)]
pub fn acquire(
    lock_version: LockVersion,
    thread_id: ThreadId,
    keys: Vec<Key>,
    read: bool,
    ret_val: bool,
    timeout_ms: i64,
    filter: Filter,
    tx: Option<Arc<dyn TxHandle>>,
    local_node: NodeId,
    config: Config,
    topology: Arc<dyn Topology>,
    affinity: Arc<dyn Affinity>,
    near_cache: Arc<dyn NearCache>,
    dht: Arc<dyn DhtTier>,
    transport: Arc<dyn Transport>,
    registry: Arc<dyn MvccRegistry>,
    timer: Arc<dyn TimeoutWheel>,
) -> LockAcquisition {
    let future_id = Uuid::new_v4();
    let attempt = LockAttempt::new(
        lock_version,
        future_id,
        thread_id,
        keys,
        read,
        ret_val,
        timeout_ms,
        filter,
        tx,
    );

    let fut = Arc::new(LockFuture {
        attempt,
        local_node,
        config,
        topology,
        affinity,
        near_cache,
        dht,
        transport,
        registry,
        timer,
        self_ref: Mutex::new(None),
        done: AtomicBool::new(false),
        state: StdMutex::new(FutureState {
            outcome: None,
            waker: None,
        }),
        started_at: Instant::now(),
        mini_futures: Mutex::new(Vec::new()),
        node_mapping: Mutex::new(HashMap::new()),
        any_dispatched: AtomicBool::new(false),
    });
    *fut.self_ref.lock() = Some(Arc::downgrade(&fut));

    LOCK_ATTEMPT_COUNTER_VEC.started.inc();
    info!(
        "lock attempt started"; "future_id" => %future_id,
        "lock_version" => fut.attempt.lock_version.order, "keys" => fut.attempt.keys.len(),
    );
    fut.registry.register(future_id, Arc::downgrade(&fut) as Weak<dyn LockFutureSink>);
    fut.start();

    LockAcquisition { fut }
}

impl LockFuture {
    fn future_id(&self) -> Uuid {
        self.attempt.future_id
    }

    fn arc_self(&self) -> Arc<LockFuture> {
        self.self_ref
            .lock()
            .as_ref()
            .and_then(Weak::upgrade)
            .expect("LockFuture is always constructed via acquire()")
    }

    fn weak_self(&self) -> Weak<LockFuture> {
        self.self_ref.lock().clone().unwrap_or_default()
    }

    /// `INIT -> MAPPED`: the one and only call to `map()` (§4.4). Spawned
    /// onto a fresh task so `acquire()` itself never blocks its caller —
    /// the attempt suspends by registering mini-futures and returning (§5
    /// "Suspension points").
    fn start(&self) {
        self.register_timeout();

        let this = self.arc_self();
        let keys = self.attempt.keys.clone();
        tokio::spawn(async move {
            let version = this.topology.current_version();
            this.attempt.init_topology_version(version);
            let nodes = this.topology.nodes_at(version);

            this.do_map(&keys, &nodes, HashMap::new()).await;
            this.attempt.mark_initialized();
            this.check_completion();
        });
    }

    fn register_timeout(&self) {
        if self.attempt.timeout_ms <= 0 {
            return;
        }
        let timeout_id = self.attempt.lock_version.id;
        let delay = Duration::from_millis(saturating_deadline_ms(0, self.attempt.timeout_ms) as u64);
        let weak = self.weak_self();
        self.timer.add(
            timeout_id,
            delay,
            Box::new(move || {
                if let Some(fut) = weak.upgrade() {
                    fut.on_timeout();
                }
            }),
        );
    }

    /// Maps `keys` under `nodes`, enlists each group locally, and dispatches
    /// one request per node — but only after every group has enlisted
    /// successfully (§4.2 step 2 / scenario 5): a later group's
    /// `FilterRejected` must still leave `distribute=false`, which only
    /// holds if nothing was sent yet.
    async fn do_map(&self, keys: &[Key], nodes: &[NodeId], prior_mapping: HashMap<NodeId, Vec<Key>>) {
        if self.done.load(Ordering::SeqCst) {
            return;
        }
        debug!(
            "mapping keys to nodes"; "future_id" => %self.future_id(),
            "keys" => keys.len(), "candidate_nodes" => nodes.len(),
        );

        // `TopologyChanged` observed directly from the mapping pass itself
        // (as opposed to a transport-level peer-left, handled in
        // `handle_mini_peer_left`) is not fatal: exclude the node and retry
        // the mapping, the same remap the transport path would have
        // triggered, just discovered a step earlier and before anything was
        // ever enlisted (§9 "Open questions").
        let mut current_keys = keys.to_vec();
        let mut current_nodes = nodes.to_vec();
        let mut current_prior = prior_mapping;

        let groups = loop {
            let mapper = KeyMapper::new(&*self.affinity);
            match mapper.map(&current_keys, &current_nodes, &current_prior) {
                Ok(groups) => break groups,
                Err(err) => {
                    if let ErrorInner::TopologyChanged(node) = &*err.0 {
                        let node = *node;
                        self.attempt.add_left_node(node);
                        LOCK_REMAP_COUNTER.inc();
                        info!(
                            "remapping after topology change mid-map"; "future_id" => %self.future_id(),
                            "left_node" => node.0,
                        );

                        let version = self.attempt.topology_version();
                        let fresh_nodes = self.topology.nodes_at(version);
                        current_nodes = fresh_nodes
                            .into_iter()
                            .filter(|n| !self.attempt.left_nodes().contains(n))
                            .collect();

                        let mut prior = HashMap::new();
                        prior.insert(node, current_keys.clone());
                        current_prior = prior;
                        continue;
                    }
                    self.fail(err);
                    return;
                }
            }
        };

        let enlister = EntryEnlister::new(&*self.near_cache, &*self.dht, &self.config, self.local_node);
        let mut per_node_requests: Vec<(NodeId, Vec<Key>, Vec<PerKeyRequest>, bool)> = Vec::new();

        for (node, group_keys) in groups {
            if self.attempt.timed_out() {
                return;
            }

            let outcome = match enlister.enlist(node, &group_keys, &self.attempt) {
                Ok(outcome) => outcome,
                Err(err) => {
                    self.fail(err);
                    return;
                }
            };

            if self.attempt.timed_out() {
                return;
            }

            if outcome.explicit_mapping_needed {
                if let Some(tx) = &self.attempt.tx {
                    tx.mark_explicit(node);
                }
            }

            if !outcome.dispatched_keys.is_empty() {
                per_node_requests.push((node, outcome.dispatched_keys, outcome.per_key_requests, false));
            } else {
                // Every key in this group was a reentry: nothing to
                // dispatch, but the group still "succeeded" (scenario 6).
                per_node_requests.push((node, group_keys, Vec::new(), true));
            }
        }

        if let Some(tx) = &self.attempt.tx {
            for (node, keys, _, reentry_only) in &per_node_requests {
                if !reentry_only {
                    tx.add_key_mapping(*node, keys.clone());
                }
            }
        }

        for (node, keys, per_key, reentry_only) in per_node_requests {
            if reentry_only {
                continue;
            }
            self.node_mapping.lock().insert(node, keys.clone());
            self.dispatch(node, keys, per_key);
        }
    }

    /// Dispatches one node's share of the attempt: the local-primary
    /// shortcut bypasses the transport entirely (§4.4 "Local-primary
    /// shortcut"); everything else goes through it.
    fn dispatch(&self, node: NodeId, keys: Vec<Key>, per_key: Vec<PerKeyRequest>) {
        self.any_dispatched.store(true, Ordering::SeqCst);

        let mini_id = Uuid::new_v4();
        let mini = Arc::new(MiniFuture::new(mini_id, node, keys.clone(), self.weak_self()));
        self.mini_futures.lock().push(mini.clone());

        let request = LockRequest {
            topology_version: self.attempt.topology_version(),
            sender_node: self.local_node,
            thread_id: self.attempt.thread_id,
            future_id: self.future_id(),
            lock_version: self.attempt.lock_version.clone(),
            in_tx: self.attempt.tx.is_some(),
            implicit_tx: self.attempt.tx.as_ref().map_or(false, |tx| tx.implicit()),
            implicit_single_tx: self.attempt.tx.as_ref().map_or(false, |tx| tx.implicit_single()),
            read: self.attempt.read,
            isolation: self.attempt.tx.as_ref().map(|tx| tx.isolation()),
            invalidate: self.attempt.tx.as_ref().map_or(false, |tx| tx.is_invalidate()),
            timeout_ms: self.attempt.timeout_ms,
            sync_commit: self.attempt.tx.as_ref().map_or(false, |tx| tx.sync_commit()),
            sync_rollback: self.attempt.tx.as_ref().map_or(false, |tx| tx.sync_rollback()),
            mini_id,
            keys: per_key,
        };

        if node == self.local_node {
            let dht = self.dht.clone();
            let local_node = self.local_node;
            tokio::spawn(async move {
                match dht.lock_all_async(local_node, request).await {
                    Ok(resp) => mini.on_response(resp),
                    Err(err) => mini.on_error(err),
                }
            });
        } else {
            let transport = self.transport.clone();
            tokio::spawn(async move {
                match transport.send(node, request).await {
                    TransportOutcome::Response(resp) => mini.on_response(resp),
                    TransportOutcome::PeerLeft => mini.on_peer_left(),
                    TransportOutcome::Error(err) => mini.on_error(err),
                }
            });
        }
    }

    /// §4.3 `on_response`.
    pub fn handle_mini_response(&self, mini: &MiniFuture, response: LockResponse) {
        if self.done.load(Ordering::SeqCst) {
            return;
        }
        let applier = ResponseApplier::new(&*self.near_cache, &self.config);
        if let Err(err) = applier.apply(&self.attempt, mini, &response) {
            self.fail(err);
            return;
        }
        self.check_completion();
    }

    /// §4.3 `on_error`.
    pub fn handle_mini_error(&self, err: Error) {
        self.fail(err);
    }

    /// §4.3 `on_peer_left`: records the departure, strips the tx mapping,
    /// then re-invokes the mapper for just this mini-future's keys with
    /// `prior_mapping = {node: keys}` so the re-map guard (P6) sees exactly
    /// the node that just left.
    pub fn handle_mini_peer_left(&self, mini: &MiniFuture) {
        if self.done.load(Ordering::SeqCst) {
            return;
        }

        self.attempt.add_left_node(mini.node);
        LOCK_REMAP_COUNTER.inc();
        warn!(
            "peer left mid-flight"; "future_id" => %self.future_id(),
            "node" => mini.node.0, "keys" => mini.keys.len(),
        );

        if let Some(tx) = &self.attempt.tx {
            tx.remove_mapping(mini.node);
        }

        let version = self.attempt.topology_version();
        let nodes = self.topology.nodes_at(version);
        let live_nodes: Vec<NodeId> = nodes
            .into_iter()
            .filter(|n| !self.attempt.left_nodes().contains(n))
            .collect();

        let mut prior = HashMap::new();
        prior.insert(mini.node, mini.keys.clone());

        let this = self.arc_self();
        let keys = mini.keys.clone();
        tokio::spawn(async move {
            this.do_map(&keys, &live_nodes, prior).await;
            this.check_completion();
        });
    }

    /// §4.4 `on_owner_changed`: optimistic short-circuit to success without
    /// re-running `check_locks`.
    fn handle_owner_changed(&self, new_owner: &LockVersion) -> bool {
        if new_owner != &self.attempt.lock_version {
            return false;
        }
        self.complete(true)
    }

    /// §4.4 `on_node_left`: delivers `on_peer_left` to the mini-future
    /// mapped to `node`, if any is still outstanding.
    fn handle_node_left(&self, node: NodeId) -> bool {
        let minis = self.mini_futures.lock().clone();
        let target = minis.into_iter().find(|m| m.node == node && !m.is_received());
        match target {
            Some(mini) => {
                mini.on_peer_left();
                true
            }
            None => false,
        }
    }

    /// Runs only once the mapping pass has finished (`initialized`); before
    /// that there is nothing meaningful to check yet.
    fn check_completion(&self) {
        if self.done.load(Ordering::SeqCst) || !self.attempt.initialized() {
            return;
        }
        if self.attempt.timed_out() {
            return;
        }

        let all_minis_done = self.mini_futures.lock().iter().all(|m| m.is_received());
        if !all_minis_done {
            return;
        }

        if let Some(err) = self.attempt.take_error() {
            self.complete_failure(Arc::new(err));
            return;
        }

        if self.check_locks() {
            self.complete(true);
        } else {
            self.complete_failure(Arc::new(ErrorInner::LockVerificationFailed(Key(Vec::new())).into()));
        }
    }

    /// §4.4 `AWAITING -> DONE.success` verification: every enlisted entry
    /// must still be held by `lock_version | thread_id` and pass the
    /// filter.
    fn check_locks(&self) -> bool {
        self.attempt.entries_copy().into_iter().all(|enlisted| {
            (self.attempt.filter)(&*enlisted.entry)
                && enlisted
                    .entry
                    .locked_locally_by(&self.attempt.lock_version, self.attempt.thread_id)
        })
    }

    fn fail(&self, err: Error) {
        self.attempt.set_error_once(err);
        self.check_completion();
    }

    fn on_timeout(&self) {
        if self.done.load(Ordering::SeqCst) {
            return;
        }
        warn!(
            "lock attempt timeout fired"; "future_id" => %self.future_id(),
            "lock_version" => self.attempt.lock_version.order,
        );
        self.attempt.set_timed_out();
        self.complete_timed_out();
    }

    /// Caller-initiated abort (§5 "Cancellation & timeouts").
    pub fn cancel(&self) {
        debug!("lock attempt cancelled by caller"; "future_id" => %self.future_id());
        self.attempt.set_timed_out();
        self.complete_failure(Arc::new(ErrorInner::Cancelled.into()));
    }

    fn complete_timed_out(&self) {
        if self
            .done
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        self.undo_locks(true);
        self.finish_tx(false);
        self.deregister();
        LOCK_ATTEMPT_COUNTER_VEC.timed_out.inc();
        info!("lock attempt complete"; "future_id" => %self.future_id(), "outcome" => "timed_out");
        self.resolve(LockOutcome::TimedOut);
    }

    fn complete_failure(&self, err: Arc<Error>) {
        if self
            .done
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let distribute = self.any_dispatched.load(Ordering::SeqCst);
        self.undo_locks(distribute);
        self.finish_tx(false);
        self.deregister();
        if matches!(&*err.0, ErrorInner::Cancelled) {
            LOCK_ATTEMPT_COUNTER_VEC.cancelled.inc();
        } else {
            LOCK_ATTEMPT_COUNTER_VEC.failed.inc();
        }
        warn!(
            "lock attempt complete"; "future_id" => %self.future_id(),
            "outcome" => "failed", "error" => %err,
        );
        self.resolve(LockOutcome::Failed(err));
    }

    /// §4.4 `on_complete(success, distribute)` for the success path. Returns
    /// `true` if this call actually won the completion CAS.
    fn complete(&self, success: bool) -> bool {
        if !success {
            self.complete_failure(Arc::new(ErrorInner::LockVerificationFailed(Key(Vec::new())).into()));
            return true;
        }
        if self
            .done
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.finish_tx(true);
        self.deregister();
        LOCK_ATTEMPT_COUNTER_VEC.succeeded.inc();
        info!("lock attempt complete"; "future_id" => %self.future_id(), "outcome" => "acquired");
        self.resolve(LockOutcome::Acquired);
        true
    }

    /// §4.4 completion step 2: re-bind the tx context; on failure also mark
    /// rollback-only before the caller observes the outcome (I5, P7).
    fn finish_tx(&self, success: bool) {
        if let Some(tx) = &self.attempt.tx {
            if !success {
                tx.set_rollback_only();
            }
        }
    }

    fn deregister(&self) {
        self.registry.remove_future(self.future_id());
        if self.attempt.timeout_ms > 0 {
            self.timer.remove(self.attempt.lock_version.id);
        }
    }

    /// §7 "Propagation policy": removes this attempt's local candidate from
    /// every enlisted entry, then asks the near cache to release remotely
    /// held locks unless an enclosing transaction will do that on rollback.
    fn undo_locks(&self, distribute: bool) {
        for enlisted in self.attempt.entries_copy() {
            enlisted.entry.remove_lock(&self.attempt.lock_version);
        }

        if distribute && self.attempt.tx.is_none() {
            for (node, keys) in self.node_mapping.lock().iter() {
                if *node != self.local_node {
                    self.near_cache.release_remote(&self.attempt.lock_version, keys);
                }
            }
        }
    }

    fn resolve(&self, outcome: LockOutcome) {
        LOCK_ATTEMPT_DURATION_SECONDS.observe(self.started_at.elapsed().as_secs_f64());
        let mut state = self.state.lock().unwrap();
        state.outcome = Some(outcome);
        if let Some(waker) = state.waker.take() {
            waker.wake();
        }
    }

    fn poll_outcome(&self, cx: &mut Context<'_>) -> Poll<Result<bool>> {
        let mut state = self.state.lock().unwrap();
        match state.outcome.take() {
            Some(LockOutcome::Acquired) => Poll::Ready(Ok(true)),
            Some(LockOutcome::TimedOut) => Poll::Ready(Ok(false)),
            Some(LockOutcome::Failed(err)) => {
                // `state.outcome` is the only strong reference once stored
                // here (resolve() never clones it), so this never races.
                let err = Arc::try_unwrap(err).unwrap_or_else(|_| unreachable!("Failed outcome is singly-owned"));
                Poll::Ready(Err(err))
            }
            None => {
                state.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl LockFutureSink for LockFuture {
    fn on_owner_changed(&self, key: &Key, new_owner: &LockVersion) -> bool {
        let _ = key;
        if !self.attempt.trackable() {
            return false;
        }
        self.handle_owner_changed(new_owner)
    }

    fn on_node_left(&self, node: NodeId) -> bool {
        self.handle_node_left(node)
    }
}

/// The `Future` a caller actually awaits. Delegates to [`LockFuture`]'s
/// callback-driven state machine; resolves to `Ok(true)` on success,
/// `Ok(false)` on timeout, `Err(_)` on any other failure.
pub struct LockAcquisition {
    fut: Arc<LockFuture>,
}

impl LockAcquisition {
    pub fn cancel(&self) {
        self.fut.cancel();
    }
}

impl Future for LockAcquisition {
    type Output = Result<bool>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.fut.poll_outcome(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{FakeDht, FakeNearCache, FakeTopology, FakeTransport, MapAffinity};
    use std::time::Duration as StdDuration;

    fn all_pass() -> Filter {
        Arc::new(|_: &dyn crate::external::NearCacheEntry| true)
    }

    #[tokio::test]
    async fn succeeding_attempt_increments_started_and_succeeded_exactly_once() {
        let local_node = NodeId(1);
        let topology: Arc<dyn Topology> = FakeTopology::new(1, vec![local_node]);
        let affinity: Arc<dyn Affinity> = MapAffinity::new();
        let near_cache = FakeNearCache::new();
        let key = Key::from("k1");
        let dht_concrete = FakeDht::new();
        dht_concrete.seed(key.clone(), Some(b"v".to_vec()), 1);
        let dht: Arc<dyn DhtTier> = dht_concrete;
        let transport: Arc<dyn Transport> = FakeTransport::new();
        let registry: Arc<dyn MvccRegistry> = Arc::new(crate::registry::InMemoryRegistry::new());
        let timer: Arc<dyn TimeoutWheel> = crate::timeout::TokioTimeoutWheel::new();

        let started_before = LOCK_ATTEMPT_COUNTER_VEC.started.get();
        let succeeded_before = LOCK_ATTEMPT_COUNTER_VEC.succeeded.get();

        let result = acquire(
            LockVersion::new(1),
            1,
            vec![key],
            false,
            true,
            1000,
            all_pass(),
            None,
            local_node,
            Config::default(),
            topology,
            affinity,
            near_cache as Arc<dyn NearCache>,
            dht,
            transport,
            registry,
            timer,
        )
        .await
        .unwrap();

        assert!(result);
        // `>=` rather than `==`: these counters are process-global and
        // shared with whatever else in this test binary calls `acquire`.
        assert!(LOCK_ATTEMPT_COUNTER_VEC.started.get() >= started_before + 1);
        assert!(LOCK_ATTEMPT_COUNTER_VEC.succeeded.get() >= succeeded_before + 1);
    }

    #[tokio::test]
    async fn timed_out_attempt_increments_timed_out_not_failed() {
        let local_node = NodeId(1);
        let peer = NodeId(2);
        let topology: Arc<dyn Topology> = FakeTopology::new(1, vec![local_node, peer]);
        let affinity_concrete = MapAffinity::new();
        affinity_concrete.set(Key::from("k1"), peer);
        let affinity: Arc<dyn Affinity> = affinity_concrete;
        let near_cache = FakeNearCache::new();
        let dht: Arc<dyn DhtTier> = FakeDht::new();
        let transport_concrete = FakeTransport::new();
        transport_concrete.set_behavior(peer, crate::testkit::NodeBehavior::Never);
        let transport: Arc<dyn Transport> = transport_concrete;
        let registry: Arc<dyn MvccRegistry> = Arc::new(crate::registry::InMemoryRegistry::new());
        let timer: Arc<dyn TimeoutWheel> = crate::timeout::TokioTimeoutWheel::new();

        let timed_out_before = LOCK_ATTEMPT_COUNTER_VEC.timed_out.get();
        let failed_before = LOCK_ATTEMPT_COUNTER_VEC.failed.get();

        let acquisition = acquire(
            LockVersion::new(1),
            1,
            vec![Key::from("k1")],
            false,
            true,
            50,
            all_pass(),
            None,
            local_node,
            Config::default(),
            topology,
            affinity,
            near_cache as Arc<dyn NearCache>,
            dht,
            transport,
            registry,
            timer,
        );
        let result = tokio::time::timeout(StdDuration::from_millis(500), acquisition).await;

        assert_eq!(result.unwrap().unwrap(), false);
        assert!(LOCK_ATTEMPT_COUNTER_VEC.timed_out.get() >= timed_out_before + 1);
        // Nothing in this test binary drives a `Failed` outcome concurrently.
        assert_eq!(LOCK_ATTEMPT_COUNTER_VEC.failed.get(), failed_before);
    }
}
