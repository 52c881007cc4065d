//! Fail-point-gated coverage (§8.1): a `TopologyChanged` injected on the
//! first mapping pass must not fail the attempt outright — it's the same
//! remap a transport-level peer-left would trigger, just caught a step
//! earlier. Requires both the `testing` and `failpoints` features.

use std::sync::Arc;

use lock_coordinator::external::{Affinity, DhtTier, MvccRegistry, NearCache, NearCacheEntry, TimeoutWheel, Topology, Transport};
use lock_coordinator::testkit::{FakeDht, FakeNearCache, FakeTopology, FakeTransport, MapAffinity, NodeBehavior};
use lock_coordinator::{acquire, Config, InMemoryRegistry, Key, LockVersion, NodeId, TokioTimeoutWheel};

fn all_pass() -> lock_coordinator::Filter {
    Arc::new(|_: &dyn NearCacheEntry| true)
}

#[tokio::test]
async fn topology_changed_on_first_mapping_pass_still_converges_via_remap() {
    let local_node = NodeId(1);
    let peer = NodeId(2);
    let topology: Arc<dyn Topology> = FakeTopology::new(1, vec![local_node, peer]);

    let affinity_concrete = MapAffinity::new();
    affinity_concrete.set(Key::from("k1"), local_node);
    let affinity: Arc<dyn Affinity> = affinity_concrete;

    let near_cache = FakeNearCache::new();
    let dht: Arc<dyn DhtTier> = FakeDht::new();

    let transport_concrete = FakeTransport::new();
    transport_concrete.set_behavior(peer, NodeBehavior::Respond(vec![(Some(b"v".to_vec()), 3)]));
    let transport: Arc<dyn Transport> = transport_concrete;

    let registry: Arc<dyn MvccRegistry> = Arc::new(InMemoryRegistry::new());
    let timer: Arc<dyn TimeoutWheel> = TokioTimeoutWheel::new();

    // Fires exactly once: the first call to `KeyMapper::map` reports
    // `local_node` as having left, forcing a remap onto whatever's left.
    fail::cfg("lock_coordinator::key_mapper::map", "1*return").unwrap();

    let result = acquire(
        LockVersion::new(1),
        1,
        vec![Key::from("k1")],
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
    .await;

    fail::remove("lock_coordinator::key_mapper::map");

    assert_eq!(result.unwrap(), true);
}
