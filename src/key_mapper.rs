//! C1: Key Mapper. Groups keys by primary node under a frozen topology
//! snapshot and guards against re-map ping-pong (§4.1).

use std::collections::{HashMap, HashSet};

use crate::error::{ErrorInner, Result};
use crate::external::Affinity;
use crate::types::{Key, NodeId};

pub struct KeyMapper<'a> {
    affinity: &'a dyn Affinity,
}

impl<'a> KeyMapper<'a> {
    pub fn new(affinity: &'a dyn Affinity) -> Self {
        KeyMapper { affinity }
    }

    /// Groups `keys` by the node `affinity` maps them to among `nodes`,
    /// preserving `keys`' insertion order both across and within groups
    /// (§4.1 "Ordering") so response indices line up with request indices.
    ///
    /// `prior_mapping` holds, for a remap pass, the node(s) that held each
    /// key before the peer departure that triggered this call. If a key
    /// would be re-mapped back onto a node it was already mapped to, the
    /// whole mapping fails (§4.1 "Re-map guard", P6).
    pub fn map(
        &self,
        keys: &[Key],
        nodes: &[NodeId],
        prior_mapping: &HashMap<NodeId, Vec<Key>>,
    ) -> Result<Vec<(NodeId, Vec<Key>)>> {
        fail::fail_point!("lock_coordinator::key_mapper::map", |_| Err(ErrorInner::TopologyChanged(
            nodes.first().copied().unwrap_or(NodeId(0)),
        )
        .into()));

        let mut order: Vec<NodeId> = Vec::new();
        let mut groups: HashMap<NodeId, Vec<Key>> = HashMap::new();

        for key in keys {
            let node = self
                .affinity
                .primary(key, nodes)
                .ok_or_else(|| ErrorInner::NoPrimaryAvailable(key.clone()))?;

            if let Some(prior_node) = prior_holder(prior_mapping, key) {
                if prior_node == node {
                    return Err(ErrorInner::RemapToSameNode(key.clone(), node).into());
                }
            }

            groups
                .entry(node)
                .or_insert_with(|| {
                    order.push(node);
                    Vec::new()
                })
                .push(key.clone());
        }

        Ok(order
            .into_iter()
            .map(|node| {
                let keys = groups.remove(&node).unwrap_or_default();
                (node, keys)
            })
            .collect())
    }
}

fn prior_holder(prior_mapping: &HashMap<NodeId, Vec<Key>>, key: &Key) -> Option<NodeId> {
    prior_mapping
        .iter()
        .find(|(_, keys)| keys.contains(key))
        .map(|(node, _)| *node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct RoundRobinAffinity;
    impl Affinity for RoundRobinAffinity {
        fn primary(&self, key: &Key, nodes: &[NodeId]) -> Option<NodeId> {
            if nodes.is_empty() {
                return None;
            }
            let idx = key.0.iter().map(|b| *b as usize).sum::<usize>() % nodes.len();
            Some(nodes[idx])
        }
    }

    #[test]
    fn groups_preserve_insertion_order() {
        let affinity = RoundRobinAffinity;
        let mapper = KeyMapper::new(&affinity);
        let nodes = vec![NodeId(0), NodeId(1)];
        // byte sums: k0=0 -> node0, k1=1 -> node1, k2=2 -> node0
        let keys = vec![Key(vec![0]), Key(vec![1]), Key(vec![2])];
        let groups = mapper.map(&keys, &nodes, &HashMap::new()).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, NodeId(0));
        assert_eq!(groups[0].1, vec![Key(vec![0]), Key(vec![2])]);
        assert_eq!(groups[1].0, NodeId(1));
        assert_eq!(groups[1].1, vec![Key(vec![1])]);
    }

    #[test]
    fn remap_to_same_node_fails() {
        let affinity = RoundRobinAffinity;
        let mapper = KeyMapper::new(&affinity);
        let nodes = vec![NodeId(0)];
        let keys = vec![Key(vec![0])];
        let mut prior = HashMap::new();
        prior.insert(NodeId(0), vec![Key(vec![0])]);
        let err = mapper.map(&keys, &nodes, &prior).unwrap_err();
        assert!(matches!(&*err.0, ErrorInner::RemapToSameNode(_, _)));
    }

    #[test]
    fn remap_to_new_node_succeeds() {
        let affinity = RoundRobinAffinity;
        let mapper = KeyMapper::new(&affinity);
        let nodes = vec![NodeId(1)];
        let keys = vec![Key(vec![0])];
        let mut prior = HashMap::new();
        prior.insert(NodeId(0), vec![Key(vec![0])]);
        let groups = mapper.map(&keys, &nodes, &prior).unwrap();
        assert_eq!(groups, vec![(NodeId(1), vec![Key(vec![0])])]);
    }

    #[test]
    fn no_nodes_fails_with_missing_version() {
        let affinity = RoundRobinAffinity;
        let mapper = KeyMapper::new(&affinity);
        let keys = vec![Key(vec![0])];
        let err = mapper.map(&keys, &[], &HashMap::new()).unwrap_err();
        assert!(matches!(&*err.0, ErrorInner::NoPrimaryAvailable(_)));
    }
}
