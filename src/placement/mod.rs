//! Replica placement (`spec.md` §4.4): write-target selection, removal-target
//! selection, balancing-target selection, rack/DC awareness and Consistent
//! Replica Placement. Grounded on the teacher's `DataStore` pruning/GC
//! machinery (`pbs-datastore/src/datastore.rs`) for the overall "candidate
//! list, filter by a chain of predicates, fall back when exhausted" shape,
//! generalized from pruning chunks to picking nodes.

pub mod crp;
pub mod rack_dc;
pub mod targets;

use std::collections::HashMap;

use cm_api_types::{ChunkId, MediumIndex, NodeId};
use cm_config::{CrpConfig, DataCenterConfig, ManagerConfig, PlacementConfig};
use cm_registry::{Medium, ObjectRegistry};

use crate::node::NodeRegistry;

/// The live placement state: configuration plus the two pieces of state that
/// change over time rather than being recomputed per call — the per-node
/// total-space bucket assignment and the CRP rings built from it (`spec.md`
/// §4.4 "periodic total-space-distribution recomputation").
pub struct Placement {
    config: PlacementConfig,
    crp_config: CrpConfig,
    dc_config: DataCenterConfig,
    total_space: HashMap<NodeId, u64>,
    buckets: HashMap<NodeId, u32>,
    rings: HashMap<MediumIndex, crp::Ring>,
}

impl Placement {
    pub fn new(config: &ManagerConfig) -> Self {
        Placement {
            config: config.placement.clone(),
            crp_config: config.crp.clone(),
            dc_config: config.data_center.clone(),
            total_space: HashMap::new(),
            buckets: HashMap::new(),
            rings: HashMap::new(),
        }
    }

    pub fn report_total_space(&mut self, node: NodeId, total_space: u64) {
        self.total_space.insert(node, total_space);
    }

    pub fn forget_node(&mut self, node: NodeId) {
        self.total_space.remove(&node);
        self.buckets.remove(&node);
    }

    /// Recomputes the bucket assignment and rebuilds every medium's CRP ring
    /// from it (`spec.md` §4.4). Called periodically, not per-mutation.
    pub fn recompute_crp_rings(&mut self, nodes: &NodeRegistry) {
        let totals: Vec<(NodeId, u64)> = self.total_space.iter().map(|(&n, &s)| (n, s)).collect();
        self.buckets = crp::assign_buckets(&totals, self.crp_config.bucket_count);

        let mut tokens_by_medium: HashMap<MediumIndex, Vec<(NodeId, MediumIndex, u32)>> = HashMap::new();
        for node in nodes.iter() {
            if node.decommissioned {
                continue;
            }
            let bucket = self.buckets.get(&node.id).copied().unwrap_or(0);
            let token_count = crp::token_count_for_bucket(bucket, &self.crp_config);
            for &medium in node.crp_tokens.keys() {
                tokens_by_medium.entry(medium).or_default().push((node.id, medium, token_count));
            }
        }
        self.rings = tokens_by_medium
            .into_iter()
            .map(|(medium, tokens)| (medium, crp::Ring::build(&tokens)))
            .collect();
    }

    /// Deterministic CRP targets for `crp_hash` on `medium_index`, or empty
    /// if no ring has been built for that medium yet (`spec.md` §4.4).
    pub fn crp_targets(&self, crp_hash: u64, medium_index: MediumIndex, _nodes: &NodeRegistry) -> Vec<NodeId> {
        self.rings
            .get(&medium_index)
            .map(|ring| ring.targets(crp_hash, self.crp_config.replicas_per_chunk))
            .unwrap_or_default()
    }

    /// The per-rack replica cap for `medium`: the medium's own override, or
    /// the configured default, and for erasure chunks no rack may hold two
    /// parts of the same stripe (`spec.md` §4.4).
    pub fn max_replicas_per_rack(&self, medium: &Medium, is_erasure: bool) -> u32 {
        if is_erasure {
            return 1;
        }
        medium.config.max_replicas_per_rack.unwrap_or(self.config.default_max_replicas_per_rack)
    }

    pub(super) fn force_rack_awareness(&self) -> bool {
        self.config.force_rack_awareness
    }

    pub fn alive_data_centers(&self) -> Vec<String> {
        rack_dc::alive_data_centers(&self.dc_config)
    }

    pub fn max_replicas_per_data_center(&self, aggregated_rf: u32) -> u32 {
        let alive = self.alive_data_centers();
        rack_dc::max_replicas_per_data_center(aggregated_rf, alive.len(), aggregated_rf.max(1))
    }

    /// True if `node` may host a new write session for `medium` (`spec.md`
    /// §4.4 write-target predicate): not decommissioned, writes not
    /// disabled, medium accepts writes, fill factor under the ceiling, and
    /// (when DC awareness is enabled) in an alive data center.
    pub fn is_valid_write_target(&self, node: &crate::node::Node, medium: &Medium, medium_index: MediumIndex) -> bool {
        if node.decommissioned || node.disable_write_sessions || !node.reported_heartbeat {
            return false;
        }
        if !medium.config.accepts_writes {
            return false;
        }
        if node.fill_factor(medium_index) >= self.config.max_fill_factor {
            return false;
        }
        if self.dc_config.enabled {
            let alive = self.alive_data_centers();
            match &node.data_center {
                Some(dc) => alive.contains(dc),
                None => false,
            }
        } else {
            true
        }
    }

    /// Picks up to `count` write targets for a new replica of a chunk on
    /// `medium_index`, excluding `existing` (`spec.md` §4.4 write-target
    /// selection, steps 1-5): step 1 tries `crp_hash`'s deterministic CRP
    /// targets (`0` means not CRP-managed); any shortfall falls back to
    /// valid write targets ordered by ascending load factor, rack/DC caps
    /// enforced greedily, relaxing rack awareness only if
    /// `force_rack_awareness` is false and the strict pass came up short.
    /// Every chosen node has its session hint bumped immediately so a
    /// second call within the same heartbeat sees the allocation in its
    /// load factor (`spec.md` §4.4 step 4).
    pub fn allocate_write_targets(
        &self,
        nodes: &mut NodeRegistry,
        medium: &Medium,
        medium_index: MediumIndex,
        is_erasure: bool,
        crp_hash: u64,
        existing: &[NodeId],
        count: usize,
    ) -> Vec<NodeId> {
        targets::allocate_write_targets(self, nodes, medium, medium_index, is_erasure, crp_hash, existing, count)
    }

    /// Picks `count` existing replicas of `(chunk_id, medium_index,
    /// replica_index)` to remove, preferring the "worst offenders" first:
    /// rack-over-cap, then decommissioned, then highest fill factor
    /// (`spec.md` §4.4 removal-target selection).
    pub fn get_removal_targets(
        &self,
        registry: &ObjectRegistry,
        nodes: &NodeRegistry,
        chunk_id: ChunkId,
        medium_index: MediumIndex,
        replica_index: cm_api_types::ReplicaIndex,
        count: usize,
    ) -> Vec<NodeId> {
        targets::get_removal_targets(self, registry, nodes, chunk_id, medium_index, replica_index, count)
    }

    /// Picks a single balancing target: the node with the lowest fill factor
    /// on `medium_index` that is still a valid write target (`spec.md` §4.4
    /// balancing-target selection).
    pub fn get_balancing_target(&self, nodes: &NodeRegistry, medium: &Medium, medium_index: MediumIndex, exclude: &[NodeId]) -> Option<NodeId> {
        targets::get_balancing_target(self, nodes, medium, medium_index, exclude)
    }

    /// First node with a free repair slot on `medium_index`, ordered by
    /// ascending load factor so repair work spreads rather than piling on
    /// one node (`spec.md` §4.3 "Work-queue updates").
    pub fn pick_repair_slot_node(&self, nodes: &NodeRegistry, medium_index: MediumIndex) -> Option<NodeId> {
        nodes
            .by_load_factor_ascending(medium_index)
            .into_iter()
            .find(|&id| nodes.get(id).map(|n| !n.decommissioned && n.reported_heartbeat).unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cm_config::ManagerConfig;

    #[test]
    fn write_target_predicate_rejects_decommissioned_and_full_nodes() {
        let cfg = ManagerConfig::default();
        let placement = Placement::new(&cfg);
        let medium = Medium {
            index: 0,
            name: "default".into(),
            priority: 0,
            cache: false,
            transient: false,
            config: cm_registry::MediumConfig::default(),
        };
        let mut node = crate::node::Node::new(NodeId(1), 4);
        node.reported_heartbeat = true;
        assert!(placement.is_valid_write_target(&node, &medium, 0));
        node.decommissioned = true;
        assert!(!placement.is_valid_write_target(&node, &medium, 0));
    }

    #[test]
    fn recompute_rings_skips_decommissioned_nodes() {
        let cfg = ManagerConfig::default();
        let mut placement = Placement::new(&cfg);
        let mut nodes = NodeRegistry::new(4);
        for i in 0..4 {
            let node = nodes.get_or_insert(NodeId(i));
            node.crp_tokens.insert(0, 1);
            placement.report_total_space(NodeId(i), 1_000);
        }
        nodes.get_or_insert(NodeId(3)).decommissioned = true;
        placement.recompute_crp_rings(&nodes);
        let targets = placement.crp_targets(0xdead_beef, 0, &nodes);
        assert!(!targets.contains(&NodeId(3)));
    }
}
