//! The node model (`spec.md` §3 "Node (as referenced by the core)"): the
//! subset of per-storage-node state the manager itself owns and mutates —
//! queues, approval/endorsement bookkeeping, fill/load factor, CRP token
//! counts. Node *identity* and the heartbeat transport are out of scope
//! (`spec.md` §1); this module only ever receives a [`NodeId`] handed to it
//! by the caller.

use std::collections::{HashMap, HashSet, VecDeque};

use cm_api_types::requests::NodeResources;
use cm_api_types::{ChunkId, JobId, MediumIndex, NodeId, ReplicaIndex};
use cm_config::MutationTimestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReplicaCoordinate {
    pub chunk: ChunkId,
    pub medium: MediumIndex,
    pub replica_index: ReplicaIndex,
}

#[derive(Debug, Default)]
pub struct MediumUsage {
    pub used_space: u64,
    pub available_space: u64,
    pub active_sessions: u32,
    pub pending_io_weight: f64,
    pub recent_hint_count: u32,
}

impl MediumUsage {
    pub fn fill_factor(&self) -> f64 {
        let total = self.used_space + self.available_space;
        if total == 0 {
            0.0
        } else {
            self.used_space as f64 / total as f64
        }
    }

    /// Compound load metric: session count dominates, IO weight and recent
    /// hints break ties among otherwise-equal nodes (`spec.md` §4.4).
    pub fn load_factor(&self) -> f64 {
        self.active_sessions as f64 * 1000.0 + self.pending_io_weight + self.recent_hint_count as f64 * 0.01
    }
}

#[derive(Debug, Default)]
pub struct Node {
    pub id: NodeId,
    pub rack: Option<String>,
    pub data_center: Option<String>,
    pub decommissioned: bool,
    pub disable_write_sessions: bool,
    pub reported_heartbeat: bool,

    pub resource_limits: NodeResources,
    pub resource_usage: NodeResources,

    pub usage_by_medium: HashMap<MediumIndex, MediumUsage>,
    pub replicas: HashSet<ReplicaCoordinate>,
    pub destroyed_replicas: HashSet<ReplicaCoordinate>,
    pub unapproved: HashMap<ReplicaCoordinate, MutationTimestamp>,
    pub endorsements: HashMap<ChunkId, u64>,
    pub crp_tokens: HashMap<MediumIndex, u32>,

    /// Per-priority replication queues, index `k` = priority `k`
    /// (`spec.md` §4.3: "priority k drained before priority k+1").
    pub replication_queues: Vec<VecDeque<(ChunkId, ReplicaIndex)>>,
    pub removal_queue: VecDeque<ReplicaCoordinate>,
    /// Chunk id plus the specific erasure part indices missing
    /// (`spec.md` §8 E3: "erased_indexes={3,9}... two new write targets"),
    /// so repair allocates exactly as many targets as parts are missing,
    /// each tagged with its correct index.
    pub repair_queue: VecDeque<(ChunkId, Vec<ReplicaIndex>)>,
    pub seal_queue: VecDeque<ChunkId>,
    /// Merged chunk id plus the nodes it should be written to
    /// (`spec.md` §4.9; the registry already decided the tree edit, this
    /// just tells a node to materialize the bytes).
    pub merge_queue: VecDeque<(ChunkId, Vec<NodeId>)>,
    /// Newly split-off tail chunk id plus its write targets (`spec.md` §4.9).
    pub autotomy_queue: VecDeque<(ChunkId, Vec<NodeId>)>,

    pub running_jobs: HashSet<JobId>,
}

impl Node {
    pub fn new(id: NodeId, priority_count: usize) -> Self {
        Node {
            id,
            replication_queues: (0..priority_count).map(|_| VecDeque::new()).collect(),
            ..Default::default()
        }
    }

    pub fn usage(&self, medium: MediumIndex) -> MediumUsage {
        self.usage_by_medium
            .get(&medium)
            .map(|u| MediumUsage {
                used_space: u.used_space,
                available_space: u.available_space,
                active_sessions: u.active_sessions,
                pending_io_weight: u.pending_io_weight,
                recent_hint_count: u.recent_hint_count,
            })
            .unwrap_or_default()
    }

    pub fn fill_factor(&self, medium: MediumIndex) -> f64 {
        self.usage_by_medium.get(&medium).map(MediumUsage::fill_factor).unwrap_or(0.0)
    }

    pub fn load_factor(&self, medium: MediumIndex) -> f64 {
        self.usage_by_medium.get(&medium).map(MediumUsage::load_factor).unwrap_or(0.0)
    }

    pub fn bump_session_hint(&mut self, medium: MediumIndex) {
        let usage = self.usage_by_medium.entry(medium).or_default();
        usage.active_sessions += 1;
        usage.recent_hint_count += 1;
    }

    pub fn has_available_slots(&self, resources: NodeResources) -> bool {
        self.resource_usage.replication_slots + resources.replication_slots <= self.resource_limits.replication_slots
            && self.resource_usage.removal_slots + resources.removal_slots <= self.resource_limits.removal_slots
            && self.resource_usage.repair_slots + resources.repair_slots <= self.resource_limits.repair_slots
            && self.resource_usage.seal_slots + resources.seal_slots <= self.resource_limits.seal_slots
            && self.resource_usage.merge_slots + resources.merge_slots <= self.resource_limits.merge_slots
            && self.resource_usage.autotomy_slots + resources.autotomy_slots <= self.resource_limits.autotomy_slots
            && self.resource_usage.memory + resources.memory <= self.resource_limits.memory
    }

    pub fn charge(&mut self, resources: NodeResources) {
        self.resource_usage.replication_slots += resources.replication_slots;
        self.resource_usage.removal_slots += resources.removal_slots;
        self.resource_usage.repair_slots += resources.repair_slots;
        self.resource_usage.seal_slots += resources.seal_slots;
        self.resource_usage.merge_slots += resources.merge_slots;
        self.resource_usage.autotomy_slots += resources.autotomy_slots;
        self.resource_usage.memory += resources.memory;
    }

    pub fn release(&mut self, resources: NodeResources) {
        self.resource_usage.replication_slots = self.resource_usage.replication_slots.saturating_sub(resources.replication_slots);
        self.resource_usage.removal_slots = self.resource_usage.removal_slots.saturating_sub(resources.removal_slots);
        self.resource_usage.repair_slots = self.resource_usage.repair_slots.saturating_sub(resources.repair_slots);
        self.resource_usage.seal_slots = self.resource_usage.seal_slots.saturating_sub(resources.seal_slots);
        self.resource_usage.merge_slots = self.resource_usage.merge_slots.saturating_sub(resources.merge_slots);
        self.resource_usage.autotomy_slots = self.resource_usage.autotomy_slots.saturating_sub(resources.autotomy_slots);
        self.resource_usage.memory = self.resource_usage.memory.saturating_sub(resources.memory);
    }
}

/// Owns every [`Node`] and the two sorted-by-factor indexes placement reads
/// (`spec.md` §4.4 "Fill-factor index"/"Load-factor index"). Rebuilt
/// lazily: for the scale this component targets (thousands, not millions,
/// of nodes) a `BTreeMap` keyed on a quantized factor gives the same
/// ascending-iteration behavior as a pinned-iterator sorted multimap
/// without the unsafe self-referential plumbing a pinned-iterator design
/// would need in safe Rust.
#[derive(Default)]
pub struct NodeRegistry {
    nodes: HashMap<NodeId, Node>,
    priority_count: usize,
}

impl NodeRegistry {
    pub fn new(priority_count: usize) -> Self {
        NodeRegistry {
            nodes: HashMap::new(),
            priority_count,
        }
    }

    pub fn get_or_insert(&mut self, id: NodeId) -> &mut Node {
        self.nodes.entry(id).or_insert_with(|| Node::new(id, self.priority_count))
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    pub fn remove(&mut self, id: NodeId) -> Option<Node> {
        self.nodes.remove(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes.values_mut()
    }

    /// Nodes ordered ascending by fill factor on `medium`, for balancing
    /// target selection (`spec.md` §4.4).
    pub fn by_fill_factor_ascending(&self, medium: MediumIndex) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        ids.sort_by(|a, b| {
            self.nodes[a]
                .fill_factor(medium)
                .partial_cmp(&self.nodes[b].fill_factor(medium))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ids
    }

    /// Nodes ordered ascending by load factor on `medium`, for write-target
    /// selection (`spec.md` §4.4).
    pub fn by_load_factor_ascending(&self, medium: MediumIndex) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        ids.sort_by(|a, b| {
            self.nodes[a]
                .load_factor(medium)
                .partial_cmp(&self.nodes[b].load_factor(medium))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_factor_index_is_ascending() {
        let mut reg = NodeRegistry::new(4);
        for (id, used) in [(1, 10u64), (2, 90), (3, 50)] {
            let node = reg.get_or_insert(NodeId(id));
            node.usage_by_medium.insert(0, MediumUsage { used_space: used, available_space: 100, ..Default::default() });
        }
        let ordered = reg.by_fill_factor_ascending(0);
        assert_eq!(ordered, vec![NodeId(1), NodeId(3), NodeId(2)]);
    }

    #[test]
    fn resource_charge_and_release_roundtrip() {
        let mut reg = NodeRegistry::new(4);
        let node = reg.get_or_insert(NodeId(1));
        node.resource_limits.replication_slots = 2;
        let cost = NodeResources { replication_slots: 1, ..Default::default() };
        assert!(node.has_available_slots(cost));
        node.charge(cost);
        node.charge(cost);
        assert!(!node.has_available_slots(cost));
        node.release(cost);
        assert!(node.has_available_slots(cost));
    }
}
