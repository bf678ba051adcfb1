//! Target-selection algorithms backing [`super::Placement`] (`spec.md`
//! §4.4): write targets, removal targets (the "offense ordering"), and
//! balancing targets. Split out of `mod.rs` the way the teacher splits
//! `chunk_store.rs` pruning logic out of `datastore.rs` — same owner,
//! distinct algorithm, worth reading on its own.

use std::collections::{HashMap, HashSet};

use cm_api_types::{ChunkId, MediumIndex, NodeId, ReplicaIndex, ReplicaListKind};
use cm_registry::{Medium, ObjectRegistry};

use super::Placement;
use crate::node::NodeRegistry;

/// Step 1 of write-target selection (`spec.md` §4.4): try `crp_hash`'s
/// deterministic ring targets first, then fall back to the greedy
/// rack-capped load-factor walk for anything CRP couldn't cover. `crp_hash
/// == 0` means the chunk isn't CRP-managed and the fallback runs
/// unconditionally. Every chosen node gets its session hint bumped so the
/// load factor reflects the allocation immediately (`spec.md` §4.4 step 4).
pub fn allocate_write_targets(
    placement: &Placement,
    nodes: &mut NodeRegistry,
    medium: &Medium,
    medium_index: MediumIndex,
    is_erasure: bool,
    crp_hash: u64,
    existing: &[NodeId],
    count: usize,
) -> Vec<NodeId> {
    let mut chosen = Vec::new();

    if crp_hash != 0 {
        for id in placement.crp_targets(crp_hash, medium_index, nodes) {
            if chosen.len() >= count {
                break;
            }
            if existing.contains(&id) || chosen.contains(&id) {
                continue;
            }
            let Some(node) = nodes.get(id) else { continue };
            if placement.is_valid_write_target(node, medium, medium_index) {
                chosen.push(id);
            }
        }
    }

    if chosen.len() < count {
        chosen.extend(fallback_walk(placement, nodes, medium, medium_index, is_erasure, existing, &chosen, count - chosen.len()));
    }

    for &id in &chosen {
        if let Some(node) = nodes.get_mut(id) {
            node.bump_session_hint(medium_index);
        }
    }
    chosen
}

/// Greedy rack-capped candidate walk: ascending load factor, skipping nodes
/// already holding a replica, stopping a rack once it hits `cap`. If the
/// strict pass falls short and rack awareness isn't forced, a second pass
/// fills the remainder ignoring the cap (`spec.md` §4.4 step 5 "relax rack
/// awareness as a last resort").
fn fallback_walk(
    placement: &Placement,
    nodes: &NodeRegistry,
    medium: &Medium,
    medium_index: MediumIndex,
    is_erasure: bool,
    existing: &[NodeId],
    already_chosen: &[NodeId],
    count: usize,
) -> Vec<NodeId> {
    let cap = placement.max_replicas_per_rack(medium, is_erasure);
    let mut rack_counts: HashMap<Option<String>, u32> = HashMap::new();
    for &id in existing.iter().chain(already_chosen) {
        if let Some(node) = nodes.get(id) {
            *rack_counts.entry(node.rack.clone()).or_insert(0) += 1;
        }
    }

    let excluded = |id: NodeId| existing.contains(&id) || already_chosen.contains(&id);
    let ordered = nodes.by_load_factor_ascending(medium_index);
    let mut chosen = Vec::new();
    let mut used_rack_counts = rack_counts.clone();

    for &id in &ordered {
        if chosen.len() >= count {
            break;
        }
        if excluded(id) || chosen.contains(&id) {
            continue;
        }
        let Some(node) = nodes.get(id) else { continue };
        if !placement.is_valid_write_target(node, medium, medium_index) {
            continue;
        }
        let rack_count = used_rack_counts.entry(node.rack.clone()).or_insert(0);
        if *rack_count >= cap {
            continue;
        }
        *rack_count += 1;
        chosen.push(id);
    }

    if chosen.len() < count && !placement.force_rack_awareness() {
        for &id in &ordered {
            if chosen.len() >= count {
                break;
            }
            if excluded(id) || chosen.contains(&id) {
                continue;
            }
            let Some(node) = nodes.get(id) else { continue };
            if !placement.is_valid_write_target(node, medium, medium_index) {
                continue;
            }
            chosen.push(id);
        }
    }

    chosen
}

/// Orders a chunk's existing replicas of `(chunk_id, medium_index,
/// replica_index)` by removal priority and returns the top `count`
/// (`spec.md` §4.4 "offense ordering": (1) CRP-inconsistent, (2)
/// rack-overfull, (3) DC-overfull, (4) highest fill factor) so balancing
/// always sheds the worst-placed copy first.
pub fn get_removal_targets(
    placement: &Placement,
    registry: &ObjectRegistry,
    nodes: &NodeRegistry,
    chunk_id: ChunkId,
    medium_index: MediumIndex,
    replica_index: ReplicaIndex,
    count: usize,
) -> Vec<NodeId> {
    let Ok(chunk_handle) = registry.get_chunk(chunk_id) else { return Vec::new() };
    let chunk = chunk_handle.borrow();
    let is_erasure = chunk.chunk_type().is_erasure();
    let Ok(medium) = registry.media.get(medium_index) else { return Vec::new() };
    let cap = placement.max_replicas_per_rack(medium, is_erasure);

    let replica_nodes: Vec<NodeId> = chunk
        .replica_list(ReplicaListKind::Stored)
        .iter()
        .filter(|r| r.medium_index == medium_index && r.replica_index == replica_index)
        .map(|r| r.node)
        .collect();

    let mut rack_counts: HashMap<Option<String>, u32> = HashMap::new();
    let mut dc_counts: HashMap<Option<String>, u32> = HashMap::new();
    for &id in &replica_nodes {
        if let Some(node) = nodes.get(id) {
            *rack_counts.entry(node.rack.clone()).or_insert(0) += 1;
            *dc_counts.entry(node.data_center.clone()).or_insert(0) += 1;
        }
    }

    let crp_targets: Option<HashSet<NodeId>> = if chunk.is_crp_managed() {
        Some(placement.crp_targets(chunk.consistent_replica_placement_hash, medium_index, nodes).into_iter().collect())
    } else {
        None
    };

    let aggregated_rf = registry
        .requisitions
        .get(chunk.local_requisition_index)
        .map(|r| r.aggregated_factor(medium_index))
        .unwrap_or(1)
        .max(1);
    let dc_cap = placement.max_replicas_per_data_center(aggregated_rf as u32);

    let offense = |id: NodeId| -> (u8, u8, u8, std::cmp::Reverse<u64>) {
        let Some(node) = nodes.get(id) else {
            return (0, 0, 0, std::cmp::Reverse(0));
        };
        let crp_inconsistent = crp_targets.as_ref().map(|set| !set.contains(&id)).unwrap_or(false);
        let over_rack_cap = rack_counts.get(&node.rack).copied().unwrap_or(0) > cap;
        let over_dc_cap = dc_counts.get(&node.data_center).copied().unwrap_or(0) > dc_cap;
        let fill_bits = (node.fill_factor(medium_index) * 1_000_000.0) as u64;
        (
            if crp_inconsistent { 0 } else { 1 },
            if over_rack_cap { 0 } else { 1 },
            if over_dc_cap { 0 } else { 1 },
            std::cmp::Reverse(fill_bits),
        )
    };

    let mut ordered = replica_nodes;
    ordered.sort_by_key(|&id| offense(id));
    ordered.truncate(count);
    ordered
}

/// Lowest-fill-factor valid write target not already holding a replica
/// (`spec.md` §4.4 balancing-target selection).
pub fn get_balancing_target(
    placement: &Placement,
    nodes: &NodeRegistry,
    medium: &Medium,
    medium_index: MediumIndex,
    exclude: &[NodeId],
) -> Option<NodeId> {
    nodes
        .by_fill_factor_ascending(medium_index)
        .into_iter()
        .filter(|id| !exclude.contains(id))
        .find(|&id| nodes.get(id).map(|n| placement.is_valid_write_target(n, medium, medium_index)).unwrap_or(false))
}
