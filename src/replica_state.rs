//! Replica state machine and heartbeat processing (`spec.md` §4.2, §4.2.1).
//! Grounded on the teacher's `DataStore::add_chunk`/reference-counting flow
//! (`pbs-datastore/src/datastore.rs`) for "accept external reports, update a
//! small state machine per reported entity, never abort on one bad entry" —
//! generalized from a single insert-or-verify step to the four-state
//! Unapproved/Approved/destroyed/absent machine `spec.md` names.

use cm_api_types::{
    ChunkId, FullHeartbeatRequest, IncrementalHeartbeatRequest, NodeDisposalRequest, NodeId,
    ReplicaHeartbeatResponse, ReplicaListKind, ReplicaState, ReportedReplica,
};
use cm_config::{ManagerConfig, MutationTimestamp};
use cm_registry::{ChunkHandle, ObjectRegistry};

use crate::node::{NodeRegistry, ReplicaCoordinate};
use crate::placement::Placement;
use crate::refresh::RefreshSchedulers;

fn coordinate_of(r: &ReportedReplica) -> ReplicaCoordinate {
    ReplicaCoordinate { chunk: r.chunk_id, medium: r.medium_index, replica_index: r.replica_index }
}

/// Adds `replica` to the chunk as an approved replica if not already present
/// and bumps `approved_replica_count` (`spec.md` §4.2 "Approval policy").
fn add_approved(chunk_handle: &ChunkHandle, node: NodeId, r: &ReportedReplica) {
    let mut chunk = chunk_handle.borrow_mut();
    let already = chunk
        .replica_list(ReplicaListKind::Stored)
        .iter()
        .chain(chunk.replica_list(ReplicaListKind::Cached).iter())
        .any(|rt| rt.node == node && rt.medium_index == r.medium_index && rt.replica_index == r.replica_index);
    if !already {
        let tuple = cm_registry::ReplicaTuple { node, replica_index: r.replica_index, medium_index: r.medium_index, state: r.state };
        chunk.add_replica(ReplicaListKind::Stored, tuple).ok();
        chunk.approved_replica_count += 1;
    }
}

/// `spec.md` §4.2 "On full heartbeat from a node": reset all prior replica
/// state for that node, then re-add every reported replica as approved.
pub fn process_full_heartbeat(
    registry: &ObjectRegistry,
    nodes: &mut NodeRegistry,
    placement: &mut Placement,
    refresh: &mut RefreshSchedulers,
    config: &ManagerConfig,
    req: &FullHeartbeatRequest,
    now: MutationTimestamp,
) -> ReplicaHeartbeatResponse {
    let node_id = req.node;
    {
        let node = nodes.get_or_insert(node_id);
        for coordinate in node.replicas.drain().collect::<Vec<_>>() {
            if let Ok(chunk_handle) = registry.get_chunk(coordinate.chunk) {
                let mut chunk = chunk_handle.borrow_mut();
                if chunk.remove_replica(node_id, coordinate.medium, coordinate.replica_index).is_some() {
                    chunk.approved_replica_count = chunk.approved_replica_count.saturating_sub(1);
                }
            }
        }
        node.unapproved.clear();
        node.destroyed_replicas.clear();
        node.reported_heartbeat = true;
    }

    for r in &req.replicas {
        let coordinate = coordinate_of(r);
        if !registry.chunk_exists(r.chunk_id) {
            if let Some(node) = nodes.get_mut(node_id) {
                node.destroyed_replicas.insert(coordinate);
            }
            continue;
        }
        let chunk_handle = registry.get_chunk(r.chunk_id).expect("checked above");
        add_approved(&chunk_handle, node_id, r);
        if let Some(node) = nodes.get_mut(node_id) {
            node.replicas.insert(coordinate);
        }
    }

    placement.report_total_space(node_id, req.total_space);
    // Provisional per-medium token estimate so CRP math isn't stale until
    // the next periodic bucket recomputation (SPEC_FULL.md §D).
    if let Some(node) = nodes.get_mut(node_id) {
        for medium in req.replicas.iter().map(|r| r.medium_index).collect::<std::collections::HashSet<_>>() {
            node.crp_tokens.entry(medium).or_insert_with(|| crate::placement::crp::token_count_for_bucket(0, &config.crp));
        }
    }

    if let Some(node) = nodes.get(node_id) {
        refresh.schedule_node_refresh(node, now);
    }

    ReplicaHeartbeatResponse::default()
}

/// `spec.md` §4.2 "On incremental heartbeat".
pub fn process_incremental_heartbeat(
    registry: &ObjectRegistry,
    nodes: &mut NodeRegistry,
    refresh: &mut RefreshSchedulers,
    config: &ManagerConfig,
    req: &IncrementalHeartbeatRequest,
    now: MutationTimestamp,
) -> ReplicaHeartbeatResponse {
    let node_id = req.node;
    let mut response = ReplicaHeartbeatResponse::default();
    nodes.get_or_insert(node_id).reported_heartbeat = true;

    for r in &req.added_replicas {
        let coordinate = coordinate_of(r);
        if !registry.chunk_exists(r.chunk_id) {
            continue;
        }
        let was_unapproved = nodes.get_mut(node_id).map(|n| n.unapproved.remove(&coordinate).is_some()).unwrap_or(false);
        let chunk_handle = registry.get_chunk(r.chunk_id).expect("checked above");
        if was_unapproved {
            let mut chunk = chunk_handle.borrow_mut();
            if chunk.set_replica_state(node_id, r.medium_index, r.replica_index, r.state) {
                chunk.approved_replica_count += 1;
            }
        } else {
            add_approved(&chunk_handle, node_id, r);
        }
        if let Some(node) = nodes.get_mut(node_id) {
            node.replicas.insert(coordinate);
        }
        refresh.schedule_chunk_refresh(r.chunk_id.chunk_type(), r.chunk_id, now, config.refresh.chunk_refresh_delay_ms);
    }

    for r in &req.removed_replicas {
        let coordinate = coordinate_of(r);
        let was_unapproved = nodes.get_mut(node_id).map(|n| n.unapproved.remove(&coordinate).is_some()).unwrap_or(false);
        if let Some(node) = nodes.get_mut(node_id) {
            node.replicas.remove(&coordinate);
        }
        if let Ok(chunk_handle) = registry.get_chunk(r.chunk_id) {
            let mut chunk = chunk_handle.borrow_mut();
            if chunk.remove_replica(node_id, r.medium_index, r.replica_index).is_some() && !was_unapproved {
                chunk.approved_replica_count = chunk.approved_replica_count.saturating_sub(1);
            }
        }
        refresh.schedule_chunk_refresh(r.chunk_id.chunk_type(), r.chunk_id, now, config.refresh.chunk_refresh_delay_ms);
    }

    for &chunk_id in &req.confirmed_ally_announcements {
        if let Some(node) = nodes.get_mut(node_id) {
            if node.endorsements.remove(&chunk_id).is_some() {
                response.confirmed_endorsements.push(chunk_id);
            }
        }
        if let Ok(chunk_handle) = registry.get_chunk(chunk_id) {
            let mut chunk = chunk_handle.borrow_mut();
            if chunk.node_with_endorsement == Some(node_id) {
                chunk.node_with_endorsement = None;
                chunk.endorsement_required = false;
            }
        }
    }

    sweep_unapproved(registry, nodes, node_id, config, now);

    response
}

/// Drops unapproved entries older than `ReplicaApproveTimeout` or whose
/// chunk has died (`spec.md` §4.2 "Finally, walk the node's unapproved
/// map").
fn sweep_unapproved(registry: &ObjectRegistry, nodes: &mut NodeRegistry, node_id: NodeId, config: &ManagerConfig, now: MutationTimestamp) {
    let Some(node) = nodes.get(node_id) else { return };
    let timeout = config.replication.replica_approve_timeout_ms;
    let expired: Vec<ReplicaCoordinate> = node
        .unapproved
        .iter()
        .filter(|(coordinate, &added_at)| now.saturating_sub(added_at) > timeout || !registry.chunk_exists(coordinate.chunk))
        .map(|(c, _)| *c)
        .collect();
    let Some(node) = nodes.get_mut(node_id) else { return };
    for coordinate in expired {
        node.unapproved.remove(&coordinate);
        node.replicas.remove(&coordinate);
        if let Ok(chunk_handle) = registry.get_chunk(coordinate.chunk) {
            chunk_handle.borrow_mut().remove_replica(node_id, coordinate.medium, coordinate.replica_index);
        }
    }
}

/// `spec.md` §4.2 "On node disposal (graceful removal from cluster)".
pub fn process_node_disposal(
    registry: &ObjectRegistry,
    nodes: &mut NodeRegistry,
    placement: &mut Placement,
    refresh: &mut RefreshSchedulers,
    req: &NodeDisposalRequest,
    now: MutationTimestamp,
) {
    let node_id = req.node;
    let Some(node) = nodes.remove(node_id) else { return };

    for coordinate in node.replicas.iter().chain(node.unapproved.keys()) {
        if let Ok(chunk_handle) = registry.get_chunk(coordinate.chunk) {
            let mut chunk = chunk_handle.borrow_mut();
            if chunk.remove_replica(node_id, coordinate.medium, coordinate.replica_index).is_some() {
                chunk.approved_replica_count = chunk.approved_replica_count.saturating_sub(1);
            }
        }
        refresh.schedule_chunk_refresh(coordinate.chunk.chunk_type(), coordinate.chunk, now, 0);
    }

    for &chunk_id in node.endorsements.keys() {
        if let Ok(chunk_handle) = registry.get_chunk(chunk_id) {
            let mut chunk = chunk_handle.borrow_mut();
            if chunk.node_with_endorsement == Some(node_id) {
                chunk.node_with_endorsement = None;
                chunk.endorsement_required = true;
            }
        }
        refresh.schedule_chunk_refresh(chunk_id.chunk_type(), chunk_id, now, 0);
    }

    placement.forget_node(node_id);
}

/// Chooses an endorsing node for `chunk_id` (`spec.md` §4.2.1
/// "Endorsement"): the surviving replica with the highest node id.
pub fn assign_endorsement(registry: &ObjectRegistry, nodes: &mut NodeRegistry, chunk_id: ChunkId, revision: u64) -> Option<NodeId> {
    let chunk_handle = registry.get_chunk(chunk_id).ok()?;
    let mut chunk = chunk_handle.borrow_mut();
    let candidate = chunk
        .replica_list(ReplicaListKind::Stored)
        .iter()
        .map(|r| r.node)
        .filter(|n| nodes.get(*n).map(|node| !node.decommissioned).unwrap_or(false))
        .max()?;
    chunk.node_with_endorsement = Some(candidate);
    if let Some(node) = nodes.get_mut(candidate) {
        node.endorsements.insert(chunk_id, revision);
    }
    Some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cm_api_types::{CellTag, ChunkType, MediumIndex, ReplicaIndex};
    use cm_registry::MediumRegistry;

    fn new_registry() -> ObjectRegistry {
        ObjectRegistry::new(MediumRegistry::bootstrap(cm_config::MediumRegistryConfig::default()), CellTag(0))
    }

    fn reported(chunk: ChunkId, medium: MediumIndex, idx: ReplicaIndex) -> ReportedReplica {
        ReportedReplica { chunk_id: chunk, medium_index: medium, replica_index: idx, state: ReplicaState::Generic }
    }

    #[test]
    fn full_heartbeat_adds_approved_replicas_and_resets_prior_state() {
        let mut registry = new_registry();
        let mut nodes = NodeRegistry::new(4);
        let cfg = ManagerConfig::default();
        let mut placement = Placement::new(&cfg);
        let mut refresh = RefreshSchedulers::default();
        let chunk = registry.create_chunk(ChunkType::Regular, 1, None, 0, cm_api_types::TransactionId(0), None).unwrap();
        let chunk_id = chunk.borrow().id;

        let req = FullHeartbeatRequest { node: NodeId(1), total_space: 1_000_000, replicas: vec![reported(chunk_id, 0, 0)] };
        process_full_heartbeat(&registry, &mut nodes, &mut placement, &mut refresh, &cfg, &req, 0);

        assert_eq!(chunk.borrow().approved_replica_count, 1);
        assert_eq!(nodes.get(NodeId(1)).unwrap().replicas.len(), 1);

        // A second full heartbeat with no replicas must clear the prior set.
        let req2 = FullHeartbeatRequest { node: NodeId(1), total_space: 1_000_000, replicas: vec![] };
        process_full_heartbeat(&registry, &mut nodes, &mut placement, &mut refresh, &cfg, &req2, 1);
        assert_eq!(chunk.borrow().approved_replica_count, 0);
        assert!(nodes.get(NodeId(1)).unwrap().replicas.is_empty());
    }

    #[test]
    fn unapproved_entries_timeout_and_are_dropped() {
        let registry = new_registry();
        let mut nodes = NodeRegistry::new(4);
        let cfg = ManagerConfig::default();
        let mut refresh = RefreshSchedulers::default();
        let chunk_id = ChunkId::new(1, 0, ChunkType::Regular, CellTag(0));
        let node = nodes.get_or_insert(NodeId(1));
        node.unapproved.insert(ReplicaCoordinate { chunk: chunk_id, medium: 0, replica_index: 0 }, 0);

        sweep_unapproved(&registry, &mut nodes, NodeId(1), &cfg, cfg.replication.replica_approve_timeout_ms + 1);
        assert!(nodes.get(NodeId(1)).unwrap().unapproved.is_empty());
    }

    #[test]
    fn node_disposal_removes_replicas_and_requires_reendorsement() {
        let mut registry = new_registry();
        let mut nodes = NodeRegistry::new(4);
        let cfg = ManagerConfig::default();
        let mut placement = Placement::new(&cfg);
        let mut refresh = RefreshSchedulers::default();
        let chunk = registry.create_chunk(ChunkType::Regular, 1, None, 0, cm_api_types::TransactionId(0), None).unwrap();
        let chunk_id = chunk.borrow().id;
        let full = FullHeartbeatRequest { node: NodeId(5), total_space: 1, replicas: vec![reported(chunk_id, 0, 0)] };
        process_full_heartbeat(&registry, &mut nodes, &mut placement, &mut refresh, &cfg, &full, 0);
        chunk.borrow_mut().node_with_endorsement = Some(NodeId(5));
        nodes.get_mut(NodeId(5)).unwrap().endorsements.insert(chunk_id, 1);

        process_node_disposal(&registry, &mut nodes, &mut placement, &mut refresh, &NodeDisposalRequest { node: NodeId(5) }, 10);

        assert!(nodes.get(NodeId(5)).is_none());
        assert_eq!(chunk.borrow().approved_replica_count, 0);
        assert!(chunk.borrow().endorsement_required);
    }
}
