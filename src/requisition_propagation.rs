//! Requisition propagation (`spec.md` §4.6): recomputing a chunk's
//! effective requisition from its owning chunk lists and batching the
//! resulting index changes into atomic mutations. The scheduler side
//! reuses [`crate::refresh::RefreshScanner`] — the same "delay-ordered
//! heap, re-check liveness on pop" design as the chunk-status refresh
//! scanners (`spec.md` §4.3.1), since requisition recomputation is driven
//! by an identical blob/journal pair of scanners.

use std::collections::HashSet;

use cm_api_types::{AccountId, CellTag, ChunkId, MediumIndex, NodeId, ReplicationFactor};
use cm_api_types::Result;
use cm_config::MutationTimestamp;
use cm_registry::requisition::{ReplicationPolicy, Requisition, RequisitionEntry};
use cm_registry::tree::{walk_ancestors_for_owners, AncestorWalkResult, ChunkTreeVisitor};
use cm_registry::{ChunkListHandle, ObjectRegistry};

use crate::alert;
use crate::refresh::RefreshScanner;

/// Per-owning-node requisition contribution (`spec.md` §4.6). Resolving a
/// [`NodeId`] (a tablet/object owner) to this is the job of the
/// object/tablet subsystem, explicitly out of scope here (`spec.md` §1);
/// callers supply it via [`OwningNodePolicySource`].
#[derive(Debug, Clone, Copy)]
pub struct OwningNodePolicy {
    pub account: AccountId,
    pub medium: MediumIndex,
    pub replication_factor: ReplicationFactor,
    pub data_parts_only: bool,
    pub vital: bool,
}

pub trait OwningNodePolicySource {
    fn policy_for(&self, node: NodeId) -> Option<OwningNodePolicy>;
}

/// Computes the effective requisition for a chunk whose direct
/// chunk-list parents are `start_parents` (`spec.md` §4.6): a bounded BFS
/// up `parents` links, stopping at any chunk list with nonempty
/// `owning_nodes`. `None` means the walk was ambiguous or found no
/// owner; the caller must then leave the chunk's current requisition
/// untouched rather than clear it.
pub fn compute_effective_requisition(
    registry: &ObjectRegistry,
    start_parents: &[cm_api_types::ObjectId],
    is_erasure: bool,
    policy_source: &dyn OwningNodePolicySource,
) -> Option<Requisition> {
    let owners = match walk_ancestors_for_owners(registry, start_parents) {
        AncestorWalkResult::Owners(owners) => owners,
        AncestorWalkResult::NoOwnerFound => return None,
    };

    let mut entries = Vec::new();
    let mut vital = false;
    for node in owners {
        let Some(policy) = policy_source.policy_for(node) else { continue };
        vital |= policy.vital;
        entries.push(RequisitionEntry {
            account: policy.account,
            medium: policy.medium,
            policy: ReplicationPolicy { factor: policy.replication_factor, data_parts_only: policy.data_parts_only },
            committed: true,
        });
    }
    if entries.is_empty() {
        return None;
    }
    let requisition = Requisition::new(entries, vital);
    Some(if is_erasure { requisition.with_erasure_factor_forced() } else { requisition })
}

/// Applies a newly computed requisition to `chunk_id`, per `spec.md`
/// §4.6 step 2-3: native chunks compare-and-update the local index;
/// foreign chunks publish a new external index under `local_cell`'s slot
/// instead (forwarding the mutation to the chunk's native cell is
/// transport, out of scope here). Returns `true` iff the index actually
/// changed.
pub fn apply_requisition_update(registry: &mut ObjectRegistry, local_cell: CellTag, chunk_id: ChunkId, new_requisition: Requisition) -> Result<bool> {
    let chunk_handle = registry.get_chunk(chunk_id)?;
    let foreign = chunk_handle.borrow().foreign;
    let new_index = registry.requisitions.intern(new_requisition);

    if foreign {
        let old = chunk_handle.borrow_mut().external_requisition_indexes.insert(local_cell, new_index);
        if old == Some(new_index) {
            registry.requisitions.release(new_index)?;
            return Ok(false);
        }
        if let Some(old_index) = old {
            registry.requisitions.release(old_index)?;
        }
        chunk_handle.borrow_mut().bump_version();
        return Ok(true);
    }

    let old_index = chunk_handle.borrow().local_requisition_index;
    if old_index == new_index {
        registry.requisitions.release(new_index)?;
        return Ok(false);
    }
    chunk_handle.borrow_mut().local_requisition_index = new_index;
    chunk_handle.borrow_mut().bump_version();
    registry.requisitions.release(old_index)?;
    Ok(true)
}

/// The blob/journal pair of delay-ordered scanners driving requisition
/// recomputation (`spec.md` §4.6 "mirrors the refresh scheduler").
#[derive(Default)]
pub struct RequisitionScheduler {
    pub blob: RefreshScanner,
    pub journal: RefreshScanner,
}

impl RequisitionScheduler {
    pub fn schedule(&mut self, chunk_id: ChunkId, now: MutationTimestamp, delay_ms: i64) {
        let scanner = if chunk_id.chunk_type().is_journal() { &mut self.journal } else { &mut self.blob };
        scanner.schedule(chunk_id, now + delay_ms);
    }

    pub fn drain_ready(&mut self, now: MutationTimestamp, max_batch: usize) -> Vec<ChunkId> {
        let mut out = self.blob.drain_ready(now, max_batch);
        let remaining = max_batch.saturating_sub(out.len());
        out.extend(self.journal.drain_ready(now, remaining));
        out
    }
}

/// Recomputes and atomically applies the requisition for every chunk in
/// `chunk_ids` (one batch drained from [`RequisitionScheduler`]),
/// scheduling a status refresh for each chunk whose index actually
/// changed (`spec.md` §4.6, §4.3).
pub fn process_requisition_batch(
    registry: &mut ObjectRegistry,
    local_cell: CellTag,
    refresh: &mut crate::refresh::RefreshSchedulers,
    now: MutationTimestamp,
    chunk_ids: &[ChunkId],
    policy_source: &dyn OwningNodePolicySource,
) {
    for &chunk_id in chunk_ids {
        let Ok(chunk_handle) = registry.get_chunk(chunk_id) else { continue };
        let (parents, is_erasure) = {
            let chunk = chunk_handle.borrow();
            (chunk.parents().map(|(id, _)| id).collect::<Vec<_>>(), chunk.chunk_type().is_erasure())
        };
        let Some(new_requisition) = compute_effective_requisition(registry, &parents, is_erasure, policy_source) else {
            continue;
        };
        match apply_requisition_update(registry, local_cell, chunk_id, new_requisition) {
            Ok(true) => refresh.schedule_chunk_refresh(chunk_id.chunk_type(), chunk_id, now, 0),
            Ok(false) => {}
            Err(err) => alert!("requisition update for chunk {} failed: {}", chunk_id, err),
        }
    }
}

/// Chunk-list requisition scheduling (`spec.md` §4.6 last paragraph):
/// holds strong references on chunk lists whose descendant traversal is
/// pending, so they cannot be destroyed mid-traversal, and drains them
/// once a traversal pass schedules every reachable chunk for
/// recomputation.
#[derive(Default)]
pub struct PendingListTraversals {
    awaiting: Vec<ChunkListHandle>,
}

impl PendingListTraversals {
    pub fn enqueue(&mut self, list: ChunkListHandle) {
        self.awaiting.push(list);
    }

    pub fn pending_count(&self) -> usize {
        self.awaiting.len()
    }

    /// Walks every pending chunk list's descendants and schedules each
    /// reachable chunk for requisition recomputation, then releases the
    /// strong references (the traversal has confirmed completion).
    pub fn drain_and_schedule(&mut self, registry: &ObjectRegistry, scheduler: &mut RequisitionScheduler, now: MutationTimestamp, delay_ms: i64) {
        let mut scheduled: HashSet<ChunkId> = HashSet::new();
        for list in self.awaiting.drain(..) {
            let visitor = ChunkTreeVisitor::new(&list, None, None);
            for leaf in visitor.collect_all(registry) {
                if let Some(chunk) = leaf.chunk.upgrade() {
                    let id = chunk.borrow().id;
                    if scheduled.insert(id) {
                        scheduler.schedule(id, now, delay_ms);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cm_api_types::{ChunkType, ObjectId, TransactionId};
    use cm_registry::{ChunkListKind, ChunkTreeChildRef, MediumRegistry};

    fn new_registry() -> ObjectRegistry {
        ObjectRegistry::new(MediumRegistry::bootstrap(cm_config::MediumRegistryConfig::default()), CellTag(0))
    }

    struct FixedPolicy;
    impl OwningNodePolicySource for FixedPolicy {
        fn policy_for(&self, _node: NodeId) -> Option<OwningNodePolicy> {
            Some(OwningNodePolicy { account: AccountId(1), medium: 0, replication_factor: 3, data_parts_only: false, vital: true })
        }
    }

    #[test]
    fn ownerless_chunk_keeps_requisition_unchanged() {
        let mut reg = new_registry();
        let orphan = reg.create_chunk_list(ChunkListKind::Static);
        let orphan_id = orphan.borrow().id;
        let requisition = compute_effective_requisition(&reg, &[orphan_id], false, &FixedPolicy);
        assert!(requisition.is_none());
    }

    #[test]
    fn owned_chunk_computes_requisition_and_applies_it() {
        let mut reg = new_registry();
        let owner = reg.create_chunk_list(ChunkListKind::Static);
        owner.borrow_mut().owning_nodes.push(NodeId(9));
        let owner_id = owner.borrow().id;
        // A sentinel distinct from any real interned index (which starts at 0),
        // so the first real assignment below is observably a change.
        let chunk = reg.create_chunk(ChunkType::Regular, 1, None, u32::MAX, TransactionId(0), None).unwrap();
        let chunk_id = chunk.borrow().id;
        reg.attach_to_chunk_list(owner_id, &[ChunkTreeChildRef::Chunk(chunk_id)]).unwrap();

        let new_requisition = compute_effective_requisition(&reg, &[owner_id], false, &FixedPolicy).unwrap();
        let changed = apply_requisition_update(&mut reg, CellTag(0), chunk_id, new_requisition).unwrap();
        assert!(changed);
        assert_ne!(chunk.borrow().local_requisition_index, u32::MAX);

        // Re-applying the identical requisition is a no-op.
        let same = compute_effective_requisition(&reg, &[owner_id], false, &FixedPolicy).unwrap();
        let changed_again = apply_requisition_update(&mut reg, CellTag(0), chunk_id, same).unwrap();
        assert!(!changed_again);
    }

    #[test]
    fn pending_list_traversal_schedules_every_descendant_once() {
        let mut reg = new_registry();
        let root = reg.create_chunk_list(ChunkListKind::Static);
        let root_id = root.borrow().id;
        let chunk = reg.create_chunk(ChunkType::Regular, 1, None, 0, TransactionId(0), None).unwrap();
        let chunk_id = chunk.borrow().id;
        reg.attach_to_chunk_list(root_id, &[ChunkTreeChildRef::Chunk(chunk_id)]).unwrap();

        let mut pending = PendingListTraversals::default();
        pending.enqueue(root.clone());
        let mut scheduler = RequisitionScheduler::default();
        pending.drain_and_schedule(&reg, &mut scheduler, 0, 0);
        assert_eq!(scheduler.blob.pending_count(), 1);
        assert_eq!(pending.pending_count(), 0);
        let _ = ObjectId(0);
    }
}
