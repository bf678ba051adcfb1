//! Chunk status computation and the refresh scanners (`spec.md` §4.3,
//! §4.3.1). Grounded on the teacher's `DataStore::garbage_collection`
//! (`pbs-datastore/src/datastore.rs`) for the overall shape of "walk a
//! scanned set, recompute a per-item status, roll results into a handful of
//! tracked sets, log anomalies instead of aborting" — generalized from a
//! mark-and-sweep GC pass to per-chunk health classification.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use cm_api_types::{ChunkId, ChunkType, MediumIndex, NodeId, ReplicaIndex, ReplicaListKind};
use cm_config::{ManagerConfig, MutationTimestamp};
use cm_registry::{ChunkStatus, ObjectRegistry};

use crate::alert;
use crate::node::NodeRegistry;
use crate::placement::Placement;

#[derive(Debug, Clone, Default)]
pub struct PerMediumStatus {
    pub status: ChunkStatus,
    pub replica_count: Vec<u32>,
    pub decommissioned_replica_count: Vec<u32>,
    pub replication_requests: Vec<(ReplicaIndex, u32)>,
    pub decommissioned_removal_requests: Vec<(NodeId, ReplicaIndex)>,
    pub balancing_removal_requests: Vec<(ReplicaIndex, u32)>,
    pub unsafely_placed_replica: Option<NodeId>,
    pub missing_replicas: Vec<NodeId>,
    /// Erasure part indices with no surviving replica (`spec.md` §8 E3).
    /// Empty for non-erasure chunks and for erasure chunks with no gaps.
    pub erased_indexes: Vec<ReplicaIndex>,
}

#[derive(Debug, Default)]
pub struct RefreshOutcome {
    pub per_medium: HashMap<MediumIndex, PerMediumStatus>,
    pub globally_lost: bool,
    pub globally_precarious: bool,
}

/// The process-wide health sets (`spec.md` §4.3, §9 "Global mutable
/// sets"). Mutated only by [`refresh_chunk`], read anywhere else.
#[derive(Debug, Default)]
pub struct GlobalStatusSets {
    pub lost_chunks: HashSet<ChunkId>,
    pub lost_vital_chunks: HashSet<ChunkId>,
    pub overreplicated_chunks: HashSet<ChunkId>,
    pub underreplicated_chunks: HashSet<ChunkId>,
    pub data_missing_chunks: HashSet<ChunkId>,
    pub parity_missing_chunks: HashSet<ChunkId>,
    pub quorum_missing_chunks: HashSet<ChunkId>,
    pub unsafely_placed_chunks: HashSet<ChunkId>,
    pub inconsistently_placed_chunks: HashSet<ChunkId>,
    pub precarious_chunks: HashSet<ChunkId>,
    pub precarious_vital_chunks: HashSet<ChunkId>,
    pub oldest_part_missing_chunks: HashSet<ChunkId>,
}

macro_rules! reconcile {
    ($set:expr, $id:expr, $present:expr) => {
        if $present {
            $set.insert($id);
        } else {
            $set.remove(&$id);
        }
    };
}

impl GlobalStatusSets {
    fn reconcile(&mut self, id: ChunkId, outcome: &RefreshOutcome, vital: bool) {
        let any = |flag: ChunkStatus| outcome.per_medium.values().any(|m| m.status.contains(flag));
        reconcile!(self.lost_chunks, id, outcome.globally_lost);
        reconcile!(self.lost_vital_chunks, id, outcome.globally_lost && vital);
        reconcile!(self.overreplicated_chunks, id, any(ChunkStatus::OVERREPLICATED));
        reconcile!(self.underreplicated_chunks, id, any(ChunkStatus::UNDERREPLICATED));
        reconcile!(self.data_missing_chunks, id, any(ChunkStatus::DATA_MISSING));
        reconcile!(self.parity_missing_chunks, id, any(ChunkStatus::PARITY_MISSING));
        reconcile!(self.quorum_missing_chunks, id, any(ChunkStatus::QUORUM_MISSING));
        reconcile!(self.unsafely_placed_chunks, id, any(ChunkStatus::UNSAFELY_PLACED));
        reconcile!(self.inconsistently_placed_chunks, id, any(ChunkStatus::INCONSISTENTLY_PLACED));
        reconcile!(self.precarious_chunks, id, outcome.globally_precarious);
        reconcile!(self.precarious_vital_chunks, id, outcome.globally_precarious && vital);
    }

    pub fn remove_all(&mut self, id: ChunkId) {
        for set in [
            &mut self.lost_chunks,
            &mut self.lost_vital_chunks,
            &mut self.overreplicated_chunks,
            &mut self.underreplicated_chunks,
            &mut self.data_missing_chunks,
            &mut self.parity_missing_chunks,
            &mut self.quorum_missing_chunks,
            &mut self.unsafely_placed_chunks,
            &mut self.inconsistently_placed_chunks,
            &mut self.precarious_chunks,
            &mut self.precarious_vital_chunks,
            &mut self.oldest_part_missing_chunks,
        ] {
            set.remove(&id);
        }
    }
}

fn erasure_part_counts(codec: &str) -> (u32, u32, u32) {
    // LRC-d-p-l: d data parts, p global parity, l local parity; total = d+p+l.
    // Defaults to a plain 3-replica-equivalent (no erasure) for unrecognized codecs.
    let parts: Vec<&str> = codec.split('-').collect();
    if parts.len() == 4 && parts[0] == "LRC" {
        if let (Ok(d), Ok(p), Ok(l)) = (parts[1].parse(), parts[2].parse(), parts[3].parse()) {
            return (d, p, l);
        }
    }
    (1, 0, 0)
}

/// Computes per-medium and cross-medium status for one chunk (`spec.md`
/// §4.3). Does not itself push work-queue entries; callers feed the
/// returned [`RefreshOutcome`] to [`dispatch_work_queues`].
pub fn compute_status(
    registry: &ObjectRegistry,
    nodes: &NodeRegistry,
    placement: &Placement,
    chunk_id: ChunkId,
) -> Option<RefreshOutcome> {
    let chunk_handle = registry.get_chunk(chunk_id).ok()?;
    let chunk = chunk_handle.borrow();
    let requisition = registry.requisitions.get(chunk.local_requisition_index)?;

    let mut outcome = RefreshOutcome::default();
    let mut all_required_lost = true;
    let mut any_required_medium = false;
    let mut all_transient = true;
    let mut any_replica = false;

    for medium_index in requisition.media() {
        let medium = match registry.media.get(medium_index) {
            Ok(m) => m,
            Err(_) => continue,
        };
        if medium.cache {
            continue;
        }
        any_required_medium = true;
        if !medium.transient {
            all_transient = false;
        }

        let aggregated_rf = requisition.aggregated_factor(medium_index).max(1);
        let is_erasure = chunk.chunk_type().is_erasure();
        let is_journal = chunk.chunk_type().is_journal();

        let (data_parts, parity_parts, local_parts) = if is_erasure {
            chunk.erasure_codec.as_deref().map(erasure_part_counts).unwrap_or((1, 0, 0))
        } else {
            (1, 0, 0)
        };
        // Regular and journal chunks have a single replication "part": every
        // replica, whatever replica_index it reports, counts against one R
        // (`spec.md` §4.3 "compare against the medium-capped replication
        // factor R"). Only erasure chunks have more than one part index.
        let total_parts = if is_erasure { data_parts + parity_parts + local_parts } else { 1 };

        let mut status = ChunkStatus::NONE;
        let mut replica_count = vec![0u32; total_parts.max(1) as usize];
        let mut decommissioned_count = vec![0u32; total_parts.max(1) as usize];
        let mut decommissioned_nodes: Vec<Vec<NodeId>> = vec![Vec::new(); total_parts.max(1) as usize];
        let mut sealed_count = 0u32;
        let mut unsealed_count = 0u32;
        let mut max_rack_count: HashMap<Option<String>, u32> = HashMap::new();
        let mut unsafely_placed_replica = None;

        for list_kind in [ReplicaListKind::Stored, ReplicaListKind::Cached] {
            for r in chunk.replica_list(list_kind) {
                if r.medium_index != medium_index {
                    continue;
                }
                any_replica = true;
                let node = nodes.get(r.node);
                let decommissioned = node.map(|n| n.decommissioned).unwrap_or(false);
                let idx = (r.replica_index as usize).min(replica_count.len().saturating_sub(1));
                if decommissioned {
                    decommissioned_count[idx] += 1;
                    decommissioned_nodes[idx].push(r.node);
                } else {
                    replica_count[idx] += 1;
                }
                if is_journal {
                    if r.state.is_sealed() {
                        sealed_count += 1;
                    } else {
                        unsealed_count += 1;
                    }
                }
                if let Some(node) = node {
                    let rack_count = max_rack_count.entry(node.rack.clone()).or_insert(0);
                    *rack_count += 1;
                    let cap = placement.max_replicas_per_rack(medium, is_erasure);
                    if *rack_count > cap {
                        status |= ChunkStatus::UNSAFELY_PLACED;
                        unsafely_placed_replica = Some(r.node);
                    }
                }
            }
        }

        let mut replication_requests = Vec::new();
        let mut decommissioned_removal_requests = Vec::new();
        let mut balancing_removal_requests = Vec::new();
        let mut part_missing = false;
        let mut parity_missing = false;
        let mut erased_indexes = Vec::new();

        for idx in 0..total_parts as usize {
            let r = replica_count[idx];
            let d = decommissioned_count[idx];
            let required = if is_erasure { 1 } else { aggregated_rf as u32 };
            if r + d == 0 {
                erased_indexes.push(idx);
                if is_erasure {
                    if (idx as u32) < data_parts {
                        part_missing = true;
                    } else {
                        parity_missing = true;
                    }
                }
                continue;
            }
            if r < required {
                replication_requests.push((idx as ReplicaIndex, required - r));
            } else if r == required && d > 0 {
                decommissioned_removal_requests
                    .extend(decommissioned_nodes[idx].iter().map(|&n| (n, idx as ReplicaIndex)));
            } else if r > required {
                balancing_removal_requests.push((idx as ReplicaIndex, r - required));
            }
        }

        if is_erasure {
            let missing = erased_indexes.len() as u32;
            let repairable = missing <= parity_parts + local_parts;
            if !repairable {
                status |= ChunkStatus::LOST;
            } else if !erased_indexes.is_empty() {
                if part_missing {
                    status |= ChunkStatus::DATA_MISSING | ChunkStatus::UNDERREPLICATED;
                }
                if parity_missing {
                    status |= ChunkStatus::PARITY_MISSING;
                }
            }
        } else if is_journal {
            if sealed_count > 0 {
                status |= ChunkStatus::SEALED;
                if unsealed_count > 0 {
                    // handled by the sealer's per-node seal queue, not here
                }
            } else if chunk.read_quorum > 0
                && (replica_count[0] + decommissioned_count[0]) < chunk.read_quorum
            {
                status |= ChunkStatus::QUORUM_MISSING;
            }
            if !replication_requests.is_empty() {
                status |= ChunkStatus::UNDERREPLICATED;
            }
            if !balancing_removal_requests.is_empty() || !decommissioned_removal_requests.is_empty() {
                status |= ChunkStatus::OVERREPLICATED;
            }
            if replica_count.iter().chain(decommissioned_count.iter()).all(|c| *c == 0) {
                status |= ChunkStatus::LOST;
            }
        } else {
            if replica_count[0] + decommissioned_count[0] == 0 {
                status |= ChunkStatus::LOST;
            } else if !replication_requests.is_empty() {
                status |= ChunkStatus::UNDERREPLICATED;
            }
            if !balancing_removal_requests.is_empty() || !decommissioned_removal_requests.is_empty() {
                status |= ChunkStatus::OVERREPLICATED;
            }
        }

        let mut missing_replicas = Vec::new();
        if chunk.is_crp_managed() {
            let deterministic = placement.crp_targets(chunk.consistent_replica_placement_hash, medium_index, nodes);
            let actual: HashSet<NodeId> = chunk
                .replica_list(ReplicaListKind::Stored)
                .iter()
                .filter(|r| r.medium_index == medium_index)
                .map(|r| r.node)
                .collect();
            let deviates = deterministic.iter().any(|n| !actual.contains(n));
            if deviates {
                status |= ChunkStatus::INCONSISTENTLY_PLACED;
                missing_replicas = deterministic.into_iter().filter(|n| !actual.contains(n)).collect();
            }
        }

        if !status.contains(ChunkStatus::LOST) {
            all_required_lost = false;
        }

        outcome.per_medium.insert(
            medium_index,
            PerMediumStatus {
                status,
                replica_count,
                decommissioned_replica_count: decommissioned_count,
                replication_requests,
                decommissioned_removal_requests,
                balancing_removal_requests,
                unsafely_placed_replica,
                missing_replicas,
                erased_indexes: erased_indexes.iter().map(|&idx| idx as ReplicaIndex).collect(),
            },
        );
    }

    outcome.globally_lost = any_required_medium && all_required_lost;
    outcome.globally_precarious = any_replica && all_transient && requisition.vital;

    if chunk.chunk_type().is_journal() && chunk.parent_count() > 1 {
        alert!(
            "journal chunk {} has a non-trivial chunk-tree structure ({} parents)",
            chunk_id,
            chunk.parent_count()
        );
    }

    Some(outcome)
}

/// Pushes work-queue entries derived from `outcome`, unless the chunk
/// already has jobs running (`spec.md` §4.3 "Work-queue updates (only if
/// the chunk has no running jobs)").
pub fn dispatch_work_queues(
    registry: &ObjectRegistry,
    nodes: &mut NodeRegistry,
    placement: &Placement,
    config: &ManagerConfig,
    chunk_id: ChunkId,
    outcome: &RefreshOutcome,
    has_running_jobs: bool,
) {
    if has_running_jobs {
        return;
    }
    let Ok(chunk_handle) = registry.get_chunk(chunk_id) else { return };
    let chunk = chunk_handle.borrow();

    for (&medium_index, per_medium) in &outcome.per_medium {
        for (node_id, replica_index) in &per_medium.decommissioned_removal_requests {
            if let Some(node) = nodes.get_mut(*node_id) {
                node.removal_queue.push_back(crate::node::ReplicaCoordinate {
                    chunk: chunk_id,
                    medium: medium_index,
                    replica_index: *replica_index,
                });
            }
        }
        for (replica_index, count) in &per_medium.balancing_removal_requests {
            let targets = placement.get_removal_targets(registry, nodes, chunk_id, medium_index, *replica_index, *count as usize);
            for node_id in targets {
                if let Some(node) = nodes.get_mut(node_id) {
                    node.removal_queue.push_back(crate::node::ReplicaCoordinate {
                        chunk: chunk_id,
                        medium: medium_index,
                        replica_index: *replica_index,
                    });
                }
            }
        }
        for (replica_index, _count) in &per_medium.replication_requests {
            // Priority is keyed on how many replicas already exist, not how
            // many are still needed: fewer survivors means higher priority
            // (`spec.md` §4.3 "priority = clamp(current_replica_count-1, ...)").
            let current = per_medium.replica_count.get(*replica_index as usize).copied().unwrap_or(0);
            let priority = (current.saturating_sub(1) as usize).min(config.refresh.replication_priority_count - 1);
            for r in chunk.replica_list(ReplicaListKind::Stored).iter().filter(|r| r.medium_index == medium_index) {
                if let Some(node) = nodes.get_mut(r.node) {
                    if let Some(queue) = node.replication_queues.get_mut(priority) {
                        queue.push_back((chunk_id, *replica_index));
                    }
                }
            }
        }
        if per_medium.status.contains(ChunkStatus::SEALED) {
            for r in chunk
                .replica_list(ReplicaListKind::Stored)
                .iter()
                .filter(|r| r.medium_index == medium_index && !r.state.is_sealed())
            {
                if let Some(node) = nodes.get_mut(r.node) {
                    node.seal_queue.push_back(chunk_id);
                }
            }
        }
        if per_medium.status.intersects(ChunkStatus::DATA_MISSING | ChunkStatus::PARITY_MISSING)
            && !per_medium.status.contains(ChunkStatus::LOST)
        {
            let target_node = placement.pick_repair_slot_node(nodes, medium_index);
            if let Some(node_id) = target_node {
                if let Some(node) = nodes.get_mut(node_id) {
                    node.repair_queue.push_back((chunk_id, per_medium.erased_indexes.clone()));
                }
            }
        }
    }
}

/// Backing structure for the two refresh scanners (`spec.md` §4.3.1): a
/// delay-ordered min-heap rather than the original's intrusive linked list
/// plus scan-flag, which has no safe equivalent without `unsafe`. Externally
/// this is observationally identical: `schedule` is idempotent per chunk
/// (a "scan flag" equivalent, tracked via `scheduled`), entries are drained
/// in non-decreasing delay order, and a stale (destroyed) chunk is skipped
/// rather than erroring — `ObjectRegistry::get_chunk` is the liveness
/// re-check the original performs through a weak reference.
#[derive(Default)]
pub struct RefreshScanner {
    heap: BinaryHeap<Reverse<(MutationTimestamp, ChunkId)>>,
    scheduled: HashSet<ChunkId>,
}

impl RefreshScanner {
    pub fn schedule(&mut self, chunk_id: ChunkId, ready_at: MutationTimestamp) {
        if self.scheduled.insert(chunk_id) {
            self.heap.push(Reverse((ready_at, chunk_id)));
        }
    }

    /// Pops up to `max_batch` chunks whose delay has elapsed as of `now`.
    pub fn drain_ready(&mut self, now: MutationTimestamp, max_batch: usize) -> Vec<ChunkId> {
        let mut out = Vec::new();
        while out.len() < max_batch {
            let Some(&Reverse((ready_at, _))) = self.heap.peek() else { break };
            if ready_at > now {
                break;
            }
            let Reverse((_, chunk_id)) = self.heap.pop().unwrap();
            self.scheduled.remove(&chunk_id);
            out.push(chunk_id);
        }
        out
    }

    pub fn pending_count(&self) -> usize {
        self.heap.len()
    }
}

#[derive(Default)]
pub struct RefreshSchedulers {
    pub blob: RefreshScanner,
    pub journal: RefreshScanner,
}

impl RefreshSchedulers {
    pub fn schedule_chunk_refresh(&mut self, chunk_type: ChunkType, chunk_id: ChunkId, now: MutationTimestamp, delay_ms: i64) {
        let scanner = if chunk_type.is_journal() { &mut self.journal } else { &mut self.blob };
        scanner.schedule(chunk_id, now + delay_ms);
    }

    /// Re-enqueues every chunk replicated on `node` (`spec.md` §4.3.1
    /// `schedule_node_refresh`).
    pub fn schedule_node_refresh(&mut self, node: &crate::node::Node, now: MutationTimestamp) {
        let mut seen = HashSet::new();
        for r in node.replicas.iter() {
            if seen.insert(r.chunk) {
                self.blob.schedule(r.chunk, now);
                self.journal.schedule(r.chunk, now);
            }
        }
    }

    /// Drains both scanners up to `max_batch` total, blob chunks first
    /// (`spec.md` §4.3.1).
    pub fn drain_ready(&mut self, now: MutationTimestamp, max_batch: usize) -> Vec<ChunkId> {
        let mut out = self.blob.drain_ready(now, max_batch);
        let remaining = max_batch.saturating_sub(out.len());
        out.extend(self.journal.drain_ready(now, remaining));
        out
    }
}

/// The per-chunk refresh driver (`spec.md` §4.3): computes status,
/// reconciles it into `status` (the only place [`GlobalStatusSets`] is
/// mutated), and dispatches work-queue entries. Returns `None` if the chunk
/// no longer exists.
pub fn refresh_chunk(
    registry: &ObjectRegistry,
    nodes: &mut NodeRegistry,
    placement: &Placement,
    status: &mut GlobalStatusSets,
    has_running_jobs: bool,
    config: &ManagerConfig,
    chunk_id: ChunkId,
) -> Option<RefreshOutcome> {
    let outcome = compute_status(registry, nodes, placement, chunk_id)?;
    let vital = registry
        .get_chunk(chunk_id)
        .ok()
        .and_then(|c| registry.requisitions.get(c.borrow().local_requisition_index).map(|r| r.vital))
        .unwrap_or(false);
    status.reconcile(chunk_id, &outcome, vital);
    dispatch_work_queues(registry, nodes, placement, config, chunk_id, &outcome, has_running_jobs);
    Some(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scanner_dedupes_and_drains_in_delay_order() {
        let mut scanner = RefreshScanner::default();
        let c1 = ChunkId::new(1, 0, ChunkType::Regular, cm_api_types::CellTag(0));
        let c2 = ChunkId::new(2, 0, ChunkType::Regular, cm_api_types::CellTag(0));
        scanner.schedule(c1, 100);
        scanner.schedule(c1, 50); // second schedule of the same chunk is a no-op
        scanner.schedule(c2, 10);
        assert_eq!(scanner.pending_count(), 2);
        let ready = scanner.drain_ready(100, 10);
        assert_eq!(ready, vec![c2, c1]);
    }

    #[test]
    fn erasure_part_counts_parses_lrc_codec() {
        assert_eq!(erasure_part_counts("LRC-12-2-2"), (12, 2, 2));
        assert_eq!(erasure_part_counts("unknown"), (1, 0, 0));
    }
}
