//! The external-facing facade (`spec.md` §6): wires `cm-registry`'s object
//! model, `placement`, `jobs`, `refresh`, `sealer`, `merger`, `autotomizer`,
//! `requisition_propagation`, `expiration` and `replica_state` into one
//! `ChunkManager` that a caller drives with the request/response DTOs from
//! `cm_api_types::requests`. Grounded on the teacher's `DataStore` as the
//! single facade other code reaches storage through
//! (`pbs-datastore/src/datastore.rs`): every method here either delegates
//! straight to one of those modules or performs the small amount of
//! cross-module bookkeeping (statistics bubbling, resource-limit sync,
//! node-queue fan-out) that no single module owns on its own.

use cm_api_types::requests::{
    AttachChunkTreesRequest, AttachChunkTreesResponse, ConfirmChunkRequest, ConfirmChunkResponse,
    CreateChunkListsRequest, CreateChunkRequest, CreateChunkResponse, ExportChunksRequest, HeartbeatJobRequest,
    HeartbeatJobResponse, ImportChunksRequest, SealChunkRequest, UnstageChunkTreeRequest,
};
use cm_api_types::requests::ChunkStatistics;
use cm_api_types::{
    CellTag, ChunkId, ChunkManagerError, FullHeartbeatRequest, IncrementalHeartbeatRequest, NodeDisposalRequest,
    NodeId, ObjectId, ReplicaHeartbeatResponse, ReplicaListKind, Result,
};
use cm_config::{ManagerConfig, MutationTimestamp};
use cm_registry::{ChunkListKind, ChunkTreeChildRef, MediumRegistry, ObjectRegistry, ReplicaTuple, Requisition, RequisitionEntry, ReplicationPolicy, Statistics};

use crate::autotomizer;
use crate::expiration::{self, ExportTracker};
use crate::health::{self, HealthSnapshot};
use crate::jobs::JobController;
use crate::merger::MergeCoordinator;
use crate::node::{NodeRegistry, ReplicaCoordinate};
use crate::placement::Placement;
use crate::refresh::{self, GlobalStatusSets, RefreshSchedulers};
use crate::replica_state;
use crate::requisition_propagation::{self, OwningNodePolicySource, PendingListTraversals, RequisitionScheduler};
use crate::sealer::{self, QuorumReporter};

/// Owns every piece of master-side chunk-management state (`spec.md` §2-§3)
/// and exposes it through the §6 request/response surface. A single
/// automaton: no method here spawns a thread or holds a lock, matching the
/// cooperative single-threaded model `spec.md` §5 requires.
pub struct ChunkManager {
    pub registry: ObjectRegistry,
    pub nodes: NodeRegistry,
    pub placement: Placement,
    pub jobs: JobController,
    pub refresh: RefreshSchedulers,
    pub status: GlobalStatusSets,
    pub requisition_scheduler: RequisitionScheduler,
    pub pending_list_traversals: PendingListTraversals,
    pub merger: MergeCoordinator,
    pub exports: ExportTracker,
    config: ManagerConfig,
    cell_tag: CellTag,
    next_chunk_salt: u32,
}

impl ChunkManager {
    pub fn new(config: ManagerConfig, cell_tag: CellTag) -> Self {
        let media = MediumRegistry::bootstrap(config.medium_registry.clone());
        let registry = ObjectRegistry::new(media, cell_tag);
        let nodes = NodeRegistry::new(config.refresh.replication_priority_count);
        let placement = Placement::new(&config);
        ChunkManager {
            registry,
            nodes,
            placement,
            jobs: JobController::new(),
            refresh: RefreshSchedulers::default(),
            status: GlobalStatusSets::default(),
            requisition_scheduler: RequisitionScheduler::default(),
            pending_list_traversals: PendingListTraversals::default(),
            merger: MergeCoordinator::default(),
            exports: ExportTracker::default(),
            config,
            cell_tag,
            next_chunk_salt: 0,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// A deterministic stand-in for the "random" disambiguator folded into
    /// a chunk id's third part (`spec.md` §6): there is no entropy source
    /// in this crate's dependency stack, so each call mixes the caller's
    /// timestamp with a counter that never repeats within a process
    /// lifetime, the same guarantee true randomness would provide here
    /// (the field only needs to not collide with a sibling created in the
    /// same millisecond, never to be unpredictable).
    fn next_salt(&mut self, now: MutationTimestamp) -> u32 {
        self.next_chunk_salt = self.next_chunk_salt.wrapping_add(0x9e37_79b9);
        (now as u32) ^ self.next_chunk_salt
    }

    fn chunk_statistics_of_list(&self, list_id: ObjectId) -> Option<ChunkStatistics> {
        let list = self.registry.get_chunk_list(list_id).ok()?;
        let list_ref = list.borrow();
        let s = &list_ref.statistics;
        Some(ChunkStatistics {
            row_count: s.row_count,
            chunk_count: s.chunk_count,
            uncompressed_data_size: s.uncompressed_data_size,
            compressed_data_size: s.compressed_data_size,
        })
    }

    /// `spec.md` §4.1 `create_chunk`: assembles the chunk's local
    /// requisition from the single entry the caller describes, stages the
    /// chunk under `transaction_id`, and attaches it to `chunk_list_id` if
    /// given. Account limit enforcement (`validate_resource_usage_increase`)
    /// belongs to the account subsystem, out of scope here (`spec.md` §1);
    /// the flag is accepted but not acted on.
    pub fn create_chunk(&mut self, req: &CreateChunkRequest, now: MutationTimestamp) -> Result<CreateChunkResponse> {
        let medium_index = self.registry.media.by_name(&req.medium_name)?.index;

        let entries = vec![RequisitionEntry {
            account: req.account,
            medium: medium_index,
            policy: ReplicationPolicy { factor: req.replication_factor, data_parts_only: false },
            committed: true,
        }];
        let mut requisition = Requisition::new(entries, req.vital);
        if req.chunk_type.is_erasure() {
            requisition = requisition.with_erasure_factor_forced();
        }
        let local_requisition_index = self.registry.requisitions.intern(requisition);

        let random = self.next_salt(now);
        let expiration_time = Some(now + self.config.expiration.staged_chunk_expiration_timeout_ms);
        let handle = match self.registry.create_chunk(req.chunk_type, random, req.chunk_id_hint, local_requisition_index, req.transaction_id, expiration_time) {
            Ok(h) => h,
            Err(err) => {
                self.registry.requisitions.release(local_requisition_index).ok();
                return Err(err);
            }
        };

        let chunk_id = {
            let mut chunk = handle.borrow_mut();
            chunk.erasure_codec = req.erasure_codec.clone();
            chunk.replication_factor_override = if req.replication_factor > 0 { Some(req.replication_factor) } else { None };
            chunk.read_quorum = req.read_quorum;
            chunk.write_quorum = req.write_quorum;
            chunk.replica_lag_limit = req.replica_lag_limit;
            chunk.overlayed = req.overlayed;
            chunk.movable = req.movable;
            chunk.consistent_replica_placement_hash = req.crp_hash.unwrap_or(0);
            chunk.id
        };

        if let Some(parent) = req.chunk_list_id {
            if let Err(err) = self.registry.attach_to_chunk_list(parent, &[ChunkTreeChildRef::Chunk(chunk_id)]) {
                self.registry.destroy_chunk(chunk_id);
                self.registry.requisitions.release(local_requisition_index).ok();
                return Err(err);
            }
        }

        Ok(CreateChunkResponse { chunk_id, medium_index })
    }

    /// `spec.md` §4.1 `confirm_chunk`: records the reported replicas as
    /// approved, fills in the chunk's content metadata, unstages it, and
    /// bubbles its initial statistics into every ancestor chunk list
    /// (`attach_to_chunk_list` never does this itself — the size is only
    /// known from here on). A no-op on an already-confirmed chunk.
    pub fn confirm_chunk(&mut self, req: &ConfirmChunkRequest, now: MutationTimestamp) -> Result<ConfirmChunkResponse> {
        let handle = self.registry.get_chunk(req.chunk_id)?;
        let was_confirmed = handle.borrow().confirmed;
        let chunk_type = handle.borrow().chunk_type();

        if !was_confirmed {
            for d in &req.replicas {
                let tuple = ReplicaTuple { node: d.node, replica_index: d.replica_index, medium_index: d.medium_index, state: d.state };
                if handle.borrow_mut().add_replica(ReplicaListKind::Stored, tuple).is_ok() {
                    let node = self.nodes.get_or_insert(d.node);
                    node.replicas.insert(ReplicaCoordinate { chunk: req.chunk_id, medium: d.medium_index, replica_index: d.replica_index });
                }
            }
            handle.borrow_mut().approved_replica_count = req.replicas.len() as u32;
            handle.borrow_mut().confirm(req.chunk_info.clone(), req.chunk_meta.clone());
            self.registry.unstage(req.chunk_id);

            let parents: Vec<ObjectId> = handle.borrow().parents().map(|(id, _)| id).collect();
            if !parents.is_empty() {
                let delta = Statistics {
                    chunk_count: 1,
                    row_count: req.chunk_info.row_count,
                    uncompressed_data_size: req.chunk_info.uncompressed_data_size,
                    compressed_data_size: req.chunk_info.compressed_data_size,
                    ..Default::default()
                };
                cm_registry::tree::bubble_statistics(&self.registry, &parents, &delta, false);
            }
            self.refresh.schedule_chunk_refresh(chunk_type, req.chunk_id, now, 0);
        }

        let statistics = if req.request_statistics {
            handle.borrow().parents().next().and_then(|(parent, _)| self.chunk_statistics_of_list(parent))
        } else {
            None
        };
        Ok(ConfirmChunkResponse { statistics })
    }

    pub fn seal_chunk(&mut self, req: &SealChunkRequest, now: MutationTimestamp) -> Result<()> {
        sealer::seal_chunk(&self.registry, &mut self.nodes, &mut self.refresh, now, req.chunk_id, &req.seal_info)
    }

    /// The periodic sealer-sweep driver (`spec.md` §4.5 step 1-2): asks
    /// `reporter` for quorum info and, if enough replicas answered,
    /// materializes the seal.
    pub fn attempt_seal(&mut self, chunk_id: ChunkId, now: MutationTimestamp, reporter: &dyn QuorumReporter) -> Result<bool> {
        sealer::attempt_seal(&self.registry, &mut self.nodes, &mut self.refresh, now, chunk_id, reporter)
    }

    /// `spec.md` §4.1 `create_chunk_lists`: allocates `count` empty, unowned
    /// chunk lists under `transaction_id` for the caller to populate and
    /// attach. Chunk lists have no staging/expiration timer of their own
    /// (unlike chunks, `spec.md` §3) — an abandoned one is simply destroyed
    /// the next time `unstage_chunk_tree` is called on an ancestor, or
    /// directly if the caller already knows it was never attached.
    pub fn create_chunk_lists(&mut self, req: &CreateChunkListsRequest) -> Vec<ObjectId> {
        (0..req.count).map(|_| self.registry.create_chunk_list(ChunkListKind::Static).borrow().id).collect()
    }

    /// `spec.md` §4.1 `attach_to_chunk_list`: resolves each child id against
    /// whichever object kind it actually is, attaches them all, and bubbles
    /// any chunk-list children's already-known statistics into `parent_id`.
    pub fn attach_chunk_trees(&mut self, req: &AttachChunkTreesRequest) -> Result<AttachChunkTreesResponse> {
        let mut children = Vec::with_capacity(req.child_ids.len());
        let mut added = Statistics::default();
        for &child_id in &req.child_ids {
            let child_ref = if let Ok(list) = self.registry.get_chunk_list(child_id) {
                added.add(&list.borrow().statistics);
                ChunkTreeChildRef::ChunkList(child_id)
            } else if self.registry.get_chunk_view(child_id).is_ok() {
                ChunkTreeChildRef::ChunkView(child_id)
            } else if self.registry.get_dynamic_store(child_id).is_ok() {
                ChunkTreeChildRef::DynamicStore(child_id)
            } else {
                return Err(ChunkManagerError::NoSuchChunkList(child_id));
            };
            children.push(child_ref);
        }

        self.registry.attach_to_chunk_list(req.parent_id, &children)?;
        cm_registry::tree::bubble_statistics(&self.registry, &[req.parent_id], &added, false);

        let statistics = if req.request_statistics { self.chunk_statistics_of_list(req.parent_id) } else { None };
        Ok(AttachChunkTreesResponse { statistics })
    }

    /// `spec.md` §4.1 `unstage_chunk_tree`: destroys `chunk_tree_id` once it
    /// is orphaned (no parents, no owning nodes). `recursive` additionally
    /// walks its children, destroying any chunk or chunk list left orphaned
    /// by the removal — the chosen resolution to an open question on how
    /// deep "recursive" reaches (`spec.md` open questions): it reclaims the
    /// whole abandoned subtree rather than leaving orphaned leftovers for a
    /// separate sweep.
    pub fn unstage_chunk_tree(&mut self, req: &UnstageChunkTreeRequest) -> Result<()> {
        self.destroy_chunk_list_tree(req.chunk_tree_id, req.recursive)
    }

    fn destroy_chunk_list_tree(&mut self, list_id: ObjectId, recursive: bool) -> Result<()> {
        let list = self.registry.get_chunk_list(list_id)?;
        if !list.borrow().is_orphaned() {
            return Err(ChunkManagerError::invalid_argument("chunk tree is still referenced, cannot unstage"));
        }
        let children = list.borrow().children.clone();
        self.registry.destroy_chunk_list(list_id);
        if !recursive {
            return Ok(());
        }
        for child in children {
            match child {
                ChunkTreeChildRef::Chunk(id) => {
                    if let Ok(handle) = self.registry.get_chunk(id) {
                        let emptied = handle.borrow_mut().remove_parent(list_id).unwrap_or(false);
                        if emptied {
                            self.registry.destroy_chunk(id);
                            self.status.remove_all(id);
                        }
                    }
                }
                ChunkTreeChildRef::ChunkList(id) => {
                    if let Ok(child_list) = self.registry.get_chunk_list(id) {
                        child_list.borrow_mut().remove_parent(list_id);
                        if child_list.borrow().is_orphaned() {
                            self.destroy_chunk_list_tree(id, true)?;
                        }
                    }
                }
                ChunkTreeChildRef::ChunkView(id) => {
                    self.registry.destroy_chunk_view(id);
                }
                ChunkTreeChildRef::DynamicStore(id) => {
                    self.registry.destroy_dynamic_store(id);
                }
            }
        }
        Ok(())
    }

    pub fn export_chunks(&mut self, req: &ExportChunksRequest) -> Result<()> {
        expiration::process_export_chunks(&self.registry, &mut self.exports, req)
    }

    pub fn acknowledge_export(&mut self, chunk_ids: &[ChunkId], destination_cell: CellTag) {
        expiration::acknowledge_export(&mut self.exports, chunk_ids, destination_cell);
    }

    pub fn import_chunks(&mut self, req: &ImportChunksRequest) -> Result<Vec<ChunkId>> {
        expiration::process_import_chunks(&mut self.registry, req)
    }

    /// The periodic expiration sweep (`spec.md` §4.7, E6): reclaims every
    /// staged chunk past its grace period, unless a cross-cell export still
    /// holds it open.
    pub fn unstage_expired_chunks(&mut self, now: MutationTimestamp) -> Vec<ChunkId> {
        let destroyed = expiration::unstage_expired_chunks(&mut self.registry, &self.exports, now);
        for &id in &destroyed {
            self.status.remove_all(id);
        }
        destroyed
    }

    /// `spec.md` §4.8 per-heartbeat job reconciliation. Syncs the node's
    /// reported resource limits before delegating: without this, a node's
    /// limits would stay at their zero default forever and no job could
    /// ever be issued to it.
    pub fn process_job_heartbeat(&mut self, req: &HeartbeatJobRequest, now: MutationTimestamp) -> HeartbeatJobResponse {
        {
            let node = self.nodes.get_or_insert(req.node);
            node.resource_limits = req.resource_limits.clone();
            node.reported_heartbeat = true;
        }
        self.jobs.process_heartbeat(&self.registry, &mut self.nodes, &self.placement, &mut self.refresh, &self.config, req, now)
    }

    pub fn process_full_heartbeat(&mut self, req: &FullHeartbeatRequest, now: MutationTimestamp) -> ReplicaHeartbeatResponse {
        replica_state::process_full_heartbeat(&self.registry, &mut self.nodes, &mut self.placement, &mut self.refresh, &self.config, req, now)
    }

    pub fn process_incremental_heartbeat(&mut self, req: &IncrementalHeartbeatRequest, now: MutationTimestamp) -> ReplicaHeartbeatResponse {
        replica_state::process_incremental_heartbeat(&self.registry, &mut self.nodes, &mut self.refresh, &self.config, req, now)
    }

    pub fn process_node_disposal(&mut self, req: &NodeDisposalRequest, now: MutationTimestamp) {
        replica_state::process_node_disposal(&self.registry, &mut self.nodes, &mut self.placement, &mut self.refresh, req, now);
    }

    pub fn assign_endorsement(&mut self, chunk_id: ChunkId, revision: u64) -> Option<NodeId> {
        replica_state::assign_endorsement(&self.registry, &mut self.nodes, chunk_id, revision)
    }

    /// Drains due chunks from both refresh scanners and runs the full
    /// status-classification + work-queue-dispatch pass on each (`spec.md`
    /// §4.3). Returns how many chunks were refreshed this pass.
    pub fn run_refresh_pass(&mut self, now: MutationTimestamp) -> usize {
        let max_batch = self.config.refresh.max_chunks_per_refresh;
        let ready = self.refresh.drain_ready(now, max_batch);
        let count = ready.len();
        for chunk_id in ready {
            let has_running_jobs = self.jobs.registry.has_running_jobs(chunk_id);
            refresh::refresh_chunk(&self.registry, &mut self.nodes, &self.placement, &mut self.status, has_running_jobs, &self.config, chunk_id);
        }
        count
    }

    /// Registers `list_id` for a future requisition-propagating descendant
    /// walk (`spec.md` §4.6 last paragraph) — e.g. called by the owning
    /// object/tablet subsystem (out of scope here) whenever a chunk list's
    /// `owning_nodes` changes.
    pub fn enqueue_requisition_traversal(&mut self, list_id: ObjectId) -> Result<()> {
        let list = self.registry.get_chunk_list(list_id)?;
        self.pending_list_traversals.enqueue(list);
        Ok(())
    }

    /// Drains any pending list traversals into individually-scheduled
    /// chunks, then recomputes and applies a batch of due chunks'
    /// requisitions (`spec.md` §4.6).
    pub fn run_requisition_pass(&mut self, now: MutationTimestamp, policy_source: &dyn OwningNodePolicySource) -> usize {
        let max_batch = self.config.refresh.max_chunks_per_refresh;
        self.pending_list_traversals.drain_and_schedule(&self.registry, &mut self.requisition_scheduler, now, 0);
        let ready = self.requisition_scheduler.drain_ready(now, max_batch);
        let count = ready.len();
        requisition_propagation::process_requisition_batch(&mut self.registry, self.cell_tag, &mut self.refresh, now, &ready, policy_source);
        count
    }

    /// Finds and commits one mergeable run under `list_id`, if any, then
    /// fans the node-side materialization job out to its write targets
    /// (`spec.md` §4.9).
    pub fn run_merge_pass(&mut self, list_id: ObjectId) -> Result<Option<(ChunkId, Vec<NodeId>)>> {
        let list = self.registry.get_chunk_list(list_id)?;
        let result = self.merger.schedule_chunk_merge(&mut self.registry, &mut self.nodes, &self.placement, &self.config, &list);
        if let Some((new_chunk_id, ref targets)) = result {
            for &node_id in targets {
                if let Some(node) = self.nodes.get_mut(node_id) {
                    node.merge_queue.push_back((new_chunk_id, targets.clone()));
                }
            }
        }
        Ok(result)
    }

    /// Splits `chunk_id` if it has grown past the autotomy ceiling, then
    /// fans the node-side split job out to its existing holders (`spec.md`
    /// §4.9).
    pub fn run_autotomize_pass(&mut self, chunk_id: ChunkId) -> Option<(ChunkId, Vec<NodeId>)> {
        let result = autotomizer::autotomize_chunk(&mut self.registry, &self.config, chunk_id);
        if let Some((new_chunk_id, ref holders)) = result {
            for &node_id in holders {
                if let Some(node) = self.nodes.get_mut(node_id) {
                    node.autotomy_queue.push_back((new_chunk_id, holders.clone()));
                }
            }
        }
        result
    }

    pub fn health_snapshot(&self) -> HealthSnapshot {
        health::snapshot(&self.nodes, &self.jobs, &self.status)
    }

    pub fn is_stable(&self) -> bool {
        self.health_snapshot().is_stable(self.config.stability.max_lost_vital_chunks)
    }

    pub fn recompute_crp_rings(&mut self) {
        self.placement.recompute_crp_rings(&self.nodes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cm_api_types::requests::{ChunkInfo, ChunkMeta, CreateChunkRequest, ReplicaDescriptor};
    use cm_api_types::{AccountId, ChunkType, ReplicaState, TransactionId};

    fn new_manager() -> ChunkManager {
        ChunkManager::new(ManagerConfig::default(), CellTag(0))
    }

    fn create_req(medium_name: &str, chunk_list_id: Option<ObjectId>) -> CreateChunkRequest {
        CreateChunkRequest {
            chunk_type: ChunkType::Regular,
            account: AccountId(1),
            medium_name: medium_name.to_string(),
            replication_factor: 3,
            erasure_codec: None,
            read_quorum: 1,
            write_quorum: 1,
            replica_lag_limit: None,
            overlayed: false,
            crp_hash: None,
            chunk_list_id,
            transaction_id: TransactionId(1),
            movable: true,
            vital: true,
            validate_resource_usage_increase: false,
            chunk_id_hint: None,
        }
    }

    #[test]
    fn create_then_confirm_bubbles_statistics_into_parent() {
        let mut mgr = new_manager();
        let list = mgr.registry.create_chunk_list(ChunkListKind::Static);
        let list_id = list.borrow().id;

        let created = mgr.create_chunk(&create_req("default", Some(list_id)), 0).unwrap();
        assert!(mgr.registry.is_staged(created.chunk_id));

        let confirm_req = ConfirmChunkRequest {
            chunk_id: created.chunk_id,
            replicas: vec![ReplicaDescriptor { node: NodeId(1), replica_index: 0, medium_index: created.medium_index, state: ReplicaState::Generic }],
            chunk_info: ChunkInfo { row_count: 50, uncompressed_data_size: 500, compressed_data_size: 250, disk_space: 250 },
            chunk_meta: ChunkMeta::default(),
            request_statistics: true,
        };
        let resp = mgr.confirm_chunk(&confirm_req, 10).unwrap();

        assert!(!mgr.registry.is_staged(created.chunk_id));
        assert_eq!(list.borrow().statistics.row_count, 50);
        assert_eq!(list.borrow().statistics.chunk_count, 1);
        assert_eq!(resp.statistics.unwrap().row_count, 50);
        assert_eq!(mgr.nodes.get(NodeId(1)).unwrap().replicas.len(), 1);
    }

    #[test]
    fn job_heartbeat_syncs_resource_limits_before_draining() {
        let mut mgr = new_manager();
        let req = HeartbeatJobRequest {
            node: NodeId(7),
            reported_jobs: Vec::new(),
            resource_usage: Default::default(),
            resource_limits: cm_api_types::requests::NodeResources { replication_slots: 4, ..Default::default() },
        };
        mgr.process_job_heartbeat(&req, 0);
        assert_eq!(mgr.nodes.get(NodeId(7)).unwrap().resource_limits.replication_slots, 4);
    }

    #[test]
    fn attach_chunk_trees_rolls_up_child_list_statistics() {
        let mut mgr = new_manager();
        let parent = mgr.registry.create_chunk_list(ChunkListKind::Static);
        let parent_id = parent.borrow().id;
        let child = mgr.registry.create_chunk_list(ChunkListKind::Static);
        let child_id = child.borrow().id;
        child.borrow_mut().statistics.row_count = 77;
        child.borrow_mut().statistics.chunk_count = 2;

        let req = AttachChunkTreesRequest { parent_id, child_ids: vec![child_id], transaction_id: None, request_statistics: true };
        let resp = mgr.attach_chunk_trees(&req).unwrap();
        assert_eq!(resp.statistics.unwrap().row_count, 77);
        assert_eq!(parent.borrow().statistics.chunk_count, 2);
    }

    #[test]
    fn recursive_unstage_reclaims_orphaned_subtree() {
        let mut mgr = new_manager();
        let root = mgr.registry.create_chunk_list(ChunkListKind::Static);
        let root_id = root.borrow().id;
        let created = mgr.create_chunk(&create_req("default", Some(root_id)), 0).unwrap();
        let chunk_id = created.chunk_id;

        let req = UnstageChunkTreeRequest { chunk_tree_id: root_id, recursive: true };
        mgr.unstage_chunk_tree(&req).unwrap();

        assert!(mgr.registry.get_chunk_list(root_id).is_err());
        assert!(!mgr.registry.chunk_exists(chunk_id));
    }

    #[test]
    fn unstage_refuses_a_still_referenced_list() {
        let mut mgr = new_manager();
        let parent = mgr.registry.create_chunk_list(ChunkListKind::Static);
        let parent_id = parent.borrow().id;
        let child = mgr.registry.create_chunk_list(ChunkListKind::Static);
        let child_id = child.borrow().id;
        mgr.registry
            .attach_to_chunk_list(parent_id, &[ChunkTreeChildRef::ChunkList(child_id)])
            .unwrap();

        let req = UnstageChunkTreeRequest { chunk_tree_id: child_id, recursive: false };
        assert!(mgr.unstage_chunk_tree(&req).is_err());
    }

    #[test]
    fn health_snapshot_reflects_node_count_after_heartbeat() {
        let mut mgr = new_manager();
        let req = FullHeartbeatRequest { node: NodeId(3), total_space: 1_000, replicas: Vec::new() };
        mgr.process_full_heartbeat(&req, 0);
        let snap = mgr.health_snapshot();
        assert_eq!(snap.node_count, 1);
        assert_eq!(snap.online_node_count, 1);
        assert!(mgr.is_stable());
    }
}
