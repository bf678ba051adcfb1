//! The job registry and controller (`spec.md` §4.8, SPEC_FULL.md §C.1-C.4).
//! Grounded on the teacher's `pbs-datastore` GC/prune job bookkeeping in
//! spirit (a per-node work queue drained up to a resource ceiling, reported
//! back through a status round-trip) but reshaped around heartbeats rather
//! than a cron-style task runner, since that is how `spec.md` §4.8 drives it.

use std::collections::{HashMap, HashSet};

use cm_api_types::requests::{
    HeartbeatJobRequest, HeartbeatJobResponse, JobStartInstruction, ReplicaDescriptor, ReportedJobStatus,
};
use cm_api_types::{ChunkId, JobId, JobResources, JobState, JobType, MergeMode, NodeId, ReplicaIndex, ReplicaListKind};
use cm_config::{JobConfig, ManagerConfig, MutationTimestamp};
use cm_registry::ObjectRegistry;

use crate::node::NodeRegistry;
use crate::placement::Placement;
use crate::refresh::RefreshSchedulers;

#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub job_type: JobType,
    pub chunk_id: ChunkId,
    pub node: NodeId,
    pub replica_index: ReplicaIndex,
    pub target_replicas: Vec<ReplicaDescriptor>,
    pub start_time: MutationTimestamp,
    pub resource_usage: JobResources,
    pub state: JobState,
    pub error: Option<String>,
    /// Distinguishes a draining (decommission) removal from a balancing one
    /// (SPEC_FULL.md §C.1), so the completion hook can tell which resource
    /// bookkeeping applies.
    pub decommission: bool,
    pub merge_mode: Option<MergeMode>,
}

#[derive(Default)]
pub struct JobRegistry {
    jobs: HashMap<JobId, Job>,
    by_node: HashMap<NodeId, HashSet<JobId>>,
    by_chunk: HashMap<ChunkId, HashSet<JobId>>,
    next_id: u64,
}

impl JobRegistry {
    pub fn new() -> Self {
        JobRegistry::default()
    }

    fn allocate_id(&mut self) -> JobId {
        let id = JobId(self.next_id);
        self.next_id += 1;
        id
    }

    #[allow(clippy::too_many_arguments)]
    fn issue(
        &mut self,
        job_type: JobType,
        chunk_id: ChunkId,
        node: NodeId,
        replica_index: ReplicaIndex,
        target_replicas: Vec<ReplicaDescriptor>,
        resource_usage: JobResources,
        now: MutationTimestamp,
        decommission: bool,
        merge_mode: Option<MergeMode>,
    ) -> JobId {
        let id = self.allocate_id();
        self.jobs.insert(
            id,
            Job {
                id,
                job_type,
                chunk_id,
                node,
                replica_index,
                target_replicas,
                start_time: now,
                resource_usage,
                state: JobState::Waiting,
                error: None,
                decommission,
                merge_mode,
            },
        );
        self.by_node.entry(node).or_default().insert(id);
        self.by_chunk.entry(chunk_id).or_default().insert(id);
        id
    }

    fn remove(&mut self, id: JobId) -> Option<Job> {
        let job = self.jobs.remove(&id)?;
        if let Some(set) = self.by_node.get_mut(&job.node) {
            set.remove(&id);
        }
        if let Some(set) = self.by_chunk.get_mut(&job.chunk_id) {
            set.remove(&id);
        }
        Some(job)
    }

    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(&id)
    }

    pub fn jobs_on_node(&self, node: NodeId) -> Vec<JobId> {
        self.by_node.get(&node).map(|s| s.iter().copied().collect()).unwrap_or_default()
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// `spec.md` §4.3 "Work-queue updates (only if the chunk has no running
    /// jobs)".
    pub fn has_running_jobs(&self, chunk_id: ChunkId) -> bool {
        self.by_chunk.get(&chunk_id).map(|s| !s.is_empty()).unwrap_or(false)
    }

    /// Pending jobs older than `JobTimeout` (`spec.md` §5 "Cancellation &
    /// timeouts").
    pub fn timed_out(&self, now: MutationTimestamp, cfg: &JobConfig) -> Vec<JobId> {
        self.jobs
            .values()
            .filter(|j| j.state != JobState::Completed && now.saturating_sub(j.start_time) > cfg.job_timeout_ms)
            .map(|j| j.id)
            .collect()
    }
}

fn to_node_resources(r: JobResources, job_type: JobType) -> cm_api_types::requests::NodeResources {
    let mut out = cm_api_types::requests::NodeResources { memory: r.memory, ..Default::default() };
    match job_type {
        JobType::Replicate => out.replication_slots = r.slots,
        JobType::Remove => out.removal_slots = r.slots,
        JobType::Repair => out.repair_slots = r.slots,
        JobType::Seal => out.seal_slots = r.slots,
        JobType::Merge => out.merge_slots = r.slots,
        JobType::Autotomize => out.autotomy_slots = r.slots,
    }
    out
}

/// Wires the job registry to the rest of the engine (`spec.md` §4.8). Owns
/// no state of its own beyond the registry; everything else is threaded
/// through [`JobController::process_heartbeat`].
#[derive(Default)]
pub struct JobController {
    pub registry: JobRegistry,
}

impl JobController {
    pub fn new() -> Self {
        JobController::default()
    }

    /// `spec.md` §4.8 "Per-heartbeat scheduling": reconcile reported job
    /// state, abort missing jobs, then drain queues up to resource limits.
    pub fn process_heartbeat(
        &mut self,
        object_registry: &ObjectRegistry,
        nodes: &mut NodeRegistry,
        placement: &Placement,
        refresh: &mut RefreshSchedulers,
        config: &ManagerConfig,
        request: &HeartbeatJobRequest,
        now: MutationTimestamp,
    ) -> HeartbeatJobResponse {
        let mut response = HeartbeatJobResponse::default();
        let node_id = request.node;

        let reported: HashMap<JobId, &ReportedJobStatus> = request.reported_jobs.iter().map(|j| (j.job_id, j)).collect();

        for status in &request.reported_jobs {
            let Some(job) = self.registry.jobs.get_mut(&status.job_id) else { continue };
            job.state = status.state;
            job.error = status.error.clone();
            if job.state.is_terminal() {
                response.jobs_to_remove.push(status.job_id);
            }
        }

        for job_id in self.registry.jobs_on_node(node_id) {
            let is_terminal = self.registry.get(job_id).map(|j| j.state.is_terminal()).unwrap_or(false);
            if !is_terminal {
                continue;
            }
            if let Some(job) = self.registry.remove(job_id) {
                self.run_completion_hook(&job, nodes, refresh, now);
            }
        }

        for job_id in self.registry.jobs_on_node(node_id) {
            if !reported.contains_key(&job_id) {
                response.jobs_to_abort.push(job_id);
                if let Some(job) = self.registry.remove(job_id) {
                    if let Some(node) = nodes.get_mut(node_id) {
                        node.release(to_node_resources(job.resource_usage, job.job_type));
                    }
                    refresh.schedule_chunk_refresh(job.chunk_id.chunk_type(), job.chunk_id, now, 0);
                }
            }
        }

        for job_id in self.registry.timed_out(now, &config.jobs) {
            if self.registry.get(job_id).map(|j| j.node) == Some(node_id) {
                response.jobs_to_abort.push(job_id);
                if let Some(job) = self.registry.remove(job_id) {
                    if let Some(node) = nodes.get_mut(node_id) {
                        node.release(to_node_resources(job.resource_usage, job.job_type));
                    }
                    refresh.schedule_chunk_refresh(job.chunk_id.chunk_type(), job.chunk_id, now, 0);
                }
            }
        }

        self.drain_queues(object_registry, nodes, placement, node_id, now, &mut response);

        response
    }

    fn run_completion_hook(&self, job: &Job, nodes: &mut NodeRegistry, refresh: &mut RefreshSchedulers, now: MutationTimestamp) {
        if let Some(node) = nodes.get_mut(job.node) {
            node.release(to_node_resources(job.resource_usage, job.job_type));
            if job.state == JobState::Completed && job.job_type == JobType::Seal {
                node.running_jobs.remove(&job.id);
            }
        }
        if job.state == JobState::Failed {
            log::warn!(target: "chunk_manager::jobs", "job {} ({:?}) on chunk {} failed: {:?}", job.id, job.job_type, job.chunk_id, job.error);
        } else {
            log::debug!(target: "chunk_manager::jobs", "job {} ({:?}) on chunk {} -> {:?}", job.id, job.job_type, job.chunk_id, job.state);
        }
        refresh.schedule_chunk_refresh(job.chunk_id.chunk_type(), job.chunk_id, now, 0);
    }

    /// `spec.md` §4.8 point 3: "Drain queues into new jobs until the node
    /// hits any of `replication_slots`, `removal_slots`, …".
    fn drain_queues(
        &mut self,
        registry: &ObjectRegistry,
        nodes: &mut NodeRegistry,
        placement: &Placement,
        node_id: NodeId,
        now: MutationTimestamp,
        response: &mut HeartbeatJobResponse,
    ) {
        self.drain_replication(registry, nodes, placement, node_id, now, response);
        self.drain_removal(nodes, node_id, now, response);
        self.drain_repair(registry, nodes, placement, node_id, now, response);
        self.drain_seal(registry, nodes, node_id, now, response);
        self.drain_merge(registry, nodes, node_id, now, response);
        self.drain_autotomize(registry, nodes, node_id, now, response);
    }

    fn drain_replication(
        &mut self,
        registry: &ObjectRegistry,
        nodes: &mut NodeRegistry,
        placement: &Placement,
        node_id: NodeId,
        now: MutationTimestamp,
        response: &mut HeartbeatJobResponse,
    ) {
        loop {
            let Some(node) = nodes.get(node_id) else { return };
            if !node.has_available_slots(JobResources::slot(1).to_replication()) {
                return;
            }
            let Some((chunk_id, replica_index)) = nodes
                .get_mut(node_id)
                .and_then(|n| n.replication_queues.iter_mut().find_map(|q| q.pop_front()))
            else {
                return;
            };
            let Ok(chunk_handle) = registry.get_chunk(chunk_id) else { continue };
            let chunk = chunk_handle.borrow();
            let Some(source) = chunk.replica_list(ReplicaListKind::Stored).iter().find(|r| r.node == node_id && r.replica_index == replica_index) else {
                continue;
            };
            let medium_index = source.medium_index;
            let Ok(medium) = registry.media.get(medium_index) else { continue };
            let existing: Vec<NodeId> = chunk
                .replica_list(ReplicaListKind::Stored)
                .iter()
                .filter(|r| r.medium_index == medium_index && r.replica_index == replica_index)
                .map(|r| r.node)
                .collect();
            let crp_hash = chunk.consistent_replica_placement_hash;
            let targets = placement.allocate_write_targets(nodes, medium, medium_index, chunk.chunk_type().is_erasure(), crp_hash, &existing, 1);
            let Some(&target) = targets.first() else { continue };
            drop(chunk);

            let resource_usage = JobResources::slot(1);
            let job_id = self.registry.issue(
                JobType::Replicate,
                chunk_id,
                node_id,
                replica_index,
                vec![ReplicaDescriptor { node: target, replica_index, medium_index, state: cm_api_types::ReplicaState::Generic }],
                resource_usage,
                now,
                false,
                None,
            );
            if let Some(node) = nodes.get_mut(node_id) {
                node.charge(to_node_resources(resource_usage, JobType::Replicate));
                node.running_jobs.insert(job_id);
            }
            response.jobs_to_start.push(JobStartInstruction {
                job_id,
                job_type: JobType::Replicate,
                chunk_id,
                replica_index,
                target_replicas: vec![ReplicaDescriptor { node: target, replica_index, medium_index, state: cm_api_types::ReplicaState::Generic }],
            });
        }
    }

    fn drain_removal(&mut self, nodes: &mut NodeRegistry, node_id: NodeId, now: MutationTimestamp, response: &mut HeartbeatJobResponse) {
        loop {
            let Some(node) = nodes.get(node_id) else { return };
            if !node.has_available_slots(JobResources::slot(1).to_kind(JobType::Remove)) {
                return;
            }
            let Some(coordinate) = nodes.get_mut(node_id).and_then(|n| n.removal_queue.pop_front()) else { return };
            let resource_usage = JobResources::slot(1);
            let job_id = self.registry.issue(
                JobType::Remove,
                coordinate.chunk,
                node_id,
                coordinate.replica_index,
                Vec::new(),
                resource_usage,
                now,
                false,
                None,
            );
            if let Some(node) = nodes.get_mut(node_id) {
                node.charge(to_node_resources(resource_usage, JobType::Remove));
                node.running_jobs.insert(job_id);
            }
            response.jobs_to_start.push(JobStartInstruction {
                job_id,
                job_type: JobType::Remove,
                chunk_id: coordinate.chunk,
                replica_index: coordinate.replica_index,
                target_replicas: Vec::new(),
            });
        }
    }

    fn drain_repair(
        &mut self,
        registry: &ObjectRegistry,
        nodes: &mut NodeRegistry,
        placement: &Placement,
        node_id: NodeId,
        now: MutationTimestamp,
        response: &mut HeartbeatJobResponse,
    ) {
        loop {
            let Some(node) = nodes.get(node_id) else { return };
            if !node.has_available_slots(JobResources { memory: 0, slots: 1 }.to_kind(JobType::Repair)) {
                return;
            }
            let Some((chunk_id, missing_indexes)) = nodes.get_mut(node_id).and_then(|n| n.repair_queue.pop_front()) else { return };
            if missing_indexes.is_empty() {
                continue;
            }
            let Ok(chunk_handle) = registry.get_chunk(chunk_id) else { continue };
            let chunk = chunk_handle.borrow();
            let is_erasure = chunk.chunk_type().is_erasure();
            if !is_erasure {
                continue;
            }
            let surviving: Vec<NodeId> = chunk.replica_list(ReplicaListKind::Stored).iter().map(|r| r.node).collect();
            let medium_index = chunk
                .replica_list(ReplicaListKind::Stored)
                .first()
                .map(|r| r.medium_index)
                .unwrap_or(registry.media.default_store_index());
            let Ok(medium) = registry.media.get(medium_index) else { continue };
            let crp_hash = chunk.consistent_replica_placement_hash;
            let missing_count = missing_indexes.len();
            let targets = placement.allocate_write_targets(nodes, medium, medium_index, true, crp_hash, &surviving, missing_count);
            drop(chunk);
            let resource_usage = JobResources::slot(1).with_memory(64 * 1024 * 1024);
            let target_descs: Vec<ReplicaDescriptor> = targets
                .iter()
                .zip(missing_indexes.iter())
                .map(|(&n, &replica_index)| ReplicaDescriptor { node: n, replica_index, medium_index, state: cm_api_types::ReplicaState::Generic })
                .collect();
            let job_id = self.registry.issue(JobType::Repair, chunk_id, node_id, 0, target_descs.clone(), resource_usage, now, false, None);
            if let Some(node) = nodes.get_mut(node_id) {
                node.charge(to_node_resources(resource_usage, JobType::Repair));
                node.running_jobs.insert(job_id);
            }
            response.jobs_to_start.push(JobStartInstruction { job_id, job_type: JobType::Repair, chunk_id, replica_index: 0, target_replicas: target_descs });
        }
    }

    fn drain_seal(&mut self, registry: &ObjectRegistry, nodes: &mut NodeRegistry, node_id: NodeId, now: MutationTimestamp, response: &mut HeartbeatJobResponse) {
        loop {
            let Some(node) = nodes.get(node_id) else { return };
            if !node.has_available_slots(JobResources::slot(1).to_kind(JobType::Seal)) {
                return;
            }
            let Some(chunk_id) = nodes.get_mut(node_id).and_then(|n| n.seal_queue.pop_front()) else { return };
            if registry.get_chunk(chunk_id).is_err() {
                continue;
            }
            let resource_usage = JobResources::slot(1);
            let job_id = self.registry.issue(JobType::Seal, chunk_id, node_id, 0, Vec::new(), resource_usage, now, false, None);
            if let Some(node) = nodes.get_mut(node_id) {
                node.charge(to_node_resources(resource_usage, JobType::Seal));
                node.running_jobs.insert(job_id);
            }
            response.jobs_to_start.push(JobStartInstruction { job_id, job_type: JobType::Seal, chunk_id, replica_index: 0, target_replicas: Vec::new() });
        }
    }

    /// Dispatches the node-side materialization job for a merge the
    /// registry already committed to the tree (`merger::MergeCoordinator`,
    /// `spec.md` §4.9).
    fn drain_merge(&mut self, registry: &ObjectRegistry, nodes: &mut NodeRegistry, node_id: NodeId, now: MutationTimestamp, response: &mut HeartbeatJobResponse) {
        loop {
            let Some(node) = nodes.get(node_id) else { return };
            if !node.has_available_slots(JobResources::slot(1).to_kind(JobType::Merge)) {
                return;
            }
            let Some((chunk_id, targets)) = nodes.get_mut(node_id).and_then(|n| n.merge_queue.pop_front()) else { return };
            if registry.get_chunk(chunk_id).is_err() {
                continue;
            }
            let target_replicas: Vec<ReplicaDescriptor> = targets
                .iter()
                .map(|&n| ReplicaDescriptor { node: n, replica_index: 0, medium_index: 0, state: cm_api_types::ReplicaState::Generic })
                .collect();
            let resource_usage = JobResources::slot(1);
            let job_id = self.registry.issue(JobType::Merge, chunk_id, node_id, 0, target_replicas.clone(), resource_usage, now, false, Some(MergeMode::Shallow));
            if let Some(node) = nodes.get_mut(node_id) {
                node.charge(to_node_resources(resource_usage, JobType::Merge));
                node.running_jobs.insert(job_id);
            }
            response.jobs_to_start.push(JobStartInstruction { job_id, job_type: JobType::Merge, chunk_id, replica_index: 0, target_replicas });
        }
    }

    /// Dispatches the node-side materialization job for a journal split the
    /// registry already committed to the tree (`autotomizer`, `spec.md` §4.9).
    fn drain_autotomize(&mut self, registry: &ObjectRegistry, nodes: &mut NodeRegistry, node_id: NodeId, now: MutationTimestamp, response: &mut HeartbeatJobResponse) {
        loop {
            let Some(node) = nodes.get(node_id) else { return };
            if !node.has_available_slots(JobResources::slot(1).to_kind(JobType::Autotomize)) {
                return;
            }
            let Some((chunk_id, targets)) = nodes.get_mut(node_id).and_then(|n| n.autotomy_queue.pop_front()) else { return };
            if registry.get_chunk(chunk_id).is_err() {
                continue;
            }
            let target_replicas: Vec<ReplicaDescriptor> = targets
                .iter()
                .map(|&n| ReplicaDescriptor { node: n, replica_index: 0, medium_index: 0, state: cm_api_types::ReplicaState::Generic })
                .collect();
            let resource_usage = JobResources::slot(1);
            let job_id = self.registry.issue(JobType::Autotomize, chunk_id, node_id, 0, target_replicas.clone(), resource_usage, now, false, None);
            if let Some(node) = nodes.get_mut(node_id) {
                node.charge(to_node_resources(resource_usage, JobType::Autotomize));
                node.running_jobs.insert(job_id);
            }
            response.jobs_to_start.push(JobStartInstruction { job_id, job_type: JobType::Autotomize, chunk_id, replica_index: 0, target_replicas });
        }
    }
}

trait JobResourcesExt {
    fn to_kind(self, job_type: JobType) -> cm_api_types::requests::NodeResources;
    fn to_replication(self) -> cm_api_types::requests::NodeResources;
}

impl JobResourcesExt for JobResources {
    fn to_kind(self, job_type: JobType) -> cm_api_types::requests::NodeResources {
        to_node_resources(self, job_type)
    }
    fn to_replication(self) -> cm_api_types::requests::NodeResources {
        to_node_resources(self, JobType::Replicate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cm_api_types::{CellTag, ChunkType};

    #[test]
    fn has_running_jobs_reflects_by_chunk_index() {
        let mut reg = JobRegistry::new();
        let chunk = ChunkId::new(1, 0, ChunkType::Regular, CellTag(0));
        assert!(!reg.has_running_jobs(chunk));
        let id = reg.issue(JobType::Replicate, chunk, NodeId(1), 0, Vec::new(), JobResources::slot(1), 0, false, None);
        assert!(reg.has_running_jobs(chunk));
        reg.remove(id);
        assert!(!reg.has_running_jobs(chunk));
    }

    #[test]
    fn timed_out_jobs_are_found_by_start_time() {
        let mut reg = JobRegistry::new();
        let chunk = ChunkId::new(1, 0, ChunkType::Regular, CellTag(0));
        reg.issue(JobType::Seal, chunk, NodeId(1), 0, Vec::new(), JobResources::slot(1), 0, false, None);
        let cfg = JobConfig { job_timeout_ms: 1000 };
        assert!(reg.timed_out(500, &cfg).is_empty());
        assert_eq!(reg.timed_out(1500, &cfg).len(), 1);
    }
}
