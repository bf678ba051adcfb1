//! Health snapshot (SPEC_FULL.md §B "ambient health surface"): a
//! point-in-time readout of the cardinalities an operator dashboard or a
//! `/healthz`-style endpoint would poll, grounded on the teacher's own
//! datastore status summary in shape (a flat struct of counters, cheap to
//! serialize, computed on demand rather than maintained as a side channel).

use serde::Serialize;

use crate::jobs::JobController;
use crate::node::NodeRegistry;
use crate::refresh::GlobalStatusSets;

#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthSnapshot {
    pub node_count: usize,
    pub online_node_count: usize,
    pub decommissioned_node_count: usize,

    pub running_job_count: usize,

    pub lost_chunk_count: usize,
    pub lost_vital_chunk_count: usize,
    pub overreplicated_chunk_count: usize,
    pub underreplicated_chunk_count: usize,
    pub data_missing_chunk_count: usize,
    pub parity_missing_chunk_count: usize,
    pub quorum_missing_chunk_count: usize,
    pub unsafely_placed_chunk_count: usize,
    pub inconsistently_placed_chunk_count: usize,
    pub precarious_chunk_count: usize,
    pub precarious_vital_chunk_count: usize,
    pub oldest_part_missing_chunk_count: usize,
}

impl HealthSnapshot {
    /// `true` once there are no lost vital chunks and no quorum-missing
    /// chunks: the two conditions `spec.md` §4.2.1 treats as cluster
    /// instability for ally-announcement mode selection.
    pub fn is_stable(&self, max_lost_vital_chunks: u32) -> bool {
        self.lost_vital_chunk_count as u32 <= max_lost_vital_chunks && self.quorum_missing_chunk_count == 0
    }
}

pub fn snapshot(nodes: &NodeRegistry, jobs: &JobController, status: &GlobalStatusSets) -> HealthSnapshot {
    HealthSnapshot {
        node_count: nodes.iter().count(),
        online_node_count: nodes.iter().filter(|n| n.reported_heartbeat && !n.decommissioned).count(),
        decommissioned_node_count: nodes.iter().filter(|n| n.decommissioned).count(),

        running_job_count: jobs.registry.job_count(),

        lost_chunk_count: status.lost_chunks.len(),
        lost_vital_chunk_count: status.lost_vital_chunks.len(),
        overreplicated_chunk_count: status.overreplicated_chunks.len(),
        underreplicated_chunk_count: status.underreplicated_chunks.len(),
        data_missing_chunk_count: status.data_missing_chunks.len(),
        parity_missing_chunk_count: status.parity_missing_chunks.len(),
        quorum_missing_chunk_count: status.quorum_missing_chunks.len(),
        unsafely_placed_chunk_count: status.unsafely_placed_chunks.len(),
        inconsistently_placed_chunk_count: status.inconsistently_placed_chunks.len(),
        precarious_chunk_count: status.precarious_chunks.len(),
        precarious_vital_chunk_count: status.precarious_vital_chunks.len(),
        oldest_part_missing_chunk_count: status.oldest_part_missing_chunks.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stability_respects_configured_ceiling() {
        let mut snap = HealthSnapshot::default();
        snap.lost_vital_chunk_count = 2;
        assert!(!snap.is_stable(0));
        assert!(snap.is_stable(2));
        snap.quorum_missing_chunk_count = 1;
        assert!(!snap.is_stable(2));
    }

    #[test]
    fn snapshot_counts_nodes_and_jobs() {
        let nodes = NodeRegistry::new(4);
        let jobs = JobController::new();
        let status = GlobalStatusSets::default();
        let snap = snapshot(&nodes, &jobs, &status);
        assert_eq!(snap.node_count, 0);
        assert_eq!(snap.running_job_count, 0);
    }
}
