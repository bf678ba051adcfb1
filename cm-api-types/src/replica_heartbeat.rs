//! Replica-heartbeat request/response DTOs (`spec.md` §4.2). Distinct from
//! [`crate::requests::HeartbeatJobRequest`]: that one reports job progress,
//! this one reports which replicas a node currently holds. A real transport
//! may fold both into a single wire message; kept separate here since they
//! drive two different subsystems (the job controller vs. the replica state
//! machine) with independent contracts.

use serde::{Deserialize, Serialize};

use crate::ids::{ChunkId, MediumIndex, NodeId, ReplicaIndex};
use crate::replica::ReplicaState;
use crate::requests::ReplicaAnnouncementRequest;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReportedReplica {
    pub chunk_id: ChunkId,
    pub medium_index: MediumIndex,
    pub replica_index: ReplicaIndex,
    pub state: ReplicaState,
}

/// `spec.md` §4.2 "On full heartbeat from a node": replaces the node's
/// entire known replica set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullHeartbeatRequest {
    pub node: NodeId,
    pub total_space: u64,
    pub replicas: Vec<ReportedReplica>,
}

/// `spec.md` §4.2 "On incremental heartbeat".
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IncrementalHeartbeatRequest {
    pub node: NodeId,
    pub added_replicas: Vec<ReportedReplica>,
    pub removed_replicas: Vec<ReportedReplica>,
    /// Ally-replica announcements the node confirmed since the last
    /// heartbeat (`spec.md` §4.2.1): clears the corresponding endorsement.
    pub confirmed_ally_announcements: Vec<ChunkId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReplicaHeartbeatResponse {
    pub replica_announcement_requests: Vec<ReplicaAnnouncementRequest>,
    pub confirmed_endorsements: Vec<ChunkId>,
}

/// `spec.md` §4.2 "On node disposal (graceful removal from cluster)".
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NodeDisposalRequest {
    pub node: NodeId,
}
