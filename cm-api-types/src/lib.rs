//! Plain data-transfer types shared across the chunk manager's crates: ids,
//! the §7 error taxonomy, and the §6 request/response DTOs. Kept dependency
//! light and free of any registry logic, the way the teacher keeps
//! `pbs-api-types` a leaf crate every other crate depends on.

mod errors;
mod human_byte;
mod ids;
mod job_types;
mod replica;
mod replica_heartbeat;
pub mod requests;

pub use errors::{ChunkManagerError, Result};
pub use human_byte::HumanByte;
pub use ids::{
    AccountId, CellTag, ChunkId, ChunkType, JobId, MediumIndex, NodeId, ObjectId,
    ReplicaIndex, ReplicationFactor, RequisitionIndex, TransactionId,
};
pub use job_types::{JobResources, JobState, JobType, MergeMode};
pub use replica::{ApprovalState, ReplicaListKind, ReplicaState};
pub use replica_heartbeat::{
    FullHeartbeatRequest, IncrementalHeartbeatRequest, NodeDisposalRequest, ReplicaHeartbeatResponse,
    ReportedReplica,
};
