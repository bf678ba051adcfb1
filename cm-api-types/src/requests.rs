//! Request/response DTOs for the §6 external interface. These are plain
//! serde-friendly structs; the RPC plumbing that carries them over a wire is
//! out of scope (`spec.md` §1) — callers in this crate's test suite and in
//! `chunk_manager::ChunkManager` construct and consume them directly.

use serde::{Deserialize, Serialize};

use crate::ids::{
    AccountId, ChunkId, JobId, MediumIndex, NodeId, ObjectId, ReplicaIndex, ReplicationFactor,
    TransactionId,
};
use crate::job_types::{JobState, JobType};
use crate::replica::ReplicaState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateChunkRequest {
    pub chunk_type: crate::ids::ChunkType,
    pub account: AccountId,
    pub medium_name: String,
    pub replication_factor: ReplicationFactor,
    pub erasure_codec: Option<String>,
    pub read_quorum: u32,
    pub write_quorum: u32,
    pub replica_lag_limit: Option<u64>,
    pub overlayed: bool,
    pub crp_hash: Option<u64>,
    pub chunk_list_id: Option<ObjectId>,
    pub transaction_id: TransactionId,
    pub movable: bool,
    pub vital: bool,
    pub validate_resource_usage_increase: bool,
    pub chunk_id_hint: Option<ChunkId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateChunkResponse {
    pub chunk_id: ChunkId,
    pub medium_index: MediumIndex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaDescriptor {
    pub node: NodeId,
    pub replica_index: ReplicaIndex,
    pub medium_index: MediumIndex,
    pub state: ReplicaState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkInfo {
    pub row_count: u64,
    pub uncompressed_data_size: u64,
    pub compressed_data_size: u64,
    pub disk_space: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChunkMeta {
    pub first_overlayed_row_index: Option<u64>,
    pub hunk_refs: Vec<ChunkId>,
    pub lower_boundary_key: Option<Vec<u8>>,
    pub upper_boundary_key: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmChunkRequest {
    pub chunk_id: ChunkId,
    pub replicas: Vec<ReplicaDescriptor>,
    pub chunk_info: ChunkInfo,
    pub chunk_meta: ChunkMeta,
    pub request_statistics: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConfirmChunkResponse {
    pub statistics: Option<ChunkStatistics>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChunkStatistics {
    pub row_count: u64,
    pub chunk_count: u64,
    pub uncompressed_data_size: u64,
    pub compressed_data_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealInfo {
    pub row_count: u64,
    pub first_overlayed_row_index: Option<u64>,
    pub uncompressed_data_size: u64,
    pub compressed_data_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealChunkRequest {
    pub chunk_id: ChunkId,
    pub seal_info: SealInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateChunkListsRequest {
    pub transaction_id: TransactionId,
    pub count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachChunkTreesRequest {
    pub parent_id: ObjectId,
    pub child_ids: Vec<ObjectId>,
    pub transaction_id: Option<TransactionId>,
    pub request_statistics: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AttachChunkTreesResponse {
    pub statistics: Option<ChunkStatistics>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnstageChunkTreeRequest {
    pub chunk_tree_id: ObjectId,
    pub recursive: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportChunksRequest {
    pub chunk_ids: Vec<ChunkId>,
    pub destination_cell: crate::ids::CellTag,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportChunksRequest {
    pub chunk_ids: Vec<ChunkId>,
    pub source_cell: crate::ids::CellTag,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuorumInfo {
    pub row_count: u64,
    pub first_overlayed_row_index: Option<u64>,
    pub uncompressed_data_size: u64,
    pub compressed_data_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportedJobStatus {
    pub job_id: JobId,
    pub state: JobState,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NodeResources {
    pub memory: u64,
    pub replication_slots: u32,
    pub removal_slots: u32,
    pub repair_slots: u32,
    pub seal_slots: u32,
    pub merge_slots: u32,
    pub autotomy_slots: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatJobRequest {
    pub node: NodeId,
    pub reported_jobs: Vec<ReportedJobStatus>,
    pub resource_usage: NodeResources,
    pub resource_limits: NodeResources,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStartInstruction {
    pub job_id: JobId,
    pub job_type: JobType,
    pub chunk_id: ChunkId,
    pub replica_index: ReplicaIndex,
    pub target_replicas: Vec<ReplicaDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaAnnouncementRequest {
    pub chunk_id: ChunkId,
    pub replicas: Vec<ReplicaDescriptor>,
    pub delay_ms: u64,
    pub lazy: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HeartbeatJobResponse {
    pub jobs_to_start: Vec<JobStartInstruction>,
    pub jobs_to_abort: Vec<JobId>,
    pub jobs_to_remove: Vec<JobId>,
    pub replica_announcement_requests: Vec<ReplicaAnnouncementRequest>,
    pub confirmed_endorsements: Vec<ChunkId>,
}
