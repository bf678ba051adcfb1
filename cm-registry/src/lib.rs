//! The chunk/chunk-list/chunk-view/dynamic-store/medium data model and the
//! object registry that owns them (`spec.md` §2 dependency levels 1-2, §3).
//! Kept a separate crate from the engine the way the teacher keeps
//! `pbs-datastore` separate from `proxmox-backup-server` — the data model is
//! reusable without the scheduling policy built on top of it.

pub mod chunk;
pub mod chunk_list;
pub mod chunk_view;
pub mod dynamic_store;
pub mod medium;
pub mod registry;
pub mod requisition;
pub mod status;
pub mod tree;

pub use chunk::{Chunk, ReplicaTuple};
pub use chunk_list::{ChunkList, ChunkListKind, ChunkTreeChildRef, CumulativeStatistics, Statistics};
pub use chunk_view::{ChunkView, ChunkViewUnderlying, ReadRange};
pub use dynamic_store::DynamicStore;
pub use medium::{Medium, MediumConfig, MediumRegistry};
pub use registry::{ChunkHandle, ChunkListHandle, ChunkViewHandle, DynamicStoreHandle, ObjectRegistry};
pub use requisition::{Requisition, RequisitionEntry, RequisitionRegistry, ReplicationPolicy};
pub use status::ChunkStatus;
pub use tree::{AncestorWalkResult, ChunkTreeVisitor, ResolvedChild, TreeLeaf};
