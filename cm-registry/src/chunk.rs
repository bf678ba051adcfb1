//! The chunk object (`spec.md` §3 "Chunk"): the atomic unit the rest of the
//! system is built around. Grounded on the teacher's `DataBlob`/index
//! header shape (`pbs-datastore/src/data_blob.rs`) for "a small metadata
//! struct plus a flags field plus a replica/part list", generalized to the
//! full attribute set `spec.md` names.

use std::collections::HashMap;

use cm_api_types::requests::{ChunkInfo, ChunkMeta};
use cm_api_types::{
    CellTag, ChunkId, ChunkManagerError, ChunkType, MediumIndex, NodeId, ObjectId, ReplicaIndex,
    ReplicaListKind, ReplicaState, ReplicationFactor, RequisitionIndex, Result,
};
use cm_config::MutationTimestamp;

use crate::status::ChunkStatus;

/// One `(node, replica_index, medium_index, state)` tuple (`spec.md` §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ReplicaTuple {
    pub node: NodeId,
    pub replica_index: ReplicaIndex,
    pub medium_index: MediumIndex,
    pub state: ReplicaState,
}

impl ReplicaTuple {
    /// The `(node, medium, replica_index)` coordinate the soundness
    /// invariant (`spec.md` §8.1) is keyed on.
    pub fn coordinate(&self) -> (NodeId, MediumIndex, ReplicaIndex) {
        (self.node, self.medium_index, self.replica_index)
    }
}

#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: ChunkId,
    pub meta: ChunkMeta,
    pub info: Option<ChunkInfo>,

    pub erasure_codec: Option<String>,
    /// `None` unless this chunk overrides the requisition-derived factor
    /// (regular chunks only, per `spec.md` §3).
    pub replication_factor_override: Option<ReplicationFactor>,
    pub read_quorum: u32,
    pub write_quorum: u32,
    pub replica_lag_limit: Option<u64>,
    pub overlayed: bool,
    pub movable: bool,
    /// Nonzero iff CRP-managed (`spec.md` §3, §4.4).
    pub consistent_replica_placement_hash: u64,
    pub expiration_time: Option<MutationTimestamp>,

    pub local_requisition_index: RequisitionIndex,
    pub external_requisition_indexes: HashMap<CellTag, RequisitionIndex>,

    /// Multiset of chunk-list parents with cardinality (`spec.md` §3).
    parents: HashMap<ObjectId, u32>,

    pub stored_replicas: Vec<ReplicaTuple>,
    pub cached_replicas: Vec<ReplicaTuple>,

    pub endorsement_required: bool,
    pub node_with_endorsement: Option<NodeId>,

    pub confirmed: bool,
    pub sealed: bool,
    pub foreign: bool,

    pub status_by_medium: HashMap<MediumIndex, ChunkStatus>,

    /// Approved-replica count, maintained incrementally by the replica
    /// state machine (`spec.md` §4.2 "Approval policy").
    pub approved_replica_count: u32,

    /// Bumped whenever the chunk's tree-relevant shape (parents, sealing,
    /// replicas) changes, so a chunk-tree visitor holding only a weak
    /// reference can detect staleness across a yield (`spec.md` §4.1, §9).
    pub version: u64,
}

impl Chunk {
    pub fn new(id: ChunkId, local_requisition_index: RequisitionIndex) -> Self {
        Chunk {
            id,
            meta: ChunkMeta::default(),
            info: None,
            erasure_codec: None,
            replication_factor_override: None,
            read_quorum: 0,
            write_quorum: 0,
            replica_lag_limit: None,
            overlayed: false,
            movable: true,
            consistent_replica_placement_hash: 0,
            expiration_time: None,
            local_requisition_index,
            external_requisition_indexes: HashMap::new(),
            parents: HashMap::new(),
            stored_replicas: Vec::new(),
            cached_replicas: Vec::new(),
            endorsement_required: false,
            node_with_endorsement: None,
            confirmed: false,
            sealed: false,
            foreign: false,
            status_by_medium: HashMap::new(),
            approved_replica_count: 0,
            version: 0,
        }
    }

    pub fn chunk_type(&self) -> ChunkType {
        self.id.chunk_type()
    }

    pub fn is_crp_managed(&self) -> bool {
        self.consistent_replica_placement_hash != 0
    }

    pub fn bump_version(&mut self) {
        self.version = self.version.wrapping_add(1);
    }

    pub fn add_parent(&mut self, parent: ObjectId) {
        *self.parents.entry(parent).or_insert(0) += 1;
        self.bump_version();
    }

    /// Returns `true` if the parent multiplicity dropped to zero (the
    /// parent is no longer a parent at all).
    pub fn remove_parent(&mut self, parent: ObjectId) -> Result<bool> {
        let count = self
            .parents
            .get_mut(&parent)
            .ok_or_else(|| ChunkManagerError::internal("remove_parent of a non-parent chunk list"))?;
        *count -= 1;
        let emptied = *count == 0;
        if emptied {
            self.parents.remove(&parent);
        }
        self.bump_version();
        Ok(emptied)
    }

    pub fn parent_count(&self) -> u32 {
        self.parents.values().sum()
    }

    pub fn parents(&self) -> impl Iterator<Item = (ObjectId, u32)> + '_ {
        self.parents.iter().map(|(id, count)| (*id, *count))
    }

    fn replica_list_mut(&mut self, kind: ReplicaListKind) -> &mut Vec<ReplicaTuple> {
        match kind {
            ReplicaListKind::Stored => &mut self.stored_replicas,
            ReplicaListKind::Cached => &mut self.cached_replicas,
        }
    }

    pub fn replica_list(&self, kind: ReplicaListKind) -> &[ReplicaTuple] {
        match kind {
            ReplicaListKind::Stored => &self.stored_replicas,
            ReplicaListKind::Cached => &self.cached_replicas,
        }
    }

    /// Inserts `replica`, enforcing the at-most-once-per-coordinate
    /// invariant across both lists (`spec.md` §8.1). Replacing an existing
    /// coordinate's state (e.g. `Unapproved` -> `Approved`) is done via
    /// [`Chunk::set_replica_state`], not re-insertion.
    pub fn add_replica(&mut self, kind: ReplicaListKind, replica: ReplicaTuple) -> Result<()> {
        let coordinate = replica.coordinate();
        if self
            .stored_replicas
            .iter()
            .chain(self.cached_replicas.iter())
            .any(|r| r.coordinate() == coordinate)
        {
            return Err(ChunkManagerError::internal(
                "replica coordinate already present on this chunk",
            ));
        }
        self.replica_list_mut(kind).push(replica);
        self.bump_version();
        Ok(())
    }

    pub fn remove_replica(
        &mut self,
        node: NodeId,
        medium_index: MediumIndex,
        replica_index: ReplicaIndex,
    ) -> Option<ReplicaTuple> {
        let coordinate = (node, medium_index, replica_index);
        for kind in [ReplicaListKind::Stored, ReplicaListKind::Cached] {
            let list = self.replica_list_mut(kind);
            if let Some(pos) = list.iter().position(|r| r.coordinate() == coordinate) {
                let removed = list.remove(pos);
                self.bump_version();
                return Some(removed);
            }
        }
        None
    }

    pub fn set_replica_state(
        &mut self,
        node: NodeId,
        medium_index: MediumIndex,
        replica_index: ReplicaIndex,
        state: ReplicaState,
    ) -> bool {
        let coordinate = (node, medium_index, replica_index);
        for kind in [ReplicaListKind::Stored, ReplicaListKind::Cached] {
            if let Some(r) = self
                .replica_list_mut(kind)
                .iter_mut()
                .find(|r| r.coordinate() == coordinate)
            {
                r.state = state;
                return true;
            }
        }
        false
    }

    pub fn confirm(&mut self, info: ChunkInfo, meta: ChunkMeta) {
        if self.confirmed {
            return;
        }
        self.info = Some(info);
        self.meta = meta;
        self.confirmed = true;
        self.expiration_time = None;
        if !self.chunk_type().is_journal() {
            self.sealed = true;
        }
        self.bump_version();
    }
}
