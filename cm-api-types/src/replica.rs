/// Lifecycle state of one replica tuple `(node, medium, replica_index)`
/// (`spec.md` §4.2). `Active`/`Sealed`/`Unsealed` only ever apply to journal
/// chunks; blob and erasure chunks only ever use `Generic`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ReplicaState {
    Generic,
    Active,
    Sealed,
    Unsealed,
}

impl ReplicaState {
    pub fn is_sealed(self) -> bool {
        matches!(self, ReplicaState::Sealed)
    }
}

/// Approval state of a replica, tracked per `(chunk, node)` via the node's
/// unapproved map (`spec.md` §4.2). Not persisted on the chunk itself: it is
/// derived from whether `(chunk, node)` is present in the node's unapproved
/// table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApprovalState {
    Unapproved,
    Approved,
}

/// Which of a chunk's two replica lists a tuple lives in. Cache-medium
/// replicas never count toward the replication factor (`spec.md` §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ReplicaListKind {
    Stored,
    Cached,
}
