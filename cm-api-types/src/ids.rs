use std::fmt;

/// Index into the [`MediumRegistry`](crate) medium table. Stable once assigned.
pub type MediumIndex = u8;

/// Number of replicas demanded for a (chunk, medium) pair.
pub type ReplicationFactor = u8;

/// Index into the requisition registry. Interned, refcounted, never recycled
/// while the refcount is nonzero.
pub type RequisitionIndex = u32;

/// Position inside a chunk's replica set: 0 for regular/journal chunks,
/// the erasure part index for erasure chunks, sealed/unsealed slot for journal.
pub type ReplicaIndex = u8;

/// Opaque identifier of a storage node, as reported by the heartbeat layer.
/// The node registry and resolution of this id to node state live outside
/// the CORE (see `spec.md` §1); the chunk manager only ever stores and
/// compares it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// Account identifier, used only to charge/release resource usage; the
/// account subsystem itself is out of scope (`spec.md` §1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct AccountId(pub u64);

/// Identifies a chunk list, chunk view, or dynamic store. These object kinds
/// share one namespace the way the chunk tree's `{Chunk, ChunkList,
/// ChunkView, DynamicStore}` variant closes over a single id space in the
/// original design (`spec.md` §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj-{:x}", self.0)
    }
}

/// The transaction a staged chunk or chunk-list belongs to until it is
/// committed. Transaction lifecycle itself is out of scope (`spec.md` §1);
/// the manager only tracks which staged objects reference which id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct TransactionId(pub u64);

/// Which cell (in a multi-cell deployment) a chunk id originated in. Encoded
/// in the upper bits of a chunk id's first part (`spec.md` §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct CellTag(pub u16);

/// The kind of object a chunk id encodes, read from bit 0 of `parts[0]`
/// and a couple of adjacent tag bits (`spec.md` §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ChunkType {
    Regular,
    Erasure,
    Journal,
    ErasureJournal,
}

impl ChunkType {
    pub fn is_erasure(self) -> bool {
        matches!(self, ChunkType::Erasure | ChunkType::ErasureJournal)
    }

    pub fn is_journal(self) -> bool {
        matches!(self, ChunkType::Journal | ChunkType::ErasureJournal)
    }

    fn tag_bits(self) -> u32 {
        match self {
            ChunkType::Regular => 0b00,
            ChunkType::Erasure => 0b01,
            ChunkType::Journal => 0b10,
            ChunkType::ErasureJournal => 0b11,
        }
    }

    fn from_tag_bits(bits: u32) -> Self {
        match bits & 0b11 {
            0b00 => ChunkType::Regular,
            0b01 => ChunkType::Erasure,
            0b10 => ChunkType::Journal,
            _ => ChunkType::ErasureJournal,
        }
    }
}

/// 128-bit globally unique chunk id, laid out as `parts: [u32; 4]` per
/// `spec.md` §6: the low bits of `parts[0]` carry the type tag, the upper 16
/// bits of `parts[3]` carry the originating cell tag, and for erasure chunks
/// the part index is folded into the hash rather than stored separately (a
/// given erasure chunk's 14 part-replicas all share one `ChunkId`; the part
/// index lives in the replica tuple, not the id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct ChunkId {
    pub parts: [u32; 4],
}

impl ChunkId {
    pub fn new(counter: u64, random: u32, chunk_type: ChunkType, cell: CellTag) -> Self {
        let mut parts = [0u32; 4];
        parts[0] = (((counter & 0xffff_ffff) as u32) & !0b11) | chunk_type.tag_bits();
        parts[1] = (counter >> 32) as u32;
        parts[2] = random;
        parts[3] = (cell.0 as u32) << 16;
        ChunkId { parts }
    }

    pub fn chunk_type(&self) -> ChunkType {
        ChunkType::from_tag_bits(self.parts[0])
    }

    pub fn cell_tag(&self) -> CellTag {
        CellTag((self.parts[3] >> 16) as u16)
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08x}-{:08x}-{:08x}-{:08x}",
            self.parts[0], self.parts[1], self.parts[2], self.parts[3]
        )
    }
}

/// Monotonically increasing id for a job issued by the job controller
/// (`spec.md` §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_id_round_trips_type_and_cell() {
        for ty in [
            ChunkType::Regular,
            ChunkType::Erasure,
            ChunkType::Journal,
            ChunkType::ErasureJournal,
        ] {
            let id = ChunkId::new(0xdead_beef_1234, 0x5a5a_5a5a, ty, CellTag(7));
            assert_eq!(id.chunk_type(), ty);
            assert_eq!(id.cell_tag(), CellTag(7));
        }
    }
}
