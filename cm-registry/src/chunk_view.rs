//! Chunk views (`spec.md` §3 "Chunk view"): a modifier layered over an
//! underlying chunk, dynamic store, or another chunk view. Composition
//! always collapses eagerly so the indirection chain never exceeds depth 1
//! (`spec.md` §9 "Polymorphism over chunk-tree children").

use cm_api_types::{ChunkId, ObjectId, TransactionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ReadRange {
    pub lower_row_limit: Option<u64>,
    pub upper_row_limit: Option<u64>,
}

impl ReadRange {
    pub const UNBOUNDED: ReadRange = ReadRange {
        lower_row_limit: None,
        upper_row_limit: None,
    };

    /// Intersects two ranges, used when collapsing a chunk-view-over-
    /// chunk-view into a single view (`spec.md` §3).
    pub fn intersect(&self, other: &ReadRange) -> ReadRange {
        let lower = match (self.lower_row_limit, other.lower_row_limit) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        };
        let upper = match (self.upper_row_limit, other.upper_row_limit) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        };
        ReadRange {
            lower_row_limit: lower,
            upper_row_limit: upper,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkViewUnderlying {
    Chunk(ChunkId),
    DynamicStore(ObjectId),
}

#[derive(Debug, Clone)]
pub struct ChunkView {
    pub id: ObjectId,
    pub underlying: ChunkViewUnderlying,
    pub read_range: ReadRange,
    pub transaction_id: Option<TransactionId>,
    pub sole_parent: Option<ObjectId>,
}

impl ChunkView {
    pub fn new(id: ObjectId, underlying: ChunkViewUnderlying) -> Self {
        ChunkView {
            id,
            underlying,
            read_range: ReadRange::UNBOUNDED,
            transaction_id: None,
            sole_parent: None,
        }
    }

    /// Collapses a chunk-view-over-chunk-view composition: the result
    /// always points straight at the deeper view's underlying object, with
    /// the intersected range (`spec.md` §3).
    pub fn compose_over(outer_range: ReadRange, transaction_id: Option<TransactionId>, under: &ChunkView) -> (ChunkViewUnderlying, ReadRange, Option<TransactionId>) {
        (
            under.underlying,
            outer_range.intersect(&under.read_range),
            transaction_id.or(under.transaction_id),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composition_collapses_to_depth_one() {
        let inner = ChunkView {
            id: ObjectId(1),
            underlying: ChunkViewUnderlying::Chunk(cm_api_types::ChunkId::new(1, 1, cm_api_types::ChunkType::Regular, cm_api_types::CellTag(0))),
            read_range: ReadRange { lower_row_limit: Some(10), upper_row_limit: Some(100) },
            transaction_id: None,
            sole_parent: None,
        };
        let outer_range = ReadRange { lower_row_limit: Some(0), upper_row_limit: Some(50) };
        let (underlying, range, _) = ChunkView::compose_over(outer_range, None, &inner);
        assert_eq!(underlying, inner.underlying);
        assert_eq!(range.lower_row_limit, Some(10));
        assert_eq!(range.upper_row_limit, Some(50));
    }
}
