//! Dynamic stores (`spec.md` §3 "Dynamic store"): a placeholder for an
//! in-memory store owned by a tablet, eventually flushed to a real chunk.

use cm_api_types::{ChunkId, ObjectId};

#[derive(Debug, Clone)]
pub struct DynamicStore {
    pub id: ObjectId,
    pub flushed_chunk: Option<ChunkId>,
    pub sole_parent: Option<ObjectId>,
}

impl DynamicStore {
    pub fn new(id: ObjectId) -> Self {
        DynamicStore {
            id,
            flushed_chunk: None,
            sole_parent: None,
        }
    }

    pub fn is_flushed(&self) -> bool {
        self.flushed_chunk.is_some()
    }

    pub fn flush(&mut self, chunk: ChunkId) {
        self.flushed_chunk = Some(chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_records_the_backing_chunk() {
        let mut store = DynamicStore::new(ObjectId(1));
        assert!(!store.is_flushed());
        store.flush(ChunkId::new(1, 1, cm_api_types::ChunkType::Regular, cm_api_types::CellTag(0)));
        assert!(store.is_flushed());
    }
}
