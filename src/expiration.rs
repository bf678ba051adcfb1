//! Staged-chunk expiration and cross-cell export/import bookkeeping
//! (`spec.md` §4.7). Grounded on the teacher's GC "sweep what outlived its
//! grace period" shape (`pbs-datastore`'s orphan-chunk sweep), narrowed to
//! the single timer already modeled in `cm-registry`
//! ([`ObjectRegistry::expired_staged_chunks`]). Actually shipping a chunk's
//! bytes to another cell is out of scope (`spec.md` §1); this module only
//! tracks the intent and the local refcounting it implies.

use std::collections::{HashMap, HashSet};

use cm_api_types::requests::{ExportChunksRequest, ImportChunksRequest};
use cm_api_types::{CellTag, ChunkId, ChunkManagerError, Result};
use cm_config::MutationTimestamp;
use cm_registry::ObjectRegistry;

use crate::alert;

/// Reclaims every staged-but-never-confirmed chunk whose grace period has
/// elapsed (`spec.md` §4.7, E6), skipping any still held open by an
/// outstanding export. Returns the ids actually destroyed.
pub fn unstage_expired_chunks(registry: &mut ObjectRegistry, exports: &ExportTracker, now: MutationTimestamp) -> Vec<ChunkId> {
    let mut destroyed = Vec::new();
    for chunk_id in registry.expired_staged_chunks(now) {
        if exports.is_exported(chunk_id) {
            alert!("staged chunk {} expired while still exported, deferring reclaim", chunk_id);
            continue;
        }
        registry.destroy_chunk(chunk_id);
        destroyed.push(chunk_id);
    }
    destroyed
}

/// Tracks which cells a native chunk has been exported to, so expiration
/// and destruction can refuse to drop a chunk still referenced elsewhere
/// (`spec.md` §4.7).
#[derive(Default)]
pub struct ExportTracker {
    exported_to: HashMap<ChunkId, HashSet<CellTag>>,
}

impl ExportTracker {
    pub fn is_exported(&self, chunk_id: ChunkId) -> bool {
        self.exported_to.get(&chunk_id).map(|s| !s.is_empty()).unwrap_or(false)
    }

    pub fn exported_cells(&self, chunk_id: ChunkId) -> Vec<CellTag> {
        self.exported_to.get(&chunk_id).map(|s| s.iter().copied().collect()).unwrap_or_default()
    }

    fn record(&mut self, chunk_id: ChunkId, cell: CellTag) {
        self.exported_to.entry(chunk_id).or_default().insert(cell);
    }

    fn release(&mut self, chunk_id: ChunkId, cell: CellTag) {
        if let Some(set) = self.exported_to.get_mut(&chunk_id) {
            set.remove(&cell);
            if set.is_empty() {
                self.exported_to.remove(&chunk_id);
            }
        }
    }
}

/// Marks every chunk in `request` as exported to `destination_cell`
/// (`spec.md` §4.7): the chunk must exist and be confirmed, since an
/// unconfirmed chunk has no stable content to ship.
pub fn process_export_chunks(registry: &ObjectRegistry, exports: &mut ExportTracker, request: &ExportChunksRequest) -> Result<()> {
    for &chunk_id in &request.chunk_ids {
        let handle = registry.get_chunk(chunk_id)?;
        if !handle.borrow().confirmed {
            return Err(ChunkManagerError::invalid_argument(format!("chunk {} is not confirmed, cannot export", chunk_id)));
        }
        exports.record(chunk_id, request.destination_cell);
    }
    Ok(())
}

/// Releases `destination_cell`'s export hold on every chunk in `request`,
/// e.g. once the destination cell confirms it imported them.
pub fn acknowledge_export(exports: &mut ExportTracker, chunk_ids: &[ChunkId], destination_cell: CellTag) {
    for &chunk_id in chunk_ids {
        exports.release(chunk_id, destination_cell);
    }
}

/// Registers every chunk in `request` as foreign, creating an unconfirmed
/// placeholder for any id not already known locally (`spec.md` §4.7).
/// Already-imported ids are left untouched (idempotent).
pub fn process_import_chunks(registry: &mut ObjectRegistry, request: &ImportChunksRequest) -> Result<Vec<ChunkId>> {
    let mut imported = Vec::new();
    for &chunk_id in &request.chunk_ids {
        if registry.chunk_exists(chunk_id) {
            continue;
        }
        if chunk_id.cell_tag() != request.source_cell {
            return Err(ChunkManagerError::invalid_argument(format!(
                "chunk {} does not belong to claimed source cell {:?}",
                chunk_id, request.source_cell
            )));
        }
        let handle = registry.create_chunk(chunk_id.chunk_type(), 0, Some(chunk_id), 0, cm_api_types::TransactionId(0), None)?;
        handle.borrow_mut().foreign = true;
        imported.push(chunk_id);
    }
    Ok(imported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cm_api_types::requests::{ChunkInfo, ChunkMeta};
    use cm_api_types::ChunkType;
    use cm_registry::MediumRegistry;

    fn new_registry() -> ObjectRegistry {
        ObjectRegistry::new(MediumRegistry::bootstrap(cm_config::MediumRegistryConfig::default()), CellTag(0))
    }

    #[test]
    fn expired_staged_chunks_are_destroyed_unless_exported() {
        let mut reg = new_registry();
        let a = reg.create_chunk(ChunkType::Regular, 1, None, 0, cm_api_types::TransactionId(1), Some(10)).unwrap();
        let a_id = a.borrow().id;
        let b = reg.create_chunk(ChunkType::Regular, 2, None, 0, cm_api_types::TransactionId(1), Some(10)).unwrap();
        let b_id = b.borrow().id;
        b.borrow_mut().confirm(ChunkInfo { row_count: 1, uncompressed_data_size: 1, compressed_data_size: 1, disk_space: 1 }, ChunkMeta::default());

        let mut exports = ExportTracker::default();
        exports.record(b_id, CellTag(7));

        let destroyed = unstage_expired_chunks(&mut reg, &exports, 20);
        assert_eq!(destroyed, vec![a_id]);
        assert!(!reg.chunk_exists(a_id));
        assert!(reg.chunk_exists(b_id));
    }

    #[test]
    fn export_requires_confirmed_chunk() {
        let mut reg = new_registry();
        let a = reg.create_chunk(ChunkType::Regular, 1, None, 0, cm_api_types::TransactionId(1), None).unwrap();
        let a_id = a.borrow().id;
        let mut exports = ExportTracker::default();
        let req = ExportChunksRequest { chunk_ids: vec![a_id], destination_cell: CellTag(9) };
        assert!(process_export_chunks(&reg, &mut exports, &req).is_err());

        a.borrow_mut().confirm(ChunkInfo { row_count: 1, uncompressed_data_size: 1, compressed_data_size: 1, disk_space: 1 }, ChunkMeta::default());
        assert!(process_export_chunks(&reg, &mut exports, &req).is_ok());
        assert!(exports.is_exported(a_id));
        acknowledge_export(&mut exports, &[a_id], CellTag(9));
        assert!(!exports.is_exported(a_id));
    }
}
