//! Journal chunk autotomizer (`spec.md` §4.9): splits an oversized,
//! still-growing journal chunk into two siblings along a row boundary, so
//! no single chunk grows without bound before it can be sealed. Mirrors
//! `sealer`'s shape: the registry decides the split and performs the tree
//! edit eagerly and authoritatively, then a storage node is told to
//! physically cut its replica at the same row boundary.

use cm_api_types::requests::ChunkInfo;
use cm_api_types::{ChunkId, ChunkType, NodeId, ObjectId, ReplicaListKind, TransactionId};
use cm_config::ManagerConfig;
use cm_registry::chunk_list::{ChunkTreeChildRef, Statistics};
use cm_registry::ObjectRegistry;

fn sole_parent(registry: &ObjectRegistry, chunk_id: ChunkId) -> Option<ObjectId> {
    let chunk = registry.get_chunk(chunk_id).ok()?;
    let chunk = chunk.borrow();
    let mut parents = chunk.parents();
    let (first, _) = parents.next()?;
    if parents.next().is_some() {
        return None;
    }
    Some(first)
}

/// Finds the split point for `chunk_id`, if it is a confirmed, unsealed
/// journal chunk at or above the configured row ceiling: the row midpoint,
/// as long as both halves still clear `min_rows_per_part`.
fn safe_split_row(registry: &ObjectRegistry, chunk_id: ChunkId, config: &ManagerConfig) -> Option<u64> {
    let chunk = registry.get_chunk(chunk_id).ok()?;
    let chunk = chunk.borrow();
    if !chunk.chunk_type().is_journal() || chunk.sealed || !chunk.confirmed {
        return None;
    }
    let info = chunk.info.as_ref()?;
    if info.row_count < config.autotomizer.max_journal_chunk_row_count {
        return None;
    }
    let split = info.row_count / 2;
    let min = config.autotomizer.min_rows_per_part;
    if split < min || info.row_count - split < min {
        return None;
    }
    Some(split)
}

/// Splits `chunk_id` at a safe row boundary, shrinking it in place and
/// appending a new sibling chunk carrying the remainder rows (safe
/// because the chunk's sole parent is an append-only journal chunk list,
/// so the new chunk belongs at the end). Returns the new chunk's id and
/// the nodes already holding `chunk_id`'s replicas, which must physically
/// perform the same cut.
pub fn autotomize_chunk(registry: &mut ObjectRegistry, config: &ManagerConfig, chunk_id: ChunkId) -> Option<(ChunkId, Vec<NodeId>)> {
    let split = safe_split_row(registry, chunk_id, config)?;
    let parent = sole_parent(registry, chunk_id)?;

    let (remainder_info, holders) = {
        let handle = registry.get_chunk(chunk_id).ok()?;
        let mut chunk = handle.borrow_mut();
        let total = chunk.info.clone()?;
        let remainder_rows = total.row_count - split;
        let fraction = remainder_rows as f64 / total.row_count.max(1) as f64;
        let remainder = ChunkInfo {
            row_count: remainder_rows,
            uncompressed_data_size: (total.uncompressed_data_size as f64 * fraction) as u64,
            compressed_data_size: (total.compressed_data_size as f64 * fraction) as u64,
            disk_space: (total.disk_space as f64 * fraction) as u64,
        };
        let shrunk = ChunkInfo {
            row_count: split,
            uncompressed_data_size: total.uncompressed_data_size.saturating_sub(remainder.uncompressed_data_size),
            compressed_data_size: total.compressed_data_size.saturating_sub(remainder.compressed_data_size),
            disk_space: total.disk_space.saturating_sub(remainder.disk_space),
        };
        chunk.info = Some(shrunk);
        chunk.bump_version();
        let holders: Vec<NodeId> = chunk.replica_list(ReplicaListKind::Stored).iter().map(|r| r.node).collect();
        (remainder, holders)
    };

    let chunk_type = registry.get_chunk(chunk_id).ok()?.borrow().chunk_type();
    let new_chunk = registry.create_chunk(chunk_type, (split & 0xffff_ffff) as u32, None, 0, TransactionId(0), None).ok()?;
    let new_id = new_chunk.borrow().id;
    registry.unstage(new_id);
    new_chunk.borrow_mut().confirm(remainder_info, cm_api_types::requests::ChunkMeta::default());

    registry.attach_to_chunk_list(parent, &[ChunkTreeChildRef::Chunk(new_id)]).ok()?;
    cm_registry::tree::bubble_statistics(registry, &[parent], &Statistics { chunk_count: 1, ..Default::default() }, false);

    Some((new_id, holders))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cm_api_types::{CellTag, ReplicaIndex, ReplicaState};
    use cm_registry::{ChunkListKind, MediumRegistry, ReplicaTuple};

    fn new_registry() -> ObjectRegistry {
        ObjectRegistry::new(MediumRegistry::bootstrap(cm_config::MediumRegistryConfig::default()), CellTag(0))
    }

    fn oversized_journal_chunk(reg: &mut ObjectRegistry, parent: ObjectId, rows: u64) -> ChunkId {
        let handle = reg.create_chunk(ChunkType::Journal, 3, None, 0, TransactionId(0), None).unwrap();
        let id = handle.borrow().id;
        reg.unstage(id);
        handle.borrow_mut().confirm(
            ChunkInfo { row_count: rows, uncompressed_data_size: rows * 10, compressed_data_size: rows * 5, disk_space: rows * 5 },
            cm_api_types::requests::ChunkMeta::default(),
        );
        handle.borrow_mut().add_replica(ReplicaListKind::Stored, ReplicaTuple { node: NodeId(1), replica_index: 0 as ReplicaIndex, medium_index: 0, state: ReplicaState::Generic }).unwrap();
        reg.attach_to_chunk_list(parent, &[ChunkTreeChildRef::Chunk(id)]).unwrap();
        id
    }

    #[test]
    fn splits_an_oversized_journal_chunk_in_two() {
        let mut reg = new_registry();
        let list = reg.create_chunk_list(ChunkListKind::Hunk);
        let list_id = list.borrow().id;
        let config = ManagerConfig { autotomizer: cm_config::AutotomizerConfig { max_journal_chunk_row_count: 100, min_rows_per_part: 10 }, ..Default::default() };
        let chunk_id = oversized_journal_chunk(&mut reg, list_id, 200);

        let (new_id, holders) = autotomize_chunk(&mut reg, &config, chunk_id).unwrap();
        assert_eq!(holders, vec![NodeId(1)]);
        let original = reg.get_chunk(chunk_id).unwrap();
        assert_eq!(original.borrow().info.as_ref().unwrap().row_count, 100);
        let tail = reg.get_chunk(new_id).unwrap();
        assert_eq!(tail.borrow().info.as_ref().unwrap().row_count, 100);
        assert_eq!(list.borrow().children.len(), 2);
    }

    #[test]
    fn chunk_below_threshold_is_not_split() {
        let mut reg = new_registry();
        let list = reg.create_chunk_list(ChunkListKind::Hunk);
        let list_id = list.borrow().id;
        let config = ManagerConfig::default();
        let chunk_id = oversized_journal_chunk(&mut reg, list_id, 10);
        assert!(autotomize_chunk(&mut reg, &config, chunk_id).is_none());
    }
}
