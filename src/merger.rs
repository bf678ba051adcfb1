//! Chunk-list merger (`spec.md` §4.9, SPEC_FULL.md §C.3 `MergeMode`):
//! combines a run of small, compatible sibling chunks under a static
//! chunk list into one larger chunk. Grounded on the teacher's datastore
//! GC "gather small fragments, coalesce" shape, reworked so the registry
//! performs the tree edit and statistics rebalancing eagerly and
//! authoritatively (the same way `sealer` decides sealing eagerly), while
//! a storage node is separately told to go materialize the merged bytes.

use std::collections::HashSet;

use cm_api_types::requests::{ChunkInfo, ChunkMeta};
use cm_api_types::{ChunkId, ChunkType, MergeMode, NodeId, ReplicaListKind, TransactionId};
use cm_config::ManagerConfig;
use cm_registry::chunk_list::{ChunkTreeChildRef, Statistics};
use cm_registry::{ChunkListHandle, ObjectRegistry};

use crate::node::NodeRegistry;
use crate::placement::Placement;

/// Tracks chunks currently tied up in a pending merge so a second pass
/// doesn't pick the same source twice (`spec.md` §4.9 "is_node_being_merged").
#[derive(Default)]
pub struct MergeCoordinator {
    chunks_being_merged: HashSet<ChunkId>,
}

impl MergeCoordinator {
    pub fn is_chunk_being_merged(&self, chunk_id: ChunkId) -> bool {
        self.chunks_being_merged.contains(&chunk_id)
    }

    fn find_mergeable_run(&self, registry: &ObjectRegistry, list: &ChunkListHandle, config: &ManagerConfig) -> Option<Vec<ChunkId>> {
        let list_ref = list.borrow();
        let threshold = config.merger.small_chunk_row_count_threshold;
        let mut run: Vec<ChunkId> = Vec::new();
        let mut best: Option<Vec<ChunkId>> = None;

        for child in list_ref.children.iter() {
            let eligible = match *child {
                ChunkTreeChildRef::Chunk(id) => registry
                    .get_chunk(id)
                    .ok()
                    .map(|h| {
                        let c = h.borrow();
                        c.confirmed
                            && !c.chunk_type().is_journal()
                            && !c.chunk_type().is_erasure()
                            && !self.chunks_being_merged.contains(&id)
                            && c.info.as_ref().map(|i| i.row_count < threshold).unwrap_or(false)
                    })
                    .unwrap_or(false),
                _ => false,
            };
            if eligible {
                let ChunkTreeChildRef::Chunk(id) = *child else { unreachable!() };
                run.push(id);
                if run.len() == config.merger.max_chunks_per_merge {
                    return Some(run);
                }
            } else if run.len() >= config.merger.min_chunks_per_merge {
                best = Some(std::mem::take(&mut run));
                break;
            } else {
                run.clear();
            }
        }
        if best.is_none() && run.len() >= config.merger.min_chunks_per_merge {
            best = Some(run);
        }
        best
    }

    /// Finds the first mergeable run under `list` and folds it into one
    /// new chunk, replacing the old children atomically and rebalancing
    /// the ancestor chunk-count statistics (row/data totals are
    /// unaffected: the same bytes now live in fewer chunks). Returns the
    /// new chunk's id and the nodes it should be written to, for the
    /// caller to hand off to the node-side materialization job.
    pub fn schedule_chunk_merge(
        &mut self,
        registry: &mut ObjectRegistry,
        nodes: &mut NodeRegistry,
        placement: &Placement,
        config: &ManagerConfig,
        list: &ChunkListHandle,
    ) -> Option<(ChunkId, Vec<NodeId>)> {
        let list_id = list.borrow().id;
        let run = self.find_mergeable_run(registry, list, config)?;

        let mut combined = Statistics::default();
        let mut medium_index = registry.media.default_store_index();
        for &id in &run {
            let handle = registry.get_chunk(id).ok()?;
            let chunk = handle.borrow();
            if let Some(info) = &chunk.info {
                combined.row_count += info.row_count;
                combined.uncompressed_data_size += info.uncompressed_data_size;
                combined.compressed_data_size += info.compressed_data_size;
            }
            combined.chunk_count += 1;
            if let Some(first) = chunk.replica_list(ReplicaListKind::Stored).first() {
                medium_index = first.medium_index;
            }
        }

        let new_chunk = registry.create_chunk(ChunkType::Regular, run.len() as u32, None, 0, TransactionId(0), None).ok()?;
        let new_id = new_chunk.borrow().id;
        registry.unstage(new_id);
        new_chunk.borrow_mut().confirm(
            ChunkInfo {
                row_count: combined.row_count,
                uncompressed_data_size: combined.uncompressed_data_size,
                compressed_data_size: combined.compressed_data_size,
                disk_space: combined.compressed_data_size,
            },
            ChunkMeta::default(),
        );

        let old_children: Vec<ChunkTreeChildRef> = run.iter().map(|&id| ChunkTreeChildRef::Chunk(id)).collect();
        registry.detach_from_chunk_list(list_id, &old_children).ok()?;
        registry.attach_to_chunk_list(list_id, &[ChunkTreeChildRef::Chunk(new_id)]).ok()?;

        let removed_count = Statistics { chunk_count: combined.chunk_count, ..Default::default() };
        let added_count = Statistics { chunk_count: 1, ..Default::default() };
        cm_registry::tree::bubble_statistics(registry, &[list_id], &removed_count, true);
        cm_registry::tree::bubble_statistics(registry, &[list_id], &added_count, false);

        let Ok(medium) = registry.media.get(medium_index) else { return None };
        let crp_hash = new_chunk.borrow().consistent_replica_placement_hash;
        let targets = placement.allocate_write_targets(nodes, medium, medium_index, false, crp_hash, &[], config.crp.replicas_per_chunk as usize);

        for &source in &run {
            self.chunks_being_merged.insert(source);
        }
        self.chunks_being_merged.insert(new_id);
        new_chunk.borrow_mut().bump_version();
        Some((new_id, targets))
    }

    /// Releases the "being merged" guard once the node-side job for
    /// `new_chunk_id` (and its now-detached sources) completes or is
    /// abandoned.
    pub fn release(&mut self, new_chunk_id: ChunkId, sources: &[ChunkId]) {
        self.chunks_being_merged.remove(&new_chunk_id);
        for &id in sources {
            self.chunks_being_merged.remove(&id);
        }
    }
}

pub fn merge_mode_for(config: &ManagerConfig) -> MergeMode {
    if config.merger.max_chunks_per_merge > 8 {
        MergeMode::Deep
    } else {
        MergeMode::Shallow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cm_api_types::{CellTag, ReplicaIndex, ReplicaState};
    use cm_registry::{ChunkListKind, MediumRegistry};

    fn new_registry() -> ObjectRegistry {
        ObjectRegistry::new(MediumRegistry::bootstrap(cm_config::MediumRegistryConfig::default()), CellTag(0))
    }

    fn confirmed_small_chunk(reg: &mut ObjectRegistry, rows: u64) -> ChunkId {
        let handle = reg.create_chunk(ChunkType::Regular, 7, None, 0, TransactionId(0), None).unwrap();
        let id = handle.borrow().id;
        reg.unstage(id);
        handle.borrow_mut().confirm(
            ChunkInfo { row_count: rows, uncompressed_data_size: rows * 100, compressed_data_size: rows * 50, disk_space: rows * 50 },
            ChunkMeta::default(),
        );
        handle
            .borrow_mut()
            .add_replica(ReplicaListKind::Stored, cm_registry::ReplicaTuple { node: NodeId(1), replica_index: 0 as ReplicaIndex, medium_index: 0, state: ReplicaState::Generic })
            .unwrap();
        id
    }

    #[test]
    fn merges_a_run_of_small_chunks_into_one() {
        let mut reg = new_registry();
        let list = reg.create_chunk_list(ChunkListKind::Static);
        let list_id = list.borrow().id;
        let a = confirmed_small_chunk(&mut reg, 10);
        let b = confirmed_small_chunk(&mut reg, 20);
        reg.attach_to_chunk_list(list_id, &[ChunkTreeChildRef::Chunk(a), ChunkTreeChildRef::Chunk(b)]).unwrap();
        assert_eq!(list.borrow().children.len(), 2);

        let config = ManagerConfig::default();
        let mut nodes = NodeRegistry::new(config.refresh.replication_priority_count);
        let placement = Placement::new(&config);
        let mut coordinator = MergeCoordinator::default();
        let (new_id, _targets) = coordinator.schedule_chunk_merge(&mut reg, &mut nodes, &placement, &config, &list).unwrap();

        assert_eq!(list.borrow().children.len(), 1);
        assert_eq!(list.borrow().children[0], ChunkTreeChildRef::Chunk(new_id));
        let merged = reg.get_chunk(new_id).unwrap();
        assert_eq!(merged.borrow().info.as_ref().unwrap().row_count, 30);
        assert!(coordinator.is_chunk_being_merged(new_id));
        assert!(reg.chunk_exists(a));
        coordinator.release(new_id, &[a, b]);
        assert!(!coordinator.is_chunk_being_merged(new_id));
    }

    #[test]
    fn run_below_minimum_is_not_merged() {
        let mut reg = new_registry();
        let list = reg.create_chunk_list(ChunkListKind::Static);
        let list_id = list.borrow().id;
        let a = confirmed_small_chunk(&mut reg, 10);
        reg.attach_to_chunk_list(list_id, &[ChunkTreeChildRef::Chunk(a)]).unwrap();

        let config = ManagerConfig::default();
        let mut nodes = NodeRegistry::new(config.refresh.replication_priority_count);
        let placement = Placement::new(&config);
        let mut coordinator = MergeCoordinator::default();
        assert!(coordinator.schedule_chunk_merge(&mut reg, &mut nodes, &placement, &config, &list).is_none());
    }
}
