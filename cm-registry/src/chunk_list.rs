//! Chunk lists (`spec.md` §3 "Chunk list"): ordered trees of children that
//! object owners compose out of chunks. Grounded on the teacher's
//! `BackupGroup`/`BackupDir` aggregate-over-children shape
//! (`pbs-datastore/src/backup_info.rs`) in spirit — a typed container that
//! tracks aggregated statistics over its members — generalized to a
//! recursive tree instead of a flat directory.

use std::collections::HashMap;

use cm_api_types::{NodeId, ObjectId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ChunkListKind {
    Static,
    SortedDynamicRoot,
    SortedDynamicTablet,
    SortedDynamicSubtablet,
    OrderedDynamicRoot,
    OrderedDynamicTablet,
    Hunk,
    HunkRoot,
}

/// One entry in a chunk list's ordered child sequence. Chunk-tree children
/// form a closed variant (`spec.md` §9): chunk, chunk list, chunk view, or
/// dynamic store, each referenced by `ObjectId` except chunks which use
/// their own id space — kept here as a tagged id rather than a strong
/// pointer so `cm-registry`'s tree/registry modules own the actual
/// strong-reference bookkeeping (`spec.md` §3 Ownership).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ChunkTreeChildRef {
    Chunk(cm_api_types::ChunkId),
    ChunkList(ObjectId),
    ChunkView(ObjectId),
    DynamicStore(ObjectId),
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Statistics {
    pub row_count: u64,
    pub chunk_count: u64,
    pub uncompressed_data_size: u64,
    pub compressed_data_size: u64,
    pub rank: u64,
}

impl Statistics {
    pub fn add(&mut self, other: &Statistics) {
        self.row_count += other.row_count;
        self.chunk_count += other.chunk_count;
        self.uncompressed_data_size += other.uncompressed_data_size;
        self.compressed_data_size += other.compressed_data_size;
        self.rank = self.rank.max(other.rank);
    }

    pub fn subtract(&mut self, other: &Statistics) {
        self.row_count = self.row_count.saturating_sub(other.row_count);
        self.chunk_count = self.chunk_count.saturating_sub(other.chunk_count);
        self.uncompressed_data_size = self.uncompressed_data_size.saturating_sub(other.uncompressed_data_size);
        self.compressed_data_size = self.compressed_data_size.saturating_sub(other.compressed_data_size);
    }
}

/// Prefix-sum statistics per child, for sorted/ordered dynamic chunk lists
/// that support row-range lookups (`spec.md` §3).
#[derive(Debug, Clone, Default)]
pub struct CumulativeStatistics {
    pub prefix: Vec<Statistics>,
}

impl CumulativeStatistics {
    pub fn append(&mut self, child_stats: &Statistics) {
        let mut running = self.prefix.last().cloned().unwrap_or_default();
        running.add(child_stats);
        self.prefix.push(running);
    }

    /// Drops the leading `count` entries, re-basing what remains so prefix
    /// sums stay relative to the new first child (ordered tablets'
    /// `clone_tablet_chunk_list`, `spec.md` §4.1).
    pub fn trim_front(&mut self, count: usize) {
        if count == 0 || self.prefix.is_empty() {
            return;
        }
        let base = self.prefix.get(count - 1).cloned().unwrap_or_default();
        self.prefix.drain(0..count.min(self.prefix.len()));
        for entry in &mut self.prefix {
            entry.subtract(&base);
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChunkList {
    pub id: ObjectId,
    pub kind: ChunkListKind,
    pub children: Vec<ChunkTreeChildRef>,
    parents: HashMap<ObjectId, u32>,
    pub owning_nodes: Vec<NodeId>,
    pub statistics: Statistics,
    pub cumulative_statistics: Option<CumulativeStatistics>,
    pub pivot_key: Option<Vec<u8>>,
    pub trimmed_child_count: u64,
    pub version: u64,
}

impl ChunkList {
    pub fn new(id: ObjectId, kind: ChunkListKind) -> Self {
        let cumulative_statistics = match kind {
            ChunkListKind::SortedDynamicRoot
            | ChunkListKind::SortedDynamicTablet
            | ChunkListKind::SortedDynamicSubtablet
            | ChunkListKind::OrderedDynamicRoot
            | ChunkListKind::OrderedDynamicTablet => Some(CumulativeStatistics::default()),
            ChunkListKind::Static | ChunkListKind::Hunk | ChunkListKind::HunkRoot => None,
        };
        ChunkList {
            id,
            kind,
            children: Vec::new(),
            parents: HashMap::new(),
            owning_nodes: Vec::new(),
            statistics: Statistics::default(),
            cumulative_statistics,
            pivot_key: None,
            trimmed_child_count: 0,
            version: 0,
        }
    }

    pub fn bump_version(&mut self) {
        self.version = self.version.wrapping_add(1);
    }

    pub fn add_parent(&mut self, parent: ObjectId) {
        *self.parents.entry(parent).or_insert(0) += 1;
        self.bump_version();
    }

    pub fn remove_parent(&mut self, parent: ObjectId) -> bool {
        let Some(count) = self.parents.get_mut(&parent) else {
            return false;
        };
        *count -= 1;
        let emptied = *count == 0;
        if emptied {
            self.parents.remove(&parent);
        }
        self.bump_version();
        true
    }

    pub fn parents(&self) -> impl Iterator<Item = (ObjectId, u32)> + '_ {
        self.parents.iter().map(|(id, count)| (*id, *count))
    }

    pub fn is_owned(&self) -> bool {
        !self.owning_nodes.is_empty() || !self.parents.is_empty()
    }

    /// Zero total refs (no parents, no owning nodes): eligible for
    /// destruction (`spec.md` §3 Lifecycle).
    pub fn is_orphaned(&self) -> bool {
        self.parents.is_empty() && self.owning_nodes.is_empty()
    }

    pub fn attach(&mut self, children: impl IntoIterator<Item = ChunkTreeChildRef>) {
        self.children.extend(children);
        self.bump_version();
    }

    /// Detaches every occurrence of `child` (a chunk list may reference the
    /// same child more than once, e.g. a repeated small chunk).
    pub fn detach(&mut self, child: ChunkTreeChildRef) -> usize {
        let before = self.children.len();
        self.children.retain(|c| *c != child);
        self.bump_version();
        before - self.children.len()
    }

    pub fn replace_child(&mut self, index: usize, new_child: ChunkTreeChildRef) -> Option<ChunkTreeChildRef> {
        let slot = self.children.get_mut(index)?;
        let old = *slot;
        *slot = new_child;
        self.bump_version();
        Some(old)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orphaned_iff_no_parents_and_no_owners() {
        let mut cl = ChunkList::new(ObjectId(1), ChunkListKind::Static);
        assert!(cl.is_orphaned());
        cl.add_parent(ObjectId(2));
        assert!(!cl.is_orphaned());
        cl.remove_parent(ObjectId(2));
        assert!(cl.is_orphaned());
    }

    #[test]
    fn cumulative_statistics_trim_front_rebases() {
        let mut cum = CumulativeStatistics::default();
        for rows in [10, 20, 5] {
            cum.append(&Statistics { row_count: rows, ..Default::default() });
        }
        assert_eq!(cum.prefix.last().unwrap().row_count, 35);
        cum.trim_front(1);
        assert_eq!(cum.prefix.len(), 2);
        assert_eq!(cum.prefix[0].row_count, 20);
        assert_eq!(cum.prefix[1].row_count, 25);
    }

    #[test]
    fn detach_removes_every_occurrence() {
        let mut cl = ChunkList::new(ObjectId(1), ChunkListKind::Static);
        let child = ChunkTreeChildRef::ChunkList(ObjectId(9));
        cl.attach([child, child, ChunkTreeChildRef::ChunkList(ObjectId(8))]);
        let removed = cl.detach(child);
        assert_eq!(removed, 2);
        assert_eq!(cl.children.len(), 1);
    }
}
