//! The object registry (`spec.md` §2, §3 Ownership): owns every chunk,
//! chunk list, chunk view, and dynamic store, and is the sole place that
//! hands out strong (`Rc`) and weak (`Weak`) references to them. Grounded
//! on the teacher's `DataStore` (`pbs-datastore/src/datastore.rs`) as "the
//! one facade other modules go through to reach stored objects", adapted
//! from a filesystem-backed store to an in-memory one since chunk bytes are
//! out of scope (`spec.md` §1).
//!
//! Single-threaded by design (`spec.md` §5): every method takes `&mut self`
//! or `&self` directly, with no internal locking. `Rc`/`Weak` rather than
//! `Arc`/`Weak` matches that single-automaton-thread model and is the
//! idiomatic choice for reference-counted graphs that never cross a thread
//! boundary.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};

use cm_api_types::{
    CellTag, ChunkId, ChunkManagerError, ChunkType, NodeId, ObjectId, Result, TransactionId,
};
use cm_config::MutationTimestamp;

use crate::chunk::Chunk;
use crate::chunk_list::{ChunkList, ChunkListKind, ChunkTreeChildRef};
use crate::chunk_view::ChunkView;
use crate::dynamic_store::DynamicStore;
use crate::medium::MediumRegistry;
use crate::requisition::RequisitionRegistry;

pub type ChunkHandle = Rc<RefCell<Chunk>>;
pub type ChunkListHandle = Rc<RefCell<ChunkList>>;
pub type ChunkViewHandle = Rc<RefCell<ChunkView>>;
pub type DynamicStoreHandle = Rc<RefCell<DynamicStore>>;

#[derive(Debug, Clone, Default)]
struct StagedChunk {
    transaction: TransactionId,
    expiration_time: Option<MutationTimestamp>,
}

pub struct ObjectRegistry {
    pub media: MediumRegistry,
    pub requisitions: RequisitionRegistry,

    chunks: HashMap<ChunkId, ChunkHandle>,
    chunk_lists: HashMap<ObjectId, ChunkListHandle>,
    chunk_views: HashMap<ObjectId, ChunkViewHandle>,
    dynamic_stores: HashMap<ObjectId, DynamicStoreHandle>,

    staged: HashMap<ChunkId, StagedChunk>,
    staged_by_transaction: HashMap<TransactionId, HashSet<ChunkId>>,

    next_object_id: u64,
    next_chunk_counter: u64,
    cell_tag: CellTag,
}

impl ObjectRegistry {
    pub fn new(media: MediumRegistry, cell_tag: CellTag) -> Self {
        ObjectRegistry {
            media,
            requisitions: RequisitionRegistry::new(),
            chunks: HashMap::new(),
            chunk_lists: HashMap::new(),
            chunk_views: HashMap::new(),
            dynamic_stores: HashMap::new(),
            staged: HashMap::new(),
            staged_by_transaction: HashMap::new(),
            next_object_id: 1,
            next_chunk_counter: 0,
            cell_tag,
        }
    }

    pub fn allocate_object_id(&mut self) -> ObjectId {
        let id = ObjectId(self.next_object_id);
        self.next_object_id += 1;
        id
    }

    fn allocate_chunk_id(&mut self, chunk_type: ChunkType, random: u32, hint: Option<ChunkId>) -> Result<ChunkId> {
        if let Some(hint) = hint {
            if self.chunks.contains_key(&hint) {
                return Err(ChunkManagerError::invalid_argument("chunk id hint collides with an existing chunk"));
            }
            return Ok(hint);
        }
        let counter = self.next_chunk_counter;
        self.next_chunk_counter += 1;
        Ok(ChunkId::new(counter, random, chunk_type, self.cell_tag))
    }

    /// Creates a new chunk, staged under `transaction`, per `spec.md` §4.1
    /// `create_chunk`. The caller supplies the already-interned requisition
    /// index; requisition assembly is `chunk-manager`'s job.
    pub fn create_chunk(
        &mut self,
        chunk_type: ChunkType,
        random: u32,
        hint_id: Option<ChunkId>,
        local_requisition_index: cm_api_types::RequisitionIndex,
        transaction: TransactionId,
        expiration_time: Option<MutationTimestamp>,
    ) -> Result<ChunkHandle> {
        let id = self.allocate_chunk_id(chunk_type, random, hint_id)?;
        let mut chunk = Chunk::new(id, local_requisition_index);
        chunk.expiration_time = expiration_time;
        let handle = Rc::new(RefCell::new(chunk));
        self.chunks.insert(id, handle.clone());
        self.staged.insert(
            id,
            StagedChunk {
                transaction,
                expiration_time,
            },
        );
        self.staged_by_transaction.entry(transaction).or_default().insert(id);
        Ok(handle)
    }

    pub fn get_chunk(&self, id: ChunkId) -> Result<ChunkHandle> {
        self.chunks.get(&id).cloned().ok_or(ChunkManagerError::NoSuchChunk(id))
    }

    pub fn weak_chunk(&self, id: ChunkId) -> Result<Weak<RefCell<Chunk>>> {
        self.get_chunk(id).map(|h| Rc::downgrade(&h))
    }

    pub fn chunk_exists(&self, id: ChunkId) -> bool {
        self.chunks.contains_key(&id)
    }

    pub fn is_staged(&self, id: ChunkId) -> bool {
        self.staged.contains_key(&id)
    }

    /// Unstages `id`, e.g. on confirm (cancels expiration) or on expiry
    /// (destroys it). Returns `false` if it was not staged.
    pub fn unstage(&mut self, id: ChunkId) -> bool {
        let Some(staged) = self.staged.remove(&id) else {
            return false;
        };
        if let Some(set) = self.staged_by_transaction.get_mut(&staged.transaction) {
            set.remove(&id);
            if set.is_empty() {
                self.staged_by_transaction.remove(&staged.transaction);
            }
        }
        true
    }

    pub fn staged_in_transaction(&self, transaction: TransactionId) -> Vec<ChunkId> {
        self.staged_by_transaction
            .get(&transaction)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// All still-staged chunks whose `expiration_time` has elapsed as of
    /// `now` (`spec.md` §4.7).
    pub fn expired_staged_chunks(&self, now: MutationTimestamp) -> Vec<ChunkId> {
        self.staged
            .iter()
            .filter_map(|(id, staged)| match staged.expiration_time {
                Some(t) if t <= now => Some(*id),
                _ => None,
            })
            .collect()
    }

    /// Destroys a chunk outright. The caller is responsible for having
    /// already verified the refcount invariant (`spec.md` §3 Lifecycle:
    /// destroyed when detached from all parents and the staging
    /// transaction ends) — the registry does not second-guess it, matching
    /// the "mutations are atomic, validated up-front" policy (`spec.md`
    /// §7).
    pub fn destroy_chunk(&mut self, id: ChunkId) -> Option<ChunkHandle> {
        self.unstage(id);
        self.chunks.remove(&id)
    }

    pub fn create_chunk_list(&mut self, kind: ChunkListKind) -> ChunkListHandle {
        let id = self.allocate_object_id();
        let handle = Rc::new(RefCell::new(ChunkList::new(id, kind)));
        self.chunk_lists.insert(id, handle.clone());
        handle
    }

    pub fn get_chunk_list(&self, id: ObjectId) -> Result<ChunkListHandle> {
        self.chunk_lists
            .get(&id)
            .cloned()
            .ok_or(ChunkManagerError::NoSuchChunkList(id))
    }

    pub fn weak_chunk_list(&self, id: ObjectId) -> Result<Weak<RefCell<ChunkList>>> {
        self.get_chunk_list(id).map(|h| Rc::downgrade(&h))
    }

    pub fn destroy_chunk_list(&mut self, id: ObjectId) -> Option<ChunkListHandle> {
        self.chunk_lists.remove(&id)
    }

    pub fn create_chunk_view(&mut self, underlying: crate::chunk_view::ChunkViewUnderlying) -> ChunkViewHandle {
        let id = self.allocate_object_id();
        let handle = Rc::new(RefCell::new(ChunkView::new(id, underlying)));
        self.chunk_views.insert(id, handle.clone());
        handle
    }

    pub fn get_chunk_view(&self, id: ObjectId) -> Result<ChunkViewHandle> {
        self.chunk_views
            .get(&id)
            .cloned()
            .ok_or(ChunkManagerError::NoSuchChunkView(id))
    }

    pub fn destroy_chunk_view(&mut self, id: ObjectId) -> Option<ChunkViewHandle> {
        self.chunk_views.remove(&id)
    }

    pub fn create_dynamic_store(&mut self) -> DynamicStoreHandle {
        let id = self.allocate_object_id();
        let handle = Rc::new(RefCell::new(DynamicStore::new(id)));
        self.dynamic_stores.insert(id, handle.clone());
        handle
    }

    pub fn get_dynamic_store(&self, id: ObjectId) -> Result<DynamicStoreHandle> {
        self.dynamic_stores
            .get(&id)
            .cloned()
            .ok_or(ChunkManagerError::NoSuchDynamicStore(id))
    }

    pub fn destroy_dynamic_store(&mut self, id: ObjectId) -> Option<DynamicStoreHandle> {
        self.dynamic_stores.remove(&id)
    }

    /// Resolves a tagged child reference to a tree-traversable handle
    /// (`spec.md` §9 "Polymorphism over chunk-tree children").
    pub fn resolve_child(&self, child: ChunkTreeChildRef) -> Result<crate::tree::ResolvedChild> {
        Ok(match child {
            ChunkTreeChildRef::Chunk(id) => crate::tree::ResolvedChild::Chunk(self.get_chunk(id)?),
            ChunkTreeChildRef::ChunkList(id) => crate::tree::ResolvedChild::ChunkList(self.get_chunk_list(id)?),
            ChunkTreeChildRef::ChunkView(id) => crate::tree::ResolvedChild::ChunkView(self.get_chunk_view(id)?),
            ChunkTreeChildRef::DynamicStore(id) => {
                crate::tree::ResolvedChild::DynamicStore(self.get_dynamic_store(id)?)
            }
        })
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn chunk_list_count(&self) -> usize {
        self.chunk_lists.len()
    }

    pub fn iter_chunks(&self) -> impl Iterator<Item = &ChunkHandle> {
        self.chunks.values()
    }

    pub fn iter_chunk_lists(&self) -> impl Iterator<Item = &ChunkListHandle> {
        self.chunk_lists.values()
    }

    /// Attaches `children` to `parent`, bumping parent/owning-node
    /// refcounts on each child the way `spec.md` §4.1 `attach_to_chunk_list`
    /// specifies. Does *not* touch statistics or bubble up the ancestor
    /// chain — this only extends `parent`'s child list and bumps its
    /// version. Rolling the children's statistics into ancestors is the
    /// caller's job, via [`crate::tree::bubble_statistics`], so it can
    /// de-duplicate diamonds (`spec.md` §9) before counting anything twice.
    pub fn attach_to_chunk_list(
        &mut self,
        parent: ObjectId,
        children: &[ChunkTreeChildRef],
    ) -> Result<()> {
        let parent_handle = self.get_chunk_list(parent)?;
        for child in children {
            match *child {
                ChunkTreeChildRef::Chunk(id) => {
                    self.get_chunk(id)?.borrow_mut().add_parent(parent);
                }
                ChunkTreeChildRef::ChunkList(id) => {
                    self.get_chunk_list(id)?.borrow_mut().add_parent(parent);
                }
                ChunkTreeChildRef::ChunkView(id) => {
                    self.get_chunk_view(id)?.borrow_mut().sole_parent = Some(parent);
                }
                ChunkTreeChildRef::DynamicStore(id) => {
                    self.get_dynamic_store(id)?.borrow_mut().sole_parent = Some(parent);
                }
            }
        }
        parent_handle.borrow_mut().attach(children.iter().copied());
        Ok(())
    }

    /// Detaches `children` from `parent`, per `spec.md` §4.1
    /// `detach_from_chunk_list`; `policy` is forwarded to the caller's
    /// statistics/placement notification, not interpreted here.
    pub fn detach_from_chunk_list(
        &mut self,
        parent: ObjectId,
        children: &[ChunkTreeChildRef],
    ) -> Result<()> {
        let parent_handle = self.get_chunk_list(parent)?;
        for child in children {
            let removed = parent_handle.borrow_mut().detach(*child);
            for _ in 0..removed {
                match *child {
                    ChunkTreeChildRef::Chunk(id) => {
                        if let Ok(handle) = self.get_chunk(id) {
                            handle.borrow_mut().remove_parent(parent).ok();
                        }
                    }
                    ChunkTreeChildRef::ChunkList(id) => {
                        if let Ok(handle) = self.get_chunk_list(id) {
                            handle.borrow_mut().remove_parent(parent);
                        }
                    }
                    ChunkTreeChildRef::ChunkView(id) => {
                        if let Ok(handle) = self.get_chunk_view(id) {
                            handle.borrow_mut().sole_parent = None;
                        }
                    }
                    ChunkTreeChildRef::DynamicStore(id) => {
                        if let Ok(handle) = self.get_dynamic_store(id) {
                            handle.borrow_mut().sole_parent = None;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::medium::MediumRegistry;

    fn new_registry() -> ObjectRegistry {
        ObjectRegistry::new(MediumRegistry::bootstrap(cm_config::MediumRegistryConfig::default()), CellTag(0))
    }

    #[test]
    fn staging_and_unstaging_roundtrip() {
        let mut reg = new_registry();
        let tx = TransactionId(1);
        let handle = reg
            .create_chunk(ChunkType::Regular, 7, None, 0, tx, Some(1_000))
            .unwrap();
        let id = handle.borrow().id;
        assert!(reg.is_staged(id));
        assert_eq!(reg.staged_in_transaction(tx), vec![id]);
        assert!(reg.unstage(id));
        assert!(!reg.is_staged(id));
    }

    #[test]
    fn expired_staged_chunks_are_found_by_timestamp() {
        let mut reg = new_registry();
        let tx = TransactionId(1);
        let handle = reg
            .create_chunk(ChunkType::Regular, 7, None, 0, tx, Some(1_000))
            .unwrap();
        let id = handle.borrow().id;
        assert!(reg.expired_staged_chunks(500).is_empty());
        assert_eq!(reg.expired_staged_chunks(1_000), vec![id]);
    }

    #[test]
    fn attach_updates_both_child_and_parent() {
        let mut reg = new_registry();
        let parent = reg.create_chunk_list(ChunkListKind::Static);
        let parent_id = parent.borrow().id;
        let child = reg.create_chunk_list(ChunkListKind::Static);
        let child_id = child.borrow().id;
        reg.attach_to_chunk_list(parent_id, &[ChunkTreeChildRef::ChunkList(child_id)]).unwrap();
        assert_eq!(child.borrow().parents().count(), 1);
        assert_eq!(parent.borrow().children.len(), 1);
    }
}
