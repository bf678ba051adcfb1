//! Chunk-tree traversal (`spec.md` §4.1, §9): the workhorse shared by
//! requisition update (walking ancestors) and tree visitors (walking
//! descendants). Both walkers use an **explicit stack**, never recursion —
//! the tree can be arbitrarily deep (`spec.md` §9) — and hold only weak
//! references plus a `version` snapshot across yield points, re-validating
//! liveness on every step the way the teacher's `hierarchy.rs` iterators
//! re-open directory handles rather than trust a cached listing across a
//! suspension point.

use std::collections::HashSet;
use std::rc::{Rc, Weak};
use std::cell::RefCell;

use cm_api_types::ObjectId;

use crate::chunk::Chunk;
use crate::chunk_list::ChunkList;
use crate::registry::{ChunkHandle, ChunkListHandle, ChunkViewHandle, DynamicStoreHandle, ObjectRegistry};

#[derive(Clone)]
pub enum ResolvedChild {
    Chunk(ChunkHandle),
    ChunkList(ChunkListHandle),
    ChunkView(ChunkViewHandle),
    DynamicStore(DynamicStoreHandle),
}

/// One emitted leaf during a descendant walk: the chunk reached, the row
/// index its first row occupies within the walked range, and the
/// range-limits in effect at that point (`spec.md` §4.1).
#[derive(Clone)]
pub struct TreeLeaf {
    pub chunk: Weak<RefCell<Chunk>>,
    pub row_index: u64,
    pub lower_limit: Option<u64>,
    pub upper_limit: Option<u64>,
}

struct StackFrame {
    list: Weak<RefCell<ChunkList>>,
    list_version: u64,
    next_child: usize,
    row_offset: u64,
}

/// A restartable, preemptible DFS over a chunk-list subtree (`spec.md`
/// §4.1). Call [`ChunkTreeVisitor::step`] repeatedly; each call advances at
/// most to the next leaf or yield point and returns `None` only once the
/// traversal is exhausted. A caller may suspend between `step` calls (e.g.
/// across a mutation boundary, `spec.md` §5) and resume safely: every
/// dereference re-validates through the registry.
pub struct ChunkTreeVisitor {
    stack: Vec<StackFrame>,
    lower_limit: Option<u64>,
    upper_limit: Option<u64>,
}

impl ChunkTreeVisitor {
    pub fn new(root: &ChunkListHandle, lower_limit: Option<u64>, upper_limit: Option<u64>) -> Self {
        ChunkTreeVisitor {
            stack: vec![StackFrame {
                list: Rc::downgrade(root),
                list_version: root.borrow().version,
                next_child: 0,
                row_offset: 0,
            }],
            lower_limit,
            upper_limit,
        }
    }

    /// Advances the walk by one step. Returns `Ok(None)` when the traversal
    /// is complete. A stale weak reference (the list was destroyed between
    /// steps) ends that branch silently rather than erroring — a concurrent
    /// delete is expected and tolerated (`spec.md` §4.3.1, §9).
    pub fn step(&mut self, registry: &ObjectRegistry) -> Option<TreeLeaf> {
        loop {
            let frame = self.stack.last_mut()?;
            let Some(list) = frame.list.upgrade() else {
                self.stack.pop();
                continue;
            };
            if list.borrow().version != frame.list_version {
                // The list mutated since we descended into it: abandon this
                // branch rather than risk an inconsistent index walk.
                self.stack.pop();
                continue;
            }
            let (child, row_offset) = {
                let list_ref = list.borrow();
                let Some(child) = list_ref.children.get(frame.next_child).copied() else {
                    drop(list_ref);
                    self.stack.pop();
                    continue;
                };
                (child, frame.row_offset)
            };
            frame.next_child += 1;

            let Ok(resolved) = registry.resolve_child(child) else {
                continue;
            };

            match resolved {
                ResolvedChild::Chunk(chunk_handle) => {
                    let leaf = TreeLeaf {
                        chunk: Rc::downgrade(&chunk_handle),
                        row_index: row_offset,
                        lower_limit: self.lower_limit,
                        upper_limit: self.upper_limit,
                    };
                    return Some(leaf);
                }
                ResolvedChild::ChunkList(nested) => {
                    let nested_version = nested.borrow().version;
                    self.stack.push(StackFrame {
                        list: Rc::downgrade(&nested),
                        list_version: nested_version,
                        next_child: 0,
                        row_offset,
                    });
                }
                ResolvedChild::ChunkView(view) => {
                    if let crate::chunk_view::ChunkViewUnderlying::Chunk(id) = view.borrow().underlying {
                        if let Ok(chunk_handle) = registry.get_chunk(id) {
                            let leaf = TreeLeaf {
                                chunk: Rc::downgrade(&chunk_handle),
                                row_index: row_offset,
                                lower_limit: view.borrow().read_range.lower_row_limit.or(self.lower_limit),
                                upper_limit: view.borrow().read_range.upper_row_limit.or(self.upper_limit),
                            };
                            return Some(leaf);
                        }
                    }
                }
                ResolvedChild::DynamicStore(store) => {
                    if let Some(id) = store.borrow().flushed_chunk {
                        if let Ok(chunk_handle) = registry.get_chunk(id) {
                            return Some(TreeLeaf {
                                chunk: Rc::downgrade(&chunk_handle),
                                row_index: row_offset,
                                lower_limit: self.lower_limit,
                                upper_limit: self.upper_limit,
                            });
                        }
                    }
                }
            }
        }
    }

    pub fn collect_all(mut self, registry: &ObjectRegistry) -> Vec<TreeLeaf> {
        let mut out = Vec::new();
        while let Some(leaf) = self.step(registry) {
            out.push(leaf);
        }
        out
    }
}

/// The outcome of a bounded BFS up `parents` links (`spec.md` §4.6): either
/// a set of owning nodes was found (possibly through several distinct
/// chunk lists, each visited once even if reached via multiple paths), or
/// the walk was ambiguous/ownerless and the caller should leave the
/// chunk's current requisition untouched.
pub enum AncestorWalkResult {
    Owners(Vec<cm_api_types::NodeId>),
    NoOwnerFound,
}

/// Walks unique ancestors starting from the chunk lists that directly
/// parent `start`, stopping at any chunk list whose `owning_nodes` is
/// nonempty (`spec.md` §4.6). Uses an explicit visited-set keyed by
/// `ObjectId` so a diamond (the same ancestor reached via two branches) is
/// only ever visited once (`spec.md` §9).
pub fn walk_ancestors_for_owners(registry: &ObjectRegistry, start_parents: &[ObjectId]) -> AncestorWalkResult {
    let mut visited: HashSet<ObjectId> = HashSet::new();
    let mut frontier: Vec<ObjectId> = start_parents.to_vec();
    let mut owners = Vec::new();

    while let Some(id) = frontier.pop() {
        if !visited.insert(id) {
            continue;
        }
        let Ok(list) = registry.get_chunk_list(id) else {
            continue;
        };
        let list_ref = list.borrow();
        if !list_ref.owning_nodes.is_empty() {
            owners.extend(list_ref.owning_nodes.iter().copied());
            continue;
        }
        for (parent, _count) in list_ref.parents() {
            if !visited.contains(&parent) {
                frontier.push(parent);
            }
        }
    }

    if owners.is_empty() {
        AncestorWalkResult::NoOwnerFound
    } else {
        AncestorWalkResult::Owners(owners)
    }
}

/// Bubbles a per-child statistics delta up every *unique* ancestor chunk
/// list of `start`, visiting each ancestor exactly once even through
/// diamonds (`spec.md` §4.1 "bubble statistics updates through all unique
/// ancestors").
pub fn bubble_statistics(
    registry: &ObjectRegistry,
    start_parents: &[ObjectId],
    delta: &crate::chunk_list::Statistics,
    subtract: bool,
) {
    let mut visited: HashSet<ObjectId> = HashSet::new();
    let mut frontier: Vec<ObjectId> = start_parents.to_vec();

    while let Some(id) = frontier.pop() {
        if !visited.insert(id) {
            continue;
        }
        let Ok(list) = registry.get_chunk_list(id) else {
            continue;
        };
        {
            let mut list_mut = list.borrow_mut();
            if subtract {
                list_mut.statistics.subtract(delta);
            } else {
                list_mut.statistics.add(delta);
            }
            list_mut.bump_version();
        }
        let list_ref = list.borrow();
        for (parent, _count) in list_ref.parents() {
            if !visited.contains(&parent) {
                frontier.push(parent);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk_list::ChunkListKind;
    use crate::medium::MediumRegistry;
    use cm_api_types::{CellTag, ChunkType, NodeId, TransactionId};

    fn new_registry() -> ObjectRegistry {
        ObjectRegistry::new(MediumRegistry::bootstrap(cm_config::MediumRegistryConfig::default()), CellTag(0))
    }

    #[test]
    fn descendant_walk_visits_chunks_in_order() {
        let mut reg = new_registry();
        let root = reg.create_chunk_list(ChunkListKind::Static);
        let root_id = root.borrow().id;
        let c1 = reg
            .create_chunk(ChunkType::Regular, 1, None, 0, TransactionId(1), None)
            .unwrap();
        let c1_id = c1.borrow().id;
        let c2 = reg
            .create_chunk(ChunkType::Regular, 2, None, 0, TransactionId(1), None)
            .unwrap();
        let c2_id = c2.borrow().id;
        reg.attach_to_chunk_list(
            root_id,
            &[ChunkTreeChildRef::Chunk(c1_id), ChunkTreeChildRef::Chunk(c2_id)],
        )
        .unwrap();

        let visitor = ChunkTreeVisitor::new(&root, None, None);
        let leaves = visitor.collect_all(&reg);
        assert_eq!(leaves.len(), 2);
        assert_eq!(leaves[0].chunk.upgrade().unwrap().borrow().id, c1_id);
        assert_eq!(leaves[1].chunk.upgrade().unwrap().borrow().id, c2_id);
    }

    #[test]
    fn ancestor_walk_stops_at_owning_chunk_list_and_dedups_diamonds() {
        let mut reg = new_registry();
        let owner = reg.create_chunk_list(ChunkListKind::Static);
        owner.borrow_mut().owning_nodes.push(NodeId(1));
        let owner_id = owner.borrow().id;

        let branch_a = reg.create_chunk_list(ChunkListKind::Static);
        let branch_a_id = branch_a.borrow().id;
        let branch_b = reg.create_chunk_list(ChunkListKind::Static);
        let branch_b_id = branch_b.borrow().id;
        branch_a.borrow_mut().add_parent(owner_id);
        branch_b.borrow_mut().add_parent(owner_id);

        let result = walk_ancestors_for_owners(&reg, &[branch_a_id, branch_b_id]);
        match result {
            // The owner is reached via two branches but visited once: the
            // dedup must not double-count its owning nodes.
            AncestorWalkResult::Owners(owners) => assert_eq!(owners, vec![NodeId(1)]),
            AncestorWalkResult::NoOwnerFound => panic!("expected an owner"),
        }
    }

    #[test]
    fn ancestor_walk_with_no_owner_reports_none() {
        let mut reg = new_registry();
        let orphan = reg.create_chunk_list(ChunkListKind::Static);
        let orphan_id = orphan.borrow().id;
        match walk_ancestors_for_owners(&reg, &[orphan_id]) {
            AncestorWalkResult::NoOwnerFound => {}
            AncestorWalkResult::Owners(_) => panic!("orphan chunk list has no owner"),
        }
    }
}
