//! The chunk-requisition registry (`spec.md` §2 dependency level 2, §3
//! "Chunk-requisition entry"): a deduplicated table mapping a requisition
//! (a set of `(account, medium, replication policy, committed)` entries plus
//! a vitality bit) to a stable, refcounted `RequisitionIndex`. Grounded on
//! the teacher's general approach to small interned/refcounted tables
//! (`pbs-datastore/src/chunk_store.rs`'s digest-keyed dedup), adapted here
//! to requisition *values* rather than chunk bytes.

use std::collections::HashMap;

use cm_api_types::{AccountId, ChunkManagerError, MediumIndex, ReplicationFactor, Result, RequisitionIndex};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReplicationPolicy {
    pub factor: ReplicationFactor,
    pub data_parts_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequisitionEntry {
    pub account: AccountId,
    pub medium: MediumIndex,
    pub policy: ReplicationPolicy,
    pub committed: bool,
}

/// A requisition is the set of entries plus a vitality bit; two
/// requisitions are equal iff their entry-sets and vital bits match
/// (`spec.md` §3). Entries are kept sorted so that set-equality reduces to
/// `Vec` equality and the value can be used as a hash-map key directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Requisition {
    entries: Vec<RequisitionEntry>,
    pub vital: bool,
}

impl Requisition {
    pub fn new(mut entries: Vec<RequisitionEntry>, vital: bool) -> Self {
        entries.sort_by(|a, b| {
            (a.account.0, a.medium, a.policy.factor, a.policy.data_parts_only, a.committed).cmp(&(
                b.account.0,
                b.medium,
                b.policy.factor,
                b.policy.data_parts_only,
                b.committed,
            ))
        });
        entries.dedup();
        Requisition { entries, vital }
    }

    pub fn entries(&self) -> &[RequisitionEntry] {
        &self.entries
    }

    /// Forces every entry's replication factor to 1, the way erasure chunks
    /// always do regardless of what ancestors requested (`spec.md` §3, §4.1,
    /// §4.6).
    pub fn with_erasure_factor_forced(mut self) -> Self {
        for entry in &mut self.entries {
            entry.policy.factor = 1;
        }
        self
    }

    pub fn aggregated_factor(&self, medium: MediumIndex) -> ReplicationFactor {
        self.entries
            .iter()
            .filter(|e| e.medium == medium)
            .map(|e| e.policy.factor)
            .max()
            .unwrap_or(0)
    }

    pub fn media(&self) -> impl Iterator<Item = MediumIndex> + '_ {
        let mut seen = Vec::new();
        self.entries.iter().filter_map(move |e| {
            if seen.contains(&e.medium) {
                None
            } else {
                seen.push(e.medium);
                Some(e.medium)
            }
        })
    }
}

#[derive(Debug, Default)]
pub struct RequisitionRegistry {
    by_value: HashMap<Requisition, RequisitionIndex>,
    by_index: HashMap<RequisitionIndex, Requisition>,
    refcounts: HashMap<RequisitionIndex, u64>,
    next_index: RequisitionIndex,
}

impl RequisitionRegistry {
    pub fn new() -> Self {
        RequisitionRegistry::default()
    }

    /// Interns `requisition`, bumping its refcount by one, and returns its
    /// stable index. Indices are never recycled while their refcount is
    /// nonzero (`spec.md` §3 Lifecycle).
    pub fn intern(&mut self, requisition: Requisition) -> RequisitionIndex {
        if let Some(&index) = self.by_value.get(&requisition) {
            *self.refcounts.entry(index).or_insert(0) += 1;
            return index;
        }
        let index = self.next_index;
        self.next_index += 1;
        self.by_value.insert(requisition.clone(), index);
        self.by_index.insert(index, requisition);
        self.refcounts.insert(index, 1);
        index
    }

    pub fn get(&self, index: RequisitionIndex) -> Option<&Requisition> {
        self.by_index.get(&index)
    }

    /// Releases one reference; when the count reaches zero the index is
    /// forgotten and may be reused only in the trivial sense that
    /// `next_index` never rewinds — the retired value simply stops existing.
    pub fn release(&mut self, index: RequisitionIndex) -> Result<()> {
        let count = self
            .refcounts
            .get_mut(&index)
            .ok_or_else(|| ChunkManagerError::internal("release of unknown requisition index"))?;
        if *count == 0 {
            return Err(ChunkManagerError::internal("requisition refcount underflow"));
        }
        *count -= 1;
        if *count == 0 {
            self.refcounts.remove(&index);
            if let Some(value) = self.by_index.remove(&index) {
                self.by_value.remove(&value);
            }
        }
        Ok(())
    }

    pub fn refcount(&self, index: RequisitionIndex) -> u64 {
        self.refcounts.get(&index).copied().unwrap_or(0)
    }
}
