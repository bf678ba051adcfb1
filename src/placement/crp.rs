//! Consistent Replica Placement (`spec.md` §4.4 "Consistent Replica
//! Placement (CRP)", §8.6 determinism property). Built on `siphasher`
//! (already part of the teacher's workspace dependency graph) rather than
//! pulling in a new hashing crate, exactly the "keep using the teacher's
//! crates for concerns they already cover" rule in `SPEC_FULL.md` asks for.

use std::hash::{Hash, Hasher};

use cm_api_types::{MediumIndex, NodeId};
use cm_config::CrpConfig;
use siphasher::sip::SipHasher13;

const CRP_SEED: u64 = 0x6368_756e_6b6d_6772; // "chunkmgr" in ASCII, fixed so the ring is reproducible across runs.

fn hash_u64(a: u64, b: u64, c: u64) -> u64 {
    let mut hasher = SipHasher13::new_with_keys(CRP_SEED, 0);
    a.hash(&mut hasher);
    b.hash(&mut hasher);
    c.hash(&mut hasher);
    hasher.finish()
}

/// One node's contribution to the ring: `token_count` positions, each at
/// `hash(node, medium, token_index)`.
pub fn node_ring_positions(node: NodeId, medium: MediumIndex, token_count: u32) -> Vec<u64> {
    (0..token_count)
        .map(|i| hash_u64(node.0 as u64, medium as u64, i as u64))
        .collect()
}

/// Assigns a node's per-medium token count from its total-space bucket
/// (`spec.md` §4.4: "bucket-0 = 1x tokens_per_node, bucket-1 = 2x, …").
/// `bucket` is `0..bucket_count`, with higher buckets meaning more total
/// space.
pub fn token_count_for_bucket(bucket: u32, cfg: &CrpConfig) -> u32 {
    (bucket + 1).min(cfg.bucket_count) * cfg.tokens_per_node
}

/// Assigns every node in `total_space` to a bucket `0..bucket_count` by
/// splitting the sorted totals into `bucket_count` equal-width percentile
/// bands, the periodic "total-space distribution" recomputation `spec.md`
/// §4.4 describes.
pub fn assign_buckets(total_space: &[(NodeId, u64)], bucket_count: u32) -> std::collections::HashMap<NodeId, u32> {
    let mut sorted: Vec<(NodeId, u64)> = total_space.to_vec();
    sorted.sort_by_key(|(_, space)| *space);
    let n = sorted.len().max(1);
    sorted
        .into_iter()
        .enumerate()
        .map(|(rank, (node, _))| {
            let bucket = ((rank * bucket_count as usize) / n).min(bucket_count as usize - 1) as u32;
            (node, bucket)
        })
        .collect()
}

/// A node's ring contribution, keyed for successor lookups.
pub struct Ring {
    /// Sorted `(position, node)` pairs.
    positions: Vec<(u64, NodeId)>,
}

impl Ring {
    pub fn build(tokens_by_node: &[(NodeId, MediumIndex, u32)]) -> Self {
        let mut positions = Vec::new();
        for &(node, medium, token_count) in tokens_by_node {
            for pos in node_ring_positions(node, medium, token_count) {
                positions.push((pos, node));
            }
        }
        positions.sort_by_key(|(pos, _)| *pos);
        Ring { positions }
    }

    fn successor(&self, from: u64, exclude: &[NodeId]) -> Option<NodeId> {
        if self.positions.is_empty() {
            return None;
        }
        let start = self.positions.partition_point(|(pos, _)| *pos < from);
        let n = self.positions.len();
        for step in 0..n {
            let (_, node) = self.positions[(start + step) % n];
            if !exclude.contains(&node) {
                return Some(node);
            }
        }
        None
    }

    /// Deterministically orders up to `replicas_per_chunk` distinct nodes
    /// for `crp_hash` (`spec.md` §4.4, §8.6): one successor-walk probe per
    /// replica slot, skipping nodes already chosen by an earlier probe.
    pub fn targets(&self, crp_hash: u64, replicas_per_chunk: u32) -> Vec<NodeId> {
        let mut chosen = Vec::new();
        for probe in 0..replicas_per_chunk {
            let probe_hash = hash_u64(crp_hash, probe as u64, 0);
            if let Some(node) = self.successor(probe_hash, &chosen) {
                chosen.push(node);
            } else {
                break;
            }
        }
        chosen
    }
}
