//! Tunable parameters for the chunk manager, named after the constants
//! `spec.md` calls out by name (`MaxMediumCount`, `ReplicaApproveTimeout`,
//! `ChunkRefreshDelay`, …). Grouped into the same per-component sections the
//! teacher groups its own config DTOs into (one struct per subsystem,
//! aggregated into one top-level config with a `Default` impl giving the
//! values the spec's examples assume).
//!
//! Durations are plain millisecond counts rather than a timestamp library:
//! per `spec.md` §5, every mutation carries its own monotonically
//! non-decreasing timestamp, and schedulers compare plain integers against
//! it rather than touching a wall clock directly.

use serde::{Deserialize, Serialize};

/// Milliseconds since an arbitrary epoch, supplied by the caller driving the
/// automaton (`spec.md` §5) rather than read from a wall clock. Using a
/// plain alias keeps scanners and timers trivially testable: a test can
/// advance "time" by constructing the next value itself.
pub type MutationTimestamp = i64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediumRegistryConfig {
    /// Upper bound on `Medium::index`, enforced at medium creation.
    pub max_medium_count: u32,
}

impl Default for MediumRegistryConfig {
    fn default() -> Self {
        MediumRegistryConfig {
            max_medium_count: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    pub min_replication_factor: u8,
    pub max_replication_factor: u8,
    /// How long an added-but-unconfirmed replica stays `Unapproved` before
    /// the heartbeat sweep drops it (`spec.md` §4.2).
    pub replica_approve_timeout_ms: i64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        ReplicationConfig {
            min_replication_factor: 1,
            max_replication_factor: 10,
            replica_approve_timeout_ms: 5 * 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Delay between `schedule_chunk_refresh` and the chunk becoming
    /// eligible for the periodic scan (`spec.md` §4.3.1).
    pub chunk_refresh_delay_ms: i64,
    /// Upper bound on chunks processed by one periodic refresh invocation.
    pub max_chunks_per_refresh: usize,
    /// Number of distinct replication-queue priority buckets; must be large
    /// enough that `clamp(current_replica_count - 1, 0, N-1)` never
    /// saturates below a real priority distinction for
    /// `max_replication_factor` (`spec.md` §4.3).
    pub replication_priority_count: usize,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        RefreshConfig {
            chunk_refresh_delay_ms: 3_000,
            max_chunks_per_refresh: 10_000,
            replication_priority_count: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementConfig {
    /// Fraction above which a node stops being a balancing target
    /// (`spec.md` §4.4).
    pub max_fill_factor: f64,
    /// Per-node session ceiling enforced only for balancing targets.
    pub max_balancing_sessions_per_node: u32,
    /// Default per-medium, per-rack replica cap absent a tighter
    /// codec/type-specific bound.
    pub default_max_replicas_per_rack: u32,
    /// Whether target selection tries with rack/DC awareness relaxed as a
    /// fallback, or treats the cap as non-negotiable.
    pub force_rack_awareness: bool,
    pub allow_multiple_replicas_per_node: bool,
    pub allow_multiple_parts_per_node: bool,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        PlacementConfig {
            max_fill_factor: 0.9,
            max_balancing_sessions_per_node: 10,
            default_max_replicas_per_rack: 3,
            force_rack_awareness: false,
            allow_multiple_replicas_per_node: false,
            allow_multiple_parts_per_node: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DataCenterConfig {
    pub enabled: bool,
    pub storage_data_centers: Vec<String>,
    pub banned_data_centers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrpConfig {
    /// Probes per chunk into the consistent-hash ring; also the length of a
    /// fully-satisfied deterministic target list (`spec.md` §4.4).
    pub replicas_per_chunk: u32,
    /// Base token count contributed by a bucket-0 node; bucket *k* gets
    /// `(k+1) * tokens_per_node`.
    pub tokens_per_node: u32,
    /// Number of total-space buckets nodes are split into (`B` in
    /// `spec.md` §4.4).
    pub bucket_count: u32,
}

impl Default for CrpConfig {
    fn default() -> Self {
        CrpConfig {
            replicas_per_chunk: 3,
            tokens_per_node: 10,
            bucket_count: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilityConfig {
    /// Cluster is "stable" only once at least this many nodes have reported
    /// heartbeat (`spec.md` §4.2.1 ally-announcement modes).
    pub min_online_nodes: u32,
    /// ...and the `LostVitalChunks` cardinality is at or below this.
    pub max_lost_vital_chunks: u32,
    /// Delay applied to "Delayed" mode announcements.
    pub delayed_announcement_ms: u64,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        StabilityConfig {
            min_online_nodes: 1,
            max_lost_vital_chunks: 0,
            delayed_announcement_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Pending jobs older than this are aborted on the next heartbeat
    /// (`spec.md` §5).
    pub job_timeout_ms: i64,
}

impl Default for JobConfig {
    fn default() -> Self {
        JobConfig {
            job_timeout_ms: 5 * 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealerConfig {
    /// Timeout for the quorum-info RPC round (`spec.md` §4.5, §5).
    pub journal_rpc_timeout_ms: i64,
}

impl Default for SealerConfig {
    fn default() -> Self {
        SealerConfig {
            journal_rpc_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpirationConfig {
    /// Lifetime of a staged-but-unconfirmed chunk before
    /// `unstage_expired_chunks` reclaims it (`spec.md` §4.7, E6).
    pub staged_chunk_expiration_timeout_ms: i64,
}

impl Default for ExpirationConfig {
    fn default() -> Self {
        ExpirationConfig {
            staged_chunk_expiration_timeout_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergerConfig {
    /// A chunk is merge-eligible below this row count (`spec.md` §4.9).
    pub small_chunk_row_count_threshold: u64,
    /// Minimum run length worth merging; fewer candidates aren't merged.
    pub min_chunks_per_merge: usize,
    /// Upper bound on chunks folded into a single merge job.
    pub max_chunks_per_merge: usize,
}

impl Default for MergerConfig {
    fn default() -> Self {
        MergerConfig {
            small_chunk_row_count_threshold: 1_000,
            min_chunks_per_merge: 2,
            max_chunks_per_merge: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutotomizerConfig {
    /// Journal chunks at or above this row count become autotomy candidates
    /// (`spec.md` §4.9).
    pub max_journal_chunk_row_count: u64,
    /// Minimum rows a split-off tail part must carry, so autotomy never
    /// produces a sliver smaller than this.
    pub min_rows_per_part: u64,
}

impl Default for AutotomizerConfig {
    fn default() -> Self {
        AutotomizerConfig {
            max_journal_chunk_row_count: 1_000_000,
            min_rows_per_part: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ManagerConfig {
    pub medium_registry: MediumRegistryConfig,
    pub replication: ReplicationConfig,
    pub refresh: RefreshConfig,
    pub placement: PlacementConfig,
    pub data_center: DataCenterConfig,
    pub crp: CrpConfig,
    pub jobs: JobConfig,
    pub sealer: SealerConfig,
    pub expiration: ExpirationConfig,
    pub stability: StabilityConfig,
    pub merger: MergerConfig,
    pub autotomizer: AutotomizerConfig,
}
