/// Kind of work a job asks a storage node to perform (`spec.md` §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum JobType {
    Replicate,
    Remove,
    Repair,
    Seal,
    Merge,
    Autotomize,
}

/// A job's place in its lifecycle (`spec.md` §4.8): `Waiting -> Running ->
/// (Completed | Failed | Aborted)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum JobState {
    Waiting,
    Running,
    Completed,
    Failed,
    Aborted,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Aborted
        )
    }
}

/// Merge strategy chosen by the merger for a run of chunks (SPEC_FULL.md
/// §C.3, grounded on `TChunkMergerWriterOptions` in the original source).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum MergeMode {
    /// Concatenate without re-encoding; requires matching codecs/media.
    Shallow,
    /// Re-chunk and re-encode the run's data.
    Deep,
}

/// Resource cost charged against a node's per-heartbeat budget while a job
/// is in flight (SPEC_FULL.md §C.2). Subtracted when a job starts, restored
/// when it leaves the registry.
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct JobResources {
    /// Bytes of scratch memory the job needs on the node (nonzero mainly for
    /// `Repair`, which must hold erasure-decode buffers).
    pub memory: u64,
    /// How many of the node's per-type slots this job occupies; always 1
    /// for the job types this manager issues, kept as a field rather than a
    /// constant so a future job type can occupy more than one slot.
    pub slots: u32,
}

impl JobResources {
    pub fn slot(slots: u32) -> Self {
        JobResources { memory: 0, slots }
    }

    pub fn with_memory(mut self, memory: u64) -> Self {
        self.memory = memory;
        self
    }
}
