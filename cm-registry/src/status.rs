//! Per-medium chunk status flags (`spec.md` §4.3). These are plain data
//! cached on the chunk so the facade and tests can read current health
//! without recomputation; the refresh engine that computes them lives in
//! the root crate. Modeled as `bitflags` the way the teacher uses
//! `bitflags` for compact on-disk/on-wire flag sets (e.g.
//! `pbs-datastore/src/data_blob.rs`'s header flags).

use bitflags::bitflags;

bitflags! {
    #[derive(Default, serde::Serialize, serde::Deserialize)]
    pub struct ChunkStatus: u32 {
        const NONE                  = 0;
        const LOST                  = 1 << 0;
        const UNDERREPLICATED       = 1 << 1;
        const OVERREPLICATED        = 1 << 2;
        const DATA_MISSING          = 1 << 3;
        const PARITY_MISSING        = 1 << 4;
        const QUORUM_MISSING        = 1 << 5;
        const SEALED                = 1 << 6;
        const UNSAFELY_PLACED       = 1 << 7;
        const INCONSISTENTLY_PLACED = 1 << 8;
        const PRECARIOUS            = 1 << 9;
    }
}
