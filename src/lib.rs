//! Master-side chunk registry, placement, and replication engine. A
//! single-threaded cooperative automaton (`spec.md` §5): every public
//! mutation runs to completion before the next one starts, driven by a
//! caller-supplied monotonically non-decreasing timestamp rather than a wall
//! clock. Built on `cm-registry` for chunk-tree storage and `cm-config` for
//! tunables, the same two-layer split the teacher draws between
//! `pbs-datastore` and `pbs-config`.

pub mod alert;
pub mod autotomizer;
pub mod expiration;
pub mod health;
pub mod jobs;
pub mod manager;
pub mod merger;
pub mod node;
pub mod placement;
pub mod refresh;
pub mod replica_state;
pub mod requisition_propagation;
pub mod sealer;

pub use manager::ChunkManager;
pub use node::{Node, NodeRegistry};
pub use placement::Placement;
