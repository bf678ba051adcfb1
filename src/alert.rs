//! The invariant-violation alert channel (`spec.md` §7 `InvariantViolation`,
//! §9 "Exception-free hot paths"). Invariant violations are never raised as
//! errors and never abort a mutation — they are logged at `warn` and the
//! caller proceeds, the way `spec.md` §7 requires. Modeled on the teacher's
//! `task_warn!`/`task_log!` family (`pbs-datastore/src/datastore.rs`'s
//! `garbage_collection` uses the same "log loudly, keep going" shape for
//! per-chunk anomalies during GC).

/// Logs an invariant violation as a warning. Never returns an error, never
/// panics: callers use this exactly where `spec.md` says "alert" rather
/// than "fail the request".
#[macro_export]
macro_rules! alert {
    ($($arg:tt)+) => {
        log::warn!(target: "chunk_manager::invariant", $($arg)+)
    };
}
