//! Watcher pipeline.
//!
//! - `PollCycle`: one sweep (fetch → compare → notify → persist)
//! - `BulkFailureGuard`: upstream outage detection
//! - `Scheduler`: non-overlapping periodic sweeps
//! - `Registry`: register / list / remove
//! - `purge_unseen`: retention cleanup

pub mod guard;
pub mod poll;
pub mod registration;
pub mod retention;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod fakes;

pub use guard::{BulkFailureGuard, GuardConfig, GuardStatus};
pub use poll::{CycleSettings, PollCycle};
pub use registration::Registry;
pub use retention::purge_unseen;
pub use scheduler::{Scheduler, TickOutcome};
