//! Incremental statistics over the persisted event tables
//!
//! The snapshot's `last_updated` is a watermark: each tick reads only the
//! half-open range `[last_updated, now - settle)` from the store and folds it
//! into the running totals, so nothing is counted twice.
//!
//! Ranges key on the event timestamp set by the producer, not on when the
//! row was written. A row that reaches the store more than `settle` after
//! its timestamp lands below the watermark and is never counted.

pub mod aggregator;
pub mod scheduler;
pub mod stats;

pub use aggregator::{read_stats, StatsAggregator, TickOutcome};
pub use scheduler::{run_scheduler, spawn_scheduler};
pub use stats::StatsSnapshot;
