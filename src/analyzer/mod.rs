//! On-demand views reconstructed by scanning the log from the beginning
//!
//! There is no persistent index: every call opens its own ephemeral reader
//! and ends once the log has been idle for the configured timeout. Two
//! concurrent calls may therefore see different totals while producers are
//! appending.

pub mod replay;

pub use replay::{EventCounts, ReplayReader, ScanSummary};
