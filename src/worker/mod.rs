//! Work execution for a continuation allocation.
//!
//! - [`WorkLoop`]: discovery → group → process → re-discover, until the
//!   queue drains or a pass makes no progress
//! - [`ItemProcessor`]: the pluggable per-item callback
//! - [`ShellProcessor`]: runs a per-job shell command for each item
//!
//! # Execution Flow
//!
//! 1. [`JobStore::next_batch`](crate::store::JobStore::next_batch) returns settled jobs
//! 2. Jobs are grouped by [`ItemProcessor::group_key`]
//! 3. Each group is prepared, its items processed, then released
//! 4. Repeat; a pass with zero completions ends the loop

pub mod processor;
pub mod shell;
pub mod work_loop;

pub use processor::ItemProcessor;
pub use shell::ShellProcessor;
pub use work_loop::{LoopOutcome, PassSummary, WorkLoop};
