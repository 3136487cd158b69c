//! Allocation lifecycle.
//!
//! ```text
//! FRESH ──lock──▶ SUBMITTING ──▶ (exit)
//! continuation: ARMED ──▶ WORKING ──drain/stall──▶ DRAINED
//!                                  └──preempt──▶ SUBMITTING ──▶ (exit)
//! ```

pub mod controller;
pub mod lock;
pub mod record;

pub use controller::{LaunchOutcome, LifecycleController, LifecycleState, Mode, RunOutcome};
pub use lock::{LockAttempt, SubmissionLock};
pub use record::{LifecycleFile, LifecycleRecord};
