//! Scheduler-facing submission.
//!
//! - [`SubmissionGateway`]: renders `.submit`, pipes the self-invocation
//!   script into it and reads back the allocation id
//! - [`substitute`](template::substitute): `$name` placeholder expansion that
//!   leaves unknown names untouched

pub mod gateway;
pub mod template;

pub use gateway::SubmissionGateway;
