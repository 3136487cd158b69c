//! On-disk job queue.
//!
//! The working directory holds one folder per job. Each folder carries a
//! YAML descriptor whose `manifest` lists the items still to do; an item is
//! done once its completion marker sits beside it.
//!
//! # Components
//!
//! - [`JobStore`]: discovery, manifest filtering and the settle backoff
//! - [`is_settled`](settle::is_settled): the settle-gate predicate
//! - [`WarnOnce`](warnings::WarnOnce): dedup for unreadable descriptors

pub mod job;
pub mod queue;
pub mod settle;
pub mod warnings;

pub use job::{JobDescriptor, JobUnit, WorkItem};
pub use queue::{JobProgress, JobStore};
