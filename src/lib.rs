pub mod config;
pub mod error;
pub mod lifecycle;
pub mod preempt;
pub mod store;
pub mod submit;
pub mod worker;
