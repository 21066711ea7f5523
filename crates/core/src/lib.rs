//! Shared domain types for the contrax job synchronization client.
//!
//! This crate has no I/O. It defines the job model, the job status state
//! machine, the job-creation request, and the core error type used by the
//! `contrax-jobsync` client.

pub mod error;
pub mod job;
pub mod request;
pub mod types;

pub use error::CoreError;
pub use job::{Job, JobStatus, JobType, JobUpdate};
pub use request::CreateJobRequest;
