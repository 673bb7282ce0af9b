//! Plan Execution Module
//!
//! Runs a planned job graph: parallel scheduling under global and
//! per-class limits, failure propagation and cancellation.
//!
//! # Architecture
//!
//! - [`engine`]: Async run loop, policies and the run report
//! - [`scheduler`]: Job states and readiness under the concurrency caps
//! - [`step`]: Running one job's script with log capture

pub mod engine;
pub mod scheduler;
pub mod step;

pub use engine::{CancelToken, Engine, FailurePolicy, JobRecord, RunReport};
pub use scheduler::{JobMetrics, JobScheduler, JobStatus};
pub use step::{execute_job, StepOptions};
