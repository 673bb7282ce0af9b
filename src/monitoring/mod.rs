//! Run Monitoring Module
//!
//! Tracking host load and the job timeline during a run.
//!
//! # Components
//!
//! - [`ResourceMonitor`]: Host CPU and memory sampling
//! - [`ExecutionTimeline`]: Job start/end timing for Gantt charts

pub mod resource;
pub mod timeline;

pub use resource::{ResourceMonitor, ResourceSample, ResourceSummary};
pub use timeline::{EventType, ExecutionTimeline, TimelineEvent};
