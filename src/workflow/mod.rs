//! Rule Graph Module
//!
//! Declaring rules, matching target paths to them, and planning the job
//! graph that produces a set of targets.
//!
//! # Structure
//!
//! - [`pattern`]: Path templates, matching and substitution
//! - [`rule`]: The rule type and its builders
//! - [`catalog`]: The fixed ATAC-seq rule set
//! - [`validator`]: Static rule checks
//! - [`planner`]: Target -> ordered job list
//! - [`job`]: Jobs and execution plans
//! - [`render`]: Command template rendering
//! - [`filters`]: Mappability filter chain
//! - [`targets`]: The default target set

pub mod catalog;
pub mod filters;
pub mod job;
pub mod pattern;
pub mod planner;
pub mod render;
pub mod rule;
pub mod targets;
pub mod validator;

pub use catalog::Catalog;
pub use filters::{build_filter_chain, render_filter_chain, FilterStep};
pub use job::{ExecutionPlan, Job, JobId};
pub use pattern::{Bindings, PathPattern};
pub use planner::Planner;
pub use rule::{InputSpec, ParamSpec, Rule};
pub use targets::default_targets;
pub use validator::{validate_catalog, validate_rule};
