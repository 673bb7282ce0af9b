//! atacflow - Rule-Graph Engine for ATAC-seq Pipelines
//!
//! Declares an ATAC-seq processing pipeline as rules with wildcard path
//! patterns, expands requested output files into a job graph and runs
//! that graph in dependency order.
//!
//! # Architecture
//!
//! The library is organized into five modules:
//!
//! - [`config`]: Configuration loading and sample/reference resolution
//! - [`workflow`]: Path patterns, rules, the standard catalog and planning
//! - [`execution`]: Async execution engine with parallel scheduling
//! - [`monitoring`]: Resource usage tracking and execution timeline
//! - [`error`]: Error types shared across the crate
//!
//! # Example
//!
//! ```rust,no_run
//! use atacflow::config::{IdentityResolver, ReferenceTables};
//! use atacflow::workflow::{default_targets, Catalog, Planner};
//! use atacflow::{load_config, Engine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load the pipeline configuration
//!     let config = load_config("atacflow.yaml")?;
//!     let resolver = IdentityResolver::new(&config, ReferenceTables::builtin())?;
//!
//!     // Plan every default output
//!     let catalog = Catalog::standard(resolver.results());
//!     let targets = default_targets(&catalog, &resolver)?;
//!     let plan = Planner::new(&catalog, &resolver).plan(&targets)?;
//!
//!     // Execute the plan
//!     let mut engine = Engine::new(plan);
//!     engine.set_max_parallel(8);
//!     let report = engine.run().await?;
//!     println!("{} jobs completed", report.completed());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod execution;
pub mod monitoring;
pub mod workflow;

// Re-export commonly used types
pub use config::load_config;
pub use error::Error;
pub use execution::engine::Engine;
pub use workflow::{Catalog, Planner};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "atacflow";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::fixtures::sample_resolver;

    #[test]
    fn test_library_version() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.contains('.'));
    }

    #[test]
    fn test_app_name() {
        assert_eq!(APP_NAME, "atacflow");
    }

    #[test]
    fn test_module_exports_plan_default_outputs() {
        let resolver = sample_resolver();
        let catalog = Catalog::standard(resolver.results());
        let targets = workflow::default_targets(&catalog, &resolver).unwrap();

        let plan = Planner::new(&catalog, &resolver)
            .with_leaf_check(false)
            .plan(&targets)
            .unwrap();
        assert!(!plan.is_empty());

        let engine = Engine::new(plan);
        assert_eq!(engine.plan().requested().len(), targets.len());
    }

    #[test]
    fn test_version_format() {
        let parts: Vec<&str> = VERSION.split('.').collect();
        assert!(parts.len() >= 2, "Version should have at least major.minor");
        for part in parts {
            assert!(part.parse::<u32>().is_ok(), "Version components should be numeric");
        }
    }
}
