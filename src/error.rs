//! Error Types
//!
//! Every layer of the engine has its own error enum:
//!
//! - [`ConfigError`]: malformed or unknown identifiers in the configuration
//! - [`PlanError`]: rule matching, cycles and rendering problems
//! - [`JobFailure`]: a single external command that did not succeed
//! - [`ExecError`]: the executor itself could not continue
//!
//! [`Error`] wraps all of them for callers that only need one type.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::workflow::pattern::Bindings;

/// Configuration errors. All are fatal and name the offending identifier.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No configured fastq has basename '{0}'")]
    UnknownFastq(String),

    #[error("Readgroup '{0}' is not defined in any library")]
    UnknownReadgroup(String),

    #[error("Library '{0}' is not defined")]
    UnknownLibrary(String),

    #[error("Genome '{0}' is not known")]
    UnknownGenome(String),

    #[error("Readgroup '{readgroup}' has {count} fastq files, expected exactly 2")]
    MateCount { readgroup: String, count: usize },

    #[error("Readgroup '{readgroup}' is defined in both '{first}' and '{second}'")]
    DuplicateReadgroup {
        readgroup: String,
        first: String,
        second: String,
    },

    #[error("Fastq basename '{basename}' is used by both {first} and {second}")]
    DuplicateFastq {
        basename: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("Library '{0}' is defined more than once")]
    DuplicateLibrary(String),

    #[error("Library '{0}' has no readgroups")]
    EmptyLibrary(String),

    #[error("Failed to read config '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Planning errors. These point at a target that cannot be built or at a
/// defect in the rule catalog.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("No rule produces '{target}'")]
    NoMatch { target: String },

    #[error("'{target}' is produced by more than one rule: {}", candidates.join(", "))]
    AmbiguousMatch {
        target: String,
        candidates: Vec<String>,
    },

    #[error("Cyclic dependency: {}", chain.join(" -> "))]
    CyclicDependency { chain: Vec<String> },

    #[error("Job '{job}' needs '{path}', which does not exist and no rule produces it")]
    MissingInput { job: String, path: String },

    #[error("Rule '{rule}': unknown placeholder '{{{placeholder}}}'")]
    UnknownPlaceholder { rule: String, placeholder: String },

    #[error("Rule '{rule}': wildcard '{{{wildcard}}}' is not bound")]
    UnboundWildcard { rule: String, wildcard: String },

    #[error("Rule '{rule}' is invalid: {reason}")]
    InvalidRule { rule: String, reason: String },

    #[error("Cannot plan '{target}' with rule '{rule}' ({bindings}): {source}")]
    Resolve {
        target: String,
        rule: String,
        bindings: Bindings,
        #[source]
        source: ConfigError,
    },
}

/// An external command that did not produce what it promised.
#[derive(Debug, Error)]
pub enum JobFailure {
    #[error("Job '{job}' exited with status {code:?}, see {log}")]
    Exit {
        job: String,
        code: Option<i32>,
        log: PathBuf,
    },

    #[error("Job '{job}' timed out after {after:?}")]
    TimedOut { job: String, after: Duration },

    #[error("Job '{job}' finished but did not create '{path}'")]
    MissingOutput { job: String, path: PathBuf },

    #[error("Job '{job}' could not be started: {source}")]
    Io {
        job: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that stop the executor as a whole.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Worker completion channel closed unexpectedly")]
    ChannelClosed,

    #[error("Failed to write run report '{path}': {reason}")]
    Report { path: PathBuf, reason: String },
}

/// Any error surfaced by the crate.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Exec(#[from] ExecError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_names_identifier() {
        let err = ConfigError::UnknownFastq("sample_R1".to_string());
        assert!(err.to_string().contains("sample_R1"));

        let err = ConfigError::MateCount {
            readgroup: "rg1".to_string(),
            count: 3,
        };
        assert!(err.to_string().contains("rg1"));
        assert!(err.to_string().contains('3'));
    }

    #[test]
    fn test_plan_error_display() {
        let err = PlanError::AmbiguousMatch {
            target: "out.bam".to_string(),
            candidates: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "'out.bam' is produced by more than one rule: a, b"
        );

        let err = PlanError::CyclicDependency {
            chain: vec!["x".to_string(), "y".to_string(), "x".to_string()],
        };
        assert!(err.to_string().contains("x -> y -> x"));

        let err = PlanError::UnknownPlaceholder {
            rule: "align".to_string(),
            placeholder: "params.nope".to_string(),
        };
        assert!(err.to_string().contains("{params.nope}"));
    }

    #[test]
    fn test_error_wraps_layers() {
        let err: Error = ConfigError::UnknownGenome("hg00".to_string()).into();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("hg00"));
    }
}
