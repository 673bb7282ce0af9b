//! Rule Definitions
//!
//! A rule is a named processing stage declared as templates: named output
//! patterns, named inputs, named parameters and a command
//! template. Inputs and parameters that depend on the configuration are
//! closures over the bound wildcards and the [`IdentityResolver`].
//!
//! # Example
//!
//! ```
//! use std::path::Path;
//! use atacflow::config::WildcardDomain;
//! use atacflow::workflow::pattern::PathPattern;
//! use atacflow::workflow::rule::Rule;
//!
//! let root = Path::new("results");
//! let rule = Rule::new("index", "samtools index {input}")
//!     .with_output("bai", PathPattern::under(root, "md/{library}.md.bam.bai"))
//!     .with_input("bam", PathPattern::under(root, "md/{library}.md.bam"))
//!     .with_domain("library", WildcardDomain::Library);
//!
//! assert_eq!(rule.output_wildcards(), vec!["library"]);
//! ```

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{IdentityResolver, WildcardDomain};
use crate::error::{ConfigError, PlanError};

use super::pattern::{Bindings, PathPattern};

/// Computes input paths from bound wildcards.
pub type InputFn =
    Arc<dyn Fn(&Bindings, &IdentityResolver) -> Result<Vec<String>, ConfigError> + Send + Sync>;

/// Computes the binding sets a pattern input is expanded over.
pub type ExpandFn =
    Arc<dyn Fn(&Bindings, &IdentityResolver) -> Result<Vec<Bindings>, ConfigError> + Send + Sync>;

/// Computes a parameter value from bound wildcards.
pub type ParamFn =
    Arc<dyn Fn(&Bindings, &IdentityResolver) -> Result<String, ConfigError> + Send + Sync>;

/// Where a rule's input paths come from.
#[derive(Clone)]
pub enum InputSpec {
    /// A fixed path
    Literal(String),
    /// A template over the rule's own wildcards
    Pattern(PathPattern),
    /// Zero or more paths computed from the configuration
    Computed(InputFn),
    /// A template substituted once per computed binding set
    Expand(PathPattern, ExpandFn),
}

/// Where a rule's parameter value comes from.
#[derive(Clone)]
pub enum ParamSpec {
    Literal(String),
    Pattern(PathPattern),
    Computed(ParamFn),
}

/// A named processing stage.
#[derive(Clone)]
pub struct Rule {
    pub name: String,
    pub command: String,
    pub outputs: Vec<(String, PathPattern)>,
    pub inputs: Vec<(String, InputSpec)>,
    pub params: Vec<(String, ParamSpec)>,
    pub log: Option<PathPattern>,
    /// Concurrency class; jobs of the same class share a limit
    pub resource: Option<String>,
    pub threads: usize,
    pub domains: Vec<(String, WildcardDomain)>,
}

impl Rule {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_string(),
            command: command.into().trim().to_string(),
            outputs: Vec::new(),
            inputs: Vec::new(),
            params: Vec::new(),
            log: None,
            resource: None,
            threads: 1,
            domains: Vec::new(),
        }
    }

    pub fn with_output(mut self, name: impl Into<String>, pattern: PathPattern) -> Self {
        self.outputs.push((name.into(), pattern));
        self
    }

    pub fn with_input(mut self, name: impl Into<String>, pattern: PathPattern) -> Self {
        self.inputs.push((name.into(), InputSpec::Pattern(pattern)));
        self
    }

    pub fn with_literal_input(mut self, name: impl Into<String>, path: impl Into<String>) -> Self {
        self.inputs.push((name.into(), InputSpec::Literal(path.into())));
        self
    }

    pub fn with_computed_input<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Bindings, &IdentityResolver) -> Result<Vec<String>, ConfigError>
            + Send
            + Sync
            + 'static,
    {
        self.inputs.push((name.into(), InputSpec::Computed(Arc::new(f))));
        self
    }

    /// Input expanded over binding sets derived from the configuration,
    /// e.g. one alignment per readgroup of the bound library.
    pub fn with_expanded_input<F>(mut self, name: impl Into<String>, pattern: PathPattern, f: F) -> Self
    where
        F: Fn(&Bindings, &IdentityResolver) -> Result<Vec<Bindings>, ConfigError>
            + Send
            + Sync
            + 'static,
    {
        self.inputs
            .push((name.into(), InputSpec::Expand(pattern, Arc::new(f))));
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), ParamSpec::Literal(value.into())));
        self
    }

    pub fn with_pattern_param(mut self, name: impl Into<String>, pattern: PathPattern) -> Self {
        self.params.push((name.into(), ParamSpec::Pattern(pattern)));
        self
    }

    pub fn with_computed_param<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Bindings, &IdentityResolver) -> Result<String, ConfigError> + Send + Sync + 'static,
    {
        self.params.push((name.into(), ParamSpec::Computed(Arc::new(f))));
        self
    }

    pub fn with_log(mut self, pattern: PathPattern) -> Self {
        self.log = Some(pattern);
        self
    }

    pub fn with_resource(mut self, class: impl Into<String>) -> Self {
        self.resource = Some(class.into());
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    pub fn with_domain(mut self, wildcard: impl Into<String>, domain: WildcardDomain) -> Self {
        self.domains.push((wildcard.into(), domain));
        self
    }

    /// Domain of a wildcard; `Any` when the rule does not constrain it.
    pub fn domain_of(&self, wildcard: &str) -> WildcardDomain {
        self.domains
            .iter()
            .find(|(name, _)| name == wildcard)
            .map(|(_, domain)| *domain)
            .unwrap_or(WildcardDomain::Any)
    }

    /// Wildcards of the first output; every output carries the same set.
    pub fn output_wildcards(&self) -> Vec<&str> {
        self.outputs
            .first()
            .map(|(_, pattern)| pattern.wildcard_names())
            .unwrap_or_default()
    }

    /// Binding sets under which this rule produces `path`.
    ///
    /// Candidate splits whose values the resolver does not admit are dropped.
    pub fn match_output(&self, path: &str, resolver: &IdentityResolver) -> Vec<Bindings> {
        let mut found: Vec<Bindings> = Vec::new();
        for (_, pattern) in &self.outputs {
            for bindings in pattern.match_all(path) {
                let admitted = bindings
                    .iter()
                    .all(|(name, value)| resolver.admits(self.domain_of(name), value, &bindings));
                if admitted && !found.contains(&bindings) {
                    found.push(bindings);
                }
            }
        }
        found
    }

    /// Concrete output paths for a binding set.
    pub fn render_outputs(&self, bindings: &Bindings) -> Result<Vec<(String, String)>, PlanError> {
        self.outputs
            .iter()
            .map(|(name, pattern)| Ok((name.clone(), self.substitute(pattern, bindings)?)))
            .collect()
    }

    pub fn render_log(&self, bindings: &Bindings) -> Result<Option<PathBuf>, PlanError> {
        self.log
            .as_ref()
            .map(|pattern| self.substitute(pattern, bindings).map(PathBuf::from))
            .transpose()
    }

    /// Evaluates every input specification, keeping declaration order.
    pub fn resolve_inputs(
        &self,
        target: &str,
        bindings: &Bindings,
        resolver: &IdentityResolver,
    ) -> Result<Vec<(String, Vec<String>)>, PlanError> {
        self.inputs
            .iter()
            .map(|(name, spec)| {
                let paths = match spec {
                    InputSpec::Literal(path) => vec![path.clone()],
                    InputSpec::Pattern(pattern) => vec![self.substitute(pattern, bindings)?],
                    InputSpec::Computed(f) => f(bindings, resolver)
                        .map_err(|source| self.resolve_error(target, bindings, source))?,
                    InputSpec::Expand(pattern, f) => f(bindings, resolver)
                        .map_err(|source| self.resolve_error(target, bindings, source))?
                        .iter()
                        .map(|set| self.substitute(pattern, set))
                        .collect::<Result<Vec<_>, _>>()?,
                };
                Ok((name.clone(), paths))
            })
            .collect()
    }

    /// Evaluates every parameter, keeping declaration order.
    pub fn resolve_params(
        &self,
        target: &str,
        bindings: &Bindings,
        resolver: &IdentityResolver,
    ) -> Result<Vec<(String, String)>, PlanError> {
        self.params
            .iter()
            .map(|(name, spec)| {
                let value = match spec {
                    ParamSpec::Literal(value) => value.clone(),
                    ParamSpec::Pattern(pattern) => self.substitute(pattern, bindings)?,
                    ParamSpec::Computed(f) => f(bindings, resolver)
                        .map_err(|source| self.resolve_error(target, bindings, source))?,
                };
                Ok((name.clone(), value))
            })
            .collect()
    }

    fn substitute(&self, pattern: &PathPattern, bindings: &Bindings) -> Result<String, PlanError> {
        pattern
            .substitute(bindings)
            .map_err(|wildcard| PlanError::UnboundWildcard {
                rule: self.name.clone(),
                wildcard,
            })
    }

    fn resolve_error(&self, target: &str, bindings: &Bindings, source: ConfigError) -> PlanError {
        PlanError::Resolve {
            target: target.to_string(),
            rule: self.name.clone(),
            bindings: bindings.clone(),
            source,
        }
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field(
                "outputs",
                &self
                    .outputs
                    .iter()
                    .map(|(n, p)| format!("{}={}", n, p))
                    .collect::<Vec<_>>(),
            )
            .field(
                "inputs",
                &self.inputs.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(),
            )
            .field("resource", &self.resource)
            .field("threads", &self.threads)
            .finish()
    }
}
