//! Wildcard Planner
//!
//! Turns requested target paths into an [`ExecutionPlan`]:
//! - Each target is matched against the catalog to find its rule and bindings
//! - Inputs are resolved and planned recursively (post-order DFS)
//! - Inputs no rule produces become leaves
//! - Every job is planned once, whichever of its outputs was asked for
//!
//! Jobs are appended after all of their dependencies, so the resulting list
//! is already in topological order. Ties follow request order, then input
//! declaration order.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use log::{debug, info};

use crate::config::IdentityResolver;
use crate::error::PlanError;

use super::catalog::Catalog;
use super::job::{ExecutionPlan, Job, JobId};
use super::pattern::Bindings;
use super::render::{effective_threads, render_command, RenderContext};
use super::rule::Rule;

/// Deepest dependency chain accepted before planning gives up.
pub const DEFAULT_MAX_DEPTH: usize = 256;

pub struct Planner<'a> {
    catalog: &'a Catalog,
    resolver: &'a IdentityResolver,
    max_threads: usize,
    check_leaves: bool,
    max_depth: usize,
    jobs: Vec<Job>,
    by_id: HashMap<JobId, usize>,
    producers: HashMap<String, usize>,
    requested: Vec<usize>,
    leaves: Vec<String>,
    seen_leaves: HashSet<String>,
    /// Jobs currently being expanded, outermost first
    stack: Vec<JobId>,
}

impl<'a> Planner<'a> {
    pub fn new(catalog: &'a Catalog, resolver: &'a IdentityResolver) -> Self {
        Self {
            catalog,
            resolver,
            max_threads: num_cpus::get(),
            check_leaves: true,
            max_depth: DEFAULT_MAX_DEPTH,
            jobs: Vec::new(),
            by_id: HashMap::new(),
            producers: HashMap::new(),
            requested: Vec::new(),
            leaves: Vec::new(),
            seen_leaves: HashSet::new(),
            stack: Vec::new(),
        }
    }

    /// Caps the threads any job is rendered with.
    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads.max(1);
        self
    }

    /// Whether leaf inputs must exist on disk at planning time.
    pub fn with_leaf_check(mut self, check_leaves: bool) -> Self {
        self.check_leaves = check_leaves;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Plans every target, in order.
    pub fn plan<I, S>(mut self, targets: I) -> Result<ExecutionPlan, PlanError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for target in targets {
            let index = self.request(target.as_ref())?;
            if !self.requested.contains(&index) {
                self.requested.push(index);
            }
        }

        let plan = ExecutionPlan::new(self.jobs, self.producers, self.requested, self.leaves);
        plan.verify_order()?;

        info!(
            "Planned {} jobs for {} targets ({} leaf inputs)",
            plan.len(),
            plan.requested().len(),
            plan.leaves().len()
        );
        Ok(plan)
    }

    fn request(&mut self, target: &str) -> Result<usize, PlanError> {
        if let Some(&index) = self.producers.get(target) {
            return Ok(index);
        }
        let catalog = self.catalog;
        let (rule, bindings) = catalog.match_target(target, self.resolver)?;
        self.plan_job(target, rule, bindings)
    }

    fn plan_job(&mut self, target: &str, rule: &'a Rule, bindings: Bindings) -> Result<usize, PlanError> {
        let id = JobId::new(&rule.name, &bindings);
        if let Some(&index) = self.by_id.get(&id) {
            return Ok(index);
        }

        if let Some(pos) = self.stack.iter().position(|active| active == &id) {
            let mut chain: Vec<String> = self.stack[pos..].iter().map(JobId::to_string).collect();
            chain.push(id.to_string());
            return Err(PlanError::CyclicDependency { chain });
        }
        if self.stack.len() >= self.max_depth {
            let mut chain: Vec<String> = self.stack.iter().map(JobId::to_string).collect();
            chain.push(id.to_string());
            return Err(PlanError::CyclicDependency { chain });
        }

        self.stack.push(id.clone());
        let expanded = self.expand(target, rule, &bindings, &id);
        self.stack.pop();
        let job = expanded?;

        let index = self.jobs.len();
        for path in job.output_paths() {
            self.producers.insert(path.to_string(), index);
        }
        self.by_id.insert(id, index);
        debug!("Planned job #{}: {}", index, job.id);
        self.jobs.push(job);
        Ok(index)
    }

    fn expand(
        &mut self,
        target: &str,
        rule: &'a Rule,
        bindings: &Bindings,
        id: &JobId,
    ) -> Result<Job, PlanError> {
        let outputs = rule.render_outputs(bindings)?;
        let inputs = rule.resolve_inputs(target, bindings, self.resolver)?;
        let params = rule.resolve_params(target, bindings, self.resolver)?;
        let log = rule.render_log(bindings)?;

        let mut dependencies = Vec::new();
        for path in inputs.iter().flat_map(|(_, paths)| paths) {
            let dependency = match self.producers.get(path) {
                Some(&index) => Some(index),
                None => {
                    let catalog = self.catalog;
                    match catalog.match_target(path, self.resolver) {
                        Ok((producer, producer_bindings)) => {
                            Some(self.plan_job(path, producer, producer_bindings)?)
                        }
                        Err(PlanError::NoMatch { .. }) => {
                            self.leaf(id, path)?;
                            None
                        }
                        Err(e) => return Err(e),
                    }
                }
            };
            if let Some(index) = dependency {
                if !dependencies.contains(&index) {
                    dependencies.push(index);
                }
            }
        }

        let threads = effective_threads(rule.threads, self.max_threads);
        let log_path = log.as_ref().map(|p| p.to_string_lossy().into_owned());
        let command = render_command(
            &rule.name,
            &rule.command,
            &RenderContext {
                inputs: &inputs,
                outputs: &outputs,
                params: &params,
                bindings,
                threads,
                log: log_path.as_deref(),
            },
        )?;

        Ok(Job {
            id: id.clone(),
            rule: rule.name.clone(),
            bindings: bindings.clone(),
            inputs,
            outputs,
            params,
            log,
            command,
            threads,
            resource: rule.resource.clone(),
            dependencies,
        })
    }

    fn leaf(&mut self, job: &JobId, path: &str) -> Result<(), PlanError> {
        if self.check_leaves && !Path::new(path).exists() {
            return Err(PlanError::MissingInput {
                job: job.to_string(),
                path: path.to_string(),
            });
        }
        if self.seen_leaves.insert(path.to_string()) {
            self.leaves.push(path.to_string());
        }
        Ok(())
    }
}
