//! Jobs and Execution Plans
//!
//! A [`Job`] is one rule bound to one set of wildcard values, with every path
//! and the command already rendered. An [`ExecutionPlan`] is the
//! topologically ordered list of jobs needed for a set of targets.

use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Serialize, Serializer};

use crate::error::PlanError;

use super::pattern::Bindings;

/// Rule name plus bindings, shown as `align[library=lib1, readgroup=L1]`.
///
/// Identity is the (rule, bindings) pair; the label is only for display, so
/// binding values containing `, ` or `=` cannot make two jobs collide.
#[derive(Debug, Clone)]
pub struct JobId {
    rule: String,
    bindings: Bindings,
    label: String,
}

impl JobId {
    pub fn new(rule: &str, bindings: &Bindings) -> Self {
        Self {
            rule: rule.to_string(),
            bindings: bindings.clone(),
            label: format!("{}[{}]", rule, bindings),
        }
    }

    pub fn rule(&self) -> &str {
        &self.rule
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    pub fn as_str(&self) -> &str {
        &self.label
    }

    fn key(&self) -> (&str, &Bindings) {
        (&self.rule, &self.bindings)
    }
}

impl PartialEq for JobId {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for JobId {}

impl Hash for JobId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl PartialOrd for JobId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for JobId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl Serialize for JobId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.label)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// A fully bound, rendered rule instance.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub rule: String,
    pub bindings: Bindings,
    pub inputs: Vec<(String, Vec<String>)>,
    pub outputs: Vec<(String, String)>,
    pub params: Vec<(String, String)>,
    pub log: Option<PathBuf>,
    pub command: String,
    pub threads: usize,
    pub resource: Option<String>,
    /// Indices of producing jobs in the owning plan
    pub dependencies: Vec<usize>,
}

impl Job {
    /// Every input path, in declaration order.
    pub fn input_paths(&self) -> impl Iterator<Item = &str> {
        self.inputs
            .iter()
            .flat_map(|(_, paths)| paths.iter().map(String::as_str))
    }

    pub fn output_paths(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().map(|(_, path)| path.as_str())
    }

    /// Outputs that do not exist on disk.
    pub fn missing_outputs(&self) -> Vec<&str> {
        self.output_paths()
            .filter(|path| !Path::new(path).exists())
            .collect()
    }

    /// True when every output exists and none is older than any input.
    pub fn outputs_current(&self) -> bool {
        let Some(oldest_output) = self
            .output_paths()
            .map(modified)
            .collect::<Option<Vec<_>>>()
            .and_then(|times| times.into_iter().min())
        else {
            return false;
        };

        self.input_paths()
            .filter_map(modified)
            .all(|input| input <= oldest_output)
    }

    /// File-name friendly form of the id, used for scripts.
    pub fn slug(&self) -> String {
        self.id
            .as_str()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
            .collect()
    }
}

fn modified(path: &str) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Ordered jobs plus the index from output path to producing job.
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlan {
    jobs: Vec<Job>,
    producers: HashMap<String, usize>,
    requested: Vec<usize>,
    leaves: Vec<String>,
}

impl ExecutionPlan {
    pub(crate) fn new(
        jobs: Vec<Job>,
        producers: HashMap<String, usize>,
        requested: Vec<usize>,
        leaves: Vec<String>,
    ) -> Self {
        Self {
            jobs,
            producers,
            requested,
            leaves,
        }
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn job(&self, index: usize) -> Option<&Job> {
        self.jobs.get(index)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Index of the job producing `path`.
    pub fn producer_of(&self, path: &str) -> Option<usize> {
        self.producers.get(path).copied()
    }

    /// Jobs producing the requested targets, in request order.
    pub fn requested(&self) -> &[usize] {
        &self.requested
    }

    /// Input paths no job produces.
    pub fn leaves(&self) -> &[String] {
        &self.leaves
    }

    /// Direct dependents of every job.
    pub fn dependents(&self) -> Vec<Vec<usize>> {
        let mut dependents = vec![Vec::new(); self.jobs.len()];
        for (index, job) in self.jobs.iter().enumerate() {
            for &dep in &job.dependencies {
                if let Some(list) = dependents.get_mut(dep) {
                    list.push(index);
                }
            }
        }
        dependents
    }

    /// Checks that the job list is a valid topological order.
    ///
    /// Runs Kahn's algorithm over the dependency edges and fails if a job
    /// precedes one of its dependencies or the graph has a cycle.
    pub fn verify_order(&self) -> Result<(), PlanError> {
        let mut in_degree: Vec<usize> = self.jobs.iter().map(|j| j.dependencies.len()).collect();
        let dependents = self.dependents();

        for (index, job) in self.jobs.iter().enumerate() {
            if let Some(&dep) = job.dependencies.iter().find(|&&dep| dep >= index) {
                let chain = match self.jobs.get(dep) {
                    Some(later) => vec![job.id.to_string(), later.id.to_string()],
                    None => vec![job.id.to_string(), format!("#{}", dep)],
                };
                return Err(PlanError::CyclicDependency { chain });
            }
        }

        let mut queue: VecDeque<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(i, _)| i)
            .collect();
        let mut visited = 0;

        while let Some(index) = queue.pop_front() {
            visited += 1;
            for &next in &dependents[index] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        if visited != self.jobs.len() {
            let chain = self
                .jobs
                .iter()
                .zip(&in_degree)
                .filter(|(_, &d)| d > 0)
                .map(|(job, _)| job.id.to_string())
                .collect();
            return Err(PlanError::CyclicDependency { chain });
        }

        Ok(())
    }
}
