//! Job Scheduler
//!
//! Scheduling state for one run of an [`ExecutionPlan`]:
//! - Dependency tracking
//! - Global and per-class concurrency limits
//! - Failure propagation to dependents
//! - Per-job status and timing
//!
//! The scheduler is owned by the engine's loop; it is the only place where
//! slot counters change.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use log::debug;
use serde::Serialize;

use crate::workflow::{ExecutionPlan, JobId};

/// Status of a job during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for dependencies or a free slot
    Pending,
    Running,
    Completed,
    /// Outputs already current; not run
    UpToDate,
    /// Failed with a reason
    Failed(String),
    /// Not run because the named upstream job failed
    Skipped(String),
    /// Not run because the run was cancelled or aborted
    Cancelled,
}

impl JobStatus {
    /// Whether dependents may start.
    pub fn is_satisfied(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::UpToDate)
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

/// Execution metrics for a single job.
#[derive(Debug, Clone)]
pub struct JobMetrics {
    pub start_time: Option<Instant>,
    pub end_time: Option<Instant>,
    pub duration_ms: Option<u128>,
    pub status: JobStatus,
}

impl JobMetrics {
    fn new() -> Self {
        Self {
            start_time: None,
            end_time: None,
            duration_ms: None,
            status: JobStatus::Pending,
        }
    }

    fn finish(&mut self, status: JobStatus) {
        let now = Instant::now();
        self.end_time = Some(now);
        if let Some(start) = self.start_time {
            self.duration_ms = Some(now.duration_since(start).as_millis());
        }
        self.status = status;
    }
}

pub struct JobScheduler {
    ids: Vec<JobId>,
    dependencies: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
    resources: Vec<Option<String>>,
    metrics: Vec<JobMetrics>,
    max_parallel: usize,
    running: usize,
    class_limits: HashMap<String, usize>,
    class_usage: HashMap<String, usize>,
}

impl JobScheduler {
    pub fn new(plan: &ExecutionPlan, max_parallel: usize) -> Self {
        debug!(
            "Creating scheduler: {} jobs, {} max parallel",
            plan.len(),
            max_parallel
        );
        Self {
            ids: plan.jobs().iter().map(|j| j.id.clone()).collect(),
            dependencies: plan.jobs().iter().map(|j| j.dependencies.clone()).collect(),
            dependents: plan.dependents(),
            resources: plan.jobs().iter().map(|j| j.resource.clone()).collect(),
            metrics: plan.jobs().iter().map(|_| JobMetrics::new()).collect(),
            max_parallel: max_parallel.max(1),
            running: 0,
            class_limits: HashMap::new(),
            class_usage: HashMap::new(),
        }
    }

    /// Caps the number of concurrently running jobs of `class`.
    pub fn set_class_limit(&mut self, class: impl Into<String>, limit: usize) {
        self.class_limits.insert(class.into(), limit.max(1));
    }

    /// Jobs that can start now, in plan order.
    ///
    /// A job is ready when it is pending, every dependency is satisfied,
    /// and starting it keeps both the global and its class limit.
    pub fn ready_jobs(&self) -> Vec<usize> {
        let mut ready = Vec::new();
        let mut class_claims: HashMap<&str, usize> = HashMap::new();

        for (index, metrics) in self.metrics.iter().enumerate() {
            if self.running + ready.len() >= self.max_parallel {
                break;
            }
            if metrics.status != JobStatus::Pending {
                continue;
            }
            let deps_satisfied = self.dependencies[index]
                .iter()
                .all(|&dep| self.metrics[dep].status.is_satisfied());
            if !deps_satisfied {
                continue;
            }

            if let Some(class) = self.resources[index].as_deref() {
                if let Some(&limit) = self.class_limits.get(class) {
                    let in_use = self.class_usage.get(class).copied().unwrap_or(0);
                    let claimed = class_claims.entry(class).or_insert(0);
                    if in_use + *claimed >= limit {
                        debug!("Job '{}' waits for a '{}' slot", self.ids[index], class);
                        continue;
                    }
                    *claimed += 1;
                }
            }

            ready.push(index);
        }

        ready
    }

    pub fn mark_running(&mut self, index: usize) {
        self.running += 1;
        if let Some(class) = &self.resources[index] {
            *self.class_usage.entry(class.clone()).or_insert(0) += 1;
        }
        let metrics = &mut self.metrics[index];
        metrics.start_time = Some(Instant::now());
        metrics.status = JobStatus::Running;
        debug!(
            "Job '{}' started ({}/{} slots)",
            self.ids[index], self.running, self.max_parallel
        );
    }

    fn release(&mut self, index: usize) {
        if self.metrics[index].status != JobStatus::Running {
            return;
        }
        self.running = self.running.saturating_sub(1);
        if let Some(class) = &self.resources[index] {
            if let Some(used) = self.class_usage.get_mut(class) {
                *used = used.saturating_sub(1);
            }
        }
    }

    pub fn mark_completed(&mut self, index: usize) {
        self.release(index);
        self.metrics[index].finish(JobStatus::Completed);
    }

    /// Marks a pending job as not needing a run.
    pub fn mark_up_to_date(&mut self, index: usize) {
        self.metrics[index].status = JobStatus::UpToDate;
    }

    /// Marks a job failed and skips every transitive dependent.
    ///
    /// Returns the indices of the newly skipped jobs.
    pub fn mark_failed(&mut self, index: usize, reason: impl Into<String>) -> Vec<usize> {
        self.release(index);
        self.metrics[index].finish(JobStatus::Failed(reason.into()));

        let failed = self.ids[index].to_string();
        let mut skipped = Vec::new();
        let mut queue: VecDeque<usize> = self.dependents[index].iter().copied().collect();

        while let Some(next) = queue.pop_front() {
            if self.metrics[next].status != JobStatus::Pending {
                continue;
            }
            self.metrics[next].status = JobStatus::Skipped(failed.clone());
            skipped.push(next);
            queue.extend(self.dependents[next].iter().copied());
        }

        skipped
    }

    /// Marks every pending job cancelled. Returns how many were.
    pub fn cancel_pending(&mut self) -> usize {
        let mut cancelled = 0;
        for metrics in &mut self.metrics {
            if metrics.status == JobStatus::Pending {
                metrics.status = JobStatus::Cancelled;
                cancelled += 1;
            }
        }
        cancelled
    }

    pub fn running_count(&self) -> usize {
        self.running
    }

    /// True while any job is pending or running.
    pub fn has_work_remaining(&self) -> bool {
        self.metrics.iter().any(|m| !m.status.is_finished())
    }

    /// (finished, total)
    pub fn progress(&self) -> (usize, usize) {
        let finished = self.metrics.iter().filter(|m| m.status.is_finished()).count();
        (finished, self.metrics.len())
    }

    pub fn status(&self, index: usize) -> &JobStatus {
        &self.metrics[index].status
    }

    pub fn metrics(&self) -> &[JobMetrics] {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::workflow::job::tests::stub_job;
    use crate::workflow::Job;

    fn plan_of(jobs: Vec<Job>) -> ExecutionPlan {
        ExecutionPlan::new(jobs, HashMap::new(), vec![], vec![])
    }

    /// a -> b -> c, plus an independent d
    fn chain_plan() -> ExecutionPlan {
        plan_of(vec![
            stub_job("a", &[], vec![]),
            stub_job("b", &[], vec![0]),
            stub_job("c", &[], vec![1]),
            stub_job("d", &[], vec![]),
        ])
    }

    #[test]
    fn test_ready_respects_dependencies() {
        let plan = chain_plan();
        let mut scheduler = JobScheduler::new(&plan, 4);

        assert_eq!(scheduler.ready_jobs(), vec![0, 3]);

        scheduler.mark_running(0);
        scheduler.mark_running(3);
        assert!(scheduler.ready_jobs().is_empty());

        scheduler.mark_completed(0);
        assert_eq!(scheduler.ready_jobs(), vec![1]);
        assert_eq!(scheduler.progress(), (1, 4));
    }

    #[test]
    fn test_max_parallel() {
        let plan = plan_of(vec![
            stub_job("a", &[], vec![]),
            stub_job("b", &[], vec![]),
            stub_job("c", &[], vec![]),
        ]);
        let mut scheduler = JobScheduler::new(&plan, 2);
        assert_eq!(scheduler.ready_jobs(), vec![0, 1]);

        scheduler.mark_running(0);
        assert_eq!(scheduler.ready_jobs(), vec![1]);
    }

    #[test]
    fn test_class_limit() {
        let mut jobs: Vec<Job> = (0..3)
            .map(|i| stub_job(&format!("io{}", i), &[], vec![]))
            .collect();
        for job in &mut jobs {
            job.resource = Some("io".to_string());
        }
        jobs.push(stub_job("cpu", &[], vec![]));

        let plan = plan_of(jobs);
        let mut scheduler = JobScheduler::new(&plan, 8);
        scheduler.set_class_limit("io", 1);

        assert_eq!(scheduler.ready_jobs(), vec![0, 3]);
        scheduler.mark_running(0);
        assert_eq!(scheduler.ready_jobs(), vec![3]);

        scheduler.mark_completed(0);
        assert_eq!(scheduler.ready_jobs(), vec![1, 3]);
    }

    #[test]
    fn test_threads_do_not_consume_slots() {
        let mut jobs = vec![stub_job("a", &[], vec![]), stub_job("b", &[], vec![])];
        jobs[0].threads = 64;
        jobs[1].threads = 64;
        let plan = plan_of(jobs);
        let scheduler = JobScheduler::new(&plan, 2);
        assert_eq!(scheduler.ready_jobs(), vec![0, 1]);
    }

    #[test]
    fn test_failure_skips_transitive_dependents() {
        let plan = chain_plan();
        let mut scheduler = JobScheduler::new(&plan, 4);

        scheduler.mark_running(0);
        let skipped = scheduler.mark_failed(0, "exit 1");
        assert_eq!(skipped, vec![1, 2]);

        assert_eq!(scheduler.status(0), &JobStatus::Failed("exit 1".to_string()));
        assert!(matches!(scheduler.status(2), JobStatus::Skipped(by) if by == "stub[name=a]"));
        assert_eq!(scheduler.running_count(), 0);

        // The independent branch is unaffected
        assert_eq!(scheduler.ready_jobs(), vec![3]);
        scheduler.mark_running(3);
        scheduler.mark_completed(3);
        assert!(!scheduler.has_work_remaining());
    }

    #[test]
    fn test_up_to_date_satisfies_dependents() {
        let plan = chain_plan();
        let mut scheduler = JobScheduler::new(&plan, 4);
        scheduler.mark_up_to_date(0);
        assert_eq!(scheduler.ready_jobs(), vec![1, 3]);
    }

    #[test]
    fn test_cancel_pending() {
        let plan = chain_plan();
        let mut scheduler = JobScheduler::new(&plan, 4);
        scheduler.mark_running(0);

        assert_eq!(scheduler.cancel_pending(), 3);
        assert_eq!(scheduler.status(0), &JobStatus::Running);
        assert_eq!(scheduler.status(3), &JobStatus::Cancelled);
        assert!(scheduler.has_work_remaining());

        scheduler.mark_completed(0);
        assert!(!scheduler.has_work_remaining());
    }

    #[test]
    fn test_metrics_duration() {
        let plan = chain_plan();
        let mut scheduler = JobScheduler::new(&plan, 4);

        scheduler.mark_running(0);
        std::thread::sleep(std::time::Duration::from_millis(10));
        scheduler.mark_completed(0);

        let metrics = &scheduler.metrics()[0];
        assert!(metrics.start_time.is_some());
        assert!(metrics.duration_ms.unwrap() >= 10);
        assert_eq!(metrics.status, JobStatus::Completed);
    }
}
