//! Plan Execution Engine
//!
//! Runs an [`ExecutionPlan`] to completion:
//! - Parallel dispatch bounded by a global and per-class limits
//! - Failure propagation (dependents of a failed job are skipped)
//! - Cooperative cancellation (running jobs drain, nothing new starts)
//! - Up-to-date detection, dry runs and a JSON run report
//! - Host load sampling during the run

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use log::{error, info, warn};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::{ExecError, JobFailure};
use crate::monitoring::{EventType, ExecutionTimeline, ResourceMonitor, ResourceSummary};
use crate::workflow::catalog::IO_CLASS;
use crate::workflow::{ExecutionPlan, JobId};

use super::scheduler::{JobScheduler, JobStatus};
use super::step::{execute_job, StepOptions};

/// Default concurrency of the `io` resource class.
pub const DEFAULT_IO_LIMIT: usize = 1;

/// How often the loop re-checks the cancel token while jobs run.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Interval for resource monitoring samples.
const MONITOR_SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

/// What to do once a job has failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Skip the failed job's dependents, keep running independent branches
    #[default]
    KeepGoing,
    /// Stop dispatching; running jobs drain and the rest are cancelled
    AbortOnFirst,
}

/// Shared cancellation flag.
///
/// Clones observe the same flag, so the binary can hand one to a signal
/// handler while the engine runs.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of one job in a run.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: JobId,
    pub rule: String,
    pub status: JobStatus,
    pub duration_ms: Option<u128>,
    pub log: Option<PathBuf>,
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub dry_run: bool,
    pub jobs: Vec<JobRecord>,
    pub resources: Option<ResourceSummary>,
}

impl RunReport {
    fn count(&self, pred: impl Fn(&JobStatus) -> bool) -> usize {
        self.jobs.iter().filter(|j| pred(&j.status)).count()
    }

    pub fn completed(&self) -> usize {
        self.count(|s| *s == JobStatus::Completed)
    }

    pub fn up_to_date(&self) -> usize {
        self.count(|s| *s == JobStatus::UpToDate)
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, JobStatus::Failed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, JobStatus::Skipped(_)))
    }

    pub fn cancelled(&self) -> usize {
        self.count(|s| *s == JobStatus::Cancelled)
    }

    /// True when every job completed or was already up to date.
    pub fn succeeded(&self) -> bool {
        self.jobs.iter().all(|j| j.status.is_satisfied())
    }

    pub fn job(&self, id: &str) -> Option<&JobRecord> {
        self.jobs.iter().find(|j| j.id.as_str() == id)
    }

    /// Writes the report as pretty-printed JSON.
    pub fn write_json(&self, path: &Path) -> Result<(), ExecError> {
        let report_error = |reason: String| ExecError::Report {
            path: path.to_path_buf(),
            reason,
        };

        let json = serde_json::to_string_pretty(self).map_err(|e| report_error(e.to_string()))?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| report_error(e.to_string()))?;
            }
        }
        fs::write(path, json).map_err(|e| report_error(e.to_string()))
    }
}

/// Plan execution engine.
///
/// # Example
///
/// ```rust,no_run
/// use std::path::Path;
/// use atacflow::config::{load_config, IdentityResolver, ReferenceTables};
/// use atacflow::execution::Engine;
/// use atacflow::workflow::{default_targets, Catalog, Planner};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = load_config("atacflow.yaml")?;
///     let resolver = IdentityResolver::new(&config, ReferenceTables::builtin())?;
///     let catalog = Catalog::standard(resolver.results());
///     let targets = default_targets(&catalog, &resolver)?;
///     let plan = Planner::new(&catalog, &resolver).plan(&targets)?;
///
///     let mut engine = Engine::new(plan);
///     engine.set_max_parallel(4);
///     let report = engine.run().await?;
///     assert!(report.succeeded());
///     Ok(())
/// }
/// ```
pub struct Engine {
    plan: ExecutionPlan,
    max_parallel: usize,
    resource_limits: HashMap<String, usize>,
    step_options: StepOptions,
    failure_policy: FailurePolicy,
    dry_run: bool,
    force: bool,
    monitor_resources: bool,
    report_path: Option<PathBuf>,
    cancel: CancelToken,
    timeline: ExecutionTimeline,
}

impl Engine {
    pub fn new(plan: ExecutionPlan) -> Self {
        let mut resource_limits = HashMap::new();
        resource_limits.insert(IO_CLASS.to_string(), DEFAULT_IO_LIMIT);

        Self {
            plan,
            max_parallel: num_cpus::get(),
            resource_limits,
            step_options: StepOptions::default(),
            failure_policy: FailurePolicy::default(),
            dry_run: false,
            force: false,
            monitor_resources: true,
            report_path: None,
            cancel: CancelToken::new(),
            timeline: ExecutionTimeline::new(),
        }
    }

    /// Sets the maximum number of concurrently running jobs.
    pub fn set_max_parallel(&mut self, max: usize) {
        self.max_parallel = max.max(1);
    }

    /// Caps concurrently running jobs of a resource class.
    pub fn set_resource_limit(&mut self, class: impl Into<String>, limit: usize) {
        self.resource_limits.insert(class.into(), limit.max(1));
    }

    /// Per-job wall clock limit; a job exceeding it fails.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.step_options.timeout = timeout;
    }

    pub fn set_failure_policy(&mut self, policy: FailurePolicy) {
        self.failure_policy = policy;
    }

    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
    }

    /// Re-run jobs even when their outputs are current.
    pub fn set_force(&mut self, force: bool) {
        self.force = force;
    }

    pub fn set_report_path(&mut self, path: impl Into<PathBuf>) {
        self.report_path = Some(path.into());
    }

    pub fn set_script_dir(&mut self, dir: impl Into<PathBuf>) {
        self.step_options.script_dir = dir.into();
    }

    pub fn set_resource_monitoring(&mut self, enabled: bool) {
        self.monitor_resources = enabled;
    }

    /// A handle that stops the run when cancelled.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    /// Timeline of the last run.
    pub fn timeline(&self) -> &ExecutionTimeline {
        &self.timeline
    }

    /// Executes the plan.
    ///
    /// Job failures do not make this return `Err`; they are recorded in the
    /// report. `Err` means the engine itself could not continue.
    pub async fn run(&mut self) -> Result<RunReport, ExecError> {
        let started_at = Local::now();
        let start_time = Instant::now();
        self.timeline = ExecutionTimeline::new();

        let mut scheduler = JobScheduler::new(&self.plan, self.max_parallel);
        for (class, &limit) in &self.resource_limits {
            scheduler.set_class_limit(class.clone(), limit);
        }

        if !self.force {
            self.mark_up_to_date(&mut scheduler);
        }

        info!(
            "Starting execution of {} jobs (max parallel: {}, dry run: {}, policy: {:?})",
            self.plan.len(),
            self.max_parallel,
            self.dry_run,
            self.failure_policy
        );

        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, Result<(), JobFailure>)>();

        let monitor_running = Arc::new(AtomicBool::new(true));
        let monitor_handle = if self.monitor_resources && !self.dry_run {
            let flag = Arc::clone(&monitor_running);
            Some(tokio::spawn(async move {
                let mut monitor = ResourceMonitor::new();
                let mut ticker = tokio::time::interval(MONITOR_SAMPLE_INTERVAL);
                while flag.load(Ordering::Relaxed) {
                    ticker.tick().await;
                    monitor.sample();
                }
                monitor
            }))
        } else {
            None
        };

        let mut aborted = false;
        let mut stop_logged = false;

        loop {
            let stopping = aborted || self.cancel.is_cancelled();

            if stopping && !stop_logged {
                warn!(
                    "Stopping: waiting for {} running jobs, no new jobs will start",
                    scheduler.running_count()
                );
                stop_logged = true;
            }

            if !stopping {
                self.dispatch(&mut scheduler, &tx);
            }

            if scheduler.running_count() == 0 {
                let cancelled = scheduler.cancel_pending();
                if cancelled > 0 {
                    warn!("{} jobs were cancelled", cancelled);
                }
                break;
            }

            tokio::select! {
                message = rx.recv() => {
                    let (index, result) = message.ok_or(ExecError::ChannelClosed)?;
                    let failed = self.finish(&mut scheduler, index, result);
                    if failed && self.failure_policy == FailurePolicy::AbortOnFirst {
                        aborted = true;
                    }
                }
                _ = tokio::time::sleep(CANCEL_POLL_INTERVAL) => {}
            }
        }

        monitor_running.store(false, Ordering::Relaxed);
        let resources = match monitor_handle {
            Some(handle) => handle.await.ok().map(|monitor| monitor.summary()),
            None => None,
        };

        let report = RunReport {
            started_at,
            finished_at: Local::now(),
            dry_run: self.dry_run,
            jobs: self
                .plan
                .jobs()
                .iter()
                .zip(scheduler.metrics())
                .map(|(job, metrics)| JobRecord {
                    id: job.id.clone(),
                    rule: job.rule.clone(),
                    status: metrics.status.clone(),
                    duration_ms: metrics.duration_ms,
                    log: job.log.clone(),
                })
                .collect(),
            resources,
        };

        info!(
            "Run finished in {:.2?}: {} completed, {} up to date, {} failed, {} skipped, {} cancelled",
            start_time.elapsed(),
            report.completed(),
            report.up_to_date(),
            report.failed(),
            report.skipped(),
            report.cancelled()
        );

        if let Some(path) = &self.report_path {
            report.write_json(path)?;
            info!("Run report written to {}", path.display());
        }

        Ok(report)
    }

    /// Marks jobs whose outputs are current, in plan order.
    fn mark_up_to_date(&self, scheduler: &mut JobScheduler) {
        for (index, job) in self.plan.jobs().iter().enumerate() {
            let upstream_current = job
                .dependencies
                .iter()
                .all(|&dep| *scheduler.status(dep) == JobStatus::UpToDate);
            if upstream_current && job.outputs_current() {
                info!("Job '{}' is up to date", job.id);
                scheduler.mark_up_to_date(index);
            }
        }
    }

    /// Starts every ready job. Dry runs complete jobs immediately.
    fn dispatch(
        &mut self,
        scheduler: &mut JobScheduler,
        tx: &mpsc::UnboundedSender<(usize, Result<(), JobFailure>)>,
    ) {
        loop {
            let ready = scheduler.ready_jobs();
            if ready.is_empty() {
                return;
            }

            for index in ready {
                let Some(job) = self.plan.job(index) else {
                    continue;
                };

                info!("Starting job: {}", job.id);
                self.timeline.add_event(job.id.to_string(), EventType::Started);
                scheduler.mark_running(index);

                if self.dry_run {
                    println!();
                    println!("[DRY RUN] Job: {}", job.id);
                    println!("  Command: {}", job.command);
                    println!("  Threads: {}", job.threads);
                    if let Some(class) = &job.resource {
                        println!("  Resource: {}", class);
                    }

                    self.timeline.add_event(job.id.to_string(), EventType::Completed);
                    scheduler.mark_completed(index);
                    continue;
                }

                let job = job.clone();
                let options = self.step_options.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let result = execute_job(&job, &options).await;
                    if tx.send((index, result)).is_err() {
                        error!("Failed to send completion signal for '{}'", job.id);
                    }
                });
            }

            if !self.dry_run {
                return;
            }
        }
    }

    /// Records a finished job. Returns true if it failed.
    fn finish(
        &mut self,
        scheduler: &mut JobScheduler,
        index: usize,
        result: Result<(), JobFailure>,
    ) -> bool {
        let id = self
            .plan
            .job(index)
            .map(|job| job.id.to_string())
            .unwrap_or_default();

        match result {
            Ok(()) => {
                scheduler.mark_completed(index);
                let (finished, total) = scheduler.progress();
                info!("Job '{}' completed successfully ({}/{})", id, finished, total);
                self.timeline.add_event(id, EventType::Completed);
                false
            }
            Err(failure) => {
                error!("Job '{}' failed: {}", id, failure);
                let skipped = scheduler.mark_failed(index, failure.to_string());
                self.timeline.add_event(id.clone(), EventType::Failed);

                if !skipped.is_empty() {
                    warn!("Skipping {} jobs downstream of '{}'", skipped.len(), id);
                }
                for dependent in skipped {
                    if let Some(job) = self.plan.job(dependent) {
                        self.timeline.add_event(job.id.to_string(), EventType::Skipped);
                    }
                }
                true
            }
        }
    }
}
