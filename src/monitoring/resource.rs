//! System Load Monitoring
//!
//! Samples whole-machine CPU and memory while jobs run. The external tools
//! are separate processes, so the host view is the meaningful one.

use std::time::{Duration, Instant};

use serde::Serialize;
use sysinfo::System;

/// A single resource usage sample.
#[derive(Debug, Clone)]
pub struct ResourceSample {
    pub timestamp: Instant,
    /// Global CPU usage percentage (0-100)
    pub cpu_usage: f32,
    /// Used memory in megabytes
    pub memory_mb: u64,
}

/// Aggregate over every sample of a run.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResourceSummary {
    pub samples: usize,
    pub average_cpu: f32,
    pub peak_memory_mb: u64,
    pub total_memory_mb: u64,
}

/// Samples host CPU and memory.
///
/// # Example
///
/// ```rust,no_run
/// use std::thread;
/// use std::time::Duration;
/// use atacflow::monitoring::ResourceMonitor;
///
/// let mut monitor = ResourceMonitor::new();
/// for _ in 0..5 {
///     monitor.sample();
///     thread::sleep(Duration::from_millis(500));
/// }
/// println!("{}", monitor.get_summary());
/// ```
pub struct ResourceMonitor {
    system: System,
    samples: Vec<ResourceSample>,
    warmup_done: bool,
    last_sample: Option<Instant>,
    min_interval: Duration,
}

impl ResourceMonitor {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            samples: Vec::new(),
            warmup_done: false,
            last_sample: None,
            min_interval: Duration::from_millis(250),
        }
    }

    /// Sets the minimum interval between samples.
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Takes a sample.
    ///
    /// The first call only primes the CPU counters; later calls are
    /// rate-limited by `min_interval`.
    pub fn sample(&mut self) {
        let now = Instant::now();

        if !self.warmup_done {
            self.system.refresh_cpu();
            self.system.refresh_memory();
            self.warmup_done = true;
            self.last_sample = Some(now);
            return;
        }

        if let Some(last) = self.last_sample {
            if now.duration_since(last) < self.min_interval {
                return;
            }
        }

        self.system.refresh_cpu();
        self.system.refresh_memory();
        self.last_sample = Some(now);

        self.samples.push(ResourceSample {
            timestamp: now,
            cpu_usage: self.system.global_cpu_info().cpu_usage(),
            memory_mb: self.system.used_memory() / (1024 * 1024),
        });
    }

    pub fn samples(&self) -> &[ResourceSample] {
        &self.samples
    }

    pub fn peak_memory_mb(&self) -> u64 {
        self.samples.iter().map(|s| s.memory_mb).max().unwrap_or(0)
    }

    pub fn average_cpu(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| s.cpu_usage).sum::<f32>() / self.samples.len() as f32
    }

    pub fn summary(&self) -> ResourceSummary {
        ResourceSummary {
            samples: self.samples.len(),
            average_cpu: self.average_cpu(),
            peak_memory_mb: self.peak_memory_mb(),
            total_memory_mb: self.system.total_memory() / (1024 * 1024),
        }
    }

    /// Human-readable summary of resource usage.
    pub fn get_summary(&self) -> String {
        if self.samples.is_empty() {
            return "No resource data collected".to_string();
        }

        let summary = self.summary();
        format!(
            "Resource Usage:\n  Average CPU: {:.1}%\n  Peak Memory: {} MB of {} MB\n  Samples: {}",
            summary.average_cpu, summary.peak_memory_mb, summary.total_memory_mb, summary.samples
        )
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}
