//! Execution Timeline
//!
//! Tracks job start/end times for the run summary and the
//! ASCII Gantt chart.

use std::collections::HashMap;
use std::time::Instant;

/// Type of timeline event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventType {
    /// Job started executing
    Started,
    /// Job completed successfully
    Completed,
    /// Job failed
    Failed,
    /// Job was never run because an upstream job failed
    Skipped,
}

impl EventType {
    fn is_terminal(&self) -> bool {
        !matches!(self, EventType::Started)
    }
}

/// A single event in the execution timeline.
#[derive(Debug, Clone)]
pub struct TimelineEvent {
    pub job_id: String,
    pub event_type: EventType,
    pub timestamp: Instant,
}

/// Records when each job starts, completes or fails.
#[derive(Debug, Clone)]
pub struct ExecutionTimeline {
    events: Vec<TimelineEvent>,
    start_time: Instant,
}

impl ExecutionTimeline {
    /// Creates a new timeline starting now.
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            start_time: Instant::now(),
        }
    }

    /// Records an event for a job.
    pub fn add_event(&mut self, job_id: impl Into<String>, event_type: EventType) {
        self.events.push(TimelineEvent {
            job_id: job_id.into(),
            event_type,
            timestamp: Instant::now(),
        });
    }

    pub fn events(&self) -> &[TimelineEvent] {
        &self.events
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    /// Number of events of one type.
    pub fn count(&self, event_type: &EventType) -> usize {
        self.events
            .iter()
            .filter(|e| &e.event_type == event_type)
            .count()
    }

    /// (start, end) offsets in milliseconds of every job that finished.
    fn spans(&self) -> Vec<(String, u128, u128)> {
        let mut starts: HashMap<&str, u128> = HashMap::new();
        let mut spans = Vec::new();

        for event in &self.events {
            let elapsed = event.timestamp.duration_since(self.start_time).as_millis();
            if !event.event_type.is_terminal() {
                starts.insert(event.job_id.as_str(), elapsed);
            } else if let Some(start) = starts.remove(event.job_id.as_str()) {
                spans.push((event.job_id.clone(), start, elapsed));
            }
        }

        spans.sort_by_key(|(_, start, _)| *start);
        spans
    }

    /// Generates an ASCII Gantt chart, one bar per job scaled to
    /// 50 characters of total run time.
    pub fn gantt_chart(&self) -> String {
        let mut output = String::from("\nExecution Timeline:\n\n");

        let total_time = Instant::now().duration_since(self.start_time).as_millis();
        if total_time == 0 {
            return output;
        }

        let scale = 50.0 / total_time as f64;

        for (job_id, start, end) in self.spans() {
            let start_pos = (start as f64 * scale) as usize;
            let duration = ((end - start) as f64 * scale).max(1.0) as usize;

            let mut bar = " ".repeat(start_pos);
            bar.push_str(&"#".repeat(duration));

            output.push_str(&format!(
                "{} |{}| ({} ms)\n",
                truncate(&job_id, 28),
                bar,
                end - start
            ));
        }

        output.push_str(&format!("\nTotal: {} ms\n", total_time));
        output
    }

    /// Job durations in milliseconds.
    pub fn durations(&self) -> HashMap<String, u128> {
        self.spans()
            .into_iter()
            .map(|(job_id, start, end)| (job_id, end - start))
            .collect()
    }
}

impl Default for ExecutionTimeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Pads or truncates a label to exactly `max_len` characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        format!("{:width$}", s, width = max_len)
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_get_durations() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("align[library=lib1]", EventType::Started);
        thread::sleep(Duration::from_millis(50));
        timeline.add_event("align[library=lib1]", EventType::Completed);

        let durations = timeline.durations();
        assert!(*durations.get("align[library=lib1]").unwrap() >= 50);
    }

    #[test]
    fn test_failed_job_has_duration() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("a", EventType::Started);
        timeline.add_event("a", EventType::Failed);
        timeline.add_event("b", EventType::Skipped);

        let durations = timeline.durations();
        assert!(durations.contains_key("a"));
        assert!(!durations.contains_key("b"));
        assert_eq!(timeline.count(&EventType::Skipped), 1);
    }

    #[test]
    fn test_only_started_has_no_duration() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("a", EventType::Started);
        assert!(timeline.durations().is_empty());
    }

    #[test]
    fn test_gantt_chart_generation() {
        let mut timeline = ExecutionTimeline::new();

        timeline.add_event("merge[library=lib1]", EventType::Started);
        thread::sleep(Duration::from_millis(30));
        timeline.add_event("merge[library=lib1]", EventType::Completed);

        timeline.add_event("prune[library=lib1]", EventType::Started);
        thread::sleep(Duration::from_millis(30));
        timeline.add_event("prune[library=lib1]", EventType::Completed);

        let chart = timeline.gantt_chart();
        assert!(chart.contains("merge[library=lib1]"));
        assert!(chart.contains("prune[library=lib1]"));
        assert!(chart.contains("Total:"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abc", 5), "abc  ");
        assert_eq!(truncate("abcdefgh", 6), "abc...");
    }
}
