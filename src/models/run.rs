use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle states of a single job run.
///
/// `Created -> Starting -> Running -> {Completed | Failed}`. `Failed` can also
/// be reached straight from `Starting` when startup aborts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RunState {
    Created,
    Starting,
    Running,
    Completed,
    Failed,
}

/// The in-memory record of one invocation of a guarded job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRun {
    /// Identifier sent to the health-check endpoint as `rid`.
    pub run_id: Uuid,
    /// Label used for journal entries and log lines.
    pub identity: String,
    pub process_id: Option<u32>,
    pub start_time: Option<DateTime<Local>>,
    pub stop_time: Option<DateTime<Local>>,
    pub state: RunState,
}

impl JobRun {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            identity: identity.into(),
            process_id: None,
            start_time: None,
            stop_time: None,
            state: RunState::Created,
        }
    }

    /// Wall-clock duration between start and stop, once both are recorded.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.start_time, self.stop_time) {
            (Some(start), Some(stop)) => Some(stop - start),
            _ => None,
        }
    }
}

/// Render a duration the way the run summary line reports it, e.g.
/// `1 hour, 2 minutes, 3 seconds`.
pub fn readable_duration(duration: chrono::Duration) -> String {
    let total_ms = duration.num_milliseconds().max(0);
    let total_secs = total_ms / 1000;
    let days = total_secs / 86_400;
    let hours = (total_secs % 86_400) / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    let mut parts = Vec::new();
    for (value, unit) in [
        (days, "day"),
        (hours, "hour"),
        (minutes, "minute"),
        (seconds, "second"),
    ] {
        if value > 0 {
            let plural = if value == 1 { "" } else { "s" };
            parts.push(format!("{} {}{}", value, unit, plural));
        }
    }

    if parts.is_empty() {
        format!("{} milliseconds", total_ms)
    } else {
        parts.join(", ")
    }
}
