// cronguard status: report what the PID file and log directory say

use std::path::Path;

use serde_json::json;

use crate::guard::{inspect, PidFileState};
use crate::models::{load_config, GuardConfig};
use crate::storage::logs::LogRotator;

/// Print the guard state. Exits 0 when the job is idle, 5 when an instance is
/// running and 1 when the last run failed, so the command can be used from
/// scripts.
pub fn cmd_status(config_path: Option<&Path>, json: bool) -> anyhow::Result<i32> {
    let config = load_config(config_path)?;
    let state = inspect(&config.pid);
    let archives = archive_count(&config);

    if json {
        let doc = json!({
            "pid_file": config.pid.display().to_string(),
            "pid": state,
            "log_file": config.log_file().display().to_string(),
            "archived_logs": archives,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
    } else {
        println!("PID file:      {}", config.pid.display());
        println!("State:         {}", describe(state));
        println!("Log file:      {}", config.log_file().display());
        match archives {
            Some(count) => println!("Archived logs: {}", count),
            None => println!("Archived logs: (log directory missing)"),
        }
    }

    Ok(status_exit_code(state))
}

fn archive_count(config: &GuardConfig) -> Option<usize> {
    let rotator = LogRotator::new(config);
    match rotator.list_archives() {
        Ok(archives) => Some(archives.len()),
        Err(e) => {
            tracing::debug!("{}", e);
            None
        }
    }
}

fn describe(state: PidFileState) -> String {
    match state {
        PidFileState::Absent => "idle (no PID file)".to_string(),
        PidFileState::Running(pid) => format!("running (PID {})", pid),
        PidFileState::Stale(pid) => format!("stale (PID {} is no longer running)", pid),
        PidFileState::Failed => "failed (last run ended in failure)".to_string(),
        PidFileState::Corrupt => "corrupt (PID file does not hold a process id)".to_string(),
    }
}

fn status_exit_code(state: PidFileState) -> i32 {
    match state {
        PidFileState::Running(_) => crate::errors::EXIT_ALREADY_RUNNING,
        PidFileState::Failed => 1,
        PidFileState::Absent | PidFileState::Stale(_) | PidFileState::Corrupt => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_states() {
        assert_eq!(describe(PidFileState::Running(7)), "running (PID 7)");
        assert!(describe(PidFileState::Stale(7)).starts_with("stale"));
        assert!(describe(PidFileState::Failed).starts_with("failed"));
    }

    #[test]
    fn test_status_exit_codes() {
        assert_eq!(status_exit_code(PidFileState::Absent), 0);
        assert_eq!(status_exit_code(PidFileState::Stale(1)), 0);
        assert_eq!(status_exit_code(PidFileState::Running(1)), 5);
        assert_eq!(status_exit_code(PidFileState::Failed), 1);
    }
}
