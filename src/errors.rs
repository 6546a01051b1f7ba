use std::path::PathBuf;

use thiserror::Error;

use crate::models::RunState;

/// Exit code for log directory and log rotation failures.
pub const EXIT_LOG_DIR: i32 = 1;
/// Exit code for log file, pruning and PID removal failures.
pub const EXIT_LOG_FILE: i32 = 2;
/// Exit code for PID directory failures.
pub const EXIT_PID_DIR: i32 = 3;
/// Exit code for PID file failures.
pub const EXIT_PID_FILE: i32 = 4;
/// Exit code when another instance already holds the PID file.
pub const EXIT_ALREADY_RUNNING: i32 = 5;

/// Environmental failures that abort a run. Each variant maps to the exit
/// code of the subsystem that failed.
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("Could not create the log directory {path:?}: {source}")]
    LogDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not create the PID directory {path:?}: {source}")]
    PidDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not remove the stale PID file {path:?}: {source}")]
    StalePid {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not write the PID file {path:?}: {source}")]
    WritePid {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not lock the PID file via {path:?}: {source}")]
    PidLock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not remove the PID file {path:?}: {source}")]
    RemovePid {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not move log file {from:?} to {to:?}: {source}")]
    RotateLog {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not create log file {path:?}: {source}")]
    CreateLog {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not list the log directory {path:?}: {source}")]
    ListLogs {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not delete log file {path:?}: {source}")]
    PruneLog {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl GuardError {
    /// The process exit code this failure terminates the run with.
    pub fn exit_code(&self) -> i32 {
        match self {
            GuardError::LogDir { .. } | GuardError::RotateLog { .. } => EXIT_LOG_DIR,
            GuardError::CreateLog { .. }
            | GuardError::ListLogs { .. }
            | GuardError::PruneLog { .. }
            | GuardError::RemovePid { .. } => EXIT_LOG_FILE,
            GuardError::PidDir { .. } => EXIT_PID_DIR,
            GuardError::StalePid { .. } | GuardError::WritePid { .. } | GuardError::PidLock { .. } => {
                EXIT_PID_FILE
            }
        }
    }

    /// Short operator-facing summary written to the job log at error severity.
    pub fn summary(&self) -> &'static str {
        match self {
            GuardError::LogDir { .. } => "Could not create the log path.",
            GuardError::PidDir { .. } => "Could not create pid path.",
            GuardError::StalePid { .. } => "Exiting with error. Could not remove PID file.",
            GuardError::WritePid { .. } => "Exiting with error. Could not write PID file.",
            GuardError::PidLock { .. } => "Exiting with error. Could not lock the PID file.",
            GuardError::RemovePid { .. } => "Failed to remove the pid file.",
            GuardError::RotateLog { .. } => "Exiting with error. Could not move log file.",
            GuardError::CreateLog { .. } => "Exiting with error. Could not create log file.",
            GuardError::ListLogs { .. } => "Could not get directory list of the log path.",
            GuardError::PruneLog { .. } => "Exiting with error. Could not delete old log file.",
        }
    }
}

/// Ways a lifecycle call can end the run instead of returning normally.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Another live process owns the PID file. The run was not failed and the
    /// PID file was left alone.
    #[error("The process is currently running (PID file {path:?})")]
    AlreadyRunning { path: PathBuf },

    /// The run reached the `Failed` state.
    #[error("{message}")]
    Failed { message: String, exit_code: i32 },

    #[error("Cannot {action} a run in state {from:?}")]
    InvalidTransition { from: RunState, action: &'static str },
}

impl LifecycleError {
    pub fn exit_code(&self) -> i32 {
        match self {
            LifecycleError::AlreadyRunning { .. } => EXIT_ALREADY_RUNNING,
            LifecycleError::Failed { exit_code, .. } => *exit_code,
            LifecycleError::InvalidTransition { .. } => EXIT_LOG_DIR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn io_err() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::PermissionDenied, "permission denied")
    }

    #[test]
    fn test_exit_codes_by_subsystem() {
        let p = PathBuf::from("/x");
        assert_eq!(
            GuardError::LogDir { path: p.clone(), source: io_err() }.exit_code(),
            1
        );
        assert_eq!(
            GuardError::RotateLog { from: p.clone(), to: p.clone(), source: io_err() }.exit_code(),
            1
        );
        assert_eq!(
            GuardError::CreateLog { path: p.clone(), source: io_err() }.exit_code(),
            2
        );
        assert_eq!(
            GuardError::ListLogs { path: p.clone(), source: io_err() }.exit_code(),
            2
        );
        assert_eq!(
            GuardError::PruneLog { path: p.clone(), source: io_err() }.exit_code(),
            2
        );
        assert_eq!(
            GuardError::RemovePid { path: p.clone(), source: io_err() }.exit_code(),
            2
        );
        assert_eq!(
            GuardError::PidDir { path: p.clone(), source: io_err() }.exit_code(),
            3
        );
        assert_eq!(
            GuardError::StalePid { path: p.clone(), source: io_err() }.exit_code(),
            4
        );
        assert_eq!(
            GuardError::WritePid { path: p.clone(), source: io_err() }.exit_code(),
            4
        );
        assert_eq!(GuardError::PidLock { path: p, source: io_err() }.exit_code(), 4);
    }

    #[test]
    fn test_guard_error_display_includes_source() {
        let err = GuardError::PidDir {
            path: PathBuf::from("/var/run/job"),
            source: io_err(),
        };
        let msg = err.to_string();
        assert!(msg.contains("/var/run/job"));
        assert!(msg.contains("permission denied"));
    }

    #[test]
    fn test_lifecycle_error_exit_codes() {
        let running = LifecycleError::AlreadyRunning {
            path: PathBuf::from("pid/cron.pid"),
        };
        assert_eq!(running.exit_code(), 5);

        let failed = LifecycleError::Failed {
            message: "disk full".to_string(),
            exit_code: 2,
        };
        assert_eq!(failed.exit_code(), 2);
        assert_eq!(failed.to_string(), "disk full");
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = LifecycleError::InvalidTransition {
            from: RunState::Completed,
            action: "complete",
        };
        assert_eq!(err.to_string(), "Cannot complete a run in state Completed");
    }
}
