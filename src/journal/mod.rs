// Job log file and system journal sinks.

#[cfg(unix)]
mod syslog;

#[cfg(unix)]
pub use syslog::SyslogJournal;

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;

/// Timestamp layout used for log lines and archive names.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Syslog priorities, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Emerg = 0,
    Alert = 1,
    Crit = 2,
    Err = 3,
    Warning = 4,
    Notice = 5,
    Info = 6,
    Debug = 7,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Level::Emerg => "Emerg",
            Level::Alert => "Alert",
            Level::Crit => "Crit",
            Level::Err => "Err",
            Level::Warning => "Warning",
            Level::Notice => "Notice",
            Level::Info => "Info",
            Level::Debug => "Debug",
        };
        f.write_str(name)
    }
}

/// A system journal that accepts one message at a given severity.
pub trait Journal {
    fn write(&self, message: &str, level: Level, identity: &str);
}

/// Journal that drops everything. Used off unix and when forwarding is off.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopJournal;

impl Journal for NoopJournal {
    fn write(&self, _message: &str, _level: Level, _identity: &str) {}
}

/// Pick the journal implementation for this platform.
pub fn system_journal(enabled: bool) -> Box<dyn Journal> {
    #[cfg(unix)]
    {
        if enabled {
            return Box::new(SyslogJournal);
        }
    }
    let _ = enabled;
    Box::new(NoopJournal)
}

/// Split a message into the individual lines sent to the journal. Lines are
/// trimmed and blank ones dropped.
pub fn journal_lines(message: &str) -> impl Iterator<Item = &str> {
    message
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
}

/// Format one job log line.
pub fn format_line(level: Level, message: &str) -> String {
    format!(
        "{}[{}]: {}\n",
        Local::now().format(TIMESTAMP_FORMAT),
        level,
        message
    )
}

/// Appends lines to the job's log file and forwards the important ones to
/// the system journal.
///
/// Write failures are reported through `tracing` and otherwise ignored: a
/// missing log directory must never turn a log call into a failed run.
pub struct JobLog {
    path: PathBuf,
    identity: String,
    debug: bool,
    journal: Box<dyn Journal>,
}

impl JobLog {
    pub fn new(
        path: PathBuf,
        identity: impl Into<String>,
        debug: bool,
        journal: Box<dyn Journal>,
    ) -> Self {
        Self {
            path,
            identity: identity.into(),
            debug,
            journal,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Log to the file and the system journal.
    pub fn log(&self, message: &str, level: Level) {
        self.journal.write(message, level, &self.identity);
        self.append(message, level);
    }

    /// Log at info severity to the file only.
    pub fn info(&self, message: &str) {
        self.append(message, Level::Info);
    }

    /// Log at debug severity to the file only, and only in debug mode.
    pub fn debug(&self, message: &str) {
        if self.debug {
            self.append(message, Level::Debug);
        }
    }

    fn append(&self, message: &str, level: Level) {
        match level {
            Level::Emerg | Level::Alert | Level::Crit | Level::Err => {
                tracing::error!(identity = %self.identity, "{}", message)
            }
            Level::Warning => tracing::warn!(identity = %self.identity, "{}", message),
            Level::Notice | Level::Info => tracing::info!(identity = %self.identity, "{}", message),
            Level::Debug => tracing::debug!(identity = %self.identity, "{}", message),
        }

        let line = format_line(level, message);
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(line.as_bytes()));
        if let Err(e) = result {
            tracing::warn!("Could not append to log file {}: {}", self.path.display(), e);
        }
    }
}
