use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};

use crate::errors::GuardError;
use crate::journal::TIMESTAMP_FORMAT;
use crate::models::GuardConfig;

/// Pruning never trims the archive set below this many files, whatever
/// `LogMaxCount` says. Once the count exceeds `LogMaxCount`, the oldest
/// archives are deleted until exactly this many remain.
pub const MIN_RETAINED_LOGS: usize = 5;

/// Marker written as the first line of a freshly rotated log.
pub const LOG_CREATED_MARKER: &str = "Log file created.";

/// .NET ticks per microsecond. Archives written by older installations
/// carry a raw tick count (100ns units since 0001-01-01) as their suffix.
const TICKS_PER_MICROSECOND: i64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationOutcome {
    None,
    /// The active log was archived under this file name.
    Rotated(String),
}

/// One archived log in the log directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    pub name: String,
    /// Ordering key parsed from the name suffix. `None` when the suffix is
    /// not a timestamp; such archives are never pruned.
    pub timestamp: Option<NaiveDateTime>,
}

/// Rotates the active job log and prunes old archives.
pub struct LogRotator {
    dir: PathBuf,
    log_name: String,
    max_bytes: u64,
    /// `None` when `LogMaxAge` is too large to represent; no log is ever
    /// that old.
    max_age: Option<chrono::TimeDelta>,
    max_count: usize,
}

impl LogRotator {
    pub fn new(config: &GuardConfig) -> Self {
        Self {
            dir: config.log_dir().to_path_buf(),
            log_name: config.log_name.clone(),
            max_bytes: config.log_max_bytes(),
            max_age: chrono::TimeDelta::try_days(config.log_max_age),
            max_count: config.log_max_count,
        }
    }

    /// Path of the active log.
    pub fn active_log(&self) -> PathBuf {
        self.dir.join(&self.log_name)
    }

    fn archive_prefix(&self) -> String {
        format!("{}.old.", self.log_name)
    }

    /// Whether the active log is past its size or age limit.
    ///
    /// A missing or unreadable log never needs rotation. Age is measured
    /// from the file's creation time (modification time where the platform
    /// does not record creation) and the log is rotated once it is older
    /// than `LogMaxAge` days.
    pub fn needs_rotation(&self, now: DateTime<Local>) -> bool {
        let path = self.active_log();
        let meta = match std::fs::metadata(&path) {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return false,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Could not stat log file {}: {}", path.display(), e);
                }
                return false;
            }
        };

        if meta.len() > self.max_bytes {
            tracing::debug!(
                "Log file {} is {} bytes, limit {}",
                path.display(),
                meta.len(),
                self.max_bytes
            );
            return true;
        }

        let Some(cutoff) = self
            .max_age
            .and_then(|age| now.checked_sub_signed(age))
        else {
            return false;
        };
        let created = match meta.created().or_else(|_| meta.modified()) {
            Ok(time) => DateTime::<Local>::from(time),
            Err(_) => return false,
        };
        created < cutoff
    }

    /// Rotate the active log if it is past its limits.
    pub fn maybe_rotate(&self, now: DateTime<Local>) -> Result<RotationOutcome, GuardError> {
        if !self.needs_rotation(now) {
            return Ok(RotationOutcome::None);
        }
        self.rotate(now).map(RotationOutcome::Rotated)
    }

    /// Move the active log to `<LogName>.old.<timestamp>` and start a fresh
    /// one holding only the creation marker.
    pub fn rotate(&self, now: DateTime<Local>) -> Result<String, GuardError> {
        let from = self.active_log();

        // Two rotations inside the same second would collide; step forward
        // until the name is free so no archive is overwritten.
        let mut stamp = now.naive_local();
        let (name, to) = loop {
            let name = format!("{}{}", self.archive_prefix(), stamp.format(TIMESTAMP_FORMAT));
            let to = self.dir.join(&name);
            if !to.exists() {
                break (name, to);
            }
            stamp += chrono::Duration::seconds(1);
        };

        std::fs::rename(&from, &to).map_err(|source| GuardError::RotateLog {
            from: from.clone(),
            to: to.clone(),
            source,
        })?;
        tracing::debug!("Moved {} to {}", from.display(), to.display());

        self.create_active_log(now)?;
        Ok(name)
    }

    fn create_active_log(&self, now: DateTime<Local>) -> Result<(), GuardError> {
        use std::io::Write;

        let path = self.active_log();
        let line = format!("{}: {}\n", now.format(TIMESTAMP_FORMAT), LOG_CREATED_MARKER);
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut file| file.write_all(line.as_bytes()))
            .map_err(|source| GuardError::CreateLog { path, source })
    }

    /// List the archived logs, oldest first. Archives without a parseable
    /// timestamp sort last.
    pub fn list_archives(&self) -> Result<Vec<Archive>, GuardError> {
        let list_err = |source| GuardError::ListLogs {
            path: self.dir.clone(),
            source,
        };
        let prefix = self.archive_prefix();

        let mut archives = Vec::new();
        for entry in std::fs::read_dir(&self.dir).map_err(list_err)? {
            let entry = entry.map_err(list_err)?;
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(_) => continue,
            };
            let Some(suffix) = name.strip_prefix(&prefix) else {
                continue;
            };
            let timestamp = parse_archive_suffix(suffix);
            archives.push(Archive { name, timestamp });
        }

        archives.sort_by(|a, b| match (a.timestamp, b.timestamp) {
            (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.name.cmp(&b.name)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.name.cmp(&b.name),
        });
        Ok(archives)
    }

    /// Delete the oldest archives once there are more than `LogMaxCount`,
    /// leaving [`MIN_RETAINED_LOGS`]. Returns the names that were deleted.
    pub fn prune(&self) -> Result<Vec<String>, GuardError> {
        let archives = self.list_archives()?;
        tracing::debug!(
            "Found {} archived logs in {}",
            archives.len(),
            self.dir.display()
        );

        if archives.len() <= self.max_count {
            return Ok(Vec::new());
        }

        let excess = archives.len().saturating_sub(MIN_RETAINED_LOGS);
        let mut pruned = Vec::new();
        for archive in archives.iter().take(excess) {
            if archive.timestamp.is_none() {
                tracing::warn!(
                    "Skipping archive with unrecognized timestamp: {}",
                    archive.name
                );
                continue;
            }
            let path = self.dir.join(&archive.name);
            std::fs::remove_file(&path).map_err(|source| GuardError::PruneLog {
                path: path.clone(),
                source,
            })?;
            tracing::debug!("Deleted old log file {}", path.display());
            pruned.push(archive.name.clone());
        }
        Ok(pruned)
    }

    pub fn max_count(&self) -> usize {
        self.max_count
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Parse the timestamp suffix of an archive name: either the sortable
/// `%Y-%m-%dT%H:%M:%S` form or a raw tick count.
pub fn parse_archive_suffix(suffix: &str) -> Option<NaiveDateTime> {
    if let Ok(ts) = NaiveDateTime::parse_from_str(suffix, TIMESTAMP_FORMAT) {
        return Some(ts);
    }
    let ticks: i64 = suffix.parse().ok()?;
    if ticks < 0 {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1, 1, 1)?.and_hms_opt(0, 0, 0)?;
    epoch.checked_add_signed(chrono::Duration::microseconds(ticks / TICKS_PER_MICROSECOND))
}
