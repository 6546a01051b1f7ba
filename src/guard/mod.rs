//! PID file and single-instance guard.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::Serialize;

use crate::errors::GuardError;

/// Contents written to the PID file when a run ends in failure.
pub const FAILED_SENTINEL: &str = "failed";

/// What the PID file currently says about the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "pid", rename_all = "lowercase")]
pub enum PidFileState {
    /// No PID file.
    Absent,
    /// A live process owns the PID file.
    Running(u32),
    /// The recorded process is gone.
    Stale(u32),
    /// The previous run failed and left the sentinel behind.
    Failed,
    /// Empty, unreadable or otherwise not a process id.
    Corrupt,
}

impl PidFileState {
    pub fn is_running(self) -> bool {
        matches!(self, PidFileState::Running(_))
    }
}

/// Parse PID file contents into a process id.
///
/// Anything that is not a positive decimal integer fitting a platform pid is
/// rejected.
pub fn parse_pid(content: &str) -> Option<u32> {
    let pid: u32 = content.trim().parse().ok()?;
    if pid == 0 || pid > i32::MAX as u32 {
        return None;
    }
    Some(pid)
}

/// Read the PID file at `path` and classify it. Never fails: a missing,
/// unreadable or malformed file is a normal outcome.
pub fn inspect(path: &Path) -> PidFileState {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return PidFileState::Absent,
        Err(e) => {
            tracing::debug!("Could not read PID file {}: {}", path.display(), e);
            return PidFileState::Corrupt;
        }
    };

    if content.trim() == FAILED_SENTINEL {
        return PidFileState::Failed;
    }

    match parse_pid(&content) {
        Some(pid) if is_process_alive(pid) => PidFileState::Running(pid),
        Some(pid) => PidFileState::Stale(pid),
        None => {
            tracing::debug!("PID file {} does not hold a process id", path.display());
            PidFileState::Corrupt
        }
    }
}

/// Whether another instance of the job is alive according to the PID file.
pub fn is_already_running(path: &Path) -> bool {
    inspect(path).is_running()
}

/// Check whether a process with the given PID is alive.
///
/// Uses kill(pid, 0): signal 0 checks existence without sending a signal.
/// EPERM means the process exists but belongs to another user.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    if unsafe { libc::kill(pid as libc::pid_t, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn is_process_alive(_pid: u32) -> bool {
    // No portable liveness probe; every recorded PID is treated as orphaned.
    false
}

/// Handle on the job's PID file.
///
/// Acquisition is a two-step protocol: [`inspect`] decides whether a previous
/// run is still alive, then [`PidFile::write_pid`] records this process.
/// Nothing stops two processes from passing the check at the same moment; the
/// exclusive create in `write_pid` and the optional [`PidFile::lock`] narrow
/// that window.
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

/// Outcome of trying to record this process in the PID file.
#[derive(Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// Another process created the file between the check and the write.
    Taken,
}

impl PidFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> PidFileState {
        inspect(&self.path)
    }

    /// Create the PID file exclusively and write `pid` into it.
    pub fn write_pid(&self, pid: u32) -> Result<WriteOutcome, GuardError> {
        let mut file = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Ok(WriteOutcome::Taken)
            }
            Err(source) => {
                return Err(GuardError::WritePid {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        write!(file, "{}", pid)
            .and_then(|_| file.flush())
            .map_err(|source| GuardError::WritePid {
                path: self.path.clone(),
                source,
            })?;

        tracing::info!("PID file acquired: {} (PID {})", self.path.display(), pid);
        Ok(WriteOutcome::Written)
    }

    /// Remove a PID file left behind by a dead or failed run. A file that is
    /// already gone counts as removed.
    pub fn remove_stale(&self) -> Result<(), GuardError> {
        self.remove()
            .map_err(|source| GuardError::StalePid {
                path: self.path.clone(),
                source,
            })
    }

    /// Remove the PID file at the end of a successful run.
    pub fn release(&self) -> Result<(), GuardError> {
        self.remove().map_err(|source| GuardError::RemovePid {
            path: self.path.clone(),
            source,
        })?;
        tracing::info!("PID file released: {}", self.path.display());
        Ok(())
    }

    /// Overwrite the PID file with the failure sentinel.
    pub fn mark_failed(&self) -> std::io::Result<()> {
        std::fs::write(&self.path, FAILED_SENTINEL)
    }

    /// Take an exclusive advisory lock on `<pid file>.lock` without blocking.
    ///
    /// Returns `Ok(None)` when another process holds the lock. Any other
    /// locking error (no lock support on the filesystem, for one) is a
    /// `PidLock` error. The lock is released when the returned guard is
    /// dropped.
    pub fn lock(&self) -> Result<Option<PidLock>, GuardError> {
        let lock_path = self.lock_path();
        let file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|source| GuardError::PidLock {
                path: lock_path.clone(),
                source,
            })?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(PidLock { _file: file })),
            Err(e) => lock_failure(lock_path, e),
        }
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    fn remove(&self) -> std::io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Contention means another start holds the lock; anything else is fatal.
fn lock_failure(lock_path: PathBuf, error: std::io::Error) -> Result<Option<PidLock>, GuardError> {
    if error.kind() == fs2::lock_contended_error().kind() {
        tracing::debug!("PID lock {} is held: {}", lock_path.display(), error);
        return Ok(None);
    }
    Err(GuardError::PidLock {
        path: lock_path,
        source: error,
    })
}

/// Held advisory lock on the PID lock file.
#[derive(Debug)]
pub struct PidLock {
    _file: File,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Above the Linux pid_max ceiling, so never alive.
    const DEAD_PID: u32 = 99_999_999;

    fn setup() -> (TempDir, PathBuf) {
        let tmp_dir = TempDir::new().expect("create temp dir");
        let pid_path = tmp_dir.path().join("test.pid");
        (tmp_dir, pid_path)
    }

    #[test]
    fn test_missing_pid_file_is_not_running() {
        let (_tmp, pid_path) = setup();
        assert_eq!(inspect(&pid_path), PidFileState::Absent);
        assert!(!is_already_running(&pid_path));
    }

    #[test]
    fn test_live_pid_is_running() {
        let (_tmp, pid_path) = setup();
        std::fs::write(&pid_path, std::process::id().to_string()).expect("write PID file");
        assert_eq!(inspect(&pid_path), PidFileState::Running(std::process::id()));
        assert!(is_already_running(&pid_path));
    }

    #[test]
    fn test_live_pid_with_trailing_newline_is_running() {
        let (_tmp, pid_path) = setup();
        std::fs::write(&pid_path, format!("{}\n", std::process::id())).expect("write PID file");
        assert!(is_already_running(&pid_path));
    }

    #[test]
    fn test_dead_pid_is_stale() {
        let (_tmp, pid_path) = setup();
        std::fs::write(&pid_path, DEAD_PID.to_string()).expect("write PID file");
        assert_eq!(inspect(&pid_path), PidFileState::Stale(DEAD_PID));
        assert!(!is_already_running(&pid_path));
    }

    #[test]
    fn test_malformed_contents_are_not_running() {
        let (_tmp, pid_path) = setup();
        for content in [
            "",
            "   ",
            "abc",
            "12ab",
            "-1",
            "0",
            "99999999999999999999",
            "4294967295",
            "3.14",
        ] {
            std::fs::write(&pid_path, content).expect("write PID file");
            assert_eq!(
                inspect(&pid_path),
                PidFileState::Corrupt,
                "content {:?} should be corrupt",
                content
            );
            assert!(!is_already_running(&pid_path));
        }
    }

    #[test]
    fn test_failed_sentinel() {
        let (_tmp, pid_path) = setup();
        std::fs::write(&pid_path, FAILED_SENTINEL).expect("write PID file");
        assert_eq!(inspect(&pid_path), PidFileState::Failed);
        assert!(!is_already_running(&pid_path));
    }

    #[test]
    fn test_parse_pid() {
        assert_eq!(parse_pid("1234"), Some(1234));
        assert_eq!(parse_pid(" 1234\n"), Some(1234));
        assert_eq!(parse_pid("failed"), None);
        assert_eq!(parse_pid("0"), None);
        assert_eq!(parse_pid("2147483648"), None);
    }

    #[test]
    fn test_process_alive_edges() {
        assert!(is_process_alive(std::process::id()));
        assert!(!is_process_alive(0));
        assert!(!is_process_alive(u32::MAX));
        assert!(!is_process_alive(DEAD_PID));
    }

    #[test]
    fn test_write_pid_creates_file() {
        let (_tmp, pid_path) = setup();
        let pid_file = PidFile::new(pid_path.clone());
        let outcome = pid_file.write_pid(std::process::id()).expect("write");
        assert_eq!(outcome, WriteOutcome::Written);

        let content = std::fs::read_to_string(&pid_path).expect("read PID file");
        assert_eq!(content, std::process::id().to_string());
    }

    #[test]
    fn test_write_pid_reports_taken_when_file_exists() {
        let (_tmp, pid_path) = setup();
        std::fs::write(&pid_path, "777").expect("write PID file");
        let pid_file = PidFile::new(pid_path.clone());
        let outcome = pid_file.write_pid(std::process::id()).expect("write");
        assert_eq!(outcome, WriteOutcome::Taken);
        assert_eq!(std::fs::read_to_string(&pid_path).unwrap(), "777");
    }

    #[test]
    fn test_write_pid_into_missing_directory_errors() {
        let (tmp, _) = setup();
        let pid_file = PidFile::new(tmp.path().join("nope").join("x.pid"));
        let err = pid_file.write_pid(1).unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn test_release_and_remove_stale_tolerate_missing_file() {
        let (_tmp, pid_path) = setup();
        let pid_file = PidFile::new(pid_path.clone());
        pid_file.remove_stale().expect("remove stale");
        pid_file.release().expect("release");

        std::fs::write(&pid_path, "1").expect("write PID file");
        pid_file.release().expect("release");
        assert!(!pid_path.exists());
    }

    #[test]
    fn test_mark_failed_overwrites_contents() {
        let (_tmp, pid_path) = setup();
        std::fs::write(&pid_path, "12345").expect("write PID file");
        PidFile::new(pid_path.clone()).mark_failed().expect("mark failed");
        assert_eq!(std::fs::read_to_string(&pid_path).unwrap(), "failed");
    }

    #[test]
    fn test_lock_is_exclusive_until_dropped() {
        let (_tmp, pid_path) = setup();
        let pid_file = PidFile::new(pid_path.clone());

        let held = pid_file.lock().expect("open lock").expect("acquire lock");
        // A second open file description must not get the lock.
        let other = PidFile::new(pid_path.clone());
        assert!(other.lock().expect("open lock").is_none());

        drop(held);
        assert!(other.lock().expect("open lock").is_some());
        assert!(pid_path.with_extension("pid.lock").exists());
    }

    #[test]
    fn test_lock_contention_is_not_an_error() {
        let outcome = lock_failure(PathBuf::from("job.pid.lock"), fs2::lock_contended_error());
        assert!(outcome.expect("contention").is_none());
    }

    #[test]
    fn test_unsupported_lock_is_fatal() {
        let error = std::io::Error::new(std::io::ErrorKind::Unsupported, "locks not supported");
        match lock_failure(PathBuf::from("job.pid.lock"), error) {
            Err(e @ GuardError::PidLock { .. }) => assert_eq!(e.exit_code(), 4),
            other => panic!("Expected PidLock error, got: {:?}", other),
        }
    }

    #[test]
    fn test_state_serializes_for_status_output() {
        let json = serde_json::to_string(&PidFileState::Running(42)).expect("serialize");
        assert_eq!(json, r#"{"state":"running","pid":42}"#);
        let json = serde_json::to_string(&PidFileState::Absent).expect("serialize");
        assert_eq!(json, r#"{"state":"absent"}"#);
    }
}
