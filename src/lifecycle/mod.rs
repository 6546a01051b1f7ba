//! Start/fail/complete sequencing for one guarded job run.
//!
//! Every fatal condition goes through [`Lifecycle::fail`], which leaves the
//! PID file holding the `failed` sentinel and reports the failure to the
//! health-check endpoint. The one exception is finding another live
//! instance: that run owns the PID file, so it is left alone.

use chrono::{DateTime, Local};

use crate::errors::{GuardError, LifecycleError};
use crate::guard::{PidFile, PidFileState, WriteOutcome};
use crate::journal::{self, JobLog, Journal, Level, NoopJournal};
use crate::models::{readable_duration, GuardConfig, JobRun, RunState};
use crate::notify::{HealthChecks, HealthEvent, Notifier, NotifyError};
use crate::storage::logs::{LogRotator, RotationOutcome};

pub const DEFAULT_FAIL_MESSAGE: &str = "Ending cron app in a failed state.";
pub const DEFAULT_COMPLETE_MESSAGE: &str = "Process complete.";

/// Owns the run record and drives it through its states.
pub struct Lifecycle {
    config: GuardConfig,
    run: JobRun,
    log: JobLog,
    pid_file: PidFile,
    rotator: LogRotator,
    notifier: Option<Box<dyn Notifier>>,
}

impl Lifecycle {
    /// A lifecycle with no journal forwarding and no health checks.
    pub fn new(config: GuardConfig, identity: impl Into<String>) -> Self {
        let run = JobRun::new(identity);
        let log = JobLog::new(
            config.log_file(),
            run.identity.clone(),
            config.debug,
            Box::new(NoopJournal),
        );
        Self {
            pid_file: PidFile::new(config.pid.clone()),
            rotator: LogRotator::new(&config),
            config,
            run,
            log,
            notifier: None,
        }
    }

    /// A lifecycle wired the way the configuration asks: system journal when
    /// `Syslog` is on, health checks when `HealthChecksUrl` is set.
    pub fn from_config(
        config: GuardConfig,
        identity: impl Into<String>,
    ) -> Result<Self, NotifyError> {
        let journal = journal::system_journal(config.syslog);
        let notifier = match &config.health_checks_url {
            Some(url) => Some(HealthChecks::new(
                url.clone(),
                config.health_checks_timeout(),
            )?),
            None => None,
        };

        let mut lifecycle = Self::new(config, identity).with_journal(journal);
        if let Some(notifier) = notifier {
            lifecycle = lifecycle.with_notifier(Box::new(notifier));
        }
        Ok(lifecycle)
    }

    pub fn with_journal(mut self, journal: Box<dyn Journal>) -> Self {
        self.log = JobLog::new(
            self.config.log_file(),
            self.run.identity.clone(),
            self.config.debug,
            journal,
        );
        self
    }

    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn run(&self) -> &JobRun {
        &self.run
    }

    pub fn state(&self) -> RunState {
        self.run.state
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// The job log, for callers that want to add their own lines.
    pub fn log(&self) -> &JobLog {
        &self.log
    }

    /// Prepare the environment and claim the PID file.
    ///
    /// On success the run is `Running`. On failure the run has already been
    /// failed (or, for [`LifecycleError::AlreadyRunning`], abandoned) and the
    /// caller should exit with [`LifecycleError::exit_code`].
    pub fn start(&mut self) -> Result<(), LifecycleError> {
        if self.run.state != RunState::Created {
            return Err(LifecycleError::InvalidTransition {
                from: self.run.state,
                action: "start",
            });
        }

        let now = Local::now();
        let pid = std::process::id();
        self.run.start_time = Some(now);
        self.run.process_id = Some(pid);
        self.run.state = RunState::Starting;

        self.log
            .log(&format!("Starting {}.", self.run.identity), Level::Info);
        self.send(HealthEvent::Start);

        self.ensure_log_dir().map_err(|e| self.abort(e))?;
        self.ensure_pid_dir().map_err(|e| self.abort(e))?;
        self.claim_pid_file(pid)?;
        self.rotate_logs(now)?;

        self.run.state = RunState::Running;
        self.log.debug("Startup complete.");
        Ok(())
    }

    /// End the run in failure.
    ///
    /// Allowed from `Starting` and `Running`. Returns the error the caller
    /// should terminate with; the process itself is not exited here.
    pub fn fail(&mut self, message: &str, exit_code: i32) -> LifecycleError {
        if !matches!(self.run.state, RunState::Starting | RunState::Running) {
            return LifecycleError::InvalidTransition {
                from: self.run.state,
                action: "fail",
            };
        }

        self.log.log(message, Level::Err);
        self.mark_pid_failed();
        self.record_stop();
        self.send(HealthEvent::Fail);
        self.run.state = RunState::Failed;

        LifecycleError::Failed {
            message: message.to_string(),
            exit_code,
        }
    }

    /// End the run successfully. Allowed from `Running` only.
    ///
    /// If the PID file cannot be removed the run is failed with exit code 2
    /// instead.
    pub fn complete(&mut self, message: &str) -> Result<(), LifecycleError> {
        if self.run.state != RunState::Running {
            return Err(LifecycleError::InvalidTransition {
                from: self.run.state,
                action: "complete",
            });
        }

        self.log.log(message, Level::Info);
        self.log.debug("Attempting to remove the pid file.");
        self.pid_file.release().map_err(|e| self.abort(e))?;
        self.log.info("Pid file removed.");

        self.record_stop();
        self.send(HealthEvent::Complete);
        self.run.state = RunState::Completed;
        Ok(())
    }

    fn ensure_log_dir(&self) -> Result<(), GuardError> {
        let dir = self.config.log_dir();
        if dir.is_dir() {
            return Ok(());
        }
        self.log
            .info("The log directory does not exist, attempting to create it.");
        std::fs::create_dir_all(dir).map_err(|source| GuardError::LogDir {
            path: dir.to_path_buf(),
            source,
        })?;
        self.log.info("Log directory created successfully.");
        Ok(())
    }

    fn ensure_pid_dir(&self) -> Result<(), GuardError> {
        let Some(dir) = self.config.pid_dir() else {
            return Ok(());
        };
        if dir.is_dir() {
            return Ok(());
        }
        self.log
            .info("The PID directory doesn't exist, attempting to create it.");
        std::fs::create_dir_all(dir).map_err(|source| GuardError::PidDir {
            path: dir.to_path_buf(),
            source,
        })?;
        self.log.info("PID directory created successfully.");
        Ok(())
    }

    /// Check for a live instance, clear out a dead one's PID file, and record
    /// this process.
    fn claim_pid_file(&mut self, pid: u32) -> Result<(), LifecycleError> {
        // Held until the PID file is written.
        let _lock = if self.config.pid_lock {
            match self.pid_file.lock() {
                Ok(Some(lock)) => Some(lock),
                Ok(None) => return Err(self.already_running()),
                Err(e) => return Err(self.abort(e)),
            }
        } else {
            None
        };

        match self.pid_file.state() {
            PidFileState::Absent => {}
            PidFileState::Running(_) => return Err(self.already_running()),
            state => {
                self.log
                    .log("The PID is assumed to be orphaned or not running.", Level::Info);
                self.log.debug(&format!("PID file state was {:?}.", state));
                self.log.info("Attempting to remove pid file.");
                self.pid_file.remove_stale().map_err(|e| self.abort(e))?;
                self.log.info("The PID file was deleted successfully.");
            }
        }

        self.log
            .log(&format!("Process id is '{}'.", pid), Level::Info);
        self.log.log("Creating PID file.", Level::Info);
        match self.pid_file.write_pid(pid) {
            Ok(WriteOutcome::Written) => {
                self.log.info("PID file created successfully.");
                Ok(())
            }
            Ok(WriteOutcome::Taken) => Err(self.already_running()),
            Err(e) => Err(self.abort(e)),
        }
    }

    fn rotate_logs(&mut self, now: DateTime<Local>) -> Result<(), LifecycleError> {
        match self.rotator.maybe_rotate(now) {
            Ok(RotationOutcome::None) => {}
            Ok(RotationOutcome::Rotated(name)) => {
                self.log.info(&format!("Log file rotated to '{}'.", name));
            }
            Err(e) => return Err(self.abort(e)),
        }

        let pruned = self.rotator.prune().map_err(|e| self.abort(e))?;
        if !pruned.is_empty() {
            self.log.info(&format!(
                "The log limit is set at {}. Deleted {} excess log files.",
                self.rotator.max_count(),
                pruned.len()
            ));
            for name in &pruned {
                self.log.debug(&format!("Deleted log file {}.", name));
            }
        }
        Ok(())
    }

    /// Report a fatal environmental error and fail the run with its exit
    /// code.
    fn abort(&mut self, error: GuardError) -> LifecycleError {
        self.log.debug(&error.to_string());
        self.log.log(error.summary(), Level::Err);
        self.fail(DEFAULT_FAIL_MESSAGE, error.exit_code())
    }

    /// Another instance owns the PID file. The run ends here without the
    /// failure path: no sentinel, no notification.
    fn already_running(&mut self) -> LifecycleError {
        self.log
            .log("The process is currently running. Exiting.", Level::Warning);
        self.run.state = RunState::Failed;
        LifecycleError::AlreadyRunning {
            path: self.pid_file.path().to_path_buf(),
        }
    }

    /// Best-effort overwrite of the PID file with the failure sentinel. A
    /// file owned by another live process is never touched.
    fn mark_pid_failed(&self) {
        if let PidFileState::Running(owner) = self.pid_file.state() {
            if Some(owner) != self.run.process_id {
                self.log.debug(&format!(
                    "PID file belongs to running process {}, leaving it alone.",
                    owner
                ));
                return;
            }
        }
        if let Err(e) = self.pid_file.mark_failed() {
            self.log.debug(&format!(
                "Could not mark the PID file {} as failed: {}",
                self.pid_file.path().display(),
                e
            ));
        }
    }

    fn record_stop(&mut self) {
        self.run.stop_time = Some(Local::now());
        if let Some(duration) = self.run.duration() {
            self.log.info(&format!(
                "Total Run time: {}.",
                readable_duration(duration)
            ));
        }
    }

    fn send(&self, event: HealthEvent) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        self.log.info(&format!("Sending healthchecks {}.", event));
        if let Err(e) = notifier.notify(event, &self.run.run_id.to_string()) {
            self.log
                .debug(&format!("Health check {} was not delivered: {}", event, e));
        }
    }
}
