pub mod config;
pub mod run;

pub use config::{load_config, normalize_log_path, GuardConfig};
pub use run::{readable_duration, JobRun, RunState};
