pub mod run;
pub mod status;

use std::collections::HashMap;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// cron-guard - single-instance guard, log rotation and health checks for cron jobs
#[derive(Parser, Debug)]
#[command(
    name = "cronguard",
    version,
    about = "cron-guard - single-instance guard, log rotation and health checks for cron jobs"
)]
pub struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to configuration file
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a command under the guard
    Run {
        /// Name used in log lines and journal entries (default: the program name)
        #[arg(short = 'i', long)]
        identity: Option<String>,

        /// Working directory for the command
        #[arg(long = "working-dir")]
        working_dir: Option<PathBuf>,

        /// Environment variables (KEY=VALUE)
        #[arg(short = 'e', long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,

        /// The command to run and its arguments
        #[arg(last = true, required = true, value_name = "COMMAND")]
        command: Vec<String>,
    },

    /// Show the state of the PID file and archived logs
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Parse environment variable arguments from "KEY=VALUE" format into a HashMap.
pub fn parse_env_vars(env_args: &[String]) -> Result<HashMap<String, String>, String> {
    let mut map = HashMap::new();
    for arg in env_args {
        if let Some((key, value)) = arg.split_once('=') {
            if key.is_empty() {
                return Err(format!("Invalid environment variable: '{}'", arg));
            }
            map.insert(key.to_string(), value.to_string());
        } else {
            return Err(format!(
                "Invalid environment variable format: '{}'. Expected KEY=VALUE",
                arg
            ));
        }
    }
    Ok(map)
}

/// Dispatch the CLI command and return the process exit code.
pub fn dispatch(cli: &Cli) -> anyhow::Result<i32> {
    match &cli.command {
        Some(Commands::Run {
            identity,
            working_dir,
            env,
            command,
        }) => run::cmd_run(
            cli.config.as_deref(),
            identity.as_deref(),
            working_dir.as_deref(),
            env,
            command,
        ),
        Some(Commands::Status { json }) => status::cmd_status(cli.config.as_deref(), *json),
        None => {
            // No subcommand provided -- print help
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
            Ok(0)
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_version_flag() {
        let result = Cli::try_parse_from(["cronguard", "--version"]);
        // --version causes clap to exit with an error containing the version
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
        assert!(err.to_string().contains("0.1.0"));
    }

    #[test]
    fn test_cli_run_parses_trailing_command() {
        let cli = Cli::try_parse_from([
            "cronguard",
            "-c",
            "/etc/backup.toml",
            "run",
            "--identity",
            "backup",
            "-e",
            "TARGET=/srv",
            "--",
            "tar",
            "-czf",
            "out.tgz",
            "/srv",
        ])
        .expect("parse");

        assert_eq!(cli.config, Some(PathBuf::from("/etc/backup.toml")));
        match cli.command {
            Some(Commands::Run {
                identity,
                env,
                command,
                working_dir,
            }) => {
                assert_eq!(identity.as_deref(), Some("backup"));
                assert_eq!(env, vec!["TARGET=/srv".to_string()]);
                assert_eq!(command, vec!["tar", "-czf", "out.tgz", "/srv"]);
                assert!(working_dir.is_none());
            }
            other => panic!("Expected Run command, got: {:?}", other),
        }
    }

    #[test]
    fn test_cli_run_requires_command() {
        let result = Cli::try_parse_from(["cronguard", "run"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_status_json() {
        let cli = Cli::try_parse_from(["cronguard", "status", "--json"]).expect("parse");
        match cli.command {
            Some(Commands::Status { json }) => assert!(json),
            other => panic!("Expected Status command, got: {:?}", other),
        }
    }

    #[test]
    fn test_cli_global_config_after_subcommand() {
        let cli = Cli::try_parse_from(["cronguard", "status", "--config", "job.toml"])
            .expect("parse");
        assert_eq!(cli.config, Some(PathBuf::from("job.toml")));
    }

    #[test]
    fn test_parse_env_vars_valid() {
        let args = vec!["FOO=bar".to_string(), "EMPTY=".to_string()];
        let map = parse_env_vars(&args).expect("parse");
        assert_eq!(map.get("FOO").map(String::as_str), Some("bar"));
        assert_eq!(map.get("EMPTY").map(String::as_str), Some(""));
    }

    #[test]
    fn test_parse_env_vars_invalid() {
        assert!(parse_env_vars(&["NOEQUALS".to_string()]).is_err());
        assert!(parse_env_vars(&["=value".to_string()]).is_err());
    }
}
