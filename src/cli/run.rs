// cronguard run: wrap one command in the job lifecycle

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread::JoinHandle;

use anyhow::Context;

use super::parse_env_vars;
use crate::journal::Level;
use crate::lifecycle::{Lifecycle, DEFAULT_COMPLETE_MESSAGE};
use crate::models::load_config;

/// Start the lifecycle, run the command, then complete or fail depending on
/// how it exited. Returns the exit code for this process.
pub fn cmd_run(
    config_path: Option<&Path>,
    identity: Option<&str>,
    working_dir: Option<&Path>,
    env: &[String],
    command: &[String],
) -> anyhow::Result<i32> {
    let env_vars = parse_env_vars(env).map_err(|e| anyhow::anyhow!(e))?;
    let (program, args) = command.split_first().context("No command given")?;
    let config = load_config(config_path)?;

    let identity = identity
        .map(str::to_string)
        .unwrap_or_else(|| program_name(program));
    let mut lifecycle =
        Lifecycle::from_config(config, identity).context("Failed to set up health checks")?;

    if let Err(e) = lifecycle.start() {
        tracing::debug!("Startup ended the run: {}", e);
        return Ok(e.exit_code());
    }

    let code = match run_command(&lifecycle, program, args, working_dir, &env_vars) {
        Ok(status) if status.success() => match lifecycle.complete(DEFAULT_COMPLETE_MESSAGE) {
            Ok(()) => 0,
            Err(e) => e.exit_code(),
        },
        Ok(status) => {
            let message = match status.code() {
                Some(code) => format!("Command '{}' exited with status {}.", program, code),
                None => format!("Command '{}' was terminated by a signal.", program),
            };
            lifecycle.fail(&message, 1).exit_code()
        }
        Err(e) => {
            let message = format!("Could not run command '{}': {}", program, e);
            lifecycle.fail(&message, 1).exit_code()
        }
    };
    Ok(code)
}

/// File name of the program, used as the default identity.
fn program_name(program: &str) -> String {
    Path::new(program)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.to_string())
}

/// Spawn the command and copy its output into the job log line by line.
fn run_command(
    lifecycle: &Lifecycle,
    program: &str,
    args: &[String],
    working_dir: Option<&Path>,
    env: &HashMap<String, String>,
) -> std::io::Result<ExitStatus> {
    let mut cmd = Command::new(program);
    cmd.args(args)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn()?;
    lifecycle.log().log(
        &format!("Running '{}' (PID {}).", program, child.id()),
        Level::Info,
    );

    let (tx, rx) = mpsc::channel();
    let mut readers = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        readers.push(spawn_reader(stdout, "stdout", tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(spawn_reader(stderr, "stderr", tx.clone()));
    }
    drop(tx);

    for (stream, line) in rx {
        lifecycle.log().info(&format!("[{}] {}", stream, line));
    }
    for reader in readers {
        if reader.join().is_err() {
            tracing::warn!("Output reader thread panicked");
        }
    }

    child.wait()
}

fn spawn_reader<R: Read + Send + 'static>(
    source: R,
    stream: &'static str,
    tx: mpsc::Sender<(&'static str, String)>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        let mut reader = BufReader::new(source);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                    if tx.send((stream, line)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!("Stopped reading {}: {}", stream, e);
                    break;
                }
            }
        }
    })
}
