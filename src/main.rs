use clap::Parser;
use tracing_subscriber::EnvFilter;

use cron_guard::cli::{self, Cli};

fn main() {
    let cli = Cli::parse();

    // Cron mails whatever reaches stderr, so stay quiet unless asked.
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli::dispatch(&cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}
