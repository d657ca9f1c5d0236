mod cli;
mod compile;
mod config;
mod error;
mod export;
mod grid;
mod season;
mod source;
mod store;
mod summary;
mod time_coord;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use cli::{command, Cli, Commands};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn main() -> ExitCode {
    let stderr_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")));
    tracing_subscriber::registry().with(stderr_layer).init();

    let cli = Cli::parse();

    match run(&cli.command) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Runs a command, returning whether every product succeeded.
fn run(command: &Commands) -> Result<bool> {
    let report = match command {
        Commands::Compile { job } => command::compile(job)?,
        Commands::Summarize { job } => command::summarize(job)?,
        Commands::Inspect { store, variable } => {
            println!("{}", command::inspect(store, variable)?);
            return Ok(true);
        }
    };

    for (name, outcome) in &report {
        println!("{name}: {outcome}");
    }
    let failed = report.iter().filter(|(_, o)| o.is_failure()).count();
    if failed > 0 {
        eprintln!("{failed} of {} products failed", report.len());
    }

    Ok(failed == 0)
}
