//! Blinkgate CLI - replay recorded landmark streams and control the daemon.

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

use commands::{Cli, Commands};

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let result = match cli.command {
        Commands::Replay(ref args) => commands::replay::run(args),
        Commands::Activate => commands::daemon::activate(cli.session),
        Commands::Deactivate => commands::daemon::deactivate(cli.session),
        Commands::Status => commands::daemon::status(cli.session),
    };

    match result {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::ExitCode::FAILURE
        }
    }
}
