//! CLI command definitions and handlers.

pub mod daemon;
pub mod replay;

use clap::{Parser, Subcommand};

/// Blinkgate - blink liveness gate for face verification
#[derive(Parser)]
#[command(name = "blinkgate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    pub session: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Run a recorded landmark stream through the blink detector
    Replay(replay::ReplayArgs),
    /// Start a detection session on the daemon
    Activate,
    /// Stop the daemon's detection session
    Deactivate,
    /// Print daemon and session status
    Status,
}
