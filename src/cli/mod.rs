//! Command-line interface for the engine.
//!
//! There is no GUI in this port (out of scope); every subcommand here is a
//! thin wrapper over a library/db/player/vote_server operation, so the
//! engine can be driven, scripted, and tested from a terminal.

mod commands;

pub use commands::{Cli, Commands, run_command};
