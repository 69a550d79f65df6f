//! SkauTan engine: library management, filter/template-based playlist
//! generation, tempo detection, and playback, driven from the command
//! line. There is no GUI in this port (out of scope per the original
//! desktop application).

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod filter;
pub mod hash;
pub mod library;
pub mod metadata;
pub mod model;
pub mod player;
pub mod ring_buffer;
pub mod sampler;
pub mod scanner;
pub mod tasks;
pub mod template;
pub mod tempo;
pub mod vote_server;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(EnvFilter::from_default_env().add_directive("skautan=info".parse().unwrap()))
        .init();

    let args = cli::Cli::parse();
    cli::run_command(&args)
}
