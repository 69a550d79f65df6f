//! `vote-server` and `backup` subcommands: the embedded HTTP vote server
//! (C18) run standalone, and the daily backup check (§4.15) run on demand.

use crate::db;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

pub async fn vote_server() -> anyhow::Result<()> {
    let config = crate::config::load();
    let store = super::open_store(&config).await?;

    // No Player is running standalone, so the history recorder never sees a
    // `StartedPlayback` signal; the sender is dropped immediately, which
    // closes the channel and lets `vote_server`'s recorder thread exit
    // cleanly instead of blocking forever.
    let (_signal_tx, signal_rx) = crossbeam_channel::unbounded();

    let router = crate::vote_server::router(
        Arc::new(AsyncMutex::new(store)),
        signal_rx,
        tokio::runtime::Handle::current(),
    );

    let addr = format!("0.0.0.0:{}", config.vote_server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "vote server listening");
    println!("vote server listening on {addr}");
    axum::serve(listener, router).await?;
    Ok(())
}

pub fn backup() -> anyhow::Result<()> {
    let config = crate::config::load();
    if !config.library.db_path.exists() {
        println!("no database at {} yet, nothing to back up", config.library.db_path.display());
        return Ok(());
    }
    std::fs::create_dir_all(&config.library.backup_dir)?;
    let wrote = db::daily_backup_if_needed(&config.library.db_path, &config.library.backup_dir)?;
    if wrote {
        println!("backed up {} to {}", config.library.db_path.display(), config.library.backup_dir.display());
    } else {
        println!("today's backup already exists");
    }
    Ok(())
}
