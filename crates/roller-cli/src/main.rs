//! Roller CLI
//!
//! Plans, dispatches and applies rolling upgrades of node-local mount agents.

mod args;
mod cli;
mod renderer;
mod sink;

use anyhow::{Context, Result};
use args::{Args, Commands};
use clap::Parser;
use cli::Cli;
use log::{info, warn};
use renderer::TerminalRenderer;
use roller_core::{PauseSwitch, PlanStoreBuilder};
use tokio_util::sync::CancellationToken;
use Commands::*;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let Args {
        database_file,
        namespace,
        no_color,
        command,
    } = Args::parse();

    let cancel = CancellationToken::new();
    let pause = PauseSwitch::new();
    tokio::spawn(watch_signals(cancel.clone(), pause.clone()));

    let store = PlanStoreBuilder::new()
        .with_database_path(database_file)
        .with_namespace(namespace)
        .with_cancellation(cancel.clone())
        .build()
        .await
        .context("Failed to open plan store")?;

    let renderer = TerminalRenderer::new(!no_color);
    let cli = Cli::new(store, renderer, cancel, pause);

    info!("Roller started");

    match command {
        Plan(args) => cli.handle_plan(args).await,
        Rollout(args) => cli.handle_rollout(args).await,
        Show(args) => cli.handle_show(args).await,
        Upgrade(args) => cli.handle_upgrade(args).await,
    }
}

/// SIGINT and SIGTERM stop the run; SIGUSR1 pauses or resumes a rollout
/// between nodes.
#[cfg(unix)]
async fn watch_signals(cancel: CancellationToken, pause: PauseSwitch) {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut terminate, mut user1) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::user_defined1()),
    ) {
        (Ok(terminate), Ok(user1)) => (terminate, user1),
        (Err(e), _) | (_, Err(e)) => {
            warn!("Failed to install signal handlers: {e}");
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
            return;
        }
    };

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if result.is_ok() {
                    warn!("Interrupted, stopping after the current step");
                    cancel.cancel();
                }
                return;
            }
            _ = terminate.recv() => {
                warn!("Terminated, stopping after the current step");
                cancel.cancel();
                return;
            }
            _ = user1.recv() => {
                if pause.toggle() {
                    warn!("Paused, send SIGUSR1 again to resume");
                } else {
                    warn!("Resumed");
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn watch_signals(cancel: CancellationToken, _pause: PauseSwitch) {
    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("Interrupted, stopping after the current step");
        cancel.cancel();
    }
}
