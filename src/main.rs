// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Switchboard daemon entry point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use switchboard::agent::DisabledAgent;
use switchboard::config::Settings;
use switchboard::connector::ConnectorManager;
use switchboard::task::TaskStore;
use switchboard::worktree::GitWorktrees;

/// Switchboard - session orchestration core for an AI coding-assistant
/// desktop shell.
#[derive(Parser)]
#[command(name = "switchboard")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Endpoint to listen on (Unix socket path / pipe name)
    #[arg(short, long, env = "SWITCHBOARD_SOCKET")]
    socket: Option<PathBuf>,

    /// Project directory settings are loaded from
    #[arg(short, long, env = "SWITCHBOARD_BASE_DIR", default_value = ".")]
    base_dir: PathBuf,

    /// Show debug output
    #[arg(long)]
    debug: bool,

    /// Show trace output (full envelopes)
    #[arg(long)]
    trace: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the connector-manager daemon (default)
    Serve,
    /// List persisted tasks for the project
    Tasks,
}

fn init_tracing(cli: &Cli) {
    let default_level = if cli.trace {
        "switchboard=trace"
    } else if cli.debug {
        "switchboard=debug"
    } else {
        "switchboard=info"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let base_dir = cli
        .base_dir
        .canonicalize()
        .with_context(|| format!("resolving base dir {}", cli.base_dir.display()))?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(cli.socket, base_dir).await,
        Command::Tasks => list_tasks(base_dir),
    }
}

async fn serve(socket: Option<PathBuf>, base_dir: PathBuf) -> anyhow::Result<()> {
    let settings = Settings::load(&base_dir)
        .with_context(|| format!("loading settings from {}", base_dir.display()))?;
    let socket_path = socket.unwrap_or_else(|| settings.resolved_socket_path());

    let worktrees = GitWorktrees::new().with_prefix(settings.worktree_prefix.clone());
    let mut manager = ConnectorManager::new(
        &socket_path,
        Arc::new(DisabledAgent),
        Arc::new(worktrees),
        settings,
    );
    manager
        .start()
        .await
        .with_context(|| format!("binding {}", socket_path.display()))?;

    let manager = Arc::new(manager);
    let accept_loop = tokio::spawn(manager.clone().run());

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutting down");
    accept_loop.abort();
    switchboard::connector::transport::cleanup(&socket_path);
    Ok(())
}

fn list_tasks(base_dir: PathBuf) -> anyhow::Result<()> {
    let store = TaskStore::new(&base_dir);
    let tasks = store.list().context("listing tasks")?;
    if tasks.is_empty() {
        println!("No persisted tasks in {}", base_dir.display());
        return Ok(());
    }

    for task in tasks {
        let mode = match task.working_dir_mode {
            switchboard::WorkingDirMode::Local => "local",
            switchboard::WorkingDirMode::Worktree => "worktree",
        };
        println!(
            "{}  {:<24}  {}  ${:.4}",
            task.id, task.name, mode, task.total_cost()
        );
    }
    Ok(())
}
