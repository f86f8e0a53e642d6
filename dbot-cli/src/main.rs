//! dbot CLI: run a Slack RTM session. Config from env and optional CLI args.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use dbot_cli::{load_config, Cli, Commands};
use dbot_core::{init_tracing, InMemoryRoster, LoggingHandler};
use dbot_slack::{Collaborators, RtmConnection, RtmHandle};
use tracing::{info, warn};

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { token } => {
            let config = load_config(token)?;
            init_tracing(config.log_file.as_deref())?;
            run(config)
        }
    }
}

fn run(config: dbot_slack::SlackConfig) -> Result<()> {
    info!(config = ?config, "Starting dbot");

    let roster = Arc::new(InMemoryRoster::new());
    let collaborators = Collaborators::with_roster(Arc::new(LoggingHandler::new()), roster.clone());
    let connection =
        RtmConnection::build(config, collaborators).context("Slack rtm.start failed")?;
    info!(
        robot = %connection.robot().name,
        users = connection.snapshot().users.len(),
        channels = connection.snapshot().channels.len(),
        "Bootstrapped session"
    );

    connection.run(Some(Box::new(|handle: &RtmHandle| {
        let handle = handle.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Ctrl-C received, shutting down");
                    handle.shut_down();
                }
                Err(e) => warn!(error = %e, "Could not listen for Ctrl-C"),
            }
        });
    })))?;

    match connection.close_event() {
        Some(close) => info!(
            close = %close,
            users = roster.user_count(),
            rooms = roster.room_count(),
            "dbot stopped"
        ),
        None => info!("dbot stopped"),
    }
    Ok(())
}
