//! udl - keep local music folders in sync with SoundCloud and Spotify playlists

use clap::Parser;
use colored::Colorize;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod adapters;
mod cli;
mod config;
mod doctor;
mod engine;
mod library;
mod remote;
mod state;
mod utils;

use cli::commands::{self, SyncRequest};
use cli::{exit, Cli, Commands, ExitError};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "udl=debug,reqwest=debug"
    } else {
        "udl=info"
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = cli.config.as_deref();
    let result = match cli.command {
        Commands::Sync {
            sources,
            dry_run,
            scan_gaps,
            no_preflight,
            ask_on_existing,
            no_ask_on_existing,
            timeout,
            json,
            no_input,
        } => {
            let request = SyncRequest {
                sources,
                dry_run,
                scan_gaps,
                no_preflight,
                ask_on_existing: match (ask_on_existing, no_ask_on_existing) {
                    (true, _) => Some(true),
                    (_, true) => Some(false),
                    _ => None,
                },
                timeout_seconds: timeout,
                json,
                no_input,
            };
            commands::sync(config, &cli.binaries, cli.verbose, request).await
        }
        Commands::Validate => commands::validate(config, &cli.binaries),
        Commands::Init { force } => commands::init(config, force),
        Commands::Doctor { json } => commands::doctor(config, &cli.binaries, json).await,
        Commands::Completion { shell } => {
            commands::completion(shell);
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::from(exit::SUCCESS),
        Err(err) => {
            let silent = err.downcast_ref::<ExitError>().is_some_and(ExitError::is_silent);
            if !silent {
                eprintln!("{} {:#}", "error:".red().bold(), err);
            }
            ExitCode::from(exit::code_for(&err))
        }
    }
}
