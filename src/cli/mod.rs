//! CLI module for udl

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::RuntimeOptions;

pub mod commands;
pub mod console;
pub mod exit;

pub use exit::ExitError;

#[derive(Parser, Debug)]
#[command(name = "udl", about = "Keep local music folders in sync with SoundCloud and Spotify playlists")]
#[command(version, author)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file (defaults to the user config directory)
    #[arg(short, long, global = true, env = "UDL_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub binaries: BinaryArgs,
}

/// Downloader executables, overridable per machine
#[derive(Args, Debug, Clone)]
pub struct BinaryArgs {
    /// scdl executable
    #[arg(long, global = true, env = "UDL_SCDL_BIN", default_value = "scdl")]
    pub scdl_bin: String,

    /// scdl predates 3.0 and cannot take --yt-dlp-args
    #[arg(long, global = true, env = "UDL_SCDL_LEGACY")]
    pub scdl_legacy: bool,

    /// spotDL executable
    #[arg(long, global = true, env = "UDL_SPOTDL_BIN", default_value = "spotdl")]
    pub spotdl_bin: String,

    /// deemix executable
    #[arg(long, global = true, env = "UDL_DEEMIX_BIN", default_value = "deemix")]
    pub deemix_bin: String,

    /// yt-dlp executable used for SoundCloud listings
    #[arg(long, global = true, env = "UDL_YTDLP_BIN", default_value = "yt-dlp")]
    pub ytdlp_bin: String,
}

impl BinaryArgs {
    pub fn runtime_options(&self) -> RuntimeOptions {
        RuntimeOptions {
            scdl_bin: self.scdl_bin.clone(),
            scdl_supports_ytdlp_args: !self.scdl_legacy,
            spotdl_bin: self.spotdl_bin.clone(),
            deemix_bin: self.deemix_bin.clone(),
            ytdlp_bin: self.ytdlp_bin.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download whatever is missing from the configured sources
    Sync {
        /// Only sync these source ids (repeatable)
        #[arg(short, long = "source", value_name = "ID")]
        sources: Vec<String>,

        /// Plan and print commands without running downloaders or touching state
        #[arg(long)]
        dry_run: bool,

        /// Walk the whole remote list instead of stopping at the first known track
        #[arg(long)]
        scan_gaps: bool,

        /// Skip remote listing and local reconciliation
        #[arg(long)]
        no_preflight: bool,

        /// Ask before stopping at the first known track
        #[arg(long, conflicts_with = "no_ask_on_existing")]
        ask_on_existing: bool,

        /// Never ask before stopping at the first known track
        #[arg(long)]
        no_ask_on_existing: bool,

        /// Per-command timeout in seconds (overrides the config)
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Emit newline-delimited JSON events on stdout
        #[arg(long)]
        json: bool,

        /// Never prompt
        #[arg(long)]
        no_input: bool,
    },

    /// Check the config file and every source's adapter settings
    Validate,

    /// Write a starter config
    Init {
        /// Overwrite an existing config without asking
        #[arg(long)]
        force: bool,
    },

    /// Check downloaders, credentials and the state directory
    Doctor {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions
    Completion {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_sync_flags_parse() {
        let cli = Cli::try_parse_from([
            "udl", "sync", "-s", "a", "--source", "b", "--dry-run", "--timeout", "30", "--scdl-legacy",
        ])
        .unwrap();
        let Commands::Sync {
            sources,
            dry_run,
            timeout,
            ..
        } = cli.command
        else {
            panic!("expected sync");
        };
        assert_eq!(sources, vec!["a", "b"]);
        assert!(dry_run);
        assert_eq!(timeout, Some(30));
        assert!(!cli.binaries.runtime_options().scdl_supports_ytdlp_args);
    }

    #[test]
    fn test_ask_flags_conflict() {
        let result = Cli::try_parse_from(["udl", "sync", "--ask-on-existing", "--no-ask-on-existing"]);
        assert!(result.is_err());
    }
}
