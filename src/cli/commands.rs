//! CLI command handlers

use anyhow::{Context, Result};
use clap::CommandFactory;
use clap_complete::generate;
use colored::Colorize;
use console::Term;
use dialoguer::Confirm;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::console::{ConsoleSink, DialoguerPrompter};
use super::exit::{self, ExitError, WithExitCode};
use super::{BinaryArgs, Cli};
use crate::adapters::default_registry;
use crate::config::{expand_path, Config};
use crate::doctor::{Checker, Severity, SystemProbe};
use crate::engine::{
    Echo, EventSink, JsonSink, StdinMode, SubprocessRunner, SyncError, SyncOptions, Syncer,
    TracingSink,
};
use crate::remote::soundcloud::YtDlpListing;
use crate::remote::spotify::{SpotifyCredentials, SpotifyListing};
use crate::utils::shutdown;

/// Flags of the `sync` command
#[derive(Debug, Clone, Default)]
pub struct SyncRequest {
    pub sources: Vec<String>,
    pub dry_run: bool,
    pub scan_gaps: bool,
    pub no_preflight: bool,
    pub ask_on_existing: Option<bool>,
    pub timeout_seconds: Option<u64>,
    pub json: bool,
    pub no_input: bool,
}

fn load_config(path: Option<&Path>) -> Result<Config, ExitError> {
    let config = Config::load(path).exit_code(exit::INVALID_CONFIG)?;
    config.validate().exit_code(exit::INVALID_CONFIG)?;
    Ok(config)
}

fn resolve_config_path(path: Option<&Path>) -> Result<PathBuf> {
    match path {
        Some(path) => expand_path(path),
        None => Config::config_path(),
    }
}

/// Prompts need an interactive stdin and a human-readable stdout
fn prompts_allowed(request: &SyncRequest) -> bool {
    !request.no_input && !request.json && io::stdin().is_terminal()
}

/// Handle the `sync` command
pub async fn sync(
    config_path: Option<&Path>,
    binaries: &BinaryArgs,
    verbose: bool,
    request: SyncRequest,
) -> Result<()> {
    let config = load_config(config_path)?;
    let runtime = binaries.runtime_options();

    let allow_prompt = prompts_allowed(&request);
    let stdin = if request.no_input { StdinMode::Null } else { StdinMode::Inherit };
    let echo = if request.json { Echo::Stderr } else { Echo::Passthrough };

    let events: Arc<dyn EventSink> = if request.json {
        Arc::new(JsonSink::new(io::stdout()))
    } else if Term::stdout().is_term() {
        Arc::new(ConsoleSink::new(verbose))
    } else {
        Arc::new(TracingSink)
    };

    let spotify = SpotifyListing::new(SpotifyCredentials::from_env())?;
    let mut syncer = Syncer::new(
        default_registry(&runtime),
        Arc::new(SubprocessRunner::new(stdin, echo)),
        Arc::new(YtDlpListing::new(runtime.ytdlp_bin.clone())),
        Arc::new(spotify),
        events,
    );
    if allow_prompt {
        syncer = syncer.with_prompter(Arc::new(DialoguerPrompter));
    }

    let options = SyncOptions {
        source_ids: request.sources,
        dry_run: request.dry_run,
        timeout_override: request
            .timeout_seconds
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs),
        scan_gaps: request.scan_gaps,
        no_preflight: request.no_preflight,
        ask_on_existing: request.ask_on_existing,
        allow_prompt,
    };
    debug!("Sync options: {:?}", options);

    let cancel = CancellationToken::new();
    shutdown::install(cancel.clone());

    let summary = match syncer.sync(&config, &options, &cancel).await {
        Ok(summary) => summary,
        Err(e @ SyncError::Selection { .. }) => {
            return Err(ExitError::new(exit::INVALID_USAGE, e.into()).into());
        }
        Err(SyncError::Interrupted { .. }) => return Err(ExitError::silent(exit::INTERRUPTED).into()),
    };

    if summary.dependency_failures > 0 {
        return Err(ExitError::silent(exit::MISSING_DEPENDENCY).into());
    }
    if summary.failed > 0 {
        return Err(ExitError::silent(exit::PARTIAL_SUCCESS).into());
    }
    Ok(())
}

/// Handle the `validate` command
pub fn validate(config_path: Option<&Path>, binaries: &BinaryArgs) -> Result<()> {
    let config = load_config(config_path)?;
    let registry = default_registry(&binaries.runtime_options());

    let mut problems = Vec::new();
    for source in &config.sources {
        match registry.get(source.adapter.kind.trim()) {
            Some(adapter) => {
                if let Err(e) = adapter.validate(source) {
                    problems.push(format!("source {:?}: {}", source.id, e));
                }
            }
            None => problems.push(format!(
                "source {:?}: unsupported adapter kind {:?}",
                source.id, source.adapter.kind
            )),
        }
    }
    if !problems.is_empty() {
        return Err(ExitError::new(
            exit::INVALID_CONFIG,
            anyhow::anyhow!("invalid config:\n  - {}", problems.join("\n  - ")),
        )
        .into());
    }

    println!(
        "{} ({} source(s))",
        "Config is valid".green().bold(),
        config.sources.len()
    );
    Ok(())
}

/// Handle the `init` command
pub fn init(config_path: Option<&Path>, force: bool) -> Result<()> {
    let path = resolve_config_path(config_path)?;

    if path.exists() && !force {
        if !io::stdin().is_terminal() {
            anyhow::bail!("config already exists at {} (rerun with --force)", path.display());
        }
        let overwrite = Confirm::new()
            .with_prompt(format!("Config already exists at {}. Overwrite?", path.display()))
            .default(false)
            .interact()?;
        if !overwrite {
            println!("{}", "Initialization canceled.".yellow());
            return Ok(());
        }
    }

    let config = Config::starter();
    config.save(&path)?;

    let state_dir = expand_path(&config.defaults.state_dir)?;
    std::fs::create_dir_all(&state_dir)
        .with_context(|| format!("Failed to create state directory {:?}", state_dir))?;

    println!("{} {}", "Wrote config:".green().bold(), path.display());
    println!("{} {}", "Ensured state dir:".green().bold(), state_dir.display());
    println!();
    println!("Edit the sources, then run `udl doctor` and `udl sync --dry-run`.");
    Ok(())
}

/// Handle the `doctor` command
pub async fn doctor(config_path: Option<&Path>, binaries: &BinaryArgs, json: bool) -> Result<()> {
    let config = Config::load(config_path).exit_code(exit::INVALID_CONFIG)?;
    if !config.sources.is_empty() {
        config.validate().exit_code(exit::INVALID_CONFIG)?;
    }

    let report = Checker::new(SystemProbe)
        .check(&config, &binaries.runtime_options())
        .await;

    if json {
        println!("{}", serde_json::to_string(&report)?);
    } else {
        let mut checks = report.checks.clone();
        checks.sort_by_key(|c| c.name);
        for check in &checks {
            let severity = match check.severity {
                Severity::Info => check.severity.to_string().green(),
                Severity::Warn => check.severity.to_string().yellow(),
                Severity::Error => check.severity.to_string().red().bold(),
            };
            println!("[{}] {}: {}", severity, check.name, check.message);
        }
    }

    if report.has_errors() {
        return Err(ExitError::new(
            exit::MISSING_DEPENDENCY,
            anyhow::anyhow!("doctor found {} error(s)", report.error_count()),
        )
        .into());
    }
    Ok(())
}

/// Handle the `completion` command
pub fn completion(shell: clap_complete::Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "udl", &mut io::stdout());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binaries() -> BinaryArgs {
        BinaryArgs {
            scdl_bin: "scdl".to_string(),
            scdl_legacy: false,
            spotdl_bin: "spotdl".to_string(),
            deemix_bin: "deemix".to_string(),
            ytdlp_bin: "yt-dlp".to_string(),
        }
    }

    #[test]
    fn test_validate_maps_bad_config_to_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = validate(Some(&path), &binaries()).unwrap_err();
        assert_eq!(exit::code_for(&err), exit::INVALID_CONFIG);

        let err = validate(Some(&dir.path().join("missing.json")), &binaries()).unwrap_err();
        assert_eq!(exit::code_for(&err), exit::INVALID_CONFIG);
    }

    #[test]
    fn test_init_refuses_to_overwrite_without_a_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{}").unwrap();

        if !io::stdin().is_terminal() {
            assert!(init(Some(&path), false).is_err());
            assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
        }
    }

    #[test]
    fn test_prompts_disabled_for_json_and_no_input() {
        let json = SyncRequest {
            json: true,
            ..SyncRequest::default()
        };
        let no_input = SyncRequest {
            no_input: true,
            ..SyncRequest::default()
        };
        assert!(!prompts_allowed(&json));
        assert!(!prompts_allowed(&no_input));
        assert_eq!(
            prompts_allowed(&SyncRequest::default()),
            io::stdin().is_terminal()
        );
    }

    #[tokio::test]
    async fn test_sync_unknown_source_is_usage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = Config::starter();
        config.defaults.state_dir = dir.path().join("state");
        config.save(&path).unwrap();

        let request = SyncRequest {
            sources: vec!["nope".to_string()],
            json: true,
            no_input: true,
            ..SyncRequest::default()
        };
        let err = sync(Some(&path), &binaries(), false, request).await.unwrap_err();
        assert_eq!(exit::code_for(&err), exit::INVALID_USAGE);
    }
}
