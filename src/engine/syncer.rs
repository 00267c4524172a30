//! Sync orchestration
//!
//! Sources run strictly one after another. Each goes through validation, path
//! checks, preflight (for source types that support it), command build, run,
//! and finally commit or discard of any swapped state. Nothing here formats
//! output for people; progress leaves through the [`EventSink`].

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::{self, scdl, spotdl, Adapter, AdapterRegistry};
use crate::config::{self, Config, Defaults, Source, SourceType};
use crate::library::{cache, LocalMediaIndex};
use crate::remote::{RemoteListing, RemoteTrack};
use crate::state::{self, swap, ArchiveIds, SoundCloudSyncState, SpotifySyncState, StateSwap};

use super::artifacts::{suffixes_for_adapter, ArtifactSnapshot};
use super::classify::{DefaultClassifier, OutputClassifier};
use super::events::{Event, EventName, EventSink, Level};
use super::preflight::{needs_local_index, reconcile, Plan, Preflight, PreflightMode, SoundCloudRecords, TrackRecords};
use super::runner::{ExecResult, ExecRunner, ExecSpec, EXIT_NOT_FOUND};

const ARCHIVE_TAG: &str = "soundcloud";

/// Per-invocation switches
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Restrict the run to these source ids (empty means all)
    pub source_ids: Vec<String>,
    pub dry_run: bool,
    pub timeout_override: Option<Duration>,
    /// Plan every gap instead of stopping at the first existing track
    pub scan_gaps: bool,
    pub no_preflight: bool,
    /// Overrides each source's `ask_on_existing` when set
    pub ask_on_existing: Option<bool>,
    /// Whether interactive prompts may be shown
    pub allow_prompt: bool,
}

/// Run-level counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub total: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub dependency_failures: usize,
    pub interrupted: bool,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("unknown source id(s): {}", missing.join(", "))]
    Selection { missing: Vec<String> },
    #[error("sync interrupted")]
    Interrupted { summary: SyncSummary },
}

/// Asked whether a break-mode run should rescan the whole listing instead
pub trait Prompter: Send + Sync {
    fn scan_gaps_instead(&self, source_id: &str, preflight: &Preflight) -> Result<bool>;
}

/// Why one source did not finish
#[derive(Debug, Error)]
enum SourceFailure {
    #[error("{0}")]
    Dependency(String),
    #[error("{0}")]
    Validation(String),
    #[error("preflight failed: {0:#}")]
    Reconcile(anyhow::Error),
    #[error("{message}")]
    Execution {
        message: String,
        details: Map<String, Value>,
    },
    #[error("interrupted")]
    Interrupted { details: Map<String, Value> },
    #[error("failed to finalize sync state: {0:#}")]
    Commit(anyhow::Error),
}

impl SourceFailure {
    fn kind(&self) -> &'static str {
        match self {
            SourceFailure::Dependency(_) => "dependency",
            SourceFailure::Validation(_) => "validation",
            SourceFailure::Reconcile(_) => "reconcile",
            SourceFailure::Execution { .. } => "execution",
            SourceFailure::Interrupted { .. } => "interrupted",
            SourceFailure::Commit(_) => "commit",
        }
    }

    fn details(&self) -> Option<&Map<String, Value>> {
        match self {
            SourceFailure::Execution { details, .. } | SourceFailure::Interrupted { details } => Some(details),
            _ => None,
        }
    }

    fn interrupted(result: &ExecResult) -> Self {
        SourceFailure::Interrupted {
            details: result_details(result),
        }
    }

    fn cancelled() -> Self {
        SourceFailure::Interrupted { details: Map::new() }
    }
}

/// Everything one source's run needs besides the source itself
struct SourceRun<'a> {
    adapter: &'a dyn Adapter,
    defaults: &'a Defaults,
    opts: &'a SyncOptions,
    timeout: Option<Duration>,
    cancel: &'a CancellationToken,
}

pub struct Syncer {
    registry: AdapterRegistry,
    runner: Arc<dyn ExecRunner>,
    soundcloud: Arc<dyn RemoteListing>,
    spotify: Arc<dyn RemoteListing>,
    events: Arc<dyn EventSink>,
    classifier: Arc<dyn OutputClassifier>,
    prompter: Option<Arc<dyn Prompter>>,
}

impl Syncer {
    pub fn new(
        registry: AdapterRegistry,
        runner: Arc<dyn ExecRunner>,
        soundcloud: Arc<dyn RemoteListing>,
        spotify: Arc<dyn RemoteListing>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            registry,
            runner,
            soundcloud,
            spotify,
            events,
            classifier: Arc::new(DefaultClassifier),
            prompter: None,
        }
    }

    pub fn with_prompter(mut self, prompter: Arc<dyn Prompter>) -> Self {
        self.prompter = Some(prompter);
        self
    }

    /// Sync the selected sources in config order
    ///
    /// Per-source failures are counted, not returned. The only errors are an
    /// unknown source id and an interrupt, which stops the batch at once.
    pub async fn sync(
        &self,
        config: &Config,
        opts: &SyncOptions,
        cancel: &CancellationToken,
    ) -> Result<SyncSummary, SyncError> {
        let selected = select_sources(&config.sources, &opts.source_ids)?;
        let mut summary = SyncSummary {
            total: selected.iter().filter(|s| s.enabled).count(),
            ..Default::default()
        };

        self.emit(
            Event::new(
                Level::Info,
                EventName::SyncStarted,
                format!("sync started ({} source(s))", summary.total),
            )
            .detail("total", summary.total)
            .detail("dry_run", opts.dry_run),
        );

        for source in selected {
            if !source.enabled {
                debug!("Skipping disabled source {}", source.id);
                summary.skipped += 1;
                continue;
            }
            if cancel.is_cancelled() {
                summary.interrupted = true;
                break;
            }

            summary.attempted += 1;
            match self.sync_source(source, &config.defaults, opts, cancel).await {
                Ok(()) => summary.succeeded += 1,
                Err(failure) => {
                    summary.failed += 1;
                    if matches!(failure, SourceFailure::Dependency(_)) {
                        summary.dependency_failures += 1;
                    }

                    let mut event = Event::new(
                        Level::Error,
                        EventName::SourceFailed,
                        format!("[{}] {}", source.id, failure),
                    )
                    .source(&source.id)
                    .detail("kind", failure.kind());
                    if let Some(details) = failure.details() {
                        for (key, value) in details {
                            event = event.detail(key, value.clone());
                        }
                    }
                    self.emit(event);

                    if matches!(failure, SourceFailure::Interrupted { .. }) {
                        summary.interrupted = true;
                        break;
                    }
                    if !config.defaults.continue_on_error {
                        warn!("Stopping after failure of {} (continue_on_error is off)", source.id);
                        break;
                    }
                }
            }
        }

        if summary.interrupted {
            self.emit(summary_event(Level::Error, "sync interrupted".to_string(), &summary));
            return Err(SyncError::Interrupted { summary });
        }

        self.emit(summary_event(
            Level::Info,
            format!(
                "sync finished: attempted={} succeeded={} failed={} skipped={}",
                summary.attempted, summary.succeeded, summary.failed, summary.skipped
            ),
            &summary,
        ));
        Ok(summary)
    }

    async fn sync_source(
        &self,
        source: &Source,
        defaults: &Defaults,
        opts: &SyncOptions,
        cancel: &CancellationToken,
    ) -> Result<(), SourceFailure> {
        let adapter = self
            .registry
            .get(&source.adapter.kind)
            .map(|a| &**a)
            .ok_or_else(|| {
                SourceFailure::Validation(format!("adapter {:?} not registered", source.adapter.kind))
            })?;

        adapter
            .validate(source)
            .map_err(|e| SourceFailure::Validation(format!("source validation failed: {}", e)))?;

        let missing = missing_env_vars(&adapter.required_env(source));
        if !missing.is_empty() {
            return Err(SourceFailure::Dependency(format!(
                "missing required env var(s): {}",
                missing.join(", ")
            )));
        }

        ensure_source_paths(source, defaults).map_err(|e| SourceFailure::Validation(format!("{:#}", e)))?;

        let run = SourceRun {
            adapter,
            defaults,
            opts,
            timeout: opts.timeout_override.or_else(|| {
                (defaults.command_timeout_seconds > 0)
                    .then(|| Duration::from_secs(defaults.command_timeout_seconds))
            }),
            cancel,
        };

        match source.source_type {
            SourceType::Soundcloud => self.sync_soundcloud(source, &run).await,
            SourceType::Spotify if adapter.kind() == "deemix" => self.sync_per_track(source, &run).await,
            SourceType::Spotify => self.execute(source.clone(), None, StateSwap::empty(), &run).await,
        }
    }

    /// scdl flow: preflight against the sync state and archive, swap out
    /// known gaps, run once over the whole listing
    async fn sync_soundcloud(&self, source: &Source, run: &SourceRun<'_>) -> Result<(), SourceFailure> {
        let sync_path = adapters::state_file(source, run.defaults)
            .map_err(|e| SourceFailure::Validation(e.to_string()))?;
        let mode = determine_mode(source, run.opts);
        let ask = resolve_ask_on_existing(source, run.opts);

        let mut exec_source = source.clone();
        exec_source.state_file = Some(sync_path.clone());
        exec_source.sync.break_on_existing = Some(mode == PreflightMode::Break);

        if run.opts.no_preflight {
            self.warn_preflight_disabled(source, mode, ask);
            return self.execute(exec_source, None, StateSwap::empty(), run).await;
        }

        swap::recover(&sync_path).map_err(SourceFailure::Reconcile)?;

        let tracks = self.list(&*self.soundcloud, source, run.cancel).await?;
        let target_dir = adapters::target_dir(source).map_err(|e| SourceFailure::Validation(e.to_string()))?;
        let sync_state = SoundCloudSyncState::load(&sync_path)
            .context("parse sync state file")
            .map_err(SourceFailure::Reconcile)?;
        let archive_path = scdl::resolve_archive_path(source, run.defaults)
            .map_err(|e| SourceFailure::Validation(e.to_string()))?;
        let archive = ArchiveIds::load(&archive_path, ARCHIVE_TAG)
            .context("parse archive file")
            .map_err(SourceFailure::Reconcile)?;

        let records = SoundCloudRecords {
            state: &sync_state,
            archive: &archive,
        };
        let plan = self.plan(source, &tracks, &records, &target_dir, mode, ask, run)?;
        self.emit_preflight(&source.id, &plan.preflight);
        exec_source.sync.break_on_existing = Some(plan.preflight.mode == PreflightMode::Break);

        let state_swap = if run.opts.dry_run {
            StateSwap::empty()
        } else {
            StateSwap::prepare(&sync_path, &sync_state, &archive_path, ARCHIVE_TAG, &plan.planned_known_gaps())
                .map_err(SourceFailure::Reconcile)?
        };
        if let Some(temp) = state_swap.temp_sync_path() {
            exec_source.state_file = Some(temp.to_path_buf());
        }
        if let Some(temp) = state_swap.temp_archive_path() {
            exec_source.download_archive_path = Some(temp.to_path_buf());
        }

        self.execute(exec_source, Some(plan.preflight), state_swap, run).await
    }

    /// deemix flow: preflight against the Spotify state, then one run per
    /// planned track, recording each success as it lands
    async fn sync_per_track(&self, source: &Source, run: &SourceRun<'_>) -> Result<(), SourceFailure> {
        let mode = determine_mode(source, run.opts);
        let ask = resolve_ask_on_existing(source, run.opts);

        if run.opts.no_preflight {
            self.warn_preflight_disabled(source, mode, ask);
            return self.execute(source.clone(), None, StateSwap::empty(), run).await;
        }

        let state_path = adapters::state_file(source, run.defaults)
            .map_err(|e| SourceFailure::Validation(e.to_string()))?;
        let tracks = self.list(&*self.spotify, source, run.cancel).await?;
        let target_dir = adapters::target_dir(source).map_err(|e| SourceFailure::Validation(e.to_string()))?;
        let spotify_state = SpotifySyncState::load(&state_path)
            .context("parse spotify state file")
            .map_err(SourceFailure::Reconcile)?;

        let plan = self.plan(source, &tracks, &spotify_state, &target_dir, mode, ask, run)?;
        self.emit_preflight(&source.id, &plan.preflight);

        let planned: HashSet<&str> = plan.planned.iter().map(String::as_str).collect();
        let mut seen = HashSet::new();
        let queue: Vec<&RemoteTrack> = tracks
            .iter()
            .filter(|t| planned.contains(t.id.as_str()) && seen.insert(t.id.as_str()))
            .collect();

        if queue.is_empty() {
            self.emit_up_to_date(&source.id, &plan.preflight);
            return Ok(());
        }

        let suffixes = suffixes_for_adapter(run.adapter.kind());
        let total = queue.len();
        let mut failures = Vec::new();
        let started = std::time::Instant::now();

        for (n, track) in queue.into_iter().enumerate() {
            if run.cancel.is_cancelled() {
                return Err(SourceFailure::cancelled());
            }

            let mut track_source = source.clone();
            track_source.url = if track.url.is_empty() {
                crate::remote::spotify::track_url(&track.id)
            } else {
                track.url.clone()
            };
            let spec = run
                .adapter
                .build_command(&track_source, run.defaults, run.timeout)
                .map_err(|e| SourceFailure::Validation(format!("cannot build command: {}", e)))?;

            let label = track.local_title();
            self.emit(
                Event::new(
                    Level::Info,
                    EventName::SourceStarted,
                    format!("[{}] deemix track {}/{} {} ({})", source.id, n + 1, total, track.id, label),
                )
                .source(&source.id)
                .detail("command", spec.display_command())
                .detail("track_id", track.id.as_str())
                .detail("dry_run", run.opts.dry_run),
            );
            if run.opts.dry_run {
                continue;
            }

            let snapshot = self.snapshot(&source.id, spec.dir.as_deref(), &suffixes);
            let result = self.runner.run(&spec, run.cancel).await;
            if result.interrupted {
                self.cleanup_artifacts(&source.id, spec.dir.as_deref(), snapshot.as_ref(), &suffixes);
                return Err(SourceFailure::interrupted(&result));
            }
            if let Some(failure) = missing_binary(&spec, &result) {
                return Err(failure);
            }

            if result.success() {
                state::spotify::append_entry(&state_path, &track.id, Some(&label), None)
                    .map_err(SourceFailure::Commit)?;
                continue;
            }

            self.cleanup_artifacts(&source.id, spec.dir.as_deref(), snapshot.as_ref(), &suffixes);
            self.emit(
                Event::new(
                    Level::Warn,
                    EventName::SourceFailed,
                    format!("[{}] track {} failed with exit code {}", source.id, track.id, result.exit_code),
                )
                .source(&source.id)
                .detail("track_id", track.id.as_str())
                .detail("exit_code", result.exit_code)
                .detail("timed_out", result.timed_out),
            );
            failures.push(track.id.clone());
        }

        if !failures.is_empty() {
            let mut details = Map::new();
            details.insert("failed_tracks".to_string(), Value::from(failures.clone()));
            details.insert("planned_download_count".to_string(), Value::from(total));
            return Err(SourceFailure::Execution {
                message: format!("{} of {} track(s) failed", failures.len(), total),
                details,
            });
        }

        let message = if run.opts.dry_run {
            format!("[{}] dry-run complete", source.id)
        } else {
            format!("[{}] completed", source.id)
        };
        self.emit(
            Event::new(Level::Info, EventName::SourceFinished, message)
                .source(&source.id)
                .detail("planned_download_count", total)
                .detail("duration_ms", started.elapsed().as_millis() as u64),
        );
        Ok(())
    }

    /// Build, run, and settle one command for a whole source
    async fn execute(
        &self,
        mut exec_source: Source,
        preflight: Option<Preflight>,
        state_swap: StateSwap,
        run: &SourceRun<'_>,
    ) -> Result<(), SourceFailure> {
        let id = exec_source.id.clone();
        let mut spec = match run.adapter.build_command(&exec_source, run.defaults, run.timeout) {
            Ok(spec) => spec,
            Err(e) => {
                self.discard(&id, state_swap);
                return Err(SourceFailure::Validation(format!("cannot build command: {}", e)));
            }
        };

        if let Some(preflight) = preflight.filter(|p| !run.opts.dry_run && p.planned_download_count == 0) {
            self.discard(&id, state_swap);
            self.emit_up_to_date(&id, &preflight);
            return Ok(());
        }

        self.emit_started(&id, &spec, false);
        if run.opts.dry_run {
            self.discard(&id, state_swap);
            self.emit(
                Event::new(Level::Info, EventName::SourceFinished, format!("[{}] dry-run complete", id))
                    .source(&id)
                    .detail("command", spec.display_command())
                    .detail("dry_run", true),
            );
            return Ok(());
        }

        let suffixes = suffixes_for_adapter(run.adapter.kind());
        let snapshot = self.snapshot(&id, spec.dir.as_deref(), &suffixes);

        let mut result = self.runner.run(&spec, run.cancel).await;
        if result.interrupted {
            self.cleanup_artifacts(&id, spec.dir.as_deref(), snapshot.as_ref(), &suffixes);
            self.discard(&id, state_swap);
            return Err(SourceFailure::interrupted(&result));
        }

        if run.adapter.kind() == "spotdl" && self.needs_user_auth(&result) {
            if run.opts.allow_prompt && !spotdl::has_user_auth(&exec_source.adapter.extra_args) {
                let retry_source = spotdl::with_user_auth(&exec_source);
                match run.adapter.build_command(&retry_source, run.defaults, run.timeout) {
                    Ok(retry_spec) => {
                        info!("Retrying {} with {}", id, spotdl::USER_AUTH_ARG);
                        self.emit_started(&id, &retry_spec, true);
                        result = self.runner.run(&retry_spec, run.cancel).await;
                        spec = retry_spec;
                        exec_source = retry_source;
                        if result.interrupted {
                            self.cleanup_artifacts(&id, spec.dir.as_deref(), snapshot.as_ref(), &suffixes);
                            self.discard(&id, state_swap);
                            return Err(SourceFailure::interrupted(&result));
                        }
                    }
                    Err(e) => self.emit_warning(&id, format!("spotify auth retry setup failed: {}", e)),
                }
            }
            if self.needs_user_auth(&result) {
                let guidance = if run.opts.allow_prompt {
                    "spotify API requires user authentication and retry did not succeed; complete spotdl OAuth once and rerun sync"
                } else {
                    "spotify API requires user authentication; rerun in an interactive terminal once with --user-auth"
                };
                self.emit_warning(&id, guidance.to_string());
            }
        }

        if let Some(failure) = missing_binary(&spec, &result) {
            self.discard(&id, state_swap);
            return Err(failure);
        }

        if !result.success() {
            if is_graceful_stop(&exec_source, preflight.as_ref(), &result, &*self.classifier) {
                state_swap.commit().map_err(SourceFailure::Commit)?;
                self.emit(
                    Event::new(
                        Level::Info,
                        EventName::SourceFinished,
                        format!("[{}] stopped at first existing track (break_on_existing)", id),
                    )
                    .source(&id)
                    .detail("exit_code", result.exit_code)
                    .detail("duration_ms", result.duration.as_millis() as u64)
                    .detail("stopped_on_existing", true),
                );
                return Ok(());
            }

            self.cleanup_artifacts(&id, spec.dir.as_deref(), snapshot.as_ref(), &suffixes);
            self.discard(&id, state_swap);
            let mut details = result_details(&result);
            details.insert("command".to_string(), Value::from(spec.display_command()));
            details.insert("timed_out".to_string(), Value::from(result.timed_out));
            let message = if result.timed_out {
                format!("command timed out after {}s", result.duration.as_secs())
            } else {
                format!("command failed with exit code {}", result.exit_code)
            };
            return Err(SourceFailure::Execution { message, details });
        }

        state_swap.commit().map_err(SourceFailure::Commit)?;
        self.emit(
            Event::new(Level::Info, EventName::SourceFinished, format!("[{}] completed", id))
                .source(&id)
                .detail("duration_ms", result.duration.as_millis() as u64),
        );
        Ok(())
    }

    /// Reconcile, consulting the prompter once when break mode found an
    /// existing track
    #[allow(clippy::too_many_arguments)]
    fn plan(
        &self,
        source: &Source,
        tracks: &[RemoteTrack],
        records: &dyn TrackRecords,
        target_dir: &Path,
        mode: PreflightMode,
        ask: bool,
        run: &SourceRun<'_>,
    ) -> Result<Plan, SourceFailure> {
        let index = if needs_local_index(tracks, records, target_dir) {
            self.local_index(&source.id, target_dir, run.defaults)
        } else {
            LocalMediaIndex::new()
        };

        let plan = reconcile(tracks, records, index.clone(), target_dir, mode);
        if !(ask && run.opts.allow_prompt && mode == PreflightMode::Break && plan.preflight.first_existing_index > 0) {
            return Ok(plan);
        }
        let Some(prompter) = &self.prompter else {
            return Ok(plan);
        };

        let rescan = prompter
            .scan_gaps_instead(&source.id, &plan.preflight)
            .map_err(SourceFailure::Reconcile)?;
        if rescan {
            debug!("Switching {} to scan-gaps mode on request", source.id);
            return Ok(reconcile(tracks, records, index, target_dir, PreflightMode::ScanGaps));
        }
        Ok(plan)
    }

    /// Local index from cache when enabled and fresh, otherwise a scan
    fn local_index(&self, source_id: &str, target_dir: &Path, defaults: &Defaults) -> LocalMediaIndex {
        if !defaults.local_index_cache {
            return LocalMediaIndex::scan(target_dir);
        }

        let state_dir = config::expand_path(&defaults.state_dir).unwrap_or_else(|_| defaults.state_dir.clone());
        let signature = match cache::signature(target_dir) {
            Ok(signature) => signature,
            Err(e) => {
                debug!("No index cache signature for {}: {:#}", target_dir.display(), e);
                return LocalMediaIndex::scan(target_dir);
            }
        };

        if let Some(index) = cache::load(&state_dir, source_id, target_dir, &signature) {
            debug!("Using cached local index for {} ({} files)", source_id, index.total());
            return index;
        }

        let index = LocalMediaIndex::scan(target_dir);
        if let Err(e) = cache::store(&state_dir, source_id, target_dir, &signature, &index) {
            warn!("Failed to store local index cache for {}: {:#}", source_id, e);
        }
        index
    }

    async fn list(
        &self,
        listing: &dyn RemoteListing,
        source: &Source,
        cancel: &CancellationToken,
    ) -> Result<Vec<RemoteTrack>, SourceFailure> {
        match listing.list(source, cancel).await {
            Ok(tracks) => Ok(tracks),
            Err(_) if cancel.is_cancelled() => Err(SourceFailure::cancelled()),
            Err(e) => Err(SourceFailure::Reconcile(e.context("enumerate remote listing"))),
        }
    }

    fn needs_user_auth(&self, result: &ExecResult) -> bool {
        !result.success()
            && !result.interrupted
            && !result.timed_out
            && self.classifier.is_user_auth_required(&result.combined_output())
    }

    fn snapshot(&self, source_id: &str, dir: Option<&Path>, suffixes: &[&str]) -> Option<ArtifactSnapshot> {
        let dir = dir?;
        match ArtifactSnapshot::capture(dir, suffixes) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                self.emit_warning(source_id, format!("unable to snapshot artifacts before run: {:#}", e));
                None
            }
        }
    }

    /// Best effort: problems become warnings
    fn cleanup_artifacts(
        &self,
        source_id: &str,
        dir: Option<&Path>,
        snapshot: Option<&ArtifactSnapshot>,
        suffixes: &[&str],
    ) {
        let (Some(dir), Some(snapshot)) = (dir, snapshot) else {
            return;
        };
        match snapshot.remove_new(dir, suffixes) {
            Ok(removed) if removed.is_empty() => {}
            Ok(removed) => {
                let paths: Vec<String> = removed.iter().map(|p| p.display().to_string()).collect();
                self.emit(
                    Event::new(
                        Level::Warn,
                        EventName::SourceFailed,
                        format!("[{}] cleaned {} partial artifact(s)", source_id, removed.len()),
                    )
                    .source(source_id)
                    .detail("paths", paths),
                );
            }
            Err(e) => self.emit_warning(source_id, format!("artifact cleanup failed: {:#}", e)),
        }
    }

    /// Best effort: problems become warnings
    fn discard(&self, source_id: &str, state_swap: StateSwap) {
        if let Err(e) = state_swap.discard() {
            self.emit_warning(source_id, format!("unable to clean temporary state file: {:#}", e));
        }
    }

    fn warn_preflight_disabled(&self, source: &Source, mode: PreflightMode, ask: bool) {
        if ask {
            self.emit(
                Event::new(
                    Level::Warn,
                    EventName::SourcePreflight,
                    format!("[{}] ask-on-existing ignored because preflight is disabled", source.id),
                )
                .source(&source.id),
            );
        }
        if mode == PreflightMode::ScanGaps {
            self.emit(
                Event::new(
                    Level::Warn,
                    EventName::SourcePreflight,
                    format!("[{}] scan-gaps without preflight disables remote diff planning", source.id),
                )
                .source(&source.id),
            );
        }
    }

    fn emit_preflight(&self, source_id: &str, p: &Preflight) {
        self.emit(
            Event::new(
                Level::Info,
                EventName::SourcePreflight,
                format!(
                    "[{}] preflight: remote={} known={} gaps={} known_gaps={} first_existing={} planned={} mode={}",
                    source_id,
                    p.remote_total,
                    p.known_count,
                    p.archive_gap_count,
                    p.known_gap_count,
                    p.first_existing_index,
                    p.planned_download_count,
                    p.mode
                ),
            )
            .source(source_id)
            .detail("remote_total", p.remote_total)
            .detail("known_count", p.known_count)
            .detail("archive_gap_count", p.archive_gap_count)
            .detail("known_gap_count", p.known_gap_count)
            .detail("first_existing_index", p.first_existing_index)
            .detail("planned_download_count", p.planned_download_count)
            .detail("mode", p.mode.to_string()),
        );
    }

    fn emit_up_to_date(&self, source_id: &str, p: &Preflight) {
        let message = if p.known_gap_count > 0 || p.archive_gap_count > 0 {
            format!(
                "[{}] no new downloads planned in {} mode (known_gaps={} archive_gaps={})",
                source_id, p.mode, p.known_gap_count, p.archive_gap_count
            )
        } else {
            format!("[{}] up-to-date (no downloads planned)", source_id)
        };
        self.emit(
            Event::new(Level::Info, EventName::SourceFinished, message)
                .source(source_id)
                .detail("planned_download_count", 0)
                .detail("mode", p.mode.to_string())
                .detail("known_gap_count", p.known_gap_count)
                .detail("archive_gap_count", p.archive_gap_count),
        );
    }

    fn emit_started(&self, source_id: &str, spec: &ExecSpec, retry: bool) {
        let command = spec.display_command();
        let message = if retry {
            format!("[{}] spotify API requires user auth, retrying with --user-auth", source_id)
        } else {
            format!("[{}] running {}", source_id, command)
        };
        let mut event = Event::new(Level::Info, EventName::SourceStarted, message)
            .source(source_id)
            .detail("command", command)
            .detail("dir", spec.dir.as_ref().map(|d| d.display().to_string()));
        if retry {
            event = event.detail("retry", true);
        }
        self.emit(event);
    }

    fn emit_warning(&self, source_id: &str, message: String) {
        self.emit(
            Event::new(Level::Warn, EventName::SourceFailed, format!("[{}] {}", source_id, message)).source(source_id),
        );
    }

    fn emit(&self, event: Event) {
        self.events.emit(&event);
    }
}

fn select_sources<'a>(sources: &'a [Source], requested: &[String]) -> Result<Vec<&'a Source>, SyncError> {
    if requested.is_empty() {
        return Ok(sources.iter().collect());
    }

    let wanted: HashSet<&str> = requested.iter().map(|id| id.trim()).filter(|id| !id.is_empty()).collect();
    let selected: Vec<&Source> = sources.iter().filter(|s| wanted.contains(s.id.as_str())).collect();

    let mut missing: Vec<String> = wanted
        .iter()
        .filter(|id| !selected.iter().any(|s| s.id == **id))
        .map(|id| id.to_string())
        .collect();
    if !missing.is_empty() {
        missing.sort();
        return Err(SyncError::Selection { missing });
    }
    Ok(selected)
}

fn missing_env_vars(names: &[&str]) -> Vec<String> {
    names
        .iter()
        .filter(|name| std::env::var(name).map(|v| v.trim().is_empty()).unwrap_or(true))
        .map(|name| name.to_string())
        .collect()
}

/// Target dir must already exist; the state dir is created on demand
fn ensure_source_paths(source: &Source, defaults: &Defaults) -> Result<()> {
    let target = config::expand_path(&source.target_dir).context("invalid target_dir")?;
    match fs::metadata(&target) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => anyhow::bail!("target_dir is not a directory: {}", target.display()),
        Err(_) => anyhow::bail!("target_dir does not exist: {}", target.display()),
    }

    if let Some(state_file) = &source.state_file {
        let path = config::resolve_state_file(&defaults.state_dir, state_file).context("invalid state_file")?;
        let dir: PathBuf = state::soundcloud::parent_dir(&path).to_path_buf();
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create state directory {:?}", dir))?;
    }
    Ok(())
}

fn determine_mode(source: &Source, opts: &SyncOptions) -> PreflightMode {
    if opts.scan_gaps || !source.break_on_existing() {
        PreflightMode::ScanGaps
    } else {
        PreflightMode::Break
    }
}

fn resolve_ask_on_existing(source: &Source, opts: &SyncOptions) -> bool {
    opts.ask_on_existing.unwrap_or_else(|| source.ask_on_existing())
}

/// A nonzero exit that only means "stopped at something already recorded"
fn is_graceful_stop(
    source: &Source,
    preflight: Option<&Preflight>,
    result: &ExecResult,
    classifier: &dyn OutputClassifier,
) -> bool {
    if source.source_type != SourceType::Soundcloud || !source.break_on_existing() {
        return false;
    }
    if result.exit_code == 0 || result.interrupted || result.timed_out {
        return false;
    }
    if classifier.is_graceful_stop(&result.combined_output()) {
        return true;
    }
    preflight.is_some_and(|p| {
        p.mode == PreflightMode::Break && p.first_existing_index > 0 && p.planned_download_count == 0
    })
}

fn missing_binary(spec: &ExecSpec, result: &ExecResult) -> Option<SourceFailure> {
    if result.exit_code != EXIT_NOT_FOUND {
        return None;
    }
    let error = result.error.as_ref()?;
    Some(SourceFailure::Dependency(format!("{} is not installed or not on PATH ({})", spec.bin, error)))
}

fn result_details(result: &ExecResult) -> Map<String, Value> {
    let mut details = Map::new();
    details.insert("exit_code".to_string(), Value::from(result.exit_code));
    details.insert("duration_ms".to_string(), Value::from(result.duration.as_millis() as u64));
    details
}

fn summary_event(level: Level, message: String, summary: &SyncSummary) -> Event {
    Event::new(level, EventName::SyncFinished, message)
        .detail("total", summary.total)
        .detail("attempted", summary.attempted)
        .detail("succeeded", summary.succeeded)
        .detail("failed", summary.failed)
        .detail("skipped", summary.skipped)
        .detail("dependency_failures", summary.dependency_failures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::AdapterError;
    use crate::config::RuntimeOptions;
    use crate::engine::events::MemorySink;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    type Respond = Box<dyn Fn(&ExecSpec) -> ExecResult + Send + Sync>;

    struct FakeRunner {
        calls: Mutex<Vec<ExecSpec>>,
        respond: Respond,
    }

    impl FakeRunner {
        fn new(respond: impl Fn(&ExecSpec) -> ExecResult + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                respond: Box::new(respond),
            })
        }

        fn ok() -> Arc<Self> {
            Self::new(|_| ExecResult::default())
        }

        fn calls(&self) -> Vec<ExecSpec> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ExecRunner for FakeRunner {
        async fn run(&self, spec: &ExecSpec, _cancel: &CancellationToken) -> ExecResult {
            self.calls.lock().unwrap().push(spec.clone());
            (self.respond)(spec)
        }
    }

    struct FakeListing(Vec<RemoteTrack>);

    #[async_trait]
    impl RemoteListing for FakeListing {
        async fn list(&self, _source: &Source, _cancel: &CancellationToken) -> Result<Vec<RemoteTrack>> {
            Ok(self.0.clone())
        }
    }

    /// Echoes the state and archive paths it was handed as arguments
    struct FakeAdapter {
        required_env: Vec<&'static str>,
    }

    impl Adapter for FakeAdapter {
        fn kind(&self) -> &'static str {
            "fake"
        }

        fn binary(&self) -> &str {
            "fake"
        }

        fn validate(&self, _source: &Source) -> Result<(), AdapterError> {
            Ok(())
        }

        fn build_command(
            &self,
            source: &Source,
            defaults: &Defaults,
            timeout: Option<Duration>,
        ) -> Result<ExecSpec, AdapterError> {
            let state = adapters::state_file(source, defaults)?;
            let archive = source
                .download_archive_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            Ok(ExecSpec {
                bin: "fake".to_string(),
                args: vec![
                    state.display().to_string(),
                    archive,
                    format!("break={}", source.break_on_existing()),
                ],
                dir: Some(adapters::target_dir(source)?),
                timeout,
                display_args: None,
            })
        }

        fn required_env(&self, _source: &Source) -> Vec<&'static str> {
            self.required_env.clone()
        }
    }

    struct AlwaysScan;

    impl Prompter for AlwaysScan {
        fn scan_gaps_instead(&self, _source_id: &str, _preflight: &Preflight) -> Result<bool> {
            Ok(true)
        }
    }

    struct Fixture {
        _tmp: TempDir,
        music: PathBuf,
        state: PathBuf,
        config: Config,
    }

    impl Fixture {
        fn new(sources: &[(&str, &str, &str)]) -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let music = tmp.path().join("music");
            let state = tmp.path().join("state");
            fs::create_dir_all(&music).unwrap();
            fs::create_dir_all(&state).unwrap();

            let sources: Vec<Value> = sources
                .iter()
                .map(|(id, source_type, kind)| {
                    serde_json::json!({
                        "id": id,
                        "type": source_type,
                        "target_dir": music,
                        "url": format!("https://example.com/{}", id),
                        "state_file": format!("{}.sync", id),
                        "adapter": { "kind": kind },
                    })
                })
                .collect();
            let config: Config = serde_json::from_value(serde_json::json!({
                "version": 1,
                "defaults": { "state_dir": state, "continue_on_error": false },
                "sources": sources,
            }))
            .unwrap();

            Self {
                _tmp: tmp,
                music,
                state,
                config,
            }
        }

        fn syncer(&self, runner: Arc<FakeRunner>, tracks: Vec<RemoteTrack>, sink: Arc<MemorySink>) -> Syncer {
            let mut registry = adapters::default_registry(&RuntimeOptions::default());
            registry.insert(
                "fake".to_string(),
                Box::new(FakeAdapter {
                    required_env: Vec::new(),
                }),
            );
            let listing = Arc::new(FakeListing(tracks));
            Syncer::new(registry, runner, listing.clone(), listing, sink)
        }

        /// `1` recorded but its file is gone, `2` recorded and present
        fn seed_soundcloud(&self, id: &str) {
            fs::write(
                self.state.join(format!("{}.sync", id)),
                "soundcloud 1 Alpha.mp3\nsoundcloud 2 Beta.mp3\n",
            )
            .unwrap();
            fs::write(
                self.state.join(format!("{}.archive.txt", id)),
                "soundcloud 1\nsoundcloud 2\n",
            )
            .unwrap();
            fs::write(self.music.join("Beta.mp3"), b"x").unwrap();
        }

        fn read_state(&self, name: &str) -> String {
            fs::read_to_string(self.state.join(name)).unwrap()
        }

        fn temp_files(&self) -> Vec<String> {
            fs::read_dir(&self.state)
                .unwrap()
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .filter(|name| name.starts_with(".udl-"))
                .collect()
        }
    }

    fn tracks(ids: &[(&str, &str)]) -> Vec<RemoteTrack> {
        ids.iter().map(|(id, title)| RemoteTrack::new(*id, *title)).collect()
    }

    fn failed(code: i32, stderr: &str) -> ExecResult {
        ExecResult {
            exit_code: code,
            stderr_tail: stderr.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_known_gap_is_swapped_and_committed() {
        let fx = Fixture::new(&[("sc", "soundcloud", "fake")]);
        fx.seed_soundcloud("sc");
        let runner = FakeRunner::ok();
        let sink = Arc::new(MemorySink::default());
        let syncer = fx.syncer(runner.clone(), tracks(&[("1", "Alpha"), ("2", "Beta")]), sink.clone());

        let summary = syncer
            .sync(&fx.config, &SyncOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 1);
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        let original = fx.state.join("sc.sync");
        assert_ne!(PathBuf::from(&calls[0].args[0]), original);
        assert!(calls[0].args[1].contains(".udl-archive-"));
        assert_eq!(calls[0].args[2], "break=true");

        assert_eq!(fx.read_state("sc.sync"), "soundcloud 2 Beta.mp3\n");
        assert_eq!(fx.read_state("sc.archive.txt"), "soundcloud 2\n");
        assert!(fx.temp_files().is_empty());

        let preflight = sink
            .events()
            .into_iter()
            .find(|e| e.event == EventName::SourcePreflight)
            .unwrap();
        assert_eq!(preflight.details["planned_download_count"], 1);
        assert_eq!(preflight.details["first_existing_index"], 2);
        assert_eq!(
            sink.names(),
            vec![
                EventName::SyncStarted,
                EventName::SourcePreflight,
                EventName::SourceStarted,
                EventName::SourceFinished,
                EventName::SyncFinished,
            ]
        );
    }

    #[tokio::test]
    async fn test_nothing_planned_skips_command() {
        let fx = Fixture::new(&[("sc", "soundcloud", "fake")]);
        fx.seed_soundcloud("sc");
        let runner = FakeRunner::ok();
        let sink = Arc::new(MemorySink::default());
        let syncer = fx.syncer(runner.clone(), tracks(&[("2", "Beta"), ("1", "Alpha")]), sink.clone());

        let summary = syncer
            .sync(&fx.config, &SyncOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 1);
        assert!(runner.calls().is_empty());
        let finished = sink
            .events()
            .into_iter()
            .find(|e| e.event == EventName::SourceFinished)
            .unwrap();
        assert!(finished.message.contains("no new downloads planned in break mode"));
        assert!(fx.temp_files().is_empty());
    }

    #[tokio::test]
    async fn test_failure_discards_swap_and_stops_batch() {
        let fx = Fixture::new(&[("sc", "soundcloud", "fake"), ("other", "soundcloud", "fake")]);
        fx.seed_soundcloud("sc");
        fs::write(fx.music.join("stale.part"), b"old").unwrap();
        let music = fx.music.clone();
        let runner = FakeRunner::new(move |_| {
            fs::write(music.join("new.part"), b"partial").unwrap();
            failed(1, "boom")
        });
        let sink = Arc::new(MemorySink::default());
        let syncer = fx.syncer(runner.clone(), tracks(&[("1", "Alpha"), ("2", "Beta")]), sink.clone());

        let summary = syncer
            .sync(&fx.config, &SyncOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.attempted, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(runner.calls().len(), 1);
        assert_eq!(fx.read_state("sc.sync"), "soundcloud 1 Alpha.mp3\nsoundcloud 2 Beta.mp3\n");
        assert!(fx.temp_files().is_empty());
        assert!(fx.music.join("stale.part").exists());
        assert!(!fx.music.join("new.part").exists());

        let failure = sink
            .events()
            .into_iter()
            .find(|e| e.event == EventName::SourceFailed && e.level == Level::Error)
            .unwrap();
        assert_eq!(failure.details["kind"], "execution");
        assert_eq!(failure.details["exit_code"], 1);
    }

    #[tokio::test]
    async fn test_graceful_stop_commits() {
        let fx = Fixture::new(&[("sc", "soundcloud", "fake")]);
        fx.seed_soundcloud("sc");
        let runner = FakeRunner::new(|_| failed(101, "ExistingVideoReached: stopping"));
        let sink = Arc::new(MemorySink::default());
        let syncer = fx.syncer(runner, tracks(&[("1", "Alpha"), ("2", "Beta")]), sink.clone());

        let summary = syncer
            .sync(&fx.config, &SyncOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.succeeded, 1);
        assert_eq!(fx.read_state("sc.sync"), "soundcloud 2 Beta.mp3\n");
        let finished = sink
            .events()
            .into_iter()
            .find(|e| e.event == EventName::SourceFinished)
            .unwrap();
        assert_eq!(finished.details["stopped_on_existing"], true);
    }

    #[tokio::test]
    async fn test_interrupt_aborts_batch() {
        let mut fx = Fixture::new(&[("sc", "soundcloud", "fake"), ("other", "soundcloud", "fake")]);
        fx.config.defaults.continue_on_error = true;
        fx.seed_soundcloud("sc");
        let runner = FakeRunner::new(|_| ExecResult {
            exit_code: 130,
            interrupted: true,
            ..Default::default()
        });
        let sink = Arc::new(MemorySink::default());
        let syncer = fx.syncer(runner.clone(), tracks(&[("1", "Alpha"), ("2", "Beta")]), sink);

        let err = syncer
            .sync(&fx.config, &SyncOptions::default(), &CancellationToken::new())
            .await
            .unwrap_err();

        let SyncError::Interrupted { summary } = err else {
            panic!("expected interrupt");
        };
        assert!(summary.interrupted);
        assert_eq!(summary.attempted, 1);
        assert_eq!(runner.calls().len(), 1);
        assert!(fx.temp_files().is_empty());
        assert_eq!(fx.read_state("sc.archive.txt"), "soundcloud 1\nsoundcloud 2\n");
    }

    #[tokio::test]
    async fn test_dry_run_touches_nothing() {
        let fx = Fixture::new(&[("sc", "soundcloud", "fake")]);
        fx.seed_soundcloud("sc");
        let runner = FakeRunner::ok();
        let sink = Arc::new(MemorySink::default());
        let syncer = fx.syncer(runner.clone(), tracks(&[("1", "Alpha"), ("2", "Beta")]), sink.clone());
        let opts = SyncOptions {
            dry_run: true,
            ..Default::default()
        };

        let summary = syncer.sync(&fx.config, &opts, &CancellationToken::new()).await.unwrap();

        assert_eq!(summary.succeeded, 1);
        assert!(runner.calls().is_empty());
        assert!(fx.temp_files().is_empty());
        assert_eq!(fx.read_state("sc.sync"), "soundcloud 1 Alpha.mp3\nsoundcloud 2 Beta.mp3\n");
        assert!(sink.names().contains(&EventName::SourceStarted));
    }

    #[tokio::test]
    async fn test_prompter_switches_to_scan_gaps() {
        let fx = Fixture::new(&[("sc", "soundcloud", "fake")]);
        fx.seed_soundcloud("sc");
        let runner = FakeRunner::ok();
        let sink = Arc::new(MemorySink::default());
        let syncer = fx
            .syncer(runner.clone(), tracks(&[("2", "Beta"), ("3", "Gamma")]), sink.clone())
            .with_prompter(Arc::new(AlwaysScan));
        let opts = SyncOptions {
            ask_on_existing: Some(true),
            allow_prompt: true,
            ..Default::default()
        };

        syncer.sync(&fx.config, &opts, &CancellationToken::new()).await.unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].args[2], "break=false");
        let preflight = sink
            .events()
            .into_iter()
            .find(|e| e.event == EventName::SourcePreflight)
            .unwrap();
        assert_eq!(preflight.details["mode"], "scan_gaps");
        assert_eq!(preflight.details["planned_download_count"], 1);
    }

    #[tokio::test]
    async fn test_unknown_source_id_is_rejected() {
        let fx = Fixture::new(&[("sc", "soundcloud", "fake")]);
        let syncer = fx.syncer(FakeRunner::ok(), Vec::new(), Arc::new(MemorySink::default()));
        let opts = SyncOptions {
            source_ids: vec!["sc".to_string(), "nope".to_string()],
            ..Default::default()
        };

        let err = syncer.sync(&fx.config, &opts, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SyncError::Selection { ref missing } if missing == &vec!["nope".to_string()]));
    }

    #[tokio::test]
    async fn test_missing_env_is_dependency_failure() {
        let mut fx = Fixture::new(&[("sc", "soundcloud", "needs-env")]);
        fx.config.defaults.continue_on_error = true;
        let mut registry = AdapterRegistry::new();
        registry.insert(
            "needs-env".to_string(),
            Box::new(FakeAdapter {
                required_env: vec!["UDL_TEST_VARIABLE_THAT_IS_NEVER_SET"],
            }),
        );
        let listing = Arc::new(FakeListing(Vec::new()));
        let runner = FakeRunner::ok();
        let syncer = Syncer::new(registry, runner.clone(), listing.clone(), listing, Arc::new(MemorySink::default()));

        let summary = syncer
            .sync(&fx.config, &SyncOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.dependency_failures, 1);
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_source_is_skipped() {
        let mut fx = Fixture::new(&[("sc", "soundcloud", "fake")]);
        fx.config.sources[0].enabled = false;
        let runner = FakeRunner::ok();
        let syncer = fx.syncer(runner.clone(), Vec::new(), Arc::new(MemorySink::default()));

        let summary = syncer
            .sync(&fx.config, &SyncOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.total, 0);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.attempted, 0);
    }

    #[tokio::test]
    async fn test_per_track_records_only_successes() {
        let fx = Fixture::new(&[("sp", "spotify", "deemix")]);
        let ok_id = "4uLU6hMCjMI75M1A2tKUQC";
        let bad_id = "7ouMYWpwJ422jRcDASZB7P";
        let mut listing = Vec::new();
        for (id, title) in [(ok_id, "Good Song"), (bad_id, "Bad Song")] {
            let mut track = RemoteTrack::new(id, title);
            track.artist = "Artist".to_string();
            track.url = crate::remote::spotify::track_url(id);
            listing.push(track);
        }
        let runner = FakeRunner::new(move |spec| {
            if spec.args[0].contains(bad_id) {
                failed(1, "no match")
            } else {
                ExecResult::default()
            }
        });
        let sink = Arc::new(MemorySink::default());
        let syncer = fx.syncer(runner.clone(), listing, sink.clone());

        let summary = syncer
            .sync(&fx.config, &SyncOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(runner.calls().len(), 2);
        let state = SpotifySyncState::load(&fx.state.join("sp.sync")).unwrap();
        assert!(state.contains(ok_id));
        assert!(!state.contains(bad_id));
        assert_eq!(
            state.entry(ok_id).and_then(|e| e.display_name.as_deref()),
            Some("Artist - Good Song")
        );
        let started = sink
            .events()
            .into_iter()
            .filter(|e| e.event == EventName::SourceStarted)
            .count();
        assert_eq!(started, 2);
    }

    #[tokio::test]
    async fn test_timeout_is_execution_failure() {
        let mut fx = Fixture::new(&[("sc", "soundcloud", "fake"), ("other", "soundcloud", "fake")]);
        fx.config.defaults.continue_on_error = true;
        fx.seed_soundcloud("sc");
        fx.seed_soundcloud("other");
        let runner = FakeRunner::new(|_| ExecResult {
            exit_code: crate::engine::runner::EXIT_TIMED_OUT,
            timed_out: true,
            ..Default::default()
        });
        let syncer = fx.syncer(runner.clone(), tracks(&[("1", "Alpha"), ("2", "Beta")]), Arc::new(MemorySink::default()));

        let summary = syncer
            .sync(&fx.config, &SyncOptions::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(!summary.interrupted);
        assert_eq!(summary.failed, 2);
        assert_eq!(runner.calls().len(), 2);
    }

    #[test]
    fn test_graceful_stop_requires_break_mode() {
        let mut source: Source = crate::adapters::test_support::source("scdl", "soundcloud", &[]);
        let result = failed(1, "ExistingVideoReached");
        assert!(is_graceful_stop(&source, None, &result, &DefaultClassifier));

        source.sync.break_on_existing = Some(false);
        assert!(!is_graceful_stop(&source, None, &result, &DefaultClassifier));

        source.sync.break_on_existing = None;
        let quiet = failed(1, "");
        let preflight = Preflight {
            remote_total: 3,
            known_count: 3,
            archive_gap_count: 0,
            known_gap_count: 0,
            first_existing_index: 1,
            planned_download_count: 0,
            mode: PreflightMode::Break,
        };
        assert!(is_graceful_stop(&source, Some(&preflight), &quiet, &DefaultClassifier));
        assert!(!is_graceful_stop(&source, None, &quiet, &DefaultClassifier));
    }

    #[test]
    fn test_determine_mode() {
        let mut source: Source = crate::adapters::test_support::source("scdl", "soundcloud", &[]);
        assert_eq!(determine_mode(&source, &SyncOptions::default()), PreflightMode::Break);
        let opts = SyncOptions {
            scan_gaps: true,
            ..Default::default()
        };
        assert_eq!(determine_mode(&source, &opts), PreflightMode::ScanGaps);
        source.sync.break_on_existing = Some(false);
        assert_eq!(determine_mode(&source, &SyncOptions::default()), PreflightMode::ScanGaps);
    }
}
