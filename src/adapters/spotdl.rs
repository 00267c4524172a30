//! spotDL adapter
//!
//! spotDL keeps its own `.spotdl` save file; the first run creates it from
//! the playlist URL and later runs sync from it.

use std::time::Duration;

use super::{sanitize_url, state_file, target_dir, Adapter, AdapterError};
use crate::config::{resolve_archive_file, Defaults, RuntimeOptions, Source, SourceType};
use crate::engine::runner::ExecSpec;

pub const USER_AUTH_ARG: &str = "--user-auth";

pub struct SpotdlAdapter {
    bin: String,
}

impl SpotdlAdapter {
    pub fn new(runtime: &RuntimeOptions) -> Self {
        Self {
            bin: runtime.spotdl_bin.clone(),
        }
    }
}

impl Adapter for SpotdlAdapter {
    fn kind(&self) -> &'static str {
        "spotdl"
    }

    fn binary(&self) -> &str {
        &self.bin
    }

    fn validate(&self, source: &Source) -> Result<(), AdapterError> {
        if source.source_type != SourceType::Spotify {
            return Err(AdapterError::Validation(
                "spotdl adapter only supports spotify sources".to_string(),
            ));
        }
        if source.state_file.is_none() {
            return Err(AdapterError::Validation(
                "state_file is required for spotify source".to_string(),
            ));
        }
        Ok(())
    }

    fn build_command(
        &self,
        source: &Source,
        defaults: &Defaults,
        timeout: Option<Duration>,
    ) -> Result<ExecSpec, AdapterError> {
        let dir = target_dir(source)?;
        let save_file = state_file(source, defaults)?;
        let save_text = save_file.to_string_lossy().into_owned();
        let archive = resolve_archive_file(&defaults.state_dir, &defaults.archive_file, &source.id)
            .map_err(|e| AdapterError::Build(format!("invalid archive file: {}", e)))?;

        let mut args = vec!["sync".to_string()];
        let mut display = args.clone();
        if save_file.exists() {
            args.push(save_text.clone());
            display.push(save_text);
        } else {
            args.extend([source.url.clone(), "--save-file".to_string(), save_text.clone()]);
            display.extend([sanitize_url(&source.url), "--save-file".to_string(), save_text]);
        }

        let common = [
            "--threads".to_string(),
            defaults.threads.max(1).to_string(),
            "--archive".to_string(),
            archive.to_string_lossy().into_owned(),
        ];
        args.extend(common.iter().cloned());
        display.extend(common);
        args.extend(source.adapter.extra_args.iter().cloned());
        display.extend(source.adapter.extra_args.iter().cloned());

        Ok(ExecSpec {
            bin: self.bin.clone(),
            args,
            dir: Some(dir),
            timeout,
            display_args: Some(display),
        })
    }
}

pub fn has_user_auth(args: &[String]) -> bool {
    args.iter().any(|a| a.trim() == USER_AUTH_ARG)
}

/// Copy of `source` with `--user-auth` appended to its extra args
pub fn with_user_auth(source: &Source) -> Source {
    let mut source = source.clone();
    if !has_user_auth(&source.adapter.extra_args) {
        source.adapter.extra_args.push(USER_AUTH_ARG.to_string());
    }
    source
}
