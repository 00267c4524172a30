//! deemix adapter
//!
//! deemix has no notion of sync state, so the syncer runs it once per planned
//! track with the track URL in place of the playlist URL and records
//! successes in the Spotify state file itself.

use std::time::Duration;

use super::{contains_arg, sanitize_url, target_dir, Adapter, AdapterError};
use crate::config::{Defaults, RuntimeOptions, Source, SourceType};
use crate::engine::runner::ExecSpec;

pub struct DeemixAdapter {
    bin: String,
}

impl DeemixAdapter {
    pub fn new(runtime: &RuntimeOptions) -> Self {
        Self {
            bin: runtime.deemix_bin.clone(),
        }
    }
}

impl Adapter for DeemixAdapter {
    fn kind(&self) -> &'static str {
        "deemix"
    }

    fn binary(&self) -> &str {
        &self.bin
    }

    fn validate(&self, source: &Source) -> Result<(), AdapterError> {
        if source.source_type != SourceType::Spotify {
            return Err(AdapterError::Validation(
                "deemix adapter only supports spotify sources".to_string(),
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
        _defaults: &Defaults,
        timeout: Option<Duration>,
    ) -> Result<ExecSpec, AdapterError> {
        let url = source.url.trim();
        if url.is_empty() {
            return Err(AdapterError::Build("spotify source url must be set".to_string()));
        }
        let dir = target_dir(source)?;

        let mut args = vec![url.to_string()];
        let mut display = vec![sanitize_url(url)];
        if !contains_arg(&source.adapter.extra_args, "--path") {
            let path = dir.to_string_lossy().into_owned();
            args.extend(["--path".to_string(), path.clone()]);
            display.extend(["--path".to_string(), path]);
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::test_support::source;

    #[test]
    fn test_build_adds_path_once() {
        let adapter = DeemixAdapter::new(&RuntimeOptions {
            deemix_bin: "/opt/deemix".to_string(),
            ..RuntimeOptions::default()
        });
        let spec = adapter
            .build_command(&source("deemix", "spotify", &[]), &Defaults::default(), None)
            .unwrap();
        assert_eq!(spec.bin, "/opt/deemix");
        assert_eq!(spec.args, vec!["https://example.com/list?si=secret", "--path", "/music/src"]);

        let spec = adapter
            .build_command(&source("deemix", "spotify", &["--path=/x", "-b", "flac"]), &Defaults::default(), None)
            .unwrap();
        assert_eq!(spec.args, vec!["https://example.com/list?si=secret", "--path=/x", "-b", "flac"]);
    }

    #[test]
    fn test_validate_type() {
        let adapter = DeemixAdapter::new(&RuntimeOptions::default());
        assert!(adapter.validate(&source("deemix", "soundcloud", &[])).is_err());
    }
}
