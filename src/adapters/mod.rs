//! Downloader adapters
//!
//! An adapter knows one downloader's command line. The syncer hands it a
//! source whose state and archive paths may already point at temporary swap
//! files, and gets back a ready-to-run [`ExecSpec`].

pub mod deemix;
pub mod scdl;
pub mod spotdl;

use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

use crate::config::{Defaults, RuntimeOptions, Source};
use crate::engine::runner::ExecSpec;

pub use deemix::DeemixAdapter;
pub use scdl::ScdlAdapter;
pub use spotdl::SpotdlAdapter;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Build(String),
}

pub trait Adapter: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Executable this adapter runs
    fn binary(&self) -> &str;

    fn validate(&self, source: &Source) -> Result<(), AdapterError>;

    fn build_command(
        &self,
        source: &Source,
        defaults: &Defaults,
        timeout: Option<Duration>,
    ) -> Result<ExecSpec, AdapterError>;

    /// Environment variables that must be set for the downloader to work
    fn required_env(&self, _source: &Source) -> Vec<&'static str> {
        Vec::new()
    }
}

/// Adapters by kind
pub type AdapterRegistry = HashMap<String, Box<dyn Adapter>>;

/// Registry with every built-in adapter
pub fn default_registry(runtime: &RuntimeOptions) -> AdapterRegistry {
    let adapters: Vec<Box<dyn Adapter>> = vec![
        Box::new(ScdlAdapter::new(runtime)),
        Box::new(SpotdlAdapter::new(runtime)),
        Box::new(DeemixAdapter::new(runtime)),
    ];
    adapters
        .into_iter()
        .map(|adapter| (adapter.kind().to_string(), adapter))
        .collect()
}

pub(crate) fn contains_arg(args: &[String], needle: &str) -> bool {
    args.iter().any(|arg| {
        let arg = arg.trim();
        arg == needle || arg.strip_prefix(needle).is_some_and(|rest| rest.starts_with('='))
    })
}

/// URL without query or fragment, for display
pub(crate) fn sanitize_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => raw.to_string(),
    }
}

pub(crate) fn target_dir(source: &Source) -> Result<std::path::PathBuf, AdapterError> {
    crate::config::expand_path(&source.target_dir)
        .map_err(|e| AdapterError::Build(format!("invalid target_dir: {}", e)))
}

pub(crate) fn state_file(source: &Source, defaults: &Defaults) -> Result<std::path::PathBuf, AdapterError> {
    let Some(state_file) = source.state_file.as_deref().filter(|p| !p.as_os_str().is_empty()) else {
        return Err(AdapterError::Build(format!(
            "state_file is required for {} source",
            source.source_type
        )));
    };
    crate::config::resolve_state_file(&defaults.state_dir, state_file)
        .map_err(|e| AdapterError::Build(format!("invalid state_file: {}", e)))
}
