//! Text signatures recognized in downloader output
//!
//! Every heuristic that reads subprocess output lives behind
//! [`OutputClassifier`], so runner and syncer control flow never hard-code a
//! downloader's wording.

use once_cell::sync::Lazy;
use regex::Regex;

/// Rate-limit waits at or above this many seconds abort the run
pub const RATE_LIMIT_ABORT_SECONDS: u64 = 300;

static RATE_LIMIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)rate/request limit\. retry will occur after:\s*([0-9]+)\s*s")
        .expect("valid rate limit pattern")
});

const GRACEFUL_STOP_SIGNATURES: &[&str] = &[
    "existingvideoreached",
    "stopping due to --break-on-existing",
    "has already been recorded in the archive",
];

pub trait OutputClassifier: Send + Sync {
    /// Seconds the downloader says it will wait, if the line is a rate-limit notice
    fn rate_limit_wait(&self, line: &str) -> Option<u64>;

    /// Whether a wait of `seconds` should cancel the run
    fn should_abort_wait(&self, seconds: u64) -> bool {
        seconds >= RATE_LIMIT_ABORT_SECONDS
    }

    /// Output shows the downloader stopped on an already-recorded item
    fn is_graceful_stop(&self, output: &str) -> bool;

    /// Output shows Spotify rejected the request for lack of user auth
    fn is_user_auth_required(&self, output: &str) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultClassifier;

impl OutputClassifier for DefaultClassifier {
    fn rate_limit_wait(&self, line: &str) -> Option<u64> {
        RATE_LIMIT
            .captures(line)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }

    fn is_graceful_stop(&self, output: &str) -> bool {
        let lowered = output.to_lowercase();
        GRACEFUL_STOP_SIGNATURES.iter().any(|sig| lowered.contains(sig))
    }

    fn is_user_auth_required(&self, output: &str) -> bool {
        let lowered = output.to_lowercase();
        lowered.contains("valid user authentication required")
            || (lowered.contains("user authentication required") && lowered.contains("api.spotify.com"))
    }
}
