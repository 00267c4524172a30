//! Human-facing event output and prompts

use anyhow::Result;
use colored::Colorize;
use dialoguer::Confirm;
use serde_json::Value;

use crate::engine::{Event, EventName, EventSink, Level, Preflight, Prompter};

/// Colored, line-oriented rendering of sync events
///
/// Info goes to stdout; warnings and errors go to stderr so they survive
/// `udl sync > log.txt`.
pub struct ConsoleSink {
    verbose: bool,
}

impl ConsoleSink {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    fn render(&self, event: &Event) -> String {
        let message = match (event.level, event.event) {
            (Level::Error, _) => event.message.red().bold().to_string(),
            (Level::Warn, _) => event.message.yellow().to_string(),
            (Level::Info, EventName::SyncStarted | EventName::SyncFinished) => {
                event.message.green().bold().to_string()
            }
            (Level::Info, EventName::SourceStarted) => event.message.cyan().to_string(),
            (Level::Info, _) => event.message.clone(),
        };
        if !self.verbose || event.details.is_empty() {
            return message;
        }
        let details = event
            .details
            .iter()
            .map(|(key, value)| match value {
                Value::String(text) => format!("{}={}", key, text),
                other => format!("{}={}", key, other),
            })
            .collect::<Vec<_>>()
            .join(" ");
        format!("{} {}", message, details.dimmed())
    }
}

impl EventSink for ConsoleSink {
    fn emit(&self, event: &Event) {
        let line = self.render(event);
        match event.level {
            Level::Info => println!("{}", line),
            Level::Warn | Level::Error => eprintln!("{}", line),
        }
    }
}

/// Asks on the terminal whether to keep scanning past the first known track
pub struct DialoguerPrompter;

impl Prompter for DialoguerPrompter {
    fn scan_gaps_instead(&self, source_id: &str, preflight: &Preflight) -> Result<bool> {
        let answer = Confirm::new()
            .with_prompt(format!(
                "[{}] Existing track found at position {} of {}. Continue scanning for gaps?",
                source_id, preflight.first_existing_index, preflight.remote_total
            ))
            .default(false)
            .interact()?;
        Ok(answer)
    }
}
