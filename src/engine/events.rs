//! Structured lifecycle events
//!
//! The syncer never formats output for people. It emits [`Event`]s into an
//! [`EventSink`] and the CLI decides how they look.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::io::Write;
use std::sync::Mutex;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventName {
    SyncStarted,
    SourcePreflight,
    SourceStarted,
    SourceFinished,
    SourceFailed,
    SyncFinished,
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventName::SyncStarted => "sync_started",
            EventName::SourcePreflight => "source_preflight",
            EventName::SourceStarted => "source_started",
            EventName::SourceFinished => "source_finished",
            EventName::SourceFailed => "source_failed",
            EventName::SyncFinished => "sync_finished",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    pub event: EventName,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
}

impl Event {
    pub fn new(level: Level, event: EventName, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            event,
            source_id: None,
            message: message.into(),
            details: Map::new(),
        }
    }

    pub fn source(mut self, source_id: &str) -> Self {
        self.source_id = Some(source_id.to_string());
        self
    }

    pub fn detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &Event);
}

/// Routes events through `tracing` at their own level
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &Event) {
        let source = event.source_id.as_deref().unwrap_or("-");
        let details = if event.details.is_empty() {
            String::new()
        } else {
            Value::Object(event.details.clone()).to_string()
        };
        match event.level {
            Level::Info => info!(event = %event.event, source_id = source, details = %details, "{}", event.message),
            Level::Warn => warn!(event = %event.event, source_id = source, details = %details, "{}", event.message),
            Level::Error => error!(event = %event.event, source_id = source, details = %details, "{}", event.message),
        }
    }
}

/// Newline-delimited JSON for machine consumers
pub struct JsonSink<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<W: Write + Send> EventSink for JsonSink<W> {
    fn emit(&self, event: &Event) {
        let Ok(line) = serde_json::to_string(event) else {
            return;
        };
        let mut out = match self.out.lock() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        };
        let _ = writeln!(out, "{}", line);
        let _ = out.flush();
    }
}

/// Keeps every event in memory
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

#[cfg(test)]
impl MemorySink {
    pub fn events(&self) -> Vec<Event> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn names(&self) -> Vec<EventName> {
        self.events().iter().map(|e| e.event).collect()
    }
}

#[cfg(test)]
impl EventSink for MemorySink {
    fn emit(&self, event: &Event) {
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
    }
}
