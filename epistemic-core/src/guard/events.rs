use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use serde_json::Value;
use uuid::Uuid;

use crate::error::EpistemicError;

/// Total order `Info < Warning < Error < Critical`, declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub enum EventLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for EventLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EventLevel::Info => "INFO",
            EventLevel::Warning => "WARNING",
            EventLevel::Error => "ERROR",
            EventLevel::Critical => "CRITICAL",
        };
        write!(f, "{label}")
    }
}

/// A rule firing, or any other notable occurrence, raised during
/// monitoring. `data` is for diagnostic payloads only — decision-bearing
/// values (inputs, output, coverage) travel through the monitor's own
/// typed context, not through this map.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Event {
    pub level: EventLevel,
    pub operation: String,
    pub message: String,
    #[serde(default)]
    pub data: HashMap<String, Value>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub op_id: Option<Uuid>,
}

impl Event {
    pub fn new(level: EventLevel, operation: impl Into<String>, message: impl Into<String>) -> Self {
        Event {
            level,
            operation: operation.into(),
            message: message.into(),
            data: HashMap::new(),
            timestamp: chrono::Utc::now(),
            op_id: None,
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.level, self.operation, self.message)
    }
}

/// Something that reacts to events. A handler that fails returns
/// `Err` rather than panicking; the monitor logs the failure and moves
/// on to the next handler instead of aborting dispatch.
pub trait EventHandler: Send + Sync {
    fn should_handle(&self, _event: &Event) -> bool {
        true
    }

    fn handle(&self, event: &Event) -> Result<(), EpistemicError>;
}

/// Logs every event it receives via `tracing`, at a level matching the
/// event's own `EventLevel`.
pub struct LogHandler;

impl EventHandler for LogHandler {
    fn handle(&self, event: &Event) -> Result<(), EpistemicError> {
        match event.level {
            EventLevel::Info => tracing::info!(%event, "guard event"),
            EventLevel::Warning => tracing::warn!(%event, "guard event"),
            EventLevel::Error | EventLevel::Critical => tracing::error!(%event, "guard event"),
        }
        Ok(())
    }
}

/// Only handles `Critical` events, and turns them into an error rather
/// than absorbing them silently — the caller decides what to do with
/// the returned `Err`.
pub struct HaltHandler;

impl EventHandler for HaltHandler {
    fn should_handle(&self, event: &Event) -> bool {
        event.level == EventLevel::Critical
    }

    fn handle(&self, event: &Event) -> Result<(), EpistemicError> {
        Err(EpistemicError::CriticalHalt(Box::new(event.clone())))
    }
}

/// Collects every event handed to it, for callers that want to inspect
/// a batch after the fact instead of reacting inline.
#[derive(Default)]
pub struct EventAggregator {
    events: Mutex<Vec<Event>>,
}

impl EventAggregator {
    pub fn new() -> Self {
        EventAggregator::default()
    }

    pub fn get_events(&self, level: Option<EventLevel>) -> Vec<Event> {
        let events = self.events.lock().expect("event aggregator lock poisoned");
        match level {
            Some(level) => events.iter().filter(|e| e.level == level).cloned().collect(),
            None => events.clone(),
        }
    }

    pub fn clear(&self) {
        self.events.lock().expect("event aggregator lock poisoned").clear();
    }

    pub fn count(&self, level: Option<EventLevel>) -> usize {
        self.get_events(level).len()
    }
}

impl EventHandler for EventAggregator {
    fn handle(&self, event: &Event) -> Result<(), EpistemicError> {
        self.events.lock().expect("event aggregator lock poisoned").push(event.clone());
        Ok(())
    }
}

/// Wraps another handler, only invoking it when `condition` returns
/// true for the event.
pub struct ConditionalHandler<F: Fn(&Event) -> bool + Send + Sync> {
    inner: Box<dyn EventHandler>,
    condition: F,
}

impl<F: Fn(&Event) -> bool + Send + Sync> ConditionalHandler<F> {
    pub fn new(inner: Box<dyn EventHandler>, condition: F) -> Self {
        ConditionalHandler { inner, condition }
    }
}

impl<F: Fn(&Event) -> bool + Send + Sync> EventHandler for ConditionalHandler<F> {
    fn should_handle(&self, event: &Event) -> bool {
        (self.condition)(event) && self.inner.should_handle(event)
    }

    fn handle(&self, event: &Event) -> Result<(), EpistemicError> {
        self.inner.handle(event)
    }
}
