use crate::reason::{Command, Priority, Reason};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;

/// Identifies the producer that observed a change (UI, connectivity
/// callback, rule editor, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProducerId(Arc<str>);

impl ProducerId {
    pub fn new<S: AsRef<str>>(name: S) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProducerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProducerId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// A single observed change. Created by the producer, never mutated, and
/// consumed exactly once by the coalescing engine.
#[derive(Debug, Clone)]
pub struct TriggerEvent {
    pub reason: Reason,
    pub command: Command,
    pub priority: Priority,
    pub origin: ProducerId,
    /// Monotonic time used for debouncing and cross-producer ordering
    pub occurred_at: Instant,
    /// Wall clock time for diagnostics
    pub wall_time: DateTime<Utc>,
}

impl TriggerEvent {
    /// Create an event stamped now, with command and priority derived from
    /// the reason.
    pub fn new(reason: Reason, origin: ProducerId) -> Self {
        let command = reason.default_command();
        Self::with_command(reason, command, origin)
    }

    /// Create an event with an explicit command, e.g. a UI switch turning
    /// the service off.
    pub fn with_command(reason: Reason, command: Command, origin: ProducerId) -> Self {
        let priority = reason.priority();
        Self {
            reason,
            command,
            priority,
            origin,
            occurred_at: Instant::now(),
            wall_time: Utc::now(),
        }
    }

    pub fn at(mut self, occurred_at: Instant) -> Self {
        self.occurred_at = occurred_at;
        self
    }

    pub fn is_stop(&self) -> bool {
        self.command == Command::Stop
    }

    pub fn description(&self) -> String {
        format!(
            "{:?} ({}) from {}",
            self.command,
            self.reason.describe(),
            self.origin
        )
    }
}
