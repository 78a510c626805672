use crate::error::SinkholeError;
use crate::lifecycle::ServiceState;
use crate::observer::LifecycleEvent;
use crate::reason::Reason;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// Diagnostic events emitted by the coordinator pipeline
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoordinatorEvent {
    /// A producer's queue overflowed and its oldest trigger was dropped
    TriggerDropped { producer: String, reason: Reason },
    /// A debounce window was opened by this reason
    WindowOpened { reason: Reason },
    /// A debounce window closed and produced a request
    WindowClosed { request_id: Uuid, reasons: usize },
    /// An explicit stop discarded an open window
    StopPreempted {
        request_id: Uuid,
        superseded: usize,
    },
    /// A request was folded into the one already waiting for the dispatcher
    RequestMerged { request_id: Uuid },
    /// The service state changed
    StateChanged {
        from: ServiceState,
        to: ServiceState,
    },
    /// A dispatch attempt finished
    Lifecycle(LifecycleEvent),
    /// Coordinator shutdown requested
    ShutdownRequested { reason: String },
}

impl CoordinatorEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            CoordinatorEvent::TriggerDropped { producer, reason } => {
                format!("Dropped {} from {}", reason.describe(), producer)
            }
            CoordinatorEvent::WindowOpened { reason } => {
                format!("Window opened by {}", reason.describe())
            }
            CoordinatorEvent::WindowClosed {
                request_id,
                reasons,
            } => format!("Window closed: request {} with {} reason(s)", request_id, reasons),
            CoordinatorEvent::StopPreempted {
                request_id,
                superseded,
            } => format!(
                "Stop request {} discarded {} pending reason(s)",
                request_id, superseded
            ),
            CoordinatorEvent::RequestMerged { request_id } => {
                format!("Request {} merged into pending request", request_id)
            }
            CoordinatorEvent::StateChanged { from, to } => format!("State {} -> {}", from, to),
            CoordinatorEvent::Lifecycle(event) => event.description(),
            CoordinatorEvent::ShutdownRequested { reason } => {
                format!("Shutdown requested: {}", reason)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            CoordinatorEvent::TriggerDropped { .. } => "trigger_dropped",
            CoordinatorEvent::WindowOpened { .. } => "window_opened",
            CoordinatorEvent::WindowClosed { .. } => "window_closed",
            CoordinatorEvent::StopPreempted { .. } => "stop_preempted",
            CoordinatorEvent::RequestMerged { .. } => "request_merged",
            CoordinatorEvent::StateChanged { .. } => "state_changed",
            CoordinatorEvent::Lifecycle(_) => "lifecycle",
            CoordinatorEvent::ShutdownRequested { .. } => "shutdown_requested",
        }
    }
}

/// Lossy broadcast bus for UI and debugging consumers. Slow receivers lag
/// and miss events; lifecycle observers that need every event use
/// [`crate::observer::ObserverSet`] instead.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoordinatorEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers. Returns how many
    /// subscribers it reached; having none is not an error.
    pub fn publish(&self, event: CoordinatorEvent) -> usize {
        trace!("Publishing event: {}", event.description());
        self.sender.send(event).unwrap_or(0)
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Accept all events
    All,
    /// Accept only specific event types
    EventTypes(Vec<&'static str>),
}

impl EventFilter {
    /// Check if an event passes this filter
    pub fn matches(&self, event: &CoordinatorEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<CoordinatorEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(bus: &EventBus, filter: EventFilter, name: impl Into<String>) -> Self {
        Self {
            receiver: bus.subscribe(),
            filter,
            name: name.into(),
        }
    }

    /// Receive the next event that passes the filter. Lag is logged and
    /// skipped; only a closed bus ends the stream.
    pub async fn recv(&mut self) -> Result<CoordinatorEvent, SinkholeError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        debug!(
                            "Receiver '{}' received event: {}",
                            self.name,
                            event.description()
                        );
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(SinkholeError::ChannelClosed);
                }
            }
        }
    }
}
