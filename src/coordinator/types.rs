use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

/// Why the coordinator is shutting down
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal(String),
    UserRequest,
    Error(String),
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Signal(signal) => write!(f, "signal {}", signal),
            ShutdownReason::UserRequest => f.write_str("user request"),
            ShutdownReason::Error(message) => write!(f, "error: {}", message),
        }
    }
}

/// Clonable one-shot trigger for [`super::Coordinator::run`]. Only the
/// first trigger counts.
#[derive(Clone)]
pub struct ShutdownTrigger {
    sender: Arc<Mutex<Option<oneshot::Sender<ShutdownReason>>>>,
}

impl ShutdownTrigger {
    pub(super) fn new(sender: oneshot::Sender<ShutdownReason>) -> Self {
        Self {
            sender: Arc::new(Mutex::new(Some(sender))),
        }
    }

    /// Request shutdown. Returns false if shutdown was already requested.
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        match self.sender.lock().take() {
            Some(sender) => sender.send(reason).is_ok(),
            None => {
                debug!("Shutdown already requested, ignoring {}", reason);
                false
            }
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.sender.lock().is_none()
    }
}
