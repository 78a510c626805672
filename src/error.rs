use crate::lifecycle::{LifecycleInput, ServiceState};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SinkholeError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Trigger channel overflow for producer {producer}: dropped {dropped} oldest event(s)")]
    ChannelOverflow { producer: String, dropped: u64 },

    #[error("Trigger channel closed")]
    ChannelClosed,

    #[error("Service {operation} did not complete within {timeout:?}")]
    DispatchTimeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("Service failed to start: {0}")]
    ServiceStartFailure(#[source] ServiceError),

    #[error("Service failed to stop: {0}")]
    ServiceStopFailure(#[source] ServiceError),

    #[error("Invalid transition request {input:?} from state {from}")]
    InvalidTransitionRequest {
        from: ServiceState,
        input: LifecycleInput,
    },

    #[error("System error: {message}")]
    System { message: String },
}

impl SinkholeError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    /// Only timeouts are retried automatically; start/stop failures are
    /// terminal for the attempt and surfaced to observers.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DispatchTimeout { .. })
    }
}

/// Error reported by the managed service collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("service rejected the request: {0}")]
    Rejected(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, SinkholeError>;
