//! Control interface of the managed filtering service.
//!
//! The coordinator never implements the service itself; it only drives a
//! [`ManagedService`] through start and stop, one call at a time.

mod simulated;

pub use simulated::{ScriptedOutcome, SimulatedService};

use crate::error::ServiceError;
use async_trait::async_trait;
use std::fmt;

/// Opaque token for a running service instance, returned by `start` and
/// handed back to `stop`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceHandle {
    id: u64,
}

impl ServiceHandle {
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Display for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instance #{}", self.id)
    }
}

/// Start/stop control of the long-running service.
///
/// Calls complete when the service has actually reached the requested
/// condition. The dispatcher bounds each call with a timeout.
#[async_trait]
pub trait ManagedService: Send + Sync {
    async fn start(&self) -> Result<ServiceHandle, ServiceError>;

    async fn stop(&self, handle: ServiceHandle) -> Result<(), ServiceError>;

    /// Name used in logs
    fn name(&self) -> &str {
        "service"
    }
}
