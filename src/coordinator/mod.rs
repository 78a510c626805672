mod coalescer;
mod orchestrator;
mod runtime;
mod shutdown;
mod startup;
mod stats;
mod types;


pub use orchestrator::Coordinator;
pub use stats::{CoordinatorStats, CoordinatorStatsSnapshot};
pub use types::{ShutdownReason, ShutdownTrigger};
