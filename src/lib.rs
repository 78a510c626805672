pub mod channel;
pub mod coalesce;
pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod observer;
pub mod producer;
pub mod reason;
pub mod recovery;
pub mod service;
pub mod trigger;

pub use channel::{SubmitOutcome, TriggerChannel};
pub use coalesce::{CoalescedRequest, CoalescingEngine, FoldOutcome};
pub use config::SinkholeConfig;
pub use coordinator::{
    Coordinator, CoordinatorStats, CoordinatorStatsSnapshot, ShutdownReason, ShutdownTrigger,
};
pub use dispatch::{Dispatcher, PendingSlot};
pub use error::{Result, ServiceError, SinkholeError};
pub use events::{CoordinatorEvent, EventBus, EventFilter, EventReceiver};
pub use lifecycle::{LifecycleStateMachine, ServiceState, StateHandle, StateSnapshot};
pub use observer::{
    DispatchAction, JournalObserver, LifecycleEvent, LifecycleObserver, LogObserver, Outcome,
};
pub use producer::{Producer, TriggerSource};
pub use reason::{Category, Command, Priority, Reason, UnknownReason};
pub use recovery::{RecoveryAction, RecoveryManager, RetryPolicy};
pub use service::{ManagedService, ScriptedOutcome, ServiceHandle, SimulatedService};
pub use trigger::{ProducerId, TriggerEvent};
