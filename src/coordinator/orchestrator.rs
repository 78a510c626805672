use super::stats::{CoordinatorStats, CoordinatorStatsSnapshot};
use super::types::{ShutdownReason, ShutdownTrigger};
use crate::channel::{SubmitOutcome, TriggerChannel};
use crate::config::SinkholeConfig;
use crate::dispatch::{Dispatcher, PendingSlot};
use crate::error::{Result, SinkholeError};
use crate::events::{CoordinatorEvent, EventBus};
use crate::lifecycle::{ServiceState, StateHandle, StateSnapshot};
use crate::observer::{LifecycleObserver, ObserverSet};
use crate::producer::{self, Producer, TriggerSource};
use crate::service::ManagedService;
use crate::trigger::{ProducerId, TriggerEvent};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Restart coordinator for one managed service.
///
/// Owns the trigger channel, the coalescer and dispatcher tasks and any
/// spawned trigger sources. Everything outside reads the service state
/// through [`StateHandle`] snapshots.
pub struct Coordinator {
    pub(super) config: SinkholeConfig,
    pub(super) channel: Arc<TriggerChannel>,
    pub(super) slot: Arc<PendingSlot>,
    pub(super) event_bus: EventBus,
    pub(super) stats: Arc<CoordinatorStats>,
    pub(super) state: StateHandle,

    // Held until start() moves it into its task
    pub(super) dispatcher: Option<Dispatcher>,

    // Background tasks
    pub(super) coalescer_task: Option<JoinHandle<()>>,
    pub(super) dispatcher_task: Option<JoinHandle<()>>,
    pub(super) source_tasks: Vec<(String, JoinHandle<()>)>,

    // Lifecycle management
    pub(super) shutdown_trigger: ShutdownTrigger,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
    pub(super) cancellation_token: CancellationToken,
}

impl Coordinator {
    /// Create a coordinator for `service`. Nothing runs until [`start`].
    ///
    /// [`start`]: Coordinator::start
    pub fn new(config: SinkholeConfig, service: Arc<dyn ManagedService>) -> Result<Self> {
        config.validate()?;

        let channel = Arc::new(TriggerChannel::new(config.coordinator.channel_capacity));
        let slot = Arc::new(PendingSlot::new());
        let event_bus = EventBus::new(config.observer.event_bus_capacity);
        let stats = Arc::new(CoordinatorStats::default());

        let dispatcher = Dispatcher::new(
            service,
            Arc::clone(&slot),
            &config.dispatch,
            ObserverSet::new(),
            event_bus.clone(),
            Arc::clone(&stats),
        );
        let state = dispatcher.state_handle();
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();

        Ok(Self {
            config,
            channel,
            slot,
            event_bus,
            stats,
            state,
            dispatcher: Some(dispatcher),
            coalescer_task: None,
            dispatcher_task: None,
            source_tasks: Vec::new(),
            shutdown_trigger: ShutdownTrigger::new(shutdown_sender),
            shutdown_receiver: Some(shutdown_receiver),
            cancellation_token: CancellationToken::new(),
        })
    }

    /// Register a lifecycle observer. Only possible before start.
    pub fn add_observer(&mut self, observer: Arc<dyn LifecycleObserver>) -> Result<()> {
        let dispatcher = self
            .dispatcher
            .as_mut()
            .ok_or_else(|| SinkholeError::system("Observers must be added before start"))?;
        dispatcher.add_observer(observer);
        Ok(())
    }

    pub fn config(&self) -> &SinkholeConfig {
        &self.config
    }

    pub fn is_started(&self) -> bool {
        self.dispatcher.is_none()
    }

    /// Submission handle for one producer
    pub fn producer(&self, name: &str) -> Producer {
        Producer::new(
            ProducerId::new(name),
            Arc::clone(&self.channel),
            self.event_bus.clone(),
        )
    }

    /// Submit a single event. Fails only once the coordinator is shutting
    /// down.
    pub fn submit(&self, event: TriggerEvent) -> Result<SubmitOutcome> {
        producer::submit_event(&self.channel, &self.event_bus, event)
    }

    /// Run a trigger source until shutdown.
    pub fn spawn_source(&mut self, source: Box<dyn TriggerSource>) {
        let name = source.name().to_string();
        let producer = self.producer(&name);
        let cancel = self.cancellation_token.child_token();

        let task_name = name.clone();
        let handle = tokio::spawn(async move {
            info!("Trigger source '{}' started", task_name);
            match source.run(producer, cancel).await {
                Ok(()) => info!("Trigger source '{}' finished", task_name),
                Err(e) => error!("Trigger source '{}' failed: {}", task_name, e),
            }
        });

        self.source_tasks.push((name, handle));
    }

    pub fn state(&self) -> ServiceState {
        self.state.state()
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.state.snapshot()
    }

    /// Read-only state view that outlives borrows of the coordinator
    pub fn state_handle(&self) -> StateHandle {
        self.state.clone()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.event_bus.subscribe()
    }

    pub fn stats(&self) -> CoordinatorStatsSnapshot {
        let channel = self.channel.stats();
        self.stats.snapshot(channel.submitted, channel.dropped)
    }

    /// Handle that makes [`Coordinator::run`] return and shut down.
    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        self.shutdown_trigger.clone()
    }
}
