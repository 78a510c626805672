use super::slot::PendingSlot;
use crate::coalesce::CoalescedRequest;
use crate::config::DispatchConfig;
use crate::coordinator::CoordinatorStats;
use crate::error::{Result, SinkholeError};
use crate::events::{CoordinatorEvent, EventBus};
use crate::lifecycle::{LifecycleInput, LifecycleStateMachine, ServiceState, StateHandle};
use crate::observer::{DispatchAction, LifecycleEvent, LifecycleObserver, ObserverSet, Outcome};
use crate::reason::Reason;
use crate::recovery::{RecoveryAction, RecoveryManager, RetryPolicy};
use crate::service::{ManagedService, ServiceHandle};
use crate::trigger::{ProducerId, TriggerEvent};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

/// Serial consumer of coalesced requests and the only writer of the
/// service state.
pub struct Dispatcher {
    machine: LifecycleStateMachine,
    service: Arc<dyn ManagedService>,
    handle: Option<ServiceHandle>,
    slot: Arc<PendingSlot>,
    dispatch_timeout: Duration,
    retry_policy: RetryPolicy,
    observers: ObserverSet,
    bus: EventBus,
    stats: Arc<CoordinatorStats>,
}

impl Dispatcher {
    pub fn new(
        service: Arc<dyn ManagedService>,
        slot: Arc<PendingSlot>,
        config: &DispatchConfig,
        observers: ObserverSet,
        bus: EventBus,
        stats: Arc<CoordinatorStats>,
    ) -> Self {
        Self {
            machine: LifecycleStateMachine::new(),
            service,
            handle: None,
            slot,
            dispatch_timeout: config.dispatch_timeout(),
            retry_policy: RetryPolicy::from(config),
            observers,
            bus,
            stats,
        }
    }

    pub fn state(&self) -> ServiceState {
        self.machine.state()
    }

    pub fn state_handle(&self) -> StateHandle {
        self.machine.handle()
    }

    pub fn add_observer(&mut self, observer: Arc<dyn LifecycleObserver>) {
        self.observers.add(observer);
    }

    /// Serve requests until the slot is closed, then optionally stop the
    /// service and drain the observers.
    pub async fn run(mut self, stop_on_shutdown: bool) {
        info!("Dispatcher started for service '{}'", self.service.name());

        while let Some(request) = self.slot.next().await {
            self.dispatch(request).await;
        }

        if stop_on_shutdown {
            self.stop_for_shutdown().await;
        }

        let observers = std::mem::take(&mut self.observers);
        observers.shutdown().await;
        info!("Dispatcher stopped in state {}", self.machine.state());
    }

    /// Resolve one request, retrying timed out attempts with backoff.
    pub async fn dispatch(&mut self, request: CoalescedRequest) {
        let mut recovery = RecoveryManager::new(self.retry_policy.clone());
        let mut attempt = 0;

        info!(
            "Dispatching request {} ({:?}): {}",
            request.id,
            request.command,
            request.summary()
        );

        loop {
            let from = self.machine.state();
            let action = self.plan(&request);

            if action == DispatchAction::None {
                debug!("Nothing to do for request {} in state {}", request.id, from);
                self.stats.record_skipped();
                self.emit(&request, action, from, Outcome::Skipped, attempt, Duration::ZERO);
                return;
            }

            let started = Instant::now();
            let result = self.execute(action, &request.reasons).await;
            let elapsed = started.elapsed();

            let error = match result {
                Ok(()) => {
                    self.stats.record_dispatch();
                    self.emit(&request, action, from, Outcome::Succeeded, attempt, elapsed);
                    return;
                }
                Err(SinkholeError::InvalidTransitionRequest { from, input }) => {
                    warn!("Ignoring {:?} request in state {}", input, from);
                    return;
                }
                Err(e) => e,
            };

            match recovery.handle_error(&error) {
                RecoveryAction::RetryAfterDelay(delay) => {
                    self.stats.record_retry();
                    let outcome = Outcome::Retrying {
                        error: error.to_string(),
                        retry: recovery.retries(),
                        delay_ms: delay.as_millis() as u64,
                    };
                    self.emit(&request, action, from, outcome, attempt, elapsed);

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.slot.stop_requested() => {
                            info!("Abandoning retry of request {}: stop requested", request.id);
                            return;
                        }
                    }
                    attempt += 1;
                }
                RecoveryAction::GiveUp => {
                    if recovery.has_exhausted_retries() {
                        warn!(
                            "Request {} failed after {} retries",
                            request.id,
                            recovery.retries()
                        );
                    }
                    self.stats.record_failure();
                    let outcome = Outcome::Failed {
                        error: error.to_string(),
                    };
                    self.emit(&request, action, from, outcome, attempt, elapsed);
                    return;
                }
            }
        }
    }

    fn plan(&self, request: &CoalescedRequest) -> DispatchAction {
        let state = self.machine.state();

        if request.is_stop() {
            return match state {
                ServiceState::Stopped => DispatchAction::None,
                _ => DispatchAction::Stop,
            };
        }

        match state {
            ServiceState::Running => DispatchAction::Restart,
            ServiceState::Stopped | ServiceState::Failed => DispatchAction::Start,
            // Transitions always settle before the next request is taken
            ServiceState::Starting | ServiceState::Stopping | ServiceState::Restarting => {
                DispatchAction::None
            }
        }
    }

    async fn execute(&mut self, action: DispatchAction, reasons: &[Reason]) -> Result<()> {
        match action {
            DispatchAction::Start => {
                self.transition(LifecycleInput::Start, reasons)?;
                self.release_stale_handle().await;
                self.start_service(reasons).await
            }
            DispatchAction::Restart => {
                self.transition(LifecycleInput::Restart, reasons)?;
                self.stop_service(reasons).await?;
                self.start_service(reasons).await
            }
            DispatchAction::Stop => {
                self.transition(LifecycleInput::Stop, reasons)?;
                self.stop_service(reasons).await
            }
            DispatchAction::None => Ok(()),
        }
    }

    async fn start_service(&mut self, reasons: &[Reason]) -> Result<()> {
        match timeout(self.dispatch_timeout, self.service.start()).await {
            Ok(Ok(handle)) => {
                info!("Service '{}' started ({})", self.service.name(), handle);
                self.handle = Some(handle);
                self.transition(LifecycleInput::StartSucceeded, reasons)?;
                Ok(())
            }
            Ok(Err(e)) => self.fail(SinkholeError::ServiceStartFailure(e), reasons),
            Err(_) => self.fail(
                SinkholeError::DispatchTimeout {
                    operation: "start",
                    timeout: self.dispatch_timeout,
                },
                reasons,
            ),
        }
    }

    async fn stop_service(&mut self, reasons: &[Reason]) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            debug!("No running instance to stop");
            self.transition(LifecycleInput::StopSucceeded, reasons)?;
            return Ok(());
        };

        match timeout(self.dispatch_timeout, self.service.stop(handle.clone())).await {
            Ok(Ok(())) => {
                info!("Service '{}' stopped ({})", self.service.name(), handle);
                self.transition(LifecycleInput::StopSucceeded, reasons)?;
                Ok(())
            }
            Ok(Err(e)) => {
                self.handle = Some(handle);
                self.fail(SinkholeError::ServiceStopFailure(e), reasons)
            }
            Err(_) => {
                self.handle = Some(handle);
                self.fail(
                    SinkholeError::DispatchTimeout {
                        operation: "stop",
                        timeout: self.dispatch_timeout,
                    },
                    reasons,
                )
            }
        }
    }

    /// Best-effort stop of an instance a failed stop left behind, so a
    /// fresh start never runs next to it.
    async fn release_stale_handle(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        warn!("Releasing {} left behind by a failed transition", handle);
        match timeout(self.dispatch_timeout, self.service.stop(handle)).await {
            Ok(Ok(())) => debug!("Stale instance released"),
            Ok(Err(e)) => warn!("Could not release stale instance: {}", e),
            Err(_) => warn!("Timed out releasing stale instance"),
        }
    }

    async fn stop_for_shutdown(&mut self) {
        if self.machine.state() == ServiceState::Stopped && self.handle.is_none() {
            return;
        }

        info!("Stopping service '{}' for shutdown", self.service.name());
        let event = TriggerEvent::new(Reason::SwitchOff, ProducerId::new("shutdown"));
        self.dispatch(CoalescedRequest::immediate(&event, Instant::now()))
            .await;
    }

    fn transition(&mut self, input: LifecycleInput, reasons: &[Reason]) -> Result<ServiceState> {
        let from = self.machine.state();
        let to = self.machine.apply(input, reasons)?;
        info!("Service state {} -> {}", from, to);
        self.bus.publish(CoordinatorEvent::StateChanged { from, to });
        Ok(to)
    }

    fn fail(&mut self, error: SinkholeError, reasons: &[Reason]) -> Result<()> {
        error!("Lifecycle operation failed: {}", error);
        let from = self.machine.state();
        let to = self.machine.fail(&error, reasons)?;
        self.bus.publish(CoordinatorEvent::StateChanged { from, to });
        Err(error)
    }

    fn emit(
        &self,
        request: &CoalescedRequest,
        action: DispatchAction,
        from: ServiceState,
        outcome: Outcome,
        attempt: u32,
        duration: Duration,
    ) {
        let event = LifecycleEvent {
            request_id: request.id,
            action,
            from,
            to: self.machine.state(),
            reasons: request.reasons.clone(),
            outcome,
            attempt,
            duration,
            at: Utc::now(),
        };
        self.bus.publish(CoordinatorEvent::Lifecycle(event.clone()));
        self.observers.notify(event);
    }
}
