use super::*;
use crate::coalesce::CoalescedRequest;
use crate::config::DispatchConfig;
use crate::coordinator::CoordinatorStats;
use crate::error::ServiceError;
use crate::events::{CoordinatorEvent, EventBus};
use crate::lifecycle::ServiceState;
use crate::observer::{DispatchAction, LifecycleEvent, ObserverSet, Outcome};
use crate::reason::{Command, Reason};
use crate::service::{ManagedService, ScriptedOutcome, SimulatedService};
use crate::trigger::{ProducerId, TriggerEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

struct Fixture {
    dispatcher: Dispatcher,
    service: Arc<SimulatedService>,
    slot: Arc<PendingSlot>,
    stats: Arc<CoordinatorStats>,
    events: broadcast::Receiver<CoordinatorEvent>,
}

fn dispatch_config() -> DispatchConfig {
    DispatchConfig {
        dispatch_timeout_ms: 1_000,
        max_retry_attempts: 2,
        retry_backoff_base_ms: 100,
        retry_backoff_max_ms: 1_000,
    }
}

fn fixture() -> Fixture {
    let service = Arc::new(SimulatedService::new(
        Duration::from_millis(50),
        Duration::from_millis(20),
    ));
    let slot = Arc::new(PendingSlot::new());
    let stats = Arc::new(CoordinatorStats::default());
    let bus = EventBus::new(256);
    let events = bus.subscribe();

    let dispatcher = Dispatcher::new(
        service.clone() as Arc<dyn ManagedService>,
        slot.clone(),
        &dispatch_config(),
        ObserverSet::new(),
        bus,
        stats.clone(),
    );

    Fixture {
        dispatcher,
        service,
        slot,
        stats,
        events,
    }
}

fn request(reasons: &[Reason]) -> CoalescedRequest {
    let now = Instant::now();
    reasons
        .iter()
        .map(|reason| {
            CoalescedRequest::immediate(
                &TriggerEvent::new(reason.clone(), ProducerId::new("test")),
                now,
            )
        })
        .reduce(CoalescedRequest::merge)
        .unwrap()
}

fn lifecycle_events(events: &mut broadcast::Receiver<CoordinatorEvent>) -> Vec<LifecycleEvent> {
    let mut collected = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let CoordinatorEvent::Lifecycle(event) = event {
            collected.push(event);
        }
    }
    collected
}

#[tokio::test(start_paused = true)]
async fn test_start_from_stopped() {
    let mut f = fixture();

    f.dispatcher
        .dispatch(request(&[Reason::PackageAdded, Reason::RuleChanged]))
        .await;

    assert_eq!(f.dispatcher.state(), ServiceState::Running);
    assert_eq!(f.service.start_calls(), 1);
    assert!(f.service.is_running());

    let events = lifecycle_events(&mut f.events);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].action, DispatchAction::Start);
    assert_eq!(events[0].from, ServiceState::Stopped);
    assert_eq!(events[0].to, ServiceState::Running);
    assert_eq!(events[0].reasons, vec![Reason::PackageAdded, Reason::RuleChanged]);
    assert_eq!(events[0].outcome, Outcome::Succeeded);
    assert!(events[0].duration >= Duration::from_millis(50));
}

#[tokio::test(start_paused = true)]
async fn test_reload_while_running_restarts() {
    let mut f = fixture();
    f.dispatcher.dispatch(request(&[Reason::UI])).await;
    f.dispatcher.dispatch(request(&[Reason::NetworkAvailable])).await;

    assert_eq!(f.dispatcher.state(), ServiceState::Running);
    assert_eq!(f.service.start_calls(), 2);
    assert_eq!(f.service.stop_calls(), 1);
    assert_eq!(f.service.max_in_flight(), 1);

    let events = lifecycle_events(&mut f.events);
    assert_eq!(events[1].action, DispatchAction::Restart);
    assert_eq!(events[1].from, ServiceState::Running);
}

#[tokio::test(start_paused = true)]
async fn test_state_changes_are_published_in_order() {
    let mut f = fixture();
    f.dispatcher.dispatch(request(&[Reason::UI])).await;
    f.dispatcher.dispatch(request(&[Reason::RuleChanged])).await;

    let mut states = Vec::new();
    while let Ok(event) = f.events.try_recv() {
        if let CoordinatorEvent::StateChanged { to, .. } = event {
            states.push(to);
        }
    }
    assert_eq!(
        states,
        vec![
            ServiceState::Starting,
            ServiceState::Running,
            ServiceState::Restarting,
            ServiceState::Starting,
            ServiceState::Running,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_stop_dominates_and_stop_when_stopped_is_skipped() {
    let mut f = fixture();
    f.dispatcher.dispatch(request(&[Reason::UI])).await;

    let stop = request(&[Reason::RuleChanged, Reason::SwitchOff, Reason::NetworkLost]);
    assert_eq!(stop.command, Command::Stop);
    f.dispatcher.dispatch(stop).await;
    assert_eq!(f.dispatcher.state(), ServiceState::Stopped);
    assert_eq!(f.service.start_calls(), 1);
    assert!(!f.service.is_running());

    f.dispatcher.dispatch(request(&[Reason::SwitchOff])).await;
    assert_eq!(f.service.stop_calls(), 1);

    let events = lifecycle_events(&mut f.events);
    assert_eq!(events[1].action, DispatchAction::Stop);
    assert_eq!(events[2].outcome, Outcome::Skipped);
    assert_eq!(f.stats.snapshot(0, 0).skipped, 1);
}

#[tokio::test(start_paused = true)]
async fn test_start_failure_is_not_retried_and_recovers_later() {
    let mut f = fixture();
    f.service
        .script_starts([ScriptedOutcome::Fail(ServiceError::Unavailable("no tun".into()))]);

    f.dispatcher.dispatch(request(&[Reason::Prepared])).await;
    assert_eq!(f.dispatcher.state(), ServiceState::Failed);
    assert_eq!(f.service.start_calls(), 1);

    let snapshot = f.dispatcher.state_handle().snapshot();
    assert_eq!(snapshot.reasons, vec![Reason::Prepared]);
    assert!(snapshot.last_error.unwrap().contains("no tun"));

    f.dispatcher.dispatch(request(&[Reason::Pull])).await;
    assert_eq!(f.dispatcher.state(), ServiceState::Running);
    assert!(f.dispatcher.state_handle().snapshot().last_error.is_none());

    let events = lifecycle_events(&mut f.events);
    assert!(matches!(events[0].outcome, Outcome::Failed { .. }));
    assert_eq!(events[1].from, ServiceState::Failed);
    assert_eq!(events[1].outcome, Outcome::Succeeded);

    let stats = f.stats.snapshot(0, 0);
    assert_eq!(stats.failures, 1);
    assert_eq!(stats.retries, 0);
    assert_eq!(stats.dispatches, 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeouts_are_retried_up_to_the_bound() {
    let mut f = fixture();
    f.service.script_starts(vec![ScriptedOutcome::Hang; 5]);

    f.dispatcher.dispatch(request(&[Reason::HostsFileDownload])).await;

    assert_eq!(f.dispatcher.state(), ServiceState::Failed);
    assert_eq!(f.service.start_calls(), 3);
    assert_eq!(f.service.max_in_flight(), 1);

    let events = lifecycle_events(&mut f.events);
    let outcomes: Vec<_> = events.iter().map(|e| e.outcome.clone()).collect();
    assert!(matches!(outcomes[0], Outcome::Retrying { retry: 1, delay_ms: 100, .. }));
    assert!(matches!(outcomes[1], Outcome::Retrying { retry: 2, delay_ms: 200, .. }));
    assert!(matches!(outcomes[2], Outcome::Failed { .. }));
    assert_eq!(events[2].attempt, 2);
    assert_eq!(events[2].reasons, vec![Reason::HostsFileDownload]);

    let stats = f.stats.snapshot(0, 0);
    assert_eq!(stats.retries, 2);
    assert_eq!(stats.failures, 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_then_success() {
    let mut f = fixture();
    f.service.script_starts([ScriptedOutcome::Hang]);

    let started = Instant::now();
    f.dispatcher.dispatch(request(&[Reason::UI])).await;

    assert_eq!(f.dispatcher.state(), ServiceState::Running);
    assert_eq!(f.service.start_calls(), 2);
    // timeout + first backoff + start delay
    assert!(started.elapsed() >= Duration::from_millis(1_150));
}

#[tokio::test(start_paused = true)]
async fn test_pending_stop_cuts_retry_short() {
    let mut f = fixture();
    f.service.script_starts(vec![ScriptedOutcome::Hang; 5]);
    f.slot.offer(request(&[Reason::SwitchOff]));

    f.dispatcher.dispatch(request(&[Reason::RuleChanged])).await;
    assert_eq!(f.dispatcher.state(), ServiceState::Failed);
    assert_eq!(f.service.start_calls(), 1);

    let stop = f.slot.take().unwrap();
    f.dispatcher.dispatch(stop).await;
    assert_eq!(f.dispatcher.state(), ServiceState::Stopped);
    // the timed out start left no handle behind
    assert_eq!(f.service.stop_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_stop_keeps_instance_for_release() {
    let mut f = fixture();
    f.dispatcher.dispatch(request(&[Reason::UI])).await;

    f.service
        .script_stops([ScriptedOutcome::Fail(ServiceError::Other("busy".into()))]);
    f.dispatcher.dispatch(request(&[Reason::RuleChanged])).await;
    assert_eq!(f.dispatcher.state(), ServiceState::Failed);
    assert!(f.service.is_running());

    f.dispatcher.dispatch(request(&[Reason::RuleChanged])).await;
    assert_eq!(f.dispatcher.state(), ServiceState::Running);
    assert_eq!(f.service.stop_calls(), 2);
    assert_eq!(f.service.start_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_run_serves_slot_and_stops_on_shutdown() {
    let f = fixture();
    let state = f.dispatcher.state_handle();
    let slot = f.slot.clone();
    let service = f.service.clone();

    let task = tokio::spawn(f.dispatcher.run(true));
    slot.offer(request(&[Reason::PackageAdded]));

    let running = tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| s.state == ServiceState::Running),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(running.reasons, vec![Reason::PackageAdded]);

    slot.close();
    task.await.unwrap();

    assert_eq!(state.state(), ServiceState::Stopped);
    assert!(!service.is_running());
    assert_eq!(service.stop_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_run_leaves_service_running_without_stop_on_shutdown() {
    let f = fixture();
    let state = f.dispatcher.state_handle();
    let slot = f.slot.clone();
    let service = f.service.clone();

    let task = tokio::spawn(f.dispatcher.run(false));
    slot.offer(request(&[Reason::UI]));
    state
        .wait_for(|s| s.state == ServiceState::Running)
        .await
        .unwrap();

    slot.close();
    task.await.unwrap();
    assert!(service.is_running());
    assert_eq!(service.stop_calls(), 0);
}
