use crate::error::{Result, SinkholeError};
use crate::reason::Reason;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Lifecycle state of the managed service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Restarting,
    Failed,
}

impl ServiceState {
    /// True while a start, stop or restart is in flight.
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            ServiceState::Starting | ServiceState::Stopping | ServiceState::Restarting
        )
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceState::Stopped => "stopped",
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::Stopping => "stopping",
            ServiceState::Restarting => "restarting",
            ServiceState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Inputs that drive the state machine: requests issued by the dispatcher
/// and completion signals from the managed service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleInput {
    Start,
    Stop,
    Restart,
    StartSucceeded,
    StopSucceeded,
    Failed,
}

/// The transition table. `None` means the input is not valid from `from`.
pub fn next_state(from: ServiceState, input: LifecycleInput) -> Option<ServiceState> {
    use LifecycleInput as I;
    use ServiceState as S;

    match (from, input) {
        (S::Stopped, I::Start) => Some(S::Starting),
        (S::Starting, I::StartSucceeded) => Some(S::Running),
        (S::Running, I::Stop) => Some(S::Stopping),
        (S::Running, I::Restart) => Some(S::Restarting),
        (S::Restarting, I::StopSucceeded) => Some(S::Starting),
        (S::Stopping, I::StopSucceeded) => Some(S::Stopped),
        (S::Starting | S::Stopping | S::Restarting, I::Failed) => Some(S::Failed),
        (S::Failed, I::Start | I::Restart) => Some(S::Starting),
        // Releases whatever a failed attempt left behind
        (S::Failed, I::Stop) => Some(S::Stopping),
        _ => None,
    }
}

/// Point-in-time view of the service state, readable by anyone.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub state: ServiceState,
    /// Incremented on every transition
    pub generation: u64,
    /// Reasons of the request that caused the latest transition
    pub reasons: Vec<Reason>,
    pub last_error: Option<String>,
    pub changed_at: DateTime<Utc>,
}

impl StateSnapshot {
    fn initial() -> Self {
        Self {
            state: ServiceState::Stopped,
            generation: 0,
            reasons: Vec::new(),
            last_error: None,
            changed_at: Utc::now(),
        }
    }
}

/// Sole owner and writer of the service state.
///
/// Not `Clone`: whoever holds it (the dispatcher) is the only
/// component able to change the state. Everyone else reads through
/// [`StateHandle`].
pub struct LifecycleStateMachine {
    sender: watch::Sender<StateSnapshot>,
}

impl Default for LifecycleStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleStateMachine {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(StateSnapshot::initial());
        Self { sender }
    }

    pub fn state(&self) -> ServiceState {
        self.sender.borrow().state
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.sender.borrow().clone()
    }

    pub fn handle(&self) -> StateHandle {
        StateHandle {
            receiver: self.sender.subscribe(),
        }
    }

    /// Apply an input, returning the new state. Invalid inputs leave the
    /// state untouched and return `InvalidTransitionRequest`.
    pub fn apply(&mut self, input: LifecycleInput, reasons: &[Reason]) -> Result<ServiceState> {
        let from = self.state();
        let to = next_state(from, input).ok_or_else(|| {
            warn!("Rejected lifecycle input {:?} in state {}", input, from);
            SinkholeError::InvalidTransitionRequest { from, input }
        })?;

        self.sender.send_modify(|snapshot| {
            snapshot.state = to;
            snapshot.generation += 1;
            snapshot.reasons = reasons.to_vec();
            snapshot.changed_at = Utc::now();
            if to != ServiceState::Failed {
                snapshot.last_error = None;
            }
        });

        debug!("Service state {} -> {} ({:?})", from, to, input);
        Ok(to)
    }

    /// Apply `Failed` and remember the error for diagnostics.
    pub fn fail(&mut self, error: &SinkholeError, reasons: &[Reason]) -> Result<ServiceState> {
        let to = self.apply(LifecycleInput::Failed, reasons)?;
        let message = error.to_string();
        self.sender.send_modify(|snapshot| snapshot.last_error = Some(message));
        Ok(to)
    }
}

/// Read-only view of the service state.
#[derive(Clone)]
pub struct StateHandle {
    receiver: watch::Receiver<StateSnapshot>,
}

impl StateHandle {
    pub fn state(&self) -> ServiceState {
        self.receiver.borrow().state
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.receiver.borrow().clone()
    }

    /// Wait until the state satisfies `predicate`. Returns the matching
    /// snapshot, or `None` if the state machine was dropped first.
    pub async fn wait_for<F>(&self, mut predicate: F) -> Option<StateSnapshot>
    where
        F: FnMut(&StateSnapshot) -> bool,
    {
        let mut receiver = self.receiver.clone();
        loop {
            {
                let snapshot = receiver.borrow_and_update();
                if predicate(&snapshot) {
                    return Some(snapshot.clone());
                }
            }
            if receiver.changed().await.is_err() {
                return None;
            }
        }
    }

    /// Wait for the next state change.
    pub async fn changed(&mut self) -> Option<StateSnapshot> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_stop_cycle() {
        let mut machine = LifecycleStateMachine::new();
        assert_eq!(machine.state(), ServiceState::Stopped);

        assert_eq!(machine.apply(LifecycleInput::Start, &[Reason::UI]).unwrap(), ServiceState::Starting);
        assert_eq!(
            machine.apply(LifecycleInput::StartSucceeded, &[Reason::UI]).unwrap(),
            ServiceState::Running
        );
        assert_eq!(machine.apply(LifecycleInput::Stop, &[]).unwrap(), ServiceState::Stopping);
        assert_eq!(
            machine.apply(LifecycleInput::StopSucceeded, &[]).unwrap(),
            ServiceState::Stopped
        );
        assert_eq!(machine.snapshot().generation, 4);
    }

    #[test]
    fn test_restart_reenters_start_path() {
        let mut machine = LifecycleStateMachine::new();
        machine.apply(LifecycleInput::Start, &[]).unwrap();
        machine.apply(LifecycleInput::StartSucceeded, &[]).unwrap();

        assert_eq!(machine.apply(LifecycleInput::Restart, &[]).unwrap(), ServiceState::Restarting);
        assert_eq!(machine.apply(LifecycleInput::StopSucceeded, &[]).unwrap(), ServiceState::Starting);
        assert_eq!(machine.apply(LifecycleInput::StartSucceeded, &[]).unwrap(), ServiceState::Running);
    }

    #[test]
    fn test_invalid_transition_is_rejected_and_state_kept() {
        let mut machine = LifecycleStateMachine::new();
        let err = machine.apply(LifecycleInput::Restart, &[]).unwrap_err();
        assert!(matches!(
            err,
            SinkholeError::InvalidTransitionRequest {
                from: ServiceState::Stopped,
                input: LifecycleInput::Restart
            }
        ));
        assert_eq!(machine.state(), ServiceState::Stopped);
        assert_eq!(machine.snapshot().generation, 0);
    }

    #[test]
    fn test_failed_is_recoverable() {
        let mut machine = LifecycleStateMachine::new();
        machine.apply(LifecycleInput::Start, &[]).unwrap();
        let error = SinkholeError::system("tun device busy");
        machine.fail(&error, &[Reason::PackageAdded]).unwrap();

        let snapshot = machine.snapshot();
        assert_eq!(snapshot.state, ServiceState::Failed);
        assert_eq!(snapshot.reasons, vec![Reason::PackageAdded]);
        assert!(snapshot.last_error.unwrap().contains("tun device busy"));

        assert_eq!(machine.apply(LifecycleInput::Restart, &[]).unwrap(), ServiceState::Starting);
        machine.apply(LifecycleInput::StartSucceeded, &[]).unwrap();
        assert!(machine.snapshot().last_error.is_none());
    }

    #[test]
    fn test_transition_table_has_no_self_loops_from_transitional_states() {
        let inputs = [
            LifecycleInput::Start,
            LifecycleInput::Stop,
            LifecycleInput::Restart,
        ];
        for from in [ServiceState::Starting, ServiceState::Stopping, ServiceState::Restarting] {
            for input in inputs {
                assert_eq!(next_state(from, input), None, "{} accepted {:?}", from, input);
            }
        }
    }

    #[tokio::test]
    async fn test_handle_observes_changes() {
        let mut machine = LifecycleStateMachine::new();
        let handle = machine.handle();

        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move {
                handle
                    .wait_for(|snapshot| snapshot.state == ServiceState::Running)
                    .await
            })
        };

        machine.apply(LifecycleInput::Start, &[]).unwrap();
        machine.apply(LifecycleInput::StartSucceeded, &[]).unwrap();

        let snapshot = waiter.await.unwrap().unwrap();
        assert_eq!(snapshot.state, ServiceState::Running);
        assert_eq!(handle.state(), ServiceState::Running);
    }
}
