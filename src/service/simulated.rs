use super::{ManagedService, ServiceHandle};
use crate::error::ServiceError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Outcome of the next scripted start or stop call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedOutcome {
    Succeed,
    Fail(ServiceError),
    /// Never complete; the dispatcher's timeout has to fire.
    Hang,
}

/// In-process stand-in for the filtering service, for the demo binary and
/// tests. Calls succeed after a configurable delay unless an outcome was
/// scripted for them.
pub struct SimulatedService {
    start_delay: Duration,
    stop_delay: Duration,
    start_script: Mutex<VecDeque<ScriptedOutcome>>,
    stop_script: Mutex<VecDeque<ScriptedOutcome>>,
    running: AtomicBool,
    next_id: AtomicU64,
    start_calls: AtomicU64,
    stop_calls: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for SimulatedService {
    fn default() -> Self {
        Self::new(Duration::from_millis(50), Duration::from_millis(20))
    }
}

impl SimulatedService {
    pub fn new(start_delay: Duration, stop_delay: Duration) -> Self {
        Self {
            start_delay,
            stop_delay,
            start_script: Mutex::new(VecDeque::new()),
            stop_script: Mutex::new(VecDeque::new()),
            running: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            start_calls: AtomicU64::new(0),
            stop_calls: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Queue outcomes for upcoming start calls.
    pub fn script_starts<I: IntoIterator<Item = ScriptedOutcome>>(&self, outcomes: I) {
        self.start_script.lock().extend(outcomes);
    }

    /// Queue outcomes for upcoming stop calls.
    pub fn script_stops<I: IntoIterator<Item = ScriptedOutcome>>(&self, outcomes: I) {
        self.stop_script.lock().extend(outcomes);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn start_calls(&self) -> u64 {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> u64 {
        self.stop_calls.load(Ordering::SeqCst)
    }

    /// Highest number of start/stop calls ever observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn play(&self, outcome: ScriptedOutcome, delay: Duration) -> Result<(), ServiceError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);

        match outcome {
            ScriptedOutcome::Succeed => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            ScriptedOutcome::Fail(error) => {
                tokio::time::sleep(delay).await;
                Err(error)
            }
            ScriptedOutcome::Hang => std::future::pending().await,
        }
    }
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ManagedService for SimulatedService {
    async fn start(&self) -> Result<ServiceHandle, ServiceError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .start_script
            .lock()
            .pop_front()
            .unwrap_or(ScriptedOutcome::Succeed);
        debug!("Simulated start ({:?})", outcome);

        self.play(outcome, self.start_delay).await?;

        let handle = ServiceHandle::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.running.store(true, Ordering::SeqCst);
        info!("Simulated service started ({})", handle);
        Ok(handle)
    }

    async fn stop(&self, handle: ServiceHandle) -> Result<(), ServiceError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .stop_script
            .lock()
            .pop_front()
            .unwrap_or(ScriptedOutcome::Succeed);
        debug!("Simulated stop of {} ({:?})", handle, outcome);

        self.play(outcome, self.stop_delay).await?;

        self.running.store(false, Ordering::SeqCst);
        info!("Simulated service stopped ({})", handle);
        Ok(())
    }

    fn name(&self) -> &str {
        "simulated"
    }
}
