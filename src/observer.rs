use crate::error::Result;
use crate::lifecycle::ServiceState;
use crate::reason::Reason;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Operation the dispatcher chose for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchAction {
    Start,
    Restart,
    Stop,
    /// Nothing to do, e.g. a stop while already stopped
    None,
}

/// How a dispatch attempt ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Skipped,
    /// The attempt timed out and another one is scheduled.
    Retrying {
        error: String,
        retry: u32,
        delay_ms: u64,
    },
    Failed {
        error: String,
    },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded | Outcome::Skipped)
    }
}

/// Structured record of one dispatch attempt.
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleEvent {
    pub request_id: Uuid,
    pub action: DispatchAction,
    pub from: ServiceState,
    pub to: ServiceState,
    pub reasons: Vec<Reason>,
    pub outcome: Outcome,
    /// 0 for the first attempt, then the retry number
    pub attempt: u32,
    #[serde(rename = "duration_ms", serialize_with = "duration_as_millis")]
    pub duration: Duration,
    pub at: DateTime<Utc>,
}

fn duration_as_millis<S: Serializer>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

impl LifecycleEvent {
    pub fn description(&self) -> String {
        let reasons = self
            .reasons
            .iter()
            .map(Reason::describe)
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "{:?} {} -> {} [{}] {:?} in {:?}",
            self.action, self.from, self.to, reasons, self.outcome, self.duration
        )
    }
}

/// Receives lifecycle events (logging, UI, notifications).
///
/// Delivery is at-least-once, so implementations must be idempotent.
#[async_trait]
pub trait LifecycleObserver: Send + Sync + 'static {
    async fn on_lifecycle_event(&self, event: &LifecycleEvent);

    /// Name used in logs
    fn name(&self) -> &str;
}

struct ObserverWorker {
    name: String,
    sender: mpsc::UnboundedSender<Arc<LifecycleEvent>>,
    handle: JoinHandle<()>,
}

/// Fans lifecycle events out to observers. Each observer has its own
/// queue and task, so a slow observer never delays the dispatcher or the
/// other observers.
#[derive(Default)]
pub struct ObserverSet {
    workers: Vec<ObserverWorker>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer. Must be called inside a tokio runtime.
    pub fn add(&mut self, observer: Arc<dyn LifecycleObserver>) {
        let name = observer.name().to_string();
        let (sender, mut receiver) = mpsc::unbounded_channel::<Arc<LifecycleEvent>>();

        let worker_name = name.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                observer.on_lifecycle_event(&event).await;
            }
            debug!("Observer '{}' drained", worker_name);
        });

        debug!("Registered lifecycle observer '{}'", name);
        self.workers.push(ObserverWorker {
            name,
            sender,
            handle,
        });
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn notify(&self, event: LifecycleEvent) {
        let event = Arc::new(event);
        for worker in &self.workers {
            if worker.sender.send(Arc::clone(&event)).is_err() {
                warn!("Observer '{}' is gone, event not delivered", worker.name);
            }
        }
    }

    /// Close every queue and wait for observers to drain it.
    pub async fn shutdown(self) {
        for worker in self.workers {
            drop(worker.sender);
            if let Err(e) = worker.handle.await {
                error!("Observer '{}' terminated abnormally: {}", worker.name, e);
            }
        }
    }
}

/// Observer that writes lifecycle events to the tracing log.
pub struct LogObserver;

#[async_trait]
impl LifecycleObserver for LogObserver {
    async fn on_lifecycle_event(&self, event: &LifecycleEvent) {
        match &event.outcome {
            Outcome::Succeeded => info!("Lifecycle: {}", event.description()),
            Outcome::Skipped => debug!("Lifecycle: {}", event.description()),
            Outcome::Retrying { .. } => warn!("Lifecycle: {}", event.description()),
            Outcome::Failed { .. } => error!("Lifecycle: {}", event.description()),
        }
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Observer that appends lifecycle events as JSON lines to a file.
pub struct JournalObserver {
    file: Mutex<tokio::fs::File>,
}

impl JournalObserver {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())
            .await?;
        info!("Writing lifecycle journal to {}", path.as_ref().display());
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    async fn append(&self, event: &LifecycleEvent) -> Result<()> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl LifecycleObserver for JournalObserver {
    async fn on_lifecycle_event(&self, event: &LifecycleEvent) {
        if let Err(e) = self.append(event).await {
            error!("Failed to write lifecycle journal: {}", e);
        }
    }

    fn name(&self) -> &str {
        "journal"
    }
}
