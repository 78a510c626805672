use crate::error::{Result, SinkholeError};
use crate::trigger::{ProducerId, TriggerEvent};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

/// Ingestion point for trigger events from any number of producers.
///
/// Each producer gets its own bounded FIFO. When a producer's queue is full
/// the oldest event of that producer is dropped so the newest cause is
/// always kept. Delivery is FIFO per producer; across producers events come
/// out in submission order.
pub struct TriggerChannel {
    state: Mutex<ChannelState>,
    notify: Notify,
    capacity: usize,
    next_seq: AtomicU64,
    stats: ChannelStats,
}

struct ChannelState {
    queues: HashMap<ProducerId, VecDeque<Queued>>,
    closed: bool,
}

struct Queued {
    seq: u64,
    event: TriggerEvent,
}

/// Result of a successful submission.
#[derive(Debug)]
pub enum SubmitOutcome {
    Accepted,
    /// The producer's queue was full and its oldest event was discarded.
    AcceptedWithDrop { dropped: TriggerEvent },
}

/// Statistics for channel monitoring
#[derive(Debug, Default)]
pub struct ChannelStats {
    pub submitted: AtomicU64,
    pub delivered: AtomicU64,
    pub dropped: AtomicU64,
}

/// Snapshot of channel statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStatsSnapshot {
    pub submitted: u64,
    pub delivered: u64,
    pub dropped: u64,
}

impl ChannelStats {
    pub fn snapshot(&self) -> ChannelStatsSnapshot {
        ChannelStatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

impl TriggerChannel {
    /// Create a channel holding at most `capacity` undelivered events per producer.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        debug!("Created trigger channel with per-producer capacity {}", capacity);

        Self {
            state: Mutex::new(ChannelState {
                queues: HashMap::new(),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
            next_seq: AtomicU64::new(0),
            stats: ChannelStats::default(),
        }
    }

    /// Submit an event. Never blocks and never rejects a well-formed event
    /// while the channel is open.
    pub fn submit(&self, event: TriggerEvent) -> Result<SubmitOutcome> {
        let outcome = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(SinkholeError::ChannelClosed);
            }

            // Sequence is taken under the lock so per-producer order and
            // global order agree.
            let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
            let queue = state.queues.entry(event.origin.clone()).or_default();

            let dropped = if queue.len() >= self.capacity {
                queue.pop_front().map(|queued| queued.event)
            } else {
                None
            };

            trace!("Queued trigger #{}: {}", seq, event.description());
            queue.push_back(Queued { seq, event });

            match dropped {
                Some(dropped) => SubmitOutcome::AcceptedWithDrop { dropped },
                None => SubmitOutcome::Accepted,
            }
        };

        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        if let SubmitOutcome::AcceptedWithDrop { dropped } = &outcome {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            let overflow = SinkholeError::ChannelOverflow {
                producer: dropped.origin.to_string(),
                dropped: 1,
            };
            warn!("{} (dropped: {})", overflow, dropped.reason.describe());
        }

        self.notify.notify_one();
        Ok(outcome)
    }

    /// Take the oldest undelivered event across all producers, if any.
    pub fn try_recv(&self) -> Option<TriggerEvent> {
        let mut state = self.state.lock();

        let producer = state
            .queues
            .iter()
            .filter_map(|(producer, queue)| queue.front().map(|head| (head.seq, producer)))
            .min_by_key(|(seq, _)| *seq)
            .map(|(_, producer)| producer.clone())?;

        let queue = state.queues.get_mut(&producer)?;
        let queued = queue.pop_front()?;
        if queue.is_empty() {
            state.queues.remove(&producer);
        }
        drop(state);

        self.stats.delivered.fetch_add(1, Ordering::Relaxed);
        Some(queued.event)
    }

    /// Wait for the next event. Returns `None` once the channel is closed
    /// and drained.
    pub async fn recv(&self) -> Option<TriggerEvent> {
        loop {
            if let Some(event) = self.try_recv() {
                return Some(event);
            }
            if self.is_closed() {
                return None;
            }
            // notify_one stores a permit, so a submit racing with this
            // check still wakes us.
            self.notify.notified().await;
        }
    }

    /// Stop accepting events. Already queued events can still be received.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if !state.closed {
            state.closed = true;
            debug!("Trigger channel closed");
        }
        drop(state);
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of undelivered events across all producers.
    pub fn len(&self) -> usize {
        self.state.lock().queues.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> ChannelStatsSnapshot {
        self.stats.snapshot()
    }
}
