use crate::coalesce::CoalescedRequest;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, info};

/// Result of offering a request to the slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// The slot was empty
    Queued,
    /// The request was merged into the one already waiting
    Merged,
    /// The slot is closed and the request was dropped
    Rejected,
}

#[derive(Default)]
struct SlotState {
    pending: Option<CoalescedRequest>,
    closed: bool,
}

/// Capacity-1 buffer between the coalescer and the dispatcher.
///
/// A request offered while another one is waiting is merged into it, so
/// the backlog never grows beyond one request.
#[derive(Default)]
pub struct PendingSlot {
    state: Mutex<SlotState>,
    available: Notify,
    stop_offered: Notify,
}

impl PendingSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offer(&self, request: CoalescedRequest) -> Offer {
        let is_stop = request.is_stop();
        let offer = {
            let mut state = self.state.lock();
            if state.closed {
                debug!("Pending slot closed, dropping request {}", request.id);
                return Offer::Rejected;
            }

            match state.pending.take() {
                None => {
                    state.pending = Some(request);
                    Offer::Queued
                }
                Some(existing) => {
                    let merged = existing.merge(request);
                    debug!(
                        "Merged into pending request {} ({:?}): {}",
                        merged.id,
                        merged.command,
                        merged.summary()
                    );
                    state.pending = Some(merged);
                    Offer::Merged
                }
            }
        };

        self.available.notify_one();
        if is_stop {
            self.stop_offered.notify_one();
        }
        offer
    }

    /// Take the waiting request, if any.
    pub fn take(&self) -> Option<CoalescedRequest> {
        self.state.lock().pending.take()
    }

    /// Wait for the next request. Returns `None` once the slot is closed
    /// and empty.
    pub async fn next(&self) -> Option<CoalescedRequest> {
        loop {
            let notified = self.available.notified();
            {
                let mut state = self.state.lock();
                if let Some(request) = state.pending.take() {
                    return Some(request);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Whether the waiting request is a stop
    pub fn has_stop(&self) -> bool {
        self.state
            .lock()
            .pending
            .as_ref()
            .is_some_and(CoalescedRequest::is_stop)
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().pending.is_none()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Resolves once a stop is waiting or the slot is closed. Used to cut a
    /// retry backoff short.
    pub async fn stop_requested(&self) {
        loop {
            let notified = self.stop_offered.notified();
            {
                let state = self.state.lock();
                if state.closed || state.pending.as_ref().is_some_and(CoalescedRequest::is_stop) {
                    return;
                }
            }
            notified.await;
        }
    }

    /// Close the slot. A waiting stop is kept for the dispatcher to drain;
    /// anything else is discarded and returned.
    pub fn close(&self) -> Option<CoalescedRequest> {
        let discarded = {
            let mut state = self.state.lock();
            state.closed = true;
            if state.pending.as_ref().is_some_and(CoalescedRequest::is_stop) {
                None
            } else {
                state.pending.take()
            }
        };

        if let Some(request) = &discarded {
            info!(
                "Discarded pending {:?} request on shutdown: {}",
                request.command,
                request.summary()
            );
        } else if self.has_stop() {
            info!("Slot closed with a pending stop, draining it before exit");
        }

        self.available.notify_waiters();
        self.stop_offered.notify_waiters();
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reason::{Command, Reason};
    use crate::trigger::{ProducerId, TriggerEvent};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    fn request(reason: Reason) -> CoalescedRequest {
        CoalescedRequest::immediate(&TriggerEvent::new(reason, ProducerId::new("test")), Instant::now())
    }

    #[tokio::test]
    async fn test_second_offer_merges() {
        let slot = PendingSlot::new();
        assert_eq!(slot.offer(request(Reason::PackageAdded)), Offer::Queued);
        assert_eq!(slot.offer(request(Reason::RuleChanged)), Offer::Merged);

        let pending = slot.take().unwrap();
        assert_eq!(pending.reasons, vec![Reason::PackageAdded, Reason::RuleChanged]);
        assert_eq!(pending.command, Command::Reload);
        assert!(slot.is_empty());
    }

    #[tokio::test]
    async fn test_stop_cancels_pending_reload() {
        let slot = PendingSlot::new();
        slot.offer(request(Reason::RuleChanged));
        slot.offer(request(Reason::SwitchOff));

        assert!(slot.has_stop());
        let pending = slot.take().unwrap();
        assert!(pending.is_stop());
        assert_eq!(pending.superseded, vec![Reason::RuleChanged]);
    }

    #[tokio::test]
    async fn test_pending_stop_survives_later_start() {
        let slot = PendingSlot::new();
        slot.offer(request(Reason::SwitchOff));
        assert_eq!(slot.offer(request(Reason::Receiver)), Offer::Merged);

        assert!(slot.has_stop());
        let pending = slot.take().unwrap();
        assert!(pending.is_stop());
        assert_eq!(pending.reasons, vec![Reason::SwitchOff]);
        assert_eq!(pending.superseded, vec![Reason::Receiver]);
    }

    #[tokio::test]
    async fn test_next_waits_for_offer() {
        let slot = Arc::new(PendingSlot::new());
        let waiter = {
            let slot = Arc::clone(&slot);
            tokio::spawn(async move { slot.next().await })
        };

        tokio::task::yield_now().await;
        slot.offer(request(Reason::Pull));

        let received = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(received.reasons, vec![Reason::Pull]);
    }

    #[tokio::test]
    async fn test_close_discards_and_ends_next() {
        let slot = PendingSlot::new();
        slot.offer(request(Reason::NetworkLost));

        let discarded = slot.close().unwrap();
        assert_eq!(discarded.reasons, vec![Reason::NetworkLost]);
        assert!(slot.next().await.is_none());
        assert_eq!(slot.offer(request(Reason::Pull)), Offer::Rejected);
    }

    #[tokio::test]
    async fn test_close_keeps_pending_stop() {
        let slot = PendingSlot::new();
        slot.offer(request(Reason::SwitchOff));

        assert!(slot.close().is_none());
        assert!(slot.is_closed());
        let drained = slot.next().await.unwrap();
        assert!(drained.is_stop());
        assert!(slot.next().await.is_none());
    }

    #[tokio::test]
    async fn test_stop_requested_ignores_reloads() {
        let slot = Arc::new(PendingSlot::new());
        slot.offer(request(Reason::RuleChanged));

        let quick = tokio::time::timeout(Duration::from_millis(20), slot.stop_requested()).await;
        assert!(quick.is_err());

        slot.offer(request(Reason::SwitchOff));
        tokio::time::timeout(Duration::from_secs(1), slot.stop_requested())
            .await
            .unwrap();
    }
}
