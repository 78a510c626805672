use super::CoordinatorStats;
use crate::channel::TriggerChannel;
use crate::coalesce::{CoalescedRequest, CoalescingEngine, FoldOutcome};
use crate::dispatch::{Offer, PendingSlot};
use crate::events::{CoordinatorEvent, EventBus};
use crate::trigger::TriggerEvent;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Background task feeding the coalescing engine from the trigger channel
/// and handing closed windows to the dispatcher.
pub(super) struct Coalescer {
    pub(super) channel: Arc<TriggerChannel>,
    pub(super) slot: Arc<PendingSlot>,
    pub(super) engine: CoalescingEngine,
    pub(super) bus: EventBus,
    pub(super) stats: Arc<CoordinatorStats>,
    pub(super) cancel: CancellationToken,
}

impl Coalescer {
    pub(super) async fn run(mut self) {
        debug!(
            "Coalescer started (debounce {:?})",
            self.engine.debounce_interval()
        );

        loop {
            let deadline = self.engine.deadline();

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,
                _ = window_deadline(deadline) => self.flush(),
                event = self.channel.recv() => match event {
                    Some(event) => self.fold(event),
                    None => break,
                },
            }
        }

        let discarded = self.engine.discard();
        if !discarded.is_empty() {
            let reasons = discarded
                .iter()
                .map(|reason| reason.describe())
                .collect::<Vec<_>>()
                .join(", ");
            info!("Discarded open window on shutdown: {}", reasons);
        }

        let undelivered = self.channel.len();
        if undelivered > 0 {
            info!("Discarded {} undelivered trigger(s) on shutdown", undelivered);
        }

        debug!("Coalescer stopped");
    }

    fn fold(&mut self, event: TriggerEvent) {
        let reason = event.reason.clone();

        match self.engine.fold(event, Instant::now()) {
            FoldOutcome::Opened { .. } => {
                self.stats.record_window_opened();
                self.bus.publish(CoordinatorEvent::WindowOpened { reason });
            }
            FoldOutcome::Folded { .. } => {}
            FoldOutcome::Preempted(request) => {
                self.stats.record_stop_preemption();
                self.bus.publish(CoordinatorEvent::StopPreempted {
                    request_id: request.id,
                    superseded: request.superseded.len(),
                });
                self.hand_off(request);
            }
        }
    }

    fn flush(&mut self) {
        if let Some(request) = self.engine.close_if_due(Instant::now()) {
            self.stats.record_request_coalesced();
            self.bus.publish(CoordinatorEvent::WindowClosed {
                request_id: request.id,
                reasons: request.reasons.len(),
            });
            self.hand_off(request);
        }
    }

    fn hand_off(&self, request: CoalescedRequest) {
        let request_id = request.id;
        match self.slot.offer(request) {
            Offer::Queued => debug!("Request {} queued for dispatch", request_id),
            Offer::Merged => {
                self.stats.record_request_merged();
                self.bus
                    .publish(CoordinatorEvent::RequestMerged { request_id });
            }
            Offer::Rejected => warn!("Request {} dropped: dispatcher is shutting down", request_id),
        }
    }
}

async fn window_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
