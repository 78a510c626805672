//! Submission side of the coordinator.
//!
//! Platform callbacks (connectivity, package broadcasts, UI actions) are
//! modelled as producers that push [`TriggerEvent`]s into the shared
//! [`TriggerChannel`]. Long-lived callback sources implement
//! [`TriggerSource`] and are driven by the coordinator until shutdown.

use crate::channel::{SubmitOutcome, TriggerChannel};
use crate::error::Result;
use crate::events::{CoordinatorEvent, EventBus};
use crate::reason::{Command, Reason};
use crate::trigger::{ProducerId, TriggerEvent};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Push an event into the channel and report an overflow on the bus.
pub(crate) fn submit_event(
    channel: &TriggerChannel,
    bus: &EventBus,
    event: TriggerEvent,
) -> Result<SubmitOutcome> {
    let outcome = channel.submit(event)?;
    if let SubmitOutcome::AcceptedWithDrop { dropped } = &outcome {
        bus.publish(CoordinatorEvent::TriggerDropped {
            producer: dropped.origin.to_string(),
            reason: dropped.reason.clone(),
        });
    }
    Ok(outcome)
}

/// Cheap, clonable submission handle bound to one producer id.
#[derive(Clone)]
pub struct Producer {
    id: ProducerId,
    channel: Arc<TriggerChannel>,
    bus: EventBus,
}

impl Producer {
    pub(crate) fn new(id: ProducerId, channel: Arc<TriggerChannel>, bus: EventBus) -> Self {
        Self { id, channel, bus }
    }

    pub fn id(&self) -> &ProducerId {
        &self.id
    }

    /// Submit a reason with its default command. Fire-and-forget: only a
    /// closed coordinator is reported as an error.
    pub fn submit(&self, reason: Reason) -> Result<SubmitOutcome> {
        let event = TriggerEvent::new(reason, self.id.clone());
        submit_event(&self.channel, &self.bus, event)
    }

    /// Submit a reason with an explicit command, e.g. a UI switch turning
    /// filtering off.
    pub fn submit_command(&self, reason: Reason, command: Command) -> Result<SubmitOutcome> {
        let event = TriggerEvent::with_command(reason, command, self.id.clone());
        submit_event(&self.channel, &self.bus, event)
    }

    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }
}

/// A long-running source of triggers, such as an OS callback registration.
#[async_trait]
pub trait TriggerSource: Send + 'static {
    /// Producer id the source submits under
    fn name(&self) -> &str;

    /// Emit triggers through `producer` until `cancel` fires or the source
    /// runs dry.
    async fn run(self: Box<Self>, producer: Producer, cancel: CancellationToken) -> Result<()>;
}
