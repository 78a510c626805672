use super::coalescer::Coalescer;
use super::Coordinator;
use crate::coalesce::CoalescingEngine;
use crate::error::{Result, SinkholeError};
use std::sync::Arc;
use tracing::info;

impl Coordinator {
    /// Spawn the coalescer and dispatcher tasks.
    pub fn start(&mut self) -> Result<()> {
        let dispatcher = self
            .dispatcher
            .take()
            .ok_or_else(|| SinkholeError::system("Coordinator already started"))?;

        let settings = &self.config.coordinator;
        info!(
            "Starting coordinator (debounce {:?}, max window {:?}, dispatch timeout {:?})",
            settings.debounce_interval(),
            settings.max_window(),
            self.config.dispatch.dispatch_timeout()
        );

        let coalescer = Coalescer {
            channel: Arc::clone(&self.channel),
            slot: Arc::clone(&self.slot),
            engine: CoalescingEngine::new(settings.debounce_interval(), settings.max_window()),
            bus: self.event_bus.clone(),
            stats: Arc::clone(&self.stats),
            cancel: self.cancellation_token.child_token(),
        };
        let stop_on_shutdown = settings.stop_on_shutdown;

        self.coalescer_task = Some(tokio::spawn(coalescer.run()));
        self.dispatcher_task = Some(tokio::spawn(dispatcher.run(stop_on_shutdown)));

        info!("Coordinator started");
        Ok(())
    }
}
