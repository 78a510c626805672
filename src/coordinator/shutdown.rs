use super::Coordinator;
use crate::error::Result;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

const SOURCE_STOP_TIMEOUT: Duration = Duration::from_secs(5);

impl Coordinator {
    /// Graceful shutdown.
    ///
    /// Closes the channel, discards the open window and any pending
    /// reload, lets an in-flight transition finish and drains a pending
    /// stop, stops the service if configured to, then joins every task.
    pub async fn shutdown(&mut self) -> Result<()> {
        info!("Beginning coordinator shutdown");

        self.channel.close();
        self.cancellation_token.cancel();

        for (name, mut handle) in self.source_tasks.drain(..) {
            match timeout(SOURCE_STOP_TIMEOUT, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Trigger source '{}' terminated abnormally: {}", name, e),
                Err(_) => {
                    warn!("Trigger source '{}' ignored cancellation, aborting", name);
                    handle.abort();
                }
            }
        }

        if let Some(handle) = self.coalescer_task.take() {
            if let Err(e) = handle.await {
                error!("Coalescer task terminated abnormally: {}", e);
            }
        }

        // A waiting stop stays for the dispatcher; anything else is dropped
        self.slot.close();

        if let Some(handle) = self.dispatcher_task.take() {
            if let Err(e) = handle.await {
                error!("Dispatcher task terminated abnormally: {}", e);
            }
        }

        // Never started: drop the dispatcher so observer queues close
        self.dispatcher.take();

        info!("Coordinator shutdown complete, service {}", self.state());
        Ok(())
    }
}
