use super::{Coordinator, ShutdownReason};
use crate::error::{Result, SinkholeError};
use crate::events::CoordinatorEvent;
use tokio::signal;
use tracing::{error, info};

impl Coordinator {
    /// Start if needed, run until a signal or a [`super::ShutdownTrigger`] fires,
    /// then shut down gracefully.
    pub async fn run(&mut self) -> Result<ShutdownReason> {
        if !self.is_started() {
            self.start()?;
        }

        let shutdown_receiver =
            self.shutdown_receiver
                .take()
                .ok_or_else(|| SinkholeError::System {
                    message: "Shutdown receiver already taken".to_string(),
                })?;

        self.setup_signal_handlers();
        info!("Coordinator is running");

        let reason = shutdown_receiver.await.map_err(|_| SinkholeError::System {
            message: "Shutdown channel closed unexpectedly".to_string(),
        })?;

        info!("Shutdown initiated: {}", reason);
        self.event_bus.publish(CoordinatorEvent::ShutdownRequested {
            reason: reason.to_string(),
        });

        self.shutdown().await?;
        Ok(reason)
    }

    fn setup_signal_handlers(&self) {
        // Handle SIGTERM (systemd stop) - Unix only
        #[cfg(unix)]
        {
            let trigger = self.shutdown_trigger();
            tokio::spawn(async move {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        if sigterm.recv().await.is_some() {
                            info!("Received SIGTERM signal");
                            trigger.trigger(ShutdownReason::Signal("SIGTERM".to_string()));
                        }
                    }
                    Err(e) => error!("Failed to register SIGTERM handler: {}", e),
                }
            });
        }

        // Handle SIGINT (Ctrl+C) - Cross-platform
        let trigger = self.shutdown_trigger();
        tokio::spawn(async move {
            if let Ok(()) = signal::ctrl_c().await {
                info!("Received SIGINT signal (Ctrl+C)");
                trigger.trigger(ShutdownReason::Signal("SIGINT".to_string()));
            }
        });
    }
}
