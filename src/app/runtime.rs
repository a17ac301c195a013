use super::{Controller, ShutdownReason};
use crate::error::Result;
use tokio::signal;
use tracing::{info, warn};

impl Controller {
    /// Run until a signal or a shutdown request, then shut down gracefully
    pub async fn run(&mut self) -> Result<i32> {
        info!("Pillocam is running");

        self.setup_signal_handlers();

        let reason = match self.event_loop().await {
            Ok(reason) => reason,
            Err(e) => ShutdownReason::Error(e.to_string()),
        };

        info!("Shutdown initiated: {:?}", reason);
        let exit_code = self.shutdown().await;

        info!("Pillocam shutdown complete");
        Ok(exit_code)
    }

    /// Set up signal handlers for graceful shutdown
    fn setup_signal_handlers(&self) {
        // Handle SIGTERM (systemd stop) - Unix only
        #[cfg(unix)]
        {
            let sender = self.sender.clone();
            tokio::spawn(async move {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        if sigterm.recv().await.is_some() {
                            info!("Received SIGTERM signal");
                            let _ = sender
                                .send(super::ControlEvent::Shutdown(ShutdownReason::Signal(
                                    "SIGTERM".to_string(),
                                )))
                                .await;
                        }
                    }
                    Err(e) => warn!("Failed to register SIGTERM handler: {}", e),
                }
            });
        }

        // Handle SIGINT (Ctrl+C) - Cross-platform
        let sender = self.sender.clone();
        tokio::spawn(async move {
            if let Ok(()) = signal::ctrl_c().await {
                info!("Received SIGINT signal (Ctrl+C)");
                let _ = sender
                    .send(super::ControlEvent::Shutdown(ShutdownReason::Signal(
                        "SIGINT".to_string(),
                    )))
                    .await;
            }
        });
    }
}
