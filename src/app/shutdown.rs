use super::Controller;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info};

impl Controller {
    /// Stop detection, release the camera and stop the heartbeat
    pub async fn shutdown(&mut self) -> i32 {
        info!("Beginning graceful shutdown");

        self.cancellation_token.cancel();
        self.detection.disable();

        let mut exit_code = 0;
        if timeout(Duration::from_secs(10), self.session.stop())
            .await
            .is_err()
        {
            error!("Timed out releasing the camera");
            exit_code = 1;
        }

        self.monitor.stop();

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        exit_code
    }
}
