//! Application lifecycle control.
//!
//! Restarts the deployed application so newly bound services take effect.

use crate::error::DeployError;
use crate::platform::PlatformClient;
use std::sync::Arc;
use tracing::info;

pub(crate) struct AppController {
    platform: Arc<dyn PlatformClient>,
}

impl AppController {
    pub(crate) fn new(platform: Arc<dyn PlatformClient>) -> Self {
        Self { platform }
    }

    /// Returns once the platform accepted the restart. Does not wait for the
    /// application to become healthy.
    pub(crate) async fn restart(&self, app_name: &str) -> Result<(), DeployError> {
        info!(app = app_name, "restarting application");
        self.platform.restart_application(app_name).await
    }
}
