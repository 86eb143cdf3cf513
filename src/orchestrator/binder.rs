use crate::error::DeployError;
use crate::platform::PlatformClient;
use std::sync::Arc;
use tracing::info;

/// Attaches a service instance to an application.
///
/// There is no check for an existing binding; binding the same pair twice is
/// reported by the platform as [`DeployError::BindConflict`].
pub(crate) struct ServiceBinder {
    platform: Arc<dyn PlatformClient>,
}

impl ServiceBinder {
    pub(crate) fn new(platform: Arc<dyn PlatformClient>) -> Self {
        Self { platform }
    }

    pub(crate) async fn bind(&self, app_name: &str, instance_name: &str) -> Result<(), DeployError> {
        info!(app = app_name, instance = instance_name, "binding service");
        self.platform.bind_service(app_name, instance_name).await
    }
}
