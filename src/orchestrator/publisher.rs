//! Uploads the artifact and returns the platform's view of the application.

use crate::error::DeployError;
use crate::model::{ApplicationDetail, PushSpec};
use crate::platform::PlatformClient;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub(crate) struct ArtifactPublisher {
    platform: Arc<dyn PlatformClient>,
}

impl ArtifactPublisher {
    pub(crate) fn new(platform: Arc<dyn PlatformClient>) -> Self {
        Self { platform }
    }

    /// Push `artifact_path` as `app_name` on a random route, then re-read the
    /// application by name.
    ///
    /// The artifact is checked before any remote call is made.
    pub(crate) async fn publish(
        &self,
        app_name: &str,
        replica_count: NonZeroU32,
        artifact_path: &Path,
        defer_start: bool,
    ) -> Result<ApplicationDetail, DeployError> {
        let spec = PushSpec {
            application_name: app_name.to_string(),
            artifact_path: readable_artifact(artifact_path).await?,
            replica_count,
            defer_start,
            use_random_route: true,
        };

        info!(
            app = app_name,
            artifact = %spec.artifact_path.display(),
            replicas = replica_count.get(),
            defer_start,
            "pushing application"
        );
        self.platform.push_application(&spec).await?;

        let detail = self.platform.get_application(app_name).await?;
        if detail.name != app_name {
            return Err(DeployError::platform(format!(
                "platform returned application '{}' after pushing '{app_name}'",
                detail.name
            )));
        }
        Ok(detail)
    }
}

/// Absolute path of an existing, readable artifact file.
pub(crate) async fn readable_artifact(path: &Path) -> Result<PathBuf, DeployError> {
    let missing = || DeployError::ArtifactNotFound(path.to_path_buf());
    let meta = tokio::fs::metadata(path).await.map_err(|_| missing())?;
    if !meta.is_file() {
        return Err(missing());
    }
    tokio::fs::File::open(path).await.map_err(|_| missing())?;
    tokio::fs::canonicalize(path).await.map_err(|_| missing())
}
