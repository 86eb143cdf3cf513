use std::path::PathBuf;
use thiserror::Error;

/// Failures that abort a deployment run.
///
/// Every stage hands these back to the orchestrator unchanged; nothing is
/// retried or rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeployError {
    #[error("artifact not found or not readable: {}", .0.display())]
    ArtifactNotFound(PathBuf),

    #[error("no plan of service offering '{offering}' satisfies the plan selector")]
    NoMatchingPlan { offering: String },

    #[error("service offering '{0}' not found in the marketplace")]
    ServiceOfferingNotFound(String),

    #[error("service instance '{0}' is not visible after creation")]
    ServiceInstanceMissing(String),

    #[error("{count} service instances match the name '{name}'")]
    AmbiguousServiceInstance { name: String, count: usize },

    #[error("application '{app}' is already bound to service instance '{instance}'")]
    BindConflict { app: String, instance: String },

    #[error("platform API error{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    PlatformApi {
        status: Option<u16>,
        message: String,
    },
}

impl DeployError {
    pub fn platform(message: impl Into<String>) -> Self {
        Self::PlatformApi {
            status: None,
            message: message.into(),
        }
    }

    pub fn platform_status(status: u16, message: impl Into<String>) -> Self {
        Self::PlatformApi {
            status: Some(status),
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for DeployError {
    fn from(err: reqwest::Error) -> Self {
        Self::PlatformApi {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for DeployError {
    fn from(err: serde_json::Error) -> Self {
        Self::platform(format!("unexpected response body: {err}"))
    }
}
