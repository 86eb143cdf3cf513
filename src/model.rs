use crate::error::DeployError;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    pub api_url: String,
    #[serde(skip_serializing, default)]
    pub token: Option<String>,
    pub space_guid: String,
    pub offering: String,
    pub service_instance: String,
    pub app_name: String,
    pub plan: PlanSelector,
    pub artifact: PathBuf,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    pub user_agent: String,
    pub skip_tls_verify: bool,
}

/// How a plan is picked from the matched service offering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanSelector {
    /// First plan flagged as free.
    Free,
    /// First plan with this name (case-insensitive).
    Named(String),
}

impl PlanSelector {
    pub fn matches(&self, plan: &ServicePlan) -> bool {
        match self {
            PlanSelector::Free => plan.is_free,
            PlanSelector::Named(name) => plan.name.eq_ignore_ascii_case(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePlan {
    pub name: String,
    pub is_free: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceOffering {
    pub label: String,
    pub plans: Vec<ServicePlan>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstanceSummary {
    pub name: String,
}

/// Everything the platform needs to upload and register one application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushSpec {
    pub application_name: String,
    /// Always absolute by the time it reaches the platform client.
    pub artifact_path: PathBuf,
    pub replica_count: NonZeroU32,
    pub defer_start: bool,
    pub use_random_route: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppState {
    Started,
    Stopped,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationDetail {
    pub name: String,
    pub state: AppState,
}

/// Pipeline position. Transitions only move forward, or to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeployStage {
    Start,
    ServiceEnsured,
    Published,
    Bound,
    Restarted,
    Deployed,
    Failed,
}

impl DeployStage {
    pub fn as_str(self) -> &'static str {
        match self {
            DeployStage::Start => "start",
            DeployStage::ServiceEnsured => "service ensured",
            DeployStage::Published => "published",
            DeployStage::Bound => "bound",
            DeployStage::Restarted => "restarted",
            DeployStage::Deployed => "deployed",
            DeployStage::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, DeployStage::Deployed | DeployStage::Failed)
    }
}

impl std::fmt::Display for DeployStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub enum DeployEvent {
    StageEntered {
        stage: DeployStage,
    },
    Finished {
        // Boxed so the common StageEntered variant stays small.
        outcome: Box<DeploymentOutcome>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentOutcome {
    pub application_name: String,
    pub service_name: String,
    pub elapsed_millis: u64,
    pub success: bool,
    #[serde(default)]
    pub failure_reason: Option<String>,
    /// Last stage reached before the failing step, if the run failed.
    #[serde(default)]
    pub failed_after: Option<DeployStage>,
    #[serde(default)]
    pub finished_at_utc: String,
    #[serde(skip)]
    pub error: Option<DeployError>,
}
