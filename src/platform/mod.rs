//! Platform capability surface consumed by the deployment pipeline.
//!
//! The pipeline only talks to the platform through [`PlatformClient`]; the HTTP
//! implementation speaks the Cloud Foundry v3 API.

#[cfg(test)]
pub(crate) mod fake;
mod http;
#[cfg(test)]
mod stub;

pub use http::CloudFoundryClient;

use crate::error::DeployError;
use crate::model::{ApplicationDetail, PushSpec, ServiceInstanceSummary, ServiceOffering};
use async_trait::async_trait;
use futures::stream::BoxStream;

pub type PlatformStream<'a, T> = BoxStream<'a, Result<T, DeployError>>;

#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// All service instances visible in the target space.
    fn list_service_instances(&self) -> PlatformStream<'_, ServiceInstanceSummary>;

    /// Marketplace offerings with their plans.
    fn list_service_offerings(&self) -> PlatformStream<'_, ServiceOffering>;

    async fn create_service_instance(
        &self,
        offering_label: &str,
        plan_name: &str,
        instance_name: &str,
    ) -> Result<(), DeployError>;

    async fn push_application(&self, spec: &PushSpec) -> Result<(), DeployError>;

    async fn get_application(&self, app_name: &str) -> Result<ApplicationDetail, DeployError>;

    /// Fails with [`DeployError::BindConflict`] when the pair is already bound.
    async fn bind_service(&self, app_name: &str, instance_name: &str) -> Result<(), DeployError>;

    /// Returns once the restart was accepted, not once the app is healthy.
    async fn restart_application(&self, app_name: &str) -> Result<(), DeployError>;
}
