//! Guarantees the backing service instance exists before anything binds to it.

use crate::error::DeployError;
use crate::model::{ServiceInstanceSummary, ServiceOffering, ServicePlan};
use crate::platform::PlatformClient;
use futures::{future, TryStreamExt};
use std::sync::Arc;
use tracing::{debug, info};

pub(crate) struct ServiceProvisioner {
    platform: Arc<dyn PlatformClient>,
}

impl ServiceProvisioner {
    pub(crate) fn new(platform: Arc<dyn PlatformClient>) -> Self {
        Self { platform }
    }

    /// Return the instance named `instance_name`, creating it from the first
    /// plan of `offering_label` accepted by `plan_selector` if it is missing.
    ///
    /// The instance lookup and the offering lookup run concurrently; the
    /// offering result is only consulted when no instance exists, so once the
    /// instance is there repeated calls never create anything.
    pub(crate) async fn ensure_service_instance<P>(
        &self,
        offering_label: &str,
        instance_name: &str,
        plan_selector: P,
    ) -> Result<ServiceInstanceSummary, DeployError>
    where
        P: Fn(&ServicePlan) -> bool,
    {
        let (existing, offerings) = future::join(
            self.matching_instances(instance_name),
            self.matching_offerings(offering_label),
        )
        .await;

        if let Some(found) = single_match(instance_name, existing?)? {
            debug!(instance = %found.name, "service instance already exists");
            return Ok(found);
        }

        let offering = offerings?
            .into_iter()
            .next()
            .ok_or_else(|| DeployError::ServiceOfferingNotFound(offering_label.to_string()))?;
        let plan = offering
            .plans
            .iter()
            .find(|p| plan_selector(*p))
            .ok_or_else(|| DeployError::NoMatchingPlan {
                offering: offering.label.clone(),
            })?;

        info!(
            offering = %offering.label,
            plan = %plan.name,
            instance = instance_name,
            "creating service instance"
        );
        self.platform
            .create_service_instance(&offering.label, &plan.name, instance_name)
            .await?;

        // A concurrent creator can make this zero or several; both are errors.
        single_match(instance_name, self.matching_instances(instance_name).await?)?
            .ok_or_else(|| DeployError::ServiceInstanceMissing(instance_name.to_string()))
    }

    async fn matching_instances(
        &self,
        name: &str,
    ) -> Result<Vec<ServiceInstanceSummary>, DeployError> {
        self.platform
            .list_service_instances()
            .try_filter(|si| future::ready(si.name.eq_ignore_ascii_case(name)))
            .try_collect()
            .await
    }

    async fn matching_offerings(&self, label: &str) -> Result<Vec<ServiceOffering>, DeployError> {
        self.platform
            .list_service_offerings()
            .try_filter(|so| future::ready(so.label.eq_ignore_ascii_case(label)))
            .try_collect()
            .await
    }
}

fn single_match(
    name: &str,
    mut found: Vec<ServiceInstanceSummary>,
) -> Result<Option<ServiceInstanceSummary>, DeployError> {
    match found.len() {
        0 => Ok(None),
        1 => Ok(found.pop()),
        count => Err(DeployError::AmbiguousServiceInstance {
            name: name.to_string(),
            count,
        }),
    }
}
