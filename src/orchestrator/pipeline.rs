//! End-to-end deployment pipeline.
//!
//! `START → SERVICE_ENSURED → PUBLISHED → BOUND → RESTARTED → DEPLOYED`, or
//! `FAILED` from whichever stage was reached when a step returned an error.

use super::{
    readable_artifact, AppController, ArtifactPublisher, CompletionReporter, ServiceBinder,
    ServiceProvisioner,
};
use crate::error::DeployError;
use crate::model::{DeployConfig, DeployEvent, DeployStage, DeploymentOutcome, PlanSelector};
use crate::platform::PlatformClient;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, Instrument};

/// What to deploy and which service it needs.
#[derive(Debug, Clone)]
pub(crate) struct DeployRequest {
    pub offering: String,
    pub service_instance: String,
    pub app_name: String,
    pub artifact: PathBuf,
    pub plan: PlanSelector,
}

impl DeployRequest {
    pub(crate) fn from_config(cfg: &DeployConfig) -> Self {
        Self {
            offering: cfg.offering.clone(),
            service_instance: cfg.service_instance.clone(),
            app_name: cfg.app_name.clone(),
            artifact: cfg.artifact.clone(),
            plan: cfg.plan.clone(),
        }
    }
}

pub(crate) struct Orchestrator {
    provisioner: ServiceProvisioner,
    publisher: ArtifactPublisher,
    binder: ServiceBinder,
    controller: AppController,
    reporter: Arc<dyn CompletionReporter>,
    event_tx: Option<UnboundedSender<DeployEvent>>,
}

impl Orchestrator {
    pub(crate) fn new(
        platform: Arc<dyn PlatformClient>,
        reporter: Arc<dyn CompletionReporter>,
    ) -> Self {
        Self {
            provisioner: ServiceProvisioner::new(platform.clone()),
            publisher: ArtifactPublisher::new(platform.clone()),
            binder: ServiceBinder::new(platform.clone()),
            controller: AppController::new(platform),
            reporter,
            event_tx: None,
        }
    }

    /// Emit stage transitions and the final outcome on `tx`.
    pub(crate) fn with_events(mut self, tx: UnboundedSender<DeployEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Run the whole pipeline once. Never retries and never undoes a stage.
    pub(crate) async fn deploy(&self, req: &DeployRequest) -> DeploymentOutcome {
        let span = tracing::info_span!(
            "deploy",
            app = %req.app_name,
            service = %req.service_instance
        );
        self.deploy_inner(req).instrument(span).await
    }

    async fn deploy_inner(&self, req: &DeployRequest) -> DeploymentOutcome {
        let start = Instant::now();
        let mut reached = DeployStage::Start;
        self.emit(DeployEvent::StageEntered { stage: reached });

        let result = self.run_stages(req, &mut reached).await;
        let elapsed_millis = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        let (success, failure_reason, failed_after, error) = match result {
            Ok(()) => {
                self.advance(&mut reached, DeployStage::Deployed);
                (true, None, None, None)
            }
            Err(e) => {
                debug!(stage = %reached, error = %e, "deployment aborted");
                let failed_after = reached;
                self.advance(&mut reached, DeployStage::Failed);
                (false, Some(e.to_string()), Some(failed_after), Some(e))
            }
        };

        let outcome = DeploymentOutcome {
            application_name: req.app_name.clone(),
            service_name: req.service_instance.clone(),
            elapsed_millis,
            success,
            failure_reason,
            failed_after,
            finished_at_utc: time::OffsetDateTime::now_utc()
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_else(|_| "now".into()),
            error,
        };

        self.reporter.report(&outcome);
        self.emit(DeployEvent::Finished {
            outcome: Box::new(outcome.clone()),
        });
        outcome
    }

    /// Each step starts only after the previous one succeeded; the first error
    /// ends the run with `reached` left at the last completed stage.
    ///
    /// A missing artifact fails the run before anything is created remotely.
    async fn run_stages(
        &self,
        req: &DeployRequest,
        reached: &mut DeployStage,
    ) -> Result<(), DeployError> {
        readable_artifact(&req.artifact).await?;

        let service = self
            .provisioner
            .ensure_service_instance(&req.offering, &req.service_instance, |plan| {
                req.plan.matches(plan)
            })
            .await?;
        self.advance(reached, DeployStage::ServiceEnsured);

        debug!(instance = %service.name, "service instance ready");

        let app = self
            .publisher
            .publish(&req.app_name, NonZeroU32::MIN, &req.artifact, true)
            .await?;
        info!(app = %app.name, state = ?app.state, "application published");
        self.advance(reached, DeployStage::Published);

        self.binder.bind(&req.app_name, &req.service_instance).await?;
        self.advance(reached, DeployStage::Bound);

        self.controller.restart(&req.app_name).await?;
        self.advance(reached, DeployStage::Restarted);
        Ok(())
    }

    fn advance(&self, reached: &mut DeployStage, next: DeployStage) {
        debug_assert!(!reached.is_terminal(), "no transition out of a terminal stage");
        *reached = next;
        self.emit(DeployEvent::StageEntered { stage: next });
    }

    fn emit(&self, event: DeployEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event);
        }
    }
}
