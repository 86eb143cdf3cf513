//! Completion reporting.

use crate::model::DeploymentOutcome;
use tracing::{debug, info};

/// Receives the terminal outcome of a run, exactly once per run.
pub(crate) trait CompletionReporter: Send + Sync {
    fn report(&self, outcome: &DeploymentOutcome);
}

/// Writes the completion message to the tracing subscriber.
#[derive(Debug, Default)]
pub(crate) struct TracingReporter;

impl CompletionReporter for TracingReporter {
    fn report(&self, outcome: &DeploymentOutcome) {
        if outcome.success {
            info!(
                app = %outcome.application_name,
                service = %outcome.service_name,
                elapsed_ms = outcome.elapsed_millis,
                "your application '{}' has been deployed and bound to the service '{}'. It took {} ms to complete.",
                outcome.application_name,
                outcome.service_name,
                outcome.elapsed_millis
            );
        } else {
            // The CLI surfaces the failure itself; keep this out of the default output.
            debug!(
                app = %outcome.application_name,
                service = %outcome.service_name,
                elapsed_ms = outcome.elapsed_millis,
                failed_after = ?outcome.failed_after,
                reason = outcome.failure_reason.as_deref().unwrap_or("unknown"),
                "deployment failed"
            );
        }
    }
}
