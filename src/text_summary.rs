//! Text summary builder for CLI output.
//!
//! Formats human-readable lines describing a finished deployment.

use crate::model::DeploymentOutcome;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// Build a text summary from the outcome of a run.
pub(crate) fn build_text_summary(outcome: &DeploymentOutcome) -> TextSummary {
    let mut lines = Vec::new();

    lines.push(format!("Application: {}", outcome.application_name));
    lines.push(format!("Service:     {}", outcome.service_name));
    lines.push(format!(
        "Elapsed:     {}",
        humantime::format_duration(std::time::Duration::from_millis(outcome.elapsed_millis))
    ));

    if outcome.success {
        lines.push("Status:      deployed".to_string());
    } else {
        lines.push(match outcome.failed_after {
            Some(stage) => format!("Status:      failed after stage '{stage}'"),
            None => "Status:      failed".to_string(),
        });
        if let Some(reason) = outcome.failure_reason.as_deref() {
            lines.push(format!("Reason:      {reason}"));
        }
    }

    if !outcome.finished_at_utc.is_empty() {
        lines.push(format!("Finished:    {}", outcome.finished_at_utc));
    }

    TextSummary { lines }
}
