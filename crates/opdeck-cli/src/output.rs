//! Output renderers for operation transitions and results.

use anyhow::anyhow;
use opdeck_core::{OperationState, to_view_flags};
use opdeck_events::TransitionEnvelope;
use serde_json::Value;

use crate::cli::OutputFormat;
use crate::client::{CliError, CliResult};

pub(crate) fn render_transition(
    envelope: &TransitionEnvelope<Value>,
    format: OutputFormat,
) -> CliResult<()> {
    match format {
        OutputFormat::Json => {
            let text = serde_json::to_string(envelope)
                .map_err(|err| CliError::failure(anyhow!("failed to format JSON: {err}")))?;
            println!("{text}");
        }
        OutputFormat::Table => println!("{}", transition_line(envelope)),
    }
    Ok(())
}

pub(crate) fn render_result(result: &Value, format: OutputFormat) -> CliResult<()> {
    if matches!(format, OutputFormat::Json) || result.is_null() {
        return Ok(());
    }
    let text = serde_json::to_string_pretty(result)
        .map_err(|err| CliError::failure(anyhow!("failed to format JSON: {err}")))?;
    println!("{text}");
    Ok(())
}

/// One table row: operation, action label key, and progress or status detail.
#[must_use]
pub(crate) fn transition_line(envelope: &TransitionEnvelope<Value>) -> String {
    let flags = to_view_flags(envelope.operation.kind(), &envelope.state);
    let detail = match &envelope.state {
        OperationState::Idle => "idle".to_string(),
        OperationState::Requesting => "requesting".to_string(),
        OperationState::Polling {
            progress,
            poll_count,
        } => format!("{progress:>3}% (poll {poll_count})"),
        OperationState::Completed { .. } => "completed".to_string(),
        OperationState::Failed { error, retryable } => {
            let hint = if *retryable { ", retryable" } else { "" };
            format!("failed: {} [{}{hint}]", error.message, error.kind.as_str())
        }
    };
    format!(
        "{:<32} {:<26} {detail}",
        envelope.operation.to_string(),
        flags.action_label.key()
    )
}
