#![forbid(unsafe_code)]
#![deny(
    dead_code,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
//! Shared HTTP DTOs for the dashboard backend.
//!
//! The CLI's REST adapter decodes every kickoff and status body through these
//! types, so the mapping from wire payloads to engine types (`Kickoff`,
//! `StatusReport`) lives in one place. Route builders sit alongside them.

use opdeck_core::{
    JobId, JobStatus, Kickoff, OperationError, OperationId, OperationKind, StatusReport,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// RFC9457-compatible problem document returned on validation/runtime errors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemDetails {
    #[serde(rename = "type", default)]
    /// URI reference identifying the problem type.
    pub kind: String,
    /// Short, human-readable summary of the issue.
    pub title: String,
    /// HTTP status code associated with the error.
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    /// Detailed diagnostic message when available.
    pub detail: Option<String>,
}

impl ProblemDetails {
    /// Most specific message available.
    #[must_use]
    pub fn message(&self) -> &str {
        self.detail.as_deref().unwrap_or(&self.title)
    }
}

/// Body returned by kickoff endpoints (`POST .../install`, `.../run`, ...).
///
/// Long-running endpoints answer with `jobId` (or `installationId` for the
/// launcher); synchronous endpoints answer with `result` or with the entity
/// itself, which lands in `entity`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KickoffResponse {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    /// Handle of the server-side job to poll.
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    /// Launcher installation handle, polled like a job.
    pub installation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    /// Entity returned by a synchronous endpoint.
    pub result: Option<Value>,
    #[serde(flatten)]
    /// Remaining fields when the endpoint answers with the bare entity.
    pub entity: Map<String, Value>,
}

impl KickoffResponse {
    /// Decode a raw kickoff body for an operation of `kind`. Non-object
    /// bodies are direct results.
    ///
    /// # Errors
    ///
    /// Returns [`OperationError::Protocol`] when the body is not JSON, when
    /// the known fields have the wrong types, or when `kind` is polled and
    /// the body carries no usable job handle.
    pub fn from_body(
        bytes: &[u8],
        kind: OperationKind,
    ) -> Result<Kickoff<Value>, OperationError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return direct(kind, Value::Null);
        }
        let body: Value = serde_json::from_slice(bytes)
            .map_err(|err| OperationError::protocol(format!("invalid kickoff body: {err}")))?;
        if !body.is_object() {
            return direct(kind, body);
        }
        let decoded: Self = serde_json::from_value(body)
            .map_err(|err| OperationError::protocol(format!("invalid kickoff body: {err}")))?;
        decoded.into_kickoff(kind)
    }

    /// Convert into the engine's kickoff outcome for an operation of `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`OperationError::Protocol`] when a job handle is present but
    /// blank, or missing for a kind that is tracked through a status endpoint.
    pub fn into_kickoff(self, kind: OperationKind) -> Result<Kickoff<Value>, OperationError> {
        if let Some(handle) = self.job_id.or(self.installation_id) {
            if handle.trim().is_empty() {
                return Err(OperationError::protocol(
                    "kickoff body carried an empty job handle",
                ));
            }
            return Ok(Kickoff::Job(JobId::new(handle)));
        }
        let result = self.result.unwrap_or_else(|| {
            if self.entity.is_empty() {
                Value::Null
            } else {
                Value::Object(self.entity)
            }
        });
        direct(kind, result)
    }
}

fn direct(kind: OperationKind, result: Value) -> Result<Kickoff<Value>, OperationError> {
    if routes::has_status(kind) {
        return Err(OperationError::protocol(format!(
            "{kind} kickoff returned no job handle"
        )));
    }
    Ok(Kickoff::Done(result))
}

/// Body returned by status endpoints (`GET .../{job}/status`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobStatusResponse {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    /// Server wording for the job phase; absent while simply running.
    pub status: Option<String>,
    #[serde(default)]
    /// Reported percentage.
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    /// Failure message; its presence ends polling.
    pub error: Option<String>,
}

impl JobStatusResponse {
    /// Convert into the engine's status report.
    #[must_use]
    pub fn into_report(self) -> StatusReport {
        StatusReport {
            status: classify_status(self.status.as_deref()),
            progress: self.progress,
            error: self.error.filter(|message| !message.trim().is_empty()),
        }
    }
}

/// Map the server's status wording onto a [`JobStatus`].
#[must_use]
pub fn classify_status(raw: Option<&str>) -> JobStatus {
    let normalized = raw.map(|value| value.trim().to_ascii_lowercase());
    match normalized.as_deref() {
        Some("completed" | "complete" | "success" | "succeeded" | "done" | "installed") => {
            JobStatus::Completed
        }
        Some("failed" | "failure" | "error" | "errored") => JobStatus::Failed,
        Some("pending" | "queued" | "accepted") => JobStatus::Pending,
        Some(phase) if !phase.is_empty() => JobStatus::InProgress {
            phase: phase.to_string(),
        },
        _ => JobStatus::InProgress {
            phase: "in_progress".to_string(),
        },
    }
}

/// Body for `POST /api/equipment/{id}/firmware`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FirmwareUpdateRequest {
    /// Firmware version to install.
    pub version: String,
}

/// Body for `POST /api/account/2fa/verify`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerifyTwoFactorRequest {
    /// One-time code from the authenticator app.
    pub code: String,
}

/// Path builders for the dashboard backend.
pub mod routes {
    use super::{OperationId, OperationKind};

    /// Kickoff path for an operation.
    #[must_use]
    pub fn kickoff(id: &OperationId) -> String {
        let entity = id.entity_id();
        match id.kind() {
            OperationKind::Run => format!("/api/agents/{entity}/run"),
            OperationKind::Stop => format!("/api/agents/{entity}/stop"),
            OperationKind::Install => format!("/api/launcher/software/{entity}/install"),
            OperationKind::Launch => format!("/api/launcher/software/{entity}/launch"),
            OperationKind::Connect => format!("/api/equipment/{entity}/connect"),
            OperationKind::Diagnose => format!("/api/equipment/{entity}/diagnose"),
            OperationKind::FirmwareUpdate => format!("/api/equipment/{entity}/firmware"),
            OperationKind::StreamLogs => format!("/api/connections/{entity}/logs"),
            OperationKind::EnrollTwoFactor => "/api/account/2fa/enroll".to_string(),
            OperationKind::VerifyTwoFactor => "/api/account/2fa/verify".to_string(),
        }
    }

    /// Whether jobs started by `kind` can be polled.
    #[must_use]
    pub const fn has_status(kind: OperationKind) -> bool {
        matches!(kind, OperationKind::Install | OperationKind::FirmwareUpdate)
    }

    /// Status path for a job started by `kind`, when the backend exposes one.
    #[must_use]
    pub fn status(kind: OperationKind, job: &str) -> Option<String> {
        match kind {
            OperationKind::Install => Some(format!("/api/launcher/install/{job}/status")),
            OperationKind::FirmwareUpdate => Some(format!("/api/equipment/firmware/{job}/status")),
            _ => None,
        }
    }

    /// Path returning the refreshed entity once a polled job completed.
    #[must_use]
    pub fn entity(id: &OperationId) -> Option<String> {
        let entity = id.entity_id();
        match id.kind() {
            OperationKind::Install | OperationKind::Launch => {
                Some(format!("/api/launcher/software/{entity}"))
            }
            OperationKind::Connect | OperationKind::Diagnose | OperationKind::FirmwareUpdate => {
                Some(format!("/api/equipment/{entity}"))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn kickoff(kind: OperationKind, body: &Value) -> Result<Kickoff<Value>, OperationError> {
        KickoffResponse::from_body(body.to_string().as_bytes(), kind)
    }

    #[test]
    fn job_handles_become_jobs() -> anyhow::Result<()> {
        assert_eq!(
            kickoff(OperationKind::Install, &json!({"jobId": "job-42"}))?,
            Kickoff::Job(JobId::from("job-42"))
        );
        assert_eq!(
            kickoff(OperationKind::Install, &json!({"installationId": "inst-9"}))?,
            Kickoff::Job(JobId::from("inst-9"))
        );
        Ok(())
    }

    #[test]
    fn synchronous_bodies_become_results() -> anyhow::Result<()> {
        assert_eq!(
            kickoff(OperationKind::Run, &json!({"result": {"status": "running"}}))?,
            Kickoff::Done(json!({"status": "running"}))
        );
        let agent = json!({"id": "agent-1", "status": "running"});
        assert_eq!(kickoff(OperationKind::Run, &agent)?, Kickoff::Done(agent));
        assert_eq!(
            KickoffResponse::from_body(b"", OperationKind::Stop)?,
            Kickoff::Done(Value::Null)
        );
        assert_eq!(
            kickoff(OperationKind::VerifyTwoFactor, &json!(true))?,
            Kickoff::Done(json!(true))
        );
        Ok(())
    }

    #[test]
    fn polled_kinds_require_a_job_handle() {
        let accepted = kickoff(OperationKind::Install, &json!({"message": "accepted"})).err();
        assert!(matches!(accepted, Some(OperationError::Protocol { .. })));

        let empty = KickoffResponse::from_body(b"", OperationKind::FirmwareUpdate).err();
        assert!(matches!(empty, Some(OperationError::Protocol { .. })));

        let scalar = kickoff(OperationKind::FirmwareUpdate, &json!("ok")).err();
        assert!(matches!(scalar, Some(OperationError::Protocol { .. })));
    }

    #[test]
    fn malformed_kickoff_bodies_are_protocol_errors() {
        let bodies: [&[u8]; 3] = [br#"{"jobId": 42}"#, br#"{"jobId": "  "}"#, b"<html>"];
        for body in bodies {
            let err = KickoffResponse::from_body(body, OperationKind::Run).err();
            assert!(matches!(err, Some(OperationError::Protocol { .. })));
        }
    }

    #[test]
    fn status_wording_is_classified() {
        assert_eq!(classify_status(Some("Completed")), JobStatus::Completed);
        assert_eq!(classify_status(Some("succeeded")), JobStatus::Completed);
        assert_eq!(classify_status(Some("error")), JobStatus::Failed);
        assert_eq!(classify_status(Some("queued")), JobStatus::Pending);
        assert_eq!(
            classify_status(Some("downloading")),
            JobStatus::InProgress {
                phase: "downloading".to_string()
            }
        );
        assert_eq!(
            classify_status(None),
            JobStatus::InProgress {
                phase: "in_progress".to_string()
            }
        );
    }

    #[test]
    fn progress_only_bodies_keep_polling() -> anyhow::Result<()> {
        let report: JobStatusResponse = serde_json::from_value(json!({"progress": 10}))?;
        let report = report.into_report();
        assert!(!report.is_terminal());
        assert_eq!(report.percent(), 10);

        let failed: JobStatusResponse =
            serde_json::from_value(json!({"status": "failed", "error": "disk full"}))?;
        let failed = failed.into_report();
        assert!(failed.is_terminal());
        assert_eq!(failed.error.as_deref(), Some("disk full"));
        Ok(())
    }

    #[test]
    fn problem_details_prefer_detail() -> anyhow::Result<()> {
        let problem: ProblemDetails = serde_json::from_value(json!({
            "type": "about:blank",
            "title": "Conflict",
            "status": 409,
            "detail": "installation already running"
        }))?;
        assert_eq!(problem.message(), "installation already running");
        Ok(())
    }

    #[test]
    fn routes_follow_the_backend_layout() {
        let install = OperationId::new("sw-7", OperationKind::Install);
        assert_eq!(routes::kickoff(&install), "/api/launcher/software/sw-7/install");
        assert_eq!(
            routes::status(OperationKind::Install, "job-42").as_deref(),
            Some("/api/launcher/install/job-42/status")
        );
        assert_eq!(routes::entity(&install).as_deref(), Some("/api/launcher/software/sw-7"));
        assert_eq!(routes::status(OperationKind::Run, "job-1"), None);
        assert!(routes::has_status(OperationKind::FirmwareUpdate));
        assert!(!routes::has_status(OperationKind::Launch));
        assert_eq!(
            routes::kickoff(&OperationId::new("me", OperationKind::VerifyTwoFactor)),
            "/api/account/2fa/verify"
        );
    }
}
