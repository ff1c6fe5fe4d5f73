//! Operation identifiers, lifecycle states, and the DTOs exchanged with executors.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of long-running action tracked for an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Start an agent.
    Run,
    /// Stop a running agent.
    Stop,
    /// Install a software package through the launcher.
    Install,
    /// Launch an installed software package.
    Launch,
    /// Open a connection to a piece of equipment.
    Connect,
    /// Run the diagnostic routine on a piece of equipment.
    Diagnose,
    /// Push a firmware image to a piece of equipment.
    FirmwareUpdate,
    /// Attach to a connection's log stream.
    StreamLogs,
    /// Begin two-factor enrollment for the signed-in account.
    EnrollTwoFactor,
    /// Confirm a two-factor code for the signed-in account.
    VerifyTwoFactor,
}

impl OperationKind {
    /// Every known kind, in declaration order.
    pub const ALL: [Self; 10] = [
        Self::Run,
        Self::Stop,
        Self::Install,
        Self::Launch,
        Self::Connect,
        Self::Diagnose,
        Self::FirmwareUpdate,
        Self::StreamLogs,
        Self::EnrollTwoFactor,
        Self::VerifyTwoFactor,
    ];

    /// Machine-friendly identifier used in logs, metrics labels, and label keys.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Run => "run",
            Self::Stop => "stop",
            Self::Install => "install",
            Self::Launch => "launch",
            Self::Connect => "connect",
            Self::Diagnose => "diagnose",
            Self::FirmwareUpdate => "firmware_update",
            Self::StreamLogs => "stream_logs",
            Self::EnrollTwoFactor => "enroll_two_factor",
            Self::VerifyTwoFactor => "verify_two_factor",
        }
    }
}

impl Display for OperationKind {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Identifies one logical operation: one entity, one kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationId {
    entity_id: String,
    kind: OperationKind,
}

impl OperationId {
    /// Build an identifier for `kind` on `entity_id`.
    #[must_use]
    pub fn new(entity_id: impl Into<String>, kind: OperationKind) -> Self {
        Self {
            entity_id: entity_id.into(),
            kind,
        }
    }

    /// Identifier of the entity the operation targets.
    #[must_use]
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    /// Kind of operation.
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Whether both identifiers target the same entity.
    #[must_use]
    pub fn same_entity(&self, other: &Self) -> bool {
        self.entity_id == other.entity_id
    }
}

impl Display for OperationId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}/{}", self.entity_id, self.kind)
    }
}

/// Server-side job handle returned by a kickoff call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Wrap a raw job identifier.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for JobId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Category of a failure recorded in [`OperationState::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The request never reached the server or came back non-2xx.
    Network,
    /// The response body was missing expected fields or could not be decoded.
    Protocol,
    /// The server reported the job as failed.
    Remote,
}

impl ErrorKind {
    /// Machine-friendly identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Protocol => "protocol",
            Self::Remote => "remote",
        }
    }

    /// Whether a failure of this kind is worth retrying as-is.
    #[must_use]
    pub const fn retryable(self) -> bool {
        !matches!(self, Self::Protocol)
    }
}

/// Failure details surfaced to views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Failure category.
    pub kind: ErrorKind,
    /// Human-readable message, usually relayed from the server.
    pub message: String,
}

impl ErrorInfo {
    /// Construct error details.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl Display for ErrorInfo {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.message)
    }
}

/// Lifecycle of one operation instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum OperationState<T> {
    /// Nothing recorded for the identifier.
    Idle,
    /// Kickoff request in flight.
    Requesting,
    /// Waiting on a server-side job.
    Polling {
        /// Percentage complete, never decreasing within one instance.
        progress: u8,
        /// Number of status responses applied so far.
        poll_count: u32,
    },
    /// Terminal success.
    Completed {
        /// Entity state confirmed by the server.
        result: T,
    },
    /// Terminal failure.
    Failed {
        /// Failure details.
        error: ErrorInfo,
        /// Whether retrying the same request may succeed.
        retryable: bool,
    },
}

impl<T> OperationState<T> {
    /// True for `Completed` and `Failed`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }

    /// True for `Requesting` and `Polling`.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Requesting | Self::Polling { .. })
    }

    /// True when nothing is recorded.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Short label used for logging and rendering.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Requesting => "requesting",
            Self::Polling { .. } => "polling",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
        }
    }

    /// Progress while polling.
    #[must_use]
    pub const fn progress(&self) -> Option<u8> {
        match self {
            Self::Polling { progress, .. } => Some(*progress),
            _ => None,
        }
    }

    /// Confirmed entity for completed operations.
    #[must_use]
    pub const fn result(&self) -> Option<&T> {
        match self {
            Self::Completed { result } => Some(result),
            _ => None,
        }
    }

    /// Failure details for failed operations.
    #[must_use]
    pub const fn error(&self) -> Option<&ErrorInfo> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Whether the lifecycle may move from `self` to `next`.
    ///
    /// Only `Requesting → Polling* → Completed | Failed` is permitted; removal
    /// of an entry (cancel, dismiss, release) is not a transition.
    #[must_use]
    pub const fn permits(&self, next: &Self) -> bool {
        match (self, next) {
            (Self::Requesting | Self::Polling { .. }, next) => {
                matches!(
                    next,
                    Self::Polling { .. } | Self::Completed { .. } | Self::Failed { .. }
                )
            }
            _ => false,
        }
    }
}

/// How an operation instance ended, from the caller's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Reached `Completed`.
    Completed,
    /// Reached `Failed`.
    Failed,
    /// Dropped locally before reaching a terminal state.
    Cancelled,
}

impl Outcome {
    /// Machine-friendly identifier used as a metrics label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Input handed to an executor when an operation starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRequest {
    /// Operation being started.
    pub id: OperationId,
    /// Generation assigned to this instance.
    pub generation: u64,
    /// Caller-supplied request parameters (request body fields).
    #[serde(default)]
    pub params: Value,
}

/// Result of a kickoff call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Kickoff<T> {
    /// The server accepted a long-running job that must be polled.
    Job(JobId),
    /// The server finished synchronously.
    Done(T),
}

/// Server-reported phase of a polled job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted but not started.
    Pending,
    /// Running; `phase` carries the server's wording (e.g. `downloading`).
    InProgress {
        /// Raw phase label.
        phase: String,
    },
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

impl JobStatus {
    /// True for `Completed` and `Failed`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One status response for a polled job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Reported phase.
    pub status: JobStatus,
    /// Reported percentage; may be fractional or out of range.
    pub progress: f64,
    /// Error message attached by the server, if any.
    pub error: Option<String>,
}

impl StatusReport {
    /// Report for a job still running.
    #[must_use]
    pub fn in_progress(phase: impl Into<String>, progress: f64) -> Self {
        Self {
            status: JobStatus::InProgress {
                phase: phase.into(),
            },
            progress,
            error: None,
        }
    }

    /// Report for a job that finished successfully.
    #[must_use]
    pub const fn completed() -> Self {
        Self {
            status: JobStatus::Completed,
            progress: 100.0,
            error: None,
        }
    }

    /// Report for a job that failed with `message`.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            progress: 0.0,
            error: Some(message.into()),
        }
    }

    /// Whether polling must stop after this report.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal() || self.error.is_some()
    }

    /// Whether this report ends the job successfully.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.status, JobStatus::Completed) && self.error.is_none()
    }

    /// Reported progress clamped into `0..=100`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    #[must_use]
    pub fn percent(&self) -> u8 {
        if self.progress.is_nan() {
            return 0;
        }
        self.progress.clamp(0.0, 100.0).round() as u8
    }
}
