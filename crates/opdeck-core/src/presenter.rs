//! View-facing flags derived from operation state.

use std::fmt::{self, Display, Formatter};

use crate::model::{OperationKind, OperationState};

/// Phase component of an action label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelPhase {
    /// Control offers to start the action.
    Idle,
    /// Action is in flight.
    Busy,
    /// Last attempt failed; control offers a retry.
    Retry,
    /// Action finished successfully.
    Done,
}

impl LabelPhase {
    /// Machine-friendly identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Retry => "retry",
            Self::Done => "done",
        }
    }
}

/// Translation key for the control that triggers an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionLabel {
    /// Operation kind the control triggers.
    pub kind: OperationKind,
    /// Current phase.
    pub phase: LabelPhase,
}

impl ActionLabel {
    /// Key such as `install.busy`, resolved by the caller's translation layer.
    #[must_use]
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl Display for ActionLabel {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}.{}", self.kind, self.phase.as_str())
    }
}

/// Flags components consume to render an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewFlags {
    /// Spinner indicator; true while requesting or polling.
    pub is_loading: bool,
    /// Failure message; only set for failed operations.
    pub error: Option<String>,
    /// Progress percentage while polling, 100 once completed.
    pub progress: Option<u8>,
    /// Whether a cancel control should be offered.
    pub can_cancel: bool,
    /// Label key for the triggering control.
    pub action_label: ActionLabel,
}

/// Translate operation state into view flags. Pure and side-effect free.
#[must_use]
pub fn to_view_flags<T>(kind: OperationKind, state: &OperationState<T>) -> ViewFlags {
    let phase = match state {
        OperationState::Idle => LabelPhase::Idle,
        OperationState::Requesting | OperationState::Polling { .. } => LabelPhase::Busy,
        OperationState::Completed { .. } => LabelPhase::Done,
        OperationState::Failed { .. } => LabelPhase::Retry,
    };
    let progress = match state {
        OperationState::Polling { progress, .. } => Some(*progress),
        OperationState::Completed { .. } => Some(100),
        _ => None,
    };

    ViewFlags {
        is_loading: state.is_active(),
        error: state.error().map(|error| error.message.clone()),
        progress,
        can_cancel: state.is_active(),
        action_label: ActionLabel { kind, phase },
    }
}
