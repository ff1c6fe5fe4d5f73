//! Transition payloads carried by the feed.

use chrono::{DateTime, Utc};
use opdeck_core::{OperationId, OperationState};
use serde::{Deserialize, Serialize};

/// Sequence number assigned to each published transition.
pub type EventId = u64;

/// Default buffer size for the in-memory replay ring.
pub const DEFAULT_REPLAY_CAPACITY: usize = 1_024;

/// One lifecycle transition for one operation instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionEnvelope<T> {
    /// Feed-wide sequence number.
    pub seq: EventId,
    /// Wall-clock time the transition was published.
    pub timestamp: DateTime<Utc>,
    /// Operation the transition belongs to.
    pub operation: OperationId,
    /// Generation of the operation instance.
    pub generation: u64,
    /// State after the transition; `Idle` when the entry was removed.
    pub state: OperationState<T>,
}

impl<T> TransitionEnvelope<T> {
    /// Machine-friendly discriminator for stream consumers.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        self.state.label()
    }

    /// Whether the transition belongs to `id`.
    #[must_use]
    pub fn concerns(&self, id: &OperationId) -> bool {
        &self.operation == id
    }
}
