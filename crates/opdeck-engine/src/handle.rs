//! Caller-side handle for one started operation instance.

use opdeck_core::{OperationId, OperationState};
use tokio::sync::oneshot;

/// Returned by a successful start; resolves once the instance leaves the
/// active set.
pub struct OperationHandle<T> {
    id: OperationId,
    generation: u64,
    done: oneshot::Receiver<OperationState<T>>,
}

impl<T> OperationHandle<T> {
    pub(crate) fn new(
        id: OperationId,
        generation: u64,
        done: oneshot::Receiver<OperationState<T>>,
    ) -> Self {
        Self {
            id,
            generation,
            done,
        }
    }

    /// Operation this handle tracks.
    #[must_use]
    pub const fn id(&self) -> &OperationId {
        &self.id
    }

    /// Generation assigned to this instance.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Wait for the final state of this instance.
    ///
    /// Resolves with `Completed` or `Failed`, or with `Idle` when the instance
    /// was cancelled, released, or the store was dropped.
    pub async fn wait(self) -> OperationState<T> {
        self.done.await.unwrap_or(OperationState::Idle)
    }
}
