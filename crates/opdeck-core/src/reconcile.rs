//! Merging local operation state with parent-owned view and catalog state.
//!
//! # Design
//! - While an operation is in flight, local state wins over parent props so a
//!   stale prop cannot overwrite a just-started spinner.
//! - Confirmed entities reach the catalog at most once per operation instance
//!   and only when they differ from the entity already held.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::model::{OperationId, OperationState};
use crate::service::CatalogUpdater;

/// Flags a parent view passes down from its own fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BaseProps {
    /// Parent's busy flag.
    pub is_busy: bool,
    /// Parent's error message.
    pub error: Option<String>,
    /// Parent's progress value.
    pub progress: Option<u8>,
}

/// Which side supplied the rendered values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateSource {
    /// Values come from the local operation.
    Local,
    /// Values come from the parent props.
    Parent,
}

/// Values a view should render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewState {
    /// Busy indicator.
    pub is_busy: bool,
    /// Error message to show.
    pub error: Option<String>,
    /// Progress to show.
    pub progress: Option<u8>,
    /// Origin of the values.
    pub source: StateSource,
}

/// Merge local operation state over parent props.
///
/// Non-terminal local state always wins. An unacknowledged terminal state still
/// wins (failures keep their local message, completions report 100%). Once the
/// state is gone (`Idle`), the parent's props are rendered verbatim.
#[must_use]
pub fn merge_view_state<T>(base: &BaseProps, state: &OperationState<T>) -> ViewState {
    match state {
        OperationState::Idle => ViewState {
            is_busy: base.is_busy,
            error: base.error.clone(),
            progress: base.progress,
            source: StateSource::Parent,
        },
        OperationState::Requesting => ViewState {
            is_busy: true,
            error: None,
            progress: None,
            source: StateSource::Local,
        },
        OperationState::Polling { progress, .. } => ViewState {
            is_busy: true,
            error: None,
            progress: Some(*progress),
            source: StateSource::Local,
        },
        OperationState::Completed { .. } => ViewState {
            is_busy: false,
            error: None,
            progress: Some(100),
            source: StateSource::Local,
        },
        OperationState::Failed { error, .. } => ViewState {
            is_busy: false,
            error: Some(error.message.clone()),
            progress: None,
            source: StateSource::Local,
        },
    }
}

/// What [`CatalogReconciler::on_completed`] did with a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The catalog callback ran with the new entity.
    Updated,
    /// The entity matched the one already held; no callback.
    Unchanged,
    /// This operation instance was already reconciled.
    AlreadyDelivered,
}

struct ReconcilerInner<T> {
    held: HashMap<String, T>,
    delivered: HashMap<OperationId, u64>,
}

/// Pushes confirmed entities back into the caller-owned catalog.
pub struct CatalogReconciler<T> {
    updater: Arc<dyn CatalogUpdater<T>>,
    inner: Mutex<ReconcilerInner<T>>,
}

impl<T> CatalogReconciler<T>
where
    T: Clone + PartialEq,
{
    /// Reconciler forwarding to `updater`.
    #[must_use]
    pub fn new(updater: Arc<dyn CatalogUpdater<T>>) -> Self {
        Self {
            updater,
            inner: Mutex::new(ReconcilerInner {
                held: HashMap::new(),
                delivered: HashMap::new(),
            }),
        }
    }

    /// Record the entity the parent currently holds for `entity_id`.
    pub fn seed(&self, entity_id: impl Into<String>, entity: T) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .held
            .insert(entity_id.into(), entity);
    }

    /// Entity currently held for `entity_id`.
    #[must_use]
    pub fn held(&self, entity_id: &str) -> Option<T> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .held
            .get(entity_id)
            .cloned()
    }

    /// Reconcile the result of a completed operation instance.
    pub fn on_completed(&self, id: &OperationId, generation: u64, result: &T) -> ReconcileOutcome {
        {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            if inner
                .delivered
                .get(id)
                .is_some_and(|delivered| *delivered >= generation)
            {
                return ReconcileOutcome::AlreadyDelivered;
            }
            inner.delivered.insert(id.clone(), generation);

            if inner.held.get(id.entity_id()) == Some(result) {
                debug!(operation = %id, generation, "confirmed entity unchanged");
                return ReconcileOutcome::Unchanged;
            }
            inner
                .held
                .insert(id.entity_id().to_string(), result.clone());
        }

        self.updater.update_catalog(id.entity_id(), result);
        ReconcileOutcome::Updated
    }
}
