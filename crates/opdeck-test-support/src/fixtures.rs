//! Identifiers, entities, and report sequences shared by integration suites.

use opdeck_core::{OperationId, OperationKind, StatusReport};
use serde_json::{Value, json};

/// `sw-7/install`, the launcher operation most scenarios drive.
#[must_use]
pub fn install_id() -> OperationId {
    OperationId::new("sw-7", OperationKind::Install)
}

/// `agent-1/run`, an operation that usually completes without polling.
#[must_use]
pub fn run_id() -> OperationId {
    OperationId::new("agent-1", OperationKind::Run)
}

/// Software catalog entry as returned by `GET /api/launcher/software/{id}`.
#[must_use]
pub fn software_entity(id: &str, installed: bool) -> Value {
    json!({
        "id": id,
        "name": "Spectrum Analyzer",
        "version": "2.4.1",
        "installed": installed,
    })
}

/// In-progress reports followed by a terminal success.
#[must_use]
pub fn reports_to_completion(progress: &[f64]) -> Vec<StatusReport> {
    progress
        .iter()
        .map(|value| StatusReport::in_progress("installing", *value))
        .chain(std::iter::once(StatusReport::completed()))
        .collect()
}
