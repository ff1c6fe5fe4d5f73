//! Traits implemented by transport adapters and catalog owners.

use std::future::Future;

use async_trait::async_trait;

use crate::error::OperationError;
use crate::model::{JobId, Kickoff, OperationId, OperationRequest, StatusReport};

/// Performs the kickoff request for an operation (e.g. `POST .../install`).
#[async_trait]
pub trait Executor<T>: Send + Sync
where
    T: Send + 'static,
{
    /// Issue the kickoff request.
    async fn execute(&self, request: OperationRequest) -> Result<Kickoff<T>, OperationError>;

    /// Best-effort hook invoked when the caller cancels the operation locally.
    ///
    /// The remote job keeps running unless the adapter can stop it; the default
    /// implementation does nothing.
    fn cancel(&self, id: &OperationId) {
        let _ = id;
    }
}

/// Reads the status of a server-side job.
#[async_trait]
pub trait StatusFetcher<T>: Send + Sync
where
    T: Send + 'static,
{
    /// Fetch the current status of `job`.
    async fn fetch_status(&self, id: &OperationId, job: &JobId)
    -> Result<StatusReport, OperationError>;

    /// Fetch the confirmed entity once `job` reported success.
    async fn fetch_result(&self, id: &OperationId, job: &JobId) -> Result<T, OperationError>;
}

/// Receives confirmed entities so list and catalog views can splice them in.
pub trait CatalogUpdater<T>: Send + Sync {
    /// Replace the entity held for `entity_id`.
    fn update_catalog(&self, entity_id: &str, entity: &T);
}

impl<T, F> CatalogUpdater<T> for F
where
    F: Fn(&str, &T) + Send + Sync,
{
    fn update_catalog(&self, entity_id: &str, entity: &T) {
        self(entity_id, entity);
    }
}

/// Executor backed by an async closure.
pub struct FnExecutor<F> {
    call: F,
}

/// Wrap an async closure as an [`Executor`].
#[must_use]
pub const fn executor_fn<F>(call: F) -> FnExecutor<F> {
    FnExecutor { call }
}

#[async_trait]
impl<T, F, Fut> Executor<T> for FnExecutor<F>
where
    T: Send + 'static,
    F: Fn(OperationRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Kickoff<T>, OperationError>> + Send,
{
    async fn execute(&self, request: OperationRequest) -> Result<Kickoff<T>, OperationError> {
        (self.call)(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OperationKind;
    use serde_json::Value;
    use std::sync::Mutex;

    #[tokio::test]
    async fn closure_executor_forwards_request() -> anyhow::Result<()> {
        let executor = executor_fn(|request: OperationRequest| async move {
            Ok::<_, OperationError>(Kickoff::Done(request.id.entity_id().to_string()))
        });
        let request = OperationRequest {
            id: OperationId::new("agent-1", OperationKind::Run),
            generation: 1,
            params: Value::Null,
        };
        let kickoff = executor.execute(request).await?;
        assert_eq!(kickoff, Kickoff::Done("agent-1".to_string()));
        Ok(())
    }

    #[test]
    fn closures_act_as_catalog_updaters() {
        let seen = Mutex::new(Vec::new());
        let updater = |entity_id: &str, entity: &u32| {
            if let Ok(mut guard) = seen.lock() {
                guard.push((entity_id.to_string(), *entity));
            }
        };
        updater.update_catalog("sw-7", &3);
        let recorded = seen.lock().map(|guard| guard.clone()).unwrap_or_default();
        assert_eq!(recorded, vec![("sw-7".to_string(), 3)]);
    }
}
