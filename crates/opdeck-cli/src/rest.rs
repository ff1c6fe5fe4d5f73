//! REST adapters plugging the dashboard backend into the operation store.

use async_trait::async_trait;
use opdeck_api_models::{JobStatusResponse, KickoffResponse, routes};
use opdeck_core::{
    Executor, JobId, Kickoff, OperationError, OperationId, OperationRequest, StatusFetcher,
    StatusReport,
};
use serde_json::Value;
use tracing::debug;

use crate::client::ApiClient;

/// Issues kickoff requests (`POST .../install`, `.../run`, ...).
pub(crate) struct RestExecutor {
    api: ApiClient,
}

impl RestExecutor {
    pub(crate) const fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Executor<Value> for RestExecutor {
    async fn execute(&self, request: OperationRequest) -> Result<Kickoff<Value>, OperationError> {
        let path = routes::kickoff(&request.id);
        debug!(operation = %request.id, generation = request.generation, %path, "kickoff request");
        let body = self.api.post(&path, &request.params).await?;
        KickoffResponse::from_body(&body, request.id.kind())
    }

    fn cancel(&self, id: &OperationId) {
        debug!(operation = %id, "cancelled locally; the backend job keeps running");
    }
}

/// Polls job status endpoints and fetches the refreshed entity on success.
pub(crate) struct RestStatusFetcher {
    api: ApiClient,
}

impl RestStatusFetcher {
    pub(crate) const fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl StatusFetcher<Value> for RestStatusFetcher {
    async fn fetch_status(
        &self,
        id: &OperationId,
        job: &JobId,
    ) -> Result<StatusReport, OperationError> {
        let path = routes::status(id.kind(), job.as_str()).ok_or_else(|| {
            OperationError::protocol(format!("{} jobs have no status endpoint", id.kind()))
        })?;
        let body = self.api.get(&path).await?;
        let response: JobStatusResponse = serde_json::from_slice(&body)
            .map_err(|err| OperationError::protocol(format!("invalid status body: {err}")))?;
        Ok(response.into_report())
    }

    async fn fetch_result(&self, id: &OperationId, job: &JobId) -> Result<Value, OperationError> {
        let Some(path) = routes::entity(id) else {
            debug!(operation = %id, %job, "no entity endpoint; completing without a result");
            return Ok(Value::Null);
        };
        let body = self.api.get(&path).await?;
        serde_json::from_slice(&body)
            .map_err(|err| OperationError::protocol(format!("invalid entity body: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use anyhow::{Result, anyhow};
    use httpmock::MockServer;
    use httpmock::prelude::*;
    use opdeck_core::{JobStatus, OperationKind};
    use serde_json::json;

    fn api_for(server: &MockServer) -> Result<ApiClient> {
        let base_url = server
            .base_url()
            .parse()
            .map_err(|_| anyhow!("invalid URL"))?;
        ApiClient::new(base_url, Duration::from_secs(5), None, "trace-rest")
            .map_err(|err| anyhow!(err.display_message()))
    }

    fn install() -> OperationId {
        OperationId::new("sw-7", OperationKind::Install)
    }

    #[tokio::test]
    async fn executor_posts_params_and_decodes_job() -> Result<()> {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/api/equipment/eq-3/firmware")
                .json_body(json!({"version": "2.1.0"}));
            then.status(202).json_body(json!({"jobId": "fw-9"}));
        });

        let executor = RestExecutor::new(api_for(&server)?);
        let kickoff = executor
            .execute(OperationRequest {
                id: OperationId::new("eq-3", OperationKind::FirmwareUpdate),
                generation: 1,
                params: json!({"version": "2.1.0"}),
            })
            .await?;
        assert_eq!(kickoff, Kickoff::Job(JobId::from("fw-9")));
        mock.assert();
        Ok(())
    }

    #[tokio::test]
    async fn executor_maps_garbage_to_protocol_errors() -> Result<()> {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/api/launcher/software/sw-7/install");
            then.status(200).body("<html>maintenance</html>");
        });

        let executor = RestExecutor::new(api_for(&server)?);
        let err = executor
            .execute(OperationRequest {
                id: install(),
                generation: 1,
                params: Value::Null,
            })
            .await
            .err();
        assert!(matches!(err, Some(OperationError::Protocol { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn fetcher_reads_status_then_entity() -> Result<()> {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/api/launcher/install/job-1/status");
            then.status(200)
                .json_body(json!({"status": "downloading", "progress": 42.5}));
        });
        let entity = server.mock(|when, then| {
            when.method(GET).path("/api/launcher/software/sw-7");
            then.status(200)
                .json_body(json!({"id": "sw-7", "installed": true}));
        });

        let fetcher = RestStatusFetcher::new(api_for(&server)?);
        let job = JobId::from("job-1");
        let report = fetcher.fetch_status(&install(), &job).await?;
        assert_eq!(
            report.status,
            JobStatus::InProgress {
                phase: "downloading".to_string()
            }
        );
        assert_eq!(report.percent(), 43);

        let result = fetcher.fetch_result(&install(), &job).await?;
        assert_eq!(result["installed"], true);
        entity.assert();
        Ok(())
    }

    #[tokio::test]
    async fn fetcher_rejects_kinds_without_status_endpoint() -> Result<()> {
        let server = MockServer::start_async().await;
        let fetcher = RestStatusFetcher::new(api_for(&server)?);
        let err = fetcher
            .fetch_status(
                &OperationId::new("agent-1", OperationKind::Run),
                &JobId::from("job-2"),
            )
            .await
            .err();
        assert!(matches!(err, Some(OperationError::Protocol { .. })));
        Ok(())
    }
}
