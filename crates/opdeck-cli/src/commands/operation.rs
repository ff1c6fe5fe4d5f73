//! Drives one operation through the store and renders its transitions.

use std::future::Future;
use std::io;
use std::sync::Arc;

use anyhow::anyhow;
use opdeck_api_models::routes;
use opdeck_core::{
    CatalogReconciler, CatalogUpdater, Executor, GuardRejection, OperationId, OperationState,
    StatusFetcher,
};
use opdeck_engine::StartOptions;
use serde_json::Value;
use tracing::{info, warn};

use super::OperationPlan;
use crate::cli::OutputFormat;
use crate::client::{AppContext, CliError, CliResult};
use crate::output::{render_result, render_transition};
use crate::rest::{RestExecutor, RestStatusFetcher};

/// Run `plan` to a terminal state; Ctrl-C cancels it locally.
pub(crate) async fn drive(
    ctx: &AppContext,
    plan: OperationPlan,
    format: OutputFormat,
) -> CliResult<()> {
    drive_until(ctx, plan, format, tokio::signal::ctrl_c()).await
}

/// Run `plan`, cancelling it when `interrupt` resolves first.
pub(crate) async fn drive_until<S>(
    ctx: &AppContext,
    plan: OperationPlan,
    format: OutputFormat,
    interrupt: S,
) -> CliResult<()>
where
    S: Future<Output = io::Result<()>> + Send,
{
    let OperationPlan { id, params } = plan;
    let mut transitions = ctx.store.subscribe(&id);

    let executor: Arc<dyn Executor<Value>> = Arc::new(RestExecutor::new(ctx.api.clone()));
    let mut options = StartOptions::new().with_params(params);
    if routes::has_status(id.kind()) {
        let fetcher: Arc<dyn StatusFetcher<Value>> =
            Arc::new(RestStatusFetcher::new(ctx.api.clone()));
        options = options.with_status_fetcher(fetcher);
    }
    if routes::entity(&id).is_some() {
        options = options.with_reconciler(catalog_reconciler());
    }

    let handle = ctx
        .store
        .start(id.clone(), executor, options)
        .map_err(|rejection| rejected(&rejection))?;
    let generation = handle.generation();

    let done = handle.wait();
    tokio::pin!(done);
    tokio::pin!(interrupt);
    let mut interrupted = false;

    loop {
        tokio::select! {
            biased;
            Some(envelope) = transitions.next() => {
                if envelope.generation == generation {
                    render_transition(&envelope, format)?;
                }
            }
            final_state = &mut done => {
                while let Some(envelope) = transitions.try_next() {
                    if envelope.generation == generation {
                        render_transition(&envelope, format)?;
                    }
                }
                return conclude(&id, final_state, format);
            }
            signal = &mut interrupt, if !interrupted => {
                interrupted = true;
                if let Err(err) = signal {
                    warn!(error = %err, "failed to listen for interrupt");
                    continue;
                }
                if ctx.store.cancel(&id).is_ok() {
                    info!(operation = %id, generation, "operation cancelled by user");
                }
            }
        }
    }
}

fn conclude(
    id: &OperationId,
    state: OperationState<Value>,
    format: OutputFormat,
) -> CliResult<()> {
    match state {
        OperationState::Completed { result } => render_result(&result, format),
        OperationState::Failed { error, .. } => {
            Err(CliError::failure(anyhow!("{id} failed: {}", error.message)))
        }
        OperationState::Idle => Err(CliError::Cancelled),
        OperationState::Requesting | OperationState::Polling { .. } => Err(CliError::failure(
            anyhow!("{id} stopped while {}", state.label()),
        )),
    }
}

fn rejected(rejection: &GuardRejection) -> CliError {
    CliError::validation(format!(
        "cannot start {}: {} is still in progress",
        rejection.requested(),
        rejection.active()
    ))
}

fn catalog_reconciler() -> Arc<CatalogReconciler<Value>> {
    let updater: Arc<dyn CatalogUpdater<Value>> = Arc::new(|entity_id: &str, entity: &Value| {
        let fields = entity.as_object().map_or(0, serde_json::Map::len);
        info!(entity = entity_id, fields, "entity refreshed");
    });
    Arc::new(CatalogReconciler::new(updater))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use anyhow::Result;
    use httpmock::MockServer;
    use httpmock::prelude::*;
    use opdeck_core::{Kickoff, OperationError, OperationKind, OperationRequest, executor_fn};
    use opdeck_engine::PollPolicy;
    use serde_json::json;

    use crate::client::ApiClient;

    fn context(server: &MockServer, max_failures: Option<u32>) -> Result<AppContext> {
        let base_url = server
            .base_url()
            .parse()
            .map_err(|_| anyhow!("invalid URL"))?;
        let api = ApiClient::new(base_url, Duration::from_secs(5), None, "trace-drive")
            .map_err(|err| anyhow!(err.display_message()))?;
        let policy = PollPolicy {
            interval: Duration::from_millis(10),
            max_consecutive_failures: max_failures,
            backoff_ceiling: None,
        };
        AppContext::new(api, policy, 64).map_err(|err| anyhow!(err.display_message()))
    }

    fn plan(entity: &str, kind: OperationKind, params: Value) -> OperationPlan {
        OperationPlan {
            id: OperationId::new(entity, kind),
            params,
        }
    }

    async fn never() -> io::Result<()> {
        std::future::pending().await
    }

    #[tokio::test]
    async fn install_polls_to_completion() -> Result<()> {
        let server = MockServer::start_async().await;
        let kickoff = server.mock(|when, then| {
            when.method(POST).path("/api/launcher/software/sw-7/install");
            then.status(202).json_body(json!({"installationId": "job-1"}));
        });
        server.mock(|when, then| {
            when.method(GET).path("/api/launcher/install/job-1/status");
            then.status(200)
                .json_body(json!({"status": "completed", "progress": 100}));
        });
        let entity = server.mock(|when, then| {
            when.method(GET).path("/api/launcher/software/sw-7");
            then.status(200)
                .json_body(json!({"id": "sw-7", "installed": true}));
        });

        let ctx = context(&server, Some(3))?;
        let id = OperationId::new("sw-7", OperationKind::Install);
        drive_until(
            &ctx,
            plan("sw-7", OperationKind::Install, Value::Null),
            OutputFormat::Table,
            never(),
        )
        .await
        .map_err(|err| anyhow!(err.display_message()))?;

        kickoff.assert();
        entity.assert();
        assert_eq!(
            ctx.store.snapshot(&id).result(),
            Some(&json!({"id": "sw-7", "installed": true}))
        );
        assert_eq!(ctx.metrics.finished("install", "completed"), 1);
        Ok(())
    }

    #[tokio::test]
    async fn direct_results_skip_polling() -> Result<()> {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/api/account/2fa/enroll");
            then.status(200)
                .json_body(json!({"result": {"secret": "JBSWY3DP"}}));
        });

        let ctx = context(&server, Some(3))?;
        drive_until(
            &ctx,
            plan("me", OperationKind::EnrollTwoFactor, Value::Null),
            OutputFormat::Json,
            never(),
        )
        .await
        .map_err(|err| anyhow!(err.display_message()))?;
        assert_eq!(ctx.metrics.status_polls("ok"), 0);
        Ok(())
    }

    #[tokio::test]
    async fn kickoff_failures_exit_with_failure() -> Result<()> {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/api/agents/agent-1/run");
            then.status(500).body("agent host unreachable");
        });

        let ctx = context(&server, Some(3))?;
        let err = drive_until(
            &ctx,
            plan("agent-1", OperationKind::Run, Value::Null),
            OutputFormat::Table,
            never(),
        )
        .await
        .err();
        assert!(matches!(
            err,
            Some(CliError::Failure(ref error)) if format!("{error}").contains("agent host unreachable")
        ));

        let state = ctx
            .store
            .snapshot(&OperationId::new("agent-1", OperationKind::Run));
        assert!(matches!(
            state,
            OperationState::Failed {
                retryable: true,
                ..
            }
        ));
        assert_eq!(ctx.metrics.finished("run", "failed"), 1);
        Ok(())
    }

    #[tokio::test]
    async fn install_without_job_handle_fails_without_polling() -> Result<()> {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/api/launcher/software/sw-7/install");
            then.status(202).json_body(json!({"message": "accepted"}));
        });
        let ctx = context(&server, Some(3))?;
        let err = drive_until(
            &ctx,
            plan("sw-7", OperationKind::Install, Value::Null),
            OutputFormat::Table,
            never(),
        )
        .await
        .err();
        assert!(matches!(
            err,
            Some(CliError::Failure(ref error)) if format!("{error}").contains("no job handle")
        ));
        assert_eq!(ctx.metrics.status_polls("ok"), 0);
        assert_eq!(ctx.metrics.status_polls("error"), 0);

        let state = ctx
            .store
            .snapshot(&OperationId::new("sw-7", OperationKind::Install));
        assert!(matches!(
            state,
            OperationState::Failed {
                retryable: false,
                ..
            }
        ));
        assert_eq!(ctx.metrics.finished("install", "failed"), 1);
        Ok(())
    }

    #[tokio::test]
    async fn remote_job_failures_carry_the_server_message() -> Result<()> {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST)
                .path("/api/equipment/eq-3/firmware")
                .json_body(json!({"version": "2.1.0"}));
            then.status(202).json_body(json!({"jobId": "fw-9"}));
        });
        server.mock(|when, then| {
            when.method(GET).path("/api/equipment/firmware/fw-9/status");
            then.status(200)
                .json_body(json!({"status": "failed", "error": "checksum mismatch"}));
        });

        let ctx = context(&server, Some(3))?;
        let err = drive_until(
            &ctx,
            plan(
                "eq-3",
                OperationKind::FirmwareUpdate,
                json!({"version": "2.1.0"}),
            ),
            OutputFormat::Table,
            never(),
        )
        .await
        .err();
        assert!(matches!(
            err,
            Some(CliError::Failure(ref error)) if format!("{error}").contains("checksum mismatch")
        ));
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_status_endpoint_exhausts_the_failure_budget() -> Result<()> {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/api/launcher/software/sw-7/install");
            then.status(202).json_body(json!({"jobId": "job-5"}));
        });
        let status = server.mock(|when, then| {
            when.method(GET).path("/api/launcher/install/job-5/status");
            then.status(503);
        });

        let ctx = context(&server, Some(2))?;
        let err = drive_until(
            &ctx,
            plan("sw-7", OperationKind::Install, Value::Null),
            OutputFormat::Table,
            never(),
        )
        .await
        .err();
        assert!(matches!(err, Some(CliError::Failure(_))));
        status.assert_calls(2);
        assert_eq!(ctx.metrics.status_polls("error"), 2);
        Ok(())
    }

    #[tokio::test]
    async fn interrupt_cancels_and_exits_cancelled() -> Result<()> {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/api/launcher/software/sw-7/install");
            then.status(202).json_body(json!({"jobId": "job-7"}));
        });
        server.mock(|when, then| {
            when.method(GET).path("/api/launcher/install/job-7/status");
            then.status(200).json_body(json!({"progress": 10}));
        });

        let ctx = context(&server, Some(3))?;
        let interrupt = async {
            tokio::time::sleep(Duration::from_millis(60)).await;
            Ok::<(), io::Error>(())
        };
        let err = drive_until(
            &ctx,
            plan("sw-7", OperationKind::Install, Value::Null),
            OutputFormat::Table,
            interrupt,
        )
        .await
        .err();

        assert!(matches!(err, Some(CliError::Cancelled)));
        assert!(
            ctx.store
                .snapshot(&OperationId::new("sw-7", OperationKind::Install))
                .is_idle()
        );
        assert_eq!(ctx.metrics.finished("install", "cancelled"), 1);
        Ok(())
    }

    #[tokio::test]
    async fn conflicting_operation_is_rejected_as_validation() -> Result<()> {
        let server = MockServer::start_async().await;
        let launch = server.mock(|when, then| {
            when.method(POST).path("/api/launcher/software/sw-7/launch");
            then.status(200);
        });

        let ctx = context(&server, Some(3))?;
        let stalled: Arc<dyn Executor<Value>> = Arc::new(executor_fn(|_: OperationRequest| {
            std::future::pending::<Result<Kickoff<Value>, OperationError>>()
        }));
        let _install = ctx
            .store
            .start(
                OperationId::new("sw-7", OperationKind::Install),
                stalled,
                StartOptions::new(),
            )
            .map_err(|_| anyhow!("install should be admitted"))?;

        let err = drive_until(
            &ctx,
            plan("sw-7", OperationKind::Launch, Value::Null),
            OutputFormat::Table,
            never(),
        )
        .await
        .err();
        assert!(matches!(
            err,
            Some(CliError::Validation(ref message)) if message.contains("sw-7/install")
        ));
        launch.assert_calls(0);
        Ok(())
    }
}
