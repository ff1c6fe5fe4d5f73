//! Interval-driven status polling for one server-side job.
//!
//! # Design
//! - One sequential loop per job: the next fetch is scheduled only after the
//!   previous one returned, so fetches never overlap.
//! - Transport errors are retried on the next tick; protocol errors and
//!   terminal reports end the loop immediately.
//! - After a successful report the entity fetch is retried under the same
//!   failure budget.
//! - The terminal callback runs at most once, and never after `stop()`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use opdeck_core::{ErrorKind, JobId, OperationError, OperationId, StatusFetcher};
use opdeck_telemetry::Metrics;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default delay between status fetches.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1_000);

/// Default number of consecutive transport failures tolerated.
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 5;

const MAX_BACKOFF_EXPONENT: u32 = 5;

/// Timing and retry settings for a poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay before the first fetch and between fetches.
    pub interval: Duration,
    /// Consecutive transport failures before giving up; `None` retries forever.
    pub max_consecutive_failures: Option<u32>,
    /// Upper bound for exponential backoff; `None` keeps a fixed interval.
    pub backoff_ceiling: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_consecutive_failures: Some(DEFAULT_MAX_CONSECUTIVE_FAILURES),
            backoff_ceiling: None,
        }
    }
}

impl PollPolicy {
    /// Delay before the next fetch after `failures` consecutive transport errors.
    #[must_use]
    pub fn delay_after(&self, failures: u32) -> Duration {
        let Some(ceiling) = self.backoff_ceiling else {
            return self.interval;
        };
        let factor = 2_u32.saturating_pow(failures.min(MAX_BACKOFF_EXPONENT));
        self.interval
            .saturating_mul(factor)
            .min(ceiling)
            .max(self.interval)
    }

    /// Whether `failures` consecutive transport errors exhaust the budget.
    #[must_use]
    pub fn exhausted(&self, failures: u32) -> bool {
        self.max_consecutive_failures
            .is_some_and(|max| failures >= max)
    }
}

/// Background loop fetching the status of one job.
///
/// Dropping the poller stops it.
pub struct Poller {
    stopped: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Poller {
    /// Spawn a poller for `job`.
    ///
    /// `on_update` receives the clamped progress of every non-terminal report.
    /// `on_terminal` receives the confirmed entity on success or the failure
    /// that ended polling.
    pub fn spawn<T, U, D>(
        id: OperationId,
        job: JobId,
        fetcher: Arc<dyn StatusFetcher<T>>,
        policy: PollPolicy,
        metrics: Option<Metrics>,
        on_update: U,
        on_terminal: D,
    ) -> Self
    where
        T: Send + 'static,
        U: Fn(u8) + Send + 'static,
        D: FnOnce(Result<T, OperationError>) + Send + 'static,
    {
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stopped);
        let task = tokio::spawn(async move {
            let outcome = poll_until_terminal(
                &id,
                &job,
                fetcher.as_ref(),
                policy,
                metrics.as_ref(),
                &flag,
                on_update,
            )
            .await;
            if let Some(outcome) = outcome
                && !flag.swap(true, Ordering::AcqRel)
            {
                on_terminal(outcome);
            }
        });
        Self { stopped, task }
    }

    /// Stop polling. Idempotent and safe after natural termination.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.task.abort();
    }

    /// Whether the poller was stopped or delivered its terminal outcome.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll_until_terminal<T, U>(
    id: &OperationId,
    job: &JobId,
    fetcher: &dyn StatusFetcher<T>,
    policy: PollPolicy,
    metrics: Option<&Metrics>,
    stopped: &AtomicBool,
    on_update: U,
) -> Option<Result<T, OperationError>>
where
    T: Send + 'static,
    U: Fn(u8),
{
    let mut failures = 0_u32;
    let mut delay = policy.interval;
    loop {
        tokio::time::sleep(delay).await;
        if stopped.load(Ordering::Acquire) {
            return None;
        }

        let fetched = fetcher.fetch_status(id, job).await;
        if stopped.load(Ordering::Acquire) {
            return None;
        }
        if let Some(metrics) = metrics {
            metrics.inc_status_poll(if fetched.is_ok() { "ok" } else { "error" });
        }

        match fetched {
            Ok(report) if report.is_terminal() => {
                debug!(
                    operation = %id,
                    job = %job,
                    status = ?report.status,
                    "job reached terminal status"
                );
                if report.is_success() {
                    return fetch_confirmed(id, job, fetcher, policy, stopped).await;
                }
                let message = report
                    .error
                    .unwrap_or_else(|| "job reported failure without a message".to_string());
                return Some(Err(OperationError::remote(message)));
            }
            Ok(report) => {
                failures = 0;
                delay = policy.interval;
                on_update(report.percent());
            }
            Err(err) if err.kind() == ErrorKind::Protocol => {
                warn!(
                    operation = %id,
                    job = %job,
                    error = %err,
                    detail = err.message(),
                    "status response could not be decoded"
                );
                return Some(Err(err));
            }
            Err(err) => {
                failures = failures.saturating_add(1);
                warn!(
                    operation = %id,
                    job = %job,
                    error = %err,
                    detail = err.message(),
                    consecutive = failures,
                    "status fetch failed"
                );
                if policy.exhausted(failures) {
                    return Some(Err(OperationError::network(format!(
                        "status polling gave up after {failures} consecutive failures: {}",
                        err.message()
                    ))));
                }
                delay = policy.delay_after(failures);
            }
        }
    }
}

/// Fetch the confirmed entity once the job succeeded. Transport errors are
/// retried under the same consecutive-failure budget as status fetches.
async fn fetch_confirmed<T>(
    id: &OperationId,
    job: &JobId,
    fetcher: &dyn StatusFetcher<T>,
    policy: PollPolicy,
    stopped: &AtomicBool,
) -> Option<Result<T, OperationError>>
where
    T: Send + 'static,
{
    let mut failures = 0_u32;
    loop {
        let fetched = fetcher.fetch_result(id, job).await;
        if stopped.load(Ordering::Acquire) {
            return None;
        }
        let err = match fetched {
            Ok(entity) => return Some(Ok(entity)),
            Err(err) if err.kind() == ErrorKind::Protocol => return Some(Err(err)),
            Err(err) => err,
        };
        failures = failures.saturating_add(1);
        warn!(
            operation = %id,
            job = %job,
            error = %err,
            detail = err.message(),
            consecutive = failures,
            "entity fetch after completion failed"
        );
        if policy.exhausted(failures) {
            return Some(Err(OperationError::network(format!(
                "entity fetch gave up after {failures} consecutive failures: {}",
                err.message()
            ))));
        }
        tokio::time::sleep(policy.delay_after(failures)).await;
        if stopped.load(Ordering::Acquire) {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opdeck_core::{OperationKind, StatusReport};
    use opdeck_test_support::mocks::ScriptedStatusFetcher;
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    fn install() -> OperationId {
        OperationId::new("sw-7", OperationKind::Install)
    }

    fn spawn_collecting(
        fetcher: Arc<ScriptedStatusFetcher<String>>,
        policy: PollPolicy,
    ) -> (
        Poller,
        Arc<Mutex<Vec<u8>>>,
        oneshot::Receiver<Result<String, OperationError>>,
    ) {
        let updates = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&updates);
        let (tx, rx) = oneshot::channel();
        let poller = Poller::spawn(
            install(),
            JobId::from("job-42"),
            fetcher,
            policy,
            None,
            move |progress| {
                if let Ok(mut guard) = sink.lock() {
                    guard.push(progress);
                }
            },
            move |outcome| {
                let _ = tx.send(outcome);
            },
        );
        (poller, updates, rx)
    }

    #[test]
    fn backoff_doubles_until_the_ceiling() {
        let policy = PollPolicy {
            interval: Duration::from_millis(1_000),
            max_consecutive_failures: None,
            backoff_ceiling: Some(Duration::from_millis(30_000)),
        };
        assert_eq!(policy.delay_after(0), Duration::from_millis(1_000));
        assert_eq!(policy.delay_after(1), Duration::from_millis(2_000));
        assert_eq!(policy.delay_after(4), Duration::from_millis(16_000));
        assert_eq!(policy.delay_after(10), Duration::from_millis(30_000));
        assert_eq!(PollPolicy::default().delay_after(3), DEFAULT_POLL_INTERVAL);
        assert!(!policy.exhausted(1_000));
        assert!(PollPolicy::default().exhausted(5));
    }

    #[tokio::test(start_paused = true)]
    async fn reports_progress_then_result() -> anyhow::Result<()> {
        let fetcher = Arc::new(
            ScriptedStatusFetcher::new(Ok("installed".to_string()))
                .then(Ok(StatusReport::in_progress("downloading", 10.0)))
                .then(Ok(StatusReport::in_progress("installing", 55.0)))
                .then(Ok(StatusReport::completed())),
        );
        let (poller, updates, rx) = spawn_collecting(Arc::clone(&fetcher), PollPolicy::default());

        let outcome = rx.await?;
        assert_eq!(outcome, Ok("installed".to_string()));
        assert_eq!(*updates.lock().map_err(|_| anyhow::anyhow!("poisoned"))?, vec![10, 55]);
        assert_eq!(fetcher.status_calls(), 3);
        assert_eq!(fetcher.result_calls(), 1);
        assert!(poller.is_stopped());
        poller.stop();
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn first_fetch_waits_one_interval() {
        let fetcher = Arc::new(
            ScriptedStatusFetcher::new(Ok(String::new()))
                .then(Ok(StatusReport::in_progress("queued", 0.0))),
        );
        let (poller, _updates, _rx) = spawn_collecting(Arc::clone(&fetcher), PollPolicy::default());

        tokio::time::sleep(Duration::from_millis(999)).await;
        assert_eq!(fetcher.status_calls(), 0);
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(fetcher.status_calls(), 1);
        poller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn transport_errors_give_up_after_budget() -> anyhow::Result<()> {
        let fetcher = Arc::new(
            ScriptedStatusFetcher::new(Ok(String::new()))
                .then(Err(OperationError::network("connection refused"))),
        );
        let policy = PollPolicy {
            max_consecutive_failures: Some(3),
            ..PollPolicy::default()
        };
        let (_poller, _updates, rx) = spawn_collecting(Arc::clone(&fetcher), policy);

        let outcome = rx.await?;
        assert!(matches!(outcome, Err(OperationError::Network { .. })));
        assert_eq!(fetcher.status_calls(), 3);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_the_failure_count() -> anyhow::Result<()> {
        let fetcher = Arc::new(
            ScriptedStatusFetcher::new(Ok("ok".to_string()))
                .then(Err(OperationError::network("timeout")))
                .then(Ok(StatusReport::in_progress("installing", 20.0)))
                .then(Err(OperationError::network("timeout")))
                .then(Ok(StatusReport::completed())),
        );
        let policy = PollPolicy {
            max_consecutive_failures: Some(2),
            ..PollPolicy::default()
        };
        let (_poller, updates, rx) = spawn_collecting(fetcher, policy);

        assert_eq!(rx.await?, Ok("ok".to_string()));
        assert_eq!(*updates.lock().map_err(|_| anyhow::anyhow!("poisoned"))?, vec![20]);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn entity_fetch_is_retried_after_completion() -> anyhow::Result<()> {
        let fetcher = Arc::new(
            ScriptedStatusFetcher::new(Ok("installed".to_string()))
                .fail_result_with(OperationError::network("timeout"))
                .then(Ok(StatusReport::completed())),
        );
        let (_poller, _updates, rx) = spawn_collecting(Arc::clone(&fetcher), PollPolicy::default());

        assert_eq!(rx.await?, Ok("installed".to_string()));
        assert_eq!(fetcher.status_calls(), 1);
        assert_eq!(fetcher.result_calls(), 2);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn entity_fetch_gives_up_after_budget() -> anyhow::Result<()> {
        let fetcher = Arc::new(
            ScriptedStatusFetcher::new(Ok("installed".to_string()))
                .fail_result_with(OperationError::network("timeout"))
                .fail_result_with(OperationError::network("timeout"))
                .then(Ok(StatusReport::completed())),
        );
        let policy = PollPolicy {
            max_consecutive_failures: Some(2),
            ..PollPolicy::default()
        };
        let (_poller, _updates, rx) = spawn_collecting(Arc::clone(&fetcher), policy);

        assert!(matches!(rx.await?, Err(OperationError::Network { .. })));
        assert_eq!(fetcher.result_calls(), 2);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn protocol_errors_end_polling_immediately() -> anyhow::Result<()> {
        let fetcher = Arc::new(
            ScriptedStatusFetcher::new(Ok(String::new()))
                .then(Err(OperationError::protocol("missing status field"))),
        );
        let (_poller, _updates, rx) = spawn_collecting(Arc::clone(&fetcher), PollPolicy::default());

        assert!(matches!(rx.await?, Err(OperationError::Protocol { .. })));
        assert_eq!(fetcher.status_calls(), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn failed_report_carries_remote_message() -> anyhow::Result<()> {
        let fetcher = Arc::new(
            ScriptedStatusFetcher::new(Ok(String::new()))
                .then(Ok(StatusReport::failed("disk full"))),
        );
        let (_poller, _updates, rx) = spawn_collecting(Arc::clone(&fetcher), PollPolicy::default());

        assert_eq!(rx.await?, Err(OperationError::remote("disk full")));
        assert_eq!(fetcher.result_calls(), 0);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn stop_suppresses_further_fetches() {
        let fetcher = Arc::new(
            ScriptedStatusFetcher::new(Ok(String::new()))
                .then(Ok(StatusReport::in_progress("installing", 5.0))),
        );
        let (poller, _updates, mut rx) =
            spawn_collecting(Arc::clone(&fetcher), PollPolicy::default());

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(fetcher.status_calls(), 1);
        poller.stop();
        poller.stop();
        tokio::time::sleep(Duration::from_millis(5_000)).await;
        assert_eq!(fetcher.status_calls(), 1);
        assert!(rx.try_recv().is_err());
    }
}
