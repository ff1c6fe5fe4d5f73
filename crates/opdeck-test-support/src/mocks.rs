//! Scripted collaborators for driving an operation store in tests.
//!
//! Each fake replays a queue of responses; once the queue is exhausted the
//! last response repeats. Optional per-step delays use `tokio::time`, so tests
//! running with a paused clock stay deterministic.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use opdeck_core::{
    CatalogUpdater, Executor, JobId, Kickoff, OperationError, OperationId, OperationRequest,
    StatusFetcher, StatusReport,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
struct Step<R> {
    delay: Duration,
    response: R,
}

struct Script<R> {
    queue: Mutex<VecDeque<Step<R>>>,
    last: Mutex<Option<Step<R>>>,
}

impl<R: Clone> Script<R> {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            last: Mutex::new(None),
        }
    }

    fn push(&self, delay: Duration, response: R) {
        lock(&self.queue).push_back(Step { delay, response });
    }

    fn next(&self) -> Option<Step<R>> {
        let popped = lock(&self.queue).pop_front();
        let mut last = lock(&self.last);
        if let Some(step) = popped {
            *last = Some(step);
        }
        last.clone()
    }
}

/// Executor replaying scripted kickoff responses.
pub struct ScriptedExecutor<T> {
    script: Script<Result<Kickoff<T>, OperationError>>,
    requests: Mutex<Vec<OperationRequest>>,
    cancels: Mutex<Vec<OperationId>>,
}

impl<T> ScriptedExecutor<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Executor answering every call with `response`.
    #[must_use]
    pub fn new(response: Result<Kickoff<T>, OperationError>) -> Self {
        Self::delayed(Duration::ZERO, response)
    }

    /// Executor answering every call with `response` after `delay`.
    #[must_use]
    pub fn delayed(delay: Duration, response: Result<Kickoff<T>, OperationError>) -> Self {
        let script = Script::new();
        script.push(delay, response);
        Self {
            script,
            requests: Mutex::new(Vec::new()),
            cancels: Mutex::new(Vec::new()),
        }
    }

    /// Executor resolving immediately with a direct result.
    #[must_use]
    pub fn done(result: T) -> Self {
        Self::new(Ok(Kickoff::Done(result)))
    }

    /// Executor resolving immediately with a job handle.
    #[must_use]
    pub fn job(job: &str) -> Self {
        Self::new(Ok(Kickoff::Job(JobId::from(job))))
    }

    /// Executor failing immediately with `error`.
    #[must_use]
    pub fn failing(error: OperationError) -> Self {
        Self::new(Err(error))
    }

    /// Queue another response for a later call.
    #[must_use]
    pub fn then(self, response: Result<Kickoff<T>, OperationError>) -> Self {
        self.then_after(Duration::ZERO, response)
    }

    /// Queue another response delivered after `delay`.
    #[must_use]
    pub fn then_after(self, delay: Duration, response: Result<Kickoff<T>, OperationError>) -> Self {
        self.script.push(delay, response);
        self
    }

    /// Requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<OperationRequest> {
        lock(&self.requests).clone()
    }

    /// Number of kickoff calls received.
    #[must_use]
    pub fn calls(&self) -> usize {
        lock(&self.requests).len()
    }

    /// Identifiers passed to the cancel hook.
    #[must_use]
    pub fn cancelled(&self) -> Vec<OperationId> {
        lock(&self.cancels).clone()
    }
}

#[async_trait]
impl<T> Executor<T> for ScriptedExecutor<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn execute(&self, request: OperationRequest) -> Result<Kickoff<T>, OperationError> {
        lock(&self.requests).push(request);
        let step = self
            .script
            .next()
            .ok_or_else(|| OperationError::protocol("executor script is empty"))?;
        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }
        step.response
    }

    fn cancel(&self, id: &OperationId) {
        lock(&self.cancels).push(id.clone());
    }
}

/// Status fetcher replaying scripted status reports.
pub struct ScriptedStatusFetcher<T> {
    script: Script<Result<StatusReport, OperationError>>,
    result: Result<T, OperationError>,
    result_errors: Mutex<VecDeque<OperationError>>,
    status_calls: AtomicUsize,
    result_calls: AtomicUsize,
    jobs: Mutex<Vec<JobId>>,
}

impl<T> ScriptedStatusFetcher<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Fetcher whose `fetch_result` answers with `result`; queue reports with
    /// [`ScriptedStatusFetcher::then`].
    #[must_use]
    pub fn new(result: Result<T, OperationError>) -> Self {
        Self {
            script: Script::new(),
            result,
            result_errors: Mutex::new(VecDeque::new()),
            status_calls: AtomicUsize::new(0),
            result_calls: AtomicUsize::new(0),
            jobs: Mutex::new(Vec::new()),
        }
    }

    /// Queue a status response.
    #[must_use]
    pub fn then(self, response: Result<StatusReport, OperationError>) -> Self {
        self.then_after(Duration::ZERO, response)
    }

    /// Queue a status response delivered after `delay`.
    #[must_use]
    pub fn then_after(self, delay: Duration, response: Result<StatusReport, OperationError>) -> Self {
        self.script.push(delay, response);
        self
    }

    /// Fail the next entity fetch with `error` before falling back to the
    /// configured result.
    #[must_use]
    pub fn fail_result_with(self, error: OperationError) -> Self {
        lock(&self.result_errors).push_back(error);
        self
    }

    /// Queue one in-progress report per progress value.
    #[must_use]
    pub fn then_progress(self, values: &[f64]) -> Self {
        values.iter().fold(self, |fetcher, value| {
            fetcher.then(Ok(StatusReport::in_progress("in_progress", *value)))
        })
    }

    /// Number of status fetches started.
    #[must_use]
    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    /// Number of entity fetches started.
    #[must_use]
    pub fn result_calls(&self) -> usize {
        self.result_calls.load(Ordering::SeqCst)
    }

    /// Job handles seen by status fetches.
    #[must_use]
    pub fn jobs(&self) -> Vec<JobId> {
        lock(&self.jobs).clone()
    }
}

#[async_trait]
impl<T> StatusFetcher<T> for ScriptedStatusFetcher<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn fetch_status(
        &self,
        _id: &OperationId,
        job: &JobId,
    ) -> Result<StatusReport, OperationError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.jobs).push(job.clone());
        let step = self
            .script
            .next()
            .ok_or_else(|| OperationError::protocol("status script is empty"))?;
        if !step.delay.is_zero() {
            tokio::time::sleep(step.delay).await;
        }
        step.response
    }

    async fn fetch_result(&self, _id: &OperationId, _job: &JobId) -> Result<T, OperationError> {
        self.result_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = lock(&self.result_errors).pop_front() {
            return Err(error);
        }
        self.result.clone()
    }
}

/// Catalog updater that records every update it receives.
pub struct RecordingCatalog<T> {
    updates: Mutex<Vec<(String, T)>>,
}

impl<T> Default for RecordingCatalog<T> {
    fn default() -> Self {
        Self {
            updates: Mutex::new(Vec::new()),
        }
    }
}

impl<T: Clone> RecordingCatalog<T> {
    /// Updates received so far, oldest first.
    #[must_use]
    pub fn updates(&self) -> Vec<(String, T)> {
        lock(&self.updates).clone()
    }
}

impl<T> CatalogUpdater<T> for RecordingCatalog<T>
where
    T: Clone + Send + Sync,
{
    fn update_catalog(&self, entity_id: &str, entity: &T) {
        lock(&self.updates).push((entity_id.to_string(), entity.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opdeck_core::OperationKind;
    use serde_json::Value;

    fn request() -> OperationRequest {
        OperationRequest {
            id: OperationId::new("agent-1", OperationKind::Run),
            generation: 1,
            params: Value::Null,
        }
    }

    #[tokio::test]
    async fn executor_repeats_last_response() -> anyhow::Result<()> {
        let executor = ScriptedExecutor::done(1_u32).then(Ok(Kickoff::Done(2)));
        assert_eq!(executor.execute(request()).await?, Kickoff::Done(1));
        assert_eq!(executor.execute(request()).await?, Kickoff::Done(2));
        assert_eq!(executor.execute(request()).await?, Kickoff::Done(2));
        assert_eq!(executor.calls(), 3);

        executor.cancel(&request().id);
        assert_eq!(executor.cancelled(), vec![request().id]);
        Ok(())
    }

    #[tokio::test]
    async fn fetcher_counts_calls_and_jobs() -> anyhow::Result<()> {
        let fetcher = ScriptedStatusFetcher::new(Ok(7_u32)).then_progress(&[10.0, 55.0]);
        let id = request().id;
        let job = JobId::from("job-42");

        assert_eq!(fetcher.fetch_status(&id, &job).await?.percent(), 10);
        assert_eq!(fetcher.fetch_status(&id, &job).await?.percent(), 55);
        assert_eq!(fetcher.fetch_status(&id, &job).await?.percent(), 55);
        assert_eq!(fetcher.fetch_result(&id, &job).await?, 7);
        assert_eq!(fetcher.status_calls(), 3);
        assert_eq!(fetcher.result_calls(), 1);
        assert_eq!(fetcher.jobs().len(), 3);
        Ok(())
    }

    #[test]
    fn catalog_records_updates_in_order() {
        let catalog = RecordingCatalog::default();
        catalog.update_catalog("sw-7", &"v1".to_string());
        catalog.update_catalog("sw-7", &"v2".to_string());
        assert_eq!(
            catalog.updates(),
            vec![("sw-7".to_string(), "v1".to_string()), ("sw-7".to_string(), "v2".to_string())]
        );
    }
}
