//! In-memory registry owning every operation lifecycle transition.
//!
//! # Design
//! - One mutex guards the whole registry. Guard checks, state changes, and
//!   feed publishes for a transition happen inside one critical section, so
//!   publish order equals transition order.
//! - Every accepted start bumps a per-id generation. Late executor or poller
//!   results carrying an older generation are dropped without a transition.
//! - Background tasks hold a weak reference to the store; dropping the last
//!   store handle tears every task down.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use opdeck_core::{
    ActionGuard, CancelError, CatalogReconciler, ErrorKind, Executor, ExclusivityPolicy,
    GuardRejection, JobId, Kickoff, OperationError, OperationId, OperationRequest,
    OperationState, Outcome, StatusFetcher,
};
use opdeck_events::{DEFAULT_REPLAY_CAPACITY, EventId, TransitionBus, TransitionStream};
use opdeck_telemetry::Metrics;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::handle::OperationHandle;
use crate::poller::{PollPolicy, Poller};

type OptimisticCallback = Box<dyn FnOnce(&OperationId) + Send>;

/// Per-start collaborators and parameters.
pub struct StartOptions<T> {
    params: Value,
    status_fetcher: Option<Arc<dyn StatusFetcher<T>>>,
    poll_policy: Option<PollPolicy>,
    reconciler: Option<Arc<CatalogReconciler<T>>>,
    optimistic: Option<OptimisticCallback>,
}

impl<T> Default for StartOptions<T> {
    fn default() -> Self {
        Self {
            params: Value::Null,
            status_fetcher: None,
            poll_policy: None,
            reconciler: None,
            optimistic: None,
        }
    }
}

impl<T> StartOptions<T> {
    /// Options with no parameters and no collaborators.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request parameters forwarded to the executor.
    #[must_use]
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    /// Status fetcher used when the executor returns a job handle.
    #[must_use]
    pub fn with_status_fetcher(mut self, fetcher: Arc<dyn StatusFetcher<T>>) -> Self {
        self.status_fetcher = Some(fetcher);
        self
    }

    /// Poll timing for this start, overriding the store default.
    #[must_use]
    pub const fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.poll_policy = Some(policy);
        self
    }

    /// Reconciler receiving the confirmed entity on completion.
    #[must_use]
    pub fn with_reconciler(mut self, reconciler: Arc<CatalogReconciler<T>>) -> Self {
        self.reconciler = Some(reconciler);
        self
    }

    /// Callback fired once the guard accepts the start, before the executor
    /// runs.
    #[must_use]
    pub fn with_optimistic<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&OperationId) + Send + 'static,
    {
        self.optimistic = Some(Box::new(callback));
        self
    }
}

struct Entry<T> {
    generation: u64,
    state: OperationState<T>,
    executor: Arc<dyn Executor<T>>,
    task: Option<JoinHandle<()>>,
    poller: Option<Poller>,
    done: Option<oneshot::Sender<OperationState<T>>>,
    reconciler: Option<Arc<CatalogReconciler<T>>>,
}

impl<T> Entry<T> {
    fn teardown(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.stop();
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn resolve(&mut self, state: OperationState<T>) {
        if let Some(done) = self.done.take() {
            let _ = done.send(state);
        }
    }
}

struct Registry<T> {
    entries: HashMap<OperationId, Entry<T>>,
    generations: HashMap<OperationId, u64>,
}

impl<T> Registry<T> {
    fn current(&mut self, id: &OperationId, generation: u64) -> Option<&mut Entry<T>> {
        self.entries
            .get_mut(id)
            .filter(|entry| entry.generation == generation)
    }

    fn next_generation(&mut self, id: &OperationId) -> u64 {
        let generation = self.generations.entry(id.clone()).or_insert(0);
        *generation = generation.saturating_add(1);
        *generation
    }

    fn active_count(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.state.is_active())
            .count()
    }
}

struct Shared<T> {
    guard: ActionGuard,
    poll_policy: PollPolicy,
    metrics: Option<Metrics>,
    feed: TransitionBus<T>,
    registry: Mutex<Registry<T>>,
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        let registry = self
            .registry
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        for entry in registry.entries.values_mut() {
            entry.teardown();
        }
    }
}

/// Configures an [`OperationStore`].
pub struct OperationStoreBuilder {
    guard: ActionGuard,
    poll_policy: PollPolicy,
    metrics: Option<Metrics>,
    feed_capacity: usize,
}

impl Default for OperationStoreBuilder {
    fn default() -> Self {
        Self {
            guard: ActionGuard::default(),
            poll_policy: PollPolicy::default(),
            metrics: None,
            feed_capacity: DEFAULT_REPLAY_CAPACITY,
        }
    }
}

impl OperationStoreBuilder {
    /// Exclusivity groups enforced on start.
    #[must_use]
    pub fn exclusivity(mut self, policy: ExclusivityPolicy) -> Self {
        self.guard = ActionGuard::new(policy);
        self
    }

    /// Default poll timing for starts that do not override it.
    #[must_use]
    pub const fn poll_policy(mut self, policy: PollPolicy) -> Self {
        self.poll_policy = policy;
        self
    }

    /// Metrics registry updated on every transition.
    #[must_use]
    pub fn metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Replay capacity of the transition feed. Zero is raised to one.
    #[must_use]
    pub const fn feed_capacity(mut self, capacity: usize) -> Self {
        self.feed_capacity = if capacity == 0 { 1 } else { capacity };
        self
    }

    /// Build the store.
    #[must_use]
    pub fn build<T>(self) -> OperationStore<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        OperationStore {
            shared: Arc::new(Shared {
                guard: self.guard,
                poll_policy: self.poll_policy,
                metrics: self.metrics,
                feed: TransitionBus::with_capacity(self.feed_capacity),
                registry: Mutex::new(Registry {
                    entries: HashMap::new(),
                    generations: HashMap::new(),
                }),
            }),
        }
    }
}

/// Registry mapping operation ids to lifecycle state.
///
/// Cloning is cheap; clones share the same registry.
pub struct OperationStore<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for OperationStore<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Default for OperationStore<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> OperationStore<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Store with the default guard, poll policy, and feed capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Builder for a configured store.
    #[must_use]
    pub fn builder() -> OperationStoreBuilder {
        OperationStoreBuilder::default()
    }

    /// Start an operation.
    ///
    /// Must be called from within a Tokio runtime; the executor runs on a
    /// spawned task.
    ///
    /// # Errors
    ///
    /// Returns [`GuardRejection::AlreadyActive`] when a conflicting operation
    /// on the same entity is requesting or polling. The store is unchanged.
    pub fn start(
        &self,
        id: OperationId,
        executor: Arc<dyn Executor<T>>,
        options: StartOptions<T>,
    ) -> Result<OperationHandle<T>, GuardRejection> {
        let StartOptions {
            params,
            status_fetcher,
            poll_policy,
            reconciler,
            optimistic,
        } = options;
        let shared = &self.shared;
        let (done_tx, done_rx) = oneshot::channel();

        let generation = {
            let mut registry = shared.lock();
            let active = registry
                .entries
                .iter()
                .filter(|(_, entry)| entry.state.is_active())
                .map(|(live, _)| live);
            if let Err(rejection) = shared.guard.check(&id, active) {
                debug!(
                    operation = %id,
                    active = %rejection.active(),
                    "start rejected by action guard"
                );
                if let Some(metrics) = &shared.metrics {
                    metrics.inc_guard_rejection(id.kind().as_str());
                }
                return Err(rejection);
            }

            let generation = registry.next_generation(&id);
            let request = OperationRequest {
                id: id.clone(),
                generation,
                params,
            };
            let task = Shared::spawn_kickoff(
                Arc::downgrade(shared),
                request,
                Arc::clone(&executor),
                status_fetcher,
                poll_policy.unwrap_or(shared.poll_policy),
            );
            let _ = registry.entries.insert(
                id.clone(),
                Entry {
                    generation,
                    state: OperationState::Requesting,
                    executor,
                    task: Some(task),
                    poller: None,
                    done: Some(done_tx),
                    reconciler,
                },
            );
            shared.publish(&id, generation, OperationState::Requesting);
            if let Some(metrics) = &shared.metrics {
                metrics.inc_started(id.kind().as_str());
                metrics.set_active_operations(registry.active_count());
            }
            generation
        };

        if let Some(callback) = optimistic {
            callback(&id);
        }
        Ok(OperationHandle::new(id, generation, done_rx))
    }

    /// Cancel a requesting or polling operation locally.
    ///
    /// Tears down the poller and the pending kickoff, removes the entry, and
    /// invokes the executor's best-effort cancel hook.
    ///
    /// # Errors
    ///
    /// Returns [`CancelError::NotActive`] when nothing is in flight for `id`.
    pub fn cancel(&self, id: &OperationId) -> Result<(), CancelError> {
        let not_active = || CancelError::NotActive { id: id.clone() };
        let executor = {
            let mut registry = self.shared.lock();
            if !registry
                .entries
                .get(id)
                .is_some_and(|entry| entry.state.is_active())
            {
                return Err(not_active());
            }
            let entry = registry.entries.remove(id).ok_or_else(not_active)?;
            let executor = Arc::clone(&entry.executor);
            self.shared.retire(id, entry);
            self.shared.record_active(&registry);
            executor
        };
        info!(operation = %id, "operation cancelled locally");
        executor.cancel(id);
        Ok(())
    }

    /// Acknowledge a terminal state, removing it. Returns whether anything was
    /// removed.
    pub fn dismiss(&self, id: &OperationId) -> bool {
        let mut registry = self.shared.lock();
        if !registry
            .entries
            .get(id)
            .is_some_and(|entry| entry.state.is_terminal())
        {
            return false;
        }
        match registry.entries.remove(id) {
            Some(entry) => {
                self.shared.retire(id, entry);
                true
            }
            None => false,
        }
    }

    /// Drop everything held for `id` regardless of state, without invoking the
    /// cancel hook. Used when the owning view goes away.
    pub fn release(&self, id: &OperationId) {
        let mut registry = self.shared.lock();
        if let Some(entry) = registry.entries.remove(id) {
            self.shared.retire(id, entry);
            self.shared.record_active(&registry);
        }
    }

    /// Release every operation.
    pub fn shutdown(&self) {
        let mut registry = self.shared.lock();
        let drained: Vec<_> = registry.entries.drain().collect();
        for (id, entry) in drained {
            self.shared.retire(&id, entry);
        }
        self.shared.record_active(&registry);
    }

    /// Current state of `id`; `Idle` when nothing is recorded.
    #[must_use]
    pub fn snapshot(&self, id: &OperationId) -> OperationState<T> {
        self.shared
            .lock()
            .entries
            .get(id)
            .map_or(OperationState::Idle, |entry| entry.state.clone())
    }

    /// Ids currently requesting or polling, sorted.
    #[must_use]
    pub fn active(&self) -> Vec<OperationId> {
        let mut ids: Vec<_> = self
            .shared
            .lock()
            .entries
            .iter()
            .filter(|(_, entry)| entry.state.is_active())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Latest generation issued for `id`; zero when never started.
    #[must_use]
    pub fn generation(&self, id: &OperationId) -> u64 {
        self.shared
            .lock()
            .generations
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    /// Every subsequent transition for `id` until the stream is dropped.
    #[must_use]
    pub fn subscribe(&self, id: &OperationId) -> TransitionStream<T> {
        self.shared.feed.subscribe_operation(id.clone(), None)
    }

    /// Every subsequent transition for every id.
    #[must_use]
    pub fn subscribe_all(&self) -> TransitionStream<T> {
        self.shared.feed.subscribe(None)
    }

    /// Transitions after `since` still held in the replay ring, then live ones.
    #[must_use]
    pub fn subscribe_since(&self, since: EventId) -> TransitionStream<T> {
        self.shared.feed.subscribe(Some(since))
    }

    /// Sequence number of the newest published transition.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        self.shared.feed.last_event_id()
    }

    /// Guard enforced on start.
    #[must_use]
    pub fn guard(&self) -> &ActionGuard {
        &self.shared.guard
    }

    /// Metrics registry, if one was configured.
    #[must_use]
    pub fn metrics(&self) -> Option<&Metrics> {
        self.shared.metrics.as_ref()
    }

    #[cfg(test)]
    fn apply_progress(&self, id: &OperationId, generation: u64, progress: u8) -> bool {
        self.shared.apply_progress(id, generation, progress)
    }

    #[cfg(test)]
    fn finish(
        &self,
        id: &OperationId,
        generation: u64,
        outcome: Result<T, OperationError>,
    ) -> bool {
        self.shared.finish(id, generation, outcome)
    }
}

impl<T> Shared<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn lock(&self) -> MutexGuard<'_, Registry<T>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, id: &OperationId, generation: u64, state: OperationState<T>) {
        debug!(
            operation = %id,
            generation,
            state = state.label(),
            progress = state.progress(),
            "operation transition"
        );
        let _ = self.feed.publish(id.clone(), generation, state);
    }

    fn record_active(&self, registry: &Registry<T>) {
        if let Some(metrics) = &self.metrics {
            metrics.set_active_operations(registry.active_count());
        }
    }

    /// Tear down a removed entry and announce its removal.
    fn retire(&self, id: &OperationId, mut entry: Entry<T>) {
        entry.teardown();
        if entry.state.is_active()
            && let Some(metrics) = &self.metrics
        {
            metrics.inc_finished(id.kind().as_str(), Outcome::Cancelled.as_str());
        }
        self.publish(id, entry.generation, OperationState::Idle);
        entry.resolve(OperationState::Idle);
    }

    fn spawn_kickoff(
        store: Weak<Self>,
        request: OperationRequest,
        executor: Arc<dyn Executor<T>>,
        fetcher: Option<Arc<dyn StatusFetcher<T>>>,
        policy: PollPolicy,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let id = request.id.clone();
            let generation = request.generation;
            let kickoff = executor.execute(request).await;
            let Some(store) = store.upgrade() else {
                return;
            };
            match kickoff {
                Ok(Kickoff::Done(result)) => {
                    let _ = store.finish(&id, generation, Ok(result));
                }
                Ok(Kickoff::Job(job)) => match fetcher {
                    Some(fetcher) => {
                        let _ = store.attach_poller(&id, generation, job, fetcher, policy);
                    }
                    None => {
                        let error = OperationError::protocol(format!(
                            "kickoff returned job {job} but no status fetcher is configured"
                        ));
                        let _ = store.finish(&id, generation, Err(error));
                    }
                },
                Err(err) => {
                    let _ = store.finish(&id, generation, Err(err));
                }
            }
        })
    }

    fn attach_poller(
        self: &Arc<Self>,
        id: &OperationId,
        generation: u64,
        job: JobId,
        fetcher: Arc<dyn StatusFetcher<T>>,
        policy: PollPolicy,
    ) -> bool {
        let mut registry = self.lock();
        let Some(entry) = registry.current(id, generation) else {
            debug!(operation = %id, generation, "discarding stale kickoff");
            return false;
        };
        let next = OperationState::Polling {
            progress: 0,
            poll_count: 0,
        };
        if !entry.state.permits(&next) {
            return false;
        }
        entry.state = next.clone();

        let on_update = {
            let store = Arc::downgrade(self);
            let id = id.clone();
            move |progress: u8| {
                if let Some(store) = store.upgrade() {
                    let _ = store.apply_progress(&id, generation, progress);
                }
            }
        };
        let on_terminal = {
            let store = Arc::downgrade(self);
            let id = id.clone();
            move |outcome: Result<T, OperationError>| {
                if let Some(store) = store.upgrade() {
                    let _ = store.finish(&id, generation, outcome);
                }
            }
        };
        debug!(operation = %id, generation, job = %job, "attaching status poller");
        entry.poller = Some(Poller::spawn(
            id.clone(),
            job,
            fetcher,
            policy,
            self.metrics.clone(),
            on_update,
            on_terminal,
        ));
        self.publish(id, generation, next);
        true
    }

    /// Apply a non-terminal progress report, clamping regressions.
    fn apply_progress(&self, id: &OperationId, generation: u64, progress: u8) -> bool {
        let mut registry = self.lock();
        let Some(entry) = registry.current(id, generation) else {
            debug!(operation = %id, generation, "discarding stale progress");
            return false;
        };
        let OperationState::Polling {
            progress: shown,
            poll_count,
        } = &entry.state
        else {
            return false;
        };
        let (shown, poll_count) = (*shown, *poll_count);

        let applied = if progress < shown {
            warn!(
                operation = %id,
                generation,
                reported = progress,
                shown,
                "progress regressed; keeping previous value"
            );
            if let Some(metrics) = &self.metrics {
                metrics.inc_progress_regression();
            }
            shown
        } else {
            progress
        };
        let next = OperationState::Polling {
            progress: applied,
            poll_count: poll_count.saturating_add(1),
        };
        entry.state = next.clone();
        self.publish(id, generation, next);
        true
    }

    /// Move an instance to `Completed` or `Failed`.
    fn finish(
        &self,
        id: &OperationId,
        generation: u64,
        outcome: Result<T, OperationError>,
    ) -> bool {
        let confirmed = {
            let mut registry = self.lock();
            let Some(entry) = registry.current(id, generation) else {
                debug!(operation = %id, generation, "discarding stale result");
                return false;
            };
            let next = match outcome {
                Ok(result) => OperationState::Completed { result },
                Err(err) => {
                    if err.kind() == ErrorKind::Protocol {
                        warn!(
                            operation = %id,
                            generation,
                            error = %err,
                            detail = err.message(),
                            "operation failed on malformed payload"
                        );
                    } else {
                        info!(
                            operation = %id,
                            generation,
                            error = %err,
                            detail = err.message(),
                            "operation failed"
                        );
                    }
                    OperationState::Failed {
                        error: err.to_info(),
                        retryable: err.retryable(),
                    }
                }
            };
            if !entry.state.permits(&next) {
                return false;
            }

            entry.state = next.clone();
            entry.poller = None;
            entry.task = None;
            self.publish(id, generation, next.clone());
            entry.resolve(next.clone());
            let reconciler = entry.reconciler.take();

            let outcome = if next.result().is_some() {
                Outcome::Completed
            } else {
                Outcome::Failed
            };
            if let Some(metrics) = &self.metrics {
                metrics.inc_finished(id.kind().as_str(), outcome.as_str());
            }
            let confirmed = reconciler.zip(next.result().cloned());
            self.record_active(&registry);
            confirmed
        };

        if let Some((reconciler, result)) = confirmed {
            let _ = reconciler.on_completed(id, generation, &result);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opdeck_core::ErrorInfo;
    use opdeck_test_support::fixtures::{install_id, run_id};
    use opdeck_test_support::mocks::{ScriptedExecutor, ScriptedStatusFetcher};
    use std::time::Duration;

    fn polling(progress: u8, poll_count: u32) -> OperationState<String> {
        OperationState::Polling {
            progress,
            poll_count,
        }
    }

    async fn started_polling(store: &OperationStore<String>) -> anyhow::Result<u64> {
        let fetcher: Arc<dyn StatusFetcher<String>> = Arc::new(
            ScriptedStatusFetcher::new(Ok("installed".to_string()))
                .then_after(Duration::from_secs(3_600), Ok(opdeck_core::StatusReport::completed())),
        );
        let handle = store.start(
            install_id(),
            Arc::new(ScriptedExecutor::<String>::job("job-42")),
            StartOptions::new().with_status_fetcher(fetcher),
        )?;
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(store.snapshot(&install_id()), polling(0, 0));
        Ok(handle.generation())
    }

    #[tokio::test(start_paused = true)]
    async fn progress_regressions_are_clamped() -> anyhow::Result<()> {
        let store = OperationStore::<String>::builder()
            .metrics(Metrics::new()?)
            .build();
        let generation = started_polling(&store).await?;

        assert!(store.apply_progress(&install_id(), generation, 40));
        assert!(store.apply_progress(&install_id(), generation, 25));
        assert!(store.apply_progress(&install_id(), generation, 40));
        assert_eq!(store.snapshot(&install_id()), polling(40, 3));
        let regressions = store
            .metrics()
            .map(|metrics| metrics.snapshot().progress_regressions_total);
        assert_eq!(regressions, Some(1));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn stale_generations_never_transition() -> anyhow::Result<()> {
        let store = OperationStore::<String>::new();
        let first = started_polling(&store).await?;
        store.cancel(&install_id())?;
        let second = started_polling(&store).await?;
        assert_eq!(second, first + 1);

        let mut stream = store.subscribe(&install_id());
        assert!(!store.apply_progress(&install_id(), first, 90));
        assert!(!store.finish(&install_id(), first, Ok("stale".to_string())));
        assert!(stream.try_next().is_none());
        assert_eq!(store.snapshot(&install_id()), polling(0, 0));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_states_ignore_further_results() -> anyhow::Result<()> {
        let store = OperationStore::<String>::new();
        let generation = started_polling(&store).await?;
        assert!(store.finish(
            &install_id(),
            generation,
            Err(OperationError::remote("disk full"))
        ));
        assert!(!store.finish(&install_id(), generation, Ok("late".to_string())));
        assert!(!store.apply_progress(&install_id(), generation, 50));
        assert_eq!(
            store.snapshot(&install_id()),
            OperationState::Failed {
                error: ErrorInfo::new(ErrorKind::Remote, "disk full"),
                retryable: true,
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn job_without_fetcher_is_a_protocol_failure() -> anyhow::Result<()> {
        let store = OperationStore::<String>::new();
        let handle = store.start(
            install_id(),
            Arc::new(ScriptedExecutor::<String>::job("job-42")),
            StartOptions::new(),
        )?;
        let state = handle.wait().await;
        assert_eq!(state.error().map(|error| error.kind), Some(ErrorKind::Protocol));
        assert!(matches!(
            state,
            OperationState::Failed {
                retryable: false,
                ..
            }
        ));
        Ok(())
    }

    #[tokio::test]
    async fn cancel_and_dismiss_check_state() -> anyhow::Result<()> {
        let store = OperationStore::<String>::new();
        assert_eq!(
            store.cancel(&run_id()),
            Err(CancelError::NotActive { id: run_id() })
        );
        assert!(!store.dismiss(&run_id()));

        let handle = store.start(
            run_id(),
            Arc::new(ScriptedExecutor::done("running".to_string())),
            StartOptions::new(),
        )?;
        assert!(handle.wait().await.is_terminal());
        assert!(store.cancel(&run_id()).is_err());
        assert!(store.dismiss(&run_id()));
        assert!(store.snapshot(&run_id()).is_idle());
        Ok(())
    }

    #[tokio::test]
    async fn optimistic_callback_fires_on_acceptance() -> anyhow::Result<()> {
        let store = OperationStore::<String>::new();
        let (tx, rx) = std::sync::mpsc::channel();
        let handle = store.start(
            run_id(),
            Arc::new(ScriptedExecutor::done("running".to_string())),
            StartOptions::new().with_optimistic(move |id| {
                let _ = tx.send(id.clone());
            }),
        )?;
        assert_eq!(rx.try_recv()?, run_id());
        let _ = handle.wait().await;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn release_and_shutdown_clear_everything() -> anyhow::Result<()> {
        let store = OperationStore::<String>::builder()
            .metrics(Metrics::new()?)
            .build();
        let _ = started_polling(&store).await?;
        let executor = Arc::new(ScriptedExecutor::<String>::delayed(
            Duration::from_secs(60),
            Ok(Kickoff::Done("running".to_string())),
        ));
        let run = store.start(run_id(), executor.clone(), StartOptions::new())?;

        store.release(&install_id());
        assert!(store.snapshot(&install_id()).is_idle());
        assert_eq!(store.active(), vec![run_id()]);

        store.shutdown();
        assert!(store.active().is_empty());
        assert!(run.wait().await.is_idle());
        assert!(executor.cancelled().is_empty());
        assert_eq!(
            store.metrics().map(|metrics| metrics.snapshot().active_operations),
            Some(0)
        );
        Ok(())
    }
}
