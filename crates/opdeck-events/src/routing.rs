//! Transition feed routing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use opdeck_core::{OperationId, OperationState};
use tokio::sync::broadcast::{self, Receiver, Sender, error::RecvError, error::TryRecvError};

use crate::payloads::{DEFAULT_REPLAY_CAPACITY, EventId, TransitionEnvelope};

struct Replay<T> {
    buffer: VecDeque<TransitionEnvelope<T>>,
    next_id: EventId,
}

/// Ordered feed of operation transitions built on `tokio::broadcast`.
///
/// Publishing and subscribing share one lock, so a subscriber that asks for a
/// replay receives every transition after its cursor exactly once.
pub struct TransitionBus<T> {
    sender: Sender<TransitionEnvelope<T>>,
    replay: Arc<Mutex<Replay<T>>>,
    replay_capacity: usize,
}

impl<T> Clone for TransitionBus<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            replay: Arc::clone(&self.replay),
            replay_capacity: self.replay_capacity,
        }
    }
}

impl<T> TransitionBus<T>
where
    T: Clone,
{
    /// Construct a feed with a custom replay capacity.
    ///
    /// # Panics
    ///
    /// Panics if `replay_capacity` is zero.
    #[must_use]
    pub fn with_capacity(replay_capacity: usize) -> Self {
        assert!(replay_capacity > 0, "transition feed capacity must be positive");
        let (sender, _) = broadcast::channel(replay_capacity);
        Self {
            sender,
            replay: Arc::new(Mutex::new(Replay {
                buffer: VecDeque::with_capacity(replay_capacity),
                next_id: 1,
            })),
            replay_capacity,
        }
    }

    /// Construct a feed with the default replay capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Publish a transition and return its sequence number.
    pub fn publish(
        &self,
        operation: OperationId,
        generation: u64,
        state: OperationState<T>,
    ) -> EventId {
        let mut replay = self.lock_replay();
        let seq = replay.next_id;
        replay.next_id = replay.next_id.saturating_add(1);

        let envelope = TransitionEnvelope {
            seq,
            timestamp: Utc::now(),
            operation,
            generation,
            state,
        };
        if replay.buffer.len() == self.replay_capacity {
            let _ = replay.buffer.pop_front();
        }
        replay.buffer.push_back(envelope.clone());
        let _ = self.sender.send(envelope);
        seq
    }

    /// Subscribe to every operation, replaying buffered transitions after `since`.
    #[must_use]
    pub fn subscribe(&self, since: Option<EventId>) -> TransitionStream<T> {
        self.open(None, since)
    }

    /// Subscribe to one operation, replaying buffered transitions after `since`.
    #[must_use]
    pub fn subscribe_operation(
        &self,
        operation: OperationId,
        since: Option<EventId>,
    ) -> TransitionStream<T> {
        self.open(Some(operation), since)
    }

    /// Sequence number of the newest buffered transition.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        self.lock_replay().buffer.back().map(|env| env.seq)
    }

    /// Buffered transitions published after `since`.
    #[must_use]
    pub fn backlog_since(&self, since: EventId) -> Vec<TransitionEnvelope<T>> {
        self.lock_replay()
            .buffer
            .iter()
            .filter(|env| env.seq > since)
            .cloned()
            .collect()
    }

    fn open(&self, filter: Option<OperationId>, since: Option<EventId>) -> TransitionStream<T> {
        let replay = self.lock_replay();
        let receiver = self.sender.subscribe();
        let backlog = since.map_or_else(VecDeque::new, |since| {
            replay
                .buffer
                .iter()
                .filter(|env| env.seq > since)
                .filter(|env| filter.as_ref().is_none_or(|id| env.concerns(id)))
                .cloned()
                .collect()
        });
        drop(replay);

        TransitionStream {
            backlog,
            receiver,
            filter,
        }
    }

    fn lock_replay(&self) -> MutexGuard<'_, Replay<T>> {
        self.replay.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Default for TransitionBus<T>
where
    T: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Subscriber handle; dropping it unsubscribes.
pub struct TransitionStream<T> {
    backlog: VecDeque<TransitionEnvelope<T>>,
    receiver: Receiver<TransitionEnvelope<T>>,
    filter: Option<OperationId>,
}

impl<T> TransitionStream<T>
where
    T: Clone,
{
    /// Receive the next matching transition, draining the replay backlog first.
    ///
    /// Returns `None` once the feed is closed. Transitions lost to overflow are
    /// skipped.
    pub async fn next(&mut self) -> Option<TransitionEnvelope<T>> {
        if let Some(envelope) = self.backlog.pop_front() {
            return Some(envelope);
        }
        loop {
            match self.receiver.recv().await {
                Ok(envelope) if self.matches(&envelope) => return Some(envelope),
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`TransitionStream::next`] for synchronous
    /// render loops.
    pub fn try_next(&mut self) -> Option<TransitionEnvelope<T>> {
        if let Some(envelope) = self.backlog.pop_front() {
            return Some(envelope);
        }
        loop {
            match self.receiver.try_recv() {
                Ok(envelope) if self.matches(&envelope) => return Some(envelope),
                Ok(_) | Err(TryRecvError::Lagged(_)) => {}
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Operation this stream is restricted to, if any.
    #[must_use]
    pub const fn filter(&self) -> Option<&OperationId> {
        self.filter.as_ref()
    }

    fn matches(&self, envelope: &TransitionEnvelope<T>) -> bool {
        self.filter.as_ref().is_none_or(|id| envelope.concerns(id))
    }
}
