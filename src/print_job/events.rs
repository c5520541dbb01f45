//! Job notifications: observers registered on a job are called synchronously,
//! in registration order, on every state change and every acknowledged line.

use std::sync::{Arc, RwLock, PoisonError};

use thiserror::Error;
use tokio::sync::broadcast;

use super::JobState;

/// Failure reported by an observer callback.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ObserverError(pub String);

impl From<String> for ObserverError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for ObserverError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

/// Receives job notifications. Both methods default to doing nothing.
///
/// Returning an error puts the job into `Error` with the observer's message.
pub trait JobObserver: Send + Sync {
    fn on_state_change(&self, _state: JobState, _error: &str) -> Result<(), ObserverError> {
        Ok(())
    }

    fn on_progress(&self, _position: u64) -> Result<(), ObserverError> {
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct Observers {
    list: RwLock<Vec<Arc<dyn JobObserver>>>,
}

impl Observers {
    pub(crate) fn subscribe(&self, observer: Arc<dyn JobObserver>) {
        self.list.write().unwrap_or_else(PoisonError::into_inner).push(observer);
    }

    // Snapshot so observers may subscribe or call back into the job while being notified.
    fn snapshot(&self) -> Vec<Arc<dyn JobObserver>> {
        self.list.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Notify every observer; the first failure is returned after all were called.
    pub(crate) fn state_changed(&self, state: JobState, error: &str) -> Result<(), ObserverError> {
        let mut result = Ok(());
        for observer in self.snapshot() {
            if let Err(e) = observer.on_state_change(state, error) {
                result = result.and(Err(e));
            }
        }
        result
    }

    pub(crate) fn progress(&self, position: u64) -> Result<(), ObserverError> {
        let mut result = Ok(());
        for observer in self.snapshot() {
            if let Err(e) = observer.on_progress(position) {
                result = result.and(Err(e));
            }
        }
        result
    }
}

/// A job notification as delivered to async consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    StateChanged { state: JobState, error: String },
    Progress { position: u64 },
}

/// Observer that forwards notifications into a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    tx: broadcast::Sender<JobEvent>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> (Self, broadcast::Receiver<JobEvent>) {
        let (tx, rx) = broadcast::channel(capacity);
        (Self { tx }, rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }
}

impl JobObserver for EventBroadcaster {
    fn on_state_change(&self, state: JobState, error: &str) -> Result<(), ObserverError> {
        // No receivers is not a failure.
        let _ = self.tx.send(JobEvent::StateChanged { state, error: error.to_string() });
        Ok(())
    }

    fn on_progress(&self, position: u64) -> Result<(), ObserverError> {
        let _ = self.tx.send(JobEvent::Progress { position });
        Ok(())
    }
}
