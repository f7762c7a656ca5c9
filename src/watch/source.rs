// src/watch/source.rs

//! Repository object event sources

use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

/// Lifecycle event for one repository object
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Added(Value),
    Modified(Value),
    Deleted(Value),
}

impl WatchEvent {
    /// The repository object carried by the event
    pub fn object(&self) -> &Value {
        match self {
            WatchEvent::Added(obj) | WatchEvent::Modified(obj) | WatchEvent::Deleted(obj) => obj,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WatchEvent::Added(_) => "Added",
            WatchEvent::Modified(_) => "Modified",
            WatchEvent::Deleted(_) => "Deleted",
        }
    }
}

/// Opens a stream of repository object events
///
/// The stream ends when the sender side is dropped.
#[async_trait]
pub trait RepositoryWatcher: Send + Sync {
    async fn watch(&self) -> Result<mpsc::Receiver<WatchEvent>>;
}

/// Watcher fed from an in-process channel
///
/// The stream can be opened once.
pub struct ChannelWatcher {
    events: Mutex<Option<mpsc::Receiver<WatchEvent>>>,
}

impl ChannelWatcher {
    /// Create a watcher and the sender that feeds it
    pub fn new(capacity: usize) -> (mpsc::Sender<WatchEvent>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            tx,
            Self {
                events: Mutex::new(Some(rx)),
            },
        )
    }
}

#[async_trait]
impl RepositoryWatcher for ChannelWatcher {
    async fn watch(&self) -> Result<mpsc::Receiver<WatchEvent>> {
        self.events
            .lock()
            .take()
            .ok_or_else(|| Error::InitError("Watch stream already opened".to_string()))
    }
}
