use crate::error::Error;
use crate::model::{ConnectionState, ForwardSnapshot};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::warn;

/// One failure, constructed at the point of failure and delivered once to
/// every live subscriber. Never stored.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub operation: &'static str,
    pub message: String,
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn new(operation: &'static str, error: &Error) -> Self {
        let detail = std::error::Error::source(error).map(|source| source.to_string());
        Self {
            operation,
            message: error.to_string(),
            detail,
            timestamp: Utc::now(),
        }
    }

    pub fn from_message(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
            detail: None,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Notification {
    Status(ConnectionState),
    Error(ErrorRecord),
    Forwards(Vec<ForwardSnapshot>),
}

#[derive(Default)]
struct HubInner {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<u64, mpsc::UnboundedSender<Notification>>>,
}

/// Fan-out channel for status transitions, operation errors and forward-list
/// updates. Cloning shares the subscriber set.
#[derive(Clone, Default)]
pub struct NotificationHub {
    inner: Arc<HubInner>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an observer. Dropping the returned subscription (or calling
    /// `unsubscribe`) removes it from the hub.
    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .insert(id, tx);
        Subscription {
            id,
            hub: Arc::clone(&self.inner),
            receiver: rx,
        }
    }

    pub fn publish(&self, notification: Notification) {
        let mut subscribers = self
            .inner
            .subscribers
            .lock()
            .expect("subscriber lock poisoned");
        subscribers.retain(|_, tx| tx.send(notification.clone()).is_ok());
    }

    pub fn publish_status(&self, state: ConnectionState) {
        self.publish(Notification::Status(state));
    }

    pub fn publish_error(&self, record: ErrorRecord) {
        warn!(
            operation = record.operation,
            message = %record.message,
            "operation failed"
        );
        self.publish(Notification::Error(record));
    }

    pub fn publish_forwards(&self, forwards: Vec<ForwardSnapshot>) {
        self.publish(Notification::Forwards(forwards));
    }

    /// Drops every subscription.
    pub fn clear(&self) {
        self.inner
            .subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .lock()
            .expect("subscriber lock poisoned")
            .len()
    }
}

pub struct Subscription {
    id: u64,
    hub: Arc<HubInner>,
    receiver: mpsc::UnboundedReceiver<Notification>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Notification> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Notification> {
        self.receiver.try_recv().ok()
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Ok(mut subscribers) = self.hub.subscribers.lock() {
            subscribers.remove(&self.id);
        }
    }
}
