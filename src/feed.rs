//! Change Feed Module
//!
//! Fan-out of table changes to registered listeners.
//!
//! ## Responsibilities
//! - Hand every effective table mutation to each listener, in apply order
//! - Keep ingestion independent of listener speed: each listener owns an
//!   unbounded queue drained by its own thread
//! - Contain listener failures: errors and panics are logged, the listener
//!   stays registered
//!
//! Events carry the key only; listeners read the row from the table if they
//! need it.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Sender};
use parking_lot::RwLock;

use crate::error::Result;
use crate::model::Key;

/// Kind of change applied to a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Added,
    Updated,
    Removed,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Added => write!(f, "added"),
            ChangeKind::Updated => write!(f, "updated"),
            ChangeKind::Removed => write!(f, "removed"),
        }
    }
}

/// Notification of one applied change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Entity type name
    pub entity: Arc<str>,
    pub kind: ChangeKind,
    pub key: Key,
}

/// Receiver of change events
pub trait ChangeListener: Send + Sync + 'static {
    fn on_change(&self, event: &ChangeEvent) -> Result<()>;
}

impl<F> ChangeListener for F
where
    F: Fn(&ChangeEvent) -> Result<()> + Send + Sync + 'static,
{
    fn on_change(&self, event: &ChangeEvent) -> Result<()> {
        self(event)
    }
}

/// Handle returned by `register`, used to unregister
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerToken(u64);

struct ListenerHandle {
    sender: Sender<ChangeEvent>,
    thread: JoinHandle<()>,
}

/// Dispatches change events to listener threads
pub struct ChangeFeed {
    /// Prefix of listener thread names
    name: String,

    listeners: RwLock<HashMap<u64, ListenerHandle>>,
    next_id: AtomicU64,
}

impl ChangeFeed {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            listeners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a listener; it receives every event published from now on
    pub fn register<L: ChangeListener>(&self, listener: L) -> Result<ListenerToken> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = channel::unbounded::<ChangeEvent>();

        let thread = thread::Builder::new()
            .name(format!("{}-listener-{}", self.name, id))
            .spawn(move || {
                for event in receiver.iter() {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener.on_change(&event)));
                    match outcome {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => tracing::warn!(
                            listener = id,
                            entity = %event.entity,
                            key = %event.key,
                            error = %e,
                            "change listener failed"
                        ),
                        Err(_) => tracing::warn!(
                            listener = id,
                            entity = %event.entity,
                            key = %event.key,
                            "change listener panicked"
                        ),
                    }
                }
            })?;

        self.listeners.write().insert(id, ListenerHandle { sender, thread });
        tracing::debug!(listener = id, "change listener registered");
        Ok(ListenerToken(id))
    }

    /// Unregister a listener. Events already queued are still delivered.
    ///
    /// Returns false if the token is unknown.
    pub fn unregister(&self, token: ListenerToken) -> bool {
        let Some(handle) = self.listeners.write().remove(&token.0) else {
            return false;
        };
        Self::stop(token.0, handle);
        tracing::debug!(listener = token.0, "change listener unregistered");
        true
    }

    /// Queue an event for every registered listener
    pub fn publish(&self, event: &ChangeEvent) {
        for handle in self.listeners.read().values() {
            // Only fails when the listener thread is gone
            let _ = handle.sender.send(event.clone());
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Drain every listener queue and join the listener threads
    pub fn shutdown(&self) {
        let handles: Vec<(u64, ListenerHandle)> = self.listeners.write().drain().collect();
        for (id, handle) in handles {
            Self::stop(id, handle);
        }
    }

    fn stop(id: u64, handle: ListenerHandle) {
        let ListenerHandle { sender, thread } = handle;
        drop(sender);

        // A listener unregistering itself cannot wait for its own thread
        if thread.thread().id() == thread::current().id() {
            return;
        }
        if thread.join().is_err() {
            tracing::warn!(listener = id, "listener thread terminated abnormally");
        }
    }
}

impl Drop for ChangeFeed {
    fn drop(&mut self) {
        self.shutdown();
    }
}
