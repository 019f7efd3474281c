//! Connection lifecycle notifications.
//!
//! Observers register a callback and get back a [`Subscription`] token.
//! Dropping (or cancelling) the token deregisters the callback, so nothing
//! outlives its observer.
//!
//! Callbacks fire on whichever thread raised the event (a pump thread or
//! the caller of `open`/`stop`). They are cloned out of the registry before
//! firing, so a callback may subscribe or unsubscribe without deadlocking.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

/// Lifecycle event emitted by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// `open` established a connection.
    Connected,
    /// A reconnect attempt failed; the next one starts after `retry_in`.
    Reconnecting {
        /// Failed attempt number (0-based).
        attempt: u32,
        /// Wait before the next attempt.
        retry_in: Duration,
    },
    /// A replacement connection is installed.
    Reconnected,
    /// `stop` closed the connection.
    Disconnected,
}

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    next_token: u64,
    callbacks: HashMap<u64, Callback<E>>,
}

/// Thread-safe set of event callbacks.
pub struct CallbackRegistry<E> {
    inner: Arc<Mutex<Registry<E>>>,
}

impl<E: 'static> std::fmt::Debug for CallbackRegistry<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("subscribers", &self.len())
            .finish()
    }
}

impl<E> Default for CallbackRegistry<E> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registry {
                next_token: 0,
                callbacks: HashMap::new(),
            })),
        }
    }
}

impl<E: 'static> CallbackRegistry<E> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback`. It stays registered until the returned token is
    /// cancelled or dropped.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let token = {
            let mut registry = self.inner.lock().expect("callback registry lock poisoned");
            let token = registry.next_token;
            registry.next_token += 1;
            registry.callbacks.insert(token, Arc::new(callback));
            token
        };

        let weak: Weak<Mutex<Registry<E>>> = Arc::downgrade(&self.inner);
        Subscription {
            token,
            remove: Some(Box::new(move |token| {
                if let Some(inner) = weak.upgrade() {
                    inner
                        .lock()
                        .expect("callback registry lock poisoned")
                        .callbacks
                        .remove(&token);
                }
            })),
        }
    }

    /// Fire every registered callback with `event`.
    pub fn emit(&self, event: &E) {
        // Phase 1: snapshot callbacks under the lock.
        let callbacks: Vec<Callback<E>> = {
            let registry = self.inner.lock().expect("callback registry lock poisoned");
            let mut entries: Vec<_> = registry.callbacks.iter().collect();
            entries.sort_by_key(|(token, _)| **token);
            entries.into_iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };

        // Phase 2: fire without holding the lock.
        for callback in callbacks {
            callback(event);
        }
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("callback registry lock poisoned")
            .callbacks
            .len()
    }

    /// Whether nobody is subscribed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Registration token returned by [`CallbackRegistry::subscribe`].
#[must_use = "dropping a Subscription deregisters the callback"]
pub struct Subscription {
    token: u64,
    remove: Option<Box<dyn FnOnce(u64) + Send + Sync>>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("token", &self.token)
            .field("active", &self.remove.is_some())
            .finish()
    }
}

impl Subscription {
    /// Deregister the callback now.
    pub fn cancel(mut self) {
        self.deregister();
    }

    fn deregister(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove(self.token);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.deregister();
    }
}
