//! Signal Implementation
//!
//! A Signal is the fundamental unit of the store: an addressable mutable
//! value cell with change notification.
//!
//! # Semantics
//!
//! 1. Writes are total replacements (`set`) or functional updates over the
//!    previous value (`update`).
//!
//! 2. A write whose result equals the current value is suppressed: nothing
//!    is stored and no listener runs. This is what keeps no-op writes from
//!    triggering redundant renders downstream.
//!
//! 3. Listeners run synchronously, in registration order, with the new
//!    value. Subscribing invokes the listener once immediately with the
//!    current value, so a late subscriber is never behind.
//!
//! 4. Reading inside a tracking scope records a dependency edge in the hub,
//!    which is how derived values discover what they read.
//!
//! # Thread Safety
//!
//! The value sits behind a `RwLock` and the listener list behind another.
//! Cloning a signal shares both; the clone is the same cell.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use tracing::trace;

use super::context::TrackingContext;
use super::hub::NotifyHub;

/// Unique identifier for a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignalId(u64);

impl SignalId {
    /// Generate a new unique signal ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for SignalId {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for deregistering a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

struct ListenerEntry<T> {
    id: ListenerId,
    call: Box<dyn Fn(&T) + Send + Sync>,
}

struct Shared<T> {
    value: RwLock<T>,
    /// Registration order is notification order.
    listeners: RwLock<Vec<ListenerEntry<T>>>,
    hub: Weak<NotifyHub>,
}

/// A reactive value cell.
///
/// # Example
///
/// ```rust,ignore
/// let hub = NotifyHub::new();
/// let count = Signal::new(&hub, 0);
///
/// let sub = count.subscribe(|v| println!("count = {v}")); // prints 0
/// count.set(5);                                           // prints 5
/// count.set(5);                                           // suppressed, no print
/// count.unsubscribe(sub);
/// ```
pub struct Signal<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    id: SignalId,
    shared: Arc<Shared<T>>,
}

impl<T> Signal<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a new signal under the given hub.
    pub fn new(hub: &Arc<NotifyHub>, initial: T) -> Self {
        Self {
            id: SignalId::new(),
            shared: Arc::new(Shared {
                value: RwLock::new(initial),
                listeners: RwLock::new(Vec::new()),
                hub: Arc::downgrade(hub),
            }),
        }
    }

    /// The signal's unique ID.
    pub fn id(&self) -> SignalId {
        self.id
    }

    /// Read the current value.
    ///
    /// Inside a tracking scope this also records the read as a dependency
    /// of the current computation.
    pub fn get(&self) -> T {
        if let Some(dependent) = TrackingContext::current() {
            if let Some(hub) = self.shared.hub.upgrade() {
                hub.add_edge(self.id, dependent);
            }
        }
        self.get_untracked()
    }

    /// Read the current value without recording a dependency.
    pub fn get_untracked(&self) -> T {
        self.shared
            .value
            .read()
            .expect("value lock poisoned")
            .clone()
    }

    /// Replace the value and notify listeners.
    ///
    /// If the new value equals the current one, nothing is stored and no
    /// listener runs.
    pub fn set(&self, value: T) {
        {
            let mut guard = self.shared.value.write().expect("value lock poisoned");
            if *guard == value {
                trace!(signal = self.id.raw(), "write suppressed, value unchanged");
                return;
            }
            *guard = value.clone();
        }
        self.notify(&value);
    }

    /// Compute the next value from the previous one, then `set` it.
    ///
    /// The equality suppression of `set` applies to the computed result.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let next = {
            let guard = self.shared.value.read().expect("value lock poisoned");
            f(&guard)
        };
        self.set(next);
    }

    /// Register a listener and immediately invoke it once with the current
    /// value. Returns a handle for [`Signal::unsubscribe`].
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = ListenerId::next();
        let current = self.get_untracked();
        listener(&current);
        self.shared
            .listeners
            .write()
            .expect("listener lock poisoned")
            .push(ListenerEntry {
                id,
                call: Box::new(listener),
            });
        id
    }

    /// Remove a listener. The signal keeps nothing of it afterwards.
    pub fn unsubscribe(&self, id: ListenerId) {
        self.shared
            .listeners
            .write()
            .expect("listener lock poisoned")
            .retain(|entry| entry.id != id);
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.shared
            .listeners
            .read()
            .expect("listener lock poisoned")
            .len()
    }

    fn notify(&self, value: &T) {
        {
            let listeners = self.shared.listeners.read().expect("listener lock poisoned");
            for entry in listeners.iter() {
                (entry.call)(value);
            }
        }
        if let Some(hub) = self.shared.hub.upgrade() {
            hub.signal_changed(self.id);
        }
    }
}

impl<T> Clone for Signal<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Debug for Signal<T>
where
    T: Clone + PartialEq + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id)
            .field("value", &self.get_untracked())
            .field("listeners", &self.listener_count())
            .finish()
    }
}
