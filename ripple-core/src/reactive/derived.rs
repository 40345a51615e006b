//! Derived Values
//!
//! A Derived is a value computed from signals. It re-runs whenever any
//! signal it read during its last computation changes — the tracked
//! semantics. Dependency discovery is automatic: the compute closure runs
//! inside a [`TrackingContext`], and every signal read is recorded as an
//! edge in the hub. Edges are cleared and re-collected on every run, so a
//! computation that branches differently between runs tracks exactly what
//! it currently reads.
//!
//! Recomputation happens eagerly, inline in the notification path of the
//! signal that changed. If the recomputed output equals the previous one,
//! the derived value's own listeners are not notified and no further
//! cascade happens.
//!
//! A compute closure that panics unwinds through the notification path to
//! whoever performed the triggering write; the failure is never swallowed.

use std::fmt::Debug;
use std::sync::{Arc, RwLock, Weak};

use super::context::TrackingContext;
use super::hub::{Dependent, DependentId, NotifyHub};
use super::signal::{ListenerId, SignalId};

struct ListenerEntry<T> {
    id: ListenerId,
    call: Box<dyn Fn(&T) + Send + Sync>,
}

struct Inner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Identity used when this computation is the one collecting edges.
    dependent: DependentId,
    /// Identity used when *other* computations read this derived value.
    out_id: SignalId,
    hub: Weak<NotifyHub>,
    compute: Box<dyn Fn() -> T + Send + Sync>,
    value: RwLock<Option<T>>,
    listeners: RwLock<Vec<ListenerEntry<T>>>,
}

impl<T> Inner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn recompute(&self) {
        let Some(hub) = self.hub.upgrade() else {
            return;
        };

        hub.clear_edges(self.dependent);
        let new_value = {
            let _scope = TrackingContext::enter(self.dependent);
            (self.compute)()
        };

        let changed = {
            let mut guard = self.value.write().expect("value lock poisoned");
            if guard.as_ref() == Some(&new_value) {
                false
            } else {
                *guard = Some(new_value.clone());
                true
            }
        };

        if changed {
            {
                let listeners = self.listeners.read().expect("listener lock poisoned");
                for entry in listeners.iter() {
                    (entry.call)(&new_value);
                }
            }
            hub.signal_changed(self.out_id);
        }
    }
}

impl<T> Dependent for Inner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn dependent_id(&self) -> DependentId {
        self.dependent
    }

    fn dependency_changed(&self) {
        self.recompute();
    }
}

/// A dependency-tracked computed value.
///
/// # Example
///
/// ```rust,ignore
/// let hub = NotifyHub::new();
/// let count = Signal::new(&hub, 2);
///
/// let count_clone = count.clone();
/// let doubled = Derived::new(&hub, move || count_clone.get() * 2);
/// assert_eq!(doubled.get(), 4);
///
/// count.set(5);          // doubled recomputes in the notification path
/// assert_eq!(doubled.get(), 10);
/// ```
pub struct Derived<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    inner: Arc<Inner<T>>,
}

impl<T> Derived<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a derived value under the given hub.
    ///
    /// The computation runs once immediately to establish its initial value
    /// and dependency set.
    pub fn new<F>(hub: &Arc<NotifyHub>, compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let inner = Arc::new(Inner {
            dependent: DependentId::new(),
            out_id: SignalId::new(),
            hub: Arc::downgrade(hub),
            compute: Box::new(compute),
            value: RwLock::new(None),
            listeners: RwLock::new(Vec::new()),
        });
        hub.register(inner.clone());
        inner.recompute();
        Self { inner }
    }

    /// Read the current value.
    ///
    /// Inside a tracking scope this records the derived value itself as a
    /// dependency, so derived values can read other derived values.
    pub fn get(&self) -> T {
        if let Some(dependent) = TrackingContext::current() {
            if let Some(hub) = self.inner.hub.upgrade() {
                hub.add_edge(self.inner.out_id, dependent);
            }
        }

        if let Some(value) = self
            .inner
            .value
            .read()
            .expect("value lock poisoned")
            .clone()
        {
            return value;
        }

        self.inner.recompute();
        self.inner
            .value
            .read()
            .expect("value lock poisoned")
            .clone()
            .expect("recomputed derived should have a value")
    }

    /// Register a listener, immediately invoked once with the current value.
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = ListenerId::next();
        let current = self.get();
        listener(&current);
        self.inner
            .listeners
            .write()
            .expect("listener lock poisoned")
            .push(ListenerEntry {
                id,
                call: Box::new(listener),
            });
        id
    }

    /// Remove a listener.
    pub fn unsubscribe(&self, id: ListenerId) {
        self.inner
            .listeners
            .write()
            .expect("listener lock poisoned")
            .retain(|entry| entry.id != id);
    }
}

impl<T> Clone for Derived<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Derived<T>
where
    T: Clone + PartialEq + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Derived")
            .field(
                "value",
                &self.inner.value.read().expect("value lock poisoned"),
            )
            .finish()
    }
}
