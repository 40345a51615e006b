//! Notification Hub
//!
//! The hub is the coordinator between signals and the derived computations
//! that read them. It owns the edge table (signal → dependents) and holds
//! weak references to the dependents themselves, so a dropped derived value
//! never outlives its registration.
//!
//! One hub is constructed per runtime and passed by `Arc` to every signal
//! and derived value created under it. Keeping the hub an explicit object —
//! rather than a process-global — means each test builds its own isolated
//! reactive world.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use super::SignalId;

/// Unique identifier for a dependent computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DependentId(u64);

impl DependentId {
    /// Generate a new unique dependent ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for DependentId {
    fn default() -> Self {
        Self::new()
    }
}

/// A computation that must be re-run when one of its dependencies changes.
pub trait Dependent: Send + Sync {
    /// The dependent's unique ID.
    fn dependent_id(&self) -> DependentId;

    /// Re-run the computation. Called inline from the notification path.
    fn dependency_changed(&self);
}

/// Per-runtime coordinator wiring signal changes to dependent recomputation.
pub struct NotifyHub {
    dependents: RwLock<HashMap<DependentId, Weak<dyn Dependent>>>,
    edges: RwLock<HashMap<SignalId, Vec<DependentId>>>,
}

impl NotifyHub {
    /// Create a new, empty hub.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            dependents: RwLock::new(HashMap::new()),
            edges: RwLock::new(HashMap::new()),
        })
    }

    /// Register a dependent computation. Only a weak reference is kept.
    pub fn register(&self, dependent: Arc<dyn Dependent>) {
        let id = dependent.dependent_id();
        self.dependents
            .write()
            .expect("dependents lock poisoned")
            .insert(id, Arc::downgrade(&dependent));
    }

    /// Record that `dependent` read `signal` during its last computation.
    pub fn add_edge(&self, signal: SignalId, dependent: DependentId) {
        self.edges
            .write()
            .expect("edges lock poisoned")
            .entry(signal)
            .or_default()
            .push(dependent);
    }

    /// Drop every edge pointing at `dependent`.
    ///
    /// Called before a dependent re-runs, so stale dependencies from the
    /// previous run do not keep triggering it.
    pub fn clear_edges(&self, dependent: DependentId) {
        let mut edges = self.edges.write().expect("edges lock poisoned");
        for targets in edges.values_mut() {
            targets.retain(|d| *d != dependent);
        }
    }

    /// Notify every dependent of `signal` that it changed.
    ///
    /// Dependents are invoked inline, after all hub locks are released, so a
    /// recomputation is free to read signals and rewrite its own edges.
    /// Dependents that have been dropped are purged as they are discovered.
    pub fn signal_changed(&self, signal: SignalId) {
        let targets = {
            let edges = self.edges.read().expect("edges lock poisoned");
            match edges.get(&signal) {
                Some(targets) if !targets.is_empty() => targets.clone(),
                _ => return,
            }
        };

        let mut live = Vec::with_capacity(targets.len());
        let mut dead = Vec::new();
        {
            let dependents = self.dependents.read().expect("dependents lock poisoned");
            for id in targets {
                match dependents.get(&id).and_then(Weak::upgrade) {
                    Some(dependent) => live.push(dependent),
                    None => dead.push(id),
                }
            }
        }

        if !dead.is_empty() {
            let mut dependents = self.dependents.write().expect("dependents lock poisoned");
            let mut edges = self.edges.write().expect("edges lock poisoned");
            for id in &dead {
                dependents.remove(id);
                for targets in edges.values_mut() {
                    targets.retain(|d| d != id);
                }
            }
        }

        for dependent in live {
            dependent.dependency_changed();
        }
    }

    /// Number of registered dependents (including not-yet-purged ones).
    pub fn dependent_count(&self) -> usize {
        self.dependents
            .read()
            .expect("dependents lock poisoned")
            .len()
    }
}
