//! Namespace Hierarchy
//!
//! Human-readable, hierarchical addressing over keyed signals. A namespace
//! is a tree node; its path is the colon-joined chain of segments from the
//! root. Each node caches the signals created under it by key, so repeated
//! creation with the same key returns the same signal instance. A node may
//! carry its own backend override, inherited by descendants unless they
//! override it again.
//!
//! Keyed signals hold `serde_json::Value`, making the tree a shared
//! key/value signal store: any serializable payload can live at any key.

use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::reactive::{NotifyHub, Signal};

struct Node {
    /// Empty for the root; `"ui:clock"` style otherwise.
    path: String,
    hub: Arc<NotifyHub>,
    parent: Option<Weak<Node>>,
    backend: RwLock<Option<Arc<dyn Backend>>>,
    children: Mutex<IndexMap<String, Arc<Node>>>,
    signals: Mutex<IndexMap<String, Signal<Value>>>,
}

impl Node {
    fn full_key(&self, suffix: &str) -> String {
        if self.path.is_empty() {
            suffix.to_string()
        } else {
            format!("{}:{}", self.path, suffix)
        }
    }

    /// The backend in effect here: own override, or the nearest ancestor's.
    fn effective_backend(&self) -> Option<Arc<dyn Backend>> {
        if let Some(backend) = self.backend.read().clone() {
            return Some(backend);
        }
        let mut parent = self.parent.clone();
        while let Some(weak) = parent {
            let node = weak.upgrade()?;
            if let Some(backend) = node.backend.read().clone() {
                return Some(backend);
            }
            parent = node.parent.clone();
        }
        None
    }

    /// Route an externally-originated change to the owning signal.
    ///
    /// Returns false when no cached signal matches the key; external
    /// changes never create signals.
    fn apply_external(&self, key: &str, value: &Value) -> bool {
        let target = {
            let signals = self.signals.lock();
            signals
                .iter()
                .find(|(suffix, _)| self.full_key(suffix) == key)
                .map(|(_, signal)| signal.clone())
        };
        if let Some(signal) = target {
            // Same equality-suppressed write path as any local write; this
            // is also what stops mirror echo loops.
            signal.set(value.clone());
            return true;
        }

        let children: Vec<Arc<Node>> = self.children.lock().values().cloned().collect();
        children.iter().any(|child| child.apply_external(key, value))
    }
}

/// A node in the signal namespace tree.
#[derive(Clone)]
pub struct Namespace {
    node: Arc<Node>,
}

impl Namespace {
    /// Create a root namespace under the given hub.
    pub fn root(hub: Arc<NotifyHub>) -> Self {
        Self {
            node: Arc::new(Node {
                path: String::new(),
                hub,
                parent: None,
                backend: RwLock::new(None),
                children: Mutex::new(IndexMap::new()),
                signals: Mutex::new(IndexMap::new()),
            }),
        }
    }

    /// This node's colon-joined path (empty for the root).
    pub fn path(&self) -> &str {
        &self.node.path
    }

    /// The hub this namespace creates signals under.
    pub fn hub(&self) -> &Arc<NotifyHub> {
        &self.node.hub
    }

    /// Get or create the child namespace for one path segment.
    ///
    /// Segments must not contain `:`; that is the path separator.
    pub fn child(&self, segment: &str) -> Namespace {
        debug_assert!(
            !segment.is_empty() && !segment.contains(':'),
            "namespace segment must be non-empty and colon-free"
        );
        let mut children = self.node.children.lock();
        let node = children
            .entry(segment.to_string())
            .or_insert_with(|| {
                Arc::new(Node {
                    path: self.node.full_key(segment),
                    hub: Arc::clone(&self.node.hub),
                    parent: Some(Arc::downgrade(&self.node)),
                    backend: RwLock::new(None),
                    children: Mutex::new(IndexMap::new()),
                    signals: Mutex::new(IndexMap::new()),
                })
            })
            .clone();
        Namespace { node }
    }

    /// Install a backend override for this branch.
    ///
    /// Descendants without their own override inherit it. The backend's
    /// change hook is pointed at this branch, so externally-originated
    /// changes flow back into the owning signals.
    pub fn set_backend(&self, backend: Arc<dyn Backend>) {
        let node = Arc::downgrade(&self.node);
        backend.set_on_change(Arc::new(move |key, value| {
            if let Some(node) = node.upgrade() {
                if !node.apply_external(key, value) {
                    debug!(key, "external change for unknown signal ignored");
                }
            }
        }));
        *self.node.backend.write() = Some(backend);
    }

    /// Get or create the keyed signal `key` under this node.
    ///
    /// Creation is idempotent: the same key always returns the same signal
    /// instance. On first creation the effective backend (if any) is
    /// consulted for a stored value, falling back to `default`; afterwards
    /// every change to the signal is mirrored outward best-effort.
    pub fn signal(&self, key: &str, default: Value) -> Signal<Value> {
        let mut signals = self.node.signals.lock();
        if let Some(signal) = signals.get(key) {
            return signal.clone();
        }

        let full_key = self.node.full_key(key);
        let backend = self.node.effective_backend();

        let initial = match &backend {
            Some(backend) => match backend.get_value(&full_key) {
                Ok(Some(stored)) => stored,
                Ok(None) => default,
                Err(err) => {
                    warn!(key = %full_key, error = %err, "backend read failed, using default");
                    default
                }
            },
            None => default,
        };

        let signal = Signal::new(&self.node.hub, initial);
        if let Some(backend) = backend {
            let mirror_key = full_key.clone();
            signal.subscribe(move |value: &Value| {
                if let Err(err) = backend.set_value(&mirror_key, value) {
                    warn!(key = %mirror_key, error = %err, "backend mirror write failed");
                }
            });
        }

        debug!(key = %full_key, "signal created");
        signals.insert(key.to_string(), signal.clone());
        signal
    }

    /// Look up an already-created signal by its full colon-joined key.
    ///
    /// Never creates anything: an unknown key is how subscribe requests for
    /// unidentified signals get rejected.
    pub fn find_signal(&self, key: &str) -> Option<Signal<Value>> {
        let relative = if self.node.path.is_empty() {
            key
        } else {
            key.strip_prefix(&self.node.path)?.strip_prefix(':')?
        };

        let mut segments: Vec<&str> = relative.split(':').collect();
        let leaf = segments.pop()?;

        let mut node = Arc::clone(&self.node);
        for segment in segments {
            let next = node.children.lock().get(segment).cloned()?;
            node = next;
        }
        let signals = node.signals.lock();
        signals.get(leaf).cloned()
    }

    /// Explicitly delete a keyed signal from this node's cache.
    pub fn remove_signal(&self, key: &str) -> bool {
        self.node.signals.lock().shift_remove(key).is_some()
    }

    /// Number of signals cached directly at this node.
    pub fn signal_count(&self) -> usize {
        self.node.signals.lock().len()
    }
}
