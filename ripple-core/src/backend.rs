//! Backend Adapter
//!
//! Optional external store for signal state, consumed through a narrow
//! interface: point reads, point writes, and a push-style hook the store
//! invokes when state changes underneath the runtime (multi-process
//! coordination).
//!
//! The runtime treats every backend as best-effort. With no backend
//! configured, state is purely in-process and lost on restart. With one
//! configured, local writes are mirrored outward and externally-originated
//! changes are mirrored into the local store — but a backend failure only
//! ever logs; it never blocks the local write path.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::{Error, Result};

/// Callback invoked by a backend when a key changes externally.
pub type ChangeCallback = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// The external store interface.
pub trait Backend: Send + Sync {
    /// Read the stored value for a key, if present.
    fn get_value(&self, key: &str) -> Result<Option<Value>>;

    /// Store a value for a key.
    fn set_value(&self, key: &str, value: &Value) -> Result<()>;

    /// Install the hook invoked on externally-originated changes.
    fn set_on_change(&self, callback: ChangeCallback);
}

/// Default single-process backend.
///
/// Values are stored as compact MessagePack bytes. `set_value` does not
/// fire the change hook — a local mirror write is not an external change;
/// tests and single-process broadcast use [`MemoryBackend::inject_external`].
pub struct MemoryBackend {
    entries: DashMap<String, Vec<u8>>,
    on_change: RwLock<Option<ChangeCallback>>,
}

impl MemoryBackend {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            on_change: RwLock::new(None),
        }
    }

    /// Simulate a change arriving from outside this process: store the
    /// value and fire the change hook.
    pub fn inject_external(&self, key: &str, value: &Value) -> Result<()> {
        self.set_value(key, value)?;
        let callback = self.on_change.read().clone();
        if let Some(callback) = callback {
            callback(key, value);
        }
        Ok(())
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MemoryBackend {
    fn get_value(&self, key: &str) -> Result<Option<Value>> {
        match self.entries.get(key) {
            Some(bytes) => {
                let value = rmp_serde::from_slice(&bytes)
                    .map_err(|err| Error::Backend(format!("stored value is corrupt: {err}")))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn set_value(&self, key: &str, value: &Value) -> Result<()> {
        let bytes = rmp_serde::to_vec(value)
            .map_err(|err| Error::Backend(format!("value is not storable: {err}")))?;
        self.entries.insert(key.to_string(), bytes);
        Ok(())
    }

    fn set_on_change(&self, callback: ChangeCallback) {
        *self.on_change.write() = Some(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[test]
    fn get_set_round_trip() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.get_value("counter").unwrap(), None);

        backend
            .set_value("counter", &json!({"count": 3, "label": "hits"}))
            .unwrap();
        assert_eq!(
            backend.get_value("counter").unwrap(),
            Some(json!({"count": 3, "label": "hits"}))
        );
    }

    #[test]
    fn set_does_not_fire_the_change_hook() {
        let backend = MemoryBackend::new();
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        backend.set_on_change(Arc::new(move |key, _| {
            seen_clone.lock().unwrap().push(key.to_string());
        }));

        backend.set_value("a", &json!(1)).unwrap();
        assert!(seen.lock().unwrap().is_empty());

        backend.inject_external("b", &json!(2)).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["b".to_string()]);
    }
}
