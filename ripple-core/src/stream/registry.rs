//! Stream Registry Implementation
//!
//! One entry per `(identity, canonical scope)` pair. The registry owns every
//! entry's subscriber set and cached value; external code only goes through
//! `register` / `subscribe` / `unsubscribe` / the [`Emitter`] handed to the
//! producer.
//!
//! # State machine
//!
//! ```text
//! Registered(idle) --subscribe 0→1--> Active(producing)
//! Active --unsubscribe 1→0--> Idle(cached, stop invoked)
//! Idle --subscribe 0→1--> Active (producer re-invoked, cache replayed)
//! ```
//!
//! Entries are never removed. The cached value is what lets a returning
//! subscriber see the last emission without waiting for the restarted
//! producer.
//!
//! # Locking
//!
//! Each entry has its own mutex; there is no registry-wide lock on the hot
//! path. The lock is held across the fan-out sends of one emission —
//! unbounded channel sends never block — which is what serializes emissions
//! per entry and keeps subscribers seeing values in order.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use smallvec::SmallVec;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::scope;
use crate::error::{Error, Result};

/// Stop handle returned by a producer's start function.
pub type StopFn = Box<dyn FnOnce() + Send>;

/// A value producer: a start function paired with an optional stop handle.
///
/// The start function receives an [`Emitter`] and may emit synchronously
/// before returning. Whatever it returns as its stop handle is invoked
/// exactly once, when the entry's subscriber count drops back to zero (or
/// when the producer itself reports failure).
pub struct Producer {
    start: Box<dyn Fn(Emitter) -> Result<Option<StopFn>> + Send + Sync>,
}

impl Producer {
    /// Wrap a start function.
    pub fn new<F>(start: F) -> Self
    where
        F: Fn(Emitter) -> Result<Option<StopFn>> + Send + Sync + 'static,
    {
        Self {
            start: Box::new(start),
        }
    }
}

/// Key of a registered stream: identity plus canonical scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey(String);

impl StreamKey {
    fn compose(identity: &str, canonical_scope: &str) -> Self {
        Self(format!("{identity}?{canonical_scope}"))
    }

    /// The key's wire form, as carried in `connected` frames and query
    /// strings.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for StreamKey {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl From<&str> for StreamKey {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier for a subscriber handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// What a subscriber receives from its entry.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A new (or replayed cached) value.
    Value(Arc<Value>),
    /// The producer failed; the entry is idle again.
    Failed(String),
}

/// Connection-owned handle through which values are pushed outward.
///
/// The connection layer creates one per client and must deregister it on
/// disconnect so producer ref-counting stays accurate.
pub struct SubscriberHandle {
    id: SubscriberId,
    sender: mpsc::UnboundedSender<StreamEvent>,
}

impl SubscriberHandle {
    /// Wrap a channel sender into a handle.
    pub fn new(sender: mpsc::UnboundedSender<StreamEvent>) -> Self {
        Self {
            id: SubscriberId::next(),
            sender,
        }
    }

    /// The handle's ID, needed later for `unsubscribe`.
    pub fn id(&self) -> SubscriberId {
        self.id
    }
}

struct EntryState {
    value: Option<Arc<Value>>,
    subscribers: SmallVec<[SubscriberHandle; 4]>,
    stop: Option<StopFn>,
    producing: bool,
}

struct StreamEntry {
    key: StreamKey,
    producer: Producer,
    state: Mutex<EntryState>,
}

/// Emission handle passed to a producer's start function.
///
/// Holds only a weak reference to its entry, so a producer that outlives
/// the registry emits into nothing instead of keeping the entry alive.
#[derive(Clone)]
pub struct Emitter {
    entry: Weak<StreamEntry>,
}

impl Emitter {
    /// Publish a new value: cache it and fan it out to every current
    /// subscriber in registration order.
    pub fn next(&self, value: Value) {
        let Some(entry) = self.entry.upgrade() else {
            return;
        };
        let mut state = entry.state.lock();
        if !state.producing {
            // Entry went idle under the producer; the emission is stale.
            return;
        }
        let value = Arc::new(value);
        state.value = Some(Arc::clone(&value));
        state
            .subscribers
            .retain(|sub| sub.sender.send(StreamEvent::Value(Arc::clone(&value))).is_ok());
    }

    /// Report that the producer has failed.
    ///
    /// Tears down the entry's active state (the stop handle, if any, runs
    /// once) and delivers the failure to every attached subscriber. The
    /// entry stays registered with its cached value; it is not restarted
    /// until the subscriber count next transitions from zero to one.
    pub fn fail(&self, message: impl Into<String>) {
        let Some(entry) = self.entry.upgrade() else {
            return;
        };
        let message = message.into();
        let stop = {
            let mut state = entry.state.lock();
            if !state.producing {
                return;
            }
            state.producing = false;
            for sub in &state.subscribers {
                let _ = sub.sender.send(StreamEvent::Failed(message.clone()));
            }
            state.stop.take()
        };
        warn!(key = %entry.key, %message, "producer failed, entry idled");
        if let Some(stop) = stop {
            stop();
        }
    }
}

/// Process-wide registry of deduplicated value producers.
pub struct StreamRegistry {
    entries: DashMap<StreamKey, Arc<StreamEntry>>,
}

impl StreamRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Register a producer under `(identity, scope)`.
    ///
    /// If an entry already exists for the canonicalized key, its key is
    /// returned unchanged and the `initial` value and `producer` of this
    /// call are discarded — two call sites with identical scope share one
    /// producer execution.
    pub fn register<S: Serialize>(
        &self,
        identity: &str,
        scope: &S,
        initial: Option<Value>,
        producer: Producer,
    ) -> Result<StreamKey> {
        let canonical = scope::canonical(scope)?;
        let key = StreamKey::compose(identity, &canonical);

        match self.entries.entry(key.clone()) {
            Entry::Occupied(_) => {
                debug!(key = %key, "registration deduplicated onto existing entry");
            }
            Entry::Vacant(slot) => {
                debug!(key = %key, "stream registered");
                slot.insert(Arc::new(StreamEntry {
                    key: key.clone(),
                    producer,
                    state: Mutex::new(EntryState {
                        value: initial.map(Arc::new),
                        subscribers: SmallVec::new(),
                        stop: None,
                        producing: false,
                    }),
                }));
            }
        }
        Ok(key)
    }

    /// Attach a subscriber handle to an entry.
    ///
    /// The cached value, if any, is sent to the new subscriber before
    /// anything else. On the 0→1 transition the producer is started; a
    /// start failure detaches the handle again, leaves the entry idle with
    /// no stop handle, and is returned to the caller.
    pub fn subscribe(&self, key: &StreamKey, handle: SubscriberHandle) -> Result<()> {
        let entry = self
            .entries
            .get(key)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| Error::Protocol(format!("subscribe to unknown stream key {key}")))?;

        let id = handle.id;
        let needs_start = {
            let mut state = entry.state.lock();
            if let Some(value) = &state.value {
                let _ = handle.sender.send(StreamEvent::Value(Arc::clone(value)));
            }
            state.subscribers.push(handle);
            let needs_start = state.subscribers.len() == 1 && !state.producing;
            if needs_start {
                state.producing = true;
            }
            needs_start
        };

        if needs_start {
            debug!(key = %key, "starting producer");
            let emitter = Emitter {
                entry: Arc::downgrade(&entry),
            };
            match (entry.producer.start)(emitter) {
                Ok(stop) => {
                    let mut state = entry.state.lock();
                    if state.producing {
                        state.stop = stop;
                    } else if let Some(stop) = stop {
                        // The entry went idle (or the producer reported
                        // failure) while start was in flight; run the stop
                        // handle instead of stranding it.
                        drop(state);
                        stop();
                    }
                }
                Err(err) => {
                    {
                        let mut state = entry.state.lock();
                        state.producing = false;
                        state.stop = None;
                        state.subscribers.retain(|sub| sub.id != id);
                    }
                    let err = match err {
                        producer @ Error::Producer(_) => producer,
                        other => Error::Producer(other.to_string()),
                    };
                    warn!(key = %key, error = %err, "producer start failed");
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Detach a subscriber handle.
    ///
    /// On the 1→0 transition the stored stop handle is invoked exactly
    /// once. Unknown keys and already-removed handles are no-ops.
    pub fn unsubscribe(&self, key: &StreamKey, id: SubscriberId) {
        let Some(entry) = self.entries.get(key).map(|e| Arc::clone(e.value())) else {
            return;
        };
        let stop = {
            let mut state = entry.state.lock();
            state.subscribers.retain(|sub| sub.id != id);
            if state.subscribers.is_empty() && state.producing {
                state.producing = false;
                state.stop.take()
            } else {
                None
            }
        };
        if let Some(stop) = stop {
            debug!(key = %key, "last subscriber gone, stopping producer");
            stop();
        }
    }

    /// The entry's cached value, if it has ever produced one.
    pub fn current_value(&self, key: &StreamKey) -> Option<Arc<Value>> {
        self.entries
            .get(key)
            .and_then(|entry| entry.state.lock().value.clone())
    }

    /// Whether a stream is registered under this key.
    pub fn contains(&self, key: &StreamKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of subscribers currently attached to an entry.
    pub fn subscriber_count(&self, key: &StreamKey) -> usize {
        self.entries
            .get(key)
            .map(|entry| entry.state.lock().subscribers.len())
            .unwrap_or(0)
    }

    /// Number of registered entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn attach(
        registry: &StreamRegistry,
        key: &StreamKey,
    ) -> (SubscriberId, mpsc::UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = SubscriberHandle::new(tx);
        let id = handle.id();
        registry.subscribe(key, handle).unwrap();
        (id, rx)
    }

    fn drain_values(rx: &mut mpsc::UnboundedReceiver<StreamEvent>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let StreamEvent::Value(v) = event {
                out.push((*v).clone());
            }
        }
        out
    }

    /// Producer that counts starts/stops and parks its emitter for manual
    /// emission from the test body.
    fn counting_producer(
        starts: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
        slot: Arc<PlMutex<Option<Emitter>>>,
    ) -> Producer {
        Producer::new(move |emitter| {
            starts.fetch_add(1, Ordering::SeqCst);
            *slot.lock() = Some(emitter);
            let stops = stops.clone();
            Ok(Some(Box::new(move || {
                stops.fetch_add(1, Ordering::SeqCst);
            }) as StopFn))
        })
    }

    #[test]
    fn equal_scopes_deduplicate_to_one_entry() {
        let registry = StreamRegistry::new();

        let a: Value = serde_json::from_str(r#"{"interval":1000,"zone":"utc"}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"zone":"utc","interval":1000}"#).unwrap();

        let key_a = registry
            .register("clock", &a, None, Producer::new(|_| Ok(None)))
            .unwrap();
        let key_b = registry
            .register("clock", &b, None, Producer::new(|_| Ok(None)))
            .unwrap();

        assert_eq!(key_a, key_b);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn distinct_scopes_get_independent_entries() {
        let registry = StreamRegistry::new();
        let starts = Arc::new(AtomicUsize::new(0));

        let mk = |starts: Arc<AtomicUsize>| {
            Producer::new(move |_| {
                starts.fetch_add(1, Ordering::SeqCst);
                Ok(None)
            })
        };

        let fast = registry
            .register("clock", &json!({"interval": 1000}), None, mk(starts.clone()))
            .unwrap();
        let slow = registry
            .register("clock", &json!({"interval": 2000}), None, mk(starts.clone()))
            .unwrap();

        assert_ne!(fast, slow);
        assert_eq!(registry.len(), 2);

        let (_ , _rx_a) = attach(&registry, &fast);
        let (_, _rx_b) = attach(&registry, &slow);
        assert_eq!(starts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn producer_runs_iff_subscribers_exist() {
        let registry = StreamRegistry::new();
        let starts = Arc::new(AtomicUsize::new(0));
        let stops = Arc::new(AtomicUsize::new(0));
        let slot = Arc::new(PlMutex::new(None));

        let key = registry
            .register(
                "ticker",
                &json!({}),
                None,
                counting_producer(starts.clone(), stops.clone(), slot),
            )
            .unwrap();

        assert_eq!(starts.load(Ordering::SeqCst), 0);

        let (first, _rx1) = attach(&registry, &key);
        assert_eq!(starts.load(Ordering::SeqCst), 1);

        let (second, _rx2) = attach(&registry, &key);
        // Second subscriber does not start a second producer.
        assert_eq!(starts.load(Ordering::SeqCst), 1);

        registry.unsubscribe(&key, first);
        assert_eq!(stops.load(Ordering::SeqCst), 0);

        registry.unsubscribe(&key, second);
        assert_eq!(stops.load(Ordering::SeqCst), 1);

        // 0→1 again restarts the producer.
        let (_third, _rx3) = attach(&registry, &key);
        assert_eq!(starts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn late_subscriber_is_replayed_the_cached_value() {
        let registry = StreamRegistry::new();
        let slot = Arc::new(PlMutex::new(None));
        let slot_clone = slot.clone();

        let key = registry
            .register(
                "ticker",
                &json!({}),
                None,
                Producer::new(move |emitter| {
                    *slot_clone.lock() = Some(emitter);
                    Ok(None)
                }),
            )
            .unwrap();

        let (_first, mut rx1) = attach(&registry, &key);
        let emitter = slot.lock().clone().unwrap();
        emitter.next(json!({"time": 1}));
        emitter.next(json!({"time": 2}));
        assert_eq!(
            drain_values(&mut rx1),
            vec![json!({"time": 1}), json!({"time": 2})]
        );

        let (_second, mut rx2) = attach(&registry, &key);
        // Only the most recent value, immediately.
        assert_eq!(drain_values(&mut rx2), vec![json!({"time": 2})]);
    }

    #[test]
    fn initial_value_counts_as_cached() {
        let registry = StreamRegistry::new();
        let key = registry
            .register(
                "counter",
                &json!({"step": 1}),
                Some(json!(0)),
                Producer::new(|_| Ok(None)),
            )
            .unwrap();

        assert_eq!(registry.current_value(&key).as_deref(), Some(&json!(0)));

        let (_id, mut rx) = attach(&registry, &key);
        assert_eq!(drain_values(&mut rx), vec![json!(0)]);
    }

    #[test]
    fn duplicate_registration_keeps_first_producer_and_initial() {
        let registry = StreamRegistry::new();
        let first_started = Arc::new(AtomicUsize::new(0));
        let second_started = Arc::new(AtomicUsize::new(0));

        let a = first_started.clone();
        let key = registry
            .register(
                "ticker",
                &json!({"n": 1}),
                Some(json!("first")),
                Producer::new(move |_| {
                    a.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                }),
            )
            .unwrap();

        let b = second_started.clone();
        registry
            .register(
                "ticker",
                &json!({"n": 1}),
                Some(json!("second")),
                Producer::new(move |_| {
                    b.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                }),
            )
            .unwrap();

        assert_eq!(registry.current_value(&key).as_deref(), Some(&json!("first")));

        let (_id, _rx) = attach(&registry, &key);
        assert_eq!(first_started.load(Ordering::SeqCst), 1);
        assert_eq!(second_started.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn start_failure_detaches_subscriber_and_leaves_entry_idle() {
        let registry = StreamRegistry::new();
        let key = registry
            .register(
                "broken",
                &json!({}),
                None,
                Producer::new(|_| Err(Error::Producer("boom".into()))),
            )
            .unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let err = registry.subscribe(&key, SubscriberHandle::new(tx)).unwrap_err();
        assert!(matches!(err, Error::Producer(_)));
        assert_eq!(registry.subscriber_count(&key), 0);

        // The entry is still registered and can be retried by a new
        // subscriber (which will fail the same way).
        assert!(registry.contains(&key));
        let (tx2, _rx2) = mpsc::unbounded_channel();
        assert!(registry.subscribe(&key, SubscriberHandle::new(tx2)).is_err());
    }

    #[test]
    fn producer_fail_reaches_attached_subscribers_and_idles_entry() {
        let registry = StreamRegistry::new();
        let stops = Arc::new(AtomicUsize::new(0));
        let slot = Arc::new(PlMutex::new(None));

        let key = registry
            .register(
                "flaky",
                &json!({}),
                None,
                counting_producer(Arc::new(AtomicUsize::new(0)), stops.clone(), slot.clone()),
            )
            .unwrap();

        let (_id, mut rx) = attach(&registry, &key);
        let emitter = slot.lock().clone().unwrap();
        emitter.next(json!(1));
        emitter.fail("upstream went away");

        // Teardown ran the stop handle.
        assert_eq!(stops.load(Ordering::SeqCst), 1);

        let mut saw_failure = false;
        while let Ok(event) = rx.try_recv() {
            if let StreamEvent::Failed(message) = event {
                assert_eq!(message, "upstream went away");
                saw_failure = true;
            }
        }
        assert!(saw_failure);

        // Emissions after failure are stale and ignored.
        emitter.next(json!(2));
        assert_eq!(registry.current_value(&key).as_deref(), Some(&json!(1)));
    }

    #[test]
    fn unknown_key_is_a_protocol_error() {
        let registry = StreamRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = registry
            .subscribe(&StreamKey::from("nope?{}"), SubscriberHandle::new(tx))
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
