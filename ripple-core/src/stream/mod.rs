//! Stream Registry
//!
//! Streams are deduplicated, ref-counted, lazily started value producers.
//! Each stream is addressed by a component identity plus a parameter scope;
//! the scope is canonicalized by [`scope::canonical`] so that two
//! logically-identical registrations collide to the same entry and share one
//! producer execution.
//!
//! The producer for an entry runs exactly while the entry has subscribers:
//! it is started on the 0→1 subscriber transition and its stop handle is
//! invoked on the 1→0 transition. The last emitted value is cached across
//! zero-subscriber gaps, so a returning subscriber is replayed the most
//! recent value immediately.

pub mod scope;
mod registry;

pub use registry::{
    Emitter, Producer, StopFn, StreamEvent, StreamKey, StreamRegistry, SubscriberHandle,
    SubscriberId,
};
