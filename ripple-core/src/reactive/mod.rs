//! Reactive Primitives
//!
//! This module implements the signal store: mutable value cells with change
//! notification, and derived values computed from them.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. Writes are total replacements
//! or functional updates over the previous value. A write that produces a
//! value equal to the current one stores nothing and notifies nobody, so
//! redundant renders never happen downstream. Listeners are invoked
//! synchronously, in registration order, and a new listener is immediately
//! invoked once with the current value so a late subscriber is never behind.
//!
//! ## Derived values
//!
//! A Derived is a computed value that re-runs whenever any signal it reads
//! changes. Dependencies are discovered automatically: the compute closure
//! runs inside a tracking context, and every signal read during the call is
//! recorded as an edge. Callers never declare dependencies by hand. This is
//! the tracked semantics — there is no static-recompute fallback in this
//! crate.
//!
//! # Runtime wiring
//!
//! Signals and derived values belong to a [`NotifyHub`], an explicitly
//! constructed object passed by `Arc` through constructors. Nothing in this
//! module is a process-global: tests construct a fresh hub per case.

mod signal;
mod context;
mod derived;
mod hub;

pub use signal::{Signal, SignalId, ListenerId};
pub use context::TrackingContext;
pub use derived::Derived;
pub use hub::{NotifyHub, Dependent, DependentId};
