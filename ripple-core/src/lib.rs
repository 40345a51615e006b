//! Ripple Core
//!
//! This crate provides the core runtime for the Ripple reactive
//! distribution framework. Server-rendered components expose values that
//! change over time; the runtime rebroadcasts each new value as a freshly
//! rendered, incrementally streamed UI payload to every connected client,
//! without a full page reload. It implements:
//!
//! - Reactive primitives (signals, derived values) with equality-suppressed
//!   change notification
//! - A hierarchical, backend-mirrored key/value signal store
//! - A deduplicated, ref-counted registry of lazily started value producers
//! - A chunked, base64-framed delivery protocol over server-sent events
//!
//! Rendering a component into a payload (and parsing it back into a tree on
//! the client) is the job of an external engine behind [`render::Renderer`];
//! persistence and cross-process broadcast are behind [`backend::Backend`].
//!
//! # Architecture
//!
//! - `reactive`: signals, derived values, and dependency tracking
//! - `namespace`: colon-joined hierarchical addressing over keyed signals
//! - `stream`: scope canonicalization and the stream registry
//! - `delivery`: wire frames, chunked encoder, client-side decoder
//! - `connection` / `server`: per-connection pump and the SSE endpoint
//!
//! # Example
//!
//! ```rust,ignore
//! use ripple_core::prelude::*;
//! use serde_json::json;
//!
//! let registry = Arc::new(StreamRegistry::new());
//! let key = registry.register(
//!     "clock",
//!     &json!({"interval": 1000}),
//!     Some(json!({"time": 0})),
//!     Producer::new(|emitter| {
//!         // spawn a timer that calls emitter.next(..) per tick,
//!         // return the handle that shuts it down
//!         Ok(Some(Box::new(move || { /* stop timer */ })))
//!     }),
//! )?;
//!
//! let state = ServerState::new(registry, Namespace::root(NotifyHub::new()), renderer);
//! server::serve(state).await?;
//! ```

pub mod error;
pub mod reactive;
pub mod namespace;
pub mod stream;
pub mod delivery;
pub mod render;
pub mod backend;
pub mod connection;
pub mod server;

pub use error::{Error, Result};

/// The names most integrations need.
pub mod prelude {
    pub use crate::backend::{Backend, MemoryBackend};
    pub use crate::connection::ClientConnection;
    pub use crate::delivery::{ClientSession, Frame, FrameDecoder, FrameEncoder};
    pub use crate::error::{Error, Result};
    pub use crate::namespace::Namespace;
    pub use crate::reactive::{Derived, NotifyHub, Signal};
    pub use crate::render::Renderer;
    pub use crate::server::{ConnectGuard, ServerConfig, ServerState};
    pub use crate::stream::{Emitter, Producer, StreamKey, StreamRegistry};
}
