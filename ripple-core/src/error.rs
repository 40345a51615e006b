//! Error Taxonomy
//!
//! Failures in the runtime fall into four families:
//!
//! - `Producer`: a stream producer failed to start or failed while running.
//!   The entry is torn down to idle and the error is reported to the
//!   subscribers that were attached. Producers are not retried.
//! - `Render`: rendering a payload for one emitted value failed. The failure
//!   is scoped to that emission; the entry stays alive.
//! - `Protocol`: programmer errors — an unknown key on subscribe, a
//!   non-serializable scope, an out-of-order frame sequence. These fail loud.
//! - `Backend`: the external store is unreachable. The runtime logs and falls
//!   back to purely in-memory behavior; the local write path never blocks on
//!   a backend.

use thiserror::Error;

/// All errors surfaced by the runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// A producer function failed to start or aborted while running.
    #[error("producer failed: {0}")]
    Producer(String),

    /// Rendering the payload for a single emitted value failed.
    #[error("render failed: {0}")]
    Render(String),

    /// A protocol-level programmer error: unknown key, malformed scope,
    /// out-of-order frames.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The optional external backend could not be reached.
    #[error("backend unavailable: {0}")]
    Backend(String),

    /// Reading a rendered payload stream failed.
    #[error("payload read failed: {0}")]
    Io(#[from] std::io::Error),

    /// Frame or value (de)serialization failed.
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
