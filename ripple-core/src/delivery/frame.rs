//! Wire Frames
//!
//! One frame is one discrete protocol message. The JSON form carries a
//! lowercase `type` tag; the SSE text form wraps the JSON as
//! `data: <JSON>\n\n`.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A delivery-channel protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    /// Sent once on connect, carrying the key(s) the client asked for.
    Connected { keys: Vec<String> },
    /// Opens one payload cycle.
    Start,
    /// One base64-encoded slice of the rendered payload.
    Chunk { payload: String },
    /// Closes the current payload cycle.
    End,
    /// The cycle (or the producer behind it) failed; no `end` follows.
    Error { message: String },
}

impl Frame {
    /// The frame's SSE wire form: `data: <JSON>\n\n`.
    pub fn to_sse(&self) -> Result<String> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }

    /// Parse a single SSE event text back into a frame.
    pub fn from_sse(text: &str) -> Result<Frame> {
        let body = text
            .strip_prefix("data: ")
            .ok_or_else(|| Error::Protocol(format!("not an SSE data line: {text:?}")))?
            .trim_end_matches('\n');
        Ok(serde_json::from_str(body)?)
    }
}
