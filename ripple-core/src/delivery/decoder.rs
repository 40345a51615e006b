//! Frame Decoder
//!
//! Client-side reassembly of payload cycles. `start` begins accumulation,
//! `chunk` frames are base64-decoded and appended, `end` yields the
//! reassembled bytes for the rendering collaborator's payload parser, and
//! `error` surfaces the message without yielding content.
//!
//! A second `start` before the prior cycle finished is a protocol
//! violation: the incomplete accumulation is discarded (with a warning) and
//! a fresh cycle begins. A `chunk` or `end` outside a cycle is rejected
//! outright.

use base64::{engine::general_purpose, Engine as _};
use tracing::warn;

use super::frame::Frame;
use crate::error::{Error, Result};

/// Outcome of feeding one frame to the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// The connection handshake; carries the subscribed key(s).
    Connected(Vec<String>),
    /// Mid-cycle, nothing to hand over yet.
    Pending,
    /// A full payload, byte-identical to what the encoder read.
    Payload(Vec<u8>),
    /// The server reported a failure for this cycle.
    Aborted(String),
}

/// Reassembles `start … chunk* … end` cycles into payload bytes.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Option<Vec<u8>>,
}

impl FrameDecoder {
    /// New decoder with no cycle in flight.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a cycle is currently being accumulated.
    pub fn in_flight(&self) -> bool {
        self.buf.is_some()
    }

    /// Feed one frame.
    pub fn accept(&mut self, frame: Frame) -> Result<Decoded> {
        match frame {
            Frame::Connected { keys } => Ok(Decoded::Connected(keys)),
            Frame::Start => {
                if self.buf.is_some() {
                    warn!("start frame while a cycle was in flight, discarding partial payload");
                }
                self.buf = Some(Vec::new());
                Ok(Decoded::Pending)
            }
            Frame::Chunk { payload } => {
                let buf = self
                    .buf
                    .as_mut()
                    .ok_or_else(|| Error::Protocol("chunk frame outside a cycle".into()))?;
                let bytes = general_purpose::STANDARD
                    .decode(payload)
                    .map_err(|err| Error::Protocol(format!("chunk payload is not base64: {err}")))?;
                buf.extend_from_slice(&bytes);
                Ok(Decoded::Pending)
            }
            Frame::End => {
                let bytes = self
                    .buf
                    .take()
                    .ok_or_else(|| Error::Protocol("end frame outside a cycle".into()))?;
                Ok(Decoded::Payload(bytes))
            }
            Frame::Error { message } => {
                self.buf = None;
                Ok(Decoded::Aborted(message))
            }
        }
    }
}

/// What the client should currently show.
///
/// The three connection-level states are deliberately distinct: "still
/// connecting", "connected but nothing arrived yet", and "error received"
/// must never collapse into a silent stall.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientPhase {
    /// No `connected` frame yet.
    Connecting,
    /// Handshake done, no payload yet.
    Connected,
    /// At least one payload has been swapped in.
    Live,
    /// The server reported an error; previous content (if any) stays up.
    Errored(String),
}

/// Client-side session state: decoder plus UI phase plus last payload.
#[derive(Debug)]
pub struct ClientSession {
    decoder: FrameDecoder,
    phase: ClientPhase,
    content: Option<Vec<u8>>,
}

impl ClientSession {
    /// Fresh session in the `Connecting` phase.
    pub fn new() -> Self {
        Self {
            decoder: FrameDecoder::new(),
            phase: ClientPhase::Connecting,
            content: None,
        }
    }

    /// Feed one frame; returns a completed payload when a cycle ends.
    ///
    /// The payload is also retained as the session's current content, ready
    /// to be parsed and swapped in by the rendering collaborator.
    pub fn apply(&mut self, frame: Frame) -> Result<Option<Vec<u8>>> {
        match self.decoder.accept(frame)? {
            Decoded::Connected(_) => {
                if self.phase == ClientPhase::Connecting {
                    self.phase = ClientPhase::Connected;
                }
                Ok(None)
            }
            Decoded::Pending => Ok(None),
            Decoded::Payload(bytes) => {
                self.phase = ClientPhase::Live;
                self.content = Some(bytes.clone());
                Ok(Some(bytes))
            }
            Decoded::Aborted(message) => {
                self.phase = ClientPhase::Errored(message);
                Ok(None)
            }
        }
    }

    /// The session's current UI phase.
    pub fn phase(&self) -> &ClientPhase {
        &self.phase
    }

    /// The most recent complete payload, if any.
    pub fn content(&self) -> Option<&[u8]> {
        self.content.as_deref()
    }
}

impl Default for ClientSession {
    fn default() -> Self {
        Self::new()
    }
}
