//! Delivery Channel
//!
//! The delivery channel streams one rendered UI payload per emitted value
//! over a persistent one-way connection, as a sequence of text frames, and
//! reconstructs it losslessly on the other end.
//!
//! One emission maps to one `start … chunk* … end` cycle. Chunk payloads
//! are base64-encoded because the outer transport is line-oriented text and
//! the inner payload may contain arbitrary byte sequences that must not be
//! corrupted or prematurely terminated by the framing delimiters. At most
//! one cycle is in flight per connection at a time.

mod frame;
mod encoder;
mod decoder;

pub use frame::Frame;
pub use encoder::{FrameEncoder, DEFAULT_CHUNK_SIZE};
pub use decoder::{ClientPhase, ClientSession, Decoded, FrameDecoder};
