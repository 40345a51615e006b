//! Frame Encoder
//!
//! Turns one rendered payload byte stream into a `start … chunk* … end`
//! frame sequence. The reader is consumed incrementally, so a large payload
//! never has to be resident in one buffer on the server side. A read
//! failure yields an `error` frame instead of `end` and terminates the
//! cycle.

use std::io::Read;

use base64::{engine::general_purpose, Engine as _};

use super::frame::Frame;

/// Chunk size used when the server config does not override it.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

enum EncodeState {
    Start,
    Body,
    Done,
}

/// Iterator over the frames of one payload cycle.
pub struct FrameEncoder<R: Read> {
    reader: R,
    chunk_size: usize,
    state: EncodeState,
}

impl<R: Read> FrameEncoder<R> {
    /// Encode `reader` as one cycle with the given chunk size.
    pub fn new(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            chunk_size: chunk_size.max(1),
            state: EncodeState::Start,
        }
    }
}

impl<R: Read> Iterator for FrameEncoder<R> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        match self.state {
            EncodeState::Start => {
                self.state = EncodeState::Body;
                Some(Frame::Start)
            }
            EncodeState::Body => {
                let mut buf = vec![0u8; self.chunk_size];
                loop {
                    match self.reader.read(&mut buf) {
                        Ok(0) => {
                            self.state = EncodeState::Done;
                            return Some(Frame::End);
                        }
                        Ok(n) => {
                            return Some(Frame::Chunk {
                                payload: general_purpose::STANDARD.encode(&buf[..n]),
                            });
                        }
                        Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                        Err(err) => {
                            self.state = EncodeState::Done;
                            return Some(Frame::Error {
                                message: err.to_string(),
                            });
                        }
                    }
                }
            }
            EncodeState::Done => None,
        }
    }
}
