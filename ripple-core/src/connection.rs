//! Per-Connection Pump
//!
//! One `ClientConnection` exists per open delivery connection. It owns the
//! subscriber registration on whichever source the client asked for — a
//! stream entry or a keyed signal — and turns each incoming value into one
//! rendered payload cycle of frames.
//!
//! Deregistration is tied to dropping the connection, which the transport
//! layer does when its response stream closes. It is never tied to a
//! protocol message: a client that vanishes without a word still releases
//! its subscription, so producer ref-counting stays accurate.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, warn};

use crate::delivery::{Frame, FrameEncoder};
use crate::error::Result;
use crate::reactive::{ListenerId, Signal};
use crate::render::Renderer;
use crate::stream::{StreamEvent, StreamKey, StreamRegistry, SubscriberHandle, SubscriberId};

/// What the connection must detach from when it closes.
enum Detach {
    Stream {
        registry: Arc<StreamRegistry>,
        key: StreamKey,
        id: SubscriberId,
    },
    Signal {
        signal: Signal<Value>,
        listener: ListenerId,
    },
}

impl Drop for Detach {
    fn drop(&mut self) {
        match self {
            Detach::Stream { registry, key, id } => {
                debug!(key = %key, "connection closed, detaching stream subscriber");
                registry.unsubscribe(key, *id);
            }
            Detach::Signal { signal, listener } => {
                debug!("connection closed, detaching signal listener");
                signal.unsubscribe(*listener);
            }
        }
    }
}

/// A live client connection: subscription plus render/encode pipeline.
pub struct ClientConnection {
    key: String,
    component: String,
    renderer: Arc<dyn Renderer>,
    chunk_size: usize,
    _detach: Detach,
}

impl ClientConnection {
    /// Subscribe to a registered stream.
    ///
    /// A producer start failure propagates out; no connection is kept in
    /// that case (the registry has already detached the handle).
    pub fn open_stream(
        registry: Arc<StreamRegistry>,
        key: StreamKey,
        component: &str,
        renderer: Arc<dyn Renderer>,
        chunk_size: usize,
    ) -> Result<(Self, UnboundedReceiver<StreamEvent>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = SubscriberHandle::new(tx);
        let id = handle.id();
        registry.subscribe(&key, handle)?;

        let connection = Self {
            key: key.as_str().to_string(),
            component: component.to_string(),
            renderer,
            chunk_size,
            _detach: Detach::Stream { registry, key, id },
        };
        Ok((connection, rx))
    }

    /// Attach to a keyed signal.
    ///
    /// The signal's subscribe contract replays the current value
    /// immediately, so the connection's first cycle carries the state as of
    /// connect.
    pub fn open_signal(
        signal: Signal<Value>,
        full_key: &str,
        component: &str,
        renderer: Arc<dyn Renderer>,
        chunk_size: usize,
    ) -> (Self, UnboundedReceiver<StreamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = signal.subscribe(move |value: &Value| {
            let _ = tx.send(StreamEvent::Value(Arc::new(value.clone())));
        });

        let connection = Self {
            key: full_key.to_string(),
            component: component.to_string(),
            renderer,
            chunk_size,
            _detach: Detach::Signal { signal, listener },
        };
        (connection, rx)
    }

    /// The handshake frame for this connection.
    pub fn connected_frame(&self) -> Frame {
        Frame::Connected {
            keys: vec![self.key.clone()],
        }
    }

    /// Turn one subscriber event into its frame cycle.
    ///
    /// A render failure is scoped to this emission: it becomes a single
    /// `error` frame and the connection stays up for the next value.
    pub fn frames_for(&self, event: &StreamEvent) -> Vec<Frame> {
        match event {
            StreamEvent::Value(value) => {
                match self.renderer.render(&self.component, value) {
                    Ok(reader) => FrameEncoder::new(reader, self.chunk_size).collect(),
                    Err(err) => {
                        warn!(
                            component = %self.component,
                            key = %self.key,
                            error = %err,
                            "render failed for one emission"
                        );
                        vec![Frame::Error {
                            message: err.to_string(),
                        }]
                    }
                }
            }
            StreamEvent::Failed(message) => vec![Frame::Error {
                message: message.clone(),
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{ClientSession, Decoded, FrameDecoder};
    use crate::reactive::NotifyHub;
    use crate::render::JsonRenderer;
    use crate::stream::Producer;
    use serde_json::json;

    fn decode_all(frames: &[Frame]) -> Vec<u8> {
        let mut decoder = FrameDecoder::new();
        let mut payload = Vec::new();
        for frame in frames {
            if let Decoded::Payload(bytes) = decoder.accept(frame.clone()).unwrap() {
                payload = bytes;
            }
        }
        payload
    }

    #[test]
    fn stream_value_becomes_a_rendered_cycle() {
        let registry = Arc::new(StreamRegistry::new());
        let key = registry
            .register(
                "clock",
                &json!({"interval": 1000}),
                Some(json!({"time": 1})),
                Producer::new(|_| Ok(None)),
            )
            .unwrap();

        let (connection, mut rx) = ClientConnection::open_stream(
            registry.clone(),
            key.clone(),
            "clock-face",
            Arc::new(JsonRenderer),
            64,
        )
        .unwrap();

        let event = rx.try_recv().unwrap(); // cached initial value
        let frames = connection.frames_for(&event);
        assert!(matches!(frames.first(), Some(Frame::Start)));
        assert!(matches!(frames.last(), Some(Frame::End)));

        let tree = JsonRenderer.parse_payload(&decode_all(&frames)).unwrap();
        assert_eq!(tree["component"], "clock-face");
        assert_eq!(tree["props"]["time"], 1);
    }

    #[test]
    fn dropping_the_connection_releases_the_subscription() {
        let registry = Arc::new(StreamRegistry::new());
        let key = registry
            .register("clock", &json!({}), None, Producer::new(|_| Ok(None)))
            .unwrap();

        let (connection, _rx) = ClientConnection::open_stream(
            registry.clone(),
            key.clone(),
            "clock-face",
            Arc::new(JsonRenderer),
            64,
        )
        .unwrap();
        assert_eq!(registry.subscriber_count(&key), 1);

        drop(connection);
        assert_eq!(registry.subscriber_count(&key), 0);
    }

    #[test]
    fn signal_connection_replays_and_follows_writes() {
        let hub = NotifyHub::new();
        let signal = Signal::new(&hub, json!({"count": 0}));

        let (connection, mut rx) = ClientConnection::open_signal(
            signal.clone(),
            "ui:count",
            "counter",
            Arc::new(JsonRenderer),
            64,
        );

        // Immediate replay of the current value.
        assert!(matches!(rx.try_recv(), Ok(StreamEvent::Value(_))));

        signal.set(json!({"count": 1}));
        let event = rx.try_recv().unwrap();
        let frames = connection.frames_for(&event);
        let tree = JsonRenderer.parse_payload(&decode_all(&frames)).unwrap();
        assert_eq!(tree["props"]["count"], 1);

        drop(connection);
        assert_eq!(signal.listener_count(), 0);
        signal.set(json!({"count": 2}));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn producer_failure_surfaces_as_an_error_frame() {
        let connection_event = StreamEvent::Failed("upstream went away".into());
        let registry = Arc::new(StreamRegistry::new());
        let key = registry
            .register("x", &json!({}), None, Producer::new(|_| Ok(None)))
            .unwrap();
        let (connection, _rx) = ClientConnection::open_stream(
            registry,
            key,
            "widget",
            Arc::new(JsonRenderer),
            64,
        )
        .unwrap();

        let frames = connection.frames_for(&connection_event);
        assert_eq!(
            frames,
            vec![Frame::Error {
                message: "upstream went away".into()
            }]
        );

        // The client sees the error without losing prior content.
        let mut session = ClientSession::new();
        session.apply(connection.connected_frame()).unwrap();
        for frame in frames {
            session.apply(frame).unwrap();
        }
        assert!(matches!(
            session.phase(),
            crate::delivery::ClientPhase::Errored(_)
        ));
    }
}
