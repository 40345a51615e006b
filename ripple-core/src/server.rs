//! SSE Transport
//!
//! One HTTP endpoint, `GET /events?key=<key>&component=<name>`, answered
//! with a persistent `text/event-stream` response carrying delivery-channel
//! frames. The key may name a registered stream or an existing keyed
//! signal; anything else rejects the connection loudly with 404.
//!
//! Subscriber deregistration is tied to the SSE stream being dropped — the
//! transport's own close — never to a protocol message.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{info, warn};

use crate::connection::ClientConnection;
use crate::delivery::Frame;
use crate::error::{Error, Result};
use crate::namespace::Namespace;
use crate::render::Renderer;
use crate::stream::{StreamEvent, StreamKey, StreamRegistry};

/// Transport configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the event endpoint binds to.
    pub bind_addr: String,
    /// Payload bytes per `chunk` frame.
    pub chunk_size: usize,
    /// SSE keep-alive comment interval, seconds.
    pub keep_alive_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:4600".to_string(),
            chunk_size: crate::delivery::DEFAULT_CHUNK_SIZE,
            keep_alive_secs: 15,
        }
    }
}

/// Query parameters identifying what a client wants to watch.
#[derive(Debug, Clone, Deserialize)]
pub struct EventsQuery {
    /// Stream key (as returned by registration) or full signal key.
    pub key: String,
    /// Component rendered for every emitted value.
    pub component: String,
}

/// Injectable connection screening capability.
///
/// Authentication policy itself is out of scope; the runtime only provides
/// the seam.
pub trait ConnectGuard: Send + Sync {
    /// Whether this request may attach to the requested key.
    fn allow(&self, query: &EventsQuery) -> bool;
}

/// Default guard: every request may connect.
pub struct AllowAll;

impl ConnectGuard for AllowAll {
    fn allow(&self, _query: &EventsQuery) -> bool {
        true
    }
}

/// Shared state behind the event endpoint.
#[derive(Clone)]
pub struct ServerState {
    pub registry: Arc<StreamRegistry>,
    pub signals: Namespace,
    pub renderer: Arc<dyn Renderer>,
    pub guard: Arc<dyn ConnectGuard>,
    pub config: ServerConfig,
}

impl ServerState {
    /// State with the default guard and configuration.
    pub fn new(
        registry: Arc<StreamRegistry>,
        signals: Namespace,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        Self {
            registry,
            signals,
            renderer,
            guard: Arc::new(AllowAll),
            config: ServerConfig::default(),
        }
    }

    /// Replace the connect guard.
    pub fn with_guard(mut self, guard: Arc<dyn ConnectGuard>) -> Self {
        self.guard = guard;
        self
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }
}

/// Build the event router.
pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/events", get(events))
        .with_state(state)
}

/// Bind and serve until the process ends.
pub async fn serve(state: ServerState) -> Result<()> {
    let addr = state.config.bind_addr.clone();
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "event endpoint listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn open_connection(
    state: &ServerState,
    query: &EventsQuery,
) -> Result<(ClientConnection, UnboundedReceiver<StreamEvent>)> {
    let stream_key = StreamKey::from(query.key.as_str());
    if state.registry.contains(&stream_key) {
        return ClientConnection::open_stream(
            Arc::clone(&state.registry),
            stream_key,
            &query.component,
            Arc::clone(&state.renderer),
            state.config.chunk_size,
        );
    }

    if let Some(signal) = state.signals.find_signal(&query.key) {
        return Ok(ClientConnection::open_signal(
            signal,
            &query.key,
            &query.component,
            Arc::clone(&state.renderer),
            state.config.chunk_size,
        ));
    }

    Err(Error::Protocol(format!(
        "no stream or signal registered for key {}",
        query.key
    )))
}

async fn events(
    State(state): State<ServerState>,
    Query(query): Query<EventsQuery>,
) -> Response {
    if !state.guard.allow(&query) {
        info!(key = %query.key, "connection rejected by guard");
        return StatusCode::FORBIDDEN.into_response();
    }

    match open_connection(&state, &query) {
        Ok((connection, rx)) => {
            info!(key = %query.key, component = %query.component, "client connected");
            let connected = connection.connected_frame();
            let frames = futures_util::stream::iter([connected]).chain(
                UnboundedReceiverStream::new(rx).flat_map(move |event| {
                    futures_util::stream::iter(connection.frames_for(&event))
                }),
            );
            let events = frames.map(|frame| Event::default().json_data(&frame));
            Sse::new(events)
                .keep_alive(
                    KeepAlive::new().interval(Duration::from_secs(state.config.keep_alive_secs)),
                )
                .into_response()
        }
        Err(Error::Producer(message)) => {
            // The subscriber that triggered the failed start still gets a
            // proper handshake and an error frame on an open connection.
            let frames = vec![
                Frame::Connected {
                    keys: vec![query.key.clone()],
                },
                Frame::Error { message },
            ];
            let events =
                futures_util::stream::iter(frames).map(|frame| Event::default().json_data(&frame));
            Sse::new(events).into_response()
        }
        Err(err) => {
            warn!(key = %query.key, error = %err, "rejecting connection");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}
