//! Rendering Collaborator
//!
//! Rendering a component tree into a serialized payload, and parsing that
//! payload back into a tree on the receiving end, are the job of an
//! external rendering/hydration engine. The runtime only calls through this
//! trait: `render` on the server for every emitted value, `parse_payload`
//! on the client after a cycle reassembles.

use std::io::{Cursor, Read};

use serde_json::{json, Value};

use crate::error::{Error, Result};

/// The external rendering/hydration engine.
pub trait Renderer: Send + Sync {
    /// Render `component` with `props` into a streamable byte payload.
    fn render(&self, component: &str, props: &Value) -> Result<Box<dyn Read + Send>>;

    /// Parse a reassembled payload back into a renderable tree.
    fn parse_payload(&self, bytes: &[u8]) -> Result<Value>;
}

/// Minimal JSON envelope renderer.
///
/// Serializes `{component, props}` as the payload and parses it back with
/// the JSON parser. Stands in for a real engine in tests and demos.
pub struct JsonRenderer;

impl Renderer for JsonRenderer {
    fn render(&self, component: &str, props: &Value) -> Result<Box<dyn Read + Send>> {
        let payload = serde_json::to_vec(&json!({
            "component": component,
            "props": props,
        }))?;
        Ok(Box::new(Cursor::new(payload)))
    }

    fn parse_payload(&self, bytes: &[u8]) -> Result<Value> {
        serde_json::from_slice(bytes)
            .map_err(|err| Error::Render(format!("payload is not a renderable tree: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_then_parse_round_trips() {
        let renderer = JsonRenderer;
        let mut reader = renderer
            .render("clock", &json!({"time": 12}))
            .unwrap();
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).unwrap();

        let tree = renderer.parse_payload(&bytes).unwrap();
        assert_eq!(tree["component"], "clock");
        assert_eq!(tree["props"]["time"], 12);
    }

    #[test]
    fn garbage_payload_is_a_render_error() {
        let err = JsonRenderer.parse_payload(b"\xff\xfe not json").unwrap_err();
        assert!(matches!(err, Error::Render(_)));
    }
}
