//! Canonical Scope Serialization
//!
//! Scopes take part in stream deduplication keys, so their serialization
//! must be a total, deterministic function of the scope's structure: equal
//! scopes must serialize identically even when object keys arrive in a
//! different order. Getting this wrong produces false-negative dedup —
//! duplicate producers with duplicated side effects — which is a
//! correctness bug, not a performance one.
//!
//! The encoding is compact JSON with object keys sorted bytewise. Arrays
//! keep their order (`[1,2]` and `[2,1]` are different scopes).

use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};

/// Serialize a scope into its canonical string form.
///
/// Any `Serialize` value is accepted; a scope that cannot be represented as
/// JSON is a protocol error.
pub fn canonical<S: Serialize>(scope: &S) -> Result<String> {
    let value = serde_json::to_value(scope)
        .map_err(|err| Error::Protocol(format!("scope is not serializable: {err}")))?;
    let mut out = String::new();
    write_value(&mut out, &value);
    Ok(out)
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Display for Value emits compact JSON, which handles escaping.
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_value(out, &map[*key]);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}
