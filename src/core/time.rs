//! Timestamps, event ids, and the CLI response envelope.
//!
//! One timestamp format everywhere: database rows, broker audit lines, and
//! LRS events all carry the same epoch-`Z` string, so a session's history
//! can be merged across the three stores by simple sort.

use serde_json::{json, Map, Value as JsonValue};
use ulid::Ulid;

pub const ENVELOPE_VERSION: &str = "1.0.0";

/// Unix-epoch seconds with a `Z` suffix (e.g. `1771220592Z`).
pub fn now_epoch_z() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format!("{secs}Z")
}

/// Sortable unique id, shared by sessions, broker audit lines, and LRS
/// events.
pub fn new_event_id() -> String {
    Ulid::new().to_string()
}

/// CLI response envelope: fixed header fields plus the command's payload
/// (session ids, delivery results, published versions). Payload keys win on
/// collision.
pub fn command_envelope(cmd: &str, status: &str, payload: JsonValue) -> JsonValue {
    let mut fields = Map::new();
    fields.insert("envelope_version".to_string(), json!(ENVELOPE_VERSION));
    fields.insert("ts".to_string(), json!(now_epoch_z()));
    fields.insert("event_id".to_string(), json!(new_event_id()));
    fields.insert("cmd".to_string(), json!(cmd));
    fields.insert("status".to_string(), json!(status));
    if let JsonValue::Object(payload) = payload {
        for (key, value) in payload {
            fields.insert(key, value);
        }
    }
    JsonValue::Object(fields)
}
