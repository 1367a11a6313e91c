//! Decoding of notification payloads into change events.
//!
//! The wire format is a JSON document with two sections:
//!
//! ```json
//! {
//!   "meta": { "table": "users", "action": "UPDATE", "timestamp": "2024-01-01 12:00:00" },
//!   "data": { "curr": { "id": 1, "name": "Bob" }, "prev": { "id": 1, "name": "Alice" } }
//! }
//! ```
//!
//! Decoding is permissive: a missing or mistyped section, or a missing key
//! inside one, falls back to an empty string or an empty row. Only input that
//! is not a JSON object at all is rejected.

use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

use crate::Result;
use crate::change::{ChangeEvent, Metadata, RowSnapshot};
use crate::error::Error;

#[derive(Serialize)]
struct WirePayload<'a> {
   meta: &'a Metadata,
   data: WireData<'a>,
}

#[derive(Serialize)]
struct WireData<'a> {
   curr: &'a RowSnapshot,
   prev: &'a RowSnapshot,
}

/// Decodes a raw notification payload into a [`ChangeEvent`].
///
/// # Errors
///
/// Returns [`Error::MalformedPayload`] if the input is not valid UTF-8 JSON
/// or if the top-level value is not an object.
pub fn decode(raw: impl AsRef<[u8]>) -> Result<ChangeEvent> {
   let document: JsonValue =
      serde_json::from_slice(raw.as_ref()).map_err(|e| Error::MalformedPayload(e.to_string()))?;

   let mut root = match document {
      JsonValue::Object(root) => root,
      other => {
         return Err(Error::MalformedPayload(format!(
            "expected a JSON object, found {}",
            json_type_name(&other)
         )));
      }
   };

   let meta = take_object(&mut root, "meta");
   let mut data = take_object(&mut root, "data");

   let metadata = Metadata {
      table: string_field(&meta, "table"),
      action: string_field(&meta, "action"),
      timestamp: string_field(&meta, "timestamp"),
   };

   let curr = take_object(&mut data, "curr").into_iter().collect();
   let prev = take_object(&mut data, "prev").into_iter().collect();

   Ok(ChangeEvent::new(metadata, curr, prev))
}

/// Encodes a [`ChangeEvent`] back into the notification wire format.
///
/// The delta is not part of the wire format; [`decode`] recomputes it.
pub fn encode(event: &ChangeEvent) -> String {
   let payload = WirePayload {
      meta: event.metadata(),
      data: WireData {
         curr: event.curr(),
         prev: event.prev(),
      },
   };

   // Serializing string-keyed maps of JSON values cannot fail.
   serde_json::to_string(&payload).unwrap_or_default()
}

/// Removes `key` from `object`, treating anything but a JSON object as absent.
fn take_object(object: &mut Map<String, JsonValue>, key: &str) -> Map<String, JsonValue> {
   match object.remove(key) {
      Some(JsonValue::Object(inner)) => inner,
      _ => Map::new(),
   }
}

fn string_field(object: &Map<String, JsonValue>, key: &str) -> String {
   object
      .get(key)
      .and_then(JsonValue::as_str)
      .unwrap_or_default()
      .to_string()
}

fn json_type_name(value: &JsonValue) -> &'static str {
   match value {
      JsonValue::Null => "null",
      JsonValue::Bool(_) => "a boolean",
      JsonValue::Number(_) => "a number",
      JsonValue::String(_) => "a string",
      JsonValue::Array(_) => "an array",
      JsonValue::Object(_) => "an object",
   }
}
