//! JSON marshaling profiles for the gateway.
//!
//! Both profiles use proto field names. The full profile emits every field,
//! including zero values and `null` for unset sub-messages; the masked profile
//! drops them so a field-masked response carries only populated fields.
//!
//! Messages go through their serde form, so enums are written as numbers
//! and empty maps survive masking as `{}`.

use axum::http::{HeaderMap, HeaderName};
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Content type selecting the masked profile.
pub const MIME_MASKED: &str = "application/json+masked";

/// Content type of every marshaled response.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Serializes messages to and from JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JsonMarshaler {
    emit_unpopulated: bool,
}

impl JsonMarshaler {
    /// Emits every field.
    pub const FULL: Self = Self {
        emit_unpopulated: true,
    };

    /// Omits unpopulated fields.
    pub const MASKED: Self = Self {
        emit_unpopulated: false,
    };

    /// Encode `message` as compact JSON.
    ///
    /// # Errors
    ///
    /// Returns the serializer error if `message` cannot be represented as JSON.
    pub fn marshal<T: Serialize>(self, message: &T) -> Result<Vec<u8>, serde_json::Error> {
        let mut value = serde_json::to_value(message)?;
        if !self.emit_unpopulated {
            prune_unpopulated(&mut value);
        }
        serde_json::to_vec(&value)
    }

    /// Decode a request body; an empty body is the default message.
    ///
    /// # Errors
    ///
    /// Returns the deserializer error for malformed JSON.
    pub fn unmarshal<T: DeserializeOwned + Default>(self, body: &[u8]) -> Result<T, serde_json::Error> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(T::default());
        }
        serde_json::from_slice(body)
    }
}

/// Strip null, `false`, zero, `""` and `[]` members from every object.
///
/// Objects themselves are kept even when emptied: a set sub-message is
/// populated regardless of its contents.
fn prune_unpopulated(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.values_mut().for_each(prune_unpopulated);
            map.retain(|_, v| !is_unpopulated(v));
        }
        Value::Array(items) => items.iter_mut().for_each(prune_unpopulated),
        _ => {}
    }
}

fn is_unpopulated(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => is_zero(n),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(_) => false,
    }
}

#[allow(clippy::float_cmp)]
fn is_zero(n: &serde_json::Number) -> bool {
    n.as_i64() == Some(0) || n.as_u64() == Some(0) || n.as_f64() == Some(0.0)
}

/// Marshalers keyed by MIME type, plus the full-profile fallback.
#[derive(Debug, Clone)]
pub struct MarshalerRegistry {
    wildcard: JsonMarshaler,
    by_mime: Vec<(String, JsonMarshaler)>,
}

impl Default for MarshalerRegistry {
    /// Full profile as wildcard, masked profile under [`MIME_MASKED`].
    fn default() -> Self {
        let mut registry = Self {
            wildcard: JsonMarshaler::FULL,
            by_mime: Vec::new(),
        };
        registry.insert(MIME_MASKED, JsonMarshaler::MASKED);
        registry
    }
}

impl MarshalerRegistry {
    /// Register `marshaler` for `mime`, replacing any earlier entry.
    pub fn insert(&mut self, mime: &str, marshaler: JsonMarshaler) {
        let mime = mime.to_ascii_lowercase();
        match self.by_mime.iter_mut().find(|(m, _)| *m == mime) {
            Some(entry) => entry.1 = marshaler,
            None => self.by_mime.push((mime, marshaler)),
        }
    }

    fn lookup(&self, mime: &str) -> Option<JsonMarshaler> {
        let mime = mime.split(';').next().unwrap_or_default().trim();
        self.by_mime
            .iter()
            .find(|(m, _)| m.eq_ignore_ascii_case(mime))
            .map(|(_, marshaler)| *marshaler)
    }

    /// Select `(inbound, outbound)` marshalers for a request.
    ///
    /// `Accept` picks the outbound marshaler; `Content-Type` picks the
    /// inbound one and the outbound one when `Accept` matched nothing.
    /// Unmatched sides use the wildcard.
    #[must_use]
    pub fn for_request(&self, headers: &HeaderMap) -> (JsonMarshaler, JsonMarshaler) {
        let values = |name: HeaderName| {
            headers
                .get_all(name)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .flat_map(|v| v.split(','))
                .collect::<Vec<_>>()
        };

        let outbound = values(ACCEPT).into_iter().find_map(|m| self.lookup(m));
        let inbound = values(CONTENT_TYPE).into_iter().find_map(|m| self.lookup(m));

        (
            inbound.unwrap_or(self.wildcard),
            outbound.or(inbound).unwrap_or(self.wildcard),
        )
    }
}
