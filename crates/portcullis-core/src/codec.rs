//! JSON implementation of [`BodyCodec`].

use crate::collaborators::{BodyCodec, KeyedPayload};
use crate::error::{DecodeError, EncodeError};
use bytes::Bytes;
use serde_json::Value;

/// Decodes JSON objects and encodes them back, keeping key order.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl BodyCodec for JsonCodec {
    fn decode(&self, bytes: &[u8]) -> Result<KeyedPayload, DecodeError> {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(DecodeError::new(format!(
                "expected a JSON object, got {}",
                kind(&other)
            ))),
            Err(e) => Err(DecodeError::new(e.to_string())),
        }
    }

    fn encode(&self, payload: &KeyedPayload) -> Result<Bytes, EncodeError> {
        serde_json::to_vec(payload)
            .map(Bytes::from)
            .map_err(|e| EncodeError::new(e.to_string()))
    }
}

const fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_object_keeps_order() {
        let payload = JsonCodec.decode(br#"{"zeta":1,"alpha":2}"#).unwrap();
        let keys: Vec<&str> = payload.keys().map(String::as_str).collect();
        assert_eq!(keys, ["zeta", "alpha"]);
    }

    #[test]
    fn test_decode_rejects_non_objects() {
        let err = JsonCodec.decode(b"[1,2]").unwrap_err();
        assert!(err.message.contains("an array"));

        assert!(JsonCodec.decode(b"not json").is_err());
        assert!(JsonCodec.decode(b"").is_err());
    }

    #[test]
    fn test_encode_appends_in_insertion_order() {
        let mut payload = JsonCodec.decode(br#"{"foo":"bar"}"#).unwrap();
        payload.insert("user".to_string(), Value::from("user123"));

        let bytes = JsonCodec.encode(&payload).unwrap();
        assert_eq!(bytes, Bytes::from(r#"{"foo":"bar","user":"user123"}"#));
    }
}
