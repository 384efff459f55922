use serde_json::Value;

use super::{Codec, CodecError};

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn encodes_compact_json() {
        let bytes = JsonCodec.encode(&json!({"foo": [1, 2]})).unwrap();
        assert_eq!(bytes, br#"{"foo":[1,2]}"#);
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            JsonCodec.decode(b"{not json"),
            Err(CodecError::Json(_))
        ));
    }
}
