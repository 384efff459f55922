use serde_json::{Map, Number, Value};

use super::{Codec, CodecError};

/// CBOR codec backed by `ciborium`.
///
/// Decoding goes through `ciborium::Value` first so that CBOR-only shapes sent
/// by other implementations (byte strings, tags, non-text map keys) still land
/// in the JSON value model instead of failing.
#[derive(Debug, Clone, Copy, Default)]
pub struct CborCodec;

impl Codec for CborCodec {
    fn name(&self) -> &'static str {
        "cbor"
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        ciborium::into_writer(value, &mut out)
            .map_err(|e| CodecError::CborEncode(e.to_string()))?;
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        let raw: ciborium::Value =
            ciborium::from_reader(bytes).map_err(|e| CodecError::CborDecode(e.to_string()))?;
        to_json(raw)
    }
}

fn to_json(value: ciborium::Value) -> Result<Value, CodecError> {
    use ciborium::Value as Cbor;

    Ok(match value {
        Cbor::Null => Value::Null,
        Cbor::Bool(b) => Value::Bool(b),
        Cbor::Integer(i) => Value::Number(integer(i128::from(i))?),
        // NaN and infinities have no JSON form
        Cbor::Float(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        Cbor::Text(s) => Value::String(s),
        Cbor::Bytes(b) => Value::Array(b.into_iter().map(Value::from).collect()),
        Cbor::Tag(_, inner) => to_json(*inner)?,
        Cbor::Array(items) => {
            Value::Array(items.into_iter().map(to_json).collect::<Result<_, _>>()?)
        }
        Cbor::Map(entries) => {
            let mut map = Map::with_capacity(entries.len());
            for (k, v) in entries {
                map.insert(map_key(k)?, to_json(v)?);
            }
            Value::Object(map)
        }
        other => {
            return Err(CodecError::CborDecode(format!(
                "unsupported value: {other:?}"
            )));
        }
    })
}

fn integer(i: i128) -> Result<Number, CodecError> {
    if let Ok(n) = i64::try_from(i) {
        Ok(Number::from(n))
    } else if let Ok(n) = u64::try_from(i) {
        Ok(Number::from(n))
    } else {
        Err(CodecError::CborDecode(format!("integer out of range: {i}")))
    }
}

fn map_key(key: ciborium::Value) -> Result<String, CodecError> {
    match key {
        ciborium::Value::Text(s) => Ok(s),
        other => match to_json(other)? {
            Value::String(s) => Ok(s),
            v => Ok(v.to_string()),
        },
    }
}
