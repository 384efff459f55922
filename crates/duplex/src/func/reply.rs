use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;

use serde::Serialize;
use serde_json::Value;

/// Return types an adapted function may have.
///
/// `Err` becomes an error reply carrying its `Display` text.
pub trait IntoReply: Send + 'static {
    fn into_reply(self) -> Result<Value, String>;
}

/// Wraps any serializable value as a reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Json<T>(pub T);

fn encode<T: Serialize>(value: &T) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|e| format!("encode reply: {e}"))
}

impl IntoReply for () {
    fn into_reply(self) -> Result<Value, String> {
        Ok(Value::Null)
    }
}

impl IntoReply for Value {
    fn into_reply(self) -> Result<Value, String> {
        Ok(self)
    }
}

impl<T, E> IntoReply for Result<T, E>
where
    T: IntoReply,
    E: Display + Send + 'static,
{
    fn into_reply(self) -> Result<Value, String> {
        self.map_err(|e| e.to_string())?.into_reply()
    }
}

impl<T: Serialize + Send + 'static> IntoReply for Json<T> {
    fn into_reply(self) -> Result<Value, String> {
        encode(&self.0)
    }
}

impl<T: Serialize + Send + 'static> IntoReply for Option<T> {
    fn into_reply(self) -> Result<Value, String> {
        encode(&self)
    }
}

impl<T: Serialize + Send + 'static> IntoReply for Vec<T> {
    fn into_reply(self) -> Result<Value, String> {
        encode(&self)
    }
}

impl<T: Serialize + Send + 'static> IntoReply for HashMap<String, T> {
    fn into_reply(self) -> Result<Value, String> {
        encode(&self)
    }
}

impl<T: Serialize + Send + 'static> IntoReply for BTreeMap<String, T> {
    fn into_reply(self) -> Result<Value, String> {
        encode(&self)
    }
}

macro_rules! serialize_reply {
    ($($ty:ty),* $(,)?) => {
        $(
            impl IntoReply for $ty {
                fn into_reply(self) -> Result<Value, String> {
                    encode(&self)
                }
            }
        )*
    };
}

serialize_reply!(
    String,
    &'static str,
    bool,
    i8,
    i16,
    i32,
    i64,
    isize,
    u8,
    u16,
    u32,
    u64,
    usize,
    f32,
    f64,
);
