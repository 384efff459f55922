use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArgsError {
    #[error("expected {expected} arguments, got {got}")]
    Arity { expected: usize, got: usize },

    #[error("params must be a sequence")]
    NotASequence,

    #[error("argument {index}: {source}")]
    Decode {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Tuple of parameters decoded from a call's params value.
///
/// Null is the empty list and sequences match positionally. A one-parameter
/// function takes the params value whole; if that does not decode and the
/// value is a one-element sequence, the element is tried instead.
pub trait FromArgs: Sized + Send + 'static {
    const ARITY: usize;

    fn from_args(params: Value) -> Result<Self, ArgsError>;
}

struct ArgList {
    items: std::vec::IntoIter<Value>,
    index: usize,
    /// Set when the only argument is a one-element sequence that may need
    /// unwrapping.
    wrapped: bool,
}

impl ArgList {
    fn new(params: Value, arity: usize) -> Result<Self, ArgsError> {
        let wrapped = arity == 1 && matches!(&params, Value::Array(items) if items.len() == 1);
        let items = match params {
            Value::Null => Vec::new(),
            other if arity == 1 => vec![other],
            Value::Array(items) => items,
            _ => return Err(ArgsError::NotASequence),
        };
        if items.len() != arity {
            return Err(ArgsError::Arity {
                expected: arity,
                got: items.len(),
            });
        }
        Ok(Self {
            items: items.into_iter(),
            index: 0,
            wrapped,
        })
    }

    fn next<T: DeserializeOwned>(&mut self) -> Result<T, ArgsError> {
        let index = self.index;
        self.index += 1;
        let value = self.items.next().unwrap_or(Value::Null);
        if !self.wrapped {
            return serde_json::from_value(value)
                .map_err(|source| ArgsError::Decode { index, source });
        }
        match <T as serde::Deserialize>::deserialize(&value) {
            Ok(whole) => Ok(whole),
            Err(source) => match value {
                Value::Array(mut items) if items.len() == 1 => serde_json::from_value(items.remove(0))
                    .map_err(|_| ArgsError::Decode { index, source }),
                _ => Err(ArgsError::Decode { index, source }),
            },
        }
    }
}

macro_rules! impl_from_args {
    ($($ty:ident),*) => {
        impl<$($ty,)*> FromArgs for ($($ty,)*)
        where
            $($ty: DeserializeOwned + Send + 'static,)*
        {
            const ARITY: usize = <[&str]>::len(&[$(stringify!($ty)),*]);

            #[allow(unused_mut, unused_variables)]
            fn from_args(params: Value) -> Result<Self, ArgsError> {
                let mut items = ArgList::new(params, Self::ARITY)?;
                Ok(($(items.next::<$ty>()?,)*))
            }
        }
    };
}

all_the_tuples!(impl_from_args);

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn positional() {
        let (a, b): (i64, String) = FromArgs::from_args(json!([1, "two"])).unwrap();
        assert_eq!((a, b.as_str()), (1, "two"));
    }

    #[test]
    fn null_is_empty() {
        <()>::from_args(Value::Null).unwrap();
        <()>::from_args(json!([])).unwrap();
        assert!(matches!(
            <(i64,)>::from_args(Value::Null),
            Err(ArgsError::Arity { expected: 1, got: 0 })
        ));
    }

    #[test]
    fn single_parameter_takes_value_whole() {
        let (m,): (serde_json::Map<String, Value>,) =
            FromArgs::from_args(json!({"foo": "bar"})).unwrap();
        assert_eq!(m["foo"], "bar");

        let (v,): (Vec<i64>,) = FromArgs::from_args(json!([1, 2, 3])).unwrap();
        assert_eq!(v, [1, 2, 3]);

        let (n,): (i64,) = FromArgs::from_args(json!([7])).unwrap();
        assert_eq!(n, 7);
    }

    #[test]
    fn single_sequence_parameter_keeps_short_lists() {
        let (v,): (Vec<i64>,) = FromArgs::from_args(json!([7])).unwrap();
        assert_eq!(v, [7]);

        let (v,): (Vec<i64>,) = FromArgs::from_args(json!([])).unwrap();
        assert!(v.is_empty());

        let (nested,): (Vec<Vec<i64>>,) = FromArgs::from_args(json!([[1, 2]])).unwrap();
        assert_eq!(nested, [vec![1, 2]]);

        let err = <(i64,)>::from_args(json!(["x"])).unwrap_err();
        assert!(matches!(err, ArgsError::Decode { index: 0, .. }));
    }

    #[test]
    fn arity_mismatch() {
        let err = <(i64, i64)>::from_args(json!([1])).unwrap_err();
        assert_eq!(err.to_string(), "expected 2 arguments, got 1");
    }

    #[test]
    fn scalar_for_many_parameters() {
        assert!(matches!(
            <(i64, i64)>::from_args(json!(5)),
            Err(ArgsError::NotASequence)
        ));
    }

    #[test]
    fn decode_error_names_the_argument() {
        let err = <(i64, bool)>::from_args(json!([1, "nope"])).unwrap_err();
        assert!(matches!(err, ArgsError::Decode { index: 1, .. }));
        assert!(err.to_string().starts_with("argument 1: "));
    }
}
