//! Positional argument encoding.
//!
//! Arguments travel as a JSON array with one element per parameter. Both
//! sides describe a parameter list as a tuple: the client encodes any tuple of
//! `Serialize` values with [`RpcArgs`], the server decodes into a tuple of
//! `DeserializeOwned` values with [`FromArgs`]. `()` is the empty list.

use crate::error::{Result, RpcError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// A parameter list that can be sent.
pub trait RpcArgs: Send {
    fn into_values(self) -> Result<Vec<Value>>;
}

/// A parameter list that a handler accepts.
pub trait FromArgs: Sized + Send + 'static {
    /// Number of positional parameters.
    const ARITY: usize;

    /// Type names of the parameters, in order.
    fn param_types() -> Vec<&'static str>;

    /// Decode exactly [`FromArgs::ARITY`] values.
    fn from_values(values: Vec<Value>) -> Result<Self>;
}

impl RpcArgs for Vec<Value> {
    fn into_values(self) -> Result<Vec<Value>> {
        Ok(self)
    }
}

macro_rules! count {
    () => { 0usize };
    ($head:ident $($tail:ident)*) => { 1usize + count!($($tail)*) };
}

macro_rules! impl_args {
    ($($name:ident),*) => {
        impl<$($name: Serialize + Send),*> RpcArgs for ($($name,)*) {
            #[allow(non_snake_case)]
            fn into_values(self) -> Result<Vec<Value>> {
                let ($($name,)*) = self;
                Ok(vec![$(serde_json::to_value($name)?),*])
            }
        }

        impl<$($name: DeserializeOwned + Send + 'static),*> FromArgs for ($($name,)*) {
            const ARITY: usize = count!($($name)*);

            fn param_types() -> Vec<&'static str> {
                vec![$(std::any::type_name::<$name>()),*]
            }

            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn from_values(values: Vec<Value>) -> Result<Self> {
                if values.len() != Self::ARITY {
                    return Err(RpcError::protocol(format!(
                        "expected {} arguments, got {}",
                        Self::ARITY,
                        values.len()
                    )));
                }
                let mut values = values.into_iter();
                $(
                    let $name: $name = serde_json::from_value(
                        values.next().ok_or_else(|| RpcError::protocol("missing argument"))?,
                    )?;
                )*
                Ok(($($name,)*))
            }
        }
    };
}

impl_args!();
impl_args!(A);
impl_args!(A, B);
impl_args!(A, B, C);
impl_args!(A, B, C, D);
impl_args!(A, B, C, D, E);
impl_args!(A, B, C, D, E, F);
impl_args!(A, B, C, D, E, F, G);
impl_args!(A, B, C, D, E, F, G, H);

/// Decode a result payload.
pub fn decode_result<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(payload)?)
}

/// Encode a handler's result.
pub fn encode_result<T: Serialize>(value: &T) -> Result<bytes::Bytes> {
    Ok(bytes::Bytes::from(serde_json::to_vec(value)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_unit_encodes_as_empty_list() {
        assert!(().into_values().unwrap().is_empty());
        assert_eq!(<() as FromArgs>::ARITY, 0);
        assert!(<()>::from_values(vec![]).is_ok());
    }

    #[test]
    fn test_positional_order() {
        let values = ("Hello", "World").into_values().unwrap();
        assert_eq!(values, vec![json!("Hello"), json!("World")]);

        let (a, b) = <(String, String)>::from_values(values).unwrap();
        assert_eq!(a + &b, "HelloWorld");
    }

    #[test]
    fn test_param_types() {
        let types = <(i32, String)>::param_types();
        assert_eq!(types[0], "i32");
        assert!(types[1].ends_with("String"));
        assert_eq!(<(String, String)>::ARITY, 2);
    }

    #[test]
    fn test_wrong_count_rejected() {
        assert!(<(i32,)>::from_values(vec![json!(1), json!(2)]).is_err());
        assert!(<(i32, i32)>::from_values(vec![json!(1)]).is_err());
    }

    #[test]
    fn test_wrong_type_is_json_error() {
        let result = <(i32,)>::from_values(vec![json!("six")]);
        assert!(matches!(result, Err(RpcError::Json { .. })));
    }

    proptest! {
        #[test]
        fn prop_args_roundtrip(
            a in any::<i64>(),
            b in ".*",
            c in any::<bool>(),
            d in proptest::collection::vec(any::<u32>(), 0..8),
        ) {
            let values = (a, b.clone(), c, d.clone()).into_values().unwrap();
            let raw = crate::protocol::encode_args(&values).unwrap();
            let decoded = crate::protocol::decode_args(&raw).unwrap();
            let back = <(i64, String, bool, Vec<u32>)>::from_values(decoded).unwrap();
            prop_assert_eq!(back, (a, b, c, d));
        }

        #[test]
        fn prop_result_roundtrip(value in proptest::option::of(".*"), n in any::<i32>()) {
            let payload = encode_result(&(value.clone(), n)).unwrap();
            let back: (Option<String>, i32) = decode_result(&payload).unwrap();
            prop_assert_eq!(back, (value, n));
        }
    }
}
