//! The cached value model.
//!
//! A plain JSON document cannot express everything callers cache: "explicitly
//! cached null" must stay distinct from "nothing cached", and undefined/NaN
//! have no JSON form at all. [`CachedValue`] names those classes explicitly;
//! absence is always `Option::None` at the API boundary, never a variant here.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

/// A value held by either cache tier.
///
/// The `Json` variant never carries `Value::Null`; explicit null is the `Null`
/// variant. Build values through the `From` impls or [`CachedValue::json`] to
/// keep that normalized.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
    /// Any ordinary JSON value other than null, including `""`, `0` and `false`.
    Json(Value),
    /// An explicitly cached null.
    Null,
    /// An explicitly cached undefined.
    Undefined,
    /// An explicitly cached NaN.
    NaN,
}

impl CachedValue {
    /// Wrap a JSON value, mapping JSON null to [`CachedValue::Null`].
    pub fn json(value: Value) -> Self {
        match value {
            Value::Null => CachedValue::Null,
            other => CachedValue::Json(other),
        }
    }

    /// Serialize any `Serialize` type into a cached value.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(value).map(Self::json)
    }

    /// Deserialize into `T`.
    ///
    /// Null and undefined both present as JSON null, so they deserialize into
    /// `Option::None` or unit-like targets. NaN deserializes only into types
    /// that accept JSON null.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match self {
            CachedValue::Json(value) => T::deserialize(value),
            CachedValue::Null | CachedValue::Undefined | CachedValue::NaN => {
                T::deserialize(&Value::Null)
            }
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            CachedValue::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_json(self) -> Option<Value> {
        match self {
            CachedValue::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CachedValue::Null)
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, CachedValue::Undefined)
    }

    pub fn is_nan(&self) -> bool {
        matches!(self, CachedValue::NaN)
    }

    /// Short class name used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            CachedValue::Json(Value::Object(_)) => "object",
            CachedValue::Json(Value::Array(_)) => "array",
            CachedValue::Json(Value::String(_)) => "string",
            CachedValue::Json(Value::Number(_)) => "number",
            CachedValue::Json(Value::Bool(_)) => "boolean",
            CachedValue::Json(Value::Null) | CachedValue::Null => "null",
            CachedValue::Undefined => "undefined",
            CachedValue::NaN => "nan",
        }
    }
}

impl From<Value> for CachedValue {
    fn from(value: Value) -> Self {
        Self::json(value)
    }
}

impl From<&str> for CachedValue {
    fn from(value: &str) -> Self {
        CachedValue::Json(Value::String(value.to_string()))
    }
}

impl From<String> for CachedValue {
    fn from(value: String) -> Self {
        CachedValue::Json(Value::String(value))
    }
}

impl From<bool> for CachedValue {
    fn from(value: bool) -> Self {
        CachedValue::Json(Value::Bool(value))
    }
}

impl From<i64> for CachedValue {
    fn from(value: i64) -> Self {
        CachedValue::Json(Value::from(value))
    }
}

impl From<u64> for CachedValue {
    fn from(value: u64) -> Self {
        CachedValue::Json(Value::from(value))
    }
}

impl From<i32> for CachedValue {
    fn from(value: i32) -> Self {
        CachedValue::Json(Value::from(value))
    }
}

impl From<f64> for CachedValue {
    /// NaN becomes [`CachedValue::NaN`]; infinities have no JSON form and
    /// become null, matching how a JSON encoder treats them.
    fn from(value: f64) -> Self {
        if value.is_nan() {
            CachedValue::NaN
        } else {
            serde_json::Number::from_f64(value)
                .map(|n| CachedValue::Json(Value::Number(n)))
                .unwrap_or(CachedValue::Null)
        }
    }
}

impl<T: Into<CachedValue>> From<Option<T>> for CachedValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(CachedValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn test_json_null_normalizes_to_null_variant() {
        assert_eq!(CachedValue::json(Value::Null), CachedValue::Null);
        assert_eq!(CachedValue::from(json!(null)), CachedValue::Null);
    }

    #[test]
    fn test_falsy_values_stay_json() {
        assert_eq!(CachedValue::from(""), CachedValue::Json(json!("")));
        assert_eq!(CachedValue::from(0i64), CachedValue::Json(json!(0)));
        assert_eq!(CachedValue::from(false), CachedValue::Json(json!(false)));
    }

    #[test]
    fn test_float_conversion() {
        assert!(CachedValue::from(f64::NAN).is_nan());
        assert!(CachedValue::from(f64::INFINITY).is_null());
        assert_eq!(CachedValue::from(1.5f64), CachedValue::Json(json!(1.5)));
    }

    #[test]
    fn test_typed_roundtrip() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Profile {
            name: String,
            visits: u32,
        }

        let profile = Profile {
            name: "ada".to_string(),
            visits: 3,
        };
        let value = CachedValue::from_serialize(&profile).unwrap();
        assert_eq!(value.kind(), "object");
        assert_eq!(value.deserialize::<Profile>().unwrap(), profile);
    }

    #[test]
    fn test_sentinels_deserialize_as_none() {
        assert_eq!(CachedValue::Null.deserialize::<Option<u32>>().unwrap(), None);
        assert_eq!(CachedValue::Undefined.deserialize::<Option<u32>>().unwrap(), None);
    }
}
