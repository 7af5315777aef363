//! Tagged scalar values for telemetry, attributes and RPC responses.
//!
//! A [`TypedValue`] is built right before a publish call and serialized into
//! a JSON sink either as a `key: value` pair (telemetry, attributes) or as a
//! bare value (keyless RPC responses).

use serde_json::{Map, Number, Value};

/// Scalar payload of a [`TypedValue`].
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Scalar {
    /// Empty value: serializes to nothing.
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Real(f64),
    Str(String),
}

impl Scalar {
    /// JSON form of the scalar. `None` for the empty value and for
    /// non-finite floats, which JSON cannot carry.
    fn to_json(&self) -> Option<Value> {
        match self {
            Self::None => None,
            Self::Bool(b) => Some(Value::Bool(*b)),
            Self::Int(i) => Some(Value::Number((*i).into())),
            Self::Real(r) => Number::from_f64(*r).map(Value::Number),
            Self::Str(s) => Some(Value::String(s.clone())),
        }
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<u32> for Scalar {
    fn from(v: u32) -> Self {
        Self::Int(v.into())
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f32> for Scalar {
    fn from(v: f32) -> Self {
        Self::Real(v.into())
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// A scalar with an optional key.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TypedValue {
    key: Option<String>,
    value: Scalar,
}

/// Telemetry entries are plain typed values.
pub type Telemetry = TypedValue;
/// Client attributes share the telemetry representation.
pub type Attribute = TypedValue;
/// An RPC handler answers with a (usually keyless) typed value.
pub type RpcResponse = TypedValue;

impl TypedValue {
    /// A keyed value, serialized as `{"key": value}`.
    pub fn new(key: impl Into<String>, value: impl Into<Scalar>) -> Self {
        Self {
            key: Some(key.into()),
            value: value.into(),
        }
    }

    /// A keyless value, serialized as the bare scalar.
    pub fn bare(value: impl Into<Scalar>) -> Self {
        Self {
            key: None,
            value: value.into(),
        }
    }

    /// The empty value. Serializing it writes nothing.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn value(&self) -> &Scalar {
        &self.value
    }

    pub fn is_none(&self) -> bool {
        matches!(self.value, Scalar::None)
    }

    /// Write this value into `sink`.
    ///
    /// With a key, `sink` becomes (or stays) an object and gains
    /// `key: value`. Without a key, `sink` is replaced by the bare scalar.
    /// The empty value leaves `sink` untouched and succeeds.
    ///
    /// Returns `false` if the value cannot be represented or a keyed value
    /// is written into a sink that already holds a non-object.
    pub fn serialize_into(&self, sink: &mut Value) -> bool {
        if self.is_none() {
            return true;
        }
        let Some(json) = self.value.to_json() else {
            return false;
        };

        match &self.key {
            Some(key) => {
                if sink.is_null() {
                    *sink = Value::Object(Map::new());
                }
                match sink.as_object_mut() {
                    Some(obj) => {
                        obj.insert(key.clone(), json);
                        true
                    }
                    None => false,
                }
            }
            None => {
                *sink = json;
                true
            }
        }
    }
}
