//! Parameter values and their declared types.
//!
//! JSON is the wire form. Inbound parameters are decoded against the declared
//! `ParamType` of the resolved method, outbound parameters are checked against it.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Number;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The JSON value does not fit the declared parameter type.
    TypeMismatch { expected: ParamType, found: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TypeMismatch { expected, found } => {
                write!(f, "Type mismatch: expected {}, found {}", expected, found)
            }
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Declared type of an RPC parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamType {
    Bool,
    Int,
    Float,
    String,
    /// A reference to another connector, sent as its key.
    Connector,
    /// A structured JSON value, passed through as-is.
    Json,
    List(Box<ParamType>),
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "bool"),
            Self::Int => write!(f, "int"),
            Self::Float => write!(f, "float"),
            Self::String => write!(f, "string"),
            Self::Connector => write!(f, "connector"),
            Self::Json => write!(f, "json"),
            Self::List(inner) => write!(f, "list<{}>", inner),
        }
    }
}

/// A parameter value of an RPC call.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Connector(String),
    Json(Value),
    List(Vec<RpcValue>),
}

impl RpcValue {
    /// Encodes the value for the wire.
    ///
    /// Non-finite floats have no JSON form and encode as `null`.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::from(*i),
            Self::Float(x) => Number::from_f64(*x).map(Value::Number).unwrap_or(Value::Null),
            Self::String(s) | Self::Connector(s) => Value::String(s.clone()),
            Self::Json(v) => v.clone(),
            Self::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
        }
    }

    /// Decodes a wire value against its declared type.
    pub fn from_json(ty: &ParamType, json: &Value) -> Result<Self> {
        let mismatch = || Error::TypeMismatch {
            expected: ty.clone(),
            found: json_kind(json).to_string(),
        };

        match (ty, json) {
            (ParamType::Json, v) => Ok(Self::Json(v.clone())),
            (_, Value::Null) => Ok(Self::Null),
            (ParamType::Bool, Value::Bool(b)) => Ok(Self::Bool(*b)),
            (ParamType::Int, Value::Number(n)) => n.as_i64().map(Self::Int).ok_or_else(mismatch),
            (ParamType::Float, Value::Number(n)) => n.as_f64().map(Self::Float).ok_or_else(mismatch),
            (ParamType::String, Value::String(s)) => Ok(Self::String(s.clone())),
            (ParamType::Connector, Value::String(s)) => Ok(Self::Connector(s.clone())),
            (ParamType::List(inner), Value::Array(items)) => items
                .iter()
                .map(|item| Self::from_json(inner, item))
                .collect::<Result<Vec<_>>>()
                .map(Self::List),
            _ => Err(mismatch()),
        }
    }

    /// True if the value may be sent as a parameter declared as `ty`.
    pub fn matches(&self, ty: &ParamType) -> bool {
        match (self, ty) {
            (Self::Null, _) => true,
            (_, ParamType::Json) => matches!(self, Self::Json(_)),
            (Self::Bool(_), ParamType::Bool) => true,
            (Self::Int(_), ParamType::Int) => true,
            (Self::Float(_), ParamType::Float) => true,
            (Self::String(_), ParamType::String) => true,
            (Self::Connector(_), ParamType::Connector) => true,
            (Self::List(items), ParamType::List(inner)) => items.iter().all(|item| item.matches(inner)),
            _ => false,
        }
    }

    /// Short description of the value's kind, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Connector(_) => "connector",
            Self::Json(_) => "json",
            Self::List(_) => "list",
        }
    }
}

fn json_kind(json: &Value) -> &'static str {
    match json {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl From<bool> for RpcValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for RpcValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for RpcValue {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for RpcValue {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<&str> for RpcValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for RpcValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Value> for RpcValue {
    fn from(v: Value) -> Self {
        Self::Json(v)
    }
}
