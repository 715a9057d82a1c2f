//! # Invocation Wire Format
//!
//! Each invocation travels as a four-element JSON array:
//!
//! ```text
//! [targetKey, qualifiedInterface, methodName, [param, ...]]
//! ```
//!
//! The same shape is used in both directions. A batch is an array of invocations.

use std::fmt;

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The payload does not have the invocation shape.
    Malformed { index: Option<usize>, reason: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed { index: Some(i), reason } => write!(f, "Malformed invocation #{}: {}", i, reason),
            Self::Malformed { index: None, reason } => write!(f, "Malformed invocation batch: {}", reason),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// A call received from the client, parameters still in wire form.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundCall {
    pub target: String,
    pub interface: String,
    pub method: String,
    pub params: Vec<Value>,
}

impl InboundCall {
    /// Parses one invocation array.
    pub fn parse(json: &Value) -> Result<Self> {
        Self::parse_at(json, None)
    }

    fn parse_at(json: &Value, index: Option<usize>) -> Result<Self> {
        let malformed = |reason: &str| Error::Malformed { index, reason: reason.to_string() };

        let parts = json
            .as_array()
            .and_then(|a| <&[Value; 4]>::try_from(a.as_slice()).ok());
        let Some([target, interface, method, params]) = parts else {
            return Err(malformed("expected [target, interface, method, params]"));
        };

        let target = target.as_str().ok_or_else(|| malformed("target must be a string"))?;
        let interface = interface.as_str().ok_or_else(|| malformed("interface must be a string"))?;
        let method = method.as_str().ok_or_else(|| malformed("method must be a string"))?;
        let params = params.as_array().ok_or_else(|| malformed("params must be an array"))?;

        Ok(Self {
            target: target.to_string(),
            interface: interface.to_string(),
            method: method.to_string(),
            params: params.clone(),
        })
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

/// Parses an array of invocations, preserving order.
pub fn parse_batch(json: &Value) -> Result<Vec<InboundCall>> {
    let calls = json.as_array().ok_or_else(|| Error::Malformed {
        index: None,
        reason: "expected an array of invocations".to_string(),
    })?;

    calls
        .iter()
        .enumerate()
        .map(|(i, call)| InboundCall::parse_at(call, Some(i)))
        .collect()
}

/// Encodes one invocation for the client.
pub fn encode_call(target: &str, interface: &str, method: &str, params: Vec<Value>) -> Value {
    Value::Array(vec![
        Value::from(target),
        Value::from(interface),
        Value::from(method),
        Value::Array(params),
    ])
}
