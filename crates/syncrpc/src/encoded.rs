//! # Encoded Results
//!
//! An encoded value, optionally paired with a diff against the encoding the client
//! last received for the same logical field.
//!
//! The type does not check that a diff really describes the delta from the previous
//! state; whoever produces the diff owns that invariant.

use serde_json::Map;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
enum Repr {
    Value(Value),
    ValueAndDiff { value: Value, diff: Value },
    Diff(Value),
}

/// A full encoding, a diff, or both. Never neither.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedResult {
    repr: Repr,
}

impl EncodedResult {
    /// A full encoding with no diff.
    pub fn new(value: Value) -> Self {
        Self { repr: Repr::Value(value) }
    }

    pub fn with_diff(value: Value, diff: Value) -> Self {
        Self { repr: Repr::ValueAndDiff { value, diff } }
    }

    /// A diff without the full encoding, for producers that never need the latter.
    pub fn diff_only(diff: Value) -> Self {
        Self { repr: Repr::Diff(diff) }
    }

    pub fn encoded_value(&self) -> Option<&Value> {
        match &self.repr {
            Repr::Value(value) | Repr::ValueAndDiff { value, .. } => Some(value),
            Repr::Diff(_) => None,
        }
    }

    pub fn diff(&self) -> Option<&Value> {
        match &self.repr {
            Repr::ValueAndDiff { diff, .. } | Repr::Diff(diff) => Some(diff),
            Repr::Value(_) => None,
        }
    }

    /// The diff if present, otherwise the full value.
    pub fn diff_or_value(&self) -> &Value {
        match &self.repr {
            Repr::Value(value) => value,
            Repr::ValueAndDiff { diff, .. } | Repr::Diff(diff) => diff,
        }
    }

    pub fn into_diff_or_value(self) -> Value {
        match self.repr {
            Repr::Value(value) => value,
            Repr::ValueAndDiff { diff, .. } | Repr::Diff(diff) => diff,
        }
    }
}

/// Encodes `value` against the encoding previously sent for the same field.
///
/// Objects are diffed field by field: a field enters the diff when its value differs
/// from the reference's field, and nested objects contribute their own diff rather
/// than their full value. A `null` reference field counts as absent. Anything that
/// is not an object is sent whole.
pub fn encode_against(value: &Value, reference: Option<&Value>) -> EncodedResult {
    let Value::Object(fields) = value else {
        return EncodedResult::new(value.clone());
    };
    let reference = match reference {
        Some(Value::Object(reference)) => Some(reference),
        _ => None,
    };

    let mut diff = Map::new();
    for (name, field) in fields {
        let field_reference = reference
            .and_then(|r| r.get(name))
            .filter(|r| !r.is_null());

        if !json_equals(field, field_reference) {
            let encoded = encode_against(field, field_reference);
            diff.insert(name.clone(), encoded.into_diff_or_value());
        }
    }

    EncodedResult::with_diff(value.clone(), Value::Object(diff))
}

fn json_equals(value: &Value, reference: Option<&Value>) -> bool {
    match reference {
        None => value.is_null(),
        Some(reference) => value == reference,
    }
}
