//! # Queue Persistence
//!
//! Queued invocations outlive a request when the session is written out, e.g. for
//! failover. Parameter values without a portable form are converted to a tagged
//! text form before that boundary and parsed back on restore.
//!
//! ## Invariants
//!
//! - **Symmetric**: `restore(persist(x)) == x` for every supported parameter type.
//! - **Loud Failure**: A record that cannot be decoded fails the restore. Dropping it
//!   would mean the client never receives a call the server made.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use syncrpc::ParamType;
use syncrpc::RpcValue;

use crate::invocation::InvocationRecord;
use crate::queue::PendingQueue;
use crate::sequence::Sequencer;

#[derive(Debug)]
pub enum Error {
    /// A persisted invocation could not be turned back into a record.
    Decode { seq: u64, reason: String },
    /// The snapshot bytes are not a valid snapshot.
    Format(serde_json::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode { seq, reason } => write!(f, "Cannot restore invocation #{}: {}", seq, reason),
            Self::Format(e) => write!(f, "Invalid queue snapshot: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Format(e) => Some(e),
            Self::Decode { .. } => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Format(e)
    }
}

/// Restore failures surface as I/O failures of the session being loaded.
impl From<Error> for std::io::Error {
    fn from(e: Error) -> Self {
        std::io::Error::new(std::io::ErrorKind::InvalidData, e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A value that must cross a persistence boundary as tagged text.
pub trait WireForm: Sized {
    /// Distinguishes this type among tagged values.
    const TAG: &'static str;

    fn to_wire_text(&self) -> String;

    fn from_wire_text(text: &str) -> std::result::Result<Self, String>;
}

impl WireForm for Value {
    const TAG: &'static str = "json";

    fn to_wire_text(&self) -> String {
        self.to_string()
    }

    fn from_wire_text(text: &str) -> std::result::Result<Self, String> {
        serde_json::from_str(text).map_err(|e| e.to_string())
    }
}

/// Only non-finite floats take this form; JSON has no number for them.
impl WireForm for f64 {
    const TAG: &'static str = "f64";

    fn to_wire_text(&self) -> String {
        self.to_string()
    }

    fn from_wire_text(text: &str) -> std::result::Result<Self, String> {
        text.parse().map_err(|e: std::num::ParseFloatError| e.to_string())
    }
}

/// The persistable form of an `RpcValue`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PersistedValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Connector(String),
    List(Vec<PersistedValue>),
    Tagged { tag: String, text: String },
}

impl PersistedValue {
    pub fn from_value(value: &RpcValue) -> Self {
        match value {
            RpcValue::Null => Self::Null,
            RpcValue::Bool(b) => Self::Bool(*b),
            RpcValue::Int(i) => Self::Int(*i),
            RpcValue::Float(x) if x.is_finite() => Self::Float(*x),
            RpcValue::Float(x) => tagged(x),
            RpcValue::String(s) => Self::String(s.clone()),
            RpcValue::Connector(key) => Self::Connector(key.clone()),
            RpcValue::Json(json) => tagged(json),
            RpcValue::List(items) => Self::List(items.iter().map(Self::from_value).collect()),
        }
    }

    pub fn into_value(self) -> std::result::Result<RpcValue, String> {
        Ok(match self {
            Self::Null => RpcValue::Null,
            Self::Bool(b) => RpcValue::Bool(b),
            Self::Int(i) => RpcValue::Int(i),
            Self::Float(x) => RpcValue::Float(x),
            Self::String(s) => RpcValue::String(s),
            Self::Connector(key) => RpcValue::Connector(key),
            Self::List(items) => RpcValue::List(
                items.into_iter().map(Self::into_value).collect::<std::result::Result<_, _>>()?,
            ),
            Self::Tagged { tag, text } if tag == <Value as WireForm>::TAG => {
                RpcValue::Json(Value::from_wire_text(&text)?)
            }
            Self::Tagged { tag, text } if tag == <f64 as WireForm>::TAG => {
                RpcValue::Float(f64::from_wire_text(&text)?)
            }
            Self::Tagged { tag, .. } => return Err(format!("unknown value tag '{}'", tag)),
        })
    }
}

fn tagged<T: WireForm>(value: &T) -> PersistedValue {
    PersistedValue::Tagged {
        tag: T::TAG.to_string(),
        text: value.to_wire_text(),
    }
}

/// The persistable form of an `InvocationRecord`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedInvocation {
    pub seq: u64,
    pub target: String,
    pub interface: String,
    pub method: String,
    pub param_types: Vec<ParamType>,
    pub params: Vec<PersistedValue>,
}

impl PersistedInvocation {
    pub fn from_record(record: &InvocationRecord) -> Self {
        Self {
            seq: record.seq,
            target: record.target.clone(),
            interface: record.interface.clone(),
            method: record.method.clone(),
            param_types: record.param_types.clone(),
            params: record.params.iter().map(PersistedValue::from_value).collect(),
        }
    }

    pub fn restore(self) -> Result<InvocationRecord> {
        let seq = self.seq;
        if self.params.len() != self.param_types.len() {
            return Err(Error::Decode {
                seq,
                reason: format!("{} parameter(s) for {} declared type(s)", self.params.len(), self.param_types.len()),
            });
        }

        let params = self
            .params
            .into_iter()
            .map(PersistedValue::into_value)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|reason| Error::Decode { seq, reason })?;

        Ok(InvocationRecord {
            seq,
            target: self.target,
            interface: self.interface,
            method: self.method,
            param_types: self.param_types,
            params,
        })
    }
}

/// Every invocation queued in a session at the time of the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// The sequence number the session would have allocated next.
    pub next_seq: u64,
    pub invocations: Vec<PersistedInvocation>,
}

impl QueueSnapshot {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl PendingQueue {
    /// Captures every queued call in sequence order. The queue is left untouched.
    pub fn snapshot(&self) -> QueueSnapshot {
        let mut records: Vec<&InvocationRecord> = self.pending.values().flatten().collect();
        records.sort();

        QueueSnapshot {
            next_seq: self.sequencer.peek(),
            invocations: records.into_iter().map(PersistedInvocation::from_record).collect(),
        }
    }

    /// Rebuilds a queue from a snapshot.
    ///
    /// `sequencer` is moved past every restored number, so calls queued after the
    /// restore still sort after the restored ones.
    pub fn restore(snapshot: QueueSnapshot, sequencer: Sequencer) -> Result<Self> {
        let mut records = snapshot
            .invocations
            .into_iter()
            .map(PersistedInvocation::restore)
            .collect::<Result<Vec<_>>>()?;
        records.sort();

        sequencer.advance_past(snapshot.next_seq.saturating_sub(1));
        if let Some(last) = records.last() {
            sequencer.advance_past(last.seq);
        }

        let mut queue = PendingQueue::new(sequencer);
        for record in records {
            queue.pending.entry(record.target.clone()).or_default().push(record);
        }

        tracing::debug!(restored = queue.len(), next_seq = queue.sequencer.peek(), "restored invocation queue");
        Ok(queue)
    }
}
