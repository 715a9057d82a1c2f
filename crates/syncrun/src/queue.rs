//! # Pending Invocation Queue
//!
//! Client-bound calls accumulate per target connector until the next flush.
//!
//! ## Invariants
//!
//! - **Sorted Lists**: Each target's list is in increasing sequence order, since
//!   numbers are allocated at enqueue time and only ever appended.
//! - **Ordered Drain**: `drain` merges all lists, so the client observes calls in the
//!   order they were made even when they address different connectors.

use std::collections::HashMap;
use std::fmt;

use syncrpc::MethodHandle;
use syncrpc::MethodKey;
use syncrpc::ParamType;
use syncrpc::RpcValue;

use crate::invocation::InvocationRecord;
use crate::sequence::Sequencer;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The number of parameters does not match the method.
    ArityMismatch { method: MethodKey, found: usize },
    /// A parameter does not fit its declared type.
    ParamMismatch { method: MethodKey, index: usize, expected: ParamType, found: &'static str },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ArityMismatch { method, found } => {
                write!(f, "{} called with {} parameter(s)", method, found)
            }
            Self::ParamMismatch { method, index, expected, found } => {
                write!(f, "{} parameter {}: expected {}, found {}", method, index, expected, found)
            }
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Per-session queue of client-bound invocations.
#[derive(Debug)]
pub struct PendingQueue {
    pub(crate) sequencer: Sequencer,
    pub(crate) pending: HashMap<String, Vec<InvocationRecord>>,
}

impl PendingQueue {
    pub fn new(sequencer: Sequencer) -> Self {
        Self {
            sequencer,
            pending: HashMap::new(),
        }
    }

    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    /// Queues a call for `target` and returns the queued record.
    ///
    /// Parameters are checked against the method's declared types before a
    /// number is allocated, so rejected calls leave no gap in a session's order.
    pub fn enqueue(&mut self, target: &str, method: &MethodHandle, params: Vec<RpcValue>) -> Result<&InvocationRecord> {
        if params.len() != method.arity() {
            return Err(Error::ArityMismatch {
                method: method.key(),
                found: params.len(),
            });
        }

        let mismatch = params
            .iter()
            .zip(method.params())
            .enumerate()
            .find(|(_, (value, ty))| !value.matches(ty));
        if let Some((index, (value, ty))) = mismatch {
            return Err(Error::ParamMismatch {
                method: method.key(),
                index,
                expected: ty.clone(),
                found: value.kind(),
            });
        }

        let seq = self.sequencer.next();
        let record = InvocationRecord::new(seq, target, method, params);
        tracing::trace!(seq, connector = target, method = %record.key(), "queued invocation");

        let records = self.pending.entry(target.to_string()).or_default();
        records.push(record);
        Ok(&records[records.len() - 1])
    }

    /// The calls queued for one target, in order.
    pub fn pending_for(&self, target: &str) -> &[InvocationRecord] {
        self.pending.get(target).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Removes and returns the calls queued for one target.
    pub fn retrieve(&mut self, target: &str) -> Vec<InvocationRecord> {
        self.pending.remove(target).unwrap_or_default()
    }

    /// Removes and returns every queued call, in sequence order across targets.
    pub fn drain(&mut self) -> Vec<InvocationRecord> {
        self.pending
            .drain()
            .map(|(_, records)| records)
            .fold(Vec::new(), merge_ordered)
    }

    /// Drops the calls queued for a destroyed connector. Returns how many.
    pub fn discard(&mut self, target: &str) -> usize {
        self.pending.remove(target).map_or(0, |records| records.len())
    }

    /// Keeps only the targets for which `keep` holds. Returns how many calls were dropped.
    pub fn retain_targets(&mut self, mut keep: impl FnMut(&str) -> bool) -> usize {
        let mut dropped = 0;
        self.pending.retain(|target, records| {
            let retained = keep(target);
            if !retained {
                dropped += records.len();
            }
            retained
        });
        dropped
    }

    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.pending.keys().map(String::as_str)
    }

    /// Total number of queued calls.
    pub fn len(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.values().all(Vec::is_empty)
    }
}

/// Merges two lists that are each in sequence order.
fn merge_ordered(left: Vec<InvocationRecord>, right: Vec<InvocationRecord>) -> Vec<InvocationRecord> {
    if left.is_empty() {
        return right;
    }
    if right.is_empty() {
        return left;
    }

    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();

    loop {
        let take_left = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => l <= r,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        let next = if take_left { left.next() } else { right.next() };
        merged.extend(next);
    }

    merged
}
