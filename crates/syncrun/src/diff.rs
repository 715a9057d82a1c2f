//! Per-connector memory of the last state sent, for diff encoding.

use std::collections::HashMap;

use serde_json::Value;
use syncrpc::EncodedResult;
use syncrpc::encode_against;

#[derive(Debug, Default)]
pub struct DiffTracker {
    sent: HashMap<String, Value>,
}

impl DiffTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encodes `state` against what was last sent for `target` and remembers it.
    ///
    /// The first encoding for a target carries the full value.
    pub fn encode(&mut self, target: &str, state: Value) -> EncodedResult {
        let encoded = encode_against(&state, self.sent.get(target));
        self.sent.insert(target.to_string(), state);
        encoded
    }

    pub fn previous(&self, target: &str) -> Option<&Value> {
        self.sent.get(target)
    }

    /// Forgets a target, so its next encoding is sent in full.
    pub fn forget(&mut self, target: &str) -> bool {
        self.sent.remove(target).is_some()
    }

    pub fn retain_targets(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.sent.retain(|target, _| keep(target));
    }

    pub fn clear(&mut self) {
        self.sent.clear();
    }

    pub fn len(&self) -> usize {
        self.sent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.is_empty()
    }
}
