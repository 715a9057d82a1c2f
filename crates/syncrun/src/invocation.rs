//! One queued client-bound call.

use std::cmp::Ordering;

use serde_json::Value;
use syncrpc::MethodHandle;
use syncrpc::MethodKey;
use syncrpc::ParamType;
use syncrpc::RpcValue;
use syncrpc::wire;

/// An outbound method call awaiting serialization to the client.
///
/// Records are ordered, and compare equal, by sequence number alone. Two distinct
/// records never share a number because allocation is atomic.
#[derive(Debug, Clone)]
pub struct InvocationRecord {
    pub(crate) seq: u64,
    pub(crate) target: String,
    pub(crate) interface: String,
    pub(crate) method: String,
    pub(crate) param_types: Vec<ParamType>,
    pub(crate) params: Vec<RpcValue>,
}

impl InvocationRecord {
    /// Captures method name and declared parameter types from the handle.
    pub(crate) fn new(seq: u64, target: &str, method: &MethodHandle, params: Vec<RpcValue>) -> Self {
        Self {
            seq,
            target: target.to_string(),
            interface: method.interface().to_string(),
            method: method.name().to_string(),
            param_types: method.params().to_vec(),
            params,
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Key of the connector the call is addressed to.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn param_types(&self) -> &[ParamType] {
        &self.param_types
    }

    pub fn params(&self) -> &[RpcValue] {
        &self.params
    }

    pub fn key(&self) -> MethodKey {
        MethodKey::new(self.interface.as_str(), self.method.as_str(), self.params.len())
    }

    /// Encodes the call as `[target, interface, method, [params]]`.
    pub fn to_wire(&self) -> Value {
        let params = self.params.iter().map(RpcValue::to_json).collect();
        wire::encode_call(&self.target, &self.interface, &self.method, params)
    }
}

impl PartialEq for InvocationRecord {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for InvocationRecord {}

impl PartialOrd for InvocationRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InvocationRecord {
    fn cmp(&self, other: &Self) -> Ordering {
        self.seq.cmp(&other.seq)
    }
}
