//! # Method Resolver
//!
//! Resolves `(interface, method, arity)` to a `MethodHandle`, with a process-wide cache.
//!
//! Uses DashMap so that sessions resolving concurrently never wait on each other.
//! A miss scans the interface's methods and inserts the result; two threads racing
//! on the same signature compute the same handle, and the first insert wins.
//! Failed resolutions are not cached.

use std::fmt;
use std::sync::Arc;
use std::sync::OnceLock;

use dashmap::DashMap;

use crate::interface::MethodSignature;
use crate::interface::RpcInterface;
use crate::value::ParamType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// No method on the interface matches name and arity.
    MethodNotFound(MethodKey),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MethodNotFound(key) => write!(f, "Method not found: {}", key),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// The sole identity of a method for dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodKey {
    pub interface: String,
    pub method: String,
    pub arity: usize,
}

impl MethodKey {
    pub fn new(interface: impl Into<String>, method: impl Into<String>, arity: usize) -> Self {
        Self {
            interface: interface.into(),
            method: method.into(),
            arity,
        }
    }
}

/// Renders as `interface.method(arity`, the literal cache key composition.
impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}({}", self.interface, self.method, self.arity)
    }
}

#[derive(Debug)]
struct MethodInfo {
    interface: String,
    name: String,
    index: usize,
    params: Vec<ParamType>,
}

/// A resolved method. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct MethodHandle(Arc<MethodInfo>);

impl MethodHandle {
    fn new(interface: &str, index: usize, sig: &MethodSignature) -> Self {
        Self(Arc::new(MethodInfo {
            interface: interface.to_string(),
            name: sig.name.clone(),
            index,
            params: sig.params.clone(),
        }))
    }

    pub fn interface(&self) -> &str {
        &self.0.interface
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Position of the method in its interface's declaration order.
    pub fn index(&self) -> usize {
        self.0.index
    }

    pub fn params(&self) -> &[ParamType] {
        &self.0.params
    }

    pub fn arity(&self) -> usize {
        self.0.params.len()
    }

    pub fn key(&self) -> MethodKey {
        MethodKey::new(self.interface(), self.name(), self.arity())
    }

    /// True if both handles come from the same resolution.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

impl PartialEq for MethodHandle {
    fn eq(&self, other: &Self) -> bool {
        Self::ptr_eq(self, other)
            || (self.0.interface == other.0.interface
                && self.0.name == other.0.name
                && self.0.index == other.0.index)
    }
}

impl Eq for MethodHandle {}

/// Memoized signature-to-handle resolution.
#[derive(Debug, Default)]
pub struct MethodResolver {
    cache: DashMap<MethodKey, MethodHandle>,
}

impl MethodResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// The resolver shared by every session in the process.
    pub fn global() -> Arc<MethodResolver> {
        static GLOBAL: OnceLock<Arc<MethodResolver>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(MethodResolver::new())))
    }

    /// Resolves a method by name and parameter count.
    ///
    /// The cache is keyed by the interface's qualified name; interfaces are
    /// assumed immutable for the lifetime of the process.
    pub fn resolve(&self, interface: &RpcInterface, method: &str, arity: usize) -> Result<MethodHandle> {
        let key = MethodKey::new(interface.name(), method, arity);

        if let Some(handle) = self.cache.get(&key).map(|entry| entry.value().clone()) {
            return Ok(handle);
        }

        let handle = interface
            .methods()
            .iter()
            .enumerate()
            .find(|(_, sig)| sig.name == method && sig.arity() == arity)
            .map(|(index, sig)| MethodHandle::new(interface.name(), index, sig))
            .ok_or_else(|| Error::MethodNotFound(key.clone()))?;

        tracing::trace!(signature = %key, "resolved method");

        let cached = self.cache.entry(key).or_insert(handle).value().clone();
        Ok(cached)
    }

    pub fn is_cached(&self, key: &MethodKey) -> bool {
        self.cache.contains_key(key)
    }

    /// Number of cached signatures.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
