//! # Interface Registry
//!
//! An `RpcInterface` declares the callable surface of one RPC contract. Client-bound
//! interfaces describe calls the server queues for the client; server-bound interfaces
//! describe calls the client may make on server-side handlers.
//!
//! ## Invariants
//!
//! - **Arity Discriminates**: Methods are addressed by `(name, parameter count)` only.
//!   Two methods sharing both are rejected when the interface is built, never at
//!   dispatch time.

use std::fmt;
use std::sync::Arc;

use crate::value::ParamType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The qualified interface name was empty.
    EmptyName,
    /// Two methods share a name and parameter count.
    AmbiguousOverload { interface: String, method: String, arity: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyName => write!(f, "interface name must not be empty"),
            Self::AmbiguousOverload { interface, method, arity } => write!(
                f,
                "interface '{}' declares '{}' more than once with {} parameter(s)",
                interface, method, arity
            ),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Which side implements the interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Implemented by the client; the server queues invocations.
    ClientBound,
    /// Implemented by server-side handlers; the client sends invocations.
    ServerBound,
}

/// The type signature of one interface method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSignature {
    pub name: String,
    pub params: Vec<ParamType>,
}

impl MethodSignature {
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

/// A named, immutable RPC contract.
#[derive(Debug, PartialEq, Eq)]
pub struct RpcInterface {
    name: String,
    direction: Direction,
    methods: Vec<MethodSignature>,
}

impl RpcInterface {
    /// Starts describing an interface implemented by the client.
    pub fn client(name: impl Into<String>) -> InterfaceBuilder {
        InterfaceBuilder::new(name.into(), Direction::ClientBound)
    }

    /// Starts describing an interface implemented by server-side handlers.
    pub fn server(name: impl Into<String>) -> InterfaceBuilder {
        InterfaceBuilder::new(name.into(), Direction::ServerBound)
    }

    /// The qualified name, as sent on the wire.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Methods in declaration order.
    pub fn methods(&self) -> &[MethodSignature] {
        &self.methods
    }
}

/// Fluent builder for `RpcInterface`.
pub struct InterfaceBuilder {
    name: String,
    direction: Direction,
    methods: Vec<MethodSignature>,
}

impl InterfaceBuilder {
    fn new(name: String, direction: Direction) -> Self {
        Self {
            name,
            direction,
            methods: Vec::new(),
        }
    }

    pub fn method(mut self, name: impl Into<String>, params: impl IntoIterator<Item = ParamType>) -> Self {
        self.methods.push(MethodSignature {
            name: name.into(),
            params: params.into_iter().collect(),
        });
        self
    }

    /// Validates the declared methods and freezes the interface.
    pub fn build(self) -> Result<Arc<RpcInterface>> {
        if self.name.is_empty() {
            return Err(Error::EmptyName);
        }

        for (i, sig) in self.methods.iter().enumerate() {
            let clash = self.methods[..i]
                .iter()
                .any(|prev| prev.name == sig.name && prev.arity() == sig.arity());
            if clash {
                return Err(Error::AmbiguousOverload {
                    interface: self.name,
                    method: sig.name.clone(),
                    arity: sig.arity(),
                });
            }
        }

        Ok(Arc::new(RpcInterface {
            name: self.name,
            direction: self.direction,
            methods: self.methods,
        }))
    }
}
