//! # Inbound Dispatch
//!
//! Routes calls received from the client to the server-side handlers registered on
//! each connector.
//!
//! ## Architecture
//!
//! Dispatch runs in two passes. The first parses the whole batch, looks up every
//! target connector, resolves every method and decodes every parameter. Only if the
//! whole batch is well formed does the second pass invoke handlers, so a protocol
//! violation never leaves a batch half applied.
//!
//! ## Policy
//!
//! - Unknown connector: skipped and logged (the client may still reference a
//!   connector the server already dropped), or an error in strict mode.
//! - Interface not registered on the connector: skipped and logged. Parameters are
//!   not even decoded.
//! - No method for `(interface, name, arity)`: the batch fails. The two sides
//!   disagree on the interface and retrying cannot help.
//! - Disabled connector: skipped unless the interface is allowed when disabled.
//! - Handler error: logged and reported; the rest of the batch still runs.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use keymap::KeyMapper;
use serde_json::Value;
use syncrpc::Direction;
use syncrpc::MethodHandle;
use syncrpc::MethodKey;
use syncrpc::MethodResolver;
use syncrpc::RpcInterface;
use syncrpc::RpcValue;
use syncrpc::resolver;
use syncrpc::value;
use syncrpc::wire;

use crate::config::SessionConfig;

#[derive(Debug)]
pub enum Error {
    /// The interface handed to `register` is not server-bound.
    NotServerBound(String),
    /// The payload does not have the invocation shape.
    Wire(wire::Error),
    /// A call addressed a connector key that is not mapped (strict mode only).
    UnknownConnector { target: String, method: MethodKey },
    /// No method matches the call's interface, name and arity.
    Resolve(resolver::Error),
    /// A parameter does not fit the declared type.
    Decode { method: MethodKey, index: usize, source: value::Error },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotServerBound(name) => write!(f, "Interface '{}' is not server-bound", name),
            Self::Wire(e) => write!(f, "Wire error: {}", e),
            Self::UnknownConnector { target, method } => {
                write!(f, "Call to {} for unknown connector '{}'", method, target)
            }
            Self::Resolve(e) => write!(f, "Resolve error: {}", e),
            Self::Decode { method, index, source } => {
                write!(f, "Cannot decode parameter {} of {}: {}", index, method, source)
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<wire::Error> for Error {
    fn from(e: wire::Error) -> Self {
        Self::Wire(e)
    }
}

impl From<resolver::Error> for Error {
    fn from(e: resolver::Error) -> Self {
        Self::Resolve(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A server-side implementation of a server-bound interface.
pub trait ServerRpc: Send + Sync {
    /// Invokes the resolved method with decoded parameters.
    fn invoke(&self, method: &MethodHandle, params: Vec<RpcValue>) -> anyhow::Result<()>;
}

impl<F> ServerRpc for F
where
    F: Fn(&MethodHandle, Vec<RpcValue>) -> anyhow::Result<()> + Send + Sync,
{
    fn invoke(&self, method: &MethodHandle, params: Vec<RpcValue>) -> anyhow::Result<()> {
        self(method, params)
    }
}

struct Registration {
    interface: Arc<RpcInterface>,
    handler: Arc<dyn ServerRpc>,
}

/// The server-bound interfaces a connector implements, by qualified name.
#[derive(Default)]
pub struct RpcRegistry {
    entries: HashMap<String, Registration>,
}

impl RpcRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler. A later registration for the same interface replaces
    /// the earlier one.
    pub fn register(&mut self, interface: Arc<RpcInterface>, handler: impl ServerRpc + 'static) -> Result<()> {
        if interface.direction() != Direction::ServerBound {
            return Err(Error::NotServerBound(interface.name().to_string()));
        }

        let name = interface.name().to_string();
        self.entries.insert(name, Registration {
            interface,
            handler: Arc::new(handler),
        });
        Ok(())
    }

    pub fn interface(&self, name: &str) -> Option<&Arc<RpcInterface>> {
        self.entries.get(name).map(|r| &r.interface)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }
}

impl fmt::Debug for RpcRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

/// A server-side object with a client-side counterpart.
pub trait Connector: Send + Sync {
    /// Handlers for calls the client may make on this connector.
    fn rpc(&self) -> &RpcRegistry;

    /// Disabled connectors ignore inbound calls.
    fn is_enabled(&self) -> bool {
        true
    }
}

pub type ConnectorRef = Arc<dyn Connector>;

/// Connectors are mapped by object identity.
pub(crate) fn connector_identity(connector: &ConnectorRef) -> usize {
    Arc::as_ptr(connector) as *const () as usize
}

/// A handler failure that did not stop the batch.
#[derive(Debug)]
pub struct HandlerFailure {
    pub target: String,
    pub method: MethodKey,
    pub error: anyhow::Error,
}

/// What happened to each call of a dispatched batch.
#[derive(Debug, Default)]
pub struct DispatchReport {
    pub delivered: usize,
    pub unknown_connector: usize,
    pub unregistered: usize,
    pub disabled: usize,
    pub failures: Vec<HandlerFailure>,
}

impl DispatchReport {
    /// True if every call reached its handler and succeeded.
    pub fn is_clean(&self) -> bool {
        self.unknown_connector == 0 && self.unregistered == 0 && self.disabled == 0 && self.failures.is_empty()
    }
}

/// A call that passed the first pass.
struct Prepared {
    target: String,
    handler: Arc<dyn ServerRpc>,
    enabled: bool,
    method: MethodHandle,
    params: Vec<RpcValue>,
}

/// Routes inbound batches for one session.
pub struct Dispatcher<'a> {
    pub(crate) connectors: &'a KeyMapper<ConnectorRef, usize>,
    pub(crate) resolver: &'a MethodResolver,
    pub(crate) config: &'a SessionConfig,
}

impl Dispatcher<'_> {
    pub fn dispatch(&self, payload: &Value) -> Result<DispatchReport> {
        let calls = wire::parse_batch(payload)?;
        let mut report = DispatchReport::default();

        let mut prepared = Vec::with_capacity(calls.len());
        for call in calls {
            let method_key = MethodKey::new(call.interface.as_str(), call.method.as_str(), call.arity());

            let Some(connector) = self.connectors.get(&call.target) else {
                if self.config.strict_unknown_connectors() {
                    return Err(Error::UnknownConnector { target: call.target, method: method_key });
                }
                tracing::debug!(connector = %call.target, method = %method_key, "call for unknown connector");
                report.unknown_connector += 1;
                continue;
            };

            let Some(registration) = connector.rpc().entries.get(&call.interface) else {
                tracing::warn!(
                    connector = %call.target,
                    method = %method_key,
                    "ignoring call: no implementation registered for interface"
                );
                report.unregistered += 1;
                continue;
            };

            let method = self.resolver.resolve(&registration.interface, &call.method, call.arity())?;
            let params = call
                .params
                .iter()
                .zip(method.params())
                .enumerate()
                .map(|(index, (json, ty))| {
                    RpcValue::from_json(ty, json).map_err(|source| Error::Decode {
                        method: method_key.clone(),
                        index,
                        source,
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            prepared.push(Prepared {
                target: call.target,
                handler: Arc::clone(&registration.handler),
                enabled: connector.is_enabled(),
                method,
                params,
            });
        }

        for call in prepared {
            if !call.enabled && !self.config.allows_when_disabled(call.method.interface()) {
                tracing::warn!(connector = %call.target, method = %call.method.key(), "ignoring call to disabled connector");
                report.disabled += 1;
                continue;
            }

            match call.handler.invoke(&call.method, call.params) {
                Ok(()) => report.delivered += 1,
                Err(error) => {
                    tracing::error!(connector = %call.target, method = %call.method.key(), "handler failed: {:#}", error);
                    report.failures.push(HandlerFailure {
                        target: call.target,
                        method: call.method.key(),
                        error,
                    });
                }
            }
        }

        Ok(report)
    }
}
