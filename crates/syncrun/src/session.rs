//! # Session
//!
//! One client's view of the server: the connectors it can address, the calls
//! waiting to be sent to it, and the state it was last sent.
//!
//! ## Architecture
//!
//! - `KeyMapper` names connectors with short keys. Connectors are compared by object
//!   identity, so two equal-looking connectors still get distinct keys.
//! - `PendingQueue` collects client-bound calls between flushes.
//! - `Dispatcher` routes inbound batches to each connector's `RpcRegistry`.
//! - `DiffTracker` remembers the last state sent per connector.
//!
//! Removing a connector (`detach` or `prune`) discards its queued calls and its
//! diff state together with its key.

use std::fmt;
use std::sync::Arc;

use keymap::KeyMapper;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use syncrpc::Direction;
use syncrpc::EncodedResult;
use syncrpc::RpcInterface;
use syncrpc::RpcValue;
use syncrpc::resolver;

use crate::config::SessionBuilder;
use crate::config::SessionConfig;
use crate::diff::DiffTracker;
use crate::dispatch;
use crate::dispatch::ConnectorRef;
use crate::dispatch::DispatchReport;
use crate::dispatch::Dispatcher;
use crate::dispatch::connector_identity;
use crate::invocation::InvocationRecord;
use crate::persist;
use crate::persist::QueueSnapshot;
use crate::queue;
use crate::queue::PendingQueue;

#[derive(Debug)]
pub enum Error {
    /// A client call was made through an interface that is not client-bound.
    WrongDirection(String),
    Resolve(resolver::Error),
    Queue(queue::Error),
    Dispatch(dispatch::Error),
    Persist(persist::Error),
    /// A restored snapshot references a connector the caller could not supply.
    MissingConnector(String),
    /// A restored key and its connector disagree with the session's current mapping.
    ConnectorConflict(String),
    /// A queue can only be restored into a session with nothing queued.
    PendingCalls(usize),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongDirection(name) => write!(f, "Interface '{}' is not client-bound", name),
            Self::Resolve(e) => write!(f, "Resolve error: {}", e),
            Self::Queue(e) => write!(f, "Queue error: {}", e),
            Self::Dispatch(e) => write!(f, "Dispatch error: {}", e),
            Self::Persist(e) => write!(f, "Persist error: {}", e),
            Self::MissingConnector(key) => write!(f, "No connector for restored key '{}'", key),
            Self::ConnectorConflict(key) => write!(f, "Restored key '{}' conflicts with the current mapping", key),
            Self::PendingCalls(n) => write!(f, "Cannot restore over {} queued call(s)", n),
        }
    }
}

impl std::error::Error for Error {}

impl From<resolver::Error> for Error {
    fn from(e: resolver::Error) -> Self {
        Self::Resolve(e)
    }
}

impl From<queue::Error> for Error {
    fn from(e: queue::Error) -> Self {
        Self::Queue(e)
    }
}

impl From<dispatch::Error> for Error {
    fn from(e: dispatch::Error) -> Self {
        Self::Dispatch(e)
    }
}

impl From<persist::Error> for Error {
    fn from(e: persist::Error) -> Self {
        Self::Persist(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Persisted form of a session's queue and the connector keys it addresses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub connectors: Vec<String>,
    pub queue: QueueSnapshot,
}

pub struct Session {
    config: SessionConfig,
    connectors: KeyMapper<ConnectorRef, usize>,
    queue: PendingQueue,
    diffs: DiffTracker,
}

impl Session {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    pub fn new(config: SessionConfig) -> Self {
        let queue = PendingQueue::new(config.sequencer().clone());
        Self {
            config,
            connectors: KeyMapper::with_identity(Arc::new(connector_identity)),
            queue,
            diffs: DiffTracker::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns the connector's key, allocating one on first use.
    pub fn attach(&mut self, connector: &ConnectorRef) -> String {
        self.connectors.key_of(connector)
    }

    /// The key of an attached connector.
    pub fn key_of(&self, connector: &ConnectorRef) -> Option<&str> {
        self.connectors.lookup(connector)
    }

    pub fn connector(&self, key: &str) -> Option<&ConnectorRef> {
        self.connectors.get(key)
    }

    pub fn connector_count(&self) -> usize {
        self.connectors.len()
    }

    /// Unmaps a connector and drops everything queued for it.
    pub fn detach(&mut self, connector: &ConnectorRef) {
        let Some(key) = self.connectors.lookup(connector).map(str::to_string) else {
            return;
        };

        self.connectors.remove(connector);
        let dropped = self.queue.discard(&key);
        self.diffs.forget(&key);
        tracing::debug!(connector = %key, dropped, "detached connector");
    }

    /// Keeps exactly the `live` connectors. Returns how many were unmapped.
    pub fn prune<I>(&mut self, live: I) -> usize
    where
        I: IntoIterator<Item = ConnectorRef>,
    {
        let pruned = self.connectors.merge(live);
        if pruned > 0 {
            let connectors = &self.connectors;
            let dropped = self.queue.retain_targets(|key| connectors.contains_key(key));
            self.diffs.retain_targets(|key| connectors.contains_key(key));
            tracing::debug!(pruned, dropped, "pruned connectors");
        }
        pruned
    }

    /// Queues a client-bound call and returns its sequence number.
    ///
    /// The target is attached if it was not already.
    pub fn call_client(
        &mut self,
        target: &ConnectorRef,
        interface: &RpcInterface,
        method: &str,
        params: Vec<RpcValue>,
    ) -> Result<u64> {
        if interface.direction() != Direction::ClientBound {
            return Err(Error::WrongDirection(interface.name().to_string()));
        }

        let handle = self.config.resolver().resolve(interface, method, params.len())?;
        let key = self.connectors.key_of(target);
        Ok(self.queue.enqueue(&key, &handle, params)?.seq())
    }

    /// The calls waiting for one connector, in order.
    pub fn pending(&self, target: &ConnectorRef) -> &[InvocationRecord] {
        match self.connectors.lookup(target) {
            Some(key) => self.queue.pending_for(key),
            None => &[],
        }
    }

    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    /// Drains every queued call, encoded in the order the calls were made.
    pub fn flush(&mut self) -> Value {
        let calls: Vec<Value> = self.queue.drain().iter().map(InvocationRecord::to_wire).collect();
        if !calls.is_empty() {
            tracing::debug!(calls = calls.len(), "flushed client calls");
        }
        Value::Array(calls)
    }

    /// Dispatches a batch of calls received from the client.
    pub fn handle_rpc(&mut self, payload: &Value) -> Result<DispatchReport> {
        let dispatcher = Dispatcher {
            connectors: &self.connectors,
            resolver: self.config.resolver(),
            config: &self.config,
        };
        let report = dispatcher.dispatch(payload)?;
        tracing::trace!(
            delivered = report.delivered,
            skipped = report.unknown_connector + report.unregistered + report.disabled,
            failed = report.failures.len(),
            "handled client calls"
        );
        Ok(report)
    }

    /// Encodes a connector's state against what it was last sent.
    pub fn encode_state(&mut self, target: &ConnectorRef, state: Value) -> EncodedResult {
        let key = self.connectors.key_of(target);
        self.diffs.encode(&key, state)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let mut connectors: Vec<String> = self.connectors.keys().map(str::to_string).collect();
        connectors.sort_by_key(|key| key.parse::<u64>().unwrap_or(u64::MAX));

        SessionSnapshot {
            connectors,
            queue: self.queue.snapshot(),
        }
    }

    /// Serializes the connector keys and the queued calls.
    ///
    /// Diff state is not included; a restored session sends full state first.
    pub fn snapshot_queue(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.snapshot()).map_err(persist::Error::from)?)
    }

    /// Restores a persisted queue into a session with nothing queued.
    ///
    /// `lookup` supplies the live connector for each persisted key. The restore
    /// fails and leaves the session unchanged if calls are already queued, if a key
    /// cannot be supplied, if a key mapped here names a different connector, or if
    /// a supplied connector is already mapped under another key.
    pub fn restore_queue<F>(&mut self, bytes: &[u8], mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<ConnectorRef>,
    {
        if !self.queue.is_empty() {
            return Err(Error::PendingCalls(self.queue.len()));
        }

        let snapshot: SessionSnapshot = serde_json::from_slice(bytes).map_err(persist::Error::from)?;

        let mut adopted: Vec<(String, ConnectorRef)> = Vec::new();
        for key in &snapshot.connectors {
            let connector = lookup(key).ok_or_else(|| Error::MissingConnector(key.clone()))?;
            if let Some(mapped) = self.connectors.get(key) {
                if !Arc::ptr_eq(mapped, &connector) {
                    return Err(Error::ConnectorConflict(key.clone()));
                }
                continue;
            }
            let taken = self.connectors.lookup(&connector).is_some()
                || adopted.iter().any(|(_, c)| Arc::ptr_eq(c, &connector));
            if taken {
                return Err(Error::ConnectorConflict(key.clone()));
            }
            adopted.push((key.clone(), connector));
        }

        let queue = PendingQueue::restore(snapshot.queue, self.config.sequencer().clone())?;
        if let Some(key) = queue.targets().find(|key| {
            !self.connectors.contains_key(key) && !adopted.iter().any(|(k, _)| k == key)
        }) {
            return Err(Error::MissingConnector(key.to_string()));
        }

        for (key, connector) in adopted {
            self.connectors.adopt(&key, connector);
        }

        self.queue = queue;
        self.diffs.clear();
        tracing::debug!(connectors = self.connectors.len(), pending = self.queue.len(), "restored session");
        Ok(())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("connectors", &self.connectors)
            .field("pending", &self.queue.len())
            .field("diffs", &self.diffs.len())
            .finish()
    }
}
