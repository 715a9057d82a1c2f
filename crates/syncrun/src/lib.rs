//! # SyncRun
//!
//! Per-session machinery of the sync protocol: connector keys, the ordered queue of
//! client-bound invocations, inbound dispatch to server-side handlers, state diffs,
//! and persistence of queued invocations across a session restore.
//!
//! ## Concurrency
//!
//! A `Session` is not internally synchronized. The request layer holds an exclusive
//! per-session lock around every mutation, so within one session access is
//! single-threaded. The method resolver is the only piece shared between sessions.

pub mod config;
pub mod diff;
pub mod dispatch;
pub mod invocation;
pub mod persist;
pub mod queue;
pub mod sequence;
pub mod session;

pub use config::SessionBuilder;
pub use config::SessionConfig;
pub use diff::DiffTracker;
pub use dispatch::Connector;
pub use dispatch::ConnectorRef;
pub use dispatch::DispatchReport;
pub use dispatch::HandlerFailure;
pub use dispatch::RpcRegistry;
pub use dispatch::ServerRpc;
pub use invocation::InvocationRecord;
pub use queue::PendingQueue;
pub use sequence::Sequencer;
pub use session::Session;
pub use session::SessionSnapshot;

#[cfg(test)]
mod tests;
