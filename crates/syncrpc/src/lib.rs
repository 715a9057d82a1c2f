//! # SyncRPC
//!
//! The addressing and encoding layer shared by both directions of the sync protocol.
//!
//! ## Architecture
//!
//! - **Interfaces**: `RpcInterface` descriptors declare a callable surface as
//!   `(qualified name, method, parameter types)`. They replace runtime reflection
//!   with a registry built once, at registration time.
//! - **Resolution**: `MethodResolver` maps the `(interface, method, arity)` triple to
//!   a `MethodHandle`. The cache is process-wide and never invalidated.
//! - **Values**: `RpcValue` is the parameter currency; JSON is the wire form.
//! - **Encoding**: `EncodedResult` carries a full encoding, a diff against the
//!   previously sent encoding, or both.
//! - **Wire**: Calls travel as `[target, interface, method, [params]]` arrays.

pub mod encoded;
pub mod interface;
pub mod resolver;
pub mod value;
pub mod wire;

pub use encoded::EncodedResult;
pub use encoded::encode_against;
pub use interface::Direction;
pub use interface::MethodSignature;
pub use interface::RpcInterface;
pub use resolver::MethodHandle;
pub use resolver::MethodKey;
pub use resolver::MethodResolver;
pub use value::ParamType;
pub use value::RpcValue;
pub use wire::InboundCall;
