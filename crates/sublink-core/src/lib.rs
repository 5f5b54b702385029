//! # sublink-core
//!
//! Transport-independent building blocks for GraphQL subscriptions:
//!
//! - Protocol messages and the JSON text-frame codec
//! - GraphQL request/result envelopes and operation-kind detection
//! - Execution context, data-loader registry and the batched
//!   context-sharing policy (`per-query` / `per-request`)
//! - The query-executor contract the transport drives
//! - The error taxonomy shared by every layer

#![deny(unsafe_code)]

pub mod codec;
pub mod context;
pub mod errors;
pub mod executor;
pub mod ids;
pub mod invocation;
pub mod message;
pub mod request;

pub use context::{ContextSetting, DataLoaderRegistry, ExecutionContext};
pub use errors::{ConfigError, ExecutionError, ProtocolError, TransportError};
pub use executor::{QueryExecutor, ResultStream, execute_batch};
pub use ids::{ConnectionId, ContextId};
pub use invocation::{
    BatchedInvocationInput, ContextPolicy, ContextSupplier, GraphQLInvocationInput, SharedContext,
};
pub use message::{GRAPHQL_WS, MessageType, ProtocolMessage};
pub use request::{ExecutionResult, GraphQLRequest, OperationKind};
