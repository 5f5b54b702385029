//! Execution context handed to the query executor.
//!
//! A context carries a data-loader registry plus a bag of connection-scoped
//! properties (handshake request, `connection_init` result, anything a resolver
//! chooses to stash). Under [`ContextSetting::PerRequest`] one context is shared by
//! every operation of a batch, so both the loaders and the properties are shared
//! mutable state across those operations.

use std::any::Any;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ConfigError;
use crate::ids::ContextId;

/// How concurrently batched operations obtain their execution context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContextSetting {
    /// Every operation gets a freshly built context.
    PerQuery,
    /// All operations of one request share a single, lazily built context.
    PerRequest,
}

impl ContextSetting {
    /// Config-file spelling.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PerQuery => "per-query",
            Self::PerRequest => "per-request",
        }
    }
}

impl FromStr for ContextSetting {
    type Err = ConfigError;

    /// Accepts `per-query` / `per-request` in any case, with `-` or `_`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "per-query" => Ok(Self::PerQuery),
            "per-request" => Ok(Self::PerRequest),
            _ => Err(ConfigError::UnsupportedContextSetting(s.to_owned())),
        }
    }
}

impl fmt::Display for ContextSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named, type-erased data loaders attached to a context.
#[derive(Default)]
pub struct DataLoaderRegistry {
    loaders: DashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl DataLoaderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a loader under `name`.
    pub fn register<T: Any + Send + Sync>(&self, name: impl Into<String>, loader: Arc<T>) {
        let _ = self.loaders.insert(name.into(), loader);
    }

    /// Fetch a loader by name, if present and of type `T`.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        let entry = self.loaders.get(name)?.value().clone();
        entry.downcast::<T>().ok()
    }

    /// Registered loader names (sorted).
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.loaders.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of registered loaders.
    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    /// Whether no loaders are registered.
    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }
}

/// Property key for the captured WebSocket handshake.
pub const HANDSHAKE_REQUEST_KEY: &str = "handshake_request";
/// Property key for the value returned by the connection listener on `connection_init`.
pub const CONNECT_RESULT_KEY: &str = "connect_result";

/// Per-execution state shared with resolvers.
pub struct ExecutionContext {
    id: ContextId,
    loaders: DataLoaderRegistry,
    properties: DashMap<String, Value>,
}

impl ExecutionContext {
    /// Create an empty context with a fresh id.
    pub fn new() -> Self {
        Self {
            id: ContextId::new(),
            loaders: DataLoaderRegistry::new(),
            properties: DashMap::new(),
        }
    }

    /// Context id (stable for the life of the context).
    pub fn id(&self) -> &ContextId {
        &self.id
    }

    /// Data loaders attached to this context.
    pub fn loaders(&self) -> &DataLoaderRegistry {
        &self.loaders
    }

    /// Read a property.
    pub fn property(&self, key: &str) -> Option<Value> {
        self.properties.get(key).map(|v| v.value().clone())
    }

    /// Set a property, returning the previous value.
    pub fn set_property(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.properties.insert(key.into(), value)
    }

    /// The captured upgrade handshake, if this context belongs to a connection.
    pub fn handshake_request(&self) -> Option<Value> {
        self.property(HANDSHAKE_REQUEST_KEY)
    }

    /// The value produced by the connection listener on `connection_init`.
    pub fn connect_result(&self) -> Option<Value> {
        self.property(CONNECT_RESULT_KEY)
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.id)
            .field("loaders", &self.loaders.names())
            .field("properties", &self.properties.len())
            .finish()
    }
}
