//! Invocation inputs and the batched context-sharing policy.

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::context::{ContextSetting, ExecutionContext};
use crate::errors::ConfigError;
use crate::request::GraphQLRequest;

/// Builds a fresh execution context on demand.
pub type ContextSupplier = Arc<dyn Fn() -> ExecutionContext + Send + Sync>;

/// A context computed at most once and then handed to every consumer.
#[derive(Clone)]
pub struct SharedContext {
    cell: Arc<OnceLock<Arc<ExecutionContext>>>,
    supplier: ContextSupplier,
}

impl SharedContext {
    /// Wrap a supplier; nothing is built until the first [`SharedContext::get`].
    pub fn new(supplier: ContextSupplier) -> Self {
        Self {
            cell: Arc::new(OnceLock::new()),
            supplier,
        }
    }

    /// Return the context, building it on first use.
    ///
    /// Concurrent first callers block until the single initializer finishes, so
    /// the supplier never runs twice.
    pub fn get(&self) -> Arc<ExecutionContext> {
        self.cell
            .get_or_init(|| Arc::new((self.supplier)()))
            .clone()
    }

    /// Whether the context has been built yet.
    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }
}

#[derive(Clone)]
enum ContextSource {
    Owned(Arc<ExecutionContext>),
    Shared(SharedContext),
}

/// Everything the executor needs to run one operation.
#[derive(Clone)]
pub struct GraphQLInvocationInput {
    request: GraphQLRequest,
    context: ContextSource,
    root: Option<Arc<Value>>,
}

impl GraphQLInvocationInput {
    /// An input owning its own context.
    pub fn new(request: GraphQLRequest, context: Arc<ExecutionContext>) -> Self {
        Self {
            request,
            context: ContextSource::Owned(context),
            root: None,
        }
    }

    /// An input whose context is shared with its batch siblings.
    pub fn shared(request: GraphQLRequest, context: SharedContext) -> Self {
        Self {
            request,
            context: ContextSource::Shared(context),
            root: None,
        }
    }

    /// Attach the root value resolvers start from.
    #[must_use]
    pub fn with_root(mut self, root: Option<Arc<Value>>) -> Self {
        self.root = root;
        self
    }

    /// The request being executed.
    pub fn request(&self) -> &GraphQLRequest {
        &self.request
    }

    /// The execution context (built on first access for shared inputs).
    pub fn context(&self) -> Arc<ExecutionContext> {
        match &self.context {
            ContextSource::Owned(ctx) => ctx.clone(),
            ContextSource::Shared(shared) => shared.get(),
        }
    }

    /// The root value, if any.
    pub fn root(&self) -> Option<&Arc<Value>> {
        self.root.as_ref()
    }
}

/// Hands out invocation inputs under one context-sharing mode.
///
/// `per-query` builds a fresh context for every input. `per-request` hands
/// every input the same lazily built context until [`ContextPolicy::reset`]
/// starts a new one.
pub struct ContextPolicy {
    setting: ContextSetting,
    supplier: ContextSupplier,
    shared: Mutex<SharedContext>,
}

impl ContextPolicy {
    /// Create a policy; no context is built yet.
    pub fn new(setting: ContextSetting, supplier: ContextSupplier) -> Self {
        Self {
            setting,
            shared: Mutex::new(SharedContext::new(supplier.clone())),
            supplier,
        }
    }

    /// The mode inputs are built with.
    pub fn setting(&self) -> ContextSetting {
        self.setting
    }

    /// Build the input for one request.
    pub fn input(&self, request: GraphQLRequest, root: Option<Arc<Value>>) -> GraphQLInvocationInput {
        let input = match self.setting {
            ContextSetting::PerQuery => {
                GraphQLInvocationInput::new(request, Arc::new((self.supplier)()))
            }
            ContextSetting::PerRequest => {
                GraphQLInvocationInput::shared(request, self.shared.lock().clone())
            }
        };
        input.with_root(root)
    }

    /// Replace the shared context so later inputs see a freshly built one.
    ///
    /// Inputs already handed out keep the context they were given. Returns
    /// whether a built context was discarded.
    pub fn reset(&self) -> bool {
        let mut shared = self.shared.lock();
        let discarded = shared.is_initialized();
        *shared = SharedContext::new(self.supplier.clone());
        discarded
    }
}

/// An ordered batch of requests against one schema and one root value.
pub struct BatchedInvocationInput {
    setting: ContextSetting,
    inputs: Vec<GraphQLInvocationInput>,
}

impl BatchedInvocationInput {
    /// Build a batch under the configured context-sharing mode.
    ///
    /// Fails immediately with [`ConfigError::ContextSettingNotConfigured`] when no
    /// mode was selected, so a misconfiguration never reaches execution.
    pub fn new(
        requests: Vec<GraphQLRequest>,
        supplier: &ContextSupplier,
        root: Option<Arc<Value>>,
        setting: Option<ContextSetting>,
    ) -> Result<Self, ConfigError> {
        let setting = setting.ok_or(ConfigError::ContextSettingNotConfigured)?;
        Ok(Self::build(setting, requests, supplier, root))
    }

    /// Build a batch from a mode name as it appears in configuration.
    pub fn from_setting_name(
        requests: Vec<GraphQLRequest>,
        supplier: &ContextSupplier,
        root: Option<Arc<Value>>,
        setting: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let setting = setting.map(str::parse::<ContextSetting>).transpose()?;
        Self::new(requests, supplier, root, setting)
    }

    /// Each request gets its own freshly built context.
    pub fn per_query(
        requests: Vec<GraphQLRequest>,
        supplier: &ContextSupplier,
        root: Option<Arc<Value>>,
    ) -> Self {
        Self::build(ContextSetting::PerQuery, requests, supplier, root)
    }

    /// All requests share one context, built lazily by the first consumer.
    pub fn per_request(
        requests: Vec<GraphQLRequest>,
        supplier: &ContextSupplier,
        root: Option<Arc<Value>>,
    ) -> Self {
        Self::build(ContextSetting::PerRequest, requests, supplier, root)
    }

    fn build(
        setting: ContextSetting,
        requests: Vec<GraphQLRequest>,
        supplier: &ContextSupplier,
        root: Option<Arc<Value>>,
    ) -> Self {
        let policy = ContextPolicy::new(setting, supplier.clone());
        let inputs = requests
            .into_iter()
            .map(|request| policy.input(request, root.clone()))
            .collect::<Vec<_>>();
        debug!(count = inputs.len(), %setting, "built batch");
        Self { setting, inputs }
    }

    /// The mode this batch was built with.
    pub fn setting(&self) -> ContextSetting {
        self.setting
    }

    /// The individual invocation inputs, in request order.
    pub fn inputs(&self) -> &[GraphQLInvocationInput] {
        &self.inputs
    }

    /// Consume the batch.
    pub fn into_inputs(self) -> Vec<GraphQLInvocationInput> {
        self.inputs
    }

    /// Number of requests.
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}
