//! Tool call middleware
//!
//! Every dispatched tool call passes through an ordered list of
//! [`ToolMiddleware`] layers before reaching the provider. Layers nest like an
//! onion: for `[A, B]` the order is A-before, B-before, dispatch, B-after,
//! A-after.
//!
//! ```rust,ignore
//! struct Audit;
//!
//! #[async_trait]
//! impl ToolMiddleware for Audit {
//!     async fn on_call_tool(&self, ctx: &mut MiddlewareContext, next: Next<'_>) -> ToolOutcome {
//!         tracing::info!(tool = %ctx.request.name, "audit");
//!         next.run(ctx).await
//!     }
//! }
//! ```

pub mod builtin;

pub use builtin::{CallToolLogMiddleware, DenyToolsMiddleware, TimingMiddleware};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ToolError;
use crate::tools::{ToolCallRequest, ToolCallResult};

/// What a layer, or the provider, hands back for one call
pub type ToolOutcome = Result<ToolCallResult, ToolError>;

/// In-flight state for one dispatch
#[derive(Debug, Clone)]
pub struct MiddlewareContext {
    /// The call as it will be sent; layers may rewrite it
    pub request: ToolCallRequest,
    /// Provider the tool resolved to
    pub provider: String,
    pub started_at: Instant,
    /// Free-form values layers leave for each other
    pub annotations: HashMap<String, Value>,
}

impl MiddlewareContext {
    pub fn new(request: ToolCallRequest, provider: impl Into<String>) -> Self {
        Self {
            request,
            provider: provider.into(),
            started_at: Instant::now(),
            annotations: HashMap::new(),
        }
    }

    pub fn annotate(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.annotations.insert(key.into(), value.into());
    }
}

/// One layer around tool dispatch
#[async_trait]
pub trait ToolMiddleware: Send + Sync {
    /// Handle a call; invoke `next.run(ctx)` to continue down the chain, or
    /// return without it to short-circuit
    async fn on_call_tool(&self, ctx: &mut MiddlewareContext, next: Next<'_>) -> ToolOutcome;
}

/// The innermost action of a chain
#[async_trait]
pub trait ToolEndpoint: Send + Sync {
    async fn call(&self, ctx: &MiddlewareContext) -> ToolOutcome;
}

/// The remainder of the chain from some layer inwards
pub struct Next<'a> {
    middleware: &'a [Arc<dyn ToolMiddleware>],
    endpoint: &'a dyn ToolEndpoint,
}

impl<'a> Next<'a> {
    pub fn new(middleware: &'a [Arc<dyn ToolMiddleware>], endpoint: &'a dyn ToolEndpoint) -> Self {
        Self { middleware, endpoint }
    }

    /// Run the next layer, or the endpoint once the layers are used up
    pub async fn run(self, ctx: &mut MiddlewareContext) -> ToolOutcome {
        match self.middleware.split_first() {
            Some((head, rest)) => {
                let next = Next {
                    middleware: rest,
                    endpoint: self.endpoint,
                };
                head.on_call_tool(ctx, next).await
            }
            None => self.endpoint.call(ctx).await,
        }
    }
}

/// Ordered list of layers, outermost first
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    layers: Vec<Arc<dyn ToolMiddleware>>,
}

impl MiddlewareChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, layer: impl ToolMiddleware + 'static) {
        self.layers.push(Arc::new(layer));
    }

    pub fn with(mut self, layer: impl ToolMiddleware + 'static) -> Self {
        self.push(layer);
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Run the call through every layer and finally `endpoint`
    pub async fn run(&self, ctx: &mut MiddlewareContext, endpoint: &dyn ToolEndpoint) -> ToolOutcome {
        Next::new(&self.layers, endpoint).run(ctx).await
    }
}

impl std::fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareChain")
            .field("layers", &self.layers.len())
            .finish()
    }
}
