//! Tool dispatcher - routes tool calls through middleware to their provider

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use super::{ToolCallRequest, ToolProvider, ToolRegistry};
use crate::error::ToolError;
use crate::middleware::{MiddlewareChain, MiddlewareContext, ToolEndpoint, ToolOutcome};

/// Terminal layer: forwards the call to the resolved provider
struct ProviderEndpoint {
    provider: Arc<ToolProvider>,
}

#[async_trait]
impl ToolEndpoint for ProviderEndpoint {
    async fn call(&self, ctx: &MiddlewareContext) -> ToolOutcome {
        let provider = &self.provider;
        let tool = &ctx.request.name;
        let timeout = provider.call_timeout;

        let call = provider.session().call_tool(tool, &ctx.request.arguments);
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => {
                warn!(provider = %provider.name, tool = %tool, "Tool call failed: {}", e);
                Err(ToolError::ProviderCallFailed {
                    provider: provider.name.clone(),
                    tool: tool.clone(),
                    message: e.to_string(),
                    code: e.code(),
                    data: e.data().cloned(),
                })
            }
            Err(_) => {
                warn!(provider = %provider.name, tool = %tool, "Tool call timed out");
                Err(ToolError::ProviderCallFailed {
                    provider: provider.name.clone(),
                    tool: tool.clone(),
                    message: format!("timed out after {}s", timeout.as_secs_f32()),
                    code: None,
                    data: None,
                })
            }
        }
    }
}

/// Routes tool calls to providers through the middleware chain
#[derive(Debug, Clone)]
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    chain: MiddlewareChain,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>, chain: MiddlewareChain) -> Self {
        Self { registry, chain }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Dispatch one call
    ///
    /// Unknown and ambiguous names fail before any provider traffic. No retries.
    #[instrument(skip(self, request), fields(tool = %request.name, step = request.step))]
    pub async fn dispatch(&self, request: ToolCallRequest) -> ToolOutcome {
        let (provider, _tool) = self.registry.resolve(&request.name)?;
        debug!(provider = %provider.name, "Resolved tool");

        let mut ctx = MiddlewareContext::new(request, provider.name.clone());
        let endpoint = ProviderEndpoint { provider };
        self.chain.run(&mut ctx, &endpoint).await
    }
}
