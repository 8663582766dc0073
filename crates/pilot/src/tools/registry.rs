//! Tool provider registry
//!
//! Holds every connected provider together with the tools it advertised at
//! start-up, and resolves tool names to exactly one owner.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{ProviderSession, Tool};
use crate::error::ToolError;
use crate::mcp::{McpClient, ProviderConfig};

/// Default bound on a single tool call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// A connected provider and the tools it exposes
pub struct ToolProvider {
    pub name: String,
    /// How the provider is reached, for display
    pub descriptor: String,
    pub tools: Vec<Tool>,
    /// Bound applied to each call on this provider
    pub call_timeout: Duration,
    session: Arc<dyn ProviderSession>,
}

impl ToolProvider {
    pub fn session(&self) -> &Arc<dyn ProviderSession> {
        &self.session
    }

    fn has_tool(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|t| t.name == name)
    }
}

impl std::fmt::Debug for ToolProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolProvider")
            .field("name", &self.name)
            .field("descriptor", &self.descriptor)
            .field("tools", &self.tools.iter().map(|t| &t.name).collect::<Vec<_>>())
            .finish()
    }
}

/// Registry of connected tool providers
pub struct ToolRegistry {
    providers: Vec<Arc<ToolProvider>>,
    disallowed: HashSet<String>,
    default_call_timeout: Duration,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            disallowed: HashSet::new(),
            default_call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Hide these tools from the model and refuse to resolve them
    pub fn with_disallowed<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disallowed.extend(names.into_iter().map(Into::into));
        self
    }

    /// Call timeout for providers that do not set their own
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.default_call_timeout = timeout;
        self
    }

    /// Start a provider from its configuration and discover its tools
    ///
    /// Connection, initialization and discovery share the provider's
    /// `timeout_secs` budget.
    pub async fn register(&mut self, config: &ProviderConfig) -> Result<Arc<ToolProvider>, ToolError> {
        self.ensure_unique(&config.name)?;

        let unavailable = |reason: String| ToolError::ProviderUnavailable {
            provider: config.name.clone(),
            reason,
        };

        let descriptor = config.transport().map_err(|e| unavailable(e.to_string()))?;
        info!(provider = %config.name, transport = %descriptor, "Starting tool provider");

        let timeout = config.timeout();
        let started = tokio::time::Instant::now();
        let client = tokio::time::timeout(timeout, McpClient::connect(config))
            .await
            .map_err(|_| unavailable(format!("no response within {}s", config.timeout_secs)))?
            .map_err(|e| unavailable(e.to_string()))?;

        let remaining = timeout.saturating_sub(started.elapsed());
        let call_timeout = config
            .call_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_call_timeout);

        self.add_session(
            &config.name,
            descriptor.to_string(),
            Arc::new(client),
            remaining,
            call_timeout,
        )
        .await
    }

    /// Register an already-connected session
    pub async fn register_session(
        &mut self,
        name: &str,
        session: Arc<dyn ProviderSession>,
        discovery_timeout: Duration,
    ) -> Result<Arc<ToolProvider>, ToolError> {
        self.ensure_unique(name)?;
        let call_timeout = self.default_call_timeout;
        self.add_session(name, "in-process".to_string(), session, discovery_timeout, call_timeout)
            .await
    }

    /// Register every enabled provider, stopping at the first failure
    ///
    /// Providers are started in the iteration order of `configs`.
    pub async fn register_all<'a, I>(&mut self, configs: I) -> Result<(), ToolError>
    where
        I: IntoIterator<Item = &'a ProviderConfig>,
    {
        for config in configs {
            if !config.enabled {
                debug!(provider = %config.name, "Skipping disabled provider");
                continue;
            }
            self.register(config).await?;
        }
        Ok(())
    }

    fn ensure_unique(&self, name: &str) -> Result<(), ToolError> {
        if self.providers.iter().any(|p| p.name == name) {
            return Err(ToolError::ProviderUnavailable {
                provider: name.to_string(),
                reason: "a provider with this name is already registered".to_string(),
            });
        }
        Ok(())
    }

    async fn add_session(
        &mut self,
        name: &str,
        descriptor: String,
        session: Arc<dyn ProviderSession>,
        discovery_timeout: Duration,
        call_timeout: Duration,
    ) -> Result<Arc<ToolProvider>, ToolError> {
        let discovered = match tokio::time::timeout(discovery_timeout, session.list_tools()).await {
            Ok(Ok(tools)) => tools,
            Ok(Err(e)) => {
                let _ = session.close().await;
                return Err(ToolError::ProviderUnavailable {
                    provider: name.to_string(),
                    reason: format!("tool discovery failed: {}", e),
                });
            }
            Err(_) => {
                let _ = session.close().await;
                return Err(ToolError::ProviderUnavailable {
                    provider: name.to_string(),
                    reason: format!(
                        "tool discovery timed out after {}s",
                        discovery_timeout.as_secs_f32()
                    ),
                });
            }
        };

        let tools: Vec<Tool> = discovered
            .into_iter()
            .map(|info| Tool::from_info(name, info))
            .collect();

        info!(provider = %name, tools = tools.len(), "Registered tool provider");

        let provider = Arc::new(ToolProvider {
            name: name.to_string(),
            descriptor,
            tools,
            call_timeout,
            session,
        });
        self.providers.push(Arc::clone(&provider));
        Ok(provider)
    }

    /// Find the single provider exposing `tool_name`
    pub fn resolve(&self, tool_name: &str) -> Result<(Arc<ToolProvider>, Tool), ToolError> {
        if self.disallowed.contains(tool_name) {
            return Err(ToolError::ToolNotFound(tool_name.to_string()));
        }

        let mut matches = self
            .providers
            .iter()
            .filter_map(|p| p.has_tool(tool_name).map(|t| (p, t)));

        match (matches.next(), matches.next()) {
            (None, _) => Err(ToolError::ToolNotFound(tool_name.to_string())),
            (Some((provider, tool)), None) => Ok((Arc::clone(provider), tool.clone())),
            (Some(_), Some(_)) => Err(ToolError::AmbiguousTool {
                tool: tool_name.to_string(),
                providers: self
                    .providers
                    .iter()
                    .filter(|p| p.has_tool(tool_name).is_some())
                    .map(|p| p.name.clone())
                    .collect(),
            }),
        }
    }

    /// Every tool the model may call, in registration then discovery order
    pub fn list_tools(&self) -> Vec<Tool> {
        self.providers
            .iter()
            .flat_map(|p| p.tools.iter())
            .filter(|t| !self.disallowed.contains(&t.name))
            .cloned()
            .collect()
    }

    pub fn providers(&self) -> &[Arc<ToolProvider>] {
        &self.providers
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Close every provider session
    pub async fn shutdown(&self) {
        for provider in &self.providers {
            if let Err(e) = provider.session.close().await {
                warn!(provider = %provider.name, "Failed to close provider: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("providers", &self.providers)
            .field("disallowed", &self.disallowed)
            .finish()
    }
}
