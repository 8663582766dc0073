//! Configuration for pilot
//!
//! Configuration file: `pilot.toml` in the current directory or a parent,
//! falling back to `~/.config/pilot/pilot.toml` (or platform equivalent).
//!
//! ```toml
//! [llm]
//! model = "gpt-5"
//!
//! [agent]
//! max_steps = 30
//! system_prompt = "Tapestry ID: ${FABRIC_USER_TAPESTRY_ID}. Current date and time is {now}."
//!
//! [mcp_servers.search]
//! command = "uvx"
//! args = ["browser-use[cli]", "--mcp"]
//!
//! [mcp_servers.fabric]
//! url = "https://mcp.example.test"
//! headers = { Authorization = "Bearer ${FABRIC_TOKEN}" }
//! ```

use anyhow::{Context, Result};
use pilot_llm::LlmConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::agent::AgentConfig;
use crate::mcp::{expand_env_string, ProviderConfig};

pub const CONFIG_FILE_NAME: &str = "pilot.toml";

/// Environment variable consulted when `llm.api_key` is not set
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PilotConfig {
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    /// Tool providers, keyed by name
    #[serde(default)]
    pub mcp_servers: BTreeMap<String, ProviderConfig>,
}

impl PilotConfig {
    /// Load from `path`, or from the first config file found
    ///
    /// Without any file the defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from(path);
        }

        let cwd = std::env::current_dir().context("Failed to read current directory")?;
        if let Some(found) = find_config_path(&cwd) {
            return Self::load_from(found);
        }

        match global_config_path() {
            Some(global) if global.exists() => Self::load_from(global),
            _ => {
                let mut config = Self::default();
                config.finalize()?;
                Ok(config)
            }
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let mut config: Self =
            toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))?;
        config
            .finalize()
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        Ok(config)
    }

    /// Name providers after their table keys and expand `${VAR}` references.
    ///
    /// Disabled providers are left as written, so they may reference
    /// variables that are not set.
    fn finalize(&mut self) -> Result<()> {
        for (name, provider) in self.mcp_servers.iter_mut() {
            provider.name = name.clone();
            if !provider.enabled {
                continue;
            }
            provider
                .expand_env_vars()
                .with_context(|| format!("MCP server '{}'", name))?;
            provider.transport()?;
        }

        self.llm.api_key = match self.llm.api_key.take() {
            Some(key) => Some(expand_env_string(&key).context("llm.api_key")?),
            None => std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty()),
        };

        if let Some(prompt) = self.agent.system_prompt.take() {
            self.agent.system_prompt =
                Some(expand_env_string(&prompt).context("agent.system_prompt")?);
        }

        Ok(())
    }

    /// Enabled providers in name order
    pub fn enabled_providers(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.mcp_servers.values().filter(|p| p.enabled)
    }
}

/// Find `pilot.toml` by searching `start` and its parents
pub fn find_config_path(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    for _ in 0..10 {
        let candidate = current.join(CONFIG_FILE_NAME);
        if candidate.exists() {
            return Some(candidate);
        }
        if !current.pop() {
            break;
        }
    }

    None
}

/// Per-user configuration file path
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("pilot").join(CONFIG_FILE_NAME))
}
