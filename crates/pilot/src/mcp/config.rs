//! Tool provider (MCP server) configuration
//!
//! A provider is reached either by spawning a command that speaks MCP over
//! stdio, or by POSTing to an HTTP endpoint.

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

static ENV_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{([^}]+)\}").expect("valid regex"));

/// Configuration for one tool provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider name; filled from the `[mcp_servers.<name>]` key when loaded
    #[serde(default)]
    pub name: String,
    /// Command to run the server (stdio transport)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Arguments to pass to the command
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables for the command (supports ${VAR} expansion)
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Working directory for the command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    /// Endpoint URL (HTTP transport)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Extra HTTP headers, typically credentials (supports ${VAR} expansion)
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Timeout for start-up and tool discovery, in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Per-call timeout override, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_timeout_secs: Option<u64>,
    /// Disabled providers are skipped at start-up
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_timeout() -> u64 {
    30
}

fn default_enabled() -> bool {
    true
}

/// How a provider is reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportDescriptor {
    Stdio { command: String, args: Vec<String> },
    Http { url: String },
}

impl std::fmt::Display for TransportDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportDescriptor::Stdio { command, args } if args.is_empty() => {
                write!(f, "stdio: {}", command)
            }
            TransportDescriptor::Stdio { command, args } => {
                write!(f, "stdio: {} {}", command, args.join(" "))
            }
            TransportDescriptor::Http { url } => write!(f, "http: {}", url),
        }
    }
}

impl ProviderConfig {
    fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
            url: None,
            headers: BTreeMap::new(),
            timeout_secs: default_timeout(),
            call_timeout_secs: None,
            enabled: true,
        }
    }

    /// Provider launched as a child process speaking MCP over stdio
    pub fn stdio(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            ..Self::empty(name)
        }
    }

    /// Provider reached over HTTP
    pub fn http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::empty(name)
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Start-up and discovery timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Work out the transport; exactly one of `command` and `url` must be set
    pub fn transport(&self) -> Result<TransportDescriptor> {
        match (&self.command, &self.url) {
            (Some(command), None) => Ok(TransportDescriptor::Stdio {
                command: command.clone(),
                args: self.args.clone(),
            }),
            (None, Some(url)) => Ok(TransportDescriptor::Http { url: url.clone() }),
            (Some(_), Some(_)) => bail!(
                "MCP server '{}' sets both `command` and `url`",
                self.name
            ),
            (None, None) => bail!(
                "MCP server '{}' needs either `command` or `url`",
                self.name
            ),
        }
    }

    /// Expand ${VAR} references from the process environment
    pub fn expand_env_vars(&mut self) -> Result<()> {
        if let Some(command) = self.command.as_mut() {
            *command = expand_env_string(command)?;
        }
        if let Some(url) = self.url.as_mut() {
            *url = expand_env_string(url)?;
        }
        for arg in self.args.iter_mut() {
            *arg = expand_env_string(arg)?;
        }
        for value in self.env.values_mut() {
            *value = expand_env_string(value)?;
        }
        for value in self.headers.values_mut() {
            *value = expand_env_string(value)?;
        }
        Ok(())
    }
}

/// Expand ${VAR} patterns in a string using environment variables
///
/// Values are inserted verbatim; a value that itself contains `${...}` is not
/// expanded again.
pub fn expand_env_string(s: &str) -> Result<String> {
    let mut result = String::with_capacity(s.len());
    let mut last = 0;

    for cap in ENV_REF.captures_iter(s) {
        let whole = cap.get(0).map(|m| m.range()).unwrap_or(last..last);
        let var_name = &cap[1];
        let var_value = std::env::var(var_name)
            .with_context(|| format!("Environment variable {} not set", var_name))?;
        result.push_str(&s[last..whole.start]);
        result.push_str(&var_value);
        last = whole.end;
    }
    result.push_str(&s[last..]);

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_string() {
        std::env::set_var("PILOT_TEST_VAR", "hello");
        let result = expand_env_string("prefix_${PILOT_TEST_VAR}_suffix").unwrap();
        assert_eq!(result, "prefix_hello_suffix");
    }

    #[test]
    fn test_expanded_values_are_not_reexpanded() {
        std::env::set_var("PILOT_TEST_OUTER", "literal ${PILOT_TEST_INNER}");
        std::env::set_var("PILOT_TEST_INNER", "leaked");
        let result = expand_env_string("${PILOT_TEST_OUTER} and ${PILOT_TEST_INNER}").unwrap();
        assert_eq!(result, "literal ${PILOT_TEST_INNER} and leaked");
    }

    #[test]
    fn test_expand_missing_var_fails() {
        let err = expand_env_string("${PILOT_SURELY_UNSET_VAR}").unwrap_err();
        assert!(err.to_string().contains("PILOT_SURELY_UNSET_VAR"));
    }

    #[test]
    fn test_expand_headers_and_env() {
        std::env::set_var("PILOT_TEST_TOKEN", "secret");
        let mut config = ProviderConfig::http("fabric", "https://example.test/mcp")
            .with_header("Authorization", "Bearer ${PILOT_TEST_TOKEN}");
        config.expand_env_vars().unwrap();
        assert_eq!(config.headers["Authorization"], "Bearer secret");
    }

    #[test]
    fn test_transport_descriptor() {
        let stdio = ProviderConfig::stdio("search", "uvx").with_args(["browser-use[cli]", "--mcp"]);
        assert_eq!(
            stdio.transport().unwrap(),
            TransportDescriptor::Stdio {
                command: "uvx".to_string(),
                args: vec!["browser-use[cli]".to_string(), "--mcp".to_string()],
            }
        );
        assert_eq!(stdio.transport().unwrap().to_string(), "stdio: uvx browser-use[cli] --mcp");

        let mut both = ProviderConfig::http("x", "http://localhost");
        both.command = Some("npx".to_string());
        assert!(both.transport().is_err());

        let mut neither = ProviderConfig::http("y", "http://localhost");
        neither.url = None;
        assert!(neither.transport().is_err());
    }

    #[test]
    fn test_parse_provider_table() {
        let toml = r#"
command = "npx"
args = ["-y", "@tyk-technologies/api-to-mcp"]
timeout_secs = 60

[env]
TARGET_API_BASE_URL = "https://api.example.test/v1"
"#;
        let config: ProviderConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.command.as_deref(), Some("npx"));
        assert_eq!(config.args.len(), 2);
        assert_eq!(config.timeout_secs, 60);
        assert!(config.enabled);
        assert_eq!(config.env["TARGET_API_BASE_URL"], "https://api.example.test/v1");
    }
}
