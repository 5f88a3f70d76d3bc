//! Lagoon configuration management
//!
//! Top-level settings use snake_case keys. Service blocks keep the camelCase
//! keys of beelzebub-style service files so existing service definitions can
//! be dropped in unchanged:
//!
//! ```toml
//! [history]
//! max_idle_secs = 3600
//!
//! [[services]]
//! protocol = "tcp"
//! address = ":3306"
//! description = "MySQL 8.0.29"
//! banner = "8.0.29"
//! deadlineTimeoutSeconds = 60
//!
//! [services.plugin]
//! llmProvider = "openai"
//! llmModel = "gpt-4o-mini"
//! ```

use crate::error::{Error, Result};
use crate::generator::LlmProvider;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Environment variable consulted when a plugin carries no API key
pub const OPENAI_KEY_ENV: &str = "OPEN_AI_SECRET_KEY";

/// Default per-connection deadline in seconds
pub const DEFAULT_DEADLINE_SECS: u64 = 1000;

/// Main Lagoon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LagoonConfig {
    /// Session cache configuration
    #[serde(default)]
    pub history: HistoryConfig,

    /// Trace output configuration
    #[serde(default)]
    pub trace: TraceConfig,

    /// Connection admission configuration
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Honeypot services
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

/// Session cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Idle time after which a conversation is evicted
    pub max_idle_secs: u64,

    /// Interval between eviction sweeps
    pub sweep_interval_secs: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_idle_secs: 3600,
            sweep_interval_secs: 60,
        }
    }
}

impl HistoryConfig {
    pub fn max_idle(&self) -> Duration {
        Duration::from_secs(self.max_idle_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Trace output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// `"stdout"` or a file path; events are written as JSON lines
    pub output: String,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            output: "stdout".to_string(),
        }
    }
}

/// Connection admission configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Maximum concurrent connections per service (0 = unbounded)
    pub max_connections: usize,
}

/// A single honeypot service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    /// Service protocol; only `tcp` is served by this crate
    #[serde(default = "default_protocol")]
    pub protocol: String,

    /// Listen address, e.g. `0.0.0.0:3306` or `:3306`
    pub address: String,

    /// Human readable description copied into every trace event
    #[serde(default)]
    pub description: String,

    /// Banner written on connect
    #[serde(default)]
    pub banner: String,

    /// Total lifetime of a connection in seconds
    #[serde(default = "default_deadline")]
    pub deadline_timeout_seconds: u64,

    /// Optional LLM plugin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<PluginConfig>,
}

fn default_protocol() -> String {
    "tcp".to_string()
}

fn default_deadline() -> u64 {
    DEFAULT_DEADLINE_SECS
}

impl ServiceConfig {
    /// Create a TCP service with no generator
    pub fn tcp(address: impl Into<String>, banner: impl Into<String>) -> Self {
        Self {
            protocol: default_protocol(),
            address: address.into(),
            description: String::new(),
            banner: banner.into(),
            deadline_timeout_seconds: DEFAULT_DEADLINE_SECS,
            plugin: None,
        }
    }

    /// Whether this service is served by the TCP listener
    pub fn is_tcp(&self) -> bool {
        self.protocol.eq_ignore_ascii_case("tcp")
    }

    /// The plugin, if it names a provider
    pub fn generator(&self) -> Option<&PluginConfig> {
        self.plugin.as_ref().filter(|p| p.is_configured())
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_timeout_seconds)
    }

    /// Address in a form `TcpListener::bind` accepts (`:port` means all interfaces)
    pub fn bind_address(&self) -> String {
        if self.address.starts_with(':') {
            format!("0.0.0.0{}", self.address)
        } else {
            self.address.clone()
        }
    }
}

/// LLM plugin settings for a service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Provider name (`openai` or `ollama`); empty disables the generator
    #[serde(rename = "llmProvider", default)]
    pub llm_provider: String,

    /// Model identifier
    #[serde(rename = "llmModel", default)]
    pub llm_model: String,

    /// API key for OpenAI-compatible endpoints
    #[serde(rename = "openAISecretKey", default)]
    pub open_ai_secret_key: String,

    /// Full endpoint URL override
    #[serde(default)]
    pub host: String,

    /// Custom system prompt
    #[serde(default)]
    pub prompt: String,
}

impl PluginConfig {
    pub fn is_configured(&self) -> bool {
        !self.llm_provider.trim().is_empty()
    }

    /// Configured key, or the value of `OPEN_AI_SECRET_KEY` when empty
    pub fn api_key(&self) -> String {
        if !self.open_ai_secret_key.is_empty() {
            return self.open_ai_secret_key.clone();
        }
        std::env::var(OPENAI_KEY_ENV).unwrap_or_default()
    }
}

impl LagoonConfig {
    /// Load configuration from a TOML file, or YAML for `.yaml`/`.yml`
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );

        let config: Self = if is_yaml {
            serde_yaml::from_str(&content)
                .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?
        } else {
            toml::from_str(&content)
                .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate service definitions
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for service in &self.services {
            if service.address.trim().is_empty() {
                return Err(Error::Config("Service address must not be empty".to_string()));
            }
            if !seen.insert(service.bind_address()) {
                return Err(Error::Config(format!(
                    "Duplicate service address: {}",
                    service.address
                )));
            }
            if service.deadline_timeout_seconds == 0 {
                return Err(Error::Config(format!(
                    "Service {}: deadlineTimeoutSeconds must be positive",
                    service.address
                )));
            }
            if let Some(plugin) = service.generator() {
                plugin.llm_provider.parse::<LlmProvider>().map_err(|e| {
                    Error::Config(format!("Service {}: {}", service.address, e))
                })?;
            }
        }
        Ok(())
    }

    /// Services served by the TCP listener
    pub fn tcp_services(&self) -> impl Iterator<Item = &ServiceConfig> {
        self.services.iter().filter(|s| s.is_tcp())
    }
}
