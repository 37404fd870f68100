//! Configuration (layered: explicit > env > config file > defaults).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AtelierError, Result};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o";

/// Top-level configuration for the orchestration engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AtelierConfig {
    /// Completion API key. Usually supplied via `OPENAI_API_KEY`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Completion API base URL (an OpenAI-compatible gateway works too).
    pub base_url: String,
    /// Model targeted by new handlers; `ChatHandler::update_model` can
    /// retarget a live handler.
    pub model: String,
    pub timeouts: TimeoutConfig,
    /// Tool providers to connect at first use.
    pub providers: Vec<ToolProviderConfig>,
}

impl Default for AtelierConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeouts: TimeoutConfig::default(),
            providers: default_providers(),
        }
    }
}

impl AtelierConfig {
    /// Load from environment variables, on top of defaults.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        let mut config = Self::default();

        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            config.api_key = Some(key);
        }
        if let Ok(key) = std::env::var("ATELIER_API_KEY") {
            config.api_key = Some(key);
        }
        if let Ok(url) = std::env::var("ATELIER_BASE_URL") {
            config.base_url = url;
        }
        if let Ok(model) = std::env::var("ATELIER_MODEL") {
            config.model = model;
        }

        config
    }

    /// Load from a TOML file, with env vars layered on top.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&raw)
            .map_err(|e| AtelierError::Configuration(format!("{}: {e}", path.display())))?;

        let _ = dotenvy::dotenv();
        if config.api_key.is_none() {
            config.api_key = std::env::var("OPENAI_API_KEY").ok();
        }

        Ok(config)
    }

    /// Load from the default config file location when one exists there,
    /// otherwise fall back to env vars over defaults.
    pub fn load_or_default() -> Self {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path).unwrap_or_else(|error| {
                tracing::warn!(%error, "ignoring invalid config file");
                Self::from_env()
            }),
            _ => Self::from_env(),
        }
    }

    /// Default config file location (`atelier.toml` in the platform config dir).
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "atelier")
            .map(|dirs| dirs.config_dir().join("atelier.toml"))
    }

    /// Providers that are not disabled.
    pub fn enabled_providers(&self) -> impl Iterator<Item = &ToolProviderConfig> {
        self.providers.iter().filter(|p| !p.disabled)
    }
}

/// Bounded timeouts for provider I/O, so a hung provider cannot stall a
/// request indefinitely.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Provider transport connect + handshake.
    pub connect_ms: u64,
    /// Single tool invocation (and per-provider tool listing).
    pub call_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 30_000,
            call_ms: 60_000,
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn call(&self) -> Duration {
        Duration::from_millis(self.call_ms)
    }
}

/// Static configuration for one tool provider, read once at startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolProviderConfig {
    pub name: String,
    #[serde(flatten)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub disabled: bool,
}

impl ToolProviderConfig {
    pub fn stdio(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportConfig::Stdio {
                command: command.into(),
                args,
            },
            disabled: false,
        }
    }

    pub fn sse(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportConfig::Sse { url: url.into() },
            disabled: false,
        }
    }
}

/// Transport kind and connection parameters for a tool provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Local subprocess speaking the pipe protocol.
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// Remote server-push event-stream endpoint.
    Sse { url: String },
}

fn string_args(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}

/// Built-in provider roster used when no config file overrides it.
pub fn default_providers() -> Vec<ToolProviderConfig> {
    vec![
        ToolProviderConfig::stdio("shadcn", "npx", string_args(&["shadcn@latest", "mcp"])),
        ToolProviderConfig::stdio(
            "sequentialthinking",
            "npx",
            string_args(&["-y", "@modelcontextprotocol/server-sequential-thinking"]),
        ),
        ToolProviderConfig::stdio("fetch", "npx", string_args(&["mcp-fetch-server"])),
        ToolProviderConfig::stdio(
            "context7",
            "npx",
            string_args(&["-y", "@upstash/context7-mcp"]),
        ),
        ToolProviderConfig::stdio(
            "brave",
            "npx",
            string_args(&["-y", "@modelcontextprotocol/server-brave-search"]),
        ),
        ToolProviderConfig::sse("cloudflare", "https://docs.mcp.cloudflare.com/sse"),
    ]
}
