//! Registry that owns all tool providers and routes calls by tool name.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tokio::time;
use tracing::{debug, warn};

use crate::config::{TimeoutConfig, ToolProviderConfig, TransportConfig};
use crate::error::{AtelierError, Result};
use crate::types::ToolDefinition;

use super::client::ProviderClient;
use super::transport::{SseTransport, StdioTransport};

#[async_trait]
/// Internal provider operations required by the registry.
pub(crate) trait ProviderOps: Send {
    async fn initialize(&mut self) -> Result<()>;
    async fn list_tools(&mut self) -> Result<Vec<ToolDefinition>>;
    async fn call_tool(&mut self, name: &str, arguments: serde_json::Value) -> Result<String>;
}

#[async_trait]
impl ProviderOps for ProviderClient {
    async fn initialize(&mut self) -> Result<()> {
        ProviderClient::initialize(self).await
    }

    async fn list_tools(&mut self) -> Result<Vec<ToolDefinition>> {
        ProviderClient::list_tools(self).await
    }

    async fn call_tool(&mut self, name: &str, arguments: serde_json::Value) -> Result<String> {
        ProviderClient::call_tool(self, name, arguments).await
    }
}

struct ProviderEntry {
    name: String,
    client: Mutex<Box<dyn ProviderOps>>,
}

/// Owns the set of configured tool providers for the process lifetime.
///
/// Connection setup runs at most once (single-flight); a provider that
/// fails to connect or list its tools is skipped so the system degrades to
/// whatever tool set came up. Tool names are assumed globally unique; on a
/// collision the first-registered provider wins and a diagnostic is logged.
pub struct ToolProviderRegistry {
    providers: Vec<ProviderEntry>,
    connected: RwLock<HashSet<String>>,
    tool_map: RwLock<HashMap<String, String>>,
    init: OnceCell<()>,
    timeouts: TimeoutConfig,
}

impl ToolProviderRegistry {
    /// Build the registry from static provider configuration. Nothing is
    /// connected until first use.
    pub fn from_config(providers: &[ToolProviderConfig], timeouts: TimeoutConfig) -> Self {
        let entries = providers
            .iter()
            .filter(|config| !config.disabled)
            .map(|config| {
                let client = match &config.transport {
                    TransportConfig::Stdio { command, args } => ProviderClient::new(
                        &config.name,
                        Box::new(StdioTransport::new(command, args.clone())),
                    ),
                    TransportConfig::Sse { url } => {
                        ProviderClient::new(&config.name, Box::new(SseTransport::new(url)))
                    }
                };
                ProviderEntry {
                    name: config.name.clone(),
                    client: Mutex::new(Box::new(client) as Box<dyn ProviderOps>),
                }
            })
            .collect();

        Self {
            providers: entries,
            connected: RwLock::new(HashSet::new()),
            tool_map: RwLock::new(HashMap::new()),
            init: OnceCell::new(),
            timeouts,
        }
    }

    #[cfg(test)]
    pub(crate) fn from_ops(
        entries: Vec<(String, Box<dyn ProviderOps>)>,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            providers: entries
                .into_iter()
                .map(|(name, client)| ProviderEntry {
                    name,
                    client: Mutex::new(client),
                })
                .collect(),
            connected: RwLock::new(HashSet::new()),
            tool_map: RwLock::new(HashMap::new()),
            init: OnceCell::new(),
            timeouts,
        }
    }

    /// Connect every enabled provider, at most once.
    ///
    /// Safe to call concurrently and repeatedly; concurrent first-time
    /// callers all await the single connection sequence.
    pub async fn initialize(&self) {
        self.init
            .get_or_init(|| async {
                self.connect_all().await;
            })
            .await;
    }

    async fn connect_all(&self) {
        for entry in &self.providers {
            let mut client = entry.client.lock().await;

            match time::timeout(self.timeouts.connect(), client.initialize()).await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    warn!(provider = %entry.name, %error, "tool provider failed to connect; skipping");
                    continue;
                }
                Err(_) => {
                    warn!(provider = %entry.name, "tool provider connect timed out; skipping");
                    continue;
                }
            }

            let tools = match time::timeout(self.timeouts.call(), client.list_tools()).await {
                Ok(Ok(tools)) => tools,
                Ok(Err(error)) => {
                    warn!(provider = %entry.name, %error, "tool listing failed; skipping provider");
                    continue;
                }
                Err(_) => {
                    warn!(provider = %entry.name, "tool listing timed out; skipping provider");
                    continue;
                }
            };
            drop(client);

            self.connected.write().await.insert(entry.name.clone());
            let mut tool_map = self.tool_map.write().await;
            for tool in tools {
                match tool_map.entry(tool.name.clone()) {
                    std::collections::hash_map::Entry::Occupied(existing) => {
                        // First registrant wins; later providers are shadowed.
                        warn!(
                            tool = %tool.name,
                            winner = %existing.get(),
                            shadowed = %entry.name,
                            "tool name collision"
                        );
                    }
                    std::collections::hash_map::Entry::Vacant(slot) => {
                        slot.insert(entry.name.clone());
                    }
                }
            }
            debug!(provider = %entry.name, "tool provider connected");
        }
    }

    /// Re-query every connected provider for its current tool list and
    /// return the flattened set.
    ///
    /// Deliberately not served from the initialization snapshot — providers
    /// may change their advertised tools at runtime. A provider that fails
    /// here is omitted from this call's result only.
    pub async fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.initialize().await;

        let connected = self.connected.read().await;
        let mut all_tools = Vec::new();

        for entry in &self.providers {
            if !connected.contains(&entry.name) {
                continue;
            }
            let mut client = entry.client.lock().await;
            match time::timeout(self.timeouts.call(), client.list_tools()).await {
                Ok(Ok(tools)) => all_tools.extend(tools),
                Ok(Err(error)) => {
                    warn!(provider = %entry.name, %error, "tool listing failed; omitting provider");
                }
                Err(_) => {
                    warn!(provider = %entry.name, "tool listing timed out; omitting provider");
                }
            }
        }

        all_tools
    }

    /// Route a tool invocation to its owning provider.
    pub async fn execute_tool(&self, name: &str, arguments: serde_json::Value) -> Result<String> {
        self.initialize().await;

        let provider_name = self
            .tool_map
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| AtelierError::ToolNotFound(name.to_string()))?;

        if !self.connected.read().await.contains(&provider_name) {
            return Err(AtelierError::ToolNotFound(name.to_string()));
        }

        let entry = self
            .providers
            .iter()
            .find(|entry| entry.name == provider_name)
            .ok_or_else(|| AtelierError::ToolNotFound(name.to_string()))?;

        debug!(tool = %name, provider = %provider_name, "executing tool");
        let mut client = entry.client.lock().await;
        match time::timeout(self.timeouts.call(), client.call_tool(name, arguments)).await {
            Ok(result) => result,
            Err(_) => Err(AtelierError::Timeout(self.timeouts.call_ms)),
        }
    }
}
