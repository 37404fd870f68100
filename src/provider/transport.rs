//! Point-to-point channels to tool provider servers.
//!
//! A transport owns no business logic; it only knows how to bring up an
//! initialized MCP session for one provider.

use async_trait::async_trait;
use rmcp::model::ClientInfo;
use rmcp::service::{ClientInitializeError, DynService, RoleClient, RunningService, ServiceExt};
use rmcp::transport::{StreamableHttpClientTransport, TokioChildProcess};
use tokio::process::Command;

pub type DynClientService = Box<dyn DynService<RoleClient>>;
pub type RunningProviderService = RunningService<RoleClient, DynClientService>;

/// Transport trait for tool-provider communication.
#[async_trait]
pub trait ProviderTransport: Send {
    /// Spawn/open the underlying channel and perform the protocol handshake.
    async fn connect(
        &mut self,
        client_info: ClientInfo,
    ) -> Result<RunningProviderService, ClientInitializeError>;
}

/// Subprocess transport speaking the pipe protocol (for local providers).
pub struct StdioTransport {
    command: String,
    args: Vec<String>,
}

impl StdioTransport {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

#[async_trait]
impl ProviderTransport for StdioTransport {
    async fn connect(
        &mut self,
        client_info: ClientInfo,
    ) -> Result<RunningProviderService, ClientInitializeError> {
        let mut command = Command::new(&self.command);
        command.args(&self.args);
        let transport = TokioChildProcess::new(command).map_err(|error| {
            ClientInitializeError::transport::<TokioChildProcess>(error, "spawn stdio transport")
        })?;

        client_info.into_dyn().serve(transport).await
    }
}

/// Event-stream transport for remote providers.
pub struct SseTransport {
    url: String,
}

impl SseTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ProviderTransport for SseTransport {
    async fn connect(
        &mut self,
        client_info: ClientInfo,
    ) -> Result<RunningProviderService, ClientInitializeError> {
        let transport = StreamableHttpClientTransport::from_uri(self.url.clone());
        client_info.into_dyn().serve(transport).await
    }
}
