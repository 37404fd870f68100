//! Protocol client for one tool provider.

use rmcp::{
    model::{CallToolRequestParams, CallToolResult, ClientInfo, Content, JsonObject},
    service::{ClientInitializeError, ServiceError},
};
use tracing::debug;

use crate::error::{AtelierError, Result};
use crate::types::ToolDefinition;

use super::transport::{ProviderTransport, RunningProviderService};

/// Returned when a tool result carries no textual fragments.
pub const NO_CONTENT: &str = "No content returned";

/// Client for a single tool provider server.
///
/// The transport is opened once and the session reused across many tool
/// calls and many requests.
pub struct ProviderClient {
    name: String,
    transport: Box<dyn ProviderTransport>,
    session: Option<RunningProviderService>,
}

impl ProviderClient {
    pub fn new(name: impl Into<String>, transport: Box<dyn ProviderTransport>) -> Self {
        Self {
            name: name.into(),
            transport,
            session: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session
            .as_ref()
            .map(|session| !session.is_closed())
            .unwrap_or(false)
    }

    /// Open the transport and perform the protocol handshake.
    ///
    /// Idempotent while the session stays alive; a closed session is an
    /// error rather than a silent reconnect (no retries anywhere in this
    /// subsystem).
    pub async fn initialize(&mut self) -> Result<()> {
        if let Some(session) = self.session.as_ref() {
            if session.is_closed() {
                self.session = None;
                return Err(AtelierError::Stream(format!(
                    "provider '{}' session is closed",
                    self.name
                )));
            }
            return Ok(());
        }

        debug!(provider = %self.name, "connecting tool provider");
        let session = self
            .transport
            .connect(ClientInfo::default())
            .await
            .map_err(|error| map_initialize_error(&self.name, error))?;
        self.session = Some(session);
        Ok(())
    }

    /// List the tools this provider currently advertises.
    pub async fn list_tools(&mut self) -> Result<Vec<ToolDefinition>> {
        let name = self.name.clone();
        let session = self.active_session()?;

        let tools = match session.list_all_tools().await {
            Ok(tools) => tools,
            // Some servers reject paginated listing; fall back to one page.
            Err(ServiceError::UnexpectedResponse) => session
                .list_tools(None)
                .await
                .map(|page| page.tools)
                .map_err(|error| map_service_error(&name, "list_tools", error))?,
            Err(error) => return Err(map_service_error(&name, "list_tools", error)),
        };

        Ok(tools.into_iter().map(map_tool_definition).collect())
    }

    /// Invoke one tool and return its concatenated textual content.
    pub async fn call_tool(&mut self, tool: &str, arguments: serde_json::Value) -> Result<String> {
        let name = self.name.clone();
        let arguments = coerce_tool_arguments(arguments)?;
        let session = self.active_session()?;

        let result = session
            .call_tool(CallToolRequestParams {
                meta: None,
                name: tool.to_owned().into(),
                arguments,
                task: None,
            })
            .await
            .map_err(|error| map_service_error(&name, "call_tool", error))?;

        map_call_result(tool, result)
    }

    fn active_session(&mut self) -> Result<&mut RunningProviderService> {
        self.session.as_mut().ok_or_else(|| {
            AtelierError::ProviderConnect {
                provider: self.name.clone(),
                message: "provider is not connected".into(),
            }
        })
    }
}

fn map_tool_definition(tool: rmcp::model::Tool) -> ToolDefinition {
    ToolDefinition {
        name: tool.name.to_string(),
        description: tool.description.map(|d| d.to_string()).unwrap_or_default(),
        parameters: serde_json::Value::Object((*tool.input_schema).clone()),
    }
}

fn coerce_tool_arguments(value: serde_json::Value) -> Result<Option<JsonObject>> {
    match value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Object(map) => Ok(Some(map)),
        other => Err(AtelierError::InvalidArgument(format!(
            "tool arguments must be a JSON object; got {other}"
        ))),
    }
}

/// Concatenate the textual fragments of a result; non-text fragments are
/// ignored.
fn extract_text_content(content: &[Content]) -> Option<String> {
    let mut lines = Vec::new();
    for item in content {
        if let Some(text) = item.as_text() {
            lines.push(text.text.clone());
        }
    }

    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

fn map_call_result(tool: &str, result: CallToolResult) -> Result<String> {
    let text_content = extract_text_content(&result.content);

    if result.is_error.unwrap_or(false) {
        return Err(AtelierError::ToolExecution {
            tool_name: tool.to_string(),
            message: text_content.unwrap_or_else(|| "Unknown error".into()),
        });
    }

    Ok(text_content.unwrap_or_else(|| NO_CONTENT.into()))
}

fn map_initialize_error(provider: &str, error: ClientInitializeError) -> AtelierError {
    AtelierError::ProviderConnect {
        provider: provider.to_string(),
        message: match error {
            ClientInitializeError::ConnectionClosed(context) => {
                format!("connection closed: {context}")
            }
            ClientInitializeError::TransportError { error, context } => {
                format!("transport error ({context}): {error}")
            }
            ClientInitializeError::JsonRpcError(error) => {
                format!("JSON-RPC error {}: {}", error.code.0, error.message)
            }
            other => format!("{other}"),
        },
    }
}

fn map_service_error(provider: &str, context: &str, error: ServiceError) -> AtelierError {
    match error {
        ServiceError::McpError(error) => AtelierError::ToolExecution {
            tool_name: context.to_string(),
            message: format!("provider '{provider}' error {}: {}", error.code.0, error.message),
        },
        ServiceError::TransportSend(error) => AtelierError::Stream(format!(
            "{context}: provider '{provider}' transport send failed: {error}"
        )),
        ServiceError::TransportClosed => AtelierError::Stream(format!(
            "{context}: provider '{provider}' transport closed"
        )),
        ServiceError::Timeout { timeout } => AtelierError::Timeout(timeout.as_millis() as u64),
        other => AtelierError::Stream(format!(
            "{context}: provider '{provider}' service error: {other}"
        )),
    }
}
