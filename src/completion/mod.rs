//! Completion API client.
//!
//! The engine talks to one chat-completions endpoint through the
//! [`CompletionBackend`] trait; [`OpenAiCompletions`] is the HTTP
//! implementation. Tests substitute their own backend.

pub mod http;
mod openai;

pub use openai::OpenAiCompletions;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::types::{ChatMessage, ToolCallRequest, ToolDefinition};

/// One completion request, first round or follow-up.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// Tool declarations offered to the model; empty means none.
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: u32,
}

/// The assistant message from a non-streaming completion.
#[derive(Debug, Clone, Default)]
pub struct CompletionMessage {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
}

/// One incremental piece of a streamed response.
///
/// Either side may be absent; tool-call data for one logical call arrives
/// split across many fragments and is keyed by `index`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamFragment {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallFragment>,
}

/// A partial tool call inside one stream fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallFragment {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// Seam to the completion API.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Blocking completion; returns the full assistant message, or `None`
    /// when the response carried no choices at all.
    async fn complete(&self, request: &CompletionRequest) -> Result<Option<CompletionMessage>>;

    /// Streaming completion; yields fragments in arrival order.
    async fn stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<BoxStream<'static, Result<StreamFragment>>>;
}
