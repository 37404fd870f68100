//! OpenAI-compatible Chat Completions backend.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;
use tracing::debug;

use crate::error::{AtelierError, Result};
use crate::types::{ChatMessage, Role, ToolCallRequest};

use super::http::{bearer_headers, drain_lines, parse_sse_data, shared_client, status_to_error};
use super::{CompletionBackend, CompletionMessage, CompletionRequest, StreamFragment, ToolCallFragment};

/// HTTP client for an OpenAI-compatible chat-completions endpoint.
pub struct OpenAiCompletions {
    api_key: String,
    base_url: String,
}

impl OpenAiCompletions {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
        }
    }

    fn build_request_body(&self, request: &CompletionRequest, stream: bool) -> serde_json::Value {
        let messages = request
            .messages
            .iter()
            .map(message_to_wire)
            .collect::<Vec<_>>();

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": request.max_tokens,
            "stream": stream,
        });

        if !request.tools.is_empty() {
            let declarations: Vec<serde_json::Value> = request
                .tools
                .iter()
                .map(|t| t.to_declaration())
                .collect();
            let obj = body.as_object_mut().expect("body is an object");
            obj.insert("tools".into(), declarations.into());
            obj.insert("tool_choice".into(), "auto".into());
        }

        body
    }
}

#[async_trait]
impl CompletionBackend for OpenAiCompletions {
    async fn complete(&self, request: &CompletionRequest) -> Result<Option<CompletionMessage>> {
        let body = self.build_request_body(request, false);
        let url = format!("{}/chat/completions", self.base_url);

        debug!(model = %request.model, "completion request");

        let resp = shared_client()
            .post(&url)
            .headers(bearer_headers(&self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status != 200 {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(status_to_error(status, &body_text));
        }

        let data: WireChatResponse = resp.json().await?;
        let Some(choice) = data.choices.into_iter().next() else {
            return Ok(None);
        };
        let message = choice.message;

        let tool_calls = message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCallRequest {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect();

        Ok(Some(CompletionMessage {
            content: message.content,
            tool_calls,
        }))
    }

    async fn stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<BoxStream<'static, Result<StreamFragment>>> {
        let body = self.build_request_body(request, true);
        let url = format!("{}/chat/completions", self.base_url);

        debug!(model = %request.model, "streaming completion request");

        let resp = shared_client()
            .post(&url)
            .headers(bearer_headers(&self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status != 200 {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(status_to_error(status, &body_text));
        }

        let byte_stream = resp.bytes_stream();

        let stream = async_stream::stream! {
            let mut buffer: Vec<u8> = Vec::new();
            futures::pin_mut!(byte_stream);

            while let Some(chunk_result) = byte_stream.next().await {
                let chunk = match chunk_result {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(AtelierError::Network(e));
                        break;
                    }
                };

                buffer.extend_from_slice(&chunk);

                for line in drain_lines(&mut buffer) {
                    if line.is_empty() || line.starts_with(':') {
                        continue;
                    }

                    if let Some(data) = parse_sse_data(&line) {
                        match serde_json::from_str::<WireStreamChunk>(data) {
                            Ok(chunk) => {
                                if let Some(choice) = chunk.choices.into_iter().next() {
                                    yield Ok(delta_to_fragment(choice.delta));
                                }
                            }
                            Err(_) => {} // skip unparseable chunks
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

fn delta_to_fragment(delta: WireDelta) -> StreamFragment {
    let tool_calls = delta
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| {
            let function = tc.function.unwrap_or_default();
            ToolCallFragment {
                index: tc.index,
                id: tc.id,
                name: function.name,
                arguments: function.arguments,
            }
        })
        .collect();

    StreamFragment {
        content: delta.content,
        tool_calls,
    }
}

fn message_to_wire(msg: &ChatMessage) -> serde_json::Value {
    if !msg.tool_calls.is_empty() {
        let tool_calls: Vec<serde_json::Value> = msg
            .tool_calls
            .iter()
            .map(|tc| {
                serde_json::json!({
                    "id": tc.id,
                    "type": "function",
                    "function": {
                        "name": tc.name,
                        "arguments": tc.arguments,
                    }
                })
            })
            .collect();
        return serde_json::json!({
            "role": msg.role.as_str(),
            "content": msg.content,
            "tool_calls": tool_calls,
        });
    }

    if msg.role == Role::Tool {
        return serde_json::json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id,
            "content": msg.content,
        });
    }

    serde_json::json!({ "role": msg.role.as_str(), "content": msg.content })
}

// Wire types (internal)

#[derive(Deserialize)]
struct WireChatResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Deserialize, Default)]
struct WireMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct WireStreamChunk {
    #[serde(default)]
    choices: Vec<WireStreamChoice>,
}

#[derive(Deserialize)]
struct WireStreamChoice {
    delta: WireDelta,
}

#[derive(Deserialize, Default)]
struct WireDelta {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCallDelta>>,
}

#[derive(Deserialize)]
struct WireToolCallDelta {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<WireFunctionDelta>,
}

#[derive(Deserialize, Default)]
struct WireFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}
