//! Conversation orchestration: prompt building, the two completion rounds,
//! and tool execution in between.

mod assembler;
pub mod prompt;

pub use assembler::StreamAssembler;

use std::sync::{Arc, PoisonError, RwLock};

use futures::future::join_all;
use futures::StreamExt;
use serde_json::json;
use tracing::{debug, warn};

use crate::completion::{CompletionBackend, CompletionRequest, OpenAiCompletions};
use crate::config::AtelierConfig;
use crate::error::{AtelierError, Result};
use crate::provider::ToolProviderRegistry;
use crate::types::{ChatMessage, ProjectContext, ResolvedToolCall, ToolCallRequest};

const MAX_TOKENS: u32 = 16_000;

const NO_RESPONSE_FALLBACK: &str =
    "I apologize, but I encountered an issue processing your request.";
const EMPTY_RESPONSE_FALLBACK: &str = "I apologize, but I encountered an issue.";
const TOOL_RESULTS_FALLBACK: &str = "Tool results processed successfully.";

/// Callback receiving content deltas as they stream in.
///
/// Invoked in arrival order; must return promptly so it does not stall
/// stream consumption.
pub type ChunkCallback<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// Final result of one processed message.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatOutcome {
    pub content: String,
    /// Tool calls executed on the way to this answer; empty for a
    /// content-only response.
    pub tool_calls: Vec<ResolvedToolCall>,
}

/// Drives one conversation turn end to end.
///
/// Holds no per-request state; history and project context are supplied by
/// the caller on every call. The registry it borrows is the process-wide
/// one, shared across handlers.
pub struct ChatHandler {
    backend: Arc<dyn CompletionBackend>,
    registry: Arc<ToolProviderRegistry>,
    model: RwLock<String>,
}

impl ChatHandler {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        registry: Arc<ToolProviderRegistry>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            registry,
            model: RwLock::new(model.into()),
        }
    }

    /// Build a handler wired to the configured completion endpoint and
    /// provider roster.
    pub fn from_config(config: &AtelierConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| AtelierError::Configuration("no API key configured".into()))?;

        let backend = Arc::new(OpenAiCompletions::new(api_key, config.base_url.clone()));
        let registry = Arc::new(ToolProviderRegistry::from_config(
            &config.providers,
            config.timeouts,
        ));
        Ok(Self::new(backend, registry, &config.model))
    }

    /// Retarget subsequent requests at a different model.
    pub fn update_model(&self, model: impl Into<String>) {
        *self.model.write().unwrap_or_else(PoisonError::into_inner) = model.into();
    }

    fn model(&self) -> String {
        self.model
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Process one user message and produce the final assistant answer.
    ///
    /// With `on_chunk` supplied the first round streams and content deltas
    /// are forwarded live; without it the first round is a blocking call.
    /// Either way, if the model requests tool calls they are executed in
    /// parallel and a non-streaming follow-up round produces the answer.
    pub async fn process_message(
        &self,
        user_message: &str,
        history: &[ChatMessage],
        context: Option<&ProjectContext>,
        on_chunk: Option<ChunkCallback<'_>>,
    ) -> Result<ChatOutcome> {
        let messages = prompt::build_conversation(user_message, history, context);
        let tools = self.registry.tool_definitions().await;

        let request = CompletionRequest {
            model: self.model(),
            messages,
            tools,
            max_tokens: MAX_TOKENS,
        };

        let (content, requests) = match on_chunk {
            Some(on_chunk) => self.stream_first_round(&request, on_chunk).await?,
            None => self.blocking_first_round(&request).await?,
        };

        if requests.is_empty() {
            return Ok(ChatOutcome {
                content,
                tool_calls: Vec::new(),
            });
        }

        // Content produced alongside tool calls is superseded by the
        // follow-up round's answer.
        let resolved = self.execute_tool_calls(&requests).await;
        let content = self.follow_up(user_message, history, &requests, &resolved).await?;

        Ok(ChatOutcome {
            content,
            tool_calls: resolved,
        })
    }

    async fn stream_first_round(
        &self,
        request: &CompletionRequest,
        on_chunk: ChunkCallback<'_>,
    ) -> Result<(String, Vec<ToolCallRequest>)> {
        let mut stream = self.backend.stream(request).await?;
        let mut assembler = StreamAssembler::new();

        while let Some(fragment) = stream.next().await {
            let fragment = fragment.map_err(|error| AtelierError::Stream(error.to_string()))?;
            if let Some(delta) = assembler.absorb(fragment) {
                on_chunk(&delta);
            }
        }

        Ok(assembler.finish())
    }

    async fn blocking_first_round(
        &self,
        request: &CompletionRequest,
    ) -> Result<(String, Vec<ToolCallRequest>)> {
        let Some(message) = self.backend.complete(request).await? else {
            return Ok((NO_RESPONSE_FALLBACK.to_string(), Vec::new()));
        };
        let content = message
            .content
            .unwrap_or_else(|| EMPTY_RESPONSE_FALLBACK.to_string());
        Ok((content, message.tool_calls))
    }

    /// Execute every requested tool call concurrently.
    ///
    /// A single call's failure (bad argument JSON, unknown tool, provider
    /// error) is captured as an error payload in its result and does not
    /// cancel the sibling calls or the request.
    async fn execute_tool_calls(&self, requests: &[ToolCallRequest]) -> Vec<ResolvedToolCall> {
        join_all(requests.iter().map(|request| self.resolve_tool_call(request))).await
    }

    async fn resolve_tool_call(&self, request: &ToolCallRequest) -> ResolvedToolCall {
        debug!(tool = %request.name, id = %request.id, "resolving tool call");

        let outcome = async {
            let arguments = parse_arguments(&request.arguments)?;
            let text = self
                .registry
                .execute_tool(&request.name, arguments.clone())
                .await?;
            Ok::<_, AtelierError>((arguments, text))
        }
        .await;

        match outcome {
            Ok((arguments, text)) => ResolvedToolCall {
                id: request.id.clone(),
                name: request.name.clone(),
                arguments,
                result: serde_json::Value::String(text),
            },
            Err(error) => {
                warn!(tool = %request.name, %error, "tool execution failed");
                ResolvedToolCall {
                    id: request.id.clone(),
                    name: request.name.clone(),
                    arguments: json!({}),
                    result: json!({
                        "error": format!("Failed to execute {}: {error}", request.name)
                    }),
                }
            }
        }
    }

    /// The second completion round: feed tool results back and return the
    /// model's natural-language answer. Never retried; a failure here fails
    /// the whole request.
    async fn follow_up(
        &self,
        user_message: &str,
        history: &[ChatMessage],
        requests: &[ToolCallRequest],
        results: &[ResolvedToolCall],
    ) -> Result<String> {
        let mut messages = vec![ChatMessage::system(prompt::FOLLOW_UP_SYSTEM_PROMPT)];
        messages.extend(prompt::recent_turns(history, prompt::FOLLOW_UP_HISTORY_WINDOW));
        messages.push(ChatMessage::user(user_message));
        messages.push(ChatMessage::assistant_tool_calls(requests.to_vec()));
        for resolved in results {
            messages.push(ChatMessage::tool_result(
                resolved.id.clone(),
                resolved.result.to_string(),
            ));
        }

        let request = CompletionRequest {
            model: self.model(),
            messages,
            tools: Vec::new(),
            max_tokens: MAX_TOKENS,
        };

        let response = self
            .backend
            .complete(&request)
            .await
            .map_err(|error| AtelierError::FollowUp(error.to_string()))?;

        Ok(response
            .and_then(|message| message.content)
            .unwrap_or_else(|| TOOL_RESULTS_FALLBACK.to_string()))
    }
}

/// Parse accumulated argument text; empty text means no arguments.
fn parse_arguments(raw: &str) -> Result<serde_json::Value> {
    if raw.trim().is_empty() {
        return Ok(json!({}));
    }
    Ok(serde_json::from_str(raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{CompletionMessage, StreamFragment, ToolCallFragment};
    use crate::config::TimeoutConfig;
    use crate::provider::registry::ProviderOps;
    use crate::types::{FileSystemNode, Role, ToolDefinition};
    use async_trait::async_trait;
    use futures::stream::BoxStream;
    use pretty_assertions::assert_eq;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex as StdMutex;

    /// Scripted completion backend recording every request it sees.
    #[derive(Default)]
    struct MockBackend {
        stream_scripts: StdMutex<VecDeque<Vec<Result<StreamFragment>>>>,
        completions: StdMutex<VecDeque<Option<CompletionMessage>>>,
        stream_requests: StdMutex<Vec<CompletionRequest>>,
        complete_requests: StdMutex<Vec<CompletionRequest>>,
    }

    impl MockBackend {
        fn with_stream(self, fragments: Vec<Result<StreamFragment>>) -> Self {
            self.stream_scripts.lock().unwrap().push_back(fragments);
            self
        }

        fn with_completion(self, message: CompletionMessage) -> Self {
            self.completions.lock().unwrap().push_back(Some(message));
            self
        }

        fn with_missing_completion(self) -> Self {
            self.completions.lock().unwrap().push_back(None);
            self
        }

        fn complete_requests(&self) -> Vec<CompletionRequest> {
            self.complete_requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionBackend for MockBackend {
        async fn complete(
            &self,
            request: &CompletionRequest,
        ) -> Result<Option<CompletionMessage>> {
            self.complete_requests.lock().unwrap().push(request.clone());
            Ok(self
                .completions
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected complete() call"))
        }

        async fn stream(
            &self,
            request: &CompletionRequest,
        ) -> Result<BoxStream<'static, Result<StreamFragment>>> {
            self.stream_requests.lock().unwrap().push(request.clone());
            let fragments = self
                .stream_scripts
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected stream() call");
            Ok(Box::pin(futures::stream::iter(fragments)))
        }
    }

    /// Minimal provider that answers tool calls from a canned table.
    struct ScriptedProvider {
        tools: Vec<ToolDefinition>,
        results: HashMap<String, std::result::Result<String, String>>,
    }

    impl ScriptedProvider {
        fn new(entries: &[(&str, std::result::Result<&str, &str>)]) -> Self {
            Self {
                tools: entries
                    .iter()
                    .map(|(name, _)| ToolDefinition {
                        name: name.to_string(),
                        description: format!("{name} tool"),
                        parameters: json!({"type": "object", "properties": {}}),
                    })
                    .collect(),
                results: entries
                    .iter()
                    .map(|&(name, result)| {
                        (
                            name.to_string(),
                            result.map(str::to_string).map_err(str::to_string),
                        )
                    })
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl ProviderOps for ScriptedProvider {
        async fn initialize(&mut self) -> Result<()> {
            Ok(())
        }

        async fn list_tools(&mut self) -> Result<Vec<ToolDefinition>> {
            Ok(self.tools.clone())
        }

        async fn call_tool(
            &mut self,
            name: &str,
            _arguments: serde_json::Value,
        ) -> Result<String> {
            match self.results.get(name) {
                Some(Ok(text)) => Ok(text.clone()),
                Some(Err(message)) => Err(AtelierError::ToolExecution {
                    tool_name: name.to_string(),
                    message: message.clone(),
                }),
                None => Err(AtelierError::ToolNotFound(name.to_string())),
            }
        }
    }

    fn empty_registry() -> Arc<ToolProviderRegistry> {
        Arc::new(ToolProviderRegistry::from_config(
            &[],
            TimeoutConfig::default(),
        ))
    }

    fn registry_with(provider: ScriptedProvider) -> Arc<ToolProviderRegistry> {
        Arc::new(ToolProviderRegistry::from_ops(
            vec![("scripted".into(), Box::new(provider))],
            TimeoutConfig::default(),
        ))
    }

    fn content_fragment(text: &str) -> Result<StreamFragment> {
        Ok(StreamFragment {
            content: Some(text.to_string()),
            tool_calls: Vec::new(),
        })
    }

    fn tool_fragment(
        index: usize,
        id: Option<&str>,
        name: Option<&str>,
        arguments: Option<&str>,
    ) -> Result<StreamFragment> {
        Ok(StreamFragment {
            content: None,
            tool_calls: vec![ToolCallFragment {
                index,
                id: id.map(str::to_string),
                name: name.map(str::to_string),
                arguments: arguments.map(str::to_string),
            }],
        })
    }

    #[tokio::test]
    async fn content_only_stream_skips_follow_up() {
        let backend = Arc::new(
            MockBackend::default()
                .with_stream(vec![content_fragment("Done"), content_fragment(".")]),
        );
        let handler = ChatHandler::new(backend.clone(), empty_registry(), "gpt-4o");

        let chunks = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&chunks);
        let on_chunk = move |chunk: &str| sink.lock().unwrap().push(chunk.to_string());

        let context = ProjectContext::default();
        let outcome = handler
            .process_message("add a header", &[], Some(&context), Some(&on_chunk))
            .await
            .unwrap();

        assert_eq!(outcome.content, "Done.");
        assert!(outcome.tool_calls.is_empty());
        assert_eq!(*chunks.lock().unwrap(), vec!["Done", "."]);
        assert!(backend.complete_requests().is_empty());
    }

    #[tokio::test]
    async fn fragmented_tool_call_executes_and_feeds_follow_up() {
        let backend = Arc::new(
            MockBackend::default()
                .with_stream(vec![
                    tool_fragment(0, Some("call_1"), Some("search"), Some("{\"q\"")),
                    tool_fragment(0, None, None, Some(":\"rust\"}")),
                ])
                .with_completion(CompletionMessage {
                    content: Some("Here is what I found.".into()),
                    tool_calls: Vec::new(),
                }),
        );
        let registry = registry_with(ScriptedProvider::new(&[("search", Ok("three results"))]));
        let handler = ChatHandler::new(backend.clone(), registry, "gpt-4o");

        let on_chunk = |_: &str| {};
        let outcome = handler
            .process_message("find rust docs", &[], None, Some(&on_chunk))
            .await
            .unwrap();

        assert_eq!(outcome.content, "Here is what I found.");
        assert_eq!(outcome.tool_calls.len(), 1);
        assert_eq!(outcome.tool_calls[0].arguments, json!({"q": "rust"}));
        assert_eq!(outcome.tool_calls[0].result, json!("three results"));

        let follow_up = &backend.complete_requests()[0];
        assert!(follow_up.tools.is_empty());
        assert_eq!(
            follow_up.messages[0].content.as_deref(),
            Some(prompt::FOLLOW_UP_SYSTEM_PROMPT)
        );
        let assistant = &follow_up.messages[follow_up.messages.len() - 2];
        assert_eq!(assistant.role, Role::Assistant);
        assert_eq!(assistant.tool_calls[0].arguments, "{\"q\":\"rust\"}");
        let tool_message = follow_up.messages.last().unwrap();
        assert_eq!(tool_message.role, Role::Tool);
        assert_eq!(tool_message.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(tool_message.content.as_deref(), Some("\"three results\""));
    }

    #[tokio::test]
    async fn failed_tool_calls_are_contained_in_error_payloads() {
        let backend = Arc::new(
            MockBackend::default()
                .with_stream(vec![
                    tool_fragment(0, Some("call_a"), Some("search"), Some("{}")),
                    tool_fragment(1, Some("call_b"), Some("deploy"), Some("{}")),
                ])
                .with_completion(CompletionMessage {
                    content: Some("One of those failed.".into()),
                    tool_calls: Vec::new(),
                }),
        );
        let registry = registry_with(ScriptedProvider::new(&[
            ("search", Ok("hit")),
            ("deploy", Err("build broke")),
        ]));
        let handler = ChatHandler::new(backend.clone(), registry, "gpt-4o");

        let on_chunk = |_: &str| {};
        let outcome = handler
            .process_message("search then deploy", &[], None, Some(&on_chunk))
            .await
            .unwrap();

        assert_eq!(outcome.content, "One of those failed.");
        assert_eq!(outcome.tool_calls.len(), 2);
        assert!(!outcome.tool_calls[0].is_error());
        assert!(outcome.tool_calls[1].is_error());

        let follow_up = &backend.complete_requests()[0];
        let tool_messages: Vec<_> = follow_up
            .messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .collect();
        assert_eq!(tool_messages.len(), 2);
        assert!(tool_messages[1]
            .content
            .as_deref()
            .unwrap()
            .contains("Failed to execute deploy"));
    }

    #[tokio::test]
    async fn malformed_argument_json_becomes_error_result() {
        let backend = Arc::new(
            MockBackend::default()
                .with_stream(vec![tool_fragment(
                    0,
                    Some("call_1"),
                    Some("search"),
                    Some("{not json"),
                )])
                .with_completion(CompletionMessage {
                    content: Some("Could not run that.".into()),
                    tool_calls: Vec::new(),
                }),
        );
        let registry = registry_with(ScriptedProvider::new(&[("search", Ok("unused"))]));
        let handler = ChatHandler::new(backend, registry, "gpt-4o");

        let on_chunk = |_: &str| {};
        let outcome = handler
            .process_message("go", &[], None, Some(&on_chunk))
            .await
            .unwrap();

        assert!(outcome.tool_calls[0].is_error());
        assert_eq!(outcome.tool_calls[0].arguments, json!({}));
    }

    #[tokio::test]
    async fn stream_failure_aborts_the_request() {
        let backend = Arc::new(MockBackend::default().with_stream(vec![
            content_fragment("partial"),
            Err(AtelierError::Stream("connection reset".into())),
        ]));
        let handler = ChatHandler::new(backend, empty_registry(), "gpt-4o");

        let on_chunk = |_: &str| {};
        let err = handler
            .process_message("hi", &[], None, Some(&on_chunk))
            .await
            .expect_err("stream error must propagate");
        assert!(matches!(err, AtelierError::Stream(_)));
    }

    #[tokio::test]
    async fn blocking_path_without_tool_calls_returns_content() {
        let backend = Arc::new(MockBackend::default().with_completion(CompletionMessage {
            content: Some("Plain answer.".into()),
            tool_calls: Vec::new(),
        }));
        let handler = ChatHandler::new(backend, empty_registry(), "gpt-4o");

        let outcome = handler.process_message("hi", &[], None, None).await.unwrap();
        assert_eq!(outcome.content, "Plain answer.");
        assert!(outcome.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn blocking_path_without_response_message_uses_apology_fallback() {
        let backend = Arc::new(MockBackend::default().with_missing_completion());
        let handler = ChatHandler::new(backend, empty_registry(), "gpt-4o");

        let outcome = handler.process_message("hi", &[], None, None).await.unwrap();
        assert_eq!(outcome.content, NO_RESPONSE_FALLBACK);
        assert!(outcome.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn blocking_path_without_content_uses_short_fallback() {
        let backend = Arc::new(MockBackend::default().with_completion(CompletionMessage::default()));
        let handler = ChatHandler::new(backend, empty_registry(), "gpt-4o");

        let outcome = handler.process_message("hi", &[], None, None).await.unwrap();
        assert_eq!(outcome.content, EMPTY_RESPONSE_FALLBACK);
        assert!(outcome.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn blocking_path_with_tool_calls_runs_follow_up() {
        let backend = Arc::new(
            MockBackend::default()
                .with_completion(CompletionMessage {
                    content: None,
                    tool_calls: vec![ToolCallRequest {
                        id: "call_1".into(),
                        name: "search".into(),
                        arguments: "{\"q\":\"x\"}".into(),
                    }],
                })
                .with_completion(CompletionMessage {
                    content: Some("Found it.".into()),
                    tool_calls: Vec::new(),
                }),
        );
        let registry = registry_with(ScriptedProvider::new(&[("search", Ok("hit"))]));
        let handler = ChatHandler::new(backend, registry, "gpt-4o");

        let outcome = handler.process_message("hi", &[], None, None).await.unwrap();
        assert_eq!(outcome.content, "Found it.");
        assert_eq!(outcome.tool_calls.len(), 1);
    }

    #[tokio::test]
    async fn follow_up_without_content_uses_fallback() {
        let backend = Arc::new(
            MockBackend::default()
                .with_stream(vec![tool_fragment(0, Some("call_1"), Some("search"), Some("{}"))])
                .with_completion(CompletionMessage::default()),
        );
        let registry = registry_with(ScriptedProvider::new(&[("search", Ok("hit"))]));
        let handler = ChatHandler::new(backend, registry, "gpt-4o");

        let on_chunk = |_: &str| {};
        let outcome = handler
            .process_message("hi", &[], None, Some(&on_chunk))
            .await
            .unwrap();
        assert_eq!(outcome.content, TOOL_RESULTS_FALLBACK);
    }

    #[tokio::test]
    async fn follow_up_history_window_is_three_turns() {
        let backend = Arc::new(
            MockBackend::default()
                .with_stream(vec![tool_fragment(0, Some("call_1"), Some("search"), Some("{}"))])
                .with_completion(CompletionMessage {
                    content: Some("ok".into()),
                    tool_calls: Vec::new(),
                }),
        );
        let registry = registry_with(ScriptedProvider::new(&[("search", Ok("hit"))]));
        let handler = ChatHandler::new(backend.clone(), registry, "gpt-4o");

        let history: Vec<ChatMessage> = (0..6)
            .map(|i| ChatMessage::user(format!("turn {i}")))
            .collect();
        let on_chunk = |_: &str| {};
        handler
            .process_message("latest", &history, None, Some(&on_chunk))
            .await
            .unwrap();

        let follow_up = &backend.complete_requests()[0];
        // system + 3 history + user + assistant + tool
        assert_eq!(follow_up.messages.len(), 7);
        assert_eq!(follow_up.messages[1].content.as_deref(), Some("turn 3"));
        assert_eq!(follow_up.messages[3].content.as_deref(), Some("turn 5"));
    }

    #[tokio::test]
    async fn update_model_retargets_subsequent_requests() {
        let backend = Arc::new(MockBackend::default().with_completion(CompletionMessage {
            content: Some("hi".into()),
            tool_calls: Vec::new(),
        }));
        let handler = ChatHandler::new(backend.clone(), empty_registry(), "gpt-4o");

        handler.update_model("gpt-4o-mini");
        handler.process_message("hi", &[], None, None).await.unwrap();

        assert_eq!(backend.complete_requests()[0].model, "gpt-4o-mini");
    }
}
