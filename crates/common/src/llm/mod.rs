//! Chat model abstraction
//!
//! Provides:
//! - Chat message and tool-calling types (OpenAI-compatible)
//! - `ChatModel` trait used by the agent, the router and the synthesizers,
//!   with an optional token-by-token `chat_stream`
//! - `OpenAIChatModel` over reqwest (server-sent events when streaming)
//! - `MockChatModel` driven by a closure, for tests and offline runs

use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

impl ChatRole {
    fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
            ChatRole::Tool => "tool",
        }
    }
}

/// A chat message with role, content, and optional tool call metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: Option<String>,
    /// Tool calls requested by the assistant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Tool call this message answers (role = tool)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Tool name (role = tool)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: Some(content.into()), tool_calls: None, tool_call_id: None, name: None }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: Some(content.into()), tool_calls: None, tool_call_id: None, name: None }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: Some(content.into()), tool_calls: None, tool_call_id: None, name: None }
    }
    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self { role: ChatRole::Assistant, content: None, tool_calls: Some(tool_calls), tool_call_id: None, name: None }
    }
    pub fn tool_result(tool_call_id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self { role: ChatRole::Tool, content: Some(content.into()), tool_calls: None, tool_call_id: Some(tool_call_id.into()), name: Some(name.into()) }
    }

    /// Content or the empty string
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

/// A tool call emitted by the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// JSON arguments string
    pub arguments: String,
}

/// Schema describing a tool the model can call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters
    pub parameters: Value,
}

/// Either a final text answer or a request to call tools
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ChatResponse {
    Content(String),
    ToolCalls(Vec<ToolCall>),
}

impl ChatResponse {
    /// Text content, treating a tool-call response as empty
    pub fn into_text(self) -> String {
        match self {
            ChatResponse::Content(text) => text,
            ChatResponse::ToolCalls(_) => String::new(),
        }
    }
}

/// Incremental piece of a streamed completion
#[derive(Debug, Clone, PartialEq)]
pub enum ChatDelta {
    Content(String),
    ToolCall(ToolCallDelta),
}

/// Fragment of a tool call. Fragments sharing an `index` concatenate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallDelta {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: String,
}

pub type ChatStream = BoxStream<'static, Result<ChatDelta>>;

impl ChatResponse {
    pub fn into_deltas(self) -> Vec<ChatDelta> {
        match self {
            ChatResponse::Content(text) if text.is_empty() => Vec::new(),
            ChatResponse::Content(text) => vec![ChatDelta::Content(text)],
            ChatResponse::ToolCalls(calls) => calls
                .into_iter()
                .enumerate()
                .map(|(index, call)| {
                    ChatDelta::ToolCall(ToolCallDelta {
                        index,
                        id: Some(call.id),
                        name: Some(call.name),
                        arguments: call.arguments,
                    })
                })
                .collect(),
        }
    }
}

/// Reassembles streamed tool-call fragments into whole calls
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: BTreeMap<usize, ToolCall>,
}

impl ToolCallAccumulator {
    pub fn push(&mut self, delta: ToolCallDelta) {
        let call = self.calls.entry(delta.index).or_insert_with(|| ToolCall {
            id: String::new(),
            name: String::new(),
            arguments: String::new(),
        });
        if let Some(id) = delta.id {
            call.id = id;
        }
        if let Some(name) = delta.name {
            call.name.push_str(&name);
        }
        call.arguments.push_str(&delta.arguments);
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Calls in index order. Fragments that never received a name are dropped.
    pub fn finish(self) -> Vec<ToolCall> {
        self.calls.into_values().filter(|c| !c.name.is_empty()).collect()
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// One completion. An empty `tools` slice disables tool calling.
    async fn chat(&self, messages: &[ChatMessage], tools: &[ToolSchema]) -> Result<ChatResponse>;

    /// Streamed completion. The default replays `chat` as a single burst.
    async fn chat_stream(&self, messages: &[ChatMessage], tools: &[ToolSchema]) -> Result<ChatStream> {
        let response = self.chat(messages, tools).await?;
        Ok(stream::iter(response.into_deltas().into_iter().map(Ok)).boxed())
    }

    /// Convenience: single user prompt, text answer
    async fn complete(&self, prompt: &str) -> Result<String> {
        let response = self.chat(&[ChatMessage::user(prompt)], &[]).await?;
        Ok(response.into_text())
    }

    fn model_name(&self) -> &str;
}

/// OpenAI-compatible chat completion client
pub struct OpenAIChatModel {
    client: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f32,
    base_url: String,
}

impl OpenAIChatModel {
    pub fn new(
        api_key: String,
        model: impl Into<String>,
        temperature: f32,
        base_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key,
            model: model.into(),
            temperature,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
        })
    }

    fn format_messages(messages: &[ChatMessage]) -> Vec<Value> {
        messages
            .iter()
            .map(|m| {
                let mut msg = json!({ "role": m.role.as_str() });
                if let Some(ref content) = m.content {
                    msg["content"] = json!(content);
                }
                if let Some(ref calls) = m.tool_calls {
                    msg["tool_calls"] = json!(calls
                        .iter()
                        .map(|tc| json!({
                            "id": tc.id,
                            "type": "function",
                            "function": { "name": tc.name, "arguments": tc.arguments }
                        }))
                        .collect::<Vec<_>>());
                }
                if let Some(ref id) = m.tool_call_id {
                    msg["tool_call_id"] = json!(id);
                }
                if let Some(ref name) = m.name {
                    msg["name"] = json!(name);
                }
                msg
            })
            .collect()
    }

    fn format_tools(tools: &[ToolSchema]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect()
    }

    fn parse_response(body: &Value) -> Result<ChatResponse> {
        let choice = body
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .ok_or_else(|| AppError::LlmError {
                message: "response has no choices".to_string(),
            })?;

        if let Some(tool_calls) = choice.get("tool_calls").and_then(Value::as_array) {
            let calls: Vec<ToolCall> = tool_calls
                .iter()
                .filter_map(|tc| {
                    Some(ToolCall {
                        id: tc["id"].as_str()?.to_string(),
                        name: tc["function"]["name"].as_str()?.to_string(),
                        arguments: tc["function"]["arguments"].as_str()?.to_string(),
                    })
                })
                .collect();
            if !calls.is_empty() {
                return Ok(ChatResponse::ToolCalls(calls));
            }
        }

        let content = choice["content"].as_str().unwrap_or("").to_string();
        Ok(ChatResponse::Content(content))
    }

    fn request_body(&self, messages: &[ChatMessage], tools: &[ToolSchema], stream: bool) -> Value {
        let mut request = json!({
            "model": self.model,
            "messages": Self::format_messages(messages),
            "temperature": self.temperature,
            "stream": stream
        });

        if !tools.is_empty() {
            request["tools"] = json!(Self::format_tools(tools));
            request["tool_choice"] = json!("auto");
        }
        request
    }

    async fn send(&self, request: &Value) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(request)
            .send()
            .await
            .map_err(|e| AppError::LlmError {
                message: format!("Request failed: {}", e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::LlmError {
                message: format!("API error {}: {}", status, body),
            });
        }
        Ok(response)
    }

    /// Deltas carried by one `data:` payload of a streamed completion
    fn parse_stream_chunk(data: &str) -> Vec<Result<ChatDelta>> {
        let chunk: Value = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                return vec![Err(AppError::LlmError {
                    message: format!("Malformed stream chunk: {}", e),
                })]
            }
        };
        let Some(delta) = chunk
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("delta"))
        else {
            return Vec::new();
        };

        let mut deltas = Vec::new();
        if let Some(text) = delta
            .get("content")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
        {
            deltas.push(Ok(ChatDelta::Content(text.to_string())));
        }
        if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
            for call in calls {
                let function = &call["function"];
                deltas.push(Ok(ChatDelta::ToolCall(ToolCallDelta {
                    index: call.get("index").and_then(Value::as_u64).unwrap_or(0) as usize,
                    id: call.get("id").and_then(Value::as_str).map(str::to_string),
                    name: function.get("name").and_then(Value::as_str).map(str::to_string),
                    arguments: function
                        .get("arguments")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string(),
                })));
            }
        }
        deltas
    }
}

#[async_trait]
impl ChatModel for OpenAIChatModel {
    async fn chat(&self, messages: &[ChatMessage], tools: &[ToolSchema]) -> Result<ChatResponse> {
        let response = self.send(&self.request_body(messages, tools, false)).await?;

        let body: Value = response.json().await.map_err(|e| AppError::LlmError {
            message: format!("Failed to parse response: {}", e),
        })?;

        Self::parse_response(&body)
    }

    async fn chat_stream(&self, messages: &[ChatMessage], tools: &[ToolSchema]) -> Result<ChatStream> {
        let response = self.send(&self.request_body(messages, tools, true)).await?;

        let deltas = response
            .bytes_stream()
            .eventsource()
            .take_while(|event| {
                future::ready(!matches!(event, Ok(event) if event.data.trim() == "[DONE]"))
            })
            .flat_map(|event| {
                let items = match event {
                    Ok(event) => Self::parse_stream_chunk(&event.data),
                    Err(e) => vec![Err(AppError::LlmError {
                        message: format!("Stream read error: {}", e),
                    })],
                };
                stream::iter(items)
            })
            .boxed();
        Ok(deltas)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

type Handler = dyn Fn(&[ChatMessage], &[ToolSchema]) -> Result<ChatResponse> + Send + Sync;

/// Closure-driven chat model
pub struct MockChatModel {
    handler: Box<Handler>,
    calls: AtomicUsize,
}

impl MockChatModel {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&[ChatMessage], &[ToolSchema]) -> Result<ChatResponse> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: AtomicUsize::new(0),
        }
    }

    /// Always answers with the same text
    pub fn constant(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(move |_, _| Ok(ChatResponse::Content(text.clone())))
    }

    /// Number of completed `chat` calls
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatModel for MockChatModel {
    async fn chat(&self, messages: &[ChatMessage], tools: &[ToolSchema]) -> Result<ChatResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.handler)(messages, tools)
    }

    /// Text answers arrive word by word
    async fn chat_stream(&self, messages: &[ChatMessage], tools: &[ToolSchema]) -> Result<ChatStream> {
        let deltas = match self.chat(messages, tools).await? {
            ChatResponse::Content(text) => text
                .split_inclusive(' ')
                .map(|word| ChatDelta::Content(word.to_string()))
                .collect(),
            calls => calls.into_deltas(),
        };
        Ok(stream::iter(deltas.into_iter().map(Ok)).boxed())
    }

    fn model_name(&self) -> &str {
        "mock-chat"
    }
}

/// Create the chat model for `model` based on configuration
pub fn create_chat_model(
    config: &LlmConfig,
    model: &str,
    temperature: f32,
) -> Result<Arc<dyn ChatModel>> {
    match config.provider.as_str() {
        "openai" => {
            let key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
                message: "llm.api_key is required for the openai provider".to_string(),
            })?;
            Ok(Arc::new(OpenAIChatModel::new(
                key,
                model,
                temperature,
                config.api_base.clone(),
                Duration::from_secs(config.timeout_secs),
            )?))
        }
        "mock" => Ok(Arc::new(MockChatModel::constant(
            "No answer available in offline mode.",
        ))),
        other => Err(AppError::Configuration {
            message: format!("Unknown llm provider: {}", other),
        }),
    }
}

/// Strip a surrounding markdown code fence from a model answer
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tool_calls() {
        let body = json!({
            "choices": [{ "message": {
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": { "name": "clinical_guideline_engine", "arguments": "{\"input\":\"dose?\"}" }
                }]
            }}]
        });
        let parsed = OpenAIChatModel::parse_response(&body).unwrap();
        assert_eq!(
            parsed,
            ChatResponse::ToolCalls(vec![ToolCall {
                id: "call_1".into(),
                name: "clinical_guideline_engine".into(),
                arguments: "{\"input\":\"dose?\"}".into(),
            }])
        );
    }

    #[test]
    fn test_parse_content_and_missing_choices() {
        let body = json!({ "choices": [{ "message": { "content": "hi" } }] });
        assert_eq!(
            OpenAIChatModel::parse_response(&body).unwrap(),
            ChatResponse::Content("hi".into())
        );
        assert!(OpenAIChatModel::parse_response(&json!({})).is_err());
    }

    #[test]
    fn test_format_tool_result_message() {
        let formatted =
            OpenAIChatModel::format_messages(&[ChatMessage::tool_result("c1", "engine", "answer")]);
        assert_eq!(formatted[0]["role"], "tool");
        assert_eq!(formatted[0]["tool_call_id"], "c1");
        assert_eq!(formatted[0]["name"], "engine");
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fences("  [2] "), "[2]");
    }

    #[tokio::test]
    async fn test_mock_counts_calls() {
        let model = MockChatModel::constant("ok");
        assert_eq!(model.complete("q").await.unwrap(), "ok");
        assert_eq!(model.call_count(), 1);
    }

    #[test]
    fn test_parse_stream_chunks() {
        let content = OpenAIChatModel::parse_stream_chunk(
            r#"{"choices":[{"index":0,"delta":{"content":"Rev"}}]}"#,
        );
        assert_eq!(content.len(), 1);
        assert_eq!(content[0].as_ref().unwrap(), &ChatDelta::Content("Rev".into()));

        let role_only =
            OpenAIChatModel::parse_stream_chunk(r#"{"choices":[{"delta":{"role":"assistant","content":""}}]}"#);
        assert!(role_only.is_empty());

        assert!(OpenAIChatModel::parse_stream_chunk("not json")[0].is_err());
    }

    #[test]
    fn test_tool_call_fragments_reassemble() {
        let chunks = [
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"clinical_guideline_engine","arguments":""}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"input\":"}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"dose?\"}"}}]}}]}"#,
        ];
        let mut calls = ToolCallAccumulator::default();
        for chunk in chunks {
            for delta in OpenAIChatModel::parse_stream_chunk(chunk) {
                match delta.unwrap() {
                    ChatDelta::ToolCall(fragment) => calls.push(fragment),
                    other => panic!("unexpected delta {:?}", other),
                }
            }
        }
        assert_eq!(
            calls.finish(),
            vec![ToolCall {
                id: "call_1".into(),
                name: "clinical_guideline_engine".into(),
                arguments: "{\"input\":\"dose?\"}".into(),
            }]
        );
    }

    #[tokio::test]
    async fn test_mock_streams_words() {
        let model = MockChatModel::constant("net income rose");
        let deltas: Vec<ChatDelta> = model
            .chat_stream(&[ChatMessage::user("q")], &[])
            .await
            .unwrap()
            .map(|d| d.unwrap())
            .collect()
            .await;
        assert_eq!(
            deltas,
            vec![
                ChatDelta::Content("net ".into()),
                ChatDelta::Content("income ".into()),
                ChatDelta::Content("rose".into()),
            ]
        );
    }
}
