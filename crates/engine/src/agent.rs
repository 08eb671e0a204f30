//! Tool-calling chat agent
//!
//! Sends the conversation plus tool schemas to the chat model, executes the
//! tool calls it asks for and loops until it answers in text. The number of
//! tool-call rounds per turn is capped; past the cap the model is asked for
//! a final answer with tools disabled. `stream_chat` runs the same loop and
//! forwards the answer as it is generated.

use crate::composer::{QueryEngineTool, QueryResponse};
use crate::templates::NO_ANSWER;
use async_stream::try_stream;
use docchat_common::conversations::{MessageSubProcess, SubProcessSource};
use docchat_common::errors::Result;
use docchat_common::llm::{
    ChatDelta, ChatMessage, ChatModel, ChatResponse, ToolCall, ToolCallAccumulator, ToolSchema,
};
use docchat_common::metrics::record_tool_rounds;
use docchat_common::timeout::llm_deadline;
use docchat_index::ToolGroup;
use futures::future::join_all;
use futures::stream::{BoxStream, StreamExt};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub const DEFAULT_MAX_FUNCTION_CALLS: usize = 3;

const CAP_FALLBACK_ANSWER: &str = "I was unable to complete the answer within the allowed number of \
     tool calls. Here is what I found so far based on the tool results above.";

/// Result of one agent turn
#[derive(Debug, Clone)]
pub struct AgentResponse {
    pub content: String,
    /// Function calls, sub-questions and tool failures, in execution order
    pub sub_processes: Vec<MessageSubProcess>,
    /// Tool-call rounds used
    pub rounds: usize,
}

/// Item of a streamed agent turn
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// A tool call, sub-question or tool failure finished
    SubProcess(MessageSubProcess),
    /// Next piece of the answer
    Delta(String),
}

pub type AgentStream<'a> = BoxStream<'a, Result<AgentEvent>>;

pub struct ChatAgent {
    llm: Arc<dyn ChatModel>,
    tools: Vec<QueryEngineTool>,
    history: Vec<ChatMessage>,
    system_prompt: String,
    max_function_calls: usize,
    degraded_documents: Vec<Uuid>,
    llm_timeout: Duration,
}

impl ChatAgent {
    pub fn new(
        llm: Arc<dyn ChatModel>,
        tools: Vec<QueryEngineTool>,
        history: Vec<ChatMessage>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            tools,
            history,
            system_prompt: system_prompt.into(),
            max_function_calls: DEFAULT_MAX_FUNCTION_CALLS,
            degraded_documents: Vec::new(),
            llm_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_max_function_calls(mut self, max: usize) -> Self {
        self.max_function_calls = max;
        self
    }

    pub fn with_degraded_documents(mut self, ids: Vec<Uuid>) -> Self {
        self.degraded_documents = ids;
        self
    }

    pub fn with_llm_timeout(mut self, timeout: Duration) -> Self {
        self.llm_timeout = timeout;
        self
    }

    pub fn tools(&self) -> &[QueryEngineTool] {
        &self.tools
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn max_function_calls(&self) -> usize {
        self.max_function_calls
    }

    /// Documents whose index could not be loaded or built. They have no tool.
    pub fn degraded_documents(&self) -> &[Uuid] {
        &self.degraded_documents
    }

    /// Answer one user message
    #[instrument(skip(self, message), fields(tools = self.tools.len()))]
    pub async fn chat(&mut self, message: &str) -> Result<AgentResponse> {
        let schemas = self.tool_schemas();
        let mut messages = self.turn_messages(message);
        let mut sub_processes = Vec::new();
        let mut rounds = 0;
        let mut force_text = false;

        let content = loop {
            if force_text || rounds >= self.max_function_calls {
                if !force_text {
                    warn!(max = self.max_function_calls, "Tool-call cap reached, forcing text answer");
                }
                let response = llm_deadline(self.llm_timeout, self.llm.chat(&messages, &[])).await?;
                break match response {
                    ChatResponse::Content(text) => text,
                    ChatResponse::ToolCalls(_) => CAP_FALLBACK_ANSWER.to_string(),
                };
            }

            let response =
                llm_deadline(self.llm_timeout, self.llm.chat(&messages, &schemas)).await?;
            let tool_calls = match response {
                ChatResponse::Content(text) => break text,
                ChatResponse::ToolCalls(calls) if calls.is_empty() => {
                    warn!("Model sent an empty tool-call list, asking for text");
                    force_text = true;
                    continue;
                }
                ChatResponse::ToolCalls(calls) => calls,
            };

            rounds += 1;
            sub_processes.extend(self.run_tool_round(&mut messages, tool_calls, rounds).await);
        };

        let content = self.finish_turn(message, content, rounds);
        Ok(AgentResponse {
            content,
            sub_processes,
            rounds,
        })
    }

    /// Answer one user message, yielding tool traces as each round finishes
    /// and the answer as the model generates it.
    ///
    /// History is updated once the stream is drained.
    pub fn stream_chat<'a>(&'a mut self, message: &'a str) -> AgentStream<'a> {
        Box::pin(try_stream! {
            let schemas = self.tool_schemas();
            let mut messages = self.turn_messages(message);
            let mut rounds = 0;

            let content = loop {
                let forced = rounds >= self.max_function_calls;
                let tools: &[ToolSchema] = if forced { &[] } else { &schemas };
                let mut deltas =
                    llm_deadline(self.llm_timeout, self.llm.chat_stream(&messages, tools)).await?;

                let mut text = String::new();
                let mut calls = ToolCallAccumulator::default();
                while let Some(delta) = deltas.next().await {
                    match delta? {
                        ChatDelta::Content(chunk) => {
                            text.push_str(&chunk);
                            yield AgentEvent::Delta(chunk);
                        }
                        ChatDelta::ToolCall(fragment) => calls.push(fragment),
                    }
                }
                let tool_calls = calls.finish();

                if forced {
                    if tool_calls.is_empty() || !text.is_empty() {
                        break text;
                    }
                    yield AgentEvent::Delta(CAP_FALLBACK_ANSWER.to_string());
                    break CAP_FALLBACK_ANSWER.to_string();
                }
                if tool_calls.is_empty() {
                    break text;
                }

                rounds += 1;
                for record in self.run_tool_round(&mut messages, tool_calls, rounds).await {
                    yield AgentEvent::SubProcess(record);
                }
            };

            let streamed_nothing = content.trim().is_empty();
            let content = self.finish_turn(message, content, rounds);
            if streamed_nothing {
                yield AgentEvent::Delta(content);
            }
        })
    }

    fn tool_schemas(&self) -> Vec<ToolSchema> {
        self.tools.iter().map(|t| t.metadata.to_schema()).collect()
    }

    fn turn_messages(&self, message: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(ChatMessage::system(self.system_prompt.clone()));
        messages.extend(self.history.iter().cloned());
        messages.push(ChatMessage::user(message));
        messages
    }

    /// Execute one round of tool calls in group priority order and append
    /// the call and its results to `messages`.
    async fn run_tool_round(
        &self,
        messages: &mut Vec<ChatMessage>,
        mut tool_calls: Vec<ToolCall>,
        round: usize,
    ) -> Vec<MessageSubProcess> {
        tool_calls.sort_by_key(|call| group_rank(&call.name));
        info!(
            round,
            tools = ?tool_calls.iter().map(|c| &c.name).collect::<Vec<_>>(),
            "Executing tool calls"
        );

        messages.push(ChatMessage::assistant_tool_calls(tool_calls.clone()));
        let results = join_all(tool_calls.iter().map(|call| self.execute(call))).await;

        let mut sub_processes = Vec::new();
        for (call, (output, records)) in tool_calls.iter().zip(results) {
            messages.push(ChatMessage::tool_result(&call.id, &call.name, output));
            sub_processes.extend(records);
        }
        sub_processes
    }

    /// Record the turn in history. A blank answer becomes the no-answer text.
    fn finish_turn(&mut self, message: &str, content: String, rounds: usize) -> String {
        let content = if content.trim().is_empty() {
            warn!("Model produced an empty answer");
            NO_ANSWER.to_string()
        } else {
            content
        };

        record_tool_rounds(rounds, rounds >= self.max_function_calls);
        self.history.push(ChatMessage::user(message));
        self.history.push(ChatMessage::assistant(content.clone()));
        content
    }

    /// Run one tool call. Failures become tool output so the model can
    /// recover, plus an exception trace.
    async fn execute(&self, call: &ToolCall) -> (String, Vec<MessageSubProcess>) {
        let input = tool_input(&call.arguments);

        let Some(tool) = self.tools.iter().find(|t| t.name() == call.name) else {
            warn!(tool = %call.name, "Model called an unknown tool");
            let output = format!("Error: unknown tool '{}'", call.name);
            return (output.clone(), vec![exception(&call.name, &output)]);
        };

        match tool.engine.query(&input).await {
            Ok(response) => {
                let records = trace_records(&call.name, &input, &response);
                (response.response, records)
            }
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool call failed");
                let output = format!("Error: {}", e);
                (output.clone(), vec![exception(&call.name, &output)])
            }
        }
    }
}

/// Position in the group priority order; document tools sort last
fn group_rank(tool_name: &str) -> usize {
    ToolGroup::from_tool_name(tool_name)
        .and_then(|g| ToolGroup::PRIORITY.iter().position(|p| *p == g))
        .unwrap_or(ToolGroup::PRIORITY.len())
}

/// Question text from the call arguments. Accepts `{"input": ...}` or a bare
/// string.
fn tool_input(arguments: &str) -> String {
    match serde_json::from_str::<Value>(arguments) {
        Ok(Value::Object(map)) => match map.get("input") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => arguments.to_string(),
        },
        Ok(Value::String(s)) => s,
        _ => arguments.to_string(),
    }
}

fn trace_records(tool: &str, input: &str, response: &QueryResponse) -> Vec<MessageSubProcess> {
    let mut metadata = Map::new();
    metadata.insert("tool_name".into(), json!(tool));
    metadata.insert("input".into(), json!(input));
    metadata.insert("output".into(), json!(response.response));

    let mut records = vec![MessageSubProcess::finished(SubProcessSource::FunctionCall, metadata)];
    records.extend(response.qa_pairs.iter().map(MessageSubProcess::sub_question));
    records
}

fn exception(tool: &str, error: &str) -> MessageSubProcess {
    let mut metadata = Map::new();
    metadata.insert("tool_name".into(), json!(tool));
    metadata.insert("error".into(), json!(error));
    MessageSubProcess::finished(SubProcessSource::Exception, metadata)
}
