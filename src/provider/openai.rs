//! OpenAI provider.
//!
//! Chat completions API with SSE streaming. Tool-call arguments arrive as
//! fragment deltas; they are assembled here and surfaced as complete
//! [`StreamEvent::ToolCall`]s once the stream finishes.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::StreamExt;
use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;

use async_trait::async_trait;

use super::{
    Capabilities, CompleteRequest, ContinueRequest, ConverseRequest, HistoryRole, Provider,
    STREAM_CHANNEL_CAPACITY, StreamEvent, ToolDefinition, ToolOutcome, Usage, drain_sse_lines,
};
use crate::error::{QuillError, Result};
use crate::message::Attachment;

const API_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o";
const REQUEST_TIMEOUT_SECS: u64 = 120;

pub struct OpenAiProvider {
    client: HttpClient,
    api_key: String,
    model: String,
    capabilities: Capabilities,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: Option<String>) -> Self {
        Self {
            client: HttpClient::new(),
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.into()),
            capabilities: Capabilities {
                supports_tools: true,
                supports_streaming: true,
                supports_grounded_search: false,
                supports_image_input: true,
                max_context_tokens: 128_000,
            },
        }
    }

    fn history_messages(
        system: &str,
        history: &[super::HistoryMessage],
    ) -> Vec<OpenAiMessage> {
        let mut messages = vec![OpenAiMessage::text("system", system)];
        for msg in history {
            let role = match msg.role {
                HistoryRole::User => "user",
                HistoryRole::Assistant => "assistant",
            };
            messages.push(OpenAiMessage::text(role, &msg.content));
        }
        messages
    }

    fn user_message(input: &str, attachments: &[Attachment]) -> OpenAiMessage {
        let images: Vec<&Attachment> = attachments
            .iter()
            .filter(|a| matches!(a, Attachment::Image { .. }))
            .collect();
        if images.is_empty() {
            return OpenAiMessage::text("user", input);
        }

        let mut parts = vec![serde_json::json!({ "type": "text", "text": input })];
        for attachment in images {
            if let Attachment::Image { name, data } = attachment {
                let mime = match name.rsplit('.').next().map(str::to_lowercase).as_deref() {
                    Some("jpg") | Some("jpeg") => "image/jpeg",
                    Some("gif") => "image/gif",
                    Some("webp") => "image/webp",
                    _ => "image/png",
                };
                parts.push(serde_json::json!({
                    "type": "image_url",
                    "image_url": { "url": format!("data:{mime};base64,{}", BASE64.encode(data)) }
                }));
            }
        }
        OpenAiMessage {
            role: "user".into(),
            content: Some(Value::Array(parts)),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    fn convert_tools(tools: &[ToolDefinition]) -> Option<Vec<OpenAiTool>> {
        if tools.is_empty() {
            return None;
        }
        Some(
            tools
                .iter()
                .map(|t| OpenAiTool {
                    tool_type: "function".into(),
                    function: OpenAiFunction {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.parameters.clone(),
                    },
                })
                .collect(),
        )
    }

    /// Assistant tool-call echo plus one `tool` message per outcome.
    fn tool_messages(outcomes: &[ToolOutcome]) -> Vec<OpenAiMessage> {
        let mut messages = Vec::new();
        let calls: Vec<Value> = outcomes
            .iter()
            .map(|o| {
                serde_json::json!({
                    "id": o.call_id,
                    "type": "function",
                    "function": { "name": o.name, "arguments": "{}" }
                })
            })
            .collect();
        messages.push(OpenAiMessage {
            role: "assistant".into(),
            content: None,
            tool_calls: Some(calls),
            tool_call_id: None,
        });
        for outcome in outcomes {
            messages.push(OpenAiMessage {
                role: "tool".into(),
                content: Some(Value::String(outcome.output.clone())),
                tool_calls: None,
                tool_call_id: Some(outcome.call_id.clone()),
            });
        }
        messages
    }

    async fn spawn_stream(&self, api_request: OpenAiRequest) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let client = self.client.clone();
        let api_key = self.api_key.clone();

        tokio::spawn(async move {
            let response = match client
                .post(API_URL)
                .bearer_auth(&api_key)
                .json(&api_request)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    let _ = tx.send(StreamEvent::Error(e.to_string())).await;
                    return;
                }
            };

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                let _ = tx
                    .send(StreamEvent::Error(format!(
                        "OpenAI API error: {status} - {body}"
                    )))
                    .await;
                return;
            }

            let mut stream = response.bytes_stream();
            let mut buffer = String::new();
            // Tool calls assembled from deltas, keyed by stream index.
            let mut pending_calls: Vec<PendingCall> = Vec::new();
            let mut usage: Option<Usage> = None;
            let mut finished = false;

            'outer: while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(bytes) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        for data in drain_sse_lines(&mut buffer) {
                            if data == "[DONE]" {
                                finished = true;
                                break 'outer;
                            }
                            let Ok(chunk) = serde_json::from_str::<OpenAiChunk>(&data) else {
                                continue;
                            };
                            if let Some(u) = chunk.usage {
                                usage = Some(Usage {
                                    input_tokens: u.prompt_tokens,
                                    output_tokens: u.completion_tokens,
                                });
                            }
                            for choice in chunk.choices {
                                if let Some(text) = choice.delta.content
                                    && !text.is_empty()
                                {
                                    let _ = tx.send(StreamEvent::TextDelta(text)).await;
                                }
                                for delta in choice.delta.tool_calls.unwrap_or_default() {
                                    let index = delta.index;
                                    while pending_calls.len() <= index {
                                        pending_calls.push(PendingCall::default());
                                    }
                                    let call = &mut pending_calls[index];
                                    if let Some(id) = delta.id {
                                        call.id = id;
                                    }
                                    if let Some(function) = delta.function {
                                        if let Some(name) = function.name {
                                            call.name = name;
                                        }
                                        if let Some(arguments) = function.arguments {
                                            call.arguments.push_str(&arguments);
                                        }
                                    }
                                }
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(StreamEvent::Error(e.to_string())).await;
                        return;
                    }
                }
            }

            if !finished {
                let _ = tx
                    .send(StreamEvent::Error(
                        "stream closed before completion marker".into(),
                    ))
                    .await;
                return;
            }

            for call in pending_calls {
                let args = serde_json::from_str(&call.arguments)
                    .unwrap_or(Value::Object(Default::default()));
                let _ = tx
                    .send(StreamEvent::ToolCall {
                        id: call.id,
                        name: call.name,
                        args,
                    })
                    .await;
            }
            if let Some(usage) = usage {
                let _ = tx.send(StreamEvent::Usage(usage)).await;
            }
            let _ = tx.send(StreamEvent::Done).await;
        });

        rx
    }
}

#[derive(Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    async fn complete(&self, request: CompleteRequest) -> Result<String> {
        let mut messages = vec![OpenAiMessage::text("system", &request.system)];
        messages.push(Self::user_message(&request.input, &request.attachments));

        let api_request = OpenAiRequest {
            model: self.model.clone(),
            messages,
            tools: None,
            stream: false,
            stream_options: None,
        };

        let response = self
            .client
            .post(API_URL)
            .bearer_auth(&self.api_key)
            .json(&api_request)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| QuillError::Provider(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(QuillError::Provider(format!(
                "OpenAI API error: {status} - {body}"
            )));
        }

        let parsed: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| QuillError::Provider(e.to_string()))?;

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }

    async fn converse(&self, request: ConverseRequest) -> Result<mpsc::Receiver<StreamEvent>> {
        let mut messages = Self::history_messages(&request.system, &request.history);
        messages.push(Self::user_message(&request.input, &request.attachments));

        let api_request = OpenAiRequest {
            model: self.model.clone(),
            messages,
            tools: Self::convert_tools(&request.tools),
            stream: true,
            stream_options: Some(serde_json::json!({ "include_usage": true })),
        };

        Ok(self.spawn_stream(api_request).await)
    }

    async fn continue_with_tools(
        &self,
        request: ContinueRequest,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        let mut messages = Self::history_messages(&request.system, &request.history);
        messages.push(OpenAiMessage::text("user", &request.input));
        messages.extend(Self::tool_messages(&request.tool_outcomes));

        let api_request = OpenAiRequest {
            model: self.model.clone(),
            messages,
            tools: Self::convert_tools(&request.tools),
            stream: true,
            stream_options: Some(serde_json::json!({ "include_usage": true })),
        };

        Ok(self.spawn_stream(api_request).await)
    }
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAiTool>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<Value>,
}

#[derive(Serialize)]
struct OpenAiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl OpenAiMessage {
    fn text(role: &str, content: &str) -> Self {
        Self {
            role: role.into(),
            content: Some(Value::String(content.into())),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Serialize)]
struct OpenAiTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: OpenAiFunction,
}

#[derive(Serialize)]
struct OpenAiFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
}

#[derive(Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiChunk {
    #[serde(default)]
    choices: Vec<OpenAiChunkChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChunkChoice {
    delta: OpenAiDelta,
}

#[derive(Deserialize)]
struct OpenAiDelta {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiToolCallDelta>>,
}

#[derive(Deserialize)]
struct OpenAiToolCallDelta {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<OpenAiFunctionDelta>,
}

#[derive(Deserialize)]
struct OpenAiFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}
