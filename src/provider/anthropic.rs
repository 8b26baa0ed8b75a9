//! Anthropic provider.
//!
//! Messages API with SSE streaming. Text deltas stream through as they
//! arrive; `tool_use` blocks accumulate their input JSON and surface as one
//! [`StreamEvent::ToolCall`] when the block closes.

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

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
const DEFAULT_MAX_TOKENS: u32 = 8192;
const REQUEST_TIMEOUT_SECS: u64 = 120;

pub struct AnthropicProvider {
    client: HttpClient,
    api_key: String,
    model: String,
    capabilities: Capabilities,
}

impl AnthropicProvider {
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
                max_context_tokens: 200_000,
            },
        }
    }

    fn history_messages(history: &[super::HistoryMessage]) -> Vec<AnthropicMessage> {
        history
            .iter()
            .map(|msg| AnthropicMessage {
                role: match msg.role {
                    HistoryRole::User => "user".into(),
                    HistoryRole::Assistant => "assistant".into(),
                },
                content: Value::String(msg.content.clone()),
            })
            .collect()
    }

    fn user_message(input: &str, attachments: &[Attachment]) -> AnthropicMessage {
        let images: Vec<&Attachment> = attachments
            .iter()
            .filter(|a| matches!(a, Attachment::Image { .. }))
            .collect();
        if images.is_empty() {
            return AnthropicMessage {
                role: "user".into(),
                content: Value::String(input.into()),
            };
        }

        let mut blocks = Vec::new();
        for attachment in images {
            if let Attachment::Image { name, data } = attachment {
                let media_type = match name.rsplit('.').next().map(str::to_lowercase).as_deref() {
                    Some("jpg") | Some("jpeg") => "image/jpeg",
                    Some("gif") => "image/gif",
                    Some("webp") => "image/webp",
                    _ => "image/png",
                };
                blocks.push(serde_json::json!({
                    "type": "image",
                    "source": {
                        "type": "base64",
                        "media_type": media_type,
                        "data": BASE64.encode(data),
                    }
                }));
            }
        }
        blocks.push(serde_json::json!({ "type": "text", "text": input }));
        AnthropicMessage {
            role: "user".into(),
            content: Value::Array(blocks),
        }
    }

    fn convert_tools(tools: &[ToolDefinition]) -> Option<Vec<AnthropicTool>> {
        if tools.is_empty() {
            return None;
        }
        Some(
            tools
                .iter()
                .map(|t| AnthropicTool {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    input_schema: t.parameters.clone(),
                })
                .collect(),
        )
    }

    /// Assistant `tool_use` echo plus a user `tool_result` message.
    fn tool_messages(outcomes: &[ToolOutcome]) -> Vec<AnthropicMessage> {
        let uses: Vec<Value> = outcomes
            .iter()
            .map(|o| {
                serde_json::json!({
                    "type": "tool_use",
                    "id": o.call_id,
                    "name": o.name,
                    "input": {},
                })
            })
            .collect();
        let results: Vec<Value> = outcomes
            .iter()
            .map(|o| {
                serde_json::json!({
                    "type": "tool_result",
                    "tool_use_id": o.call_id,
                    "content": o.output,
                })
            })
            .collect();
        vec![
            AnthropicMessage {
                role: "assistant".into(),
                content: Value::Array(uses),
            },
            AnthropicMessage {
                role: "user".into(),
                content: Value::Array(results),
            },
        ]
    }

    async fn spawn_stream(&self, api_request: AnthropicRequest) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let client = self.client.clone();
        let api_key = self.api_key.clone();

        tokio::spawn(async move {
            let response = match client
                .post(API_URL)
                .header("x-api-key", &api_key)
                .header("anthropic-version", API_VERSION)
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
                        "Anthropic API error: {status} - {body}"
                    )))
                    .await;
                return;
            }

            let mut stream = response.bytes_stream();
            let mut buffer = String::new();
            // Open content blocks keyed by stream index.
            let mut blocks: Vec<Option<ToolUseBlock>> = Vec::new();
            let mut usage = Usage::default();
            let mut stopped = false;

            'outer: while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(bytes) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        for data in drain_sse_lines(&mut buffer) {
                            let Ok(event) = serde_json::from_str::<Value>(&data) else {
                                continue;
                            };
                            match event.get("type").and_then(Value::as_str) {
                                Some("message_start") => {
                                    if let Some(n) = event
                                        .pointer("/message/usage/input_tokens")
                                        .and_then(Value::as_u64)
                                    {
                                        usage.input_tokens = n as u32;
                                    }
                                }
                                Some("content_block_start") => {
                                    let index = block_index(&event);
                                    while blocks.len() <= index {
                                        blocks.push(None);
                                    }
                                    if event.pointer("/content_block/type").and_then(Value::as_str)
                                        == Some("tool_use")
                                    {
                                        blocks[index] = Some(ToolUseBlock {
                                            id: str_at(&event, "/content_block/id"),
                                            name: str_at(&event, "/content_block/name"),
                                            input_json: String::new(),
                                        });
                                    }
                                }
                                Some("content_block_delta") => {
                                    let index = block_index(&event);
                                    match event.pointer("/delta/type").and_then(Value::as_str) {
                                        Some("text_delta") => {
                                            let text = str_at(&event, "/delta/text");
                                            if !text.is_empty() {
                                                let _ =
                                                    tx.send(StreamEvent::TextDelta(text)).await;
                                            }
                                        }
                                        Some("input_json_delta") => {
                                            if let Some(Some(block)) = blocks.get_mut(index) {
                                                block.input_json.push_str(&str_at(
                                                    &event,
                                                    "/delta/partial_json",
                                                ));
                                            }
                                        }
                                        _ => {}
                                    }
                                }
                                Some("content_block_stop") => {
                                    let index = block_index(&event);
                                    if let Some(slot) = blocks.get_mut(index)
                                        && let Some(block) = slot.take()
                                    {
                                        let args = serde_json::from_str(&block.input_json)
                                            .unwrap_or(Value::Object(Default::default()));
                                        let _ = tx
                                            .send(StreamEvent::ToolCall {
                                                id: block.id,
                                                name: block.name,
                                                args,
                                            })
                                            .await;
                                    }
                                }
                                Some("message_delta") => {
                                    if let Some(n) = event
                                        .pointer("/usage/output_tokens")
                                        .and_then(Value::as_u64)
                                    {
                                        usage.output_tokens = n as u32;
                                    }
                                }
                                Some("message_stop") => {
                                    stopped = true;
                                    break 'outer;
                                }
                                Some("error") => {
                                    let message = str_at(&event, "/error/message");
                                    let _ = tx.send(StreamEvent::Error(message)).await;
                                    return;
                                }
                                _ => {}
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(StreamEvent::Error(e.to_string())).await;
                        return;
                    }
                }
            }

            if !stopped {
                let _ = tx
                    .send(StreamEvent::Error("stream closed before message_stop".into()))
                    .await;
                return;
            }

            let _ = tx.send(StreamEvent::Usage(usage)).await;
            let _ = tx.send(StreamEvent::Done).await;
        });

        rx
    }
}

struct ToolUseBlock {
    id: String,
    name: String,
    input_json: String,
}

fn block_index(event: &Value) -> usize {
    event.get("index").and_then(Value::as_u64).unwrap_or(0) as usize
}

fn str_at(event: &Value, pointer: &str) -> String {
    event
        .pointer(pointer)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    async fn complete(&self, request: CompleteRequest) -> Result<String> {
        let api_request = AnthropicRequest {
            model: self.model.clone(),
            max_tokens: DEFAULT_MAX_TOKENS,
            system: Some(request.system.clone()),
            messages: vec![Self::user_message(&request.input, &request.attachments)],
            tools: None,
            stream: false,
        };

        let response = self
            .client
            .post(API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&api_request)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| QuillError::Provider(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(QuillError::Provider(format!(
                "Anthropic API error: {status} - {body}"
            )));
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|e| QuillError::Provider(e.to_string()))?;

        let mut text = String::new();
        if let Some(content) = parsed.get("content").and_then(Value::as_array) {
            for block in content {
                if block.get("type").and_then(Value::as_str) == Some("text")
                    && let Some(t) = block.get("text").and_then(Value::as_str)
                {
                    text.push_str(t);
                }
            }
        }
        Ok(text)
    }

    async fn converse(&self, request: ConverseRequest) -> Result<mpsc::Receiver<StreamEvent>> {
        let mut messages = Self::history_messages(&request.history);
        messages.push(Self::user_message(&request.input, &request.attachments));

        let api_request = AnthropicRequest {
            model: self.model.clone(),
            max_tokens: DEFAULT_MAX_TOKENS,
            system: Some(request.system.clone()),
            messages,
            tools: Self::convert_tools(&request.tools),
            stream: true,
        };

        Ok(self.spawn_stream(api_request).await)
    }

    async fn continue_with_tools(
        &self,
        request: ContinueRequest,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        let mut messages = Self::history_messages(&request.history);
        messages.push(AnthropicMessage {
            role: "user".into(),
            content: Value::String(request.input.clone()),
        });
        messages.extend(Self::tool_messages(&request.tool_outcomes));

        let api_request = AnthropicRequest {
            model: self.model.clone(),
            max_tokens: DEFAULT_MAX_TOKENS,
            system: Some(request.system.clone()),
            messages,
            tools: Self::convert_tools(&request.tools),
            stream: true,
        };

        Ok(self.spawn_stream(api_request).await)
    }
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool>>,
    stream: bool,
}

#[derive(Serialize)]
struct AnthropicMessage {
    role: String,
    content: Value,
}

#[derive(Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: Value,
}
