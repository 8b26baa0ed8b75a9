//! Provider abstraction over hosted model backends.
//!
//! One capability surface for Gemini, OpenAI, and Anthropic:
//! - single-shot completion (note writing, captioning, chat titles)
//! - streamed conversation with tool calling
//! - tool-result continuation per each backend's own multi-turn protocol
//!
//! Streamed output travels over an mpsc channel of [`StreamEvent`]s.
//! `Done` is an explicit terminal event; a channel that closes without one
//! means the transport broke.

mod anthropic;
mod gemini;
mod openai;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::config::{ProviderKind, Settings};
use crate::error::{QuillError, Result};
use crate::message::Attachment;

/// Hard upper bound for single-shot (non-streamed) calls.
pub const COMPLETE_TIMEOUT: Duration = Duration::from_secs(15);

/// Channel capacity for streamed events.
pub(crate) const STREAM_CHANNEL_CAPACITY: usize = 100;

/// A tool schema as presented to the model.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Role of a prior turn in provider-facing history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryRole {
    User,
    Assistant,
}

/// One prior turn, already flattened to text.
#[derive(Debug, Clone)]
pub struct HistoryMessage {
    pub role: HistoryRole,
    pub content: String,
}

/// Single-shot request: system instructions plus user content.
#[derive(Debug, Clone, Default)]
pub struct CompleteRequest {
    pub system: String,
    pub input: String,
    pub attachments: Vec<Attachment>,
}

impl CompleteRequest {
    pub fn new(system: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            input: input.into(),
            attachments: Vec::new(),
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }
}

/// Streamed conversation request.
#[derive(Debug, Clone, Default)]
pub struct ConverseRequest {
    pub system: String,
    pub history: Vec<HistoryMessage>,
    pub input: String,
    pub attachments: Vec<Attachment>,
    /// Session correlator from the chat log header; empty starts fresh.
    pub thread_id: String,
    pub tools: Vec<ToolDefinition>,
}

/// A resolved tool call fed back to the model.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub call_id: String,
    pub name: String,
    pub output: String,
}

/// Continuation request carrying tool outcomes.
#[derive(Debug, Clone, Default)]
pub struct ContinueRequest {
    pub system: String,
    pub history: Vec<HistoryMessage>,
    pub input: String,
    pub thread_id: String,
    pub tools: Vec<ToolDefinition>,
    pub tool_outcomes: Vec<ToolOutcome>,
}

/// Token usage reported by a provider, where the API exposes it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// One element of a streamed response. Chunks and tool-call requests arrive
/// in generation order.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    TextDelta(String),
    ToolCall { id: String, name: String, args: Value },
    Usage(Usage),
    Done,
    Error(String),
}

/// Web answer produced through a provider's grounding capability.
#[derive(Debug, Clone, Default)]
pub struct GroundedAnswer {
    pub text: String,
    pub citations: Vec<Citation>,
}

#[derive(Debug, Clone)]
pub struct Citation {
    pub title: String,
    pub url: String,
}

/// What a backend supports.
#[derive(Debug, Clone)]
pub struct Capabilities {
    pub supports_tools: bool,
    pub supports_streaming: bool,
    pub supports_grounded_search: bool,
    pub supports_image_input: bool,
    pub max_context_tokens: u32,
}

/// Unified provider trait for LLM backends.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name for logging.
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> &Capabilities;

    /// Single-shot, non-streamed completion. Callers wrap this in
    /// [`complete_with_timeout`]; implementations do not time-bound it
    /// themselves.
    async fn complete(&self, request: CompleteRequest) -> Result<String>;

    /// Start a streamed conversation.
    async fn converse(&self, request: ConverseRequest) -> Result<mpsc::Receiver<StreamEvent>>;

    /// Continue a conversation with tool results.
    async fn continue_with_tools(
        &self,
        request: ContinueRequest,
    ) -> Result<mpsc::Receiver<StreamEvent>>;

    /// Grounded web search. Backends without the capability return a
    /// provider error, which tool dispatch converts to a failed result.
    async fn grounded_search(&self, _query: &str) -> Result<GroundedAnswer> {
        Err(QuillError::Provider(format!(
            "{} does not support grounded search",
            self.name()
        )))
    }
}

/// Run a single-shot completion under the hard timeout.
pub async fn complete_with_timeout(
    provider: &dyn Provider,
    request: CompleteRequest,
) -> Result<String> {
    match tokio::time::timeout(COMPLETE_TIMEOUT, provider.complete(request)).await {
        Ok(result) => result,
        Err(_) => Err(QuillError::ModelTimeout(COMPLETE_TIMEOUT)),
    }
}

/// Build the configured provider from settings.
pub fn build_provider(settings: &Settings) -> Result<Arc<dyn Provider>> {
    let api_key = settings
        .api_key()
        .ok_or_else(|| QuillError::Provider("no API key configured".into()))?;

    Ok(match settings.provider {
        ProviderKind::Gemini => Arc::new(GeminiProvider::new(api_key, settings.model.clone())),
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(api_key, settings.model.clone())),
        ProviderKind::Anthropic => {
            Arc::new(AnthropicProvider::new(api_key, settings.model.clone()))
        }
    })
}

/// Extract `data: ` payloads from an SSE byte buffer, returning complete
/// lines and leaving any partial tail in the buffer.
pub(crate) fn drain_sse_lines(buffer: &mut String) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(line_end) = buffer.find('\n') {
        let line = buffer[..line_end].trim_end_matches('\r').to_string();
        buffer.replace_range(..=line_end, "");
        if let Some(data) = line.strip_prefix("data: ") {
            lines.push(data.to_string());
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_sse_lines_keeps_partial_tail() {
        let mut buffer = "data: one\nignored\ndata: two\ndata: par".to_string();
        let lines = drain_sse_lines(&mut buffer);
        assert_eq!(lines, vec!["one".to_string(), "two".to_string()]);
        assert_eq!(buffer, "data: par");
    }

    #[tokio::test]
    async fn test_complete_timeout_fires() {
        struct SlowProvider {
            capabilities: Capabilities,
        }

        #[async_trait]
        impl Provider for SlowProvider {
            fn name(&self) -> &'static str {
                "slow"
            }
            fn capabilities(&self) -> &Capabilities {
                &self.capabilities
            }
            async fn complete(&self, _request: CompleteRequest) -> Result<String> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(String::new())
            }
            async fn converse(
                &self,
                _request: ConverseRequest,
            ) -> Result<mpsc::Receiver<StreamEvent>> {
                unimplemented!()
            }
            async fn continue_with_tools(
                &self,
                _request: ContinueRequest,
            ) -> Result<mpsc::Receiver<StreamEvent>> {
                unimplemented!()
            }
        }

        tokio::time::pause();
        let provider = SlowProvider {
            capabilities: Capabilities {
                supports_tools: false,
                supports_streaming: false,
                supports_grounded_search: false,
                supports_image_input: false,
                max_context_tokens: 0,
            },
        };
        let result = complete_with_timeout(&provider, CompleteRequest::default()).await;
        assert!(matches!(result, Err(QuillError::ModelTimeout(_))));
    }
}
