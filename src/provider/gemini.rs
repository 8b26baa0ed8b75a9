//! Gemini provider.
//!
//! Uses the generateContent API with function calling, SSE streaming, and
//! the built-in google_search grounding tool for web answers.

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
    Capabilities, Citation, CompleteRequest, ContinueRequest, ConverseRequest, GroundedAnswer,
    HistoryRole, Provider, STREAM_CHANNEL_CAPACITY, StreamEvent, ToolDefinition, Usage,
    drain_sse_lines,
};
use crate::error::{QuillError, Result};
use crate::message::Attachment;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const DEFAULT_MODEL: &str = "gemini-2.5-pro";
const REQUEST_TIMEOUT_SECS: u64 = 120;

pub struct GeminiProvider {
    client: HttpClient,
    api_key: String,
    model: String,
    capabilities: Capabilities,
}

impl GeminiProvider {
    pub fn new(api_key: String, model: Option<String>) -> Self {
        Self {
            client: HttpClient::new(),
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.into()),
            capabilities: Capabilities {
                supports_tools: true,
                supports_streaming: true,
                supports_grounded_search: true,
                supports_image_input: true,
                max_context_tokens: 1_000_000,
            },
        }
    }

    fn generate_url(&self) -> String {
        format!("{API_BASE}/{}:generateContent?key={}", self.model, self.api_key)
    }

    fn stream_url(&self) -> String {
        format!(
            "{API_BASE}/{}:streamGenerateContent?alt=sse&key={}",
            self.model, self.api_key
        )
    }

    fn attachment_parts(attachments: &[Attachment]) -> Vec<GeminiPart> {
        attachments
            .iter()
            .filter_map(|a| match a {
                Attachment::Image { name, data } => Some(GeminiPart::InlineData {
                    inline_data: GeminiInlineData {
                        mime_type: mime_for(name).into(),
                        data: BASE64.encode(data),
                    },
                }),
                // Note attachments are inlined into the input text upstream.
                Attachment::Note { .. } => None,
            })
            .collect()
    }

    fn history_contents(history: &[super::HistoryMessage]) -> Vec<GeminiContent> {
        history
            .iter()
            .map(|msg| GeminiContent {
                role: match msg.role {
                    HistoryRole::User => "user".into(),
                    HistoryRole::Assistant => "model".into(),
                },
                parts: vec![GeminiPart::Text {
                    text: msg.content.clone(),
                }],
            })
            .collect()
    }

    fn build_contents(request: &ConverseRequest) -> Vec<GeminiContent> {
        let mut contents = Self::history_contents(&request.history);

        let mut parts = vec![GeminiPart::Text {
            text: request.input.clone(),
        }];
        parts.extend(Self::attachment_parts(&request.attachments));
        contents.push(GeminiContent {
            role: "user".into(),
            parts,
        });

        contents
    }

    /// History plus the model's function calls and our function responses.
    fn build_tool_contents(request: &ContinueRequest) -> Vec<GeminiContent> {
        let mut contents = Self::history_contents(&request.history);

        contents.push(GeminiContent {
            role: "user".into(),
            parts: vec![GeminiPart::Text {
                text: request.input.clone(),
            }],
        });

        if !request.tool_outcomes.is_empty() {
            let calls = request
                .tool_outcomes
                .iter()
                .map(|outcome| GeminiPart::FunctionCall {
                    function_call: GeminiFunctionCall {
                        name: outcome.name.clone(),
                        args: Value::Object(Default::default()),
                    },
                })
                .collect();
            contents.push(GeminiContent {
                role: "model".into(),
                parts: calls,
            });

            let responses = request
                .tool_outcomes
                .iter()
                .map(|outcome| GeminiPart::FunctionResponse {
                    function_response: GeminiFunctionResponse {
                        name: outcome.name.clone(),
                        response: serde_json::json!({ "result": outcome.output }),
                    },
                })
                .collect();
            contents.push(GeminiContent {
                role: "user".into(),
                parts: responses,
            });
        }

        contents
    }

    fn build_tools(tools: &[ToolDefinition]) -> Option<Vec<GeminiTool>> {
        if tools.is_empty() {
            return None;
        }

        let declarations: Vec<GeminiFunctionDeclaration> = tools
            .iter()
            .map(|t| GeminiFunctionDeclaration {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.parameters.clone(),
            })
            .collect();

        Some(vec![GeminiTool {
            function_declarations: Some(declarations),
            google_search: None,
        }])
    }

    async fn make_request(&self, api_request: &GeminiRequest) -> Result<GeminiResponse> {
        let response = self
            .client
            .post(self.generate_url())
            .json(api_request)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| QuillError::Provider(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(QuillError::Provider(format!(
                "Gemini API error: {status} - {body}"
            )));
        }

        let api_response: GeminiResponse = response
            .json()
            .await
            .map_err(|e| QuillError::Provider(e.to_string()))?;

        if let Some(error) = &api_response.error {
            return Err(QuillError::Provider(format!(
                "Gemini error: {}",
                error.message
            )));
        }

        Ok(api_response)
    }

    /// Stream an already-built request, translating SSE lines into events.
    async fn spawn_stream(&self, api_request: GeminiRequest) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let url = self.stream_url();
        let client = self.client.clone();

        tokio::spawn(async move {
            let response = match client.post(&url).json(&api_request).send().await {
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
                        "Gemini API error: {status} - {body}"
                    )))
                    .await;
                return;
            }

            let mut stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut tool_call_count = 0u32;

            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(bytes) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        for data in drain_sse_lines(&mut buffer) {
                            let Ok(response) = serde_json::from_str::<GeminiResponse>(&data)
                            else {
                                continue;
                            };
                            if let Some(candidates) = response.candidates {
                                for candidate in candidates {
                                    for part in candidate.content.parts {
                                        if let Some(text) = part.text {
                                            let _ = tx.send(StreamEvent::TextDelta(text)).await;
                                        }
                                        if let Some(fc) = part.function_call {
                                            let id = format!("gemini-{tool_call_count}");
                                            tool_call_count += 1;
                                            let _ = tx
                                                .send(StreamEvent::ToolCall {
                                                    id,
                                                    name: fc.name,
                                                    args: fc.args,
                                                })
                                                .await;
                                        }
                                    }
                                }
                            }
                            if let Some(usage) = response.usage_metadata {
                                let _ = tx
                                    .send(StreamEvent::Usage(Usage {
                                        input_tokens: usage.prompt_token_count.unwrap_or(0),
                                        output_tokens: usage.candidates_token_count.unwrap_or(0),
                                    }))
                                    .await;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(StreamEvent::Error(e.to_string())).await;
                        return;
                    }
                }
            }

            let _ = tx.send(StreamEvent::Done).await;
        });

        rx
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    async fn complete(&self, request: CompleteRequest) -> Result<String> {
        let mut parts = vec![GeminiPart::Text {
            text: request.input.clone(),
        }];
        parts.extend(Self::attachment_parts(&request.attachments));

        let api_request = GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".into(),
                parts,
            }],
            system_instruction: Some(GeminiSystemInstruction {
                parts: vec![GeminiTextPart {
                    text: request.system,
                }],
            }),
            tools: None,
        };

        let response = self.make_request(&api_request).await?;
        Ok(response.text())
    }

    async fn converse(&self, request: ConverseRequest) -> Result<mpsc::Receiver<StreamEvent>> {
        let api_request = GeminiRequest {
            contents: Self::build_contents(&request),
            system_instruction: Some(GeminiSystemInstruction {
                parts: vec![GeminiTextPart {
                    text: request.system.clone(),
                }],
            }),
            tools: Self::build_tools(&request.tools),
        };

        Ok(self.spawn_stream(api_request).await)
    }

    async fn continue_with_tools(
        &self,
        request: ContinueRequest,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        let api_request = GeminiRequest {
            contents: Self::build_tool_contents(&request),
            system_instruction: Some(GeminiSystemInstruction {
                parts: vec![GeminiTextPart {
                    text: request.system.clone(),
                }],
            }),
            tools: Self::build_tools(&request.tools),
        };

        Ok(self.spawn_stream(api_request).await)
    }

    async fn grounded_search(&self, query: &str) -> Result<GroundedAnswer> {
        let api_request = GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".into(),
                parts: vec![GeminiPart::Text { text: query.into() }],
            }],
            system_instruction: None,
            tools: Some(vec![GeminiTool {
                function_declarations: None,
                google_search: Some(serde_json::json!({})),
            }]),
        };

        let response = self.make_request(&api_request).await?;
        let text = response.text();
        let citations = response.citations();
        Ok(GroundedAnswer { text, citations })
    }
}

fn mime_for(name: &str) -> &'static str {
    match name.rsplit('.').next().map(str::to_lowercase).as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/png",
    }
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<GeminiTool>>,
}

#[derive(Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiTextPart>,
}

#[derive(Serialize, Clone)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Clone)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData,
    },
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: GeminiFunctionCall,
    },
    FunctionResponse {
        #[serde(rename = "functionResponse")]
        function_response: GeminiFunctionResponse,
    },
}

#[derive(Serialize, Clone)]
struct GeminiInlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Serialize, Deserialize, Clone)]
struct GeminiFunctionCall {
    name: String,
    args: Value,
}

#[derive(Serialize, Clone)]
struct GeminiFunctionResponse {
    name: String,
    response: Value,
}

#[derive(Serialize)]
struct GeminiTool {
    #[serde(rename = "functionDeclarations", skip_serializing_if = "Option::is_none")]
    function_declarations: Option<Vec<GeminiFunctionDeclaration>>,
    #[serde(rename = "googleSearch", skip_serializing_if = "Option::is_none")]
    google_search: Option<Value>,
}

#[derive(Serialize)]
struct GeminiFunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Serialize)]
struct GeminiTextPart {
    text: String,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<GeminiUsage>,
    error: Option<GeminiError>,
}

impl GeminiResponse {
    fn text(&self) -> String {
        let mut text = String::new();
        if let Some(candidates) = &self.candidates {
            for candidate in candidates {
                for part in &candidate.content.parts {
                    if let Some(t) = &part.text {
                        text.push_str(t);
                    }
                }
            }
        }
        text
    }

    fn citations(&self) -> Vec<Citation> {
        let mut citations = Vec::new();
        if let Some(candidates) = &self.candidates {
            for candidate in candidates {
                let Some(metadata) = &candidate.grounding_metadata else {
                    continue;
                };
                let Some(chunks) = metadata.get("groundingChunks").and_then(Value::as_array)
                else {
                    continue;
                };
                for chunk in chunks {
                    let Some(web) = chunk.get("web") else { continue };
                    citations.push(Citation {
                        title: web
                            .get("title")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        url: web
                            .get("uri")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    });
                }
            }
        }
        citations
    }
}

#[derive(Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: GeminiContentResponse,
    #[serde(rename = "groundingMetadata")]
    grounding_metadata: Option<Value>,
}

#[derive(Deserialize, Default)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Deserialize)]
struct GeminiPartResponse {
    text: Option<String>,
    #[serde(rename = "functionCall")]
    function_call: Option<GeminiFunctionCall>,
}

#[derive(Deserialize)]
struct GeminiUsage {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: Option<u32>,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: Option<u32>,
}

#[derive(Deserialize)]
struct GeminiError {
    message: String,
}
