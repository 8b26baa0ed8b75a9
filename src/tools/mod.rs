//! Tool registry and dispatch.
//!
//! A fixed catalog of schema-validated vault operations. Dispatch is a
//! total function: unknown names, invalid arguments, and handler failures
//! all come back as failed [`ToolResult`]s for the model to react to —
//! nothing in here throws across the orchestrator boundary.

mod dates;
mod definitions;
mod note;
mod schema;
mod vault_ops;
mod web;

pub use dates::{DateWindow, parse_date_range};
pub use schema::{ArgKind, ArgSpec, ToolSpec};

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::debug;

use crate::config::Settings;
use crate::provider::{Provider, ToolDefinition};
use crate::vault::Vault;

use note::NoteTools;
use vault_ops::VaultOps;
use web::WebTools;

/// Byte cap on a tool result fed back into the model context.
const INLINE_RESULT_CAP: usize = 16 * 1024;

/// Outcome of one tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub success: bool,
    pub response: Option<Value>,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(response: Value) -> Self {
        Self {
            success: true,
            response: Some(response),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            response: None,
            error: Some(message.into()),
        }
    }

    /// Structured payload stored in the chat log.
    pub fn to_value(&self) -> Value {
        match (&self.response, &self.error) {
            (Some(response), _) => json!({ "success": self.success, "response": response }),
            (None, Some(error)) => json!({ "success": false, "error": error }),
            (None, None) => json!({ "success": self.success }),
        }
    }

    /// Serialized form fed back to the model, truncated so one oversized
    /// result cannot blow up the context.
    pub fn bounded_output(&self) -> String {
        let mut output = self.to_value().to_string();
        if output.len() > INLINE_RESULT_CAP {
            let cut = floor_char_boundary(&output, INLINE_RESULT_CAP);
            output.truncate(cut);
            output.push_str("… [result truncated]");
        }
        output
    }
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut index = index.min(text.len());
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// The fixed catalog plus everything handlers need to run.
///
/// Tools read and write the vault directly but never touch the chat log or
/// the in-memory conversation.
pub struct ToolRegistry {
    vault: Arc<dyn Vault>,
    gateway: Arc<dyn Provider>,
    settings: Settings,
    specs: Vec<ToolSpec>,
}

impl ToolRegistry {
    pub fn new(vault: Arc<dyn Vault>, gateway: Arc<dyn Provider>, settings: Settings) -> Self {
        Self {
            vault,
            gateway,
            settings,
            specs: definitions::all(),
        }
    }

    /// Provider-facing tool schemas.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.specs
            .iter()
            .map(|spec| ToolDefinition {
                name: spec.name.into(),
                description: spec.description.into(),
                parameters: spec.json_schema(),
            })
            .collect()
    }

    /// Execute a requested tool call. Always returns a result, never
    /// throws; exactly one handler invocation per call, no retries.
    pub async fn dispatch(&self, name: &str, args: &Value) -> ToolResult {
        let Some(spec) = self.specs.iter().find(|spec| spec.name == name) else {
            debug!("unknown tool requested: {name}");
            return ToolResult::err(format!("tool not implemented: {name}"));
        };

        let args = match spec.validate(args) {
            Ok(args) => args,
            Err(message) => {
                debug!("tool {name} argument validation failed: {message}");
                return ToolResult::err(message);
            }
        };

        let outcome = match name {
            "create_note" => self.note_tools().create_note(&args).await,
            "edit_note" => self.note_tools().edit_note(&args).await,
            "read_note" => self.note_tools().read_note(&args).await,
            "create_directory" => self.vault_ops().create_directory(&args).await,
            "list_files" => self.vault_ops().list_files(&args).await,
            "vault_search" => self.vault_ops().vault_search(&args).await,
            "filter_notes" => self.vault_ops().filter_notes(&args).await,
            "web_search" => self.web_tools().web_search(&args).await,
            _ => Err(format!("tool not implemented: {name}")),
        };

        match outcome {
            Ok(response) => ToolResult::ok(response),
            Err(message) => {
                debug!("tool {name} failed: {message}");
                ToolResult::err(message)
            }
        }
    }

    fn note_tools(&self) -> NoteTools<'_> {
        NoteTools {
            vault: self.vault.as_ref(),
            gateway: self.gateway.as_ref(),
            settings: &self.settings,
        }
    }

    fn vault_ops(&self) -> VaultOps<'_> {
        VaultOps {
            vault: self.vault.as_ref(),
        }
    }

    fn web_tools(&self) -> WebTools<'_> {
        WebTools {
            gateway: self.gateway.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{QuillError, Result as QuillResult};
    use crate::provider::{
        Capabilities, CompleteRequest, ContinueRequest, ConverseRequest, StreamEvent,
    };
    use crate::vault::FsVault;
    use async_trait::async_trait;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    /// Provider stub: canned completion text, no streaming.
    struct StubProvider {
        capabilities: Capabilities,
        completion: String,
    }

    impl StubProvider {
        fn new(completion: &str) -> Self {
            Self {
                capabilities: Capabilities {
                    supports_tools: true,
                    supports_streaming: true,
                    supports_grounded_search: false,
                    supports_image_input: false,
                    max_context_tokens: 100_000,
                },
                completion: completion.into(),
            }
        }
    }

    #[async_trait]
    impl Provider for StubProvider {
        fn name(&self) -> &'static str {
            "stub"
        }
        fn capabilities(&self) -> &Capabilities {
            &self.capabilities
        }
        async fn complete(&self, _request: CompleteRequest) -> QuillResult<String> {
            Ok(self.completion.clone())
        }
        async fn converse(
            &self,
            _request: ConverseRequest,
        ) -> QuillResult<mpsc::Receiver<StreamEvent>> {
            Err(QuillError::Provider("not scripted".into()))
        }
        async fn continue_with_tools(
            &self,
            _request: ContinueRequest,
        ) -> QuillResult<mpsc::Receiver<StreamEvent>> {
            Err(QuillError::Provider("not scripted".into()))
        }
    }

    fn registry(dir: &TempDir) -> ToolRegistry {
        ToolRegistry::new(
            Arc::new(FsVault::new(dir.path())),
            Arc::new(StubProvider::new("generated body")),
            Settings::default(),
        )
    }

    #[tokio::test]
    async fn test_unknown_tool_is_reported_not_thrown() {
        let dir = TempDir::new().unwrap();
        let result = registry(&dir).dispatch("summon_demon", &json!({})).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("not implemented"));
    }

    #[tokio::test]
    async fn test_missing_required_arg_is_reported() {
        let dir = TempDir::new().unwrap();
        let result = registry(&dir).dispatch("web_search", &json!({})).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("query"));
    }

    #[tokio::test]
    async fn test_handler_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let result = registry(&dir)
            .dispatch("read_note", &json!({ "file_name": "does not exist" }))
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("no note matching"));
    }

    #[tokio::test]
    async fn test_create_note_writes_file() {
        let dir = TempDir::new().unwrap();
        let result = registry(&dir)
            .dispatch(
                "create_note",
                &json!({ "name": "Cats", "content": "All about cats" }),
            )
            .await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.response.unwrap()["path"], "Cats.md");
        assert!(dir.path().join("Cats.md").exists());
    }

    #[tokio::test]
    async fn test_create_note_generates_content_via_llm() {
        let dir = TempDir::new().unwrap();
        let result = registry(&dir)
            .dispatch(
                "create_note",
                &json!({ "topic": "cats", "use_llm": true }),
            )
            .await;
        assert!(result.success, "{:?}", result.error);
        let content = std::fs::read_to_string(dir.path().join("cats.md")).unwrap();
        assert_eq!(content, "generated body");
    }

    #[tokio::test]
    async fn test_create_note_collision_suffixes() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        for expected in ["Note.md", "Note (1).md", "Note (2).md"] {
            let result = registry
                .dispatch("create_note", &json!({ "name": "Note", "content": "x" }))
                .await;
            assert_eq!(result.response.unwrap()["path"], expected);
        }
    }

    #[tokio::test]
    async fn test_edit_note_returns_line_diff() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Plan.md"), "step one\nstep two\n").unwrap();
        let result = registry(&dir)
            .dispatch(
                "edit_note",
                &json!({ "file_name": "Plan", "new_content": "step one\nstep three\n" }),
            )
            .await;
        assert!(result.success, "{:?}", result.error);
        let diff = result.response.unwrap()["diff"].as_str().unwrap().to_string();
        assert!(diff.contains("- step two"));
        assert!(diff.contains("+ step three"));
        assert!(!diff.contains("step one"));
    }

    #[tokio::test]
    async fn test_filter_notes_rejects_bad_field() {
        let dir = TempDir::new().unwrap();
        let result = registry(&dir)
            .dispatch(
                "filter_notes",
                &json!({ "field": "size", "date_range": "7d" }),
            )
            .await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_filter_notes_window() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Recent.md"), "x").unwrap();
        let result = registry(&dir)
            .dispatch(
                "filter_notes",
                &json!({ "field": "modified", "date_range": "1h" }),
            )
            .await;
        assert!(result.success, "{:?}", result.error);
        let response = result.response.unwrap();
        assert_eq!(response["count"], 1);
        assert_eq!(response["notes"][0], "Recent.md");
    }

    #[tokio::test]
    async fn test_vault_search_exact_and_missing() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Ideas.md"), "x").unwrap();
        let registry = registry(&dir);

        let hit = registry
            .dispatch("vault_search", &json!({ "name": "Ideas", "is_note": true }))
            .await;
        assert_eq!(hit.response.unwrap()["path"], "Ideas.md");

        let miss = registry
            .dispatch("vault_search", &json!({ "name": "Nope", "is_note": true }))
            .await;
        assert!(!miss.success);
    }

    #[tokio::test]
    async fn test_create_directory_sanitizes_and_disambiguates() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);

        let first = registry
            .dispatch("create_directory", &json!({ "name": "../projects//new" }))
            .await;
        assert_eq!(first.response.unwrap()["path"], "projects/new");

        let second = registry
            .dispatch("create_directory", &json!({ "name": "projects/new" }))
            .await;
        assert_eq!(second.response.unwrap()["path"], "projects/new (1)");
    }

    #[tokio::test]
    async fn test_read_note_captions_inline_images() {
        use base64::Engine;
        use base64::engine::general_purpose::STANDARD;

        let dir = TempDir::new().unwrap();
        let encoded = STANDARD.encode(b"imagebytes");
        std::fs::write(
            dir.path().join("Trip.md"),
            format!("Photos:\n![view](data:image/png;base64,{encoded})\n"),
        )
        .unwrap();

        let settings = Settings {
            caption_images: true,
            ..Settings::default()
        };
        let registry = ToolRegistry::new(
            Arc::new(FsVault::new(dir.path())),
            Arc::new(StubProvider::new("A mountain view at sunset.")),
            settings,
        );

        let result = registry
            .dispatch("read_note", &json!({ "file_name": "Trip" }))
            .await;
        assert!(result.success, "{:?}", result.error);
        let content = result.response.unwrap()["content"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(!content.contains(&encoded), "raw image data must be stripped");
        assert!(content.contains("[image 1]"));
        assert!(content.contains("A mountain view at sunset."));
    }

    #[tokio::test]
    async fn test_web_search_without_grounding_fails_cleanly() {
        let dir = TempDir::new().unwrap();
        let result = registry(&dir)
            .dispatch("web_search", &json!({ "query": "rust" }))
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("grounded search"));
    }

    #[test]
    fn test_bounded_output_truncates() {
        let result = ToolResult::ok(json!({ "blob": "x".repeat(INLINE_RESULT_CAP * 2) }));
        let output = result.bounded_output();
        assert!(output.len() < INLINE_RESULT_CAP + 64);
        assert!(output.ends_with("[result truncated]"));
    }
}
