//! Quill — vault-native AI chat agent.
//!
//! The conversation/tool-call orchestration core of a note-vault chat
//! assistant: a streamed model loop interleaved with schema-validated
//! vault tools, persisted turn by turn to human-readable per-chat log
//! files. Rendering and host integration live elsewhere; everything here
//! takes its vault and settings explicitly and runs against a plain
//! directory in tests.

pub mod chatlog;
pub mod config;
pub mod error;
pub mod message;
pub mod orchestrator;
pub mod provider;
pub mod tools;
pub mod vault;

pub use chatlog::Chat;
pub use config::{ProviderKind, Settings};
pub use error::{QuillError, Result};
pub use message::{Attachment, Message, Sender, ToolCall, ToolCallStatus};
pub use orchestrator::{NoopObserver, Orchestrator, TurnEvent, TurnObserver, TurnOutcome};
pub use provider::{Provider, build_provider};
pub use tools::{ToolRegistry, ToolResult};
pub use vault::{FsVault, Vault};
