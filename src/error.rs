//! Error taxonomy for the chat core.
//!
//! Tool-side failures are deliberately absent: the registry converts them
//! into failed `ToolResult`s that flow back to the model, never up the
//! call stack.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the chat log store, model gateway, and orchestrator.
#[derive(Debug, Error)]
pub enum QuillError {
    #[error("chat log I/O failed: {0}")]
    StorageIo(#[from] std::io::Error),

    #[error("chat file no longer exists: {}", .0.display())]
    ChatFileMissing(PathBuf),

    #[error("model call timed out after {0:?}")]
    ModelTimeout(Duration),

    #[error("model stream broke before completion: {0}")]
    ModelStream(String),

    #[error("provider error: {0}")]
    Provider(String),
}

pub type Result<T> = std::result::Result<T, QuillError>;
