//! Chat log store.
//!
//! One file per conversation, append-only in the common case, with
//! index-based rewrite for regeneration. The file is the source of truth:
//! the in-memory [`Chat`] is a cache that `open` can always re-derive.
//!
//! All operations are best-effort single-shot. On an I/O failure the caller
//! must not assume the file was mutated and should re-`open` before
//! trusting in-memory state.

mod format;

pub use format::{FORMAT_VERSION, Header, new_thread_id};

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::error::{QuillError, Result};
use crate::message::Message;

const CHAT_EXTENSION: &str = "md";

/// An open conversation: the log file it lives in plus the cached message
/// sequence.
#[derive(Debug, Clone)]
pub struct Chat {
    pub path: PathBuf,
    pub header: Option<Header>,
    pub messages: Vec<Message>,
}

impl Chat {
    /// The stable session correlator, empty when the header lacks one.
    pub fn thread_id(&self) -> &str {
        self.header
            .as_ref()
            .map(|h| h.thread_id.as_str())
            .unwrap_or("")
    }
}

/// Create a new chat file under `dir`, disambiguating the file name on
/// collision.
pub async fn create(dir: &Path, title: &str) -> Result<Chat> {
    tokio::fs::create_dir_all(dir).await?;

    let stem = safe_stem(title);
    let path = free_path(dir, &stem).await;

    let header = Header::new();
    tokio::fs::write(&path, format::encode_header(&header)).await?;

    Ok(Chat {
        path,
        header: Some(header),
        messages: Vec::new(),
    })
}

/// Parse an existing chat file into memory.
pub async fn open(path: &Path) -> Result<Chat> {
    let (header, messages) = read_document(path).await?;
    Ok(Chat {
        path: path.to_path_buf(),
        header,
        messages,
    })
}

/// Parse the full message sequence from a chat file.
pub async fn read_all(path: &Path) -> Result<Vec<Message>> {
    let (_, messages) = read_document(path).await?;
    Ok(messages)
}

/// Extract the thread id from a chat file, empty string when absent.
pub async fn thread_id(path: &Path) -> Result<String> {
    let (header, _) = read_document(path).await?;
    Ok(header.map(|h| h.thread_id).unwrap_or_default())
}

/// Append one message to the log and the in-memory cache. The cache is only
/// updated once the write succeeded.
pub async fn append(chat: &mut Chat, message: Message) -> Result<()> {
    if !chat.path.exists() {
        return Err(QuillError::ChatFileMissing(chat.path.clone()));
    }

    let mut file = tokio::fs::OpenOptions::new()
        .append(true)
        .open(&chat.path)
        .await?;
    file.write_all(format::encode_message(&message).as_bytes())
        .await?;
    file.flush().await?;

    chat.messages.push(message);
    Ok(())
}

/// Rewrite the log to contain only the first `n` messages, preserving the
/// header. `n = 0` empties the conversation but keeps the thread id.
pub async fn truncate_after(chat: &mut Chat, n: usize) -> Result<()> {
    let (header, messages) = read_document(&chat.path).await?;
    let keep = n.min(messages.len());

    let text = format::encode_document(header.as_ref(), &messages[..keep]);
    tokio::fs::write(&chat.path, text).await?;

    chat.header = header;
    chat.messages = messages;
    chat.messages.truncate(keep);
    Ok(())
}

/// Drop the final message only.
pub async fn remove_last(chat: &mut Chat) -> Result<()> {
    let (header, mut messages) = read_document(&chat.path).await?;
    messages.pop();

    let text = format::encode_document(header.as_ref(), &messages);
    tokio::fs::write(&chat.path, text).await?;

    chat.header = header;
    chat.messages = messages;
    Ok(())
}

/// Rewrite the whole file from the in-memory state. Used by the
/// orchestrator's consistency pass when the file and cache disagree.
pub async fn rewrite_all(chat: &Chat) -> Result<()> {
    let text = format::encode_document(chat.header.as_ref(), &chat.messages);
    tokio::fs::write(&chat.path, text).await?;
    Ok(())
}

/// Rename the chat file to a new title, disambiguating on collision.
pub async fn rename(chat: &mut Chat, title: &str) -> Result<()> {
    let dir = chat
        .path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let stem = safe_stem(title);
    let target = free_path(&dir, &stem).await;

    if target == chat.path {
        return Ok(());
    }

    tokio::fs::rename(&chat.path, &target).await?;
    chat.path = target;
    Ok(())
}

async fn read_document(path: &Path) -> Result<(Option<Header>, Vec<Message>)> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(QuillError::ChatFileMissing(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };
    Ok(format::decode_document(&text))
}

/// Reduce a proposed title to a file-system-safe stem.
fn safe_stem(title: &str) -> String {
    let cleaned: String = title
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\n' | '\r' => ' ',
            other => other,
        })
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        "Untitled Chat".to_string()
    } else {
        collapsed.chars().take(80).collect()
    }
}

async fn free_path(dir: &Path, stem: &str) -> PathBuf {
    let candidate = dir.join(format!("{stem}.{CHAT_EXTENSION}"));
    if !candidate.exists() {
        return candidate;
    }
    let mut counter = 1u32;
    loop {
        let candidate = dir.join(format!("{stem} ({counter}).{CHAT_EXTENSION}"));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
        if counter > 10_000 {
            warn!("chat name collision runaway for stem {stem}");
            return dir.join(format!("{stem} ({}).{CHAT_EXTENSION}", new_thread_id()));
        }
    }
}
