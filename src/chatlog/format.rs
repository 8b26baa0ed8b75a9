//! On-disk chat log encoding (version 1).
//!
//! A log file is a front-matter header block followed by one JSON message
//! record per line:
//!
//! ```text
//! ---
//! thread_id: chat-20250805-120000123
//! created: 2025-08-05T12:00:00Z
//! tags: [quill-chat]
//! version: 1
//! ---
//! {"sender":"user","content":"hi","processed":true}
//! ```
//!
//! The decoder is total: blank lines, trailing whitespace, and lines that
//! fail to parse are skipped, never fatal. The orchestrator only sees
//! [`Header`] and [`crate::message::Message`]; the textual encoding lives
//! entirely in this module.

use chrono::Utc;

use crate::message::Message;

pub const FORMAT_VERSION: u32 = 1;

const TAGS_LINE: &str = "tags: [quill-chat]";

/// Parsed header block of a chat log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Stable session correlator, `chat-` followed by a timestamp token.
    pub thread_id: String,
    /// Creation timestamp, kept as the raw RFC 3339 string so rewrites
    /// never alter it.
    pub created: String,
    pub version: u32,
}

impl Header {
    /// A fresh header with a new thread id.
    pub fn new() -> Self {
        Self {
            thread_id: new_thread_id(),
            created: Utc::now().to_rfc3339(),
            version: FORMAT_VERSION,
        }
    }
}

impl Default for Header {
    fn default() -> Self {
        Self::new()
    }
}

/// Mint a thread id from the current instant.
pub fn new_thread_id() -> String {
    format!("chat-{}", Utc::now().format("%Y%m%d-%H%M%S%3f"))
}

/// Encode the header block.
pub fn encode_header(header: &Header) -> String {
    format!(
        "---\nthread_id: {}\ncreated: {}\n{}\nversion: {}\n---\n",
        header.thread_id, header.created, TAGS_LINE, header.version
    )
}

/// Encode one message as a single JSON line.
pub fn encode_message(message: &Message) -> String {
    // Message serialization cannot fail: all fields are plain data.
    let mut line = serde_json::to_string(message).unwrap_or_default();
    line.push('\n');
    line
}

/// Decode one body line into a message. Returns `None` for blank or
/// unparseable lines; callers skip those.
pub fn decode_message(line: &str) -> Option<Message> {
    let trimmed = line.trim();
    if trimmed.is_empty() || !trimmed.starts_with('{') {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

/// Split a log file into its header (if any) and parsed messages.
pub fn decode_document(text: &str) -> (Option<Header>, Vec<Message>) {
    let mut lines = text.lines();
    let mut header = None;
    let mut first_body_line: Option<&str> = None;

    match lines.next() {
        Some(first) if first.trim() == "---" => {
            let mut thread_id = String::new();
            let mut created = String::new();
            let mut version = FORMAT_VERSION;
            for line in lines.by_ref() {
                let line = line.trim();
                if line == "---" {
                    break;
                }
                if let Some((key, value)) = line.split_once(':') {
                    match key.trim() {
                        "thread_id" => thread_id = value.trim().to_string(),
                        "created" => created = value.trim().to_string(),
                        "version" => version = value.trim().parse().unwrap_or(FORMAT_VERSION),
                        _ => {}
                    }
                }
            }
            header = Some(Header {
                thread_id,
                created,
                version,
            });
        }
        Some(first) => first_body_line = Some(first),
        None => {}
    }

    let mut messages = Vec::new();
    if let Some(line) = first_body_line
        && let Some(message) = decode_message(line)
    {
        messages.push(message);
    }
    for line in lines {
        if let Some(message) = decode_message(line) {
            messages.push(message);
        }
    }

    (header, messages)
}

/// Encode a full document: header (when present) plus all messages.
pub fn encode_document(header: Option<&Header>, messages: &[Message]) -> String {
    let mut text = String::new();
    if let Some(header) = header {
        text.push_str(&encode_header(header));
    }
    for message in messages {
        text.push_str(&encode_message(message));
    }
    text
}
