//! Note tools: create, edit, read.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};

use crate::config::Settings;
use crate::message::Attachment;
use crate::provider::{CompleteRequest, Provider, complete_with_timeout};
use crate::vault::{Vault, disambiguate, resolve_folder, resolve_note};

const NOTE_WRITER_PROMPT: &str = "You write well-structured Markdown notes for a personal \
    knowledge vault. Produce only the note body: clear headings, concise prose, no preamble \
    and no code fences around the whole note.";

const NOTE_EDITOR_PROMPT: &str = "You edit Markdown notes. Apply the instructions to the \
    current content and return the complete updated note. Preserve everything the \
    instructions do not touch, including front matter and formatting.";

const CAPTION_PROMPT: &str = "You caption images for a text-only archive.";

/// Most diff lines reported back to the model per edit.
const DIFF_LINE_CAP: usize = 200;

pub(super) struct NoteTools<'a> {
    pub vault: &'a dyn Vault,
    pub gateway: &'a dyn Provider,
    pub settings: &'a Settings,
}

impl NoteTools<'_> {
    pub async fn create_note(&self, args: &Value) -> Result<Value, String> {
        let topic = args["topic"].as_str();
        let use_llm = args["use_llm"].as_bool().unwrap_or(false);

        let dir = match args["dir_path"].as_str() {
            Some(query) if !query.trim().is_empty() => resolve_folder(self.vault, query)
                .await
                .ok_or_else(|| format!("no folder matching '{query}'"))?,
            _ => String::new(),
        };

        let stem = args["name"]
            .as_str()
            .or(topic)
            .map(file_stem)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "Untitled".into());

        let mut content = match args["content"].as_str() {
            Some(content) => content.to_string(),
            None if use_llm => {
                let topic =
                    topic.ok_or("use_llm needs a topic when no content is provided")?;
                let mut input = format!("Topic: {topic}");
                if let Some(context) = args["context"].as_str() {
                    input.push_str(&format!("\nAdditional context: {context}"));
                }
                complete_with_timeout(self.gateway, CompleteRequest::new(NOTE_WRITER_PROMPT, input))
                    .await
                    .map_err(|e| format!("content generation failed: {e}"))?
            }
            None => String::new(),
        };

        if let Some(tags) = string_array(&args["tags"]) {
            content = with_front_matter_tags(&content, &tags);
        }

        let path = disambiguate(self.vault, &dir, &stem, "md").await;
        self.vault
            .write(&path, &content)
            .await
            .map_err(|e| format!("failed to write {path}: {e}"))?;

        Ok(json!({ "path": path, "message": format!("Note created at {path}") }))
    }

    pub async fn edit_note(&self, args: &Value) -> Result<Value, String> {
        let path = self.resolve_target(args).await?;
        let use_llm = args["use_llm"].as_bool().unwrap_or(false);

        let old = self
            .vault
            .read(&path)
            .await
            .map_err(|e| format!("failed to read {path}: {e}"))?;

        let mut new = if use_llm {
            let instructions = args["new_content"]
                .as_str()
                .or(args["context"].as_str())
                .ok_or("use_llm edit needs instructions in new_content or context")?;
            let input =
                format!("Current note content:\n{old}\n\nInstructions:\n{instructions}");
            complete_with_timeout(self.gateway, CompleteRequest::new(NOTE_EDITOR_PROMPT, input))
                .await
                .map_err(|e| format!("rewrite failed: {e}"))?
        } else {
            args["new_content"]
                .as_str()
                .ok_or("new_content is required when use_llm is false")?
                .to_string()
        };

        if let Some(tags) = string_array(&args["tags"]) {
            new = with_front_matter_tags(&new, &tags);
        }

        self.vault
            .write(&path, &new)
            .await
            .map_err(|e| format!("failed to write {path}: {e}"))?;

        Ok(json!({ "path": path, "diff": line_diff(&old, &new) }))
    }

    pub async fn read_note(&self, args: &Value) -> Result<Value, String> {
        let path = self.resolve_target(args).await?;
        let content = self
            .vault
            .read(&path)
            .await
            .map_err(|e| format!("failed to read {path}: {e}"))?;

        let content = if self.settings.caption_images {
            self.strip_and_caption_images(&content).await
        } else {
            content
        };

        Ok(json!({ "path": path, "content": content }))
    }

    /// Target resolution shared by edit/read: the active note or a fuzzy
    /// name match, exactly one of which must succeed.
    async fn resolve_target(&self, args: &Value) -> Result<String, String> {
        if args["active_note"].as_bool().unwrap_or(false) {
            return self
                .vault
                .active_note()
                .ok_or_else(|| "no note is currently active".to_string());
        }
        match args["file_name"].as_str() {
            Some(name) if !name.trim().is_empty() => resolve_note(self.vault, name)
                .await
                .ok_or_else(|| format!("no note matching '{name}'")),
            _ => Err("provide file_name or set active_note".into()),
        }
    }

    /// Replace inline base64 images with numbered markers and append model
    /// captions; raw image payloads cannot travel back as tool results.
    async fn strip_and_caption_images(&self, content: &str) -> String {
        let (stripped, images) = extract_inline_images(content);
        if images.is_empty() {
            return stripped;
        }

        let mut captions = Vec::new();
        for (index, data) in images {
            let request = CompleteRequest::new(
                CAPTION_PROMPT,
                "Describe this image in one sentence.",
            )
            .with_attachments(vec![Attachment::Image {
                name: format!("image-{index}.png"),
                data,
            }]);
            let caption = match complete_with_timeout(self.gateway, request).await {
                Ok(caption) => caption,
                Err(e) => {
                    tracing::debug!("image caption failed: {e}");
                    "caption unavailable".into()
                }
            };
            captions.push(format!("[image {index}]: {}", caption.trim()));
        }

        format!("{stripped}\n\nImage captions:\n{}", captions.join("\n"))
    }
}

/// Pull `data:image/...;base64,` payloads out of note text, leaving
/// numbered markers behind. Returns decoded image bytes by marker index.
fn extract_inline_images(content: &str) -> (String, Vec<(usize, Vec<u8>)>) {
    let mut stripped = String::with_capacity(content.len());
    let mut images = Vec::new();
    let mut rest = content;
    let mut index = 0usize;

    while let Some(start) = rest.find("data:image/") {
        stripped.push_str(&rest[..start]);
        let tail = &rest[start..];
        let end = tail
            .find(|c: char| c == ')' || c == '"' || c == '\'' || c.is_whitespace())
            .unwrap_or(tail.len());
        let uri = &tail[..end];

        if let Some(b64_at) = uri.find(";base64,") {
            let encoded = &uri[b64_at + ";base64,".len()..];
            if let Ok(data) = BASE64.decode(encoded.as_bytes()) {
                index += 1;
                stripped.push_str(&format!("[image {index}]"));
                images.push((index, data));
            } else {
                stripped.push_str("[image: undecodable]");
            }
        } else {
            stripped.push_str("[image]");
        }
        rest = &tail[end..];
    }
    stripped.push_str(rest);

    (stripped, images)
}

/// Line-level diff of an edit, bounded for reporting back to the model.
fn line_diff(old: &str, new: &str) -> String {
    use similar::{ChangeTag, TextDiff};

    let diff = TextDiff::from_lines(old, new);
    let mut lines = Vec::new();
    for change in diff.iter_all_changes() {
        let prefix = match change.tag() {
            ChangeTag::Delete => "- ",
            ChangeTag::Insert => "+ ",
            ChangeTag::Equal => continue,
        };
        lines.push(format!("{prefix}{}", change.value().trim_end_matches('\n')));
        if lines.len() >= DIFF_LINE_CAP {
            lines.push(format!("… diff truncated at {DIFF_LINE_CAP} lines"));
            break;
        }
    }
    if lines.is_empty() {
        "no changes".into()
    } else {
        lines.join("\n")
    }
}

fn with_front_matter_tags(content: &str, tags: &[String]) -> String {
    if content.trim_start().starts_with("---") {
        return content.to_string();
    }
    format!("---\ntags: [{}]\n---\n\n{content}", tags.join(", "))
}

fn string_array(value: &Value) -> Option<Vec<String>> {
    let items = value.as_array()?;
    let tags: Vec<String> = items
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();
    if tags.is_empty() { None } else { Some(tags) }
}

fn file_stem(name: &str) -> String {
    let stem = name.strip_suffix(".md").unwrap_or(name);
    stem.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => ' ',
            other => other,
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
