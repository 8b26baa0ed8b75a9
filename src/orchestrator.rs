//! Conversation orchestrator — the turn state machine.
//!
//! One `send_message` call drives a full turn: durable user append, a
//! streamed model call interleaved with tool dispatch, and a consistent
//! terminal record in the chat log. Per chat, turns are strictly
//! sequential; distinct chats run independently.
//!
//! States per turn: Idle -> UserAppended -> Streaming -> Finalized|Errored.
//! Invariants upheld throughout:
//! - at most one unprocessed message exists, and it is the last;
//! - the user turn is durable before the model is called;
//! - the placeholder bot turn lives only in memory while streaming;
//! - a turn that errors still leaves a persisted error record.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::chatlog::{self, Chat};
use crate::config::Settings;
use crate::error::{QuillError, Result};
use crate::message::{Attachment, Message, Sender, ToolCall, ToolCallStatus};
use crate::provider::{
    CompleteRequest, ContinueRequest, ConverseRequest, HistoryMessage, HistoryRole, Provider,
    StreamEvent, ToolOutcome, Usage, complete_with_timeout,
};
use crate::tools::ToolRegistry;
use crate::vault::{Vault, folder_tree};

const AGENT_SYSTEM_PROMPT: &str = "You are an assistant embedded in the user's note vault. You \
    can read, create, edit, search, and organize notes through the provided tools. Ground your \
    answers in the vault content; say so when something is not there. Keep responses concise \
    and use the tools rather than guessing at file contents or paths.";

const TITLE_PROMPT: &str = "Propose a short title (at most six words) for a conversation that \
    starts with the given message. Reply with the title only.";

/// Persisted content when the model produced no prose but its tools ran.
const TOOLS_ONLY_CONTENT: &str = "Tools executed successfully.";

/// Persisted diagnostic when the model produced nothing at all.
const NO_ANSWER_DIAGNOSTIC: &str = "The model returned no response for this turn.";

/// Entries of the vault tree included in the system prompt.
const FOLDER_TREE_CAP: usize = 200;

/// Bytes of an attached note inlined into the user content.
const NOTE_ATTACHMENT_CAP: usize = 8 * 1024;

/// What the presentation layer sees while a turn runs. Events arrive in
/// stream order, one per chunk, with no buffering.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    UserAppended,
    TextChunk(String),
    ToolCallResolved(ToolCall),
    Finalized(Message),
}

/// Presentation seam. Implementations must be cheap; they run inline with
/// the stream.
pub trait TurnObserver: Send + Sync {
    fn on_event(&self, event: &TurnEvent);
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl TurnObserver for NoopObserver {
    fn on_event(&self, _event: &TurnEvent) {}
}

/// Result of one completed turn.
#[derive(Debug)]
pub struct TurnOutcome {
    /// The terminal bot or error message, as persisted.
    pub message: Message,
    /// Token usage accumulated across all rounds of the turn.
    pub usage: Usage,
}

/// The orchestrator. Owns no conversation state; chats are passed in and
/// the log file stays the source of truth.
pub struct Orchestrator {
    gateway: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    vault: Arc<dyn Vault>,
    settings: Settings,
    /// Per-chat turn serialization.
    turn_locks: std::sync::Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl Orchestrator {
    pub fn new(
        gateway: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        vault: Arc<dyn Vault>,
        settings: Settings,
    ) -> Self {
        Self {
            gateway,
            tools,
            vault,
            settings,
            turn_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Create a fresh chat file in the configured history folder.
    pub async fn new_chat(&self, title: &str) -> Result<Chat> {
        let dir = self.vault.root().join(&self.settings.history_folder);
        chatlog::create(&dir, title).await
    }

    /// Run one turn. `regenerate_from` truncates the conversation to that
    /// index first, so the new user content replaces the edited turn and
    /// everything after it is discarded.
    ///
    /// Returns `Ok` with the persisted terminal message for both successful
    /// and model-failed turns; `Err` only for storage-level failures the
    /// caller must recover from (e.g. the chat file vanished).
    pub async fn send_message(
        &self,
        chat: &mut Chat,
        text: &str,
        attachments: Vec<Attachment>,
        regenerate_from: Option<usize>,
        observer: &dyn TurnObserver,
    ) -> Result<TurnOutcome> {
        let lock = self.turn_lock(&chat.path);
        let _guard = lock.lock().await;

        let is_first_turn = chat.messages.is_empty() && regenerate_from.is_none();

        if let Some(index) = regenerate_from {
            chatlog::truncate_after(chat, index).await?;
        }

        // Rename before the first append so the messages land under the
        // final chat name.
        if is_first_turn && self.settings.auto_title {
            self.propose_title(chat, text, &attachments).await;
        }

        chatlog::append(chat, Message::user(text, attachments.clone())).await?;
        observer.on_event(&TurnEvent::UserAppended);

        // The only message that may exist in memory without a durable
        // counterpart, and only while this turn streams.
        chat.messages.push(Message::bot_placeholder());

        match self.run_streaming(chat, text, &attachments, observer).await {
            Ok(usage) => self.finalize(chat, usage, observer).await,
            Err(e) => {
                warn!("turn failed, persisting error record: {e}");
                let message = self.finalize_error(chat, e.to_string(), observer).await?;
                Ok(TurnOutcome {
                    message,
                    usage: Usage::default(),
                })
            }
        }
    }

    /// Drive the streamed call and its tool-continuation rounds. Text and
    /// resolved tool calls accumulate on the in-memory placeholder.
    async fn run_streaming(
        &self,
        chat: &mut Chat,
        text: &str,
        attachments: &[Attachment],
        observer: &dyn TurnObserver,
    ) -> Result<Usage> {
        let system = self.build_system_prompt().await;
        let history = history_of(&chat.messages[..chat.messages.len().saturating_sub(2)]);
        let input = self.assemble_user_content(text, attachments).await;
        let tools = self.tools.definitions();
        let thread_id = chat.thread_id().to_string();

        let mut rx = self
            .gateway
            .converse(ConverseRequest {
                system: system.clone(),
                history: history.clone(),
                input: input.clone(),
                attachments: attachments.to_vec(),
                thread_id: thread_id.clone(),
                tools: tools.clone(),
            })
            .await?;

        let mut usage_total = Usage::default();
        let mut round = 0usize;

        loop {
            let mut outcomes: Vec<ToolOutcome> = Vec::new();
            let mut done = false;

            while let Some(event) = rx.recv().await {
                match event {
                    StreamEvent::TextDelta(delta) => {
                        if let Some(placeholder) = chat.messages.last_mut() {
                            placeholder.content.push_str(&delta);
                        }
                        observer.on_event(&TurnEvent::TextChunk(delta));
                    }
                    StreamEvent::ToolCall { id, name, args } => {
                        let result = self.tools.dispatch(&name, &args).await;
                        let call = ToolCall {
                            id: if id.is_empty() {
                                uuid::Uuid::new_v4().to_string()
                            } else {
                                id
                            },
                            name: name.clone(),
                            args,
                            status: if result.success {
                                ToolCallStatus::Success
                            } else {
                                ToolCallStatus::Error
                            },
                            result: Some(result.to_value()),
                        };
                        outcomes.push(ToolOutcome {
                            call_id: call.id.clone(),
                            name,
                            output: result.bounded_output(),
                        });
                        if let Some(placeholder) = chat.messages.last_mut() {
                            placeholder.tool_calls.push(call.clone());
                        }
                        observer.on_event(&TurnEvent::ToolCallResolved(call));
                    }
                    StreamEvent::Usage(usage) => {
                        usage_total.input_tokens += usage.input_tokens;
                        usage_total.output_tokens += usage.output_tokens;
                    }
                    StreamEvent::Done => {
                        done = true;
                        break;
                    }
                    StreamEvent::Error(message) => {
                        return Err(QuillError::ModelStream(message));
                    }
                }
            }

            if !done {
                return Err(QuillError::ModelStream(
                    "stream ended without terminal event".into(),
                ));
            }

            if outcomes.is_empty() {
                break;
            }
            if round >= self.settings.max_tool_rounds {
                warn!("tool round limit reached, closing turn");
                break;
            }
            round += 1;

            // On the final permitted round the schemas are withheld so the
            // model has to close the turn with prose.
            let round_tools = if round >= self.settings.max_tool_rounds {
                Vec::new()
            } else {
                tools.clone()
            };

            rx = self
                .gateway
                .continue_with_tools(ContinueRequest {
                    system: system.clone(),
                    history: history.clone(),
                    input: input.clone(),
                    thread_id: thread_id.clone(),
                    tools: round_tools,
                    tool_outcomes: outcomes,
                })
                .await?;
        }

        debug!(
            input_tokens = usage_total.input_tokens,
            output_tokens = usage_total.output_tokens,
            rounds = round,
            "turn stream complete"
        );
        Ok(usage_total)
    }

    /// Terminal path for a cleanly finished stream.
    async fn finalize(
        &self,
        chat: &mut Chat,
        usage: Usage,
        observer: &dyn TurnObserver,
    ) -> Result<TurnOutcome> {
        let Some(mut bot) = chat.messages.pop() else {
            return Err(QuillError::Provider("turn state lost".into()));
        };

        if bot.content.is_empty() {
            let any_success = bot
                .tool_calls
                .iter()
                .any(|call| call.status == ToolCallStatus::Success);
            if any_success {
                bot.content = TOOLS_ONLY_CONTENT.into();
            } else {
                // No prose and no real work: record a "no answer" turn.
                let mut error = Message::error(NO_ANSWER_DIAGNOSTIC);
                error.tool_calls = bot.tool_calls;
                let message = self.persist_terminal(chat, error, observer).await?;
                return Ok(TurnOutcome { message, usage });
            }
        }

        bot.processed = true;
        let message = self.persist_terminal(chat, bot, observer).await?;
        Ok(TurnOutcome { message, usage })
    }

    /// Terminal path for a failed turn: the partial streamed text is
    /// discarded and an error-sender record carries the failure, keeping
    /// any tool calls that already resolved.
    async fn finalize_error(
        &self,
        chat: &mut Chat,
        error_text: String,
        observer: &dyn TurnObserver,
    ) -> Result<Message> {
        let tool_calls = match chat.messages.last() {
            Some(message) if !message.processed => {
                chat.messages.pop().map(|m| m.tool_calls).unwrap_or_default()
            }
            _ => Vec::new(),
        };

        let mut error = Message::error(error_text);
        error.tool_calls = tool_calls;
        self.persist_terminal(chat, error, observer).await
    }

    /// Persist the terminal message of the turn, then verify log and
    /// memory agree.
    async fn persist_terminal(
        &self,
        chat: &mut Chat,
        message: Message,
        observer: &dyn TurnObserver,
    ) -> Result<Message> {
        // An external actor may have deleted the chat file mid-turn; never
        // silently write into a nonexistent file.
        if !chat.path.exists() {
            return Err(QuillError::ChatFileMissing(chat.path.clone()));
        }

        chatlog::append(chat, message.clone()).await?;
        self.consistency_pass(chat).await;
        observer.on_event(&TurnEvent::Finalized(message.clone()));
        Ok(message)
    }

    /// By the time a turn resolves, the log must reflect the in-memory
    /// conversation exactly; rewrite from memory if they drifted.
    async fn consistency_pass(&self, chat: &Chat) {
        match chatlog::read_all(&chat.path).await {
            Ok(messages) if messages == chat.messages => {}
            Ok(_) => {
                warn!("chat log out of sync with memory, rewriting");
                if let Err(e) = chatlog::rewrite_all(chat).await {
                    warn!("consistency rewrite failed: {e}");
                }
            }
            Err(e) => warn!("consistency pass could not read log: {e}"),
        }
    }

    async fn build_system_prompt(&self) -> String {
        let mut prompt_lines = vec![AGENT_SYSTEM_PROMPT.to_string()];
        prompt_lines.push(format!(
            "Current date and time: {}",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        ));

        let tree = folder_tree(self.vault.as_ref(), FOLDER_TREE_CAP).await;
        if !tree.is_empty() {
            prompt_lines.push(format!("Vault folder structure:\n{tree}"));
        }

        if !self.settings.rules.is_empty() {
            let rules = self
                .settings
                .rules
                .iter()
                .map(|rule| format!("- {rule}"))
                .collect::<Vec<_>>()
                .join("\n");
            prompt_lines.push(format!("User rules:\n{rules}"));
        }

        prompt_lines.join("\n\n")
    }

    /// User text plus the content of attached notes, bounded per note.
    /// Image attachments travel separately; providers inline them.
    async fn assemble_user_content(&self, text: &str, attachments: &[Attachment]) -> String {
        let mut content = text.to_string();
        for attachment in attachments {
            if let Attachment::Note { path } = attachment {
                match self.vault.read(path).await {
                    Ok(note) => {
                        let bounded = bounded_text(&note, NOTE_ATTACHMENT_CAP);
                        content.push_str(&format!("\n\nAttached note {path}:\n{bounded}"));
                    }
                    Err(e) => {
                        content.push_str(&format!(
                            "\n\nAttached note {path} could not be read: {e}"
                        ));
                    }
                }
            }
        }
        content
    }

    /// Propose and apply a chat title from the first message. Best-effort:
    /// failures are logged and the turn proceeds under the existing name.
    async fn propose_title(&self, chat: &mut Chat, text: &str, attachments: &[Attachment]) {
        let images: Vec<Attachment> = attachments
            .iter()
            .filter(|a| matches!(a, Attachment::Image { .. }))
            .cloned()
            .collect();
        let request = CompleteRequest::new(TITLE_PROMPT, format!("First message:\n{text}"))
            .with_attachments(images);

        match complete_with_timeout(self.gateway.as_ref(), request).await {
            Ok(title) if !title.trim().is_empty() => {
                if let Err(e) = chatlog::rename(chat, title.trim()).await {
                    warn!("chat rename failed: {e}");
                }
            }
            Ok(_) => {}
            Err(e) => warn!("title proposal failed: {e}"),
        }
    }

    fn turn_lock(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.turn_locks.lock().expect("turn lock map poisoned");
        locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Prior turns as the providers see them. Error turns are local bookkeeping
/// and stay out of model history.
fn history_of(messages: &[Message]) -> Vec<HistoryMessage> {
    messages
        .iter()
        .filter_map(|message| match message.sender {
            Sender::User => Some(HistoryMessage {
                role: HistoryRole::User,
                content: message.content.clone(),
            }),
            Sender::Bot => Some(HistoryMessage {
                role: HistoryRole::Assistant,
                content: message.content.clone(),
            }),
            Sender::Error => None,
        })
        .collect()
}

fn bounded_text(text: &str, cap: usize) -> String {
    if text.len() <= cap {
        return text.to_string();
    }
    let mut cut = cap;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}… [truncated]", &text[..cut])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_skips_error_turns() {
        let messages = vec![
            Message::user("hi", vec![]),
            Message::error("boom"),
            Message {
                sender: Sender::Bot,
                content: "hello".into(),
                attachments: vec![],
                tool_calls: vec![],
                processed: true,
            },
        ];
        let history = history_of(&messages);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, HistoryRole::User);
        assert_eq!(history[1].role, HistoryRole::Assistant);
    }

    #[test]
    fn test_bounded_text_respects_char_boundaries() {
        let text = "héllo wörld".repeat(100);
        let bounded = bounded_text(&text, 33);
        assert!(bounded.len() < 50);
        assert!(bounded.ends_with("[truncated]"));
        assert_eq!(bounded_text("short", 100), "short");
    }
}
