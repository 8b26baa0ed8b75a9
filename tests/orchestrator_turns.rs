//! Turn scenarios against a scripted provider and a tempdir vault.

mod common;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::json;
use tempfile::TempDir;

use common::{CollectingObserver, Round, ScriptedProvider};
use quill::provider::{Provider, StreamEvent};
use quill::vault::Vault;
use quill::{
    FsVault, NoopObserver, Orchestrator, QuillError, Sender, Settings, ToolCallStatus,
    ToolRegistry, TurnEvent, TurnObserver, chatlog,
};

fn orchestrator(vault_dir: &Path, provider: ScriptedProvider, settings: Settings) -> Orchestrator {
    let provider: Arc<dyn Provider> = Arc::new(provider);
    let vault: Arc<dyn Vault> = Arc::new(FsVault::new(vault_dir));
    let tools = Arc::new(ToolRegistry::new(
        vault.clone(),
        provider.clone(),
        settings.clone(),
    ));
    Orchestrator::new(provider, tools, vault, settings)
}

fn no_title_settings() -> Settings {
    Settings {
        auto_title: false,
        ..Settings::default()
    }
}

// ============================================================================
// End-to-end tool turn
// ============================================================================

#[tokio::test]
async fn create_note_turn_persists_user_bot_and_note() {
    let dir = TempDir::new().unwrap();
    let provider = ScriptedProvider::new(
        "Cats are wonderful companions.",
        vec![
            Round::Events(vec![
                StreamEvent::ToolCall {
                    id: "call-1".into(),
                    name: "create_note".into(),
                    args: json!({ "topic": "cats", "use_llm": true }),
                },
                StreamEvent::Done,
            ]),
            Round::Events(vec![
                StreamEvent::TextDelta("I've created a note about cats.".into()),
                StreamEvent::Done,
            ]),
        ],
    );
    let orchestrator = orchestrator(dir.path(), provider, no_title_settings());

    let mut chat = orchestrator.new_chat("New chat").await.unwrap();
    let outcome = orchestrator
        .send_message(
            &mut chat,
            "Create a note about cats",
            vec![],
            None,
            &NoopObserver,
        )
        .await
        .unwrap();

    assert_eq!(outcome.message.sender, Sender::Bot);
    assert_eq!(outcome.message.content, "I've created a note about cats.");
    assert_eq!(outcome.message.tool_calls.len(), 1);
    assert_eq!(outcome.message.tool_calls[0].status, ToolCallStatus::Success);

    let messages = chatlog::read_all(&chat.path).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].sender, Sender::User);
    assert_eq!(messages[1], outcome.message);
    assert_eq!(messages, chat.messages);

    let note = std::fs::read_to_string(dir.path().join("cats.md")).unwrap();
    assert_eq!(note, "Cats are wonderful companions.");
}

#[tokio::test]
async fn chunks_arrive_in_order_and_match_persisted_content() {
    let dir = TempDir::new().unwrap();
    let provider = ScriptedProvider::new(
        "",
        vec![Round::Events(vec![
            StreamEvent::TextDelta("first ".into()),
            StreamEvent::TextDelta("second ".into()),
            StreamEvent::TextDelta("third".into()),
            StreamEvent::Done,
        ])],
    );
    let orchestrator = orchestrator(dir.path(), provider, no_title_settings());
    let mut chat = orchestrator.new_chat("Order").await.unwrap();

    let observer = CollectingObserver::default();
    let outcome = orchestrator
        .send_message(&mut chat, "go", vec![], None, &observer)
        .await
        .unwrap();

    assert_eq!(observer.streamed_text(), "first second third");
    assert_eq!(outcome.message.content, "first second third");
}

// ============================================================================
// Regeneration
// ============================================================================

#[tokio::test]
async fn regeneration_replaces_edited_turn_and_discards_tail() {
    let dir = TempDir::new().unwrap();
    let provider = ScriptedProvider::new(
        "",
        vec![
            Round::Events(vec![
                StreamEvent::TextDelta("answer zero".into()),
                StreamEvent::Done,
            ]),
            Round::Events(vec![
                StreamEvent::TextDelta("answer one".into()),
                StreamEvent::Done,
            ]),
            Round::Events(vec![
                StreamEvent::TextDelta("fresh answer".into()),
                StreamEvent::Done,
            ]),
        ],
    );
    let orchestrator = orchestrator(dir.path(), provider, no_title_settings());
    let mut chat = orchestrator.new_chat("Regen").await.unwrap();

    orchestrator
        .send_message(&mut chat, "question zero", vec![], None, &NoopObserver)
        .await
        .unwrap();
    orchestrator
        .send_message(&mut chat, "question one", vec![], None, &NoopObserver)
        .await
        .unwrap();
    assert_eq!(chat.messages.len(), 4);

    // Edit the second user turn (index 2) and resend.
    orchestrator
        .send_message(
            &mut chat,
            "question one, edited",
            vec![],
            Some(2),
            &NoopObserver,
        )
        .await
        .unwrap();

    let messages = chatlog::read_all(&chat.path).await.unwrap();
    let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(
        contents,
        vec![
            "question zero",
            "answer zero",
            "question one, edited",
            "fresh answer",
        ]
    );
}

// ============================================================================
// Failure paths
// ============================================================================

#[tokio::test]
async fn user_turn_survives_gateway_failure() {
    let dir = TempDir::new().unwrap();
    let provider = ScriptedProvider::new("", vec![Round::Fail("api down".into())]);
    let orchestrator = orchestrator(dir.path(), provider, no_title_settings());
    let mut chat = orchestrator.new_chat("Fail").await.unwrap();

    let outcome = orchestrator
        .send_message(&mut chat, "hello?", vec![], None, &NoopObserver)
        .await
        .unwrap();

    assert_eq!(outcome.message.sender, Sender::Error);
    assert!(outcome.message.content.contains("api down"));

    let messages = chatlog::read_all(&chat.path).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].sender, Sender::User);
    assert_eq!(messages[0].content, "hello?");
    assert_eq!(messages[1].sender, Sender::Error);
}

#[tokio::test]
async fn stream_error_discards_partial_text() {
    let dir = TempDir::new().unwrap();
    let provider = ScriptedProvider::new(
        "",
        vec![Round::Events(vec![
            StreamEvent::TextDelta("partial prose ".into()),
            StreamEvent::Error("connection reset".into()),
        ])],
    );
    let orchestrator = orchestrator(dir.path(), provider, no_title_settings());
    let mut chat = orchestrator.new_chat("Broken").await.unwrap();

    let observer = CollectingObserver::default();
    let outcome = orchestrator
        .send_message(&mut chat, "go", vec![], None, &observer)
        .await
        .unwrap();

    // The UI saw the partial text, the persisted record does not carry it.
    assert_eq!(observer.streamed_text(), "partial prose ");
    assert_eq!(outcome.message.sender, Sender::Error);
    assert!(outcome.message.content.contains("connection reset"));
    assert!(!outcome.message.content.contains("partial prose"));

    let messages = chatlog::read_all(&chat.path).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert!(!messages[1].content.contains("partial prose"));
}

#[tokio::test]
async fn closed_channel_without_done_is_a_stream_error() {
    let dir = TempDir::new().unwrap();
    let provider = ScriptedProvider::new(
        "",
        vec![Round::Events(vec![StreamEvent::TextDelta("half".into())])],
    );
    let orchestrator = orchestrator(dir.path(), provider, no_title_settings());
    let mut chat = orchestrator.new_chat("Dropped").await.unwrap();

    let outcome = orchestrator
        .send_message(&mut chat, "go", vec![], None, &NoopObserver)
        .await
        .unwrap();

    assert_eq!(outcome.message.sender, Sender::Error);
    assert!(outcome.message.content.contains("terminal event"));
}

#[tokio::test]
async fn empty_response_becomes_no_answer_error_turn() {
    let dir = TempDir::new().unwrap();
    let provider = ScriptedProvider::new("", vec![Round::Events(vec![StreamEvent::Done])]);
    let orchestrator = orchestrator(dir.path(), provider, no_title_settings());
    let mut chat = orchestrator.new_chat("Silent").await.unwrap();

    let outcome = orchestrator
        .send_message(&mut chat, "anything there?", vec![], None, &NoopObserver)
        .await
        .unwrap();

    assert_eq!(outcome.message.sender, Sender::Error);
    assert_eq!(
        outcome.message.content,
        "The model returned no response for this turn."
    );
}

#[tokio::test]
async fn continuation_failure_keeps_resolved_tool_calls() {
    let dir = TempDir::new().unwrap();
    let provider = ScriptedProvider::new(
        "",
        vec![
            Round::Events(vec![
                StreamEvent::ToolCall {
                    id: "call-1".into(),
                    name: "create_note".into(),
                    args: json!({ "name": "Kept", "content": "body" }),
                },
                StreamEvent::Done,
            ]),
            Round::Fail("continuation refused".into()),
        ],
    );
    let orchestrator = orchestrator(dir.path(), provider, no_title_settings());
    let mut chat = orchestrator.new_chat("Continue").await.unwrap();

    let outcome = orchestrator
        .send_message(&mut chat, "make a note", vec![], None, &NoopObserver)
        .await
        .unwrap();

    assert_eq!(outcome.message.sender, Sender::Error);
    assert_eq!(outcome.message.tool_calls.len(), 1);
    assert_eq!(outcome.message.tool_calls[0].status, ToolCallStatus::Success);
    // The note the tool wrote stays on disk even though the turn errored.
    assert!(dir.path().join("Kept.md").exists());
}

#[tokio::test]
async fn deleted_chat_file_surfaces_recoverable_error() {
    struct DeletingObserver {
        path: PathBuf,
    }
    impl TurnObserver for DeletingObserver {
        fn on_event(&self, event: &TurnEvent) {
            if matches!(event, TurnEvent::TextChunk(_)) {
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }

    let dir = TempDir::new().unwrap();
    let provider = ScriptedProvider::new(
        "",
        vec![Round::Events(vec![
            StreamEvent::TextDelta("about to vanish".into()),
            StreamEvent::Done,
        ])],
    );
    let orchestrator = orchestrator(dir.path(), provider, no_title_settings());
    let mut chat = orchestrator.new_chat("Doomed").await.unwrap();
    let observer = DeletingObserver {
        path: chat.path.clone(),
    };

    let err = orchestrator
        .send_message(&mut chat, "go", vec![], None, &observer)
        .await
        .unwrap_err();
    assert!(matches!(err, QuillError::ChatFileMissing(_)));

    // No half-written bot turn remains in memory.
    assert!(chat.messages.iter().all(|m| m.processed));
}

// ============================================================================
// Tool-loop behavior
// ============================================================================

#[tokio::test]
async fn unknown_tool_does_not_abort_the_turn() {
    let dir = TempDir::new().unwrap();
    let provider = ScriptedProvider::new(
        "",
        vec![
            Round::Events(vec![
                StreamEvent::ToolCall {
                    id: "call-1".into(),
                    name: "summon_demon".into(),
                    args: json!({}),
                },
                StreamEvent::Done,
            ]),
            Round::Events(vec![
                StreamEvent::TextDelta("that tool does not exist".into()),
                StreamEvent::Done,
            ]),
        ],
    );
    let orchestrator = orchestrator(dir.path(), provider, no_title_settings());
    let mut chat = orchestrator.new_chat("Unknown").await.unwrap();

    let outcome = orchestrator
        .send_message(&mut chat, "use your tools", vec![], None, &NoopObserver)
        .await
        .unwrap();

    assert_eq!(outcome.message.sender, Sender::Bot);
    assert_eq!(outcome.message.tool_calls.len(), 1);
    assert_eq!(outcome.message.tool_calls[0].status, ToolCallStatus::Error);
    assert_eq!(outcome.message.content, "that tool does not exist");
}

#[tokio::test]
async fn tools_only_turn_gets_placeholder_content() {
    let dir = TempDir::new().unwrap();
    let provider = ScriptedProvider::new(
        "",
        vec![
            Round::Events(vec![
                StreamEvent::ToolCall {
                    id: "call-1".into(),
                    name: "create_note".into(),
                    args: json!({ "name": "Silent", "content": "made without a word" }),
                },
                StreamEvent::Done,
            ]),
            Round::Events(vec![StreamEvent::Done]),
        ],
    );
    let orchestrator = orchestrator(dir.path(), provider, no_title_settings());
    let mut chat = orchestrator.new_chat("Quiet tools").await.unwrap();

    let outcome = orchestrator
        .send_message(&mut chat, "make it quietly", vec![], None, &NoopObserver)
        .await
        .unwrap();

    assert_eq!(outcome.message.sender, Sender::Bot);
    assert_eq!(outcome.message.content, "Tools executed successfully.");
    assert!(outcome.message.processed);
}

#[tokio::test]
async fn tool_round_limit_terminates_looping_model() {
    let dir = TempDir::new().unwrap();
    let call = StreamEvent::ToolCall {
        id: String::new(),
        name: "vault_search".into(),
        args: json!({ "name": "anything", "is_note": true }),
    };
    // The model asks for a tool on every round, forever.
    let rounds = (0..10)
        .map(|_| Round::Events(vec![call.clone(), StreamEvent::Done]))
        .collect();
    let settings = Settings {
        auto_title: false,
        max_tool_rounds: 2,
        ..Settings::default()
    };
    let orchestrator = orchestrator(dir.path(), ScriptedProvider::new("", rounds), settings);
    let mut chat = orchestrator.new_chat("Loop").await.unwrap();

    let outcome = orchestrator
        .send_message(&mut chat, "search forever", vec![], None, &NoopObserver)
        .await
        .unwrap();

    // Terminates, and every turn in the log is terminal.
    assert!(outcome.message.processed);
    let messages = chatlog::read_all(&chat.path).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert!(messages.iter().all(|m| m.processed));
}

// ============================================================================
// Streaming-time durability
// ============================================================================

#[tokio::test]
async fn placeholder_never_hits_disk_while_streaming() {
    /// Snapshots the log file at every chunk: it must only ever contain
    /// terminal records, ending with the user turn.
    struct SnapshotObserver {
        path: PathBuf,
        violations: Mutex<Vec<String>>,
    }
    impl TurnObserver for SnapshotObserver {
        fn on_event(&self, event: &TurnEvent) {
            if !matches!(event, TurnEvent::TextChunk(_)) {
                return;
            }
            let text = std::fs::read_to_string(&self.path).unwrap_or_default();
            if text.contains("\"processed\":false") {
                self.violations
                    .lock()
                    .unwrap()
                    .push("unprocessed record on disk".into());
            }
            let last_record = text.lines().rev().find(|l| l.starts_with('{'));
            if !last_record.is_some_and(|l| l.contains("\"sender\":\"user\"")) {
                self.violations
                    .lock()
                    .unwrap()
                    .push(format!("unexpected last record: {last_record:?}"));
            }
        }
    }

    let dir = TempDir::new().unwrap();
    let provider = ScriptedProvider::new(
        "",
        vec![Round::Events(vec![
            StreamEvent::TextDelta("a".into()),
            StreamEvent::TextDelta("b".into()),
            StreamEvent::Done,
        ])],
    );
    let orchestrator = orchestrator(dir.path(), provider, no_title_settings());
    let mut chat = orchestrator.new_chat("Snapshot").await.unwrap();
    let observer = SnapshotObserver {
        path: chat.path.clone(),
        violations: Mutex::new(Vec::new()),
    };

    orchestrator
        .send_message(&mut chat, "stream to me", vec![], None, &observer)
        .await
        .unwrap();

    assert!(observer.violations.lock().unwrap().is_empty());
}

// ============================================================================
// Auto-titling
// ============================================================================

#[tokio::test]
async fn first_turn_renames_chat_before_appending() {
    let dir = TempDir::new().unwrap();
    let provider = ScriptedProvider::new(
        "Cat Care Basics",
        vec![Round::Events(vec![
            StreamEvent::TextDelta("happy to help".into()),
            StreamEvent::Done,
        ])],
    );
    let orchestrator = orchestrator(dir.path(), provider, Settings::default());
    let mut chat = orchestrator.new_chat("New chat").await.unwrap();
    let original_path = chat.path.clone();

    orchestrator
        .send_message(&mut chat, "how do I care for cats?", vec![], None, &NoopObserver)
        .await
        .unwrap();

    assert_ne!(chat.path, original_path);
    assert!(chat.path.to_string_lossy().contains("Cat Care Basics"));
    assert!(!original_path.exists());
    assert_eq!(chatlog::read_all(&chat.path).await.unwrap().len(), 2);
}
