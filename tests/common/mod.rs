//! Shared test support: a scripted provider and a collecting observer.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use quill::provider::{
    Capabilities, CompleteRequest, ContinueRequest, ConverseRequest, Provider, StreamEvent,
};
use quill::{QuillError, Result, TurnEvent, TurnObserver};

/// One scripted response round for the provider.
pub enum Round {
    /// Emit these events, then close the channel.
    Events(Vec<StreamEvent>),
    /// Fail the call itself before any streaming starts.
    Fail(String),
}

/// Provider that replays scripted rounds: `converse` consumes the first
/// round, each `continue_with_tools` the next.
pub struct ScriptedProvider {
    capabilities: Capabilities,
    completion: String,
    rounds: Mutex<VecDeque<Round>>,
}

impl ScriptedProvider {
    pub fn new(completion: &str, rounds: Vec<Round>) -> Self {
        Self {
            capabilities: Capabilities {
                supports_tools: true,
                supports_streaming: true,
                supports_grounded_search: false,
                supports_image_input: true,
                max_context_tokens: 100_000,
            },
            completion: completion.into(),
            rounds: Mutex::new(rounds.into()),
        }
    }

    fn next_round(&self) -> Result<mpsc::Receiver<StreamEvent>> {
        let round = self
            .rounds
            .lock()
            .expect("script lock poisoned")
            .pop_front()
            .unwrap_or(Round::Events(vec![StreamEvent::Done]));

        match round {
            Round::Fail(message) => Err(QuillError::Provider(message)),
            Round::Events(events) => {
                let (tx, rx) = mpsc::channel(16);
                tokio::spawn(async move {
                    for event in events {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                });
                Ok(rx)
            }
        }
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    async fn complete(&self, _request: CompleteRequest) -> Result<String> {
        Ok(self.completion.clone())
    }

    async fn converse(&self, _request: ConverseRequest) -> Result<mpsc::Receiver<StreamEvent>> {
        self.next_round()
    }

    async fn continue_with_tools(
        &self,
        _request: ContinueRequest,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        self.next_round()
    }
}

/// Observer that records every event it sees.
#[derive(Default)]
pub struct CollectingObserver {
    pub events: Mutex<Vec<TurnEvent>>,
}

impl TurnObserver for CollectingObserver {
    fn on_event(&self, event: &TurnEvent) {
        self.events
            .lock()
            .expect("observer lock poisoned")
            .push(event.clone());
    }
}

impl CollectingObserver {
    pub fn streamed_text(&self) -> String {
        self.events
            .lock()
            .expect("observer lock poisoned")
            .iter()
            .filter_map(|event| match event {
                TurnEvent::TextChunk(chunk) => Some(chunk.clone()),
                _ => None,
            })
            .collect()
    }
}
