//! The conversation loop.
//!
//! One cycle: read a prompt, submit it with the full tool registry, hand
//! the finished turn to every observer, repeat. An empty or
//! whitespace-only prompt (or EOF) ends the session cleanly. A failed
//! turn is reported and the loop keeps going; the history only ever
//! records turns that completed.

pub mod observers;

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::genai::{Content, ModelClient, SubmitOptions};
use crate::mcp::registry::SessionRegistry;
use crate::ui::Console;

use observers::ResponseObserver;

const PROMPT_LABEL: &str = "Message (⏎ to quit): ";

/// Supplies one prompt per cycle. `None` means the input source ended.
#[async_trait]
pub trait PromptReader: Send {
    async fn next_prompt(&mut self) -> io::Result<Option<String>>;
}

/// Reads prompts from the process stdin, one line at a time, off the
/// blocking pool so the runtime stays free while the user types.
pub struct StdinPromptReader {
    console: Console,
}

impl StdinPromptReader {
    pub fn new(console: Console) -> Self {
        Self { console }
    }
}

#[async_trait]
impl PromptReader for StdinPromptReader {
    async fn next_prompt(&mut self) -> io::Result<Option<String>> {
        self.console.prompt_label(PROMPT_LABEL);
        tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            match io::stdin().read_line(&mut line) {
                Ok(0) => Ok(None),
                Ok(_) => Ok(Some(line)),
                Err(err) => Err(err),
            }
        })
        .await
        .map_err(|err| io::Error::other(err.to_string()))?
    }
}

pub struct Conversation {
    client: Arc<dyn ModelClient>,
    registry: SessionRegistry,
    observers: Vec<Box<dyn ResponseObserver>>,
    console: Console,
    language: Option<String>,
    history: Vec<Content>,
}

impl Conversation {
    pub fn new(
        client: Arc<dyn ModelClient>,
        registry: SessionRegistry,
        observers: Vec<Box<dyn ResponseObserver>>,
        console: Console,
        language: Option<String>,
    ) -> Self {
        Self {
            client,
            registry,
            observers,
            console,
            language,
            history: Vec::new(),
        }
    }

    pub fn history(&self) -> &[Content] {
        &self.history
    }

    /// Cycles until the reader signals the end. Turn *n* is fully observed
    /// before the next prompt is read.
    pub async fn run(&mut self, reader: &mut dyn PromptReader) -> io::Result<()> {
        loop {
            let Some(prompt) = reader.next_prompt().await? else {
                return Ok(());
            };
            let prompt = prompt.trim();
            if prompt.is_empty() {
                return Ok(());
            }
            self.take_turn(prompt).await;
        }
    }

    async fn take_turn(&mut self, prompt: &str) {
        let options = SubmitOptions {
            system_instruction: Some(self.system_instruction()),
        };
        match self
            .client
            .submit(&self.history, prompt, &self.registry, &options)
            .await
        {
            Ok(turn) => {
                debug!(
                    appended = turn.contents.len(),
                    trace = turn.response.trace.len(),
                    "turn completed"
                );
                self.history.extend(turn.contents);
                for observer in &self.observers {
                    if let Err(err) = observer.observe(&turn.response) {
                        self.console.error(&format!("⚠️  {err}"));
                        break;
                    }
                }
            }
            Err(err) => {
                self.console.error(&format!("❌ Error: {err}"));
            }
        }
    }

    fn system_instruction(&self) -> String {
        let mut instruction = format!("Current GMT time: {}\n", Utc::now().format("%c"));
        if let Some(language) = &self.language {
            instruction.push_str(&format!("Respond in {language}.\n"));
        }
        instruction.push_str("Reply in Markdown format.");
        instruction
    }
}
