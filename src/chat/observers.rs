//! Turn-response observers.
//!
//! Each completed turn is handed to every observer in registration order.
//! Observers only read the response; the registry and ledger are out of
//! reach by construction.

use crate::core::error::ObserverError;
use crate::genai::{TraceEntry, TurnResponse};
use crate::ui::Console;

pub trait ResponseObserver: Send + Sync {
    fn name(&self) -> &'static str;
    fn observe(&self, response: &TurnResponse) -> Result<(), ObserverError>;
}

/// Prints one `→ name(args)` line per tool call the turn made. Tool
/// results are deliberately left out of the transcript.
pub struct ToolTraceObserver {
    console: Console,
}

impl ToolTraceObserver {
    pub fn new(console: Console) -> Self {
        Self { console }
    }
}

impl ResponseObserver for ToolTraceObserver {
    fn name(&self) -> &'static str {
        "tool-trace"
    }

    fn observe(&self, response: &TurnResponse) -> Result<(), ObserverError> {
        for entry in &response.trace {
            if let TraceEntry::Call { name, args } = entry {
                let args = serde_json::to_string(args).unwrap_or_else(|_| "{}".to_string());
                self.console
                    .line(&format!("→ {name}({args})"))
                    .map_err(|err| ObserverError::new(self.name(), err.to_string()))?;
            }
        }
        Ok(())
    }
}

/// Renders the reply text through the console, styled or plain depending
/// on its markdown setting.
pub struct TextObserver {
    console: Console,
}

impl TextObserver {
    pub fn new(console: Console) -> Self {
        Self { console }
    }
}

impl ResponseObserver for TextObserver {
    fn name(&self) -> &'static str {
        "text"
    }

    fn observe(&self, response: &TurnResponse) -> Result<(), ObserverError> {
        self.console
            .print_markdown(&response.text)
            .map_err(|err| ObserverError::new(self.name(), err.to_string()))
    }
}
