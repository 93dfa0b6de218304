//! Reasoning-service boundary.
//!
//! Wire types for the Gemini `generateContent` API plus the crate-facing
//! shapes a conversation turn produces. The conversation loop only sees
//! [`ModelClient`]; the HTTP implementation lives in [`client`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::error::ServiceError;
use crate::mcp::registry::SessionRegistry;

pub mod client;

pub use client::{GeminiClient, GeminiConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    pub role: String,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user(parts: Vec<Part>) -> Self {
        Self {
            role: "user".to_string(),
            parts,
        }
    }

    pub fn model(parts: Vec<Part>) -> Self {
        Self {
            role: "model".to_string(),
            parts,
        }
    }
}

/// One part of a content entry. Exactly one field is set in practice;
/// unknown part kinds from the service deserialize with all fields empty
/// and are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(rename = "functionCall", skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(rename = "functionResponse", skip_serializing_if = "Option::is_none")]
    pub function_response: Option<FunctionResponse>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn function_response(name: impl Into<String>, response: Value) -> Self {
        Self {
            function_response: Some(FunctionResponse {
                name: name.into(),
                response,
            }),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub name: String,
    pub response: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionDeclaration {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameters: Value,
}

#[derive(Serialize)]
pub struct GenerateRequest<'a> {
    pub contents: &'a [Content],
    #[serde(
        rename = "systemInstruction",
        skip_serializing_if = "Option::is_none"
    )]
    pub system_instruction: Option<SystemInstruction>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDeclarations>,
    #[serde(rename = "generationConfig")]
    pub generation_config: GenerationConfig,
}

#[derive(Serialize)]
pub struct SystemInstruction {
    pub parts: Vec<Part>,
}

#[derive(Serialize)]
pub struct ToolDeclarations {
    #[serde(rename = "functionDeclarations")]
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Serialize)]
pub struct GenerationConfig {
    pub temperature: f64,
}

#[derive(Debug, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
pub struct Candidate {
    pub content: Option<Content>,
    #[serde(rename = "finishReason")]
    pub finish_reason: Option<String>,
}

/// One step of the tool-invocation trace a turn accumulated, in the order
/// the steps happened.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceEntry {
    Call {
        name: String,
        args: Map<String, Value>,
    },
    Response {
        name: String,
        payload: Value,
    },
}

/// What the observers see: the reply text plus the tool trace.
#[derive(Debug, Clone, Default)]
pub struct TurnResponse {
    pub text: String,
    pub trace: Vec<TraceEntry>,
}

/// A completed turn. `contents` are the entries the loop appends to its
/// history on success, covering the user prompt, any intermediate tool
/// rounds, and the final model reply.
#[derive(Debug)]
pub struct Turn {
    pub contents: Vec<Content>,
    pub response: TurnResponse,
}

#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    pub system_instruction: Option<String>,
}

/// The conversation loop's view of the reasoning service. One call covers
/// a whole turn, tool rounds included.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn submit(
        &self,
        history: &[Content],
        prompt: &str,
        registry: &SessionRegistry,
        options: &SubmitOptions,
    ) -> Result<Turn, ServiceError>;
}
