//! Gemini `generateContent` client with the tool-calling loop.
//!
//! One [`ModelClient::submit`] call covers a whole conversation turn: the
//! configured tool sessions are listed and declared, the prompt is sent,
//! and any `functionCall` parts in a reply are executed against the owning
//! session with the results fed back until the model answers in text.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::core::error::ServiceError;
use crate::mcp::registry::SessionRegistry;
use crate::mcp::session::McpSession;

use super::{
    Content, FunctionCall, FunctionDeclaration, GenerateRequest, GenerateResponse,
    GenerationConfig, ModelClient, Part, SubmitOptions, SystemInstruction, ToolDeclarations,
    TraceEntry, Turn, TurnResponse,
};

pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

const DEFAULT_MODEL: &str = "gemini-3-pro-preview";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Upper bound on reply-execute cycles within one turn. On hitting it the
/// last reply is returned as-is and its unanswered calls are dropped.
const MAX_TOOL_ROUNDS: usize = 8;

#[derive(Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub temperature: f64,
}

impl std::fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: GEMINI_API_BASE.to_string(),
            temperature: 0.7,
        }
    }

    /// Reads the standard environment: `GEMINI_API_KEY` (or
    /// `GOOGLE_API_KEY`) for the key, with optional `GEMINI_MODEL` and
    /// `GEMINI_BASE_URL` overrides. `None` when no key is set.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .or_else(|_| std::env::var("GOOGLE_API_KEY"))
            .ok()?;
        let mut config = Self::new(api_key);
        if let Ok(model) = std::env::var("GEMINI_MODEL") {
            config.model = model;
        }
        if let Ok(base_url) = std::env::var("GEMINI_BASE_URL") {
            config.base_url = base_url;
        }
        Some(config)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

pub struct GeminiClient {
    config: GeminiConfig,
    http: reqwest::Client,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { config, http })
    }

    fn api_url(&self) -> String {
        format!(
            "{}/{}:generateContent",
            self.config.base_url, self.config.model
        )
    }

    async fn generate(
        &self,
        contents: &[Content],
        declarations: &[FunctionDeclaration],
        options: &SubmitOptions,
    ) -> Result<GenerateResponse, ServiceError> {
        let request = GenerateRequest {
            contents,
            system_instruction: options.system_instruction.as_ref().map(|text| {
                SystemInstruction {
                    parts: vec![Part::text(text.clone())],
                }
            }),
            tools: if declarations.is_empty() {
                Vec::new()
            } else {
                vec![ToolDeclarations {
                    function_declarations: declarations.to_vec(),
                }]
            },
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
            },
        };

        debug!(
            model = %self.config.model,
            contents = contents.len(),
            tools = declarations.len(),
            "generateContent request"
        );
        let response = self
            .http
            .post(self.api_url())
            .header("content-type", "application/json")
            .header("x-goog-api-key", &self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ServiceError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Api {
                status: status.as_u16(),
                message: error_summary(&body),
            });
        }

        response
            .json::<GenerateResponse>()
            .await
            .map_err(|err| ServiceError::Parse(err.to_string()))
    }
}

#[async_trait]
impl ModelClient for GeminiClient {
    async fn submit(
        &self,
        history: &[Content],
        prompt: &str,
        registry: &SessionRegistry,
        options: &SubmitOptions,
    ) -> Result<Turn, ServiceError> {
        let tools = collect_tools(registry).await?;
        let declarations: Vec<FunctionDeclaration> =
            tools.iter().map(|tool| tool.declaration.clone()).collect();

        let mut contents = history.to_vec();
        let turn_from = contents.len();
        contents.push(Content::user(vec![Part::text(prompt)]));

        let mut trace = Vec::new();
        let mut rounds = 0usize;
        loop {
            let reply = self.generate(&contents, &declarations, options).await?;
            let content = reply_content(reply)?;
            let text = collect_text(&content.parts);
            let calls: Vec<FunctionCall> = content
                .parts
                .iter()
                .filter_map(|part| part.function_call.clone())
                .collect();

            if calls.is_empty() {
                contents.push(content);
                return Ok(Turn {
                    contents: contents.split_off(turn_from),
                    response: TurnResponse { text, trace },
                });
            }

            rounds += 1;
            if rounds > MAX_TOOL_ROUNDS {
                debug!("tool round limit reached, returning the reply as-is");
                // The capped reply is not committed, so the next turn's
                // history carries no unanswered call.
                return Ok(Turn {
                    contents: contents.split_off(turn_from),
                    response: TurnResponse { text, trace },
                });
            }

            contents.push(content);
            let mut response_parts = Vec::with_capacity(calls.len());
            for call in calls {
                debug!(tool = %call.name, "executing tool call");
                trace.push(TraceEntry::Call {
                    name: call.name.clone(),
                    args: call.args.clone(),
                });
                let session = owning_session(&tools, &call.name)?;
                let value = session
                    .call_tool(&call.name, Some(call.args.clone()))
                    .await
                    .map_err(|err| ServiceError::ToolCall {
                        tool: call.name.clone(),
                        message: err.to_string(),
                    })?;
                trace.push(TraceEntry::Response {
                    name: call.name.clone(),
                    payload: value.clone(),
                });
                response_parts
                    .push(Part::function_response(call.name, tool_response_payload(&value)));
            }
            contents.push(Content::user(response_parts));
        }
    }
}

struct BoundTool {
    declaration: FunctionDeclaration,
    session: Arc<McpSession>,
}

/// Lists every session's tools and pairs each declaration with its owning
/// session. When two servers expose the same tool name the earlier session
/// keeps it.
async fn collect_tools(registry: &SessionRegistry) -> Result<Vec<BoundTool>, ServiceError> {
    let mut bound: Vec<BoundTool> = Vec::new();
    for session in registry.sessions() {
        let tools = session
            .list_tools()
            .await
            .map_err(|err| ServiceError::ToolListing {
                server: session.name().to_string(),
                message: err.to_string(),
            })?;
        for tool in tools {
            if bound.iter().any(|entry| entry.declaration.name == tool.name) {
                debug!(
                    tool = %tool.name,
                    server = %session.name(),
                    "tool name already declared by an earlier server"
                );
                continue;
            }
            let mut parameters = serde_json::to_value(&tool.input_schema)
                .map_err(|err| ServiceError::Parse(err.to_string()))?;
            sanitize_schema(&mut parameters);
            bound.push(BoundTool {
                declaration: FunctionDeclaration {
                    name: tool.name,
                    description: tool.description,
                    parameters,
                },
                session: session.clone(),
            });
        }
    }
    Ok(bound)
}

fn owning_session(tools: &[BoundTool], name: &str) -> Result<Arc<McpSession>, ServiceError> {
    tools
        .iter()
        .find(|tool| tool.declaration.name == name)
        .map(|tool| tool.session.clone())
        .ok_or_else(|| ServiceError::ToolCall {
            tool: name.to_string(),
            message: "the model called a tool that was never declared".to_string(),
        })
}

fn reply_content(reply: GenerateResponse) -> Result<Content, ServiceError> {
    reply
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .ok_or_else(|| ServiceError::Parse("reply carried no candidates".to_string()))
}

fn collect_text(parts: &[Part]) -> String {
    parts.iter().filter_map(|part| part.text.as_deref()).collect()
}

/// Strips JSON Schema keywords the service rejects, at every level.
fn sanitize_schema(schema: &mut Value) {
    match schema {
        Value::Object(map) => {
            map.remove("$schema");
            map.remove("additionalProperties");
            for value in map.values_mut() {
                sanitize_schema(value);
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                sanitize_schema(item);
            }
        }
        _ => {}
    }
}

/// `functionResponse.response` must be an object; bare values are wrapped.
fn tool_response_payload(value: &Value) -> Value {
    if value.is_object() {
        value.clone()
    } else {
        json!({ "result": value })
    }
}

fn error_summary(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(message) = value.pointer("/error/message").and_then(Value::as_str) {
            return message.to_string();
        }
    }
    let collapsed = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        "<no body>".to_string()
    } else {
        collapsed
    }
}
