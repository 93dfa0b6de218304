//! One live session per tool server: the common initialize handshake and
//! the request surface the rest of the crate talks to.
//!
//! Every transport converges here. [`connect`] opens the wire a descriptor
//! names, runs the handshake, and hands back the transport/session pair;
//! after that a session is only [`McpSession::list_tools`],
//! [`McpSession::call_tool`], and [`McpSession::close`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rust_mcp_schema::schema_utils::{NotificationFromClient, RequestFromClient, ServerMessage};
use rust_mcp_schema::{
    CallToolRequestParams, ClientCapabilities, Implementation, InitializeRequestParams,
    InitializeResult, ListToolsResult, RpcError, Tool, LATEST_PROTOCOL_VERSION,
};
use serde_json::{Map, Value};
use tracing::debug;

use super::transport::{self, McpTransport, TransportKind};
use crate::core::config::ServerDescriptor;
use crate::core::error::{HandshakeError, McpError, StartupError};

/// A handshaken connection to one tool server.
#[derive(Debug)]
pub struct McpSession {
    name: String,
    kind: TransportKind,
    transport: Arc<dyn McpTransport>,
    details: InitializeResult,
    closed: AtomicBool,
}

/// Opens the transport a descriptor names and runs the initialize
/// handshake. On a post-open failure the transport is closed before the
/// error propagates, so callers only ever hold live pairs.
pub async fn connect(
    descriptor: &ServerDescriptor,
) -> Result<(Arc<dyn McpTransport>, Arc<McpSession>), StartupError> {
    let transport = transport::open(&descriptor.name, &descriptor.endpoint).await?;
    match establish(&descriptor.name, transport.clone()).await {
        Ok(session) => Ok((transport, Arc::new(session))),
        Err(err) => {
            if let Err(close_err) = transport.close().await {
                debug!(
                    server = %descriptor.name,
                    error = %close_err,
                    "discarding transport after failed handshake"
                );
            }
            Err(err)
        }
    }
}

async fn establish(
    name: &str,
    transport: Arc<dyn McpTransport>,
) -> Result<McpSession, StartupError> {
    debug!(server = %name, kind = %transport.kind(), "initializing session");
    let reply = transport
        .send_request(RequestFromClient::InitializeRequest(initialize_params()))
        .await?;
    let details = parse_initialize_result(reply)?;
    transport.note_protocol_version(&details.protocol_version);
    transport.confirm_handshake()?;
    transport
        .send_notification(NotificationFromClient::InitializedNotification(None))
        .await?;
    debug!(
        server = %name,
        server_name = %details.server_info.name,
        protocol_version = %details.protocol_version,
        "session initialized"
    );
    Ok(McpSession {
        name: name.to_string(),
        kind: transport.kind(),
        transport,
        details,
        closed: AtomicBool::new(false),
    })
}

fn initialize_params() -> InitializeRequestParams {
    InitializeRequestParams {
        capabilities: ClientCapabilities::default(),
        client_info: Implementation {
            name: "causerie".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: Some("Causerie MCP Client".to_string()),
            description: Some("Causerie MCP client runtime".to_string()),
            icons: Vec::new(),
            website_url: Some("https://github.com/permacommons/causerie".to_string()),
        },
        meta: None,
        protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
    }
}

fn parse_initialize_result(message: ServerMessage) -> Result<InitializeResult, HandshakeError> {
    let value = match response_value(message) {
        Ok(value) => value,
        Err(McpError::Rpc { code, message }) => {
            return Err(HandshakeError::Rejected(format!("{code}: {message}")))
        }
        Err(err) => return Err(HandshakeError::Malformed(err.to_string())),
    };
    let details = serde_json::from_value::<InitializeResult>(value)
        .map_err(|err| HandshakeError::Malformed(err.to_string()))?;
    if details.protocol_version.trim().is_empty() {
        return Err(HandshakeError::Malformed(
            "blank protocol version".to_string(),
        ));
    }
    Ok(details)
}

impl McpSession {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// What the server said about itself during the handshake.
    pub fn details(&self) -> &InitializeResult {
        &self.details
    }

    fn ensure_open(&self) -> Result<(), McpError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(McpError::Closed);
        }
        Ok(())
    }

    /// Lists the server's tools. One page only; a server with a cursor
    /// past the first page is not followed.
    pub async fn list_tools(&self) -> Result<Vec<Tool>, McpError> {
        self.ensure_open()?;
        let reply = self
            .transport
            .send_request(RequestFromClient::ListToolsRequest(None))
            .await?;
        let listing = parse_reply::<ListToolsResult>(reply)?;
        debug!(server = %self.name, tools = listing.tools.len(), "listed tools");
        Ok(listing.tools)
    }

    /// Calls one tool and returns the raw result payload.
    pub async fn call_tool(
        &self,
        tool: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<Value, McpError> {
        self.ensure_open()?;
        debug!(server = %self.name, tool = %tool, "calling tool");
        let mut params = CallToolRequestParams::new(tool);
        if let Some(arguments) = arguments {
            params = params.with_arguments(arguments);
        }
        let reply = self
            .transport
            .send_request(RequestFromClient::CallToolRequest(params))
            .await?;
        response_value(reply)
    }

    /// Marks the session closed; later calls get [`McpError::Closed`]. The
    /// transport underneath is released on its own.
    pub async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(server = %self.name, "session closed");
        }
    }
}

fn parse_reply<T: serde::de::DeserializeOwned>(message: ServerMessage) -> Result<T, McpError> {
    let value = response_value(message)?;
    serde_json::from_value::<T>(value).map_err(|err| McpError::UnexpectedReply(err.to_string()))
}

/// Extracts the result payload from a reply. Protocol errors keep their
/// code and fold any `data.details` text into the message.
fn response_value(message: ServerMessage) -> Result<Value, McpError> {
    match message {
        ServerMessage::Response(response) => serde_json::to_value(&response.result)
            .map_err(|err| McpError::UnexpectedReply(err.to_string())),
        ServerMessage::Error(error) => {
            let mut message = error.error.message.clone();
            if let Some(details) = rpc_error_details(&error.error) {
                message.push('\n');
                message.push_str(&details);
            }
            Err(McpError::Rpc {
                code: error.error.code,
                message,
            })
        }
        other => Err(McpError::UnexpectedReply(format!("{other:?}"))),
    }
}

fn rpc_error_details(error: &RpcError) -> Option<String> {
    let data = error.data.as_ref()?;
    data.get("details")
        .and_then(|value| value.as_str())
        .map(str::to_string)
        .or_else(|| data.as_str().map(str::to_string))
        .or_else(|| serde_json::to_string_pretty(data).ok())
        .filter(|details| !details.is_empty())
}
