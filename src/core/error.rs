//! Error taxonomy shared across the crate.
//!
//! Each enum corresponds to one phase of a run: loading server definitions,
//! opening transports, the initialize handshake, session traffic, model
//! turns, observer output, and teardown. Callers match on the kind to decide
//! whether a failure is fatal for the run or only for the current step.

use std::path::PathBuf;

use thiserror::Error;

/// Problems with the server definition file. `Structure` covers the document
/// as a whole; `Entry` carries the name of the offending server definition.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("server definitions malformed: {reason}")]
    Structure { reason: String },
    #[error("server entry '{name}': {reason}")]
    Entry { name: String, reason: String },
}

/// Failures of the wire itself: spawning a subprocess, HTTP connectivity,
/// broken or undecodable channels.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("http status {0}")]
    Status(reqwest::StatusCode),
    #[error("channel closed: {0}")]
    ChannelClosed(String),
    #[error("timed out waiting for server response")]
    Timeout,
    #[error("wire error: {0}")]
    Wire(String),
}

/// The transport delivered bytes but the initialize exchange went wrong.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("server rejected initialization: {0}")]
    Rejected(String),
    #[error("initialize response malformed: {0}")]
    Malformed(String),
    #[error("missing session id on initialize response")]
    MissingSessionId,
}

/// What the session factory can report. Connection-level failures keep their
/// transport identity; protocol-level failures surface as handshake errors.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
}

/// Errors from an established session's request traffic.
#[derive(Debug, Error)]
pub enum McpError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("server error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("unexpected server reply: {0}")]
    UnexpectedReply(String),
    #[error("session closed")]
    Closed,
}

/// A single model turn failed. The conversation reports it and keeps going.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("api error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("rate limited by the model service")]
    RateLimited,
    #[error("failed to parse model reply: {0}")]
    Parse(String),
    #[error("listing tools on '{server}' failed: {message}")]
    ToolListing { server: String, message: String },
    #[error("tool call '{tool}' failed: {message}")]
    ToolCall { tool: String, message: String },
}

/// Raised by a response observer; aborts the remaining observers for the
/// turn, never the conversation.
#[derive(Debug, Error)]
#[error("observer '{name}' failed: {message}")]
pub struct ObserverError {
    pub name: &'static str,
    pub message: String,
}

impl ObserverError {
    pub fn new(name: &'static str, message: impl Into<String>) -> Self {
        Self {
            name,
            message: message.into(),
        }
    }
}

/// One failed release collected during ledger unwinding.
#[derive(Debug, Error)]
#[error("releasing '{label}' failed: {message}")]
pub struct ShutdownError {
    pub label: String,
    pub message: String,
}
