//! Causerie is a terminal chat client that wires MCP tool servers into
//! Gemini conversations.
//!
//! The crate is organized around a small set of collaborating layers:
//! - [`core`] owns server-definition parsing, the error taxonomy, and the
//!   resource ledger that releases everything a run opened.
//! - [`mcp`] provides Model Context Protocol integration: the three
//!   transports, the session handshake, and the per-run session registry.
//! - [`genai`] defines the reasoning-service boundary and the Gemini
//!   client with its tool-calling loop.
//! - [`chat`] runs the interactive conversation loop and the response
//!   observers that render each turn.
//! - [`ui`] writes to the terminal, including the Markdown renderer.
//!
//! Runtime entrypoints live in the binary crate (`src/main.rs`) and route
//! through [`crate::cli::main`], which wires configuration, startup, the
//! session, and the single shutdown unwind point.

pub mod chat;
pub mod cli;
pub mod core;
pub mod genai;
pub mod mcp;
pub mod ui;
pub mod utils;
