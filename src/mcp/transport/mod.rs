//! Wire transports for the Model Context Protocol.
//!
//! Three channel styles hide behind [`McpTransport`]: a spawned subprocess
//! speaking line-delimited JSON-RPC ([`stdio`]), a server-push event stream
//! with a separate POST endpoint ([`sse`]), and per-message HTTP posts with
//! optional streamed response bodies ([`streamable_http`]). Sessions talk to
//! the trait; [`open`] is the only place that knows which is which.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_mcp_schema::schema_utils::{
    ClientMessage, FromMessage, MessageFromClient, NotificationFromClient, RequestFromClient,
    ServerMessage,
};
use rust_mcp_schema::RequestId;
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

use crate::core::config::ServerEndpoint;
use crate::core::error::{HandshakeError, TransportError};

pub mod sse;
pub mod sse_wire;
pub mod stdio;
pub mod streamable_http;

pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const POOL_MAX_IDLE_PER_HOST: usize = 8;

/// HTTP client shared by the URL-based transports. No overall request
/// timeout: event streams stay open indefinitely, so POSTs carry their own
/// per-request deadline instead.
pub(crate) fn build_http_client() -> Result<reqwest::Client, TransportError> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .build()
        .map_err(TransportError::Http)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Stdio,
    Sse,
    StreamableHttp,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TransportKind::Stdio => "stdio",
            TransportKind::Sse => "sse",
            TransportKind::StreamableHttp => "streamable-http",
        };
        f.write_str(label)
    }
}

/// One bidirectional JSON-RPC channel to a tool server. Implementations
/// assign request ids and pair replies with their requests; callers see a
/// plain request/response surface regardless of the wire underneath.
#[async_trait]
pub trait McpTransport: Send + Sync {
    fn kind(&self) -> TransportKind;

    async fn send_request(
        &self,
        request: RequestFromClient,
    ) -> Result<ServerMessage, TransportError>;

    async fn send_notification(
        &self,
        notification: NotificationFromClient,
    ) -> Result<(), TransportError>;

    /// Invoked after a successful initialize with the server's negotiated
    /// protocol version. Only streamable HTTP has a use for it.
    fn note_protocol_version(&self, _version: &str) {}

    /// Transport-specific handshake requirements, checked after the
    /// initialize response parses.
    fn confirm_handshake(&self) -> Result<(), HandshakeError> {
        Ok(())
    }

    /// Tears the channel down. Idempotent; a second close is a no-op.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Trait-object `Debug` so types holding an `Arc<dyn McpTransport>` can
/// derive it.
impl fmt::Debug for dyn McpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("McpTransport")
            .field("kind", &self.kind())
            .finish_non_exhaustive()
    }
}

/// Opens the transport a descriptor endpoint calls for.
pub async fn open(
    name: &str,
    endpoint: &ServerEndpoint,
) -> Result<Arc<dyn McpTransport>, TransportError> {
    match endpoint {
        ServerEndpoint::Stdio {
            command,
            args,
            cwd,
            env,
        } => Ok(Arc::new(
            stdio::StdioTransport::spawn(name, command, args, cwd.as_deref(), env.as_ref()).await?,
        )),
        ServerEndpoint::Sse { url } => {
            Ok(Arc::new(sse::SseTransport::connect(name, url).await?))
        }
        ServerEndpoint::StreamableHttp { url } => Ok(Arc::new(
            streamable_http::StreamableHttpTransport::new(name, url)?,
        )),
    }
}

pub(crate) type PendingMap = Arc<Mutex<HashMap<RequestId, oneshot::Sender<ServerMessage>>>>;

pub(crate) fn encode_request(
    request: RequestFromClient,
    request_id: RequestId,
) -> Result<String, TransportError> {
    let message = ClientMessage::from_message(
        MessageFromClient::RequestFromClient(request),
        Some(request_id),
    )
    .map_err(|err| TransportError::Wire(err.to_string()))?;
    serde_json::to_string(&message).map_err(|err| TransportError::Wire(err.to_string()))
}

pub(crate) fn encode_notification(
    notification: NotificationFromClient,
) -> Result<String, TransportError> {
    let message =
        ClientMessage::from_message(MessageFromClient::NotificationFromClient(notification), None)
            .map_err(|err| TransportError::Wire(err.to_string()))?;
    serde_json::to_string(&message).map_err(|err| TransportError::Wire(err.to_string()))
}

/// Routes a decoded server message. Responses and errors resolve their
/// pending request; server-initiated requests and notifications are logged
/// and dropped, since this client offers no sampling or elicitation surface.
pub(crate) async fn dispatch_server_message(
    pending: &PendingMap,
    server: &str,
    message: ServerMessage,
) {
    match &message {
        ServerMessage::Response(response) => {
            let id = response.id.clone();
            debug!(server = %server, response_id = ?id, "received response");
            if let Some(tx) = pending.lock().await.remove(&id) {
                let _ = tx.send(message);
            } else {
                debug!(server = %server, response_id = ?id, "response without a waiting request");
            }
        }
        ServerMessage::Error(error) => {
            debug!(
                server = %server,
                error_id = ?error.id,
                error_code = error.error.code,
                "received error"
            );
            if let Some(id) = error.id.as_ref() {
                if let Some(tx) = pending.lock().await.remove(id) {
                    let _ = tx.send(message);
                    return;
                }
            }
            debug!(server = %server, "error without a waiting request");
        }
        ServerMessage::Request(request) => {
            debug!(
                server = %server,
                method = %request.method(),
                "ignoring server-initiated request"
            );
        }
        ServerMessage::Notification(_) => {
            debug!(server = %server, "ignoring server notification");
        }
    }
}

/// Drops every pending sender, failing the receivers with a closed-channel
/// error. Called when a transport's read side ends.
pub(crate) async fn fail_all_pending(pending: &PendingMap) {
    pending.lock().await.clear();
}

/// Waits for the reader side to resolve `request_id`. A dropped sender means
/// the channel died under us; a timeout abandons the request.
pub(crate) async fn await_response(
    pending: &PendingMap,
    request_id: &RequestId,
    rx: oneshot::Receiver<ServerMessage>,
) -> Result<ServerMessage, TransportError> {
    match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
        Ok(Ok(message)) => Ok(message),
        Ok(Err(_)) => Err(TransportError::ChannelClosed(
            "server stopped responding".to_string(),
        )),
        Err(_) => {
            pending.lock().await.remove(request_id);
            Err(TransportError::Timeout)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dispatch_resolves_pending_response() {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (tx, rx) = oneshot::channel();
        pending
            .lock()
            .await
            .insert(RequestId::Integer(7), tx);

        let message: ServerMessage = serde_json::from_value(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 7,
            "result": {}
        }))
        .expect("message parses");
        dispatch_server_message(&pending, "alpha", message).await;

        let delivered = rx.await.expect("delivered");
        assert!(matches!(delivered, ServerMessage::Response(_)));
        assert!(pending.lock().await.is_empty());
    }

    #[tokio::test]
    async fn dispatch_ignores_unknown_ids_and_notifications() {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let stray: ServerMessage = serde_json::from_value(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 99,
            "result": {}
        }))
        .expect("parses");
        dispatch_server_message(&pending, "alpha", stray).await;

        let notification: ServerMessage = serde_json::from_value(serde_json::json!({
            "jsonrpc": "2.0",
            "method": "notifications/tools/list_changed"
        }))
        .expect("parses");
        dispatch_server_message(&pending, "alpha", notification).await;
    }

    #[tokio::test]
    async fn failing_pending_breaks_waiters() {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (tx, rx) = oneshot::channel();
        pending.lock().await.insert(RequestId::Integer(0), tx);

        fail_all_pending(&pending).await;
        let err = await_response(&pending, &RequestId::Integer(0), rx)
            .await
            .expect_err("should fail");
        assert!(matches!(err, TransportError::ChannelClosed(_)));
    }
}
