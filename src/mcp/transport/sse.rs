//! SSE transport: a long-lived GET event stream for server messages, with
//! client messages POSTed to an endpoint the stream announces.
//!
//! The first event on the stream must be an `endpoint` event whose data is
//! the POST target, resolved against the stream URL. Every subsequent
//! `message` event carries one JSON-RPC server message.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use rust_mcp_schema::schema_utils::{NotificationFromClient, RequestFromClient, ServerMessage};
use rust_mcp_schema::RequestId;
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::sse_wire::{is_event_stream_content_type, SseEvent, SseEventParser};
use super::{
    await_response, build_http_client, dispatch_server_message, encode_notification,
    encode_request, fail_all_pending, McpTransport, PendingMap, TransportKind, CONNECT_TIMEOUT,
    REQUEST_TIMEOUT,
};
use crate::core::error::TransportError;

const ENDPOINT_EVENT: &str = "endpoint";
const MESSAGE_EVENT: &str = "message";

#[derive(Debug)]
pub struct SseTransport {
    name: String,
    http: reqwest::Client,
    post_url: String,
    pending: PendingMap,
    next_request_id: AtomicI64,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl SseTransport {
    pub(crate) async fn connect(name: &str, url: &str) -> Result<Self, TransportError> {
        let http = build_http_client()?;
        debug!(server = %name, url = %url, "opening sse stream");
        let response = http
            .get(url)
            .header("Accept", "text/event-stream")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status));
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");
        if !is_event_stream_content_type(content_type) {
            return Err(TransportError::Wire(format!(
                "expected an event stream, got '{content_type}'"
            )));
        }

        let mut stream = response.bytes_stream();
        let mut parser = SseEventParser::default();

        // Nothing can be sent until the server names its POST endpoint.
        let (endpoint, leftovers) = tokio::time::timeout(CONNECT_TIMEOUT, async {
            loop {
                let Some(chunk) = stream.next().await else {
                    return Err(TransportError::ChannelClosed(
                        "sse stream ended before the endpoint event".to_string(),
                    ));
                };
                let events = parser.push(&chunk?);
                if let Some(position) =
                    events.iter().position(|event| event.name() == ENDPOINT_EVENT)
                {
                    let mut events = events;
                    let rest = events.split_off(position + 1);
                    let endpoint = events
                        .pop()
                        .map(|event| event.data)
                        .unwrap_or_default();
                    return Ok((endpoint, rest));
                }
            }
        })
        .await
        .map_err(|_| TransportError::Timeout)??;

        let post_url = resolve_endpoint(url, &endpoint)?;
        debug!(server = %name, post_url = %post_url, "sse endpoint received");

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();
        spawn_event_reader(
            stream,
            parser,
            leftovers,
            pending.clone(),
            name.to_string(),
            cancel.clone(),
        );

        Ok(Self {
            name: name.to_string(),
            http,
            post_url,
            pending,
            next_request_id: AtomicI64::new(0),
            cancel,
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ChannelClosed(
                "transport closed".to_string(),
            ));
        }
        Ok(())
    }

    async fn post_payload(&self, payload: String) -> Result<(), TransportError> {
        debug!(server = %self.name, bytes = payload.len(), "posting sse message");
        let response = self
            .http
            .post(&self.post_url)
            .header("Content-Type", "application/json")
            .timeout(REQUEST_TIMEOUT)
            .body(payload)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status));
        }
        Ok(())
    }
}

fn resolve_endpoint(base: &str, endpoint: &str) -> Result<String, TransportError> {
    let base = reqwest::Url::parse(base)
        .map_err(|err| TransportError::Wire(format!("invalid stream url: {err}")))?;
    let resolved = base
        .join(endpoint)
        .map_err(|err| TransportError::Wire(format!("invalid endpoint '{endpoint}': {err}")))?;
    Ok(resolved.to_string())
}

fn spawn_event_reader<C>(
    mut stream: impl futures_util::Stream<Item = reqwest::Result<C>> + Unpin + Send + 'static,
    mut parser: SseEventParser,
    leftovers: Vec<SseEvent>,
    pending: PendingMap,
    server: String,
    cancel: CancellationToken,
) where
    C: AsRef<[u8]> + Send,
{
    tokio::spawn(async move {
        for event in leftovers {
            handle_event(&pending, &server, event).await;
        }
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = stream.next() => next,
            };
            let Some(Ok(chunk)) = next else { break };
            for event in parser.push(chunk.as_ref()) {
                handle_event(&pending, &server, event).await;
            }
        }
        for event in parser.finish() {
            handle_event(&pending, &server, event).await;
        }
        debug!(server = %server, "sse stream ended");
        fail_all_pending(&pending).await;
    });
}

async fn handle_event(pending: &PendingMap, server: &str, event: SseEvent) {
    if event.name() != MESSAGE_EVENT {
        debug!(server = %server, event = %event.name(), "ignoring sse event");
        return;
    }
    match serde_json::from_str::<ServerMessage>(&event.data) {
        Ok(message) => dispatch_server_message(pending, server, message).await,
        Err(err) => debug!(server = %server, error = %err, "undecodable sse message"),
    }
}

#[async_trait]
impl McpTransport for SseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }

    async fn send_request(
        &self,
        request: RequestFromClient,
    ) -> Result<ServerMessage, TransportError> {
        self.ensure_open()?;
        let request_id = RequestId::Integer(self.next_request_id.fetch_add(1, Ordering::SeqCst));
        debug!(server = %self.name, request_id = ?request_id, "sending sse request");
        let payload = encode_request(request, request_id.clone())?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id.clone(), tx);

        if let Err(err) = self.post_payload(payload).await {
            self.pending.lock().await.remove(&request_id);
            return Err(err);
        }

        await_response(&self.pending, &request_id, rx).await
    }

    async fn send_notification(
        &self,
        notification: NotificationFromClient,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        let payload = encode_notification(notification)?;
        self.post_payload(payload).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!(server = %self.name, "closing sse stream");
        self.cancel.cancel();
        fail_all_pending(&self.pending).await;
        Ok(())
    }
}
