//! Streamable HTTP transport: every client message is POSTed to a single
//! URL, and each response body is either one JSON message or a short event
//! stream that ends once the reply arrives.
//!
//! Servers may assign a session id on any response; it rides along as a
//! header on everything sent afterwards. Once the handshake confirms, a
//! separate GET on the same URL listens for server-initiated traffic, which
//! this client logs and drops.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::StreamExt;
use rust_mcp_schema::schema_utils::{NotificationFromClient, RequestFromClient, ServerMessage};
use rust_mcp_schema::{RequestId, LATEST_PROTOCOL_VERSION};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::sse_wire::{is_event_stream_content_type, SseEvent, SseEventParser};
use super::{
    build_http_client, encode_notification, encode_request, McpTransport, TransportKind,
    REQUEST_TIMEOUT,
};
use crate::core::error::{HandshakeError, TransportError};

const SESSION_ID_HEADER: &str = "mcp-session-id";
const PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";
const JSON_CONTENT_TYPE: &str = "application/json";
const JSON_AND_SSE_ACCEPT: &str = "application/json, text/event-stream";
const MESSAGE_EVENT: &str = "message";

pub struct StreamableHttpTransport {
    name: String,
    http: reqwest::Client,
    url: reqwest::Url,
    next_request_id: AtomicI64,
    session_id: Mutex<Option<String>>,
    protocol_version: Mutex<Option<String>>,
    listener_started: AtomicBool,
    listener_cancel: CancellationToken,
    closed: AtomicBool,
}

impl StreamableHttpTransport {
    pub(crate) fn new(name: &str, url: &str) -> Result<Self, TransportError> {
        let url = reqwest::Url::parse(url)
            .map_err(|err| TransportError::Wire(format!("invalid endpoint '{url}': {err}")))?;
        debug!(server = %name, url = %url, "streamable http endpoint configured");
        Ok(Self {
            name: name.to_string(),
            http: build_http_client()?,
            url,
            next_request_id: AtomicI64::new(0),
            session_id: Mutex::new(None),
            protocol_version: Mutex::new(None),
            listener_started: AtomicBool::new(false),
            listener_cancel: CancellationToken::new(),
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

    fn current_session_id(&self) -> Option<String> {
        self.session_id.lock().ok().and_then(|guard| guard.clone())
    }

    fn store_session_id(&self, value: String) {
        debug!(server = %self.name, session_id = %value, "captured session id");
        if let Ok(mut guard) = self.session_id.lock() {
            *guard = Some(value);
        }
    }

    fn current_protocol_version(&self) -> Option<String> {
        self.protocol_version
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
    }

    /// POSTs one encoded message and captures any session id the response
    /// carries. The returned response still has an unread body.
    async fn post_message(&self, payload: String) -> Result<reqwest::Response, TransportError> {
        let version = self
            .current_protocol_version()
            .unwrap_or_else(|| LATEST_PROTOCOL_VERSION.to_string());
        let mut request = self
            .http
            .post(self.url.clone())
            .timeout(REQUEST_TIMEOUT)
            .header("Content-Type", JSON_CONTENT_TYPE)
            .header("Accept", JSON_AND_SSE_ACCEPT)
            .header(PROTOCOL_VERSION_HEADER, version)
            .body(payload);
        if let Some(session_id) = self.current_session_id() {
            request = request.header(SESSION_ID_HEADER, session_id);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status));
        }
        if let Some(session_id) = response
            .headers()
            .get(SESSION_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
        {
            self.store_session_id(session_id);
        }
        Ok(response)
    }

    /// Scans a streamed response body until the server answers. Messages
    /// interleaved ahead of the reply are logged and dropped.
    async fn next_server_message(
        &self,
        response: reqwest::Response,
    ) -> Result<ServerMessage, TransportError> {
        let mut stream = response.bytes_stream();
        let mut parser = SseEventParser::default();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for event in parser.push(&chunk) {
                if let Some(message) = self.pick_reply(event)? {
                    return Ok(message);
                }
            }
        }
        for event in parser.finish() {
            if let Some(message) = self.pick_reply(event)? {
                return Ok(message);
            }
        }
        Err(TransportError::Wire(
            "event stream ended without a reply".to_string(),
        ))
    }

    fn pick_reply(&self, event: SseEvent) -> Result<Option<ServerMessage>, TransportError> {
        if event.name() != MESSAGE_EVENT || event.data.is_empty() {
            return Ok(None);
        }
        let message = serde_json::from_str::<ServerMessage>(&event.data)
            .map_err(|err| TransportError::Wire(err.to_string()))?;
        if matches!(
            message,
            ServerMessage::Response(_) | ServerMessage::Error(_)
        ) {
            return Ok(Some(message));
        }
        match &message {
            ServerMessage::Request(request) => debug!(
                server = %self.name,
                method = %request.method(),
                "ignoring server-initiated request"
            ),
            _ => debug!(server = %self.name, "ignoring message ahead of the reply"),
        }
        Ok(None)
    }

    fn ensure_listener(&self) {
        let Some(session_id) = self.current_session_id() else {
            return;
        };
        if self.listener_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let http = self.http.clone();
        let url = self.url.clone();
        let name = self.name.clone();
        let protocol_version = self.current_protocol_version();
        let cancel = self.listener_cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = listen_for_server_messages(http, url, name, session_id, protocol_version) => {}
            }
        });
    }
}

/// Holds a GET stream open for messages the server pushes on its own.
/// Failure is not an error: servers without push traffic refuse the GET.
async fn listen_for_server_messages(
    http: reqwest::Client,
    url: reqwest::Url,
    name: String,
    session_id: String,
    protocol_version: Option<String>,
) {
    let mut request = http
        .get(url)
        .header("Accept", "text/event-stream")
        .header(SESSION_ID_HEADER, &session_id);
    if let Some(version) = protocol_version.as_deref() {
        request = request.header(PROTOCOL_VERSION_HEADER, version);
    }

    let response = match request.send().await {
        Ok(response) => response,
        Err(err) => {
            debug!(server = %name, error = %err, "listen stream unavailable");
            return;
        }
    };
    if !response.status().is_success() {
        debug!(server = %name, status = %response.status(), "listen stream refused");
        return;
    }
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    if !is_event_stream_content_type(content_type) {
        debug!(server = %name, content_type = %content_type, "listen stream has wrong content type");
        return;
    }

    let mut stream = response.bytes_stream();
    let mut parser = SseEventParser::default();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                debug!(server = %name, error = %err, "listen stream broke");
                return;
            }
        };
        for event in parser.push(&chunk) {
            log_listen_event(&name, &event);
        }
    }
    for event in parser.finish() {
        log_listen_event(&name, &event);
    }
    debug!(server = %name, "listen stream closed");
}

fn log_listen_event(name: &str, event: &SseEvent) {
    if event.name() != MESSAGE_EVENT {
        debug!(server = %name, event = %event.name(), "ignoring listen stream event");
        return;
    }
    match serde_json::from_str::<ServerMessage>(&event.data) {
        Ok(ServerMessage::Request(request)) => debug!(
            server = %name,
            method = %request.method(),
            "ignoring server-initiated request"
        ),
        Ok(_) => debug!(server = %name, "ignoring message on listen stream"),
        Err(err) => debug!(server = %name, error = %err, "undecodable listen stream payload"),
    }
}

#[async_trait]
impl McpTransport for StreamableHttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::StreamableHttp
    }

    async fn send_request(
        &self,
        request: RequestFromClient,
    ) -> Result<ServerMessage, TransportError> {
        self.ensure_open()?;
        let request_id = RequestId::Integer(self.next_request_id.fetch_add(1, Ordering::SeqCst));
        debug!(server = %self.name, request_id = ?request_id, "posting request");
        let payload = encode_request(request, request_id)?;
        let response = self.post_message(payload).await?;

        let streamed = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(is_event_stream_content_type)
            .unwrap_or(false);
        if streamed {
            self.next_server_message(response).await
        } else {
            let body = response.bytes().await?;
            serde_json::from_slice::<ServerMessage>(&body)
                .map_err(|err| TransportError::Wire(err.to_string()))
        }
    }

    async fn send_notification(
        &self,
        notification: NotificationFromClient,
    ) -> Result<(), TransportError> {
        self.ensure_open()?;
        let payload = encode_notification(notification)?;
        self.post_message(payload).await?;
        Ok(())
    }

    fn note_protocol_version(&self, version: &str) {
        debug!(server = %self.name, version = %version, "protocol version negotiated");
        if let Ok(mut guard) = self.protocol_version.lock() {
            *guard = Some(version.to_string());
        }
    }

    fn confirm_handshake(&self) -> Result<(), HandshakeError> {
        if self.current_session_id().is_none() {
            return Err(HandshakeError::MissingSessionId);
        }
        self.ensure_listener();
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!(server = %self.name, "closing streamable http transport");
        self.listener_cancel.cancel();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;
    use tokio::sync::Mutex as AsyncMutex;

    use super::*;
    use crate::utils::test_utils::{disable_proxies, header_value, read_http_request};

    type Captured = Arc<
        AsyncMutex<
            Vec<(
                String,
                String,
                Option<String>,
                Option<String>,
                Option<String>,
                Option<String>,
            )>,
        >,
    >;

    #[test]
    fn rejects_unparseable_endpoint() {
        assert!(StreamableHttpTransport::new("alpha", "not a url").is_err());
    }

    #[test]
    fn handshake_requires_a_session_id() {
        let transport =
            StreamableHttpTransport::new("alpha", "http://127.0.0.1:1/mcp").expect("transport");
        assert!(matches!(
            transport.confirm_handshake(),
            Err(HandshakeError::MissingSessionId)
        ));
    }

    #[tokio::test]
    async fn posts_resolve_json_and_event_stream_bodies() {
        disable_proxies();
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let captured: Captured = Arc::new(AsyncMutex::new(Vec::new()));
        let captured_for_server = Arc::clone(&captured);

        let server = tokio::spawn(async move {
            for turn in 0..3 {
                let (mut stream, _) = listener.accept().await.map_err(|err| err.to_string())?;
                let (request_line, headers, body) = read_http_request(&mut stream).await?;
                let method = serde_json::from_slice::<serde_json::Value>(&body)
                    .ok()
                    .and_then(|value| {
                        value
                            .get("method")
                            .and_then(|method| method.as_str())
                            .map(str::to_string)
                    })
                    .unwrap_or_default();
                captured_for_server.lock().await.push((
                    request_line,
                    method,
                    header_value(&headers, "accept"),
                    header_value(&headers, "content-type"),
                    header_value(&headers, PROTOCOL_VERSION_HEADER),
                    header_value(&headers, SESSION_ID_HEADER),
                ));

                let response = match turn {
                    0 => {
                        let body = r#"{"jsonrpc":"2.0","id":0,"result":{}}"#;
                        format!(
                            "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\nmcp-session-id: first-session\r\ncontent-length: {}\r\n\r\n{}",
                            body.len(),
                            body
                        )
                    }
                    1 => {
                        let events = concat!(
                            "data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/message\",\"params\":{}}\n\n",
                            "data: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"ok\":true}}\n\n",
                        );
                        format!(
                            "HTTP/1.1 200 OK\r\ncontent-type: Text/Event-Stream; charset=utf-8\r\nmcp-session-id: second-session\r\ncontent-length: {}\r\n\r\n{}",
                            events.len(),
                            events
                        )
                    }
                    _ => {
                        let body = "{}";
                        format!(
                            "HTTP/1.1 202 Accepted\r\ncontent-type: application/json\r\ncontent-length: {}\r\n\r\n{}",
                            body.len(),
                            body
                        )
                    }
                };
                stream
                    .write_all(response.as_bytes())
                    .await
                    .map_err(|err| err.to_string())?;
            }
            Ok::<(), String>(())
        });

        let transport = StreamableHttpTransport::new("alpha", &format!("http://{addr}/mcp"))
            .expect("transport");

        let reply = transport
            .send_request(RequestFromClient::PingRequest(None))
            .await
            .expect("json reply");
        assert!(matches!(reply, ServerMessage::Response(_)));

        transport.note_protocol_version("2025-12-31");

        let reply = transport
            .send_request(RequestFromClient::PingRequest(None))
            .await
            .expect("streamed reply");
        assert!(matches!(reply, ServerMessage::Response(_)));

        transport
            .send_notification(NotificationFromClient::InitializedNotification(None))
            .await
            .expect("notification accepted");

        server.await.expect("join").expect("mock server");

        let captured = captured.lock().await.clone();
        assert_eq!(captured.len(), 3);
        for entry in &captured {
            assert!(entry.0.starts_with("POST /mcp "));
            assert_eq!(entry.2.as_deref(), Some(JSON_AND_SSE_ACCEPT));
            assert_eq!(entry.3.as_deref(), Some(JSON_CONTENT_TYPE));
        }
        assert_eq!(captured[0].1, "ping");
        assert_eq!(captured[0].4.as_deref(), Some(LATEST_PROTOCOL_VERSION));
        assert_eq!(captured[0].5, None);
        assert_eq!(captured[1].1, "ping");
        assert_eq!(captured[1].4.as_deref(), Some("2025-12-31"));
        assert_eq!(captured[1].5.as_deref(), Some("first-session"));
        assert_eq!(captured[2].1, "notifications/initialized");
        assert_eq!(captured[2].5.as_deref(), Some("second-session"));
    }

    #[tokio::test]
    async fn confirmed_handshake_opens_a_listen_stream() {
        disable_proxies();
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.map_err(|err| err.to_string())?;
            let _ = read_http_request(&mut stream).await?;
            let body = r#"{"jsonrpc":"2.0","id":0,"result":{}}"#;
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\nmcp-session-id: listen-session\r\ncontent-length: {}\r\n\r\n{}",
                body.len(),
                body
            );
            stream
                .write_all(response.as_bytes())
                .await
                .map_err(|err| err.to_string())?;
            drop(stream);

            let (mut stream, _) = listener.accept().await.map_err(|err| err.to_string())?;
            let (request_line, headers, _) = read_http_request(&mut stream).await?;
            let event =
                "data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/message\",\"params\":{}}\n\n";
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ncontent-length: {}\r\n\r\n{}",
                event.len(),
                event
            );
            stream
                .write_all(response.as_bytes())
                .await
                .map_err(|err| err.to_string())?;
            Ok::<(String, Vec<(String, String)>), String>((request_line, headers))
        });

        let transport = StreamableHttpTransport::new("alpha", &format!("http://{addr}/mcp"))
            .expect("transport");
        transport
            .send_request(RequestFromClient::PingRequest(None))
            .await
            .expect("session id assigned");
        transport.confirm_handshake().expect("handshake confirmed");

        let (request_line, headers) = server.await.expect("join").expect("mock server");
        assert!(request_line.starts_with("GET /mcp "));
        assert_eq!(
            header_value(&headers, SESSION_ID_HEADER).as_deref(),
            Some("listen-session")
        );
        assert_eq!(
            header_value(&headers, "accept").as_deref(),
            Some("text/event-stream")
        );

        transport.close().await.expect("close");
        let err = transport
            .send_request(RequestFromClient::PingRequest(None))
            .await
            .expect_err("closed transport refuses requests");
        assert!(matches!(err, TransportError::ChannelClosed(_)));
    }
}
