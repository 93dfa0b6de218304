//! Subprocess transport: line-delimited JSON-RPC over a child's stdio.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rust_mcp_schema::schema_utils::{NotificationFromClient, RequestFromClient, ServerMessage};
use rust_mcp_schema::RequestId;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::debug;

use super::{
    await_response, dispatch_server_message, encode_notification, encode_request,
    fail_all_pending, McpTransport, PendingMap, TransportKind,
};
use crate::core::error::TransportError;

#[derive(Debug)]
pub struct StdioTransport {
    name: String,
    stdin: Mutex<ChildStdin>,
    child: Mutex<Child>,
    pending: PendingMap,
    next_request_id: AtomicI64,
    closed: AtomicBool,
}

impl StdioTransport {
    pub(crate) async fn spawn(
        name: &str,
        command: &str,
        args: &[String],
        cwd: Option<&Path>,
        env: Option<&HashMap<String, String>>,
    ) -> Result<Self, TransportError> {
        debug!(server = %name, command = %command, args = ?args, "starting stdio server");
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        if let Some(env) = env {
            cmd.envs(env);
        }

        let mut child = cmd.spawn().map_err(|source| TransportError::Spawn {
            command: command.to_string(),
            source,
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::ChannelClosed("child stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::ChannelClosed("child stdout unavailable".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| TransportError::ChannelClosed("child stderr unavailable".to_string()))?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        spawn_stdout_reader(pending.clone(), stdout, name.to_string());
        spawn_stderr_drain(stderr, name.to_string());

        Ok(Self {
            name: name.to_string(),
            stdin: Mutex::new(stdin),
            child: Mutex::new(child),
            pending,
            next_request_id: AtomicI64::new(0),
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

    async fn write_line(&self, payload: &str) -> Result<(), TransportError> {
        debug!(server = %self.name, bytes = payload.len(), "writing stdio message");
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(payload.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }
}

fn spawn_stdout_reader(pending: PendingMap, stdout: ChildStdout, server: String) {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            let value = match serde_json::from_str::<serde_json::Value>(&line) {
                Ok(value) => value,
                Err(_) => continue,
            };
            if let Some(items) = value.as_array() {
                for item in items {
                    if let Ok(message) = serde_json::from_value::<ServerMessage>(item.clone()) {
                        dispatch_server_message(&pending, &server, message).await;
                    }
                }
            } else if let Ok(message) = serde_json::from_value::<ServerMessage>(value) {
                dispatch_server_message(&pending, &server, message).await;
            }
        }
        debug!(server = %server, "stdio stream ended");
        fail_all_pending(&pending).await;
    });
}

fn spawn_stderr_drain(stderr: ChildStderr, server: String) {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            debug!(server = %server, line = %line, "stdio server stderr");
        }
    });
}

#[async_trait]
impl McpTransport for StdioTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    async fn send_request(
        &self,
        request: RequestFromClient,
    ) -> Result<ServerMessage, TransportError> {
        self.ensure_open()?;
        let request_id = RequestId::Integer(self.next_request_id.fetch_add(1, Ordering::SeqCst));
        debug!(server = %self.name, request_id = ?request_id, "sending stdio request");
        let payload = encode_request(request, request_id.clone())?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id.clone(), tx);

        if let Err(err) = self.write_line(&payload).await {
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
        self.write_line(&payload).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!(server = %self.name, "stopping stdio server");
        let mut child = self.child.lock().await;
        if let Err(err) = child.start_kill() {
            // InvalidInput means the child was already reaped.
            if err.kind() != std::io::ErrorKind::InvalidInput {
                return Err(TransportError::Io(err));
            }
        }
        child.wait().await?;
        fail_all_pending(&self.pending).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_command_fails_at_spawn() {
        let err = StdioTransport::spawn(
            "ghost",
            "definitely-not-a-real-binary-4c7a1",
            &[],
            None,
            None,
        )
        .await
        .expect_err("spawn should fail");
        assert!(matches!(err, TransportError::Spawn { ref command, .. }
            if command == "definitely-not-a-real-binary-4c7a1"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn request_round_trips_over_child_stdio() {
        // A one-shot server: consume one line, answer request id 0.
        let script = r#"read -r line; printf '%s\n' '{"jsonrpc":"2.0","id":0,"result":{}}'; sleep 1"#;
        let transport = StdioTransport::spawn(
            "echo",
            "/bin/sh",
            &["-c".to_string(), script.to_string()],
            None,
            None,
        )
        .await
        .expect("spawn");

        let reply = transport
            .send_request(RequestFromClient::PingRequest(None))
            .await
            .expect("response");
        assert!(matches!(reply, ServerMessage::Response(_)));

        transport.close().await.expect("close");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn close_kills_the_child_and_is_idempotent() {
        let transport = StdioTransport::spawn(
            "sleeper",
            "/bin/sh",
            &["-c".to_string(), "sleep 60".to_string()],
            None,
            None,
        )
        .await
        .expect("spawn");

        let started = std::time::Instant::now();
        transport.close().await.expect("close");
        transport.close().await.expect("second close");
        assert!(started.elapsed() < std::time::Duration::from_secs(10));

        let err = transport
            .send_request(RequestFromClient::PingRequest(None))
            .await
            .expect_err("closed transport rejects requests");
        assert!(matches!(err, TransportError::ChannelClosed(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn child_exit_fails_pending_requests() {
        // Exits immediately without answering.
        let transport = StdioTransport::spawn(
            "mute",
            "/bin/sh",
            &["-c".to_string(), "read -r line; exit 0".to_string()],
            None,
            None,
        )
        .await
        .expect("spawn");

        let err = transport
            .send_request(RequestFromClient::PingRequest(None))
            .await
            .expect_err("should fail when the child exits");
        assert!(matches!(err, TransportError::ChannelClosed(_)));
    }
}
