//! The set of live tool sessions for one run.
//!
//! Built once at startup by walking the configured descriptors in document
//! order. Every transport and session that comes up is registered with the
//! resource ledger before the next descriptor is attempted, so a failure
//! partway through still leaves the earlier acquisitions releasable.

use std::sync::Arc;

use tracing::debug;

use crate::core::config::ServerDescriptor;
use crate::core::error::StartupError;
use crate::core::ledger::ResourceLedger;
use crate::mcp::session::{self, McpSession};
use crate::ui::Console;

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Vec<Arc<McpSession>>,
}

impl SessionRegistry {
    /// Connects every descriptor, printing one `name... ok|failed` line per
    /// attempt. The first failure propagates immediately; the registry is
    /// never partially returned, but everything acquired before the failure
    /// stays in the ledger for unwinding.
    pub async fn build(
        descriptors: &[ServerDescriptor],
        ledger: &mut ResourceLedger,
        console: &Console,
    ) -> Result<Self, StartupError> {
        let mut sessions = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            console.status(&format!("Starting MCP server {}... ", descriptor.name));
            match session::connect(descriptor).await {
                Ok((transport, session)) => {
                    console.status_result("ok");
                    ledger.acquire(format!("transport {}", descriptor.name), move || async move {
                        transport.close().await.map_err(|err| err.to_string())
                    });
                    let handle = session.clone();
                    ledger.acquire(format!("session {}", descriptor.name), move || async move {
                        handle.close().await;
                        Ok(())
                    });
                    sessions.push(session);
                }
                Err(err) => {
                    console.status_result("failed");
                    return Err(err);
                }
            }
        }
        debug!(count = sessions.len(), "session registry ready");
        Ok(Self { sessions })
    }

    /// Live sessions in configuration order.
    pub fn sessions(&self) -> &[Arc<McpSession>] {
        &self.sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_utils::SharedBuf;

    fn buffered_console() -> (Console, SharedBuf) {
        let stdout = SharedBuf::default();
        let console = Console::with_writers(
            Box::new(stdout.clone()),
            Box::new(SharedBuf::default()),
            false,
        );
        (console, stdout)
    }

    #[tokio::test]
    async fn no_descriptors_yield_an_empty_registry() {
        let (console, stdout) = buffered_console();
        let mut ledger = ResourceLedger::new();
        let registry = SessionRegistry::build(&[], &mut ledger, &console)
            .await
            .expect("build");
        assert!(registry.is_empty());
        assert!(ledger.is_empty());
        assert!(stdout.contents().is_empty());
    }

    #[cfg(unix)]
    mod with_shell_servers {
        use super::*;
        use crate::core::config::ServerEndpoint;

        const HANDSHAKE_SCRIPT: &str = r#"read -r line; printf '%s\n' '{"jsonrpc":"2.0","id":0,"result":{"protocolVersion":"2025-06-18","capabilities":{},"serverInfo":{"name":"x","version":"0","icons":[]}}}'; sleep 2"#;

        fn shell_descriptor(name: &str) -> ServerDescriptor {
            ServerDescriptor {
                name: name.to_string(),
                endpoint: ServerEndpoint::Stdio {
                    command: "/bin/sh".to_string(),
                    args: vec!["-c".to_string(), HANDSHAKE_SCRIPT.to_string()],
                    cwd: None,
                    env: None,
                },
            }
        }

        fn broken_descriptor(name: &str) -> ServerDescriptor {
            ServerDescriptor {
                name: name.to_string(),
                endpoint: ServerEndpoint::Stdio {
                    command: "/nonexistent/mcp-server".to_string(),
                    args: Vec::new(),
                    cwd: None,
                    env: None,
                },
            }
        }

        #[tokio::test]
        async fn sessions_keep_configuration_order() {
            let (console, stdout) = buffered_console();
            let mut ledger = ResourceLedger::new();
            let descriptors = [shell_descriptor("alpha"), shell_descriptor("beta")];

            let registry = SessionRegistry::build(&descriptors, &mut ledger, &console)
                .await
                .expect("build");

            let names: Vec<&str> = registry.sessions().iter().map(|s| s.name()).collect();
            assert_eq!(names, ["alpha", "beta"]);
            // Transport and session per server.
            assert_eq!(ledger.len(), 4);
            assert_eq!(
                stdout.contents(),
                "Starting MCP server alpha... ok\nStarting MCP server beta... ok\n"
            );
            assert!(ledger.unwind_all().await.is_empty());
        }

        #[tokio::test]
        async fn failure_stops_the_build_but_keeps_earlier_acquisitions() {
            let (console, stdout) = buffered_console();
            let mut ledger = ResourceLedger::new();
            let descriptors = [shell_descriptor("good"), broken_descriptor("bad")];

            let err = SessionRegistry::build(&descriptors, &mut ledger, &console)
                .await
                .expect_err("spawn should fail");

            assert!(matches!(err, StartupError::Transport(_)));
            assert_eq!(ledger.len(), 2);
            assert_eq!(
                stdout.contents(),
                "Starting MCP server good... ok\nStarting MCP server bad... failed\n"
            );
            assert!(ledger.unwind_all().await.is_empty());
        }
    }
}
