//! Extension tools: subprocess servers speaking JSON-RPC 2.0 over stdio.
//!
//! Qualified name scheme: `ext_<serverId>__<toolName>`. The prefix cannot
//! collide with built-in tool names (those never start with `ext_`), and a
//! server id or tool name containing `__` is rejected at load so the scheme
//! stays parseable. A disconnected server's tools fail with
//! `ServerUnavailable`; the manager never reconnects on its own.

mod protocol;
mod session;

pub use protocol::{encode_frame, FrameDecoder, FramingMode, PROTOCOL_VERSION};
pub use session::{
    DiscoveredTool, ExtensionServerConfig, ExtensionSession, ServerInfo, CONNECT_TIMEOUT,
    CONNECT_TIMEOUT_BROWSER, REQUEST_TIMEOUT,
};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{ExtensionError, ToolErrorKind};
use crate::tools::{ToolOutcome, ToolSpec, EXTENSION_TOOL_PREFIX};

/// Builds the qualified tool name for a server/tool pair.
pub fn qualified_name(server_id: &str, raw_name: &str) -> String {
    format!("{EXTENSION_TOOL_PREFIX}{server_id}__{raw_name}")
}

/// Splits a qualified name into (server id, raw tool name).
pub fn parse_qualified(qualified: &str) -> Option<(&str, &str)> {
    let rest = qualified.strip_prefix(EXTENSION_TOOL_PREFIX)?;
    rest.split_once("__")
}

/// Per-agent manager of extension servers and their aggregate tool list.
#[derive(Default)]
pub struct ExtensionManager {
    servers: RwLock<HashMap<String, Arc<ExtensionSession>>>,
    tools: RwLock<Vec<DiscoveredTool>>,
}

impl ExtensionManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Connects every configured server. A server that fails to connect is
    /// skipped with a warning; a malformed id rejects that entry outright.
    pub async fn load(self: &Arc<Self>, configs: &[ExtensionServerConfig]) {
        let (disconnect_tx, mut disconnect_rx) = tokio::sync::mpsc::unbounded_channel::<String>();

        // Disconnect watcher: drop the server's tools and log once.
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                while let Some(server_id) = disconnect_rx.recv().await {
                    warn!(server = %server_id, "extension server disconnected");
                    manager.remove_server_tools(&server_id).await;
                }
            });
        }

        for config in configs {
            if let Err(e) = validate_server_id(&config.id) {
                warn!(server = %config.id, error = %e, "rejecting extension server");
                continue;
            }
            match ExtensionSession::connect(config, disconnect_tx.clone()).await {
                Ok((session, tools)) => {
                    info!(server = %config.id, tools = tools.len(), "extension server ready");
                    self.servers
                        .write()
                        .await
                        .insert(config.id.clone(), session);
                    self.tools.write().await.extend(tools);
                }
                Err(e) => {
                    warn!(server = %config.id, error = %e, "extension server failed to connect");
                }
            }
        }
    }

    async fn remove_server_tools(&self, server_id: &str) {
        let prefix = format!("{EXTENSION_TOOL_PREFIX}{server_id}__");
        self.tools
            .write()
            .await
            .retain(|t| !t.qualified.starts_with(&prefix));
    }

    /// Aggregate tool list as prompt-facing specs.
    pub async fn tool_specs(&self) -> Vec<ToolSpec> {
        self.tools
            .read()
            .await
            .iter()
            .map(|t| ToolSpec {
                name: t.qualified.clone(),
                description: t.description.clone(),
                input_schema: t.input_schema.clone(),
                rarely_used: false,
            })
            .collect()
    }

    /// Executes a qualified tool call. Tools on a disconnected server fail
    /// with `ServerUnavailable`; there is no automatic reconnect.
    pub async fn call(
        &self,
        qualified: &str,
        arguments: Value,
        timeout: Duration,
    ) -> ToolOutcome {
        let Some((server_id, raw_name)) = parse_qualified(qualified) else {
            return ToolOutcome::fail(
                ToolErrorKind::UnknownTool,
                format!("malformed extension tool name `{qualified}`"),
            );
        };
        let session = {
            let servers = self.servers.read().await;
            servers.get(server_id).cloned()
        };
        let Some(session) = session else {
            return ToolOutcome::fail(
                ToolErrorKind::ServerUnavailable,
                format!("extension server `{server_id}` is not configured"),
            );
        };
        if !session.is_connected() {
            return ToolOutcome::fail(
                ToolErrorKind::ServerUnavailable,
                format!("extension server `{server_id}` is disconnected"),
            );
        }
        match session.call_tool(raw_name, arguments, timeout).await {
            Ok((text, false)) => ToolOutcome::ok(text),
            Ok((text, true)) => ToolOutcome::fail(ToolErrorKind::Failed, text),
            Err(ExtensionError::RequestTimeout(t)) => ToolOutcome::fail(
                ToolErrorKind::Timeout,
                format!("extension call timed out after {t:?}"),
            ),
            Err(e) => ToolOutcome::fail(ToolErrorKind::Failed, e.to_string()),
        }
    }

    /// Terminates every server process (TERM, then KILL after the grace
    /// period). Does not wait for process exit.
    pub async fn shutdown_all(&self) {
        let servers: Vec<Arc<ExtensionSession>> =
            self.servers.write().await.drain().map(|(_, s)| s).collect();
        self.tools.write().await.clear();
        for session in servers {
            session.shutdown().await;
        }
    }

    /// Connected server ids, for diagnostics.
    pub async fn connected_servers(&self) -> Vec<String> {
        self.servers
            .read()
            .await
            .iter()
            .filter(|(_, s)| s.is_connected())
            .map(|(id, _)| id.clone())
            .collect()
    }
}

fn validate_server_id(id: &str) -> Result<(), ExtensionError> {
    if id.is_empty() {
        return Err(ExtensionError::InvalidServer("empty server id".into()));
    }
    if id.contains("__") {
        return Err(ExtensionError::InvalidServer(format!(
            "server id `{id}` contains `__`"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Shell-scripted fake server speaking line-framed JSON-RPC: answers
    /// initialize (id 1), tools/list (id 2), and one tools/call (id 3).
    #[cfg(unix)]
    const FAKE_SERVER: &str = r#"
read init
printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"serverInfo":{"name":"fake","version":"0"},"capabilities":{}}}'
read notif
read listreq
printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"ping","description":"pong tool","inputSchema":{"type":"object"}}]}}'
read callreq
printf '%s\n' '{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"pong"}]}}'
sleep 1
"#;

    #[cfg(unix)]
    fn sh_server(script: &str) -> ExtensionServerConfig {
        ExtensionServerConfig {
            id: "fake".into(),
            command: "sh".into(),
            args: vec!["-c".into(), script.into()],
            env: Default::default(),
            transport: FramingMode::Line,
            connect_timeout_ms: Some(5_000),
        }
    }

    /// **Scenario**: full handshake against a scripted server, then a
    /// qualified tools/call through the manager.
    #[cfg(unix)]
    #[tokio::test]
    async fn connect_list_and_call_against_scripted_server() {
        let manager = ExtensionManager::new();
        manager.load(&[sh_server(FAKE_SERVER)]).await;

        assert_eq!(manager.connected_servers().await, vec!["fake".to_string()]);
        let specs = manager.tool_specs().await;
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "ext_fake__ping");

        let out = manager
            .call("ext_fake__ping", serde_json::json!({}), REQUEST_TIMEOUT)
            .await;
        assert!(out.success, "{}", out.content);
        assert_eq!(out.content, "pong");

        manager.shutdown_all().await;
    }

    /// Boundary: fatal stderr during initialize rejects the connect well
    /// before the connect timeout.
    #[cfg(unix)]
    #[tokio::test]
    async fn fatal_stderr_rejects_connect() {
        let config = sh_server("echo 'Cannot find module mcp' 1>&2; sleep 30");
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let started = std::time::Instant::now();
        let result = ExtensionSession::connect(&config, tx).await;
        assert!(matches!(result, Err(ExtensionError::FatalStderr(_))));
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn premature_exit_rejects_connect() {
        let config = sh_server("exit 0");
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let result = ExtensionSession::connect(&config, tx).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn spawn_failure_is_reported() {
        let config = ExtensionServerConfig {
            id: "ghost".into(),
            command: "definitely-not-a-real-binary-xyz".into(),
            args: vec![],
            env: Default::default(),
            transport: FramingMode::Line,
            connect_timeout_ms: Some(2_000),
        };
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let result = ExtensionSession::connect(&config, tx).await;
        assert!(matches!(result, Err(ExtensionError::Spawn { .. })));
    }

    #[test]
    fn qualified_round_trip() {
        let q = qualified_name("files", "read_file");
        assert_eq!(q, "ext_files__read_file");
        assert_eq!(parse_qualified(&q), Some(("files", "read_file")));
        assert_eq!(parse_qualified("create_note"), None);
    }

    #[test]
    fn server_id_validation() {
        assert!(validate_server_id("browser").is_ok());
        assert!(validate_server_id("bad__id").is_err());
        assert!(validate_server_id("").is_err());
    }

    #[tokio::test]
    async fn call_to_unknown_server_is_unavailable() {
        let m = ExtensionManager::new();
        let out = m
            .call("ext_ghost__tool", serde_json::json!({}), REQUEST_TIMEOUT)
            .await;
        assert!(!out.success);
        assert_eq!(out.error, Some(ToolErrorKind::ServerUnavailable));
    }

    #[tokio::test]
    async fn malformed_qualified_name_is_unknown_tool() {
        let m = ExtensionManager::new();
        let out = m
            .call("ext_noseparator", serde_json::json!({}), REQUEST_TIMEOUT)
            .await;
        assert_eq!(out.error, Some(ToolErrorKind::UnknownTool));
    }
}
