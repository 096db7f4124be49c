//! One extension server session: spawn, handshake, request/response.
//!
//! The child speaks JSON-RPC 2.0 over piped stdio (framing per server entry).
//! A reader task drains stdout and routes responses into the pending map; a
//! stderr task watches for fatal patterns during startup. Requests to the
//! same server are serialised by the pending-request map keyed on request id;
//! different servers are fully independent.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use super::protocol::{
    encode_frame, FrameDecoder, FramingMode, IncomingMessage, JsonRpcNotification, JsonRpcRequest,
    PROTOCOL_VERSION,
};
use crate::error::ExtensionError;

/// Default per-request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Default connect timeout; browser-automation servers get the longer one.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
pub const CONNECT_TIMEOUT_BROWSER: Duration = Duration::from_secs(45);
/// Grace period between TERM and KILL on shutdown.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// stderr substrings that abort the connect immediately.
const FATAL_STDERR_PATTERNS: &[&str] = &[
    "MODULE_NOT_FOUND",
    "Cannot find module",
    "command not found",
    "No such file or directory",
    "401 Unauthorized",
    "authentication failed",
];

/// Static configuration for one extension server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionServerConfig {
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub transport: FramingMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,
}

impl ExtensionServerConfig {
    pub fn connect_timeout(&self) -> Duration {
        if let Some(ms) = self.connect_timeout_ms {
            return Duration::from_millis(ms);
        }
        let hint = format!("{} {}", self.id, self.command).to_lowercase();
        if ["playwright", "puppeteer", "browser"].iter().any(|p| hint.contains(p)) {
            CONNECT_TIMEOUT_BROWSER
        } else {
            CONNECT_TIMEOUT
        }
    }
}

/// One tool discovered from `tools/list`.
#[derive(Clone, Debug)]
pub struct DiscoveredTool {
    pub qualified: String,
    pub raw_name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Info from the server's `initialize` response.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

type Pending = Mutex<HashMap<u64, oneshot::Sender<Result<Value, String>>>>;

/// A connected (or formerly connected) extension server.
pub struct ExtensionSession {
    pub server_id: String,
    framing: FramingMode,
    stdin: Mutex<ChildStdin>,
    child: Mutex<Option<Child>>,
    pending: Arc<Pending>,
    next_id: AtomicU64,
    connected: Arc<AtomicBool>,
    server_info: std::sync::OnceLock<ServerInfo>,
}

impl ExtensionSession {
    /// Spawns the server, completes the initialize handshake, and lists its
    /// tools. `on_disconnect` fires once when the stdout stream ends.
    pub async fn connect(
        config: &ExtensionServerConfig,
        on_disconnect: tokio::sync::mpsc::UnboundedSender<String>,
    ) -> Result<(Arc<Self>, Vec<DiscoveredTool>), ExtensionError> {
        let mut child = Command::new(&config.command)
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExtensionError::Spawn {
                command: config.command.clone(),
                source: e,
            })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            ExtensionError::Protocol("child stdin unavailable".into())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            ExtensionError::Protocol("child stdout unavailable".into())
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            ExtensionError::Protocol("child stderr unavailable".into())
        })?;

        let pending: Arc<Pending> = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(false));

        // Reader task: frame stdout, route responses, answer roots/list.
        {
            let pending = Arc::clone(&pending);
            let connected = Arc::clone(&connected);
            let server_id = config.id.clone();
            tokio::spawn(async move {
                let mut reader = BufReader::new(stdout);
                let mut decoder = FrameDecoder::new();
                let mut chunk = [0u8; 4096];
                loop {
                    match reader.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => decoder.push(&chunk[..n]),
                    }
                    while let Some(frame) = decoder.next_frame() {
                        let msg: IncomingMessage = match serde_json::from_str(&frame) {
                            Ok(m) => m,
                            Err(e) => {
                                warn!(server = %server_id, error = %e, "unparseable frame");
                                continue;
                            }
                        };
                        if let Some(id) = msg.response_id() {
                            let outcome = match (msg.result, msg.error) {
                                (_, Some(err)) => Err(err.message),
                                (Some(result), None) => Ok(result),
                                (None, None) => Ok(Value::Null),
                            };
                            if let Some(tx) = pending.lock().await.remove(&id) {
                                let _ = tx.send(outcome);
                            }
                        }
                        // Server-initiated requests/notifications are ignored
                        // for the tools-only protocol subset.
                    }
                }
                connected.store(false, Ordering::SeqCst);
                // Fail anything still waiting.
                for (_, tx) in pending.lock().await.drain() {
                    let _ = tx.send(Err("server disconnected".into()));
                }
                let _ = on_disconnect.send(server_id);
            });
        }

        // stderr watcher: surface fatal startup patterns; log the rest.
        let (fatal_tx, mut fatal_rx) = oneshot::channel::<String>();
        {
            let server_id = config.id.clone();
            tokio::spawn(async move {
                use tokio::io::AsyncBufReadExt;
                let mut lines = BufReader::new(stderr).lines();
                let mut fatal_tx = Some(fatal_tx);
                while let Ok(Some(line)) = lines.next_line().await {
                    if FATAL_STDERR_PATTERNS.iter().any(|p| line.contains(p)) {
                        if let Some(tx) = fatal_tx.take() {
                            let _ = tx.send(line.clone());
                        }
                    }
                    debug!(server = %server_id, "stderr: {line}");
                }
            });
        }

        let session = Arc::new(Self {
            server_id: config.id.clone(),
            framing: config.transport,
            stdin: Mutex::new(stdin),
            child: Mutex::new(Some(child)),
            pending,
            next_id: AtomicU64::new(1),
            connected: Arc::clone(&connected),
            server_info: std::sync::OnceLock::new(),
        });

        // Handshake, bounded by the connect timeout and aborted by fatal
        // stderr or child exit.
        let connect_timeout = config.connect_timeout();
        let init = async {
            let result = session
                .request(
                    "initialize",
                    json!({
                        "protocolVersion": PROTOCOL_VERSION,
                        "capabilities": { "tools": {} },
                        "clientInfo": {
                            "name": "attache",
                            "version": env!("CARGO_PKG_VERSION"),
                        },
                    }),
                    connect_timeout,
                )
                .await
                .map_err(|e| match e {
                    ExtensionError::Protocol(m) => ExtensionError::Initialize(m),
                    other => other,
                })?;
            let info: ServerInfo = result
                .get("serverInfo")
                .cloned()
                .map(|v| serde_json::from_value(v).unwrap_or_default())
                .unwrap_or_default();
            session.notify("notifications/initialized", json!({})).await?;
            Ok::<ServerInfo, ExtensionError>(info)
        };

        let info = tokio::select! {
            r = init => r?,
            line = &mut fatal_rx => {
                session.shutdown().await;
                return Err(ExtensionError::FatalStderr(
                    line.unwrap_or_else(|_| "stderr closed".into()),
                ));
            }
        };

        connected.store(true, Ordering::SeqCst);
        debug!(server = %config.id, name = %info.name, version = %info.version, "extension connected");
        let _ = session.server_info.set(info);

        let tools = session.list_tools().await?;
        Ok((session, tools))
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Server name/version from the initialize response.
    pub fn server_info(&self) -> ServerInfo {
        self.server_info.get().cloned().unwrap_or_default()
    }

    async fn write_payload(&self, payload: &str) -> Result<(), ExtensionError> {
        let bytes = encode_frame(self.framing, payload);
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(&bytes).await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), ExtensionError> {
        let payload = serde_json::to_string(&JsonRpcNotification::new(method, params))
            .map_err(|e| ExtensionError::Protocol(e.to_string()))?;
        self.write_payload(&payload).await
    }

    /// Sends a request and waits for its response (serialised per server by
    /// the pending map).
    pub async fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, ExtensionError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let payload = serde_json::to_string(&JsonRpcRequest::new(id, method, params))
            .map_err(|e| ExtensionError::Protocol(e.to_string()))?;
        if let Err(e) = self.write_payload(&payload).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(message))) => Err(ExtensionError::Protocol(message)),
            Ok(Err(_)) => Err(ExtensionError::PrematureExit(self.server_id.clone())),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(ExtensionError::RequestTimeout(timeout))
            }
        }
    }

    /// `tools/list`, mapped to qualified names.
    pub async fn list_tools(&self) -> Result<Vec<DiscoveredTool>, ExtensionError> {
        let result = self.request("tools/list", json!({}), REQUEST_TIMEOUT).await?;
        let raw = result
            .get("tools")
            .and_then(|t| t.as_array())
            .cloned()
            .unwrap_or_default();
        let mut out = Vec::with_capacity(raw.len());
        for tool in raw {
            let name = tool
                .get("name")
                .and_then(|n| n.as_str())
                .ok_or_else(|| ExtensionError::Protocol("tool without name".into()))?
                .to_string();
            if name.contains("__") {
                return Err(ExtensionError::InvalidServer(format!(
                    "tool name `{name}` contains `__`"
                )));
            }
            out.push(DiscoveredTool {
                qualified: super::qualified_name(&self.server_id, &name),
                raw_name: name,
                description: tool
                    .get("description")
                    .and_then(|d| d.as_str())
                    .unwrap_or_default()
                    .to_string(),
                input_schema: tool.get("inputSchema").cloned().unwrap_or(json!({})),
            });
        }
        Ok(out)
    }

    /// `tools/call`; returns the joined text content or the error envelope.
    pub async fn call_tool(
        &self,
        raw_name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<(String, bool), ExtensionError> {
        let result = self
            .request(
                "tools/call",
                json!({ "name": raw_name, "arguments": arguments }),
                timeout,
            )
            .await?;
        let is_error = result
            .get("isError")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let text = result
            .get("content")
            .and_then(|c| c.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|i| i.get("text").and_then(|t| t.as_str()))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();
        Ok((text, is_error))
    }

    /// TERM, grace period, then KILL. Does not wait for final exit.
    pub async fn shutdown(&self) {
        let mut guard = self.child.lock().await;
        let Some(mut child) = guard.take() else {
            return;
        };
        self.connected.store(false, Ordering::SeqCst);

        #[cfg(unix)]
        if let Some(pid) = child.id() {
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
            if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_ok() {
                return;
            }
        }
        let _ = child.start_kill();
    }
}
