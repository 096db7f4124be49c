//! Outbound channel seam.
//!
//! The orchestrator and tools talk to the user's chat through this trait so
//! the core stays transport-agnostic; the Telegram implementation lives in
//! the bot binary. `typing` and button sends are best-effort: a failed
//! button send resolves the pending approval as denied (see `approval`).

use async_trait::async_trait;

/// Inline button: label shown to the user, callback data returned on press.
/// Labels are clamped to 28 chars by implementations; callback data is
/// length-limited by the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub data: String,
}

impl Button {
    pub fn new(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            data: data.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("send failed: {0}")]
    Send(String),
    #[error("download failed: {0}")]
    Download(String),
}

/// Outbound side of the user's chat channel.
#[async_trait]
pub trait OutboundChannel: Send + Sync {
    async fn send_text(&self, text: &str) -> Result<(), ChannelError>;

    /// Sends text with inline button rows.
    async fn send_buttons(
        &self,
        text: &str,
        rows: &[Vec<Button>],
    ) -> Result<(), ChannelError>;

    /// Best-effort typing indicator; default no-op.
    async fn typing(&self) {}

    /// Fetches a file (e.g. a voice note) by transport file id.
    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, ChannelError> {
        Err(ChannelError::Download(format!(
            "downloads unsupported for file {file_id}"
        )))
    }
}

/// Channel that records sends; used by tests and as a safe default.
#[derive(Default)]
pub struct RecordingChannel {
    pub sent: std::sync::Mutex<Vec<String>>,
    pub button_sends: std::sync::Mutex<Vec<(String, Vec<Vec<Button>>)>>,
    /// When true, button sends fail (drives the approval fallback path).
    pub fail_buttons: bool,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl OutboundChannel for RecordingChannel {
    async fn send_text(&self, text: &str) -> Result<(), ChannelError> {
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn send_buttons(
        &self,
        text: &str,
        rows: &[Vec<Button>],
    ) -> Result<(), ChannelError> {
        if self.fail_buttons {
            return Err(ChannelError::Send("buttons unavailable".into()));
        }
        self.button_sends
            .lock()
            .unwrap()
            .push((text.to_string(), rows.to_vec()));
        Ok(())
    }
}
