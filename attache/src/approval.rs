//! Human-in-the-loop approvals over the chat channel.
//!
//! A request composes a preview message with approve/deny buttons, then waits
//! on a oneshot resolved by the button callback (or by the 120-second timer,
//! as denied). Entries are single-owner and single-resolver: the waiting
//! caller owns the receiver, the first resolution wins.

use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{info, warn};
use uuid::Uuid;

use crate::channel::{Button, OutboundChannel};

/// Hard-coded resolution window.
pub const APPROVAL_TIMEOUT: Duration = Duration::from_secs(120);
/// Max characters of code/command shown in the preview.
pub const PREVIEW_CAP: usize = 800;
/// Callback-data prefixes carried by the buttons.
pub const APPROVE_PREFIX: &str = "approve:";
pub const DENY_PREFIX: &str = "deny:";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalKind {
    Terminal,
    Code,
    CriticalAction,
    BudgetOverride,
}

impl ApprovalKind {
    fn emoji(self) -> &'static str {
        match self {
            Self::Terminal => "🖥️",
            Self::Code => "📜",
            Self::CriticalAction => "⚠️",
            Self::BudgetOverride => "💸",
        }
    }

    fn title(self) -> &'static str {
        match self {
            Self::Terminal => "Terminal command",
            Self::Code => "Code execution",
            Self::CriticalAction => "Critical action",
            Self::BudgetOverride => "Budget override",
        }
    }
}

/// One pending consent request.
#[derive(Clone, Debug)]
pub struct ApprovalRequest {
    pub kind: ApprovalKind,
    pub reason: String,
    pub action_label: Option<String>,
    pub details: Option<String>,
    pub command: Option<String>,
    pub code: Option<String>,
    pub language: Option<String>,
}

impl ApprovalRequest {
    pub fn new(kind: ApprovalKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
            action_label: None,
            details: None,
            command: None,
            code: None,
            language: None,
        }
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_code(mut self, code: impl Into<String>, language: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self.language = Some(language.into());
        self
    }

    pub fn with_action(mut self, label: impl Into<String>, details: impl Into<String>) -> Self {
        self.action_label = Some(label.into());
        self.details = Some(details.into());
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Denied,
    TimedOut,
}

fn truncate(text: &str, cap: usize) -> String {
    if text.chars().count() <= cap {
        text.to_string()
    } else {
        let cut: String = text.chars().take(cap).collect();
        format!("{cut}\n… (truncated)")
    }
}

/// Renders the approval message: emoji header, reason, detail block, prompt.
pub fn approval_message(req: &ApprovalRequest) -> String {
    let mut out = format!("{} *{}*\n\n{}\n", req.kind.emoji(), req.kind.title(), req.reason);
    if let Some(cmd) = &req.command {
        out.push_str(&format!("\n```\n{}\n```\n", truncate(cmd, PREVIEW_CAP)));
    }
    if let Some(code) = &req.code {
        let lang = req.language.as_deref().unwrap_or("");
        out.push_str(&format!("\n```{lang}\n{}\n```\n", truncate(code, PREVIEW_CAP)));
    }
    if let Some(label) = &req.action_label {
        out.push_str(&format!("\n{label}"));
        if let Some(details) = &req.details {
            out.push_str(&format!(": {details}"));
        }
        out.push('\n');
    }
    out.push_str("\nDo you approve?");
    out
}

/// Process-wide approval broker. One instance per process; entries keyed by
/// approval id.
#[derive(Default)]
pub struct ApprovalBroker {
    pending: DashMap<String, oneshot::Sender<ApprovalDecision>>,
}

impl ApprovalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends the approval message with buttons and waits for resolution.
    /// Timeout resolves as denied; a failed button send denies immediately.
    pub async fn request(
        &self,
        req: ApprovalRequest,
        channel: &dyn OutboundChannel,
    ) -> ApprovalDecision {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.clone(), tx);

        let buttons = vec![vec![
            Button::new("✅ Approve", format!("{APPROVE_PREFIX}{id}")),
            Button::new("❌ Deny", format!("{DENY_PREFIX}{id}")),
        ]];
        if let Err(e) = channel.send_buttons(&approval_message(&req), &buttons).await {
            warn!(approval = %id, error = %e, "approval buttons failed to send, denying");
            self.pending.remove(&id);
            return ApprovalDecision::Denied;
        }

        let decision = match tokio::time::timeout(APPROVAL_TIMEOUT, rx).await {
            Ok(Ok(d)) => d,
            Ok(Err(_)) => ApprovalDecision::Denied,
            Err(_) => {
                self.pending.remove(&id);
                ApprovalDecision::TimedOut
            }
        };
        info!(approval = %id, kind = ?req.kind, ?decision, "approval resolved");

        let status = match decision {
            ApprovalDecision::Approved => "✅ Approved.",
            ApprovalDecision::Denied => "❌ Denied.",
            ApprovalDecision::TimedOut => "⌛ No answer in time, treating as denied.",
        };
        let _ = channel.send_text(status).await;
        decision
    }

    /// Resolves a pending approval. Returns false when the id is unknown
    /// (already resolved or expired).
    pub fn resolve(&self, approval_id: &str, approved: bool) -> bool {
        match self.pending.remove(approval_id) {
            Some((_, tx)) => {
                let decision = if approved {
                    ApprovalDecision::Approved
                } else {
                    ApprovalDecision::Denied
                };
                tx.send(decision).is_ok()
            }
            None => false,
        }
    }

    /// Routes a raw callback data string (`approve:<id>` / `deny:<id>`).
    /// Returns whether it was an approval callback at all.
    pub fn resolve_callback(&self, data: &str) -> bool {
        if let Some(id) = data.strip_prefix(APPROVE_PREFIX) {
            self.resolve(id, true);
            true
        } else if let Some(id) = data.strip_prefix(DENY_PREFIX) {
            self.resolve(id, false);
            true
        } else {
            false
        }
    }

    /// Pending approval ids, for diagnostics.
    pub fn pending_ids(&self) -> Vec<String> {
        self.pending.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::RecordingChannel;
    use std::sync::Arc;

    #[tokio::test]
    async fn approve_via_callback_releases_waiter() {
        let broker = Arc::new(ApprovalBroker::new());
        let channel = Arc::new(RecordingChannel::new());

        let waiter = {
            let broker = Arc::clone(&broker);
            let channel = Arc::clone(&channel);
            tokio::spawn(async move {
                broker
                    .request(
                        ApprovalRequest::new(ApprovalKind::Terminal, "run ls").with_command("ls -la"),
                        channel.as_ref(),
                    )
                    .await
            })
        };

        // Wait for the buttons to go out, then press approve.
        let data = loop {
            if let Some((_, rows)) = channel.button_sends.lock().unwrap().first().cloned() {
                break rows[0][0].data.clone();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        assert!(broker.resolve_callback(&data));
        assert_eq!(waiter.await.unwrap(), ApprovalDecision::Approved);
    }

    #[tokio::test]
    async fn failed_button_send_denies_immediately() {
        let broker = ApprovalBroker::new();
        let channel = RecordingChannel {
            fail_buttons: true,
            ..Default::default()
        };
        let d = broker
            .request(
                ApprovalRequest::new(ApprovalKind::Code, "exec"),
                &channel,
            )
            .await;
        assert_eq!(d, ApprovalDecision::Denied);
        assert!(broker.pending_ids().is_empty());
    }

    #[tokio::test]
    async fn unknown_callback_is_ignored() {
        let broker = ApprovalBroker::new();
        assert!(!broker.resolve_callback("replyid:123"));
        assert!(broker.resolve_callback("approve:nonexistent"));
        assert!(!broker.resolve("nope", true));
    }

    #[test]
    fn message_preview_caps_code() {
        let long = "x".repeat(2_000);
        let req = ApprovalRequest::new(ApprovalKind::Code, "big").with_code(long, "python");
        let msg = approval_message(&req);
        assert!(msg.contains("… (truncated)"));
        assert!(msg.contains("```python"));
        assert!(msg.contains("Do you approve?"));
    }
}
