//! Conversation message types.
//!
//! [`AgentMessage`] is the unit of both the in-memory window and the
//! persisted conversation log. The engine appends assistant and tool_result
//! entries; the orchestrator appends the inbound entry before the LLM runs so
//! live observers see it immediately.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message role. `ToolResult` entries carry compacted tool output back into
/// the conversation so the next LLM iteration can read it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    ToolResult,
}

/// One conversation entry: role, content, timestamp, optional source channel
/// tag (e.g. `"telegram"`, `"web"`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
}

impl AgentMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            channel: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn tool_result(content: impl Into<String>) -> Self {
        Self::new(Role::ToolResult, content)
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }
}

/// Trims `messages` to at most `cap` entries while preserving **all**
/// user-role entries that fall outside the tail window. The result is the
/// preserved users (chronological) followed by the tail.
///
/// **Interaction**: called by the orchestrator after each turn with the 300
/// soft cap; the trimming rule is what keeps confirmations findable under
/// event floods.
pub fn trim_preserving_users(messages: Vec<AgentMessage>, cap: usize) -> Vec<AgentMessage> {
    if messages.len() <= cap {
        return messages;
    }
    let tail_start = messages.len() - cap;
    let mut preserved: Vec<AgentMessage> = messages[..tail_start]
        .iter()
        .filter(|m| m.role == Role::User)
        .cloned()
        .collect();
    preserved.extend_from_slice(&messages[tail_start..]);
    preserved
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trim_noop_under_cap() {
        let msgs = vec![AgentMessage::user("a"), AgentMessage::assistant("b")];
        let out = trim_preserving_users(msgs.clone(), 10);
        assert_eq!(out.len(), 2);
    }

    /// **Scenario**: 300-cap trim under a flood of system entries keeps every
    /// user message even when all of them fall outside the tail window.
    #[test]
    fn trim_keeps_all_user_messages() {
        let mut msgs = vec![AgentMessage::user("first"), AgentMessage::user("second")];
        for i in 0..500 {
            msgs.push(AgentMessage::system(format!("event {i}")));
        }
        let out = trim_preserving_users(msgs, 300);
        let users: Vec<_> = out.iter().filter(|m| m.role == Role::User).collect();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].content, "first");
        assert!(out.len() <= 302);
        // Preserved users come before the tail.
        assert_eq!(out[0].content, "first");
        assert_eq!(out[1].content, "second");
    }
}
