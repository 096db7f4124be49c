//! Agent configuration.
//!
//! [`AgentConfig`] is the full serialized form stored in the always-on table
//! and carried by the orchestrator. Identity and channel binding are fixed
//! for the lifetime of a deploy; provider/model, tuning options, persisted
//! memories, extension servers and schedules may change at runtime (the
//! orchestrator owns those mutations).

use serde::{Deserialize, Serialize};

use crate::error::AgentError;
use crate::events::{SkillTrigger, Subscription};
use crate::extension::ExtensionServerConfig;
use crate::schedule::ScheduledTask;

/// Recognized runtime tuning options with their defaults.
///
/// All values are optional in serialized form; accessors apply defaults so
/// stored configs survive option additions.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentOptions {
    pub max_tool_iterations: Option<u32>,
    pub fast_confirmation_max_tool_iterations: Option<u32>,
    pub tool_result_max_chars: Option<usize>,
    pub tool_results_total_max_chars: Option<usize>,
    pub llm_timeout_ms: Option<u64>,
    pub tool_timeout_ms: Option<u64>,
    pub max_mcp_tools_in_prompt: Option<usize>,
    pub queue_delay_user_ms: Option<u64>,
    pub queue_delay_background_ms: Option<u64>,
    /// Compact discipline block in the system prompt.
    pub compact_system_prompt: Option<bool>,
    /// LLM-scored memory recall (falls back to keyword order on failure).
    pub smart_recall: Option<bool>,
    pub memory_recall_limit: Option<usize>,
}

impl AgentOptions {
    pub fn max_tool_iterations(&self) -> u32 {
        self.max_tool_iterations.unwrap_or(10)
    }
    pub fn fast_confirmation_max_tool_iterations(&self) -> u32 {
        self.fast_confirmation_max_tool_iterations.unwrap_or(4)
    }
    pub fn tool_result_max_chars(&self) -> usize {
        self.tool_result_max_chars.unwrap_or(6_000)
    }
    pub fn tool_results_total_max_chars(&self) -> usize {
        self.tool_results_total_max_chars.unwrap_or(20_000)
    }
    pub fn llm_timeout_ms(&self) -> u64 {
        self.llm_timeout_ms.unwrap_or(60_000)
    }
    pub fn tool_timeout_ms(&self) -> u64 {
        self.tool_timeout_ms.unwrap_or(30_000)
    }
    pub fn max_mcp_tools_in_prompt(&self) -> usize {
        self.max_mcp_tools_in_prompt.unwrap_or(24)
    }
    pub fn queue_delay_user_ms(&self) -> u64 {
        self.queue_delay_user_ms.unwrap_or(150)
    }
    pub fn queue_delay_background_ms(&self) -> u64 {
        self.queue_delay_background_ms.unwrap_or(1_000)
    }
    pub fn compact_system_prompt(&self) -> bool {
        self.compact_system_prompt.unwrap_or(false)
    }
    pub fn smart_recall(&self) -> bool {
        self.smart_recall.unwrap_or(false)
    }
    pub fn memory_recall_limit(&self) -> usize {
        self.memory_recall_limit.unwrap_or(6)
    }
}

/// Capability flags gating tool availability and prompt blurbs.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Permissions {
    pub internet: bool,
    pub calendar: bool,
    pub gmail: bool,
    pub media: bool,
    pub terminal: bool,
    pub code: bool,
    pub home_automation: bool,
}

/// Chat channel binding: bot token and destination chat.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelBinding {
    pub bot_token: String,
    pub chat_id: String,
}

/// Connectivity summaries rendered into the system prompt. Only state, a
/// display name, and a masked address ever reach the prompt.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Integrations {
    pub calendar_name: Option<String>,
    pub calendar_email: Option<String>,
    pub gmail_email: Option<String>,
    pub media_connected: bool,
    /// Number of stored credentials; the count is promptable, values never.
    pub credential_count: usize,
}

/// Per-1k-token model pricing in USD; drives the daily budget ledger.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelPricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl Default for ModelPricing {
    fn default() -> Self {
        Self {
            input_per_1k: 0.0025,
            output_per_1k: 0.01,
        }
    }
}

/// Full agent configuration (serialized form, stored in the always-on table).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    pub id: String,
    pub name: String,
    pub user_id: String,
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub permissions: Permissions,
    pub channel: ChannelBinding,
    #[serde(default)]
    pub options: AgentOptions,
    /// Daily spend cap in USD; `None` disables the gate.
    #[serde(default)]
    pub daily_budget_usd: Option<f64>,
    /// IANA label, e.g. `Europe/Madrid`. Invalid labels degrade to local time.
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub pricing: ModelPricing,
    #[serde(default)]
    pub integrations: Integrations,
    /// Persisted memory lines injected into every system prompt.
    #[serde(default)]
    pub memories: Vec<String>,
    #[serde(default)]
    pub extension_servers: Vec<ExtensionServerConfig>,
    #[serde(default)]
    pub schedules: Vec<ScheduledTask>,
    /// Event sources this agent listens to (`system` opts into everything).
    #[serde(default = "default_event_sources")]
    pub event_sources: Vec<String>,
    #[serde(default)]
    pub skills: Vec<SkillTrigger>,
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
    /// Per-agent webhook signing secret; unset disables signature checks.
    #[serde(default)]
    pub webhook_secret: Option<String>,
    /// Redeploy automatically at process start.
    #[serde(default)]
    pub always_on: bool,
}

fn default_event_sources() -> Vec<String> {
    vec!["webhook".to_string()]
}

impl AgentConfig {
    /// Deploy-time validation: the orchestrator refuses configs without a
    /// channel binding, provider, or model.
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.channel.bot_token.is_empty() || self.channel.chat_id.is_empty() {
            return Err(AgentError::InvalidConfig("missing bot binding".into()));
        }
        if self.provider.is_empty() {
            return Err(AgentError::InvalidConfig("missing provider".into()));
        }
        if self.model.is_empty() {
            return Err(AgentError::InvalidConfig("missing model".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> AgentConfig {
        AgentConfig {
            id: "a1".into(),
            name: "Test".into(),
            user_id: "u1".into(),
            provider: "openai".into(),
            model: "gpt-4o-mini".into(),
            system_prompt: String::new(),
            permissions: Permissions::default(),
            channel: ChannelBinding {
                bot_token: "t".into(),
                chat_id: "c".into(),
            },
            options: AgentOptions::default(),
            daily_budget_usd: None,
            timezone: None,
            pricing: ModelPricing::default(),
            integrations: Integrations::default(),
            memories: vec![],
            extension_servers: vec![],
            schedules: vec![],
            event_sources: vec!["webhook".into()],
            skills: vec![],
            subscriptions: vec![],
            webhook_secret: None,
            always_on: false,
        }
    }

    #[test]
    fn validate_accepts_complete_config() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn validate_rejects_missing_binding_provider_model() {
        let mut c = base();
        c.channel.bot_token.clear();
        assert!(c.validate().is_err());

        let mut c = base();
        c.provider.clear();
        assert!(c.validate().is_err());

        let mut c = base();
        c.model.clear();
        assert!(c.validate().is_err());
    }

    #[test]
    fn options_defaults_apply() {
        let o = AgentOptions::default();
        assert_eq!(o.max_tool_iterations(), 10);
        assert_eq!(o.fast_confirmation_max_tool_iterations(), 4);
        assert_eq!(o.tool_timeout_ms(), 30_000);
    }

    #[test]
    fn config_round_trips_through_json() {
        let c = base();
        let json = serde_json::to_string(&c).unwrap();
        let back: AgentConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, "a1");
        assert_eq!(back.model, "gpt-4o-mini");
    }
}
