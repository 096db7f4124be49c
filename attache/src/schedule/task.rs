//! Scheduled task model and the reminder instruction template.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Instruction prefix marking a plain reminder. One-shot tasks carrying it
/// are delivered directly on the channel without invoking the LLM.
pub const REMINDER_PREFIX: &str = "Reminder: ";

/// Builds the instruction for a plain reminder task.
pub fn reminder_instruction(message: &str) -> String {
    format!("{REMINDER_PREFIX}{message}")
}

/// Extracts the reminder message if the instruction uses the template.
pub fn parse_reminder(instruction: &str) -> Option<&str> {
    instruction.strip_prefix(REMINDER_PREFIX)
}

/// One scheduled trigger: recurring (cron) or one-shot (absolute `trigger_at`
/// or cron with `one_shot`).
///
/// Invariants enforced by the scheduler: a one-shot fires at most once
/// (enabled cleared on fire and persisted via the fired callback); any task
/// fires at most once per 60-second window (`last_run` dedup).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTask {
    pub id: String,
    pub name: String,
    /// Cron expression, possibly produced by the natural-language pre-parse.
    /// Invalid expressions are not an error: the task simply never fires.
    #[serde(default)]
    pub cron: String,
    pub instruction: String,
    pub enabled: bool,
    /// Earliest instant the task may fire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_at: Option<DateTime<Utc>>,
    /// Absolute one-shot trigger instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_at: Option<DateTime<Utc>>,
    /// IANA label; invalid labels degrade to server local time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default)]
    pub one_shot: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
}

impl ScheduledTask {
    /// New recurring cron task.
    pub fn recurring(name: impl Into<String>, cron: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            cron: cron.into(),
            instruction: instruction.into(),
            enabled: true,
            start_at: None,
            trigger_at: None,
            timezone: None,
            one_shot: false,
            last_run: None,
        }
    }

    /// New one-shot task firing at an absolute instant.
    pub fn one_shot_at(
        name: impl Into<String>,
        trigger_at: DateTime<Utc>,
        instruction: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            cron: String::new(),
            instruction: instruction.into(),
            enabled: true,
            start_at: None,
            trigger_at: Some(trigger_at),
            timezone: None,
            one_shot: true,
            last_run: None,
        }
    }

    pub fn with_timezone(mut self, tz: impl Into<String>) -> Self {
        self.timezone = Some(tz.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reminder_template_round_trip() {
        let instr = reminder_instruction("Buy milk");
        assert_eq!(parse_reminder(&instr), Some("Buy milk"));
        assert_eq!(parse_reminder("run the report"), None);
    }
}
