//! Event subscriptions and their matching rules.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::RuntimeEvent;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionType {
    Webhook,
    Poll,
    Keyword,
    EntityState,
    Custom,
}

/// One agent subscription. `poll` subscriptions are never matched against
/// events; a per-orchestrator ticker evaluates them.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: String,
    pub kind: SubscriptionType,
    /// Pattern semantics depend on `kind` (see `matches`).
    pub event_pattern: String,
    pub enabled: bool,
    /// Instruction template; the routed instruction appends the event data.
    pub instruction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_entity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_state: Option<String>,
    #[serde(default)]
    pub cooldown_minutes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fired_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fire_count: u32,
}

impl Subscription {
    pub fn new(kind: SubscriptionType, pattern: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            event_pattern: pattern.into(),
            enabled: true,
            instruction: instruction.into(),
            keyword: None,
            poll_target: None,
            poll_interval_minutes: None,
            target_entity: None,
            target_state: None,
            cooldown_minutes: 0,
            last_fired_at: None,
            fire_count: 0,
        }
    }

    /// The router must not fire a subscription inside its cooldown window.
    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        match self.last_fired_at {
            Some(last) => now - last < Duration::minutes(self.cooldown_minutes as i64),
            None => false,
        }
    }

    pub fn record_fire(&mut self, now: DateTime<Utc>) {
        self.last_fired_at = Some(now);
        self.fire_count += 1;
    }

    /// Event matching by subscription type. `poll` never matches here.
    pub fn matches(&self, event: &RuntimeEvent) -> bool {
        if !self.enabled {
            return false;
        }
        match self.kind {
            SubscriptionType::Poll => false,
            SubscriptionType::Webhook => {
                if self.event_pattern == "webhook:*" {
                    return event.source == "webhook" || event.source.starts_with("webhook");
                }
                let key = format!("{}:{}", event.source, event.event_type);
                let prefix = &self.event_pattern;
                key == *prefix || key.starts_with(&format!("{prefix}:"))
            }
            SubscriptionType::Keyword => {
                let Some(keyword) = self.keyword.as_deref() else {
                    return false;
                };
                let needle = keyword.to_lowercase();
                let data = serde_json::to_string(&event.data).unwrap_or_default();
                data.to_lowercase().contains(&needle)
                    || event.source.to_lowercase().contains(&needle)
            }
            SubscriptionType::EntityState => {
                let Some(entity) = self.target_entity.as_deref() else {
                    return false;
                };
                let entity_matches = event
                    .data
                    .get("entity_id")
                    .and_then(|v| v.as_str())
                    .map(|id| id == entity)
                    .unwrap_or(false);
                if !entity_matches {
                    return false;
                }
                match self.target_state.as_deref() {
                    Some(state) => event
                        .data
                        .get("new_state")
                        .and_then(|v| v.as_str())
                        .map(|s| s == state)
                        .unwrap_or(false),
                    None => true,
                }
            }
            SubscriptionType::Custom => {
                if let Some(prefix) = self.event_pattern.strip_suffix('*') {
                    event.event_type.starts_with(prefix)
                } else {
                    event.event_type == self.event_pattern
                }
            }
        }
    }
}
