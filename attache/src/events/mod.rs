//! Event router: fans real-time events into matching agents.
//!
//! A process-wide singleton holds `agentId → {userId, sources, subscriptions,
//! skills, sink}`. Registrations reference orchestrators only through the
//! [`EventSink`] callback, never directly, so router and orchestrator stay
//! decoupled. Delivery is enqueue-only: listeners never execute on the
//! router's task.

mod subscription;

pub use subscription::{Subscription, SubscriptionType};

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Bound on the in-memory event log.
const EVENT_LOG_CAP: usize = 200;
/// Pseudo-source opting a registration into every event source.
pub const SOURCE_SYSTEM: &str = "system";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPriority {
    Low,
    Normal,
    High,
    Critical,
}

/// One incoming real-time event.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeEvent {
    pub id: String,
    pub source: String,
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_agent_ids: Option<Vec<String>>,
    #[serde(default)]
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    pub priority: EventPriority,
}

impl RuntimeEvent {
    pub fn new(source: impl Into<String>, event_type: impl Into<String>, data: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source: source.into(),
            event_type: event_type.into(),
            target_agent_ids: None,
            data,
            timestamp: Utc::now(),
            priority: EventPriority::Normal,
        }
    }

    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_targets(mut self, targets: Vec<String>) -> Self {
        self.target_agent_ids = Some(targets);
        self
    }
}

/// Skill trigger: fires on an exact `<source>:<eventType>` pattern.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillTrigger {
    pub id: String,
    pub pattern: String,
    pub instruction: String,
}

/// Instruction routed to one agent in response to an event.
#[derive(Clone, Debug)]
pub struct RoutedInstruction {
    pub agent_id: String,
    pub instruction: String,
    pub event_id: String,
    pub subscription_id: Option<String>,
}

/// Delivery callback; implementations enqueue into the agent's queue.
pub trait EventSink: Send + Sync {
    fn deliver(&self, instruction: RoutedInstruction);
}

struct Registration {
    user_id: String,
    sources: HashSet<String>,
    subscriptions: Arc<RwLock<Vec<Subscription>>>,
    skills: Vec<SkillTrigger>,
    sink: Arc<dyn EventSink>,
}

/// Process-wide event router.
#[derive(Default)]
pub struct EventRouter {
    registrations: RwLock<HashMap<String, Registration>>,
    log: Mutex<VecDeque<RuntimeEvent>>,
}

static GLOBAL: Lazy<Arc<EventRouter>> = Lazy::new(|| Arc::new(EventRouter::default()));

impl EventRouter {
    /// The process singleton. Tests may construct private instances instead.
    pub fn global() -> Arc<EventRouter> {
        Arc::clone(&GLOBAL)
    }

    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an agent. `subscriptions` is shared with the orchestrator so
    /// cooldown bookkeeping lands in the same list the agent persists.
    pub async fn register(
        &self,
        agent_id: &str,
        user_id: &str,
        sources: HashSet<String>,
        subscriptions: Arc<RwLock<Vec<Subscription>>>,
        skills: Vec<SkillTrigger>,
        sink: Arc<dyn EventSink>,
    ) {
        self.registrations.write().await.insert(
            agent_id.to_string(),
            Registration {
                user_id: user_id.to_string(),
                sources,
                subscriptions,
                skills,
                sink,
            },
        );
    }

    pub async fn unregister(&self, agent_id: &str) {
        self.registrations.write().await.remove(agent_id);
    }

    /// Clears every registration (process shutdown).
    pub async fn shutdown(&self) {
        self.registrations.write().await.clear();
    }

    /// Registered agent ids with their user ids, for diagnostics.
    pub async fn listing(&self) -> Vec<(String, String)> {
        self.registrations
            .read()
            .await
            .iter()
            .map(|(id, r)| (id.clone(), r.user_id.clone()))
            .collect()
    }

    /// Recent events, newest last.
    pub async fn recent_events(&self) -> Vec<RuntimeEvent> {
        self.log.lock().await.iter().cloned().collect()
    }

    /// Dispatches one event: resolve targets, filter by source, fire
    /// matching subscriptions under cooldown, fire skill triggers, fall back
    /// to a generic instruction for targeted or high-priority events, and
    /// append to the bounded log.
    pub async fn dispatch(&self, event: RuntimeEvent) -> usize {
        let now = Utc::now();
        let mut delivered = 0usize;

        {
            let registrations = self.registrations.read().await;
            let targets: Vec<&String> = match &event.target_agent_ids {
                Some(ids) => registrations
                    .keys()
                    .filter(|id| ids.contains(*id))
                    .collect(),
                None => registrations.keys().collect(),
            };

            for agent_id in targets {
                let reg = &registrations[agent_id];
                let source_ok = reg.sources.contains(&event.source)
                    || reg.sources.contains(SOURCE_SYSTEM)
                    || event.source == SOURCE_SYSTEM;
                if !source_ok {
                    continue;
                }

                let mut matched = false;

                // Subscriptions, with cooldown enforcement and bookkeeping.
                {
                    let mut subs = reg.subscriptions.write().await;
                    for sub in subs.iter_mut() {
                        if !sub.matches(&event) {
                            continue;
                        }
                        if sub.in_cooldown(now) {
                            debug!(agent = %agent_id, subscription = %sub.id, "subscription in cooldown");
                            continue;
                        }
                        sub.record_fire(now);
                        matched = true;
                        delivered += 1;
                        reg.sink.deliver(RoutedInstruction {
                            agent_id: agent_id.clone(),
                            instruction: build_instruction(&sub.instruction, &event),
                            event_id: event.id.clone(),
                            subscription_id: Some(sub.id.clone()),
                        });
                    }
                }

                // Skill triggers on `<source>:<eventType>`.
                let key = format!("{}:{}", event.source, event.event_type);
                for skill in &reg.skills {
                    if skill.pattern == key {
                        matched = true;
                        delivered += 1;
                        reg.sink.deliver(RoutedInstruction {
                            agent_id: agent_id.clone(),
                            instruction: build_instruction(&skill.instruction, &event),
                            event_id: event.id.clone(),
                            subscription_id: None,
                        });
                    }
                }

                // Generic fallback: only for explicitly targeted or urgent events.
                let urgent = matches!(event.priority, EventPriority::High | EventPriority::Critical);
                if !matched && (event.target_agent_ids.is_some() || urgent) {
                    delivered += 1;
                    reg.sink.deliver(RoutedInstruction {
                        agent_id: agent_id.clone(),
                        instruction: build_instruction(
                            "An external event arrived that may need your attention.",
                            &event,
                        ),
                        event_id: event.id.clone(),
                        subscription_id: None,
                    });
                }
            }
        }

        let mut log = self.log.lock().await;
        log.push_back(event);
        while log.len() > EVENT_LOG_CAP {
            log.pop_front();
        }

        delivered
    }
}

/// Instruction text delivered to the agent: template plus serialized event.
fn build_instruction(template: &str, event: &RuntimeEvent) -> String {
    format!(
        "{template}\n\nEvent `{}` from `{}`:\n{}",
        event.event_type,
        event.source,
        serde_json::to_string_pretty(&event.data).unwrap_or_else(|_| "{}".into())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingSink {
        delivered: StdMutex<Vec<RoutedInstruction>>,
    }

    impl EventSink for RecordingSink {
        fn deliver(&self, instruction: RoutedInstruction) {
            self.delivered.lock().unwrap().push(instruction);
        }
    }

    async fn register(
        router: &EventRouter,
        agent_id: &str,
        sources: &[&str],
        subs: Vec<Subscription>,
    ) -> Arc<RecordingSink> {
        let sink = Arc::new(RecordingSink::default());
        router
            .register(
                agent_id,
                "u1",
                sources.iter().map(|s| s.to_string()).collect(),
                Arc::new(RwLock::new(subs)),
                vec![],
                sink.clone(),
            )
            .await;
        sink
    }

    #[tokio::test]
    async fn source_filter_skips_unsubscribed_agents() {
        let router = EventRouter::new();
        let mut sub = Subscription::new(SubscriptionType::Custom, "tick", "handle");
        sub.cooldown_minutes = 0;
        let sink = register(&router, "a1", &["poller"], vec![sub.clone()]).await;
        let other = register(&router, "a2", &["mail"], vec![sub]).await;

        let n = router
            .dispatch(RuntimeEvent::new("poller", "tick", serde_json::json!({})))
            .await;
        assert_eq!(n, 1);
        assert_eq!(sink.delivered.lock().unwrap().len(), 1);
        assert!(other.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn system_source_set_opts_into_everything() {
        let router = EventRouter::new();
        let sub = Subscription::new(SubscriptionType::Custom, "tick", "handle");
        let sink = register(&router, "a1", &[SOURCE_SYSTEM], vec![sub]).await;
        router
            .dispatch(RuntimeEvent::new("anything", "tick", serde_json::json!({})))
            .await;
        assert_eq!(sink.delivered.lock().unwrap().len(), 1);
    }

    /// **Scenario**: cooldown suppresses the second fire and the suppressed
    /// event still lands in the log.
    #[tokio::test]
    async fn cooldown_suppresses_repeat_fires() {
        let router = EventRouter::new();
        let mut sub = Subscription::new(SubscriptionType::Custom, "tick", "handle");
        sub.cooldown_minutes = 30;
        let sink = register(&router, "a1", &["poller"], vec![sub]).await;

        router
            .dispatch(RuntimeEvent::new("poller", "tick", serde_json::json!({})))
            .await;
        router
            .dispatch(RuntimeEvent::new("poller", "tick", serde_json::json!({})))
            .await;

        assert_eq!(sink.delivered.lock().unwrap().len(), 1);
        assert_eq!(router.recent_events().await.len(), 2);
    }

    #[tokio::test]
    async fn generic_fallback_for_high_priority_unmatched() {
        let router = EventRouter::new();
        let sink = register(&router, "a1", &["alerts"], vec![]).await;

        // Normal priority, unmatched: nothing delivered.
        router
            .dispatch(RuntimeEvent::new("alerts", "noise", serde_json::json!({})))
            .await;
        assert!(sink.delivered.lock().unwrap().is_empty());

        // Critical: generic instruction delivered.
        router
            .dispatch(
                RuntimeEvent::new("alerts", "outage", serde_json::json!({}))
                    .with_priority(EventPriority::Critical),
            )
            .await;
        assert_eq!(sink.delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn explicit_targets_limit_fanout() {
        let router = EventRouter::new();
        let a = register(&router, "a1", &["webhook"], vec![]).await;
        let b = register(&router, "a2", &["webhook"], vec![]).await;

        router
            .dispatch(
                RuntimeEvent::new("webhook", "github.push", serde_json::json!({}))
                    .with_targets(vec!["a2".into()]),
            )
            .await;
        assert!(a.delivered.lock().unwrap().is_empty());
        assert_eq!(b.delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn skill_triggers_match_source_event_pattern() {
        let router = EventRouter::new();
        let sink = Arc::new(RecordingSink::default());
        router
            .register(
                "a1",
                "u1",
                ["webhook".to_string()].into_iter().collect(),
                Arc::new(RwLock::new(vec![])),
                vec![SkillTrigger {
                    id: "s1".into(),
                    pattern: "webhook:github.push".into(),
                    instruction: "review the push".into(),
                }],
                sink.clone(),
            )
            .await;

        router
            .dispatch(RuntimeEvent::new(
                "webhook",
                "github.push",
                serde_json::json!({}),
            ))
            .await;
        let delivered = sink.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert!(delivered[0].instruction.contains("review the push"));
    }

    #[tokio::test]
    async fn event_log_is_bounded() {
        let router = EventRouter::new();
        for i in 0..250 {
            router
                .dispatch(RuntimeEvent::new("noise", format!("e{i}"), serde_json::json!({})))
                .await;
        }
        assert_eq!(router.recent_events().await.len(), EVENT_LOG_CAP);
    }
}
