//! Running-agents registry.
//!
//! The process-wide map of deployed orchestrators, with the lifecycle and
//! listing surface the rest of the system uses. It is also the indirection
//! that breaks the scheduler ↔ orchestrator cycle: the scheduler delivers
//! due tasks to the registry (as a [`TriggerSink`]), the registry looks up
//! the agent; neither holds the other.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{info, warn};

use super::{Orchestrator, OrchestratorDeps, QueueEntry};
use crate::agent::AgentConfig;
use crate::error::AgentError;
use crate::events::{EventSink, RoutedInstruction};
use crate::schedule::{ScheduledTask, TriggerSink};
use crate::store::always_on_key;

/// Process-wide registry of running agents.
#[derive(Default)]
pub struct AgentRegistry {
    agents: DashMap<String, Arc<Orchestrator>>,
}

impl AgentRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Deploys an agent and tracks it. A second deploy of the same id stops
    /// the previous instance first.
    pub async fn deploy(
        self: &Arc<Self>,
        config: AgentConfig,
        deps: OrchestratorDeps,
    ) -> Result<Arc<Orchestrator>, AgentError> {
        let agent_id = config.id.clone();
        if let Some((_, old)) = self.agents.remove(&agent_id) {
            warn!(agent = %agent_id, "redeploying over a running agent");
            old.stop().await;
        }

        // Always-on configs are mirrored into the table for restart redeploy.
        if config.always_on {
            if let Ok(table) = deps.store.always_on() {
                let key = always_on_key(&config.user_id, &config.id);
                match serde_json::to_string(&config) {
                    Ok(json) => {
                        if let Err(e) = table.set(&key, &json) {
                            warn!(error = %e, "failed to persist always-on config");
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to serialize always-on config"),
                }
            }
        }

        let orchestrator = Orchestrator::deploy(config, deps).await?;
        self.agents.insert(agent_id, Arc::clone(&orchestrator));
        Ok(orchestrator)
    }

    /// Redeploys every enabled always-on config found in the table.
    /// `deps_for` builds per-agent dependencies (channel bound to the
    /// agent's chat, provider for its model).
    pub async fn redeploy_always_on<F>(
        self: &Arc<Self>,
        store: &crate::store::Store,
        deps_for: F,
    ) -> Vec<Result<Arc<Orchestrator>, AgentError>>
    where
        F: Fn(&AgentConfig) -> OrchestratorDeps,
    {
        let table = match store.always_on() {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "always-on table unavailable");
                return Vec::new();
            }
        };
        let entries = table
            .list_prefix(crate::store::ALWAYS_ON_PREFIX)
            .unwrap_or_default();
        let mut results = Vec::new();
        for (key, value) in entries {
            if value.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AgentConfig>(&value) {
                Ok(config) => {
                    info!(agent = %config.id, "redeploying always-on agent");
                    let deps = deps_for(&config);
                    results.push(self.deploy(config, deps).await);
                }
                Err(e) => warn!(key = %key, error = %e, "unreadable always-on config"),
            }
        }
        results
    }

    pub fn get(&self, agent_id: &str) -> Option<Arc<Orchestrator>> {
        self.agents.get(agent_id).map(|e| Arc::clone(&e))
    }

    /// Stops one agent and removes it.
    pub async fn stop(&self, agent_id: &str) -> bool {
        match self.agents.remove(agent_id) {
            Some((_, orchestrator)) => {
                orchestrator.stop().await;
                true
            }
            None => false,
        }
    }

    /// Stops everything (process shutdown).
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.agents.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.stop(&id).await;
        }
    }

    /// Running agent ids, for diagnostics.
    pub fn listing(&self) -> Vec<String> {
        self.agents.iter().map(|e| e.key().clone()).collect()
    }
}

#[async_trait]
impl TriggerSink for AgentRegistry {
    async fn task_due(&self, agent_id: &str, task: ScheduledTask) {
        match self.get(agent_id) {
            Some(orchestrator) => orchestrator.on_task_due(task).await,
            None => warn!(agent = %agent_id, task = %task.name, "task due for unknown agent"),
        }
    }

    async fn one_shot_fired(&self, agent_id: &str, task: ScheduledTask) {
        if let Some(orchestrator) = self.get(agent_id) {
            orchestrator.on_one_shot_fired(task).await;
        }
    }
}

/// Router delivery callback for one agent. Holds a weak reference so a
/// stopped agent cannot be kept alive by the router.
pub(super) struct RouterSink {
    orchestrator: Weak<Orchestrator>,
}

impl RouterSink {
    pub(super) fn new(orchestrator: &Arc<Orchestrator>) -> Self {
        Self {
            orchestrator: Arc::downgrade(orchestrator),
        }
    }
}

impl EventSink for RouterSink {
    fn deliver(&self, instruction: RoutedInstruction) {
        if let Some(orchestrator) = self.orchestrator.upgrade() {
            orchestrator.enqueue(QueueEntry::webhook(instruction.instruction));
        }
    }
}
