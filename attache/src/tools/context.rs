//! Per-agent context handed to every tool call.
//!
//! The orchestrator binds one [`ToolContext`] per agent; the engine passes it
//! through to tools. It exposes the store scope, the outbound channel, the
//! approval broker, the budget tracker, the scheduler handle, and the
//! extension manager — everything a built-in needs without reaching into the
//! orchestrator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::AgentConfig;
use crate::approval::ApprovalBroker;
use crate::budget::BudgetTracker;
use crate::channel::OutboundChannel;
use crate::extension::ExtensionManager;
use crate::schedule::Scheduler;
use crate::store::StoreScope;

/// One LLM call's worth of usage, as recorded by the engine.
#[derive(Clone, Debug)]
pub struct UsageEvent {
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub cost_usd: f64,
}

/// Receiver for usage and resource events (persistence, metrics).
pub trait UsageRecorder: Send + Sync {
    fn record_usage(&self, agent_id: &str, event: &UsageEvent);
    fn record_resource(&self, _agent_id: &str, _kind: &str, _detail: &str) {}
}

/// No-op recorder for tests and minimal deployments.
pub struct NoopRecorder;

impl UsageRecorder for NoopRecorder {
    fn record_usage(&self, _agent_id: &str, _event: &UsageEvent) {}
}

/// Voice/audio transcription seam (implementation lives outside the core).
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, String>;
}

/// Context bound to one agent, shared by all of its tool calls.
#[derive(Clone)]
pub struct ToolContext {
    pub config: Arc<tokio::sync::RwLock<AgentConfig>>,
    pub scope: StoreScope,
    pub channel: Arc<dyn OutboundChannel>,
    pub approvals: Arc<ApprovalBroker>,
    pub budget: Arc<BudgetTracker>,
    pub scheduler: Arc<Scheduler>,
    pub extensions: Arc<ExtensionManager>,
    pub recorder: Arc<dyn UsageRecorder>,
    /// Set by `send_message` when a tool already delivered the reply; the
    /// orchestrator then skips the final-text send.
    delivered: Arc<AtomicBool>,
}

impl ToolContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<tokio::sync::RwLock<AgentConfig>>,
        scope: StoreScope,
        channel: Arc<dyn OutboundChannel>,
        approvals: Arc<ApprovalBroker>,
        budget: Arc<BudgetTracker>,
        scheduler: Arc<Scheduler>,
        extensions: Arc<ExtensionManager>,
        recorder: Arc<dyn UsageRecorder>,
    ) -> Self {
        Self {
            config,
            scope,
            channel,
            approvals,
            budget,
            scheduler,
            extensions,
            recorder,
            delivered: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn agent_id(&self) -> String {
        self.config.read().await.id.clone()
    }

    pub fn mark_delivered(&self) {
        self.delivered.store(true, Ordering::SeqCst);
    }

    pub fn was_delivered(&self) -> bool {
        self.delivered.load(Ordering::SeqCst)
    }

    /// Resets the per-turn delivery flag; the orchestrator calls this before
    /// each engine run.
    pub fn reset_turn(&self) {
        self.delivered.store(false, Ordering::SeqCst);
    }
}
