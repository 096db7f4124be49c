//! # attache
//!
//! A multi-agent personal-assistant runtime. Each deployed agent is a
//! long-lived loop that ingests messages from heterogeneous sources (chat
//! bot, web UI, scheduled triggers, webhooks, real-time subscriptions),
//! drives an LLM conversation with tool use, enforces daily budgets and
//! human-in-the-loop approvals, and replies through the originating channel.
//!
//! ## Main modules
//!
//! - [`orchestrator`]: [`Orchestrator`] (per-agent queue + supervisor loop),
//!   [`AgentRegistry`] (running-agents map, scheduler/router indirection).
//! - [`engine`]: [`Engine`] — the bounded tool-use iteration loop with
//!   text/native call parsing, the anti-hallucination guard, and the budget
//!   gate.
//! - [`store`]: JSON-file-per-entity persistence with keyword search and the
//!   always-on table.
//! - [`tools`]: [`Tool`] contract, [`ToolRegistry`], built-in tool set.
//! - [`extension`]: JSON-RPC 2.0 subprocess tool servers
//!   ([`ExtensionManager`], line or length-prefixed framing).
//! - [`schedule`]: [`Scheduler`] — cron and absolute one-shot triggers.
//! - [`events`]: [`EventRouter`] — real-time event fan-out with
//!   subscription matching and cooldowns.
//! - [`llm`]: [`LlmProvider`] trait, [`MockLlm`], [`ChatOpenAi`].
//! - [`approval`] / [`budget`]: consent exchanges and the daily cost ledger.
//! - [`channel`]: outbound chat seam implemented by the transport binary.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use attache::{
//!     AgentConfig, AgentRegistry, ApprovalBroker, BudgetTracker, ChatOpenAi,
//!     EventRouter, NoopRecorder, OrchestratorDeps, RecordingChannel, Scheduler, Store,
//! };
//!
//! # async fn run(config: AgentConfig) -> Result<(), Box<dyn std::error::Error>> {
//! let registry = AgentRegistry::new();
//! let scheduler = Scheduler::new();
//! scheduler.start(registry.clone());
//!
//! let deps = OrchestratorDeps {
//!     store: Store::new("/var/lib/attache"),
//!     channel: Arc::new(RecordingChannel::new()),
//!     llm: Arc::new(ChatOpenAi::new("gpt-4o-mini")),
//!     approvals: Arc::new(ApprovalBroker::new()),
//!     budget: Arc::new(BudgetTracker::new()),
//!     scheduler,
//!     recorder: Arc::new(NoopRecorder),
//!     transcriber: None,
//!     router: Some(EventRouter::global()),
//! };
//! let agent = registry.deploy(config, deps).await?;
//! agent.handle_chat_message(Some("add milk to the shopping list".into()), None).await;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod approval;
pub mod budget;
pub mod channel;
pub mod engine;
pub mod error;
pub mod events;
pub mod extension;
pub mod llm;
pub mod message;
pub mod orchestrator;
pub mod redact;
pub mod schedule;
pub mod store;
pub mod tools;

pub use agent::{AgentConfig, AgentOptions, ChannelBinding, Integrations, ModelPricing, Permissions};
pub use approval::{
    ApprovalBroker, ApprovalDecision, ApprovalKind, ApprovalRequest, APPROVAL_TIMEOUT,
    APPROVE_PREFIX, DENY_PREFIX,
};
pub use budget::{cost_usd, BudgetTracker};
pub use channel::{Button, ChannelError, OutboundChannel, RecordingChannel};
pub use engine::{Engine, FastPath, TurnOutcome, TurnRequest};
pub use error::{
    AgentError, EngineError, ExtensionError, LlmError, ScheduleError, StoreError, ToolErrorKind,
};
pub use events::{
    EventPriority, EventRouter, EventSink, RoutedInstruction, RuntimeEvent, SkillTrigger,
    Subscription, SubscriptionType,
};
pub use extension::{
    ExtensionManager, ExtensionServerConfig, FramingMode, PROTOCOL_VERSION,
};
pub use llm::{
    estimate_tokens, ChatOpenAi, LlmProvider, LlmReply, LlmRequest, LlmUsage, MockLlm, MockReply,
    NativeToolDef,
};
pub use message::{trim_preserving_users, AgentMessage, Role};
pub use orchestrator::{
    AgentRegistry, MessageQueue, Orchestrator, OrchestratorDeps, QueueEntry, QueueSource,
    AGENT_PROCESS_TIMEOUT,
};
pub use redact::{mask_email, redact_credentials, REDACTED_FIELDS};
pub use schedule::{
    parse_reminder, preparse_natural, reminder_instruction, CronExpr, ScheduledTask, Scheduler,
    TriggerSink, REMINDER_PREFIX,
};
pub use store::{
    always_on_key, AlwaysOnTable, ConversationEntry, Entity, ExecutionReceipt, Expense,
    FileRecord, ListItem, ListRecord, LocationReminder, Note, ScheduleRecord, Store, StoreScope,
    UndoRecord, WorkingMemoryEntry, ALWAYS_ON_PREFIX,
};
pub use tools::{
    register_builtins, DescribeOptions, NoopRecorder, Tool, ToolCall, ToolContext, ToolOutcome,
    ToolRegistry, ToolSpec, Transcriber, UsageEvent, UsageRecorder, EXTENSION_TOOL_PREFIX,
};

/// When running `cargo test -p attache`, initializes tracing from `RUST_LOG`
/// so unit tests can print logs with `--nocapture`.
#[cfg(test)]
mod test_logging {
    use ctor::ctor;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::Layer;

    #[ctor]
    fn init() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_filter(filter),
            )
            .try_init();
    }
}
