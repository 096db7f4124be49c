//! Agent orchestrator: the per-agent supervisor loop.
//!
//! Owns the queue, the single-flight processing state, the bound tool
//! context, the extension manager, the router registration and the poll
//! ticker. Nothing escapes the loop uncaught: engine failures become one
//! apology line, tool failures were already folded into the conversation by
//! the engine.

mod queue;
mod registry;

pub use queue::{MessageQueue, QueueEntry, QueueSource};
pub use registry::AgentRegistry;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agent::AgentConfig;
use crate::approval::{ApprovalBroker, ApprovalDecision, ApprovalKind, ApprovalRequest};
use crate::budget::BudgetTracker;
use crate::channel::OutboundChannel;
use crate::engine::{is_action_request, is_affirmative, Engine, FastPath, TurnRequest};
use crate::error::{AgentError, EngineError};
use crate::events::{EventRouter, Subscription, SubscriptionType};
use crate::extension::ExtensionManager;
use crate::llm::LlmProvider;
use crate::message::{trim_preserving_users, AgentMessage, Role};
use crate::schedule::{parse_reminder, ScheduledTask, Scheduler};
use crate::store::{ExecutionReceipt, ScheduleRecord, Store, StoreScope};
use crate::tools::{register_builtins, ToolContext, ToolRegistry, Transcriber, UsageRecorder};

/// Hard bound on one engine turn.
pub const AGENT_PROCESS_TIMEOUT: Duration = Duration::from_secs(180);
/// In-memory conversation window soft cap.
const HISTORY_CAP: usize = 300;
/// Poll-subscription ticker period.
const POLL_TICK: Duration = Duration::from_secs(60);
/// Assistant messages scanned for a pending confirmation question.
const CONFIRMATION_LOOKBACK: usize = 3;

/// Shared collaborators handed to every orchestrator.
#[derive(Clone)]
pub struct OrchestratorDeps {
    pub store: Store,
    pub channel: Arc<dyn OutboundChannel>,
    pub llm: Arc<dyn LlmProvider>,
    pub approvals: Arc<ApprovalBroker>,
    pub budget: Arc<BudgetTracker>,
    pub scheduler: Arc<Scheduler>,
    pub recorder: Arc<dyn UsageRecorder>,
    pub transcriber: Option<Arc<dyn Transcriber>>,
    pub router: Option<Arc<EventRouter>>,
}

/// One deployed agent.
pub struct Orchestrator {
    config: Arc<RwLock<AgentConfig>>,
    queue: MessageQueue,
    wake: Notify,
    processing: AtomicBool,
    history: Mutex<Vec<AgentMessage>>,
    engine: Engine,
    ctx: ToolContext,
    scope: StoreScope,
    channel: Arc<dyn OutboundChannel>,
    approvals: Arc<ApprovalBroker>,
    budget: Arc<BudgetTracker>,
    scheduler: Arc<Scheduler>,
    extensions: Arc<ExtensionManager>,
    subscriptions: Arc<RwLock<Vec<Subscription>>>,
    transcriber: Option<Arc<dyn Transcriber>>,
    router: Option<Arc<EventRouter>>,
    cancel: CancellationToken,
}

impl Orchestrator {
    /// Validates the config, connects extension servers, installs schedules,
    /// registers with the event router, and starts the processing loop.
    pub async fn deploy(
        config: AgentConfig,
        deps: OrchestratorDeps,
    ) -> Result<Arc<Self>, AgentError> {
        config.validate()?;
        info!(agent = %config.id, name = %config.name, "deploying agent");

        let scope = deps.store.scope(&config.user_id, &config.id);
        let extensions = ExtensionManager::new();
        extensions.load(&config.extension_servers).await;

        // Live schedules: config entries plus persisted records (persisted
        // state wins on id collision, it carries the latest enabled flag).
        let mut tasks: Vec<ScheduledTask> = config.schedules.clone();
        for record in scope.list::<ScheduleRecord>().unwrap_or_default() {
            match tasks.iter_mut().find(|t| t.id == record.task.id) {
                Some(slot) => *slot = record.task,
                None => tasks.push(record.task),
            }
        }
        deps.scheduler.set_tasks(&config.id, tasks).await;

        let history = scope.recent_messages(HISTORY_CAP).unwrap_or_default();
        let subscriptions = Arc::new(RwLock::new(config.subscriptions.clone()));

        let agent_id = config.id.clone();
        let user_id = config.user_id.clone();
        let event_sources = config.event_sources.iter().cloned().collect();
        let skills = config.skills.clone();

        let config = Arc::new(RwLock::new(config));
        let ctx = ToolContext::new(
            Arc::clone(&config),
            scope.clone(),
            Arc::clone(&deps.channel),
            Arc::clone(&deps.approvals),
            Arc::clone(&deps.budget),
            Arc::clone(&deps.scheduler),
            Arc::clone(&extensions),
            Arc::clone(&deps.recorder),
        );
        let mut registry = ToolRegistry::new(Arc::clone(&extensions));
        register_builtins(&mut registry);
        let engine = Engine::new(Arc::clone(&deps.llm), Arc::new(registry), ctx.clone());

        let orchestrator = Arc::new(Self {
            config,
            queue: MessageQueue::new(),
            wake: Notify::new(),
            processing: AtomicBool::new(false),
            history: Mutex::new(history),
            engine,
            ctx,
            scope,
            channel: deps.channel,
            approvals: deps.approvals,
            budget: deps.budget,
            scheduler: deps.scheduler,
            extensions,
            subscriptions: Arc::clone(&subscriptions),
            transcriber: deps.transcriber,
            router: deps.router.clone(),
            cancel: CancellationToken::new(),
        });

        if let Some(router) = &deps.router {
            router
                .register(
                    &agent_id,
                    &user_id,
                    event_sources,
                    subscriptions,
                    skills,
                    Arc::new(registry::RouterSink::new(&orchestrator)),
                )
                .await;
        }

        orchestrator.spawn_loop();
        orchestrator.spawn_poll_ticker();
        Ok(orchestrator)
    }

    pub async fn agent_id(&self) -> String {
        self.config.read().await.id.clone()
    }

    /// Current config snapshot (the orchestrator owns mutations).
    pub async fn config_snapshot(&self) -> AgentConfig {
        self.config.read().await.clone()
    }

    pub async fn webhook_secret(&self) -> Option<String> {
        self.config.read().await.webhook_secret.clone()
    }

    /// True when this agent has an active Gmail integration.
    pub async fn gmail_enabled(&self) -> bool {
        let config = self.config.read().await;
        config.permissions.gmail && config.integrations.gmail_email.is_some()
    }

    /// True while a message is in flight (diagnostics; the loop itself
    /// guarantees single-flight).
    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Snapshot of the in-memory window.
    pub async fn history(&self) -> Vec<AgentMessage> {
        self.history.lock().await.clone()
    }

    /// Thread-safe enqueue respecting the user-before-background rule.
    pub fn enqueue(&self, entry: QueueEntry) {
        self.queue.push(entry);
        self.wake.notify_one();
    }

    /// Chat inbound: merge voice transcript, match keyword subscriptions,
    /// enqueue as user.
    pub async fn handle_chat_message(&self, text: Option<String>, voice_file_id: Option<String>) {
        let mut content = text.unwrap_or_default();
        if let Some(file_id) = voice_file_id {
            match self.transcribe(&file_id).await {
                Some(transcript) => {
                    if !content.is_empty() {
                        content.push(' ');
                    }
                    content.push_str(&transcript);
                }
                None => warn!(file = %file_id, "voice message could not be transcribed"),
            }
        }
        let content = content.trim().to_string();
        if content.is_empty() {
            return;
        }

        // Keyword subscriptions fire off inbound chat text too.
        let now = Utc::now();
        {
            let mut subs = self.subscriptions.write().await;
            for sub in subs
                .iter_mut()
                .filter(|s| s.enabled && s.kind == SubscriptionType::Keyword)
            {
                let Some(keyword) = sub.keyword.clone() else { continue };
                if content.to_lowercase().contains(&keyword.to_lowercase())
                    && !sub.in_cooldown(now)
                {
                    sub.record_fire(now);
                    self.enqueue(QueueEntry::webhook(format!(
                        "{}\n\nTriggered by keyword `{keyword}` in the user's message: {content}",
                        sub.instruction
                    )));
                }
            }
        }

        self.enqueue(QueueEntry::user(content).with_channel("chat"));
    }

    /// Web UI inbound.
    pub fn handle_web_message(&self, text: impl Into<String>) {
        self.enqueue(QueueEntry::user(text).with_channel("web"));
    }

    /// Button callback: approval prefixes resolve the waiting approval; any
    /// other payload is translated to user text by the transport layer.
    pub fn handle_callback(&self, data: &str) -> bool {
        self.approvals.resolve_callback(data)
    }

    async fn transcribe(&self, file_id: &str) -> Option<String> {
        let transcriber = self.transcriber.as_ref()?;
        let bytes = match self.channel.download_file(file_id).await {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "voice download failed");
                return None;
            }
        };
        match transcriber.transcribe(&bytes).await {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(error = %e, "transcription failed");
                None
            }
        }
    }

    /// Scheduler trigger entry point (called via the registry sink).
    pub async fn on_task_due(&self, task: ScheduledTask) {
        // Reminder fast-path: template one-shots go straight to the channel,
        // no LLM turn.
        if task.one_shot || task.trigger_at.is_some() {
            if let Some(message) = parse_reminder(&task.instruction) {
                let text = format!("⏰ *Reminder*\n\n{message}");
                let ok = self.channel.send_text(&text).await.is_ok();
                let mut receipt = ExecutionReceipt::new(&task, ok, "reminder delivered");
                if let Err(e) = self.scope.put(&mut receipt) {
                    warn!(error = %e, "failed to persist reminder receipt");
                }
                return;
            }
        }
        self.enqueue(QueueEntry::scheduler(task.instruction.clone(), task));
    }

    /// Persists the disabled state after a one-shot fired.
    pub async fn on_one_shot_fired(&self, task: ScheduledTask) {
        let mut record = match self.scope.get::<ScheduleRecord>(&task.id) {
            Ok(Some(r)) => r,
            _ => ScheduleRecord::new(task.clone()),
        };
        record.task = task;
        record.task.enabled = false;
        if let Err(e) = self.scope.put(&mut record) {
            warn!(error = %e, "failed to persist one-shot disabled state");
        }
    }

    /// Stops the agent: cancels loops and tickers, unhooks the scheduler and
    /// router, and terminates extension servers. In-flight engine work runs
    /// to its timeout but its result is discarded.
    pub async fn stop(&self) {
        let agent_id = self.agent_id().await;
        info!(agent = %agent_id, "stopping agent");
        self.cancel.cancel();
        self.scheduler.remove_agent(&agent_id).await;
        if let Some(router) = &self.router {
            router.unregister(&agent_id).await;
        }
        self.extensions.shutdown_all().await;
    }

    fn spawn_loop(self: &Arc<Self>) {
        let orch = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = orch.cancel.cancelled() => break,
                    _ = orch.wake.notified() => {}
                }
                while let Some(entry) = orch.queue.pop() {
                    if orch.cancel.is_cancelled() {
                        return;
                    }
                    let delay = {
                        let config = orch.config.read().await;
                        match entry.source {
                            QueueSource::User => {
                                Duration::from_millis(config.options.queue_delay_user_ms())
                            }
                            _ => Duration::from_millis(config.options.queue_delay_background_ms()),
                        }
                    };
                    orch.processing.store(true, Ordering::SeqCst);
                    orch.process_entry(entry).await;
                    orch.processing.store(false, Ordering::SeqCst);
                    tokio::time::sleep(delay).await;
                }
            }
        });
    }

    fn spawn_poll_ticker(self: &Arc<Self>) {
        let orch = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(POLL_TICK);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = orch.cancel.cancelled() => break,
                    _ = interval.tick() => orch.poll_subscriptions().await,
                }
            }
        });
    }

    /// Evaluates poll-type subscriptions on the 60-second ticker.
    async fn poll_subscriptions(&self) {
        let now = Utc::now();
        let mut due: Vec<(String, String)> = Vec::new();
        {
            let mut subs = self.subscriptions.write().await;
            for sub in subs
                .iter_mut()
                .filter(|s| s.enabled && s.kind == SubscriptionType::Poll)
            {
                let interval_min = sub.poll_interval_minutes.unwrap_or(5).max(1);
                let elapsed_ok = match sub.last_fired_at {
                    Some(last) => now - last >= chrono::Duration::minutes(interval_min as i64),
                    None => true,
                };
                if elapsed_ok && !sub.in_cooldown(now) {
                    sub.record_fire(now);
                    let target = sub.poll_target.clone().unwrap_or_default();
                    due.push((sub.instruction.clone(), target));
                }
            }
        }
        for (instruction, target) in due {
            self.enqueue(QueueEntry::webhook(format!(
                "{instruction}\n\nCheck the polled target now: {target}"
            )));
        }
    }

    /// One queue entry, start to finish. Never propagates an error.
    async fn process_entry(&self, entry: QueueEntry) {
        let config = self.config.read().await.clone();
        debug!(agent = %config.id, source = ?entry.source, "processing queue entry");

        // Immediate-visibility entry before the LLM runs.
        let inbound_role = match entry.source {
            QueueSource::User => Role::User,
            _ => Role::System,
        };
        let mut inbound = AgentMessage::new(inbound_role, &entry.text);
        inbound.channel = entry.channel.clone();
        {
            let mut history = self.history.lock().await;
            history.push(inbound.clone());
        }
        if let Err(e) = self.scope.append_message(&inbound) {
            warn!(error = %e, "failed to persist inbound message");
        }

        // Budget gate with the override approval path.
        if self.budget.is_exhausted(
            &config.id,
            config.timezone.as_deref(),
            config.daily_budget_usd,
        ) {
            let request = ApprovalRequest::new(
                ApprovalKind::BudgetOverride,
                format!(
                    "Daily budget ({:.2} USD) is exhausted. Allow this agent to keep running today?",
                    config.daily_budget_usd.unwrap_or_default()
                ),
            );
            match self.approvals.request(request, self.channel.as_ref()).await {
                ApprovalDecision::Approved => {
                    self.budget.grant_override(&config.id);
                    info!(agent = %config.id, "budget override granted for today");
                }
                _ => {
                    let refusal = "💸 Daily budget reached; I'll be back tomorrow.";
                    let _ = self.channel.send_text(refusal).await;
                    self.append_assistant(refusal).await;
                    return;
                }
            }
        }

        if entry.source == QueueSource::User {
            self.channel.typing().await;
        }

        // Fast-path detection.
        let fast_path = if entry.source == QueueSource::User {
            if is_affirmative(&entry.text) && self.pending_confirmation().await {
                Some(FastPath::Confirmation)
            } else if is_action_request(&entry.text) {
                Some(FastPath::Action)
            } else {
                None
            }
        } else {
            None
        };

        self.ctx.reset_turn();
        let request = TurnRequest {
            text: entry.text.clone(),
            source: entry.source,
            fast_path,
        };
        let history_snapshot = self.history.lock().await.clone();
        let snapshot_len = history_snapshot.len();

        let result = tokio::time::timeout(
            AGENT_PROCESS_TIMEOUT,
            self.engine.run_turn(&request, history_snapshot),
        )
        .await
        .unwrap_or(Err(EngineError::TurnTimeout(AGENT_PROCESS_TIMEOUT)));

        match result {
            Ok(outcome) => {
                // Replace the window with the engine's updated history and
                // persist everything the turn appended.
                for msg in outcome.history.iter().skip(snapshot_len) {
                    if let Err(e) = self.scope.append_message(msg) {
                        warn!(error = %e, "failed to persist outbound message");
                    }
                }
                {
                    let mut history = self.history.lock().await;
                    *history = trim_preserving_users(outcome.history, HISTORY_CAP);
                }

                match entry.source {
                    QueueSource::User => {
                        if !self.ctx.was_delivered() && !outcome.final_text.trim().is_empty() {
                            if let Err(e) = self.channel.send_text(&outcome.final_text).await {
                                warn!(error = %e, "final text send failed");
                            }
                        }
                    }
                    QueueSource::Scheduler => {
                        self.send_execution_receipt(&entry, true, &outcome.final_text).await;
                    }
                    QueueSource::Webhook => {
                        // Webhook turns speak only through tools.
                    }
                }
            }
            Err(e) => {
                error!(agent = %config.id, error = %e, "engine turn failed");
                let apology = format!("⚠️ Error processing message: {e}");
                let _ = self.channel.send_text(&apology).await;
                self.append_assistant(&apology).await;
                if entry.source == QueueSource::Scheduler {
                    self.send_execution_receipt(&entry, false, &e.to_string()).await;
                }
            }
        }
    }

    /// Did one of the last few assistant messages ask for confirmation?
    async fn pending_confirmation(&self) -> bool {
        let history = self.history.lock().await;
        history
            .iter()
            .rev()
            .filter(|m| m.role == Role::Assistant)
            .take(CONFIRMATION_LOOKBACK)
            .any(|m| crate::engine::asks_confirmation(&m.content))
    }

    async fn append_assistant(&self, text: &str) {
        let msg = AgentMessage::assistant(text);
        if let Err(e) = self.scope.append_message(&msg) {
            warn!(error = %e, "failed to persist assistant message");
        }
        let mut history = self.history.lock().await;
        history.push(msg);
        let trimmed = trim_preserving_users(std::mem::take(&mut *history), HISTORY_CAP);
        *history = trimmed;
    }

    /// Receipt for scheduler-sourced turns: channel message + store record.
    async fn send_execution_receipt(&self, entry: &QueueEntry, ok: bool, detail: &str) {
        let Some(task) = &entry.task else { return };
        let text = if ok {
            format!("✅ Task `{}` completed.\n{detail}", task.name)
        } else {
            format!("⚠️ Task `{}` failed: {detail}", task.name)
        };
        let _ = self.channel.send_text(&text).await;
        let mut receipt = ExecutionReceipt::new(task, ok, detail);
        if let Err(e) = self.scope.put(&mut receipt) {
            warn!(error = %e, "failed to persist execution receipt");
        }
    }
}
