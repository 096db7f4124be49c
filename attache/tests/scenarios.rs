//! End-to-end scenarios for the engine and orchestrator, driven by the
//! scripted [`MockLlm`] and the in-memory [`RecordingChannel`].

use std::sync::Arc;

use serde_json::json;

use attache::{
    AgentConfig, AgentOptions, AgentRegistry, ApprovalBroker, BudgetTracker, ChannelBinding,
    Engine, EventRouter, ExtensionManager, FastPath, ListRecord, MockLlm, MockReply, ModelPricing,
    NoopRecorder, Note, OrchestratorDeps, Permissions, QueueSource, RecordingChannel,
    ScheduleRecord, ScheduledTask, Scheduler, Store, ToolCall, ToolContext, ToolRegistry,
    TurnRequest, AgentMessage, Role,
};

fn test_config() -> AgentConfig {
    AgentConfig {
        id: "a1".into(),
        name: "Valet".into(),
        user_id: "u1".into(),
        provider: "mock".into(),
        model: "mock".into(),
        system_prompt: "You are a helpful assistant for the user.".into(),
        permissions: Permissions::default(),
        channel: ChannelBinding {
            bot_token: "token".into(),
            chat_id: "chat".into(),
        },
        options: AgentOptions::default(),
        daily_budget_usd: None,
        timezone: Some("UTC".into()),
        pricing: ModelPricing::default(),
        integrations: Default::default(),
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

struct Harness {
    _dir: tempfile::TempDir,
    engine: Engine,
    channel: Arc<RecordingChannel>,
    llm: Arc<MockLlm>,
    scope: attache::StoreScope,
    budget: Arc<BudgetTracker>,
    approvals: Arc<ApprovalBroker>,
}

fn harness(config: AgentConfig, replies: Vec<MockReply>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::new(dir.path());
    let scope = store.scope(&config.user_id, &config.id);
    let channel = Arc::new(RecordingChannel::new());
    let approvals = Arc::new(ApprovalBroker::new());
    let budget = Arc::new(BudgetTracker::new());
    let scheduler = Scheduler::new();
    let extensions = ExtensionManager::new();
    let config = Arc::new(tokio::sync::RwLock::new(config));

    let ctx = ToolContext::new(
        Arc::clone(&config),
        scope.clone(),
        channel.clone(),
        Arc::clone(&approvals),
        Arc::clone(&budget),
        scheduler,
        extensions.clone(),
        Arc::new(NoopRecorder),
    );
    let mut registry = ToolRegistry::new(extensions);
    attache::register_builtins(&mut registry);
    let llm = Arc::new(MockLlm::new(replies));
    let engine = Engine::new(llm.clone(), Arc::new(registry), ctx.clone());

    Harness {
        _dir: dir,
        engine,
        channel,
        llm,
        scope,
        budget,
        approvals,
    }
}

fn turn(text: &str, fast_path: Option<FastPath>) -> (TurnRequest, Vec<AgentMessage>) {
    let request = TurnRequest {
        text: text.into(),
        source: QueueSource::User,
        fast_path,
    };
    let history = vec![AgentMessage::user(text)];
    (request, history)
}

/// **S1 — reminder one-shot**: the scheduler fires a reminder-template task;
/// the orchestrator delivers it directly on the channel, records a receipt,
/// disables the task, and never invokes the LLM.
#[tokio::test]
async fn s1_reminder_one_shot_bypasses_llm() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::new(dir.path());
    let channel = Arc::new(RecordingChannel::new());
    let scheduler = Scheduler::new();
    let registry = AgentRegistry::new();
    let llm = Arc::new(MockLlm::new(vec![]));

    let deps = OrchestratorDeps {
        store: store.clone(),
        channel: channel.clone(),
        llm: llm.clone(),
        approvals: Arc::new(ApprovalBroker::new()),
        budget: Arc::new(BudgetTracker::new()),
        scheduler: Arc::clone(&scheduler),
        recorder: Arc::new(NoopRecorder),
        transcriber: None,
        router: Some(Arc::new(EventRouter::new())),
    };
    registry.deploy(test_config(), deps).await.unwrap();

    let fire_at = chrono::Utc::now();
    let task = ScheduledTask::one_shot_at(
        "Buy milk",
        fire_at,
        attache::reminder_instruction("Buy milk"),
    );
    let task_id = task.id.clone();
    scheduler.add_task("a1", task).await;

    scheduler
        .tick(fire_at + chrono::Duration::seconds(60), registry.as_ref() as &dyn attache::TriggerSink)
        .await;

    // Delivered directly, exactly once, no LLM call.
    let texts = channel.texts();
    assert_eq!(texts, vec!["⏰ *Reminder*\n\nBuy milk".to_string()]);
    assert_eq!(llm.call_count(), 0);

    // Task disabled in the live scheduler and persisted as disabled.
    let tasks = scheduler.list_tasks("a1").await;
    assert!(!tasks[0].enabled);
    let scope = store.scope("u1", "a1");
    let record: ScheduleRecord = scope.get(&task_id).unwrap().unwrap();
    assert!(!record.task.enabled);

    // Receipt recorded.
    let receipts = scope.list::<attache::ExecutionReceipt>().unwrap();
    assert_eq!(receipts.len(), 1);
    assert!(receipts[0].ok);

    // Another minute later: still exactly one delivery.
    scheduler
        .tick(fire_at + chrono::Duration::seconds(180), registry.as_ref() as &dyn attache::TriggerSink)
        .await;
    assert_eq!(channel.texts().len(), 1);
}

/// **S2 — confirmation fast-path**: after the assistant asked "Do you
/// confirm?" and the user said yes, the engine runs with the reduced cap,
/// executes the pending tool, and the final text asks no new confirmation.
#[tokio::test]
async fn s2_confirmation_fast_path_executes_pending_action() {
    let h = harness(
        test_config(),
        vec![
            MockReply::tool_calls(
                "",
                vec![ToolCall::new(
                    "create_note",
                    json!({"title": "Dentist", "content": "Friday 10:00"}),
                )],
            ),
            MockReply::text("La nota está creada."),
        ],
    );

    let request = TurnRequest {
        text: "yes".into(),
        source: QueueSource::User,
        fast_path: Some(FastPath::Confirmation),
    };
    let history = vec![
        AgentMessage::user("save a note about the dentist"),
        AgentMessage::assistant("I'd create a note titled Dentist. Do you confirm?"),
        AgentMessage::user("yes"),
    ];
    let outcome = h.engine.run_turn(&request, history).await.unwrap();

    let notes = h.scope.list::<Note>().unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].title, "Dentist");
    assert!(!attache::engine::asks_confirmation(&outcome.final_text));
    // Reduced cap honored: two calls fit well under the fast cap of 4.
    assert!(outcome.llm_calls <= 4);
}

/// **S3 — action fast-path, no-tool hallucination**: "I'll add eggs." with no
/// call triggers the corrective loop; the next iteration performs exactly one
/// `add_to_list` and the list on disk reflects it.
#[tokio::test]
async fn s3_hallucinated_promise_is_corrected() {
    let h = harness(
        test_config(),
        vec![
            MockReply::text("I'll add eggs."),
            MockReply::tool_calls(
                "",
                vec![ToolCall::new(
                    "add_to_list",
                    json!({"title": "shopping list", "items": "eggs"}),
                )],
            ),
            MockReply::text("Added eggs to the shopping list."),
        ],
    );

    let (request, history) = turn("Add eggs to the shopping list", Some(FastPath::Action));
    let outcome = h.engine.run_turn(&request, history).await.unwrap();

    let lists = h.scope.list::<ListRecord>().unwrap();
    assert_eq!(lists.len(), 1);
    assert_eq!(lists[0].items.len(), 1);
    assert_eq!(lists[0].items[0].text, "eggs");

    // The corrective tool_result is in the history, between the two replies.
    let corrective = outcome
        .history
        .iter()
        .filter(|m| m.role == Role::ToolResult)
        .any(|m| m.content.contains("call the correct tool NOW"));
    assert!(corrective);

    // Exactly one add_to_list execution (one ok tool_result for it).
    let list_results = outcome
        .history
        .iter()
        .filter(|m| m.role == Role::ToolResult && m.content.contains("[add_to_list] ok"))
        .count();
    assert_eq!(list_results, 1);
    assert!(!outcome.final_text.contains("tool_call"));
}

/// **S4 — tool loop guard**: the third identical failing call is
/// short-circuited with the loop-guard failure.
#[tokio::test]
async fn s4_identical_failures_trip_loop_guard() {
    let call = ToolCall::new("run_terminal_command", json!({"command": "reboot"}));
    // Terminal permission is off, so every execution fails identically.
    let h = harness(
        test_config(),
        vec![
            MockReply::tool_calls("", vec![call.clone()]),
            MockReply::tool_calls("", vec![call.clone()]),
            MockReply::tool_calls("", vec![call.clone()]),
            MockReply::text("I can't run that command; it keeps failing."),
        ],
    );

    let (request, history) = turn("reboot the server", None);
    let outcome = h.engine.run_turn(&request, history).await.unwrap();

    let tool_results: Vec<&AgentMessage> = outcome
        .history
        .iter()
        .filter(|m| m.role == Role::ToolResult)
        .collect();
    assert_eq!(tool_results.len(), 3);
    assert!(tool_results[0].content.contains("error:failed"));
    assert!(tool_results[1].content.contains("error:failed"));
    assert!(tool_results[2].content.contains("error:tool_loop_blocked"));
    assert!(outcome.final_text.contains("can't run"));
}

/// **S5 — budget exhaustion mid-turn**: one LLM call pushes spend over the
/// cap; the gate stops the next iteration with exactly one budget notice.
#[tokio::test]
async fn s5_budget_gate_stops_mid_turn() {
    let mut config = test_config();
    config.daily_budget_usd = Some(1.0);
    // 10 prompt + 10 completion tokens from the mock cost ≈ 0.11 USD.
    config.pricing = ModelPricing {
        input_per_1k: 10.0,
        output_per_1k: 1.0,
    };

    let h = harness(
        config,
        vec![
            MockReply::tool_calls("", vec![ToolCall::new("get_notes", json!({}))]),
            MockReply::text("This should never be produced."),
        ],
    );
    h.budget.record_cost("a1", Some("UTC"), 0.995);

    let (request, history) = turn("what's in my notes?", None);
    let outcome = h.engine.run_turn(&request, history).await.unwrap();

    assert_eq!(h.llm.call_count(), 1);
    assert!(outcome.final_text.contains("budget"));
    let notices = outcome
        .history
        .iter()
        .filter(|m| m.content.contains("budget limit has been reached"))
        .count();
    assert_eq!(notices, 1);
}

/// **S6 — parallel tool batch**: three parallel-safe reads and one serial
/// write in a single iteration; result ordering in the history matches the
/// emission order.
#[tokio::test]
async fn s6_parallel_batch_preserves_emission_order() {
    let h = harness(
        test_config(),
        vec![
            MockReply::tool_calls(
                "",
                vec![
                    ToolCall::new("get_notes", json!({})),
                    ToolCall::new("get_lists", json!({})),
                    ToolCall::new("get_current_time", json!({})),
                    ToolCall::new("create_note", json!({"title": "Summary", "content": "x"})),
                ],
            ),
            MockReply::text("Here's the rundown."),
        ],
    );

    let (request, history) = turn("summarize my day", None);
    let outcome = h.engine.run_turn(&request, history).await.unwrap();

    let combined = outcome
        .history
        .iter()
        .find(|m| m.role == Role::ToolResult)
        .expect("one tool_result entry")
        .content
        .clone();
    let order: Vec<usize> = ["[get_notes]", "[get_lists]", "[get_current_time]", "[create_note]"]
        .iter()
        .map(|needle| combined.find(needle).unwrap_or_else(|| panic!("{needle} missing")))
        .collect();
    assert!(order.windows(2).all(|w| w[0] < w[1]), "order was {combined}");

    assert_eq!(h.scope.list::<Note>().unwrap().len(), 1);
    assert_eq!(outcome.final_text, "Here's the rundown.");
}

/// Boundary: a reply that is only tool-call artifacts (unparseable) yields no
/// user-visible text; the engine iterates again.
#[tokio::test]
async fn artifact_only_reply_iterates_silently() {
    let h = harness(
        test_config(),
        vec![
            MockReply::text("[tool_calls: pending]"),
            MockReply::text("All good."),
        ],
    );
    let (request, history) = turn("hello", None);
    let outcome = h.engine.run_turn(&request, history).await.unwrap();
    assert_eq!(outcome.final_text, "All good.");
    assert_eq!(h.llm.call_count(), 2);
}

/// Invariant 7: a sensitive tool runs only after a resolved-approved
/// exchange; denial fails the call without side effects.
#[tokio::test]
async fn approval_gates_terminal_commands() {
    let mut config = test_config();
    config.permissions.terminal = true;

    let h = harness(
        config,
        vec![
            MockReply::tool_calls("", vec![ToolCall::new(
                "run_terminal_command",
                json!({"command": "echo approved-run"}),
            )]),
            MockReply::text("Command executed."),
        ],
    );

    // Press the approve button as soon as it shows up.
    let channel = h.channel.clone();
    let approvals = h.approvals.clone();
    let presser = tokio::spawn(async move {
        loop {
            let data = channel
                .button_sends
                .lock()
                .unwrap()
                .first()
                .map(|(_, rows)| rows[0][0].data.clone());
            if let Some(data) = data {
                approvals.resolve_callback(&data);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    });

    let (request, history) = turn("run echo", None);
    let outcome = h.engine.run_turn(&request, history).await.unwrap();
    presser.await.unwrap();

    let results: Vec<&AgentMessage> = outcome
        .history
        .iter()
        .filter(|m| m.role == Role::ToolResult)
        .collect();
    assert!(results[0].content.contains("approved-run"));
}

#[tokio::test]
async fn approval_denial_fails_without_side_effects() {
    let mut config = test_config();
    config.permissions.terminal = true;

    let h = harness(
        config,
        vec![
            MockReply::tool_calls("", vec![ToolCall::new(
                "run_terminal_command",
                json!({"command": "touch /tmp/attache-denied-proof"}),
            )]),
            MockReply::text("Understood, I won't run it."),
        ],
    );

    let channel = h.channel.clone();
    let approvals = h.approvals.clone();
    let presser = tokio::spawn(async move {
        loop {
            let data = channel
                .button_sends
                .lock()
                .unwrap()
                .first()
                .map(|(_, rows)| rows[0][1].data.clone());
            if let Some(data) = data {
                approvals.resolve_callback(&data);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    });

    let (request, history) = turn("create the file", None);
    let outcome = h.engine.run_turn(&request, history).await.unwrap();
    presser.await.unwrap();

    let denied = outcome
        .history
        .iter()
        .any(|m| m.role == Role::ToolResult && m.content.contains("error:approval_denied"));
    assert!(denied);
    assert!(!std::path::Path::new("/tmp/attache-denied-proof").exists());
}

/// Invariant 1 at the orchestrator level: a user message enqueued behind a
/// webhook backlog is still processed first.
#[tokio::test]
async fn queue_ordering_survives_event_backlog() {
    let q = attache::MessageQueue::new();
    for i in 0..5 {
        q.push(attache::QueueEntry::webhook(format!("event {i}")));
    }
    q.push(attache::QueueEntry::user("confirm"));
    assert_eq!(q.pop().unwrap().text, "confirm");
}
