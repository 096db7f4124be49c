//! Orchestrator loop tests: end-to-end message processing through a deployed
//! agent with the scripted LLM.

use std::sync::Arc;
use std::time::Duration;

use attache::{
    AgentConfig, AgentRegistry, ApprovalBroker, BudgetTracker, ChannelBinding, EventRouter,
    MockLlm, MockReply, NoopRecorder, OrchestratorDeps, QueueEntry, RecordingChannel, Scheduler,
    Store,
};

fn config() -> AgentConfig {
    AgentConfig {
        id: "a1".into(),
        name: "Valet".into(),
        user_id: "u1".into(),
        provider: "mock".into(),
        model: "mock".into(),
        system_prompt: "You are a helpful assistant for the user.".into(),
        permissions: Default::default(),
        channel: ChannelBinding {
            bot_token: "token".into(),
            chat_id: "chat".into(),
        },
        options: Default::default(),
        daily_budget_usd: None,
        timezone: Some("UTC".into()),
        pricing: Default::default(),
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

struct Deployed {
    _dir: tempfile::TempDir,
    registry: Arc<AgentRegistry>,
    channel: Arc<RecordingChannel>,
    store: Store,
}

async fn deploy(config: AgentConfig, replies: Vec<MockReply>) -> Deployed {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::new(dir.path());
    let channel = Arc::new(RecordingChannel::new());
    let registry = AgentRegistry::new();
    let scheduler = Scheduler::new();
    let deps = OrchestratorDeps {
        store: store.clone(),
        channel: channel.clone(),
        llm: Arc::new(MockLlm::new(replies)),
        approvals: Arc::new(ApprovalBroker::new()),
        budget: Arc::new(BudgetTracker::new()),
        scheduler,
        recorder: Arc::new(NoopRecorder),
        transcriber: None,
        router: Some(Arc::new(EventRouter::new())),
    };
    registry.deploy(config, deps).await.unwrap();
    Deployed {
        _dir: dir,
        registry,
        channel,
        store,
    }
}

async fn wait_for_text(channel: &RecordingChannel) -> Vec<String> {
    for _ in 0..200 {
        let texts = channel.texts();
        if !texts.is_empty() {
            return texts;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no channel text within the wait window");
}

#[tokio::test]
async fn user_message_round_trip_delivers_reply() {
    let d = deploy(config(), vec![MockReply::text("Hi there!")]).await;
    let agent = d.registry.get("a1").unwrap();
    agent.handle_chat_message(Some("hello".into()), None).await;

    let texts = wait_for_text(&d.channel).await;
    assert_eq!(texts, vec!["Hi there!".to_string()]);

    // Both directions persisted in the conversation log.
    for _ in 0..100 {
        let msgs = d.store.scope("u1", "a1").recent_messages(10).unwrap();
        if msgs.len() >= 2 {
            assert_eq!(msgs[0].content, "hello");
            assert_eq!(msgs[1].content, "Hi there!");
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("conversation log not persisted");
}

/// Webhook-sourced turns speak only through tools: the final text is not
/// delivered on the channel.
#[tokio::test]
async fn webhook_turn_does_not_send_final_text() {
    let d = deploy(
        config(),
        vec![
            MockReply::text("Internal analysis of the event."),
            MockReply::text("Reply to the user."),
        ],
    )
    .await;
    let agent = d.registry.get("a1").unwrap();

    agent.enqueue(QueueEntry::webhook("A webhook event arrived."));
    // Give the loop time to process the webhook turn.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(d.channel.texts().is_empty());

    // A user turn afterwards still gets its reply.
    agent.handle_chat_message(Some("hi".into()), None).await;
    let texts = wait_for_text(&d.channel).await;
    assert_eq!(texts, vec!["Reply to the user.".to_string()]);
}

#[tokio::test]
async fn stop_unregisters_the_agent() {
    let d = deploy(config(), vec![]).await;
    assert_eq!(d.registry.listing(), vec!["a1".to_string()]);
    assert!(d.registry.stop("a1").await);
    assert!(d.registry.listing().is_empty());
    assert!(!d.registry.stop("a1").await);
}

/// Invalid configs are rejected at deploy.
#[tokio::test]
async fn deploy_rejects_invalid_config() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::new(dir.path());
    let registry = AgentRegistry::new();
    let mut bad = config();
    bad.channel.bot_token.clear();
    let deps = OrchestratorDeps {
        store,
        channel: Arc::new(RecordingChannel::new()),
        llm: Arc::new(MockLlm::new(vec![])),
        approvals: Arc::new(ApprovalBroker::new()),
        budget: Arc::new(BudgetTracker::new()),
        scheduler: Scheduler::new(),
        recorder: Arc::new(NoopRecorder),
        transcriber: None,
        router: None,
    };
    assert!(registry.deploy(bad, deps).await.is_err());
}
