//! attache-bot: deploys configured agents, runs the Telegram dispatcher and
//! the webhook HTTP surface.

mod telegram;
mod webhooks;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dashmap::DashMap;
use teloxide::prelude::*;
use tracing::{info, warn};

use attache::{
    AgentConfig, AgentRegistry, ApprovalBroker, BudgetTracker, ChatOpenAi, EventRouter,
    NoopRecorder, OrchestratorDeps, Scheduler, Store,
};
use telegram::{BotState, ReplyTickets, TelegramChannel};

#[derive(Parser, Debug)]
#[command(name = "attache-bot", about = "Multi-agent assistant runtime")]
struct Args {
    /// JSON file with an array of agent configs to deploy at startup.
    #[arg(long, env = "ATTACHE_AGENTS")]
    agents: Option<PathBuf>,

    /// Data directory (entity store + always-on table).
    #[arg(long, env = "ATTACHE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Webhook HTTP listen address.
    #[arg(long, env = "ATTACHE_LISTEN", default_value = "127.0.0.1:8081")]
    listen: String,

    /// Telegram bot token; falls back to the first agent's channel binding.
    #[arg(long, env = "TELEGRAM_BOT_TOKEN")]
    bot_token: Option<String>,
}

fn data_dir(args: &Args) -> PathBuf {
    args.data_dir.clone().unwrap_or_else(|| {
        dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("attache")
    })
}

fn load_agent_configs(path: &PathBuf) -> anyhow::Result<Vec<AgentConfig>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading agent configs from {}", path.display()))?;
    serde_json::from_str(&raw).context("parsing agent configs")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::load_and_apply("attache", None).context("loading config")?;
    let _tracing = config::init_tracing("attache")?;

    let args = Args::parse();
    let store = Store::new(data_dir(&args));
    info!(root = %store.root().display(), "store ready");

    let registry = AgentRegistry::new();
    let scheduler = Scheduler::new();
    scheduler.start(registry.clone());
    let approvals = Arc::new(ApprovalBroker::new());
    let budget = Arc::new(BudgetTracker::with_table(store.always_on()?));
    let router = EventRouter::global();
    let tickets = Arc::new(ReplyTickets::new());
    let chat_index: DashMap<String, String> = DashMap::new();

    let configs = match &args.agents {
        Some(path) => load_agent_configs(path)?,
        None => Vec::new(),
    };

    let first_token = args
        .bot_token
        .clone()
        .or_else(|| configs.first().map(|c| c.channel.bot_token.clone()))
        .context("no Telegram bot token (set TELEGRAM_BOT_TOKEN or provide --agents)")?;
    let bot = Bot::new(first_token);

    // Deploy configured agents, each bound to its chat.
    for config in configs {
        let chat_id = match config.channel.chat_id.parse::<i64>() {
            Ok(id) => ChatId(id),
            Err(_) => {
                warn!(agent = %config.id, chat = %config.channel.chat_id, "invalid chat id, skipping");
                continue;
            }
        };
        let deps = OrchestratorDeps {
            store: store.clone(),
            channel: Arc::new(TelegramChannel::new(bot.clone(), chat_id)),
            llm: Arc::new(ChatOpenAi::new(config.model.clone())),
            approvals: Arc::clone(&approvals),
            budget: Arc::clone(&budget),
            scheduler: Arc::clone(&scheduler),
            recorder: Arc::new(NoopRecorder),
            transcriber: None,
            router: Some(Arc::clone(&router)),
        };
        let agent_id = config.id.clone();
        let chat_key = chat_id.to_string();
        match registry.deploy(config, deps).await {
            Ok(_) => {
                chat_index.insert(chat_key, agent_id.clone());
                info!(agent = %agent_id, "agent deployed");
            }
            Err(e) => warn!(agent = %agent_id, error = %e, "deploy failed"),
        }
    }

    // Always-on redeploy restores agents from the table across restarts.
    {
        let deps_for = |config: &AgentConfig| {
            let chat_id = config
                .channel
                .chat_id
                .parse::<i64>()
                .map(ChatId)
                .unwrap_or(ChatId(0));
            OrchestratorDeps {
                store: store.clone(),
                channel: Arc::new(TelegramChannel::new(bot.clone(), chat_id)),
                llm: Arc::new(ChatOpenAi::new(config.model.clone())),
                approvals: Arc::clone(&approvals),
                budget: Arc::clone(&budget),
                scheduler: Arc::clone(&scheduler),
                recorder: Arc::new(NoopRecorder),
                transcriber: None,
                router: Some(Arc::clone(&router)),
            }
        };
        for result in registry.redeploy_always_on(&store, deps_for).await {
            match result {
                Ok(orchestrator) => {
                    let config = orchestrator.config_snapshot().await;
                    chat_index.insert(config.channel.chat_id.clone(), config.id);
                }
                Err(e) => warn!(error = %e, "always-on redeploy failed"),
            }
        }
    }

    // Webhook HTTP surface.
    let app = webhooks::router(webhooks::AppState {
        registry: Arc::clone(&registry),
        router: Arc::clone(&router),
    });
    let listener = tokio::net::TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("binding {}", args.listen))?;
    info!(listen = %args.listen, "webhook surface up");
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!(error = %e, "webhook server exited");
        }
    });

    // Telegram long polling, until Ctrl-C.
    let state = Arc::new(BotState {
        registry: Arc::clone(&registry),
        approvals,
        tickets,
        chat_index,
    });
    telegram::run_dispatcher(bot, state).await;

    info!("shutting down");
    server.abort();
    registry.shutdown().await;
    router.shutdown().await;
    scheduler.shutdown();
    Ok(())
}
