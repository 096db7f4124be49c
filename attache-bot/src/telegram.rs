//! Telegram transport: outbound channel implementation and the inbound
//! dispatcher (messages, voice notes, button callbacks).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, InlineKeyboardButton, InlineKeyboardMarkup, ParseMode};
use tracing::{debug, warn};

use attache::{AgentRegistry, ApprovalBroker, Button, ChannelError, OutboundChannel};

/// Telegram caps labels hard at 64 bytes; we clamp earlier for layout.
const BUTTON_LABEL_MAX: usize = 28;
/// Telegram's callback_data hard limit.
const CALLBACK_DATA_MAX: usize = 64;
/// Short-reply ticket lifetime.
const TICKET_TTL: Duration = Duration::from_secs(30 * 60);

/// Outbound channel bound to one chat.
pub struct TelegramChannel {
    bot: Bot,
    chat_id: ChatId,
}

impl TelegramChannel {
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        Self { bot, chat_id }
    }
}

#[async_trait]
impl OutboundChannel for TelegramChannel {
    async fn send_text(&self, text: &str) -> Result<(), ChannelError> {
        self.bot
            .send_message(self.chat_id, text)
            .parse_mode(ParseMode::Markdown)
            .await
            .map(|_| ())
            .map_err(|e| ChannelError::Send(e.to_string()))
    }

    async fn send_buttons(&self, text: &str, rows: &[Vec<Button>]) -> Result<(), ChannelError> {
        let keyboard: Vec<Vec<InlineKeyboardButton>> = rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|b| {
                        let label: String = b.label.chars().take(BUTTON_LABEL_MAX).collect();
                        let data: String = b.data.chars().take(CALLBACK_DATA_MAX).collect();
                        InlineKeyboardButton::callback(label, data)
                    })
                    .collect()
            })
            .collect();
        self.bot
            .send_message(self.chat_id, text)
            .parse_mode(ParseMode::Markdown)
            .reply_markup(InlineKeyboardMarkup::new(keyboard))
            .await
            .map(|_| ())
            .map_err(|e| ChannelError::Send(e.to_string()))
    }

    async fn typing(&self) {
        let _ = self
            .bot
            .send_chat_action(self.chat_id, ChatAction::Typing)
            .await;
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, ChannelError> {
        let file = self
            .bot
            .get_file(file_id.to_string())
            .await
            .map_err(|e| ChannelError::Download(e.to_string()))?;
        let mut cursor = std::io::Cursor::new(Vec::new());
        self.bot
            .download_file(&file.path, &mut cursor)
            .await
            .map_err(|e| ChannelError::Download(e.to_string()))?;
        Ok(cursor.into_inner())
    }
}

/// Server-side short-reply tickets (`replyid:<ticket>` callbacks) with a
/// 30-minute TTL.
#[derive(Default)]
pub struct ReplyTickets {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl ReplyTickets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, text: impl Into<String>) -> String {
        let ticket = uuid_like();
        let mut entries = self.entries.lock().unwrap();
        purge(&mut entries);
        entries.insert(ticket.clone(), (text.into(), Instant::now()));
        ticket
    }

    pub fn resolve(&self, ticket: &str) -> Option<String> {
        let mut entries = self.entries.lock().unwrap();
        purge(&mut entries);
        entries.remove(ticket).map(|(text, _)| text)
    }
}

fn purge(entries: &mut HashMap<String, (String, Instant)>) {
    entries.retain(|_, (_, at)| at.elapsed() < TICKET_TTL);
}

fn uuid_like() -> String {
    // Tickets only need uniqueness within the TTL window.
    format!("{:016x}", rand::random::<u64>())
}

/// Shared state for the dispatcher.
pub struct BotState {
    pub registry: Arc<AgentRegistry>,
    pub approvals: Arc<ApprovalBroker>,
    pub tickets: Arc<ReplyTickets>,
    /// chat id (stringified) → agent id.
    pub chat_index: DashMap<String, String>,
}

impl BotState {
    fn agent_for_chat(&self, chat_id: ChatId) -> Option<Arc<attache::Orchestrator>> {
        let agent_id = self.chat_index.get(&chat_id.to_string())?;
        self.registry.get(&agent_id)
    }
}

async fn on_message(_bot: Bot, state: Arc<BotState>, msg: Message) -> ResponseResult<()> {
    let Some(orchestrator) = state.agent_for_chat(msg.chat.id) else {
        debug!(chat = %msg.chat.id, "message from unbound chat ignored");
        return Ok(());
    };
    let text = msg.text().map(|t| t.to_string());
    let voice_file_id = msg.voice().map(|v| v.file.id.to_string());
    if text.is_none() && voice_file_id.is_none() {
        return Ok(());
    }
    orchestrator.handle_chat_message(text, voice_file_id).await;
    Ok(())
}

async fn on_callback(bot: Bot, state: Arc<BotState>, query: CallbackQuery) -> ResponseResult<()> {
    // Acknowledge the press so the client stops its spinner.
    let _ = bot.answer_callback_query(query.id.clone()).await;

    let Some(data) = query.data.as_deref() else {
        return Ok(());
    };

    // Approval buttons resolve the waiting caller directly.
    if state.approvals.resolve_callback(data) {
        return Ok(());
    }

    // Everything else becomes a user text message for the bound agent.
    let Some(chat_id) = query.message.as_ref().map(|m| m.chat().id) else {
        return Ok(());
    };
    let Some(orchestrator) = state.agent_for_chat(chat_id) else {
        return Ok(());
    };

    let text = if let Some(ticket) = data.strip_prefix("replyid:") {
        match state.tickets.resolve(ticket) {
            Some(text) => text,
            None => {
                warn!(ticket, "expired reply ticket");
                return Ok(());
            }
        }
    } else if let Some(encoded) = data.strip_prefix("reply:") {
        match urlencoding::decode(encoded) {
            Ok(text) => text.into_owned(),
            Err(_) => return Ok(()),
        }
    } else {
        data.to_string()
    };

    orchestrator.handle_chat_message(Some(text), None).await;
    Ok(())
}

/// Runs the long-polling dispatcher until shutdown.
pub async fn run_dispatcher(bot: Bot, state: Arc<BotState>) {
    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(on_message))
        .branch(Update::filter_callback_query().endpoint(on_callback));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tickets_resolve_once() {
        let tickets = ReplyTickets::new();
        let t = tickets.register("hello");
        assert_eq!(tickets.resolve(&t).as_deref(), Some("hello"));
        assert!(tickets.resolve(&t).is_none());
    }

    #[test]
    fn unknown_ticket_is_none() {
        let tickets = ReplyTickets::new();
        assert!(tickets.resolve("nope").is_none());
    }
}
