//! Per-agent message queue with the user-before-background ordering rule.
//!
//! The queue is always shaped `[user…, background…]`: a user entry is
//! inserted after every existing user entry and before any
//! scheduler/webhook entry; background entries append FIFO. Confirmations
//! therefore never starve behind an event backlog.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::schedule::ScheduledTask;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueSource {
    User,
    Scheduler,
    Webhook,
}

/// One queued inbound item.
#[derive(Clone, Debug)]
pub struct QueueEntry {
    pub text: String,
    pub source: QueueSource,
    pub channel: Option<String>,
    pub task: Option<ScheduledTask>,
}

impl QueueEntry {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: QueueSource::User,
            channel: None,
            task: None,
        }
    }

    pub fn scheduler(text: impl Into<String>, task: ScheduledTask) -> Self {
        Self {
            text: text.into(),
            source: QueueSource::Scheduler,
            channel: None,
            task: Some(task),
        }
    }

    pub fn webhook(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: QueueSource::Webhook,
            channel: None,
            task: None,
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }
}

/// Thread-safe queue; external writers enqueue concurrently, the
/// orchestrator loop is the only consumer.
#[derive(Default)]
pub struct MessageQueue {
    entries: Mutex<VecDeque<QueueEntry>>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: QueueEntry) {
        let mut entries = self.entries.lock().expect("queue mutex poisoned");
        match entry.source {
            QueueSource::User => {
                let insert_at = entries
                    .iter()
                    .take_while(|e| e.source == QueueSource::User)
                    .count();
                entries.insert(insert_at, entry);
            }
            QueueSource::Scheduler | QueueSource::Webhook => entries.push_back(entry),
        }
    }

    pub fn pop(&self) -> Option<QueueEntry> {
        self.entries.lock().expect("queue mutex poisoned").pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("queue mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: user entries dequeue in insertion order and always ahead
    /// of background entries enqueued before them.
    #[test]
    fn user_entries_jump_background_backlog() {
        let q = MessageQueue::new();
        q.push(QueueEntry::webhook("w1"));
        q.push(QueueEntry::webhook("w2"));
        q.push(QueueEntry::user("u1"));
        q.push(QueueEntry::webhook("w3"));
        q.push(QueueEntry::user("u2"));

        let order: Vec<String> = std::iter::from_fn(|| q.pop()).map(|e| e.text).collect();
        assert_eq!(order, vec!["u1", "u2", "w1", "w2", "w3"]);
    }

    #[test]
    fn background_is_fifo() {
        let q = MessageQueue::new();
        let task = ScheduledTask::recurring("t", "* * * * *", "x");
        q.push(QueueEntry::scheduler("s1", task.clone()));
        q.push(QueueEntry::webhook("w1"));
        q.push(QueueEntry::scheduler("s2", task));

        let order: Vec<String> = std::iter::from_fn(|| q.pop()).map(|e| e.text).collect();
        assert_eq!(order, vec!["s1", "w1", "s2"]);
    }

    #[test]
    fn user_order_is_stable_among_users() {
        let q = MessageQueue::new();
        q.push(QueueEntry::user("u1"));
        q.push(QueueEntry::user("u2"));
        q.push(QueueEntry::user("u3"));
        let order: Vec<String> = std::iter::from_fn(|| q.pop()).map(|e| e.text).collect();
        assert_eq!(order, vec!["u1", "u2", "u3"]);
    }
}
