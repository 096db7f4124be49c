//! Entity types persisted by the store (one JSON file per entity).
//!
//! Every entity carries `id`, `created_at`, `updated_at`. The [`Entity`]
//! trait gives the store the kind subfolder name and timestamp access for the
//! monotonic update bump.

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::AgentMessage;
use crate::schedule::ScheduledTask;

/// Persisted entity contract. `KIND` names the subfolder under the
/// per-(user, agent) subtree.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {
    const KIND: &'static str;
    fn id(&self) -> &str;
    fn updated_at(&self) -> DateTime<Utc>;
    fn set_updated_at(&mut self, at: DateTime<Utc>);
}

macro_rules! impl_entity {
    ($ty:ty, $kind:literal) => {
        impl Entity for $ty {
            const KIND: &'static str = $kind;
            fn id(&self) -> &str {
                &self.id
            }
            fn updated_at(&self) -> DateTime<Utc> {
                self.updated_at
            }
            fn set_updated_at(&mut self, at: DateTime<Utc>) {
                self.updated_at = at;
            }
        }
    };
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Note {
    pub fn new(title: impl Into<String>, content: impl Into<String>, tags: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            content: content.into(),
            tags,
            created_at: now,
            updated_at: now,
        }
    }
}
impl_entity!(Note, "notes");

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListItem {
    pub text: String,
    #[serde(default)]
    pub done: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRecord {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub items: Vec<ListItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ListRecord {
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            items: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}
impl_entity!(ListRecord, "lists");

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub id: String,
    pub amount: f64,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub note: String,
    pub date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Expense {
    pub fn new(amount: f64, category: impl Into<String>, note: impl Into<String>, date: NaiveDate) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            amount,
            category: category.into(),
            note: note.into(),
            date,
            created_at: now,
            updated_at: now,
        }
    }
}
impl_entity!(Expense, "expenses");

/// Free-form working-memory line the agent maintains about the current
/// context (distinct from the persisted config memories).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkingMemoryEntry {
    pub id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkingMemoryEntry {
    pub fn new(content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            created_at: now,
            updated_at: now,
        }
    }
}
impl_entity!(WorkingMemoryEntry, "working_memory");

/// Persisted wrapper for a scheduled task.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRecord {
    pub id: String,
    pub task: ScheduledTask,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduleRecord {
    pub fn new(task: ScheduledTask) -> Self {
        let now = Utc::now();
        Self {
            id: task.id.clone(),
            task,
            created_at: now,
            updated_at: now,
        }
    }
}
impl_entity!(ScheduleRecord, "schedules");

/// One persisted conversation message.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationEntry {
    pub id: String,
    pub message: AgentMessage,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationEntry {
    pub fn new(message: AgentMessage) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            message,
            created_at: now,
            updated_at: now,
        }
    }
}
impl_entity!(ConversationEntry, "conversation");

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationReminder {
    pub id: String,
    pub label: String,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_m: f64,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
impl_entity!(LocationReminder, "location_reminders");

/// Snapshot taken before a destructive operation; `undo_last` restores it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoRecord {
    pub id: String,
    /// Entity kind the payload belongs to (e.g. `notes`).
    pub entity_kind: String,
    /// Human description of the undone action.
    pub action: String,
    /// Full serialized entity as it was before deletion.
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UndoRecord {
    pub fn new(entity_kind: impl Into<String>, action: impl Into<String>, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            entity_kind: entity_kind.into(),
            action: action.into(),
            payload,
            created_at: now,
            updated_at: now,
        }
    }
}
impl_entity!(UndoRecord, "undo");

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub mime: String,
    #[serde(default)]
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
impl_entity!(FileRecord, "files");

/// Outcome record for a scheduler-sourced execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReceipt {
    pub id: String,
    pub task_id: String,
    pub task_name: String,
    pub fired_at: DateTime<Utc>,
    pub ok: bool,
    #[serde(default)]
    pub detail: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionReceipt {
    pub fn new(task: &ScheduledTask, ok: bool, detail: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            task_id: task.id.clone(),
            task_name: task.name.clone(),
            fired_at: now,
            ok,
            detail: detail.into(),
            created_at: now,
            updated_at: now,
        }
    }
}
impl_entity!(ExecutionReceipt, "receipts");
