//! Persistence store: per-(user, agent) CRUD over JSON entity files.
//!
//! Layout: `<root>/<user_id>/<agent_id>/<kind>/<id>.json`. Writes are
//! write-then-rename so an entity either appears fully or not at all; a
//! corrupt file is reported as missing and the rest of the store stays
//! readable. The always-on table (rusqlite) lives next to the tree in
//! `<root>/always_on.db`.

mod always_on;
mod entity;
mod search;

pub use always_on::{always_on_key, AlwaysOnTable, ALWAYS_ON_PREFIX};
pub use entity::{
    ConversationEntry, Entity, ExecutionReceipt, Expense, FileRecord, ListItem, ListRecord,
    LocationReminder, Note, ScheduleRecord, UndoRecord, WorkingMemoryEntry,
};
pub use search::{NoteHit, CONVERSATION_SCAN_DEFAULT};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::warn;

use crate::error::StoreError;
use crate::message::AgentMessage;

/// Root store handle. Cheap to clone; scope to a (user, agent) pair with
/// [`Store::scope`].
#[derive(Clone)]
pub struct Store {
    root: Arc<PathBuf>,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Arc::new(root.into()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn scope(&self, user_id: &str, agent_id: &str) -> StoreScope {
        StoreScope {
            root: Arc::clone(&self.root),
            user_id: sanitize(user_id),
            agent_id: sanitize(agent_id),
        }
    }

    /// Opens the always-on key-value table (created on first use).
    pub fn always_on(&self) -> Result<AlwaysOnTable, StoreError> {
        AlwaysOnTable::open(self.root.join("always_on.db"))
    }
}

/// CRUD surface bound to one (user, agent) subtree.
#[derive(Clone)]
pub struct StoreScope {
    root: Arc<PathBuf>,
    user_id: String,
    agent_id: String,
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl StoreScope {
    fn kind_dir(&self, kind: &str) -> PathBuf {
        self.root
            .join(&self.user_id)
            .join(&self.agent_id)
            .join(kind)
    }

    fn entity_path(&self, kind: &str, id: &str) -> PathBuf {
        self.kind_dir(kind).join(format!("{}.json", sanitize(id)))
    }

    /// Writes an entity, bumping `updated_at` monotonically: if the clock has
    /// not advanced past the entity's prior `updated_at`, the new stamp is
    /// prior + 1 ms.
    pub fn put<T: Entity>(&self, entity: &mut T) -> Result<(), StoreError> {
        let now = Utc::now();
        let prior = entity.updated_at();
        let stamp = if now > prior {
            now
        } else {
            prior + Duration::milliseconds(1)
        };
        entity.set_updated_at(stamp);

        let dir = self.kind_dir(T::KIND);
        std::fs::create_dir_all(&dir)?;
        let path = self.entity_path(T::KIND, entity.id());
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(entity)?;
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Loads an entity; a missing or corrupt file yields `Ok(None)`.
    pub fn get<T: Entity>(&self, id: &str) -> Result<Option<T>, StoreError> {
        let path = self.entity_path(T::KIND, id);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice(&bytes) {
            Ok(v) => Ok(Some(v)),
            Err(e) => {
                warn!(kind = T::KIND, id, error = %e, "corrupt entity file, treating as missing");
                Ok(None)
            }
        }
    }

    /// Removes an entity file; returns whether it existed.
    pub fn delete<T: Entity>(&self, id: &str) -> Result<bool, StoreError> {
        let path = self.entity_path(T::KIND, id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Lists every readable entity of a kind, oldest update first. Corrupt
    /// files are skipped with a warning.
    pub fn list<T: Entity>(&self) -> Result<Vec<T>, StoreError> {
        let dir = self.kind_dir(T::KIND);
        let entries = match std::fs::read_dir(&dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut out: Vec<T> = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read(&path).map(|b| serde_json::from_slice::<T>(&b)) {
                Ok(Ok(v)) => out.push(v),
                Ok(Err(e)) => {
                    warn!(kind = T::KIND, path = %path.display(), error = %e, "skipping corrupt entity file");
                }
                Err(e) => {
                    warn!(kind = T::KIND, path = %path.display(), error = %e, "skipping unreadable entity file");
                }
            }
        }
        out.sort_by_key(|e| e.updated_at());
        Ok(out)
    }

    /// Appends one message to the persistent conversation log.
    pub fn append_message(&self, message: &AgentMessage) -> Result<(), StoreError> {
        let mut entry = ConversationEntry::new(message.clone());
        self.put(&mut entry)
    }

    /// Returns the most recent `n` conversation messages, chronological.
    pub fn recent_messages(&self, n: usize) -> Result<Vec<AgentMessage>, StoreError> {
        let mut entries = self.list::<ConversationEntry>()?;
        entries.sort_by_key(|e| e.message.timestamp);
        let skip = entries.len().saturating_sub(n);
        Ok(entries.into_iter().skip(skip).map(|e| e.message).collect())
    }

    /// Keyword-ranked note search (see `search` module for the scoring).
    pub fn search_notes(&self, query: &str) -> Result<Vec<NoteHit>, StoreError> {
        let notes = self.list::<Note>()?;
        Ok(search::rank_notes(&notes, query, Utc::now()))
    }

    /// Keyword search over the recent conversation window; returns the top
    /// `limit` matches in chronological order.
    pub fn search_conversation(
        &self,
        query: &str,
        scan: usize,
        limit: usize,
    ) -> Result<Vec<AgentMessage>, StoreError> {
        let recent = self.recent_messages(scan)?;
        Ok(search::rank_conversation(&recent, query, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;

    fn scope() -> (tempfile::TempDir, StoreScope) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        let scope = store.scope("u1", "a1");
        (dir, scope)
    }

    #[test]
    fn put_get_round_trip() {
        let (_d, s) = scope();
        let mut note = Note::new("Groceries", "milk, eggs", vec!["food".into()]);
        let id = note.id.clone();
        s.put(&mut note).unwrap();

        let loaded: Note = s.get(&id).unwrap().unwrap();
        assert_eq!(loaded.title, "Groceries");
        assert_eq!(loaded.tags, vec!["food".to_string()]);
    }

    #[test]
    fn updated_at_is_monotonic() {
        let (_d, s) = scope();
        let mut note = Note::new("t", "c", vec![]);
        s.put(&mut note).unwrap();
        let first = note.updated_at;
        // Immediate second write: stamp must strictly advance even if the
        // clock has not.
        s.put(&mut note).unwrap();
        assert!(note.updated_at > first);
    }

    #[test]
    fn corrupt_file_is_missing_but_others_survive() {
        let (_d, s) = scope();
        let mut good = Note::new("good", "c", vec![]);
        s.put(&mut good).unwrap();

        let bad_path = s.entity_path("notes", "bad");
        std::fs::write(&bad_path, b"{ not json").unwrap();

        assert!(s.get::<Note>("bad").unwrap().is_none());
        let all = s.list::<Note>().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].title, "good");
    }

    #[test]
    fn delete_reports_existence() {
        let (_d, s) = scope();
        let mut note = Note::new("t", "c", vec![]);
        let id = note.id.clone();
        s.put(&mut note).unwrap();
        assert!(s.delete::<Note>(&id).unwrap());
        assert!(!s.delete::<Note>(&id).unwrap());
    }

    #[test]
    fn conversation_log_round_trip() {
        let (_d, s) = scope();
        s.append_message(&AgentMessage::user("hola")).unwrap();
        s.append_message(&AgentMessage::assistant("¿qué tal?")).unwrap();
        let msgs = s.recent_messages(10).unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, Role::User);
    }

    #[test]
    fn every_entity_kind_round_trips() {
        let (_d, s) = scope();
        let now = chrono::Utc::now();
        let mut reminder = LocationReminder {
            id: "loc1".into(),
            label: "home".into(),
            latitude: 40.4,
            longitude: -3.7,
            radius_m: 100.0,
            message: "water the plants".into(),
            created_at: now,
            updated_at: now,
        };
        s.put(&mut reminder).unwrap();
        let mut file = FileRecord {
            id: "f1".into(),
            name: "voice.ogg".into(),
            path: "/files/voice.ogg".into(),
            mime: "audio/ogg".into(),
            size: 1234,
            created_at: now,
            updated_at: now,
        };
        s.put(&mut file).unwrap();

        assert!(s.get::<LocationReminder>("loc1").unwrap().is_some());
        assert_eq!(s.get::<FileRecord>("f1").unwrap().unwrap().size, 1234);
    }

    #[test]
    fn scopes_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        let a = store.scope("u1", "a1");
        let b = store.scope("u1", "a2");
        let mut note = Note::new("only-a", "c", vec![]);
        a.put(&mut note).unwrap();
        assert!(b.list::<Note>().unwrap().is_empty());
    }
}
