//! Always-on key-value table (rusqlite).
//!
//! Stores the full serialized [`AgentConfig`](crate::agent::AgentConfig) for
//! auto-redeploy at process start. Keys use the prefix
//! `agent_always_on:<userId>:<agentId>`; values are valid JSON and non-empty
//! iff the agent is enabled.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StoreError;

/// Key prefix for always-on agent configs.
pub const ALWAYS_ON_PREFIX: &str = "agent_always_on:";

/// Builds the table key for a (user, agent) pair.
pub fn always_on_key(user_id: &str, agent_id: &str) -> String {
    format!("{ALWAYS_ON_PREFIX}{user_id}:{agent_id}")
}

/// SQLite-backed KV table. The connection is wrapped in a mutex; access
/// volume is tiny (deploy/undeploy and one scan at startup).
#[derive(Clone)]
pub struct AlwaysOnTable {
    conn: Arc<Mutex<Connection>>,
}

impl AlwaysOnTable {
    pub fn open(path: PathBuf) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("always-on mutex poisoned");
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock().expect("always-on mutex poisoned");
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn delete(&self, key: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().expect("always-on mutex poisoned");
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    /// All `(key, value)` pairs whose key starts with `prefix`, key order.
    pub fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, StoreError> {
        let conn = self.conn.lock().expect("always-on mutex poisoned");
        let pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
        let mut stmt = conn.prepare(
            "SELECT key, value FROM kv WHERE key LIKE ?1 ESCAPE '\\' ORDER BY key",
        )?;
        let rows = stmt.query_map(params![pattern], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> (tempfile::TempDir, AlwaysOnTable) {
        let dir = tempfile::tempdir().unwrap();
        let t = AlwaysOnTable::open(dir.path().join("always_on.db")).unwrap();
        (dir, t)
    }

    #[test]
    fn set_get_delete() {
        let (_d, t) = table();
        let key = always_on_key("u1", "a1");
        t.set(&key, r#"{"id":"a1"}"#).unwrap();
        assert_eq!(t.get(&key).unwrap().as_deref(), Some(r#"{"id":"a1"}"#));
        t.delete(&key).unwrap();
        assert!(t.get(&key).unwrap().is_none());
    }

    #[test]
    fn set_overwrites() {
        let (_d, t) = table();
        t.set("k", "one").unwrap();
        t.set("k", "two").unwrap();
        assert_eq!(t.get("k").unwrap().as_deref(), Some("two"));
    }

    #[test]
    fn list_prefix_scans_only_matching() {
        let (_d, t) = table();
        t.set(&always_on_key("u1", "a1"), "{}").unwrap();
        t.set(&always_on_key("u1", "a2"), "{}").unwrap();
        t.set("other:key", "{}").unwrap();
        let all = t.list_prefix(ALWAYS_ON_PREFIX).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|(k, _)| k.starts_with(ALWAYS_ON_PREFIX)));
    }
}
