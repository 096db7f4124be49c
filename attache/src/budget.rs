//! Daily budget ledger and override grants.
//!
//! Costs accumulate per (agent, calendar day); the day boundary is computed
//! in the agent's timezone when the label parses, else server local — the
//! same degradation rule the scheduler uses. An override grant waives the
//! gate for the remainder of the grant's calendar day.
//!
//! The ledger is consulted *before every LLM call within a turn* (see
//! `engine`), not only at turn start, so runaway tool loops cannot spend past
//! the cap by more than one call.

use chrono::{DateTime, Local, NaiveDate, Utc};
use chrono_tz::Tz;
use dashmap::DashMap;
use tracing::debug;

use crate::store::AlwaysOnTable;

const LEDGER_KEY_PREFIX: &str = "budget_day:";

/// Resolves "today" for an agent: timezone label when valid, local otherwise.
pub fn today_for(tz_label: Option<&str>, now: DateTime<Utc>) -> NaiveDate {
    match tz_label.and_then(|l| l.parse::<Tz>().ok()) {
        Some(tz) => now.with_timezone(&tz).date_naive(),
        None => now.with_timezone(&Local).date_naive(),
    }
}

/// Process-wide cost ledger + override map.
///
/// Daily totals are mirrored into the always-on table (when provided) so a
/// restart cannot reset an exhausted budget.
#[derive(Default)]
pub struct BudgetTracker {
    /// (agent_id, day) → USD spent.
    spent: DashMap<(String, NaiveDate), f64>,
    /// agent_id → override grant instant.
    overrides: DashMap<String, DateTime<Utc>>,
    table: Option<AlwaysOnTable>,
}

impl BudgetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger persisted through the always-on table.
    pub fn with_table(table: AlwaysOnTable) -> Self {
        Self {
            table: Some(table),
            ..Self::default()
        }
    }

    fn ledger_key(agent_id: &str, day: NaiveDate) -> String {
        format!("{LEDGER_KEY_PREFIX}{agent_id}:{day}")
    }

    /// Adds cost for the agent's current day and returns the new total.
    pub fn record_cost(&self, agent_id: &str, tz_label: Option<&str>, cost_usd: f64) -> f64 {
        let day = today_for(tz_label, Utc::now());
        let key = (agent_id.to_string(), day);
        let mut entry = self.spent.entry(key).or_insert_with(|| {
            // First touch today: pick up any persisted total from a prior run.
            self.load_persisted(agent_id, day).unwrap_or(0.0)
        });
        *entry += cost_usd;
        let total = *entry;
        drop(entry);
        if let Some(table) = &self.table {
            let _ = table.set(&Self::ledger_key(agent_id, day), &total.to_string());
        }
        debug!(agent = agent_id, cost_usd, total, "budget cost recorded");
        total
    }

    fn load_persisted(&self, agent_id: &str, day: NaiveDate) -> Option<f64> {
        let table = self.table.as_ref()?;
        table
            .get(&Self::ledger_key(agent_id, day))
            .ok()
            .flatten()
            .and_then(|v| v.parse().ok())
    }

    /// USD spent by the agent today.
    pub fn spent_today(&self, agent_id: &str, tz_label: Option<&str>) -> f64 {
        let day = today_for(tz_label, Utc::now());
        self.spent
            .get(&(agent_id.to_string(), day))
            .map(|v| *v)
            .or_else(|| self.load_persisted(agent_id, day))
            .unwrap_or(0.0)
    }

    /// True when a cap is set, reached, and not overridden.
    pub fn is_exhausted(
        &self,
        agent_id: &str,
        tz_label: Option<&str>,
        daily_limit_usd: Option<f64>,
    ) -> bool {
        let Some(limit) = daily_limit_usd else {
            return false;
        };
        if self.has_override(agent_id, tz_label) {
            return false;
        }
        self.spent_today(agent_id, tz_label) >= limit
    }

    /// Grants an override valid for the rest of the agent's current day.
    pub fn grant_override(&self, agent_id: &str) {
        self.overrides.insert(agent_id.to_string(), Utc::now());
    }

    /// An override is active iff granted on the agent's current calendar day.
    pub fn has_override(&self, agent_id: &str, tz_label: Option<&str>) -> bool {
        match self.overrides.get(agent_id) {
            Some(granted) => {
                today_for(tz_label, *granted) == today_for(tz_label, Utc::now())
            }
            None => false,
        }
    }

    /// Diagnostics: (agent, day, spent) triples currently in memory.
    pub fn snapshot(&self) -> Vec<(String, NaiveDate, f64)> {
        self.spent
            .iter()
            .map(|e| (e.key().0.clone(), e.key().1, *e.value()))
            .collect()
    }
}

/// Computes call cost in USD from token counts and per-1k prices.
pub fn cost_usd(prompt_tokens: u32, completion_tokens: u32, input_per_1k: f64, output_per_1k: f64) -> f64 {
    prompt_tokens as f64 / 1_000.0 * input_per_1k
        + completion_tokens as f64 / 1_000.0 * output_per_1k
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_and_gates() {
        let t = BudgetTracker::new();
        assert!(!t.is_exhausted("a", None, Some(1.0)));
        t.record_cost("a", None, 0.6);
        assert!(!t.is_exhausted("a", None, Some(1.0)));
        t.record_cost("a", None, 0.5);
        assert!(t.is_exhausted("a", None, Some(1.0)));
        assert!(!t.is_exhausted("a", None, None));
    }

    #[test]
    fn override_waives_gate_same_day() {
        let t = BudgetTracker::new();
        t.record_cost("a", None, 5.0);
        assert!(t.is_exhausted("a", None, Some(1.0)));
        t.grant_override("a");
        assert!(!t.is_exhausted("a", None, Some(1.0)));
    }

    #[test]
    fn agents_are_independent() {
        let t = BudgetTracker::new();
        t.record_cost("a", None, 9.0);
        assert!(t.is_exhausted("a", None, Some(1.0)));
        assert!(!t.is_exhausted("b", None, Some(1.0)));
    }

    #[test]
    fn ledger_survives_restart_via_table() {
        let dir = tempfile::tempdir().unwrap();
        let table = AlwaysOnTable::open(dir.path().join("t.db")).unwrap();
        {
            let t = BudgetTracker::with_table(table.clone());
            t.record_cost("a", None, 2.0);
        }
        let t2 = BudgetTracker::with_table(table);
        assert!(t2.spent_today("a", None) >= 2.0);
    }

    #[test]
    fn cost_formula() {
        let c = cost_usd(1_000, 1_000, 0.0025, 0.01);
        assert!((c - 0.0125).abs() < 1e-9);
    }
}
