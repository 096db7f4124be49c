//! Process-wide scheduler: one 30-second ticker evaluating every agent's
//! tasks in insertion order.
//!
//! The scheduler never references orchestrators directly. Due tasks are
//! delivered through a [`TriggerSink`], which in practice is the running-agent
//! registry (`orchestrator::AgentRegistry`) — the indirection that breaks the
//! scheduler ↔ orchestrator cycle.

mod cron;
mod task;

pub use cron::{preparse_natural, CronExpr, CronParseError};
pub use task::{parse_reminder, reminder_instruction, ScheduledTask, REMINDER_PREFIX};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone, Utc};
use chrono_tz::Tz;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ScheduleError;

/// Tick period.
const TICK_INTERVAL: Duration = Duration::from_secs(30);
/// Minimum spacing between two fires of the same task.
const FIRE_DEDUP: chrono::Duration = chrono::Duration::seconds(60);

/// Receiver of due tasks. `one_shot_fired` runs after `enabled` has been
/// cleared so the implementation can persist the disabled state.
#[async_trait]
pub trait TriggerSink: Send + Sync {
    async fn task_due(&self, agent_id: &str, task: ScheduledTask);
    async fn one_shot_fired(&self, agent_id: &str, task: ScheduledTask);
}

struct AgentTasks {
    agent_id: String,
    tasks: Vec<ScheduledTask>,
}

/// Process-wide scheduler. Construct once, `start` with the sink, then add
/// and remove per-agent task lists as agents deploy and stop.
pub struct Scheduler {
    agents: Mutex<Vec<AgentTasks>>,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            agents: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        })
    }

    /// Spawns the ticker. Due handlers run sequentially within one tick.
    pub fn start(self: &Arc<Self>, sink: Arc<dyn TriggerSink>) -> tokio::task::JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = scheduler.cancel.cancelled() => break,
                    _ = interval.tick() => {
                        scheduler.tick(Utc::now(), sink.as_ref()).await;
                    }
                }
            }
        })
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Replaces the task list for an agent (registering it if new). Insertion
    /// order of agents and of tasks within an agent is preserved.
    pub async fn set_tasks(&self, agent_id: &str, tasks: Vec<ScheduledTask>) {
        let mut agents = self.agents.lock().await;
        match agents.iter_mut().find(|a| a.agent_id == agent_id) {
            Some(a) => a.tasks = tasks,
            None => agents.push(AgentTasks {
                agent_id: agent_id.to_string(),
                tasks,
            }),
        }
    }

    pub async fn add_task(&self, agent_id: &str, task: ScheduledTask) {
        let mut agents = self.agents.lock().await;
        match agents.iter_mut().find(|a| a.agent_id == agent_id) {
            Some(a) => a.tasks.push(task),
            None => agents.push(AgentTasks {
                agent_id: agent_id.to_string(),
                tasks: vec![task],
            }),
        }
    }

    pub async fn remove_task(&self, agent_id: &str, task_id: &str) -> Result<(), ScheduleError> {
        let mut agents = self.agents.lock().await;
        let Some(a) = agents.iter_mut().find(|a| a.agent_id == agent_id) else {
            return Err(ScheduleError::TaskNotFound(task_id.to_string()));
        };
        let before = a.tasks.len();
        a.tasks.retain(|t| t.id != task_id);
        if a.tasks.len() == before {
            return Err(ScheduleError::TaskNotFound(task_id.to_string()));
        }
        Ok(())
    }

    pub async fn toggle_task(
        &self,
        agent_id: &str,
        task_id: &str,
        enabled: bool,
    ) -> Result<(), ScheduleError> {
        let mut agents = self.agents.lock().await;
        let task = agents
            .iter_mut()
            .find(|a| a.agent_id == agent_id)
            .and_then(|a| a.tasks.iter_mut().find(|t| t.id == task_id))
            .ok_or_else(|| ScheduleError::TaskNotFound(task_id.to_string()))?;
        task.enabled = enabled;
        Ok(())
    }

    pub async fn list_tasks(&self, agent_id: &str) -> Vec<ScheduledTask> {
        let agents = self.agents.lock().await;
        agents
            .iter()
            .find(|a| a.agent_id == agent_id)
            .map(|a| a.tasks.clone())
            .unwrap_or_default()
    }

    /// Drops the agent's tasks entirely (agent stop).
    pub async fn remove_agent(&self, agent_id: &str) {
        let mut agents = self.agents.lock().await;
        agents.retain(|a| a.agent_id != agent_id);
    }

    /// One evaluation pass. Public for tests; the ticker calls it every 30 s.
    pub async fn tick(&self, now: DateTime<Utc>, sink: &dyn TriggerSink) {
        // Collect fires under the lock, run handlers after releasing it so a
        // slow handler cannot block task mutation from tools.
        let mut fires: Vec<(String, ScheduledTask, bool)> = Vec::new();
        {
            let mut agents = self.agents.lock().await;
            for agent in agents.iter_mut() {
                for t in agent.tasks.iter_mut() {
                    if !t.enabled {
                        continue;
                    }
                    if let Some(start) = t.start_at {
                        if now < start {
                            continue;
                        }
                    }
                    if let Some(last) = t.last_run {
                        if now - last < FIRE_DEDUP {
                            continue;
                        }
                    }
                    let due = match t.trigger_at {
                        Some(at) => now >= at,
                        None => cron_due(t, now),
                    };
                    if !due {
                        continue;
                    }
                    t.last_run = Some(now);
                    let one_shot = t.one_shot || t.trigger_at.is_some();
                    if one_shot {
                        t.enabled = false;
                    }
                    debug!(task = %t.name, agent = %agent.agent_id, one_shot, "task due");
                    fires.push((agent.agent_id.clone(), t.clone(), one_shot));
                }
            }
        }
        for (agent_id, task, one_shot) in fires {
            sink.task_due(&agent_id, task.clone()).await;
            if one_shot {
                sink.one_shot_fired(&agent_id, task).await;
            }
        }
    }
}

/// Cron evaluation in the task's timezone; invalid labels fall back to the
/// server's local time. Invalid expressions never fire (and never error).
fn cron_due(task: &ScheduledTask, now: DateTime<Utc>) -> bool {
    let expr = match CronExpr::parse(&task.cron) {
        Ok(e) => e,
        Err(_) => return false,
    };
    match task.timezone.as_deref().and_then(|l| l.parse::<Tz>().ok()) {
        Some(tz) => expr.matches(&now.with_timezone(&tz)),
        None => {
            if task.timezone.is_some() {
                warn!(task = %task.name, tz = ?task.timezone, "invalid timezone label, using local time");
            }
            expr.matches(&Local.from_utc_datetime(&now.naive_utc()))
        }
    }
}
