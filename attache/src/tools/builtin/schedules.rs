//! Reminder and schedule tools. These mutate both the live scheduler and the
//! persisted schedule records so a redeploy restores them.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use super::parse_args;
use crate::error::ToolErrorKind;
use crate::schedule::{preparse_natural, reminder_instruction, CronExpr, ScheduledTask};
use crate::store::ScheduleRecord;
use crate::tools::{Tool, ToolContext, ToolOutcome, ToolSpec};

async fn persist_task(ctx: &ToolContext, task: &ScheduledTask) -> Result<(), String> {
    let mut record = ScheduleRecord::new(task.clone());
    ctx.scope.put(&mut record).map_err(|e| e.to_string())
}

async fn install_task(ctx: &ToolContext, task: ScheduledTask) -> Result<(), String> {
    let agent_id = ctx.agent_id().await;
    persist_task(ctx, &task).await?;
    ctx.scheduler.add_task(&agent_id, task).await;
    Ok(())
}

pub struct SetReminder;

#[derive(Deserialize)]
struct SetReminderArgs {
    #[serde(default)]
    name: Option<String>,
    message: String,
    /// RFC 3339 instant, e.g. `2025-06-01T14:00:00Z`.
    #[serde(default)]
    trigger_at: Option<String>,
    /// Alternative to `trigger_at`.
    #[serde(default)]
    in_minutes: Option<i64>,
}

#[async_trait]
impl Tool for SetReminder {
    fn name(&self) -> &str {
        "set_reminder"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "set_reminder".into(),
            description:
                "Set a one-shot reminder delivered as a chat message at the given time.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                    "message": {"type": "string"},
                    "trigger_at": {"type": "string", "description": "RFC 3339 timestamp"},
                    "in_minutes": {"type": "integer"}
                },
                "required": ["message"]
            }),
            rarely_used: false,
        }
    }

    async fn call(&self, params: Value, ctx: &ToolContext) -> ToolOutcome {
        let args = parse_args!(SetReminderArgs, params);
        let trigger_at: DateTime<Utc> = match (&args.trigger_at, args.in_minutes) {
            (Some(ts), _) => match DateTime::parse_from_rfc3339(ts) {
                Ok(t) => t.with_timezone(&Utc),
                Err(_) => {
                    return ToolOutcome::fail(
                        ToolErrorKind::InvalidArgs,
                        format!("bad trigger_at `{ts}` (expected RFC 3339)"),
                    )
                }
            },
            (None, Some(mins)) if mins > 0 => Utc::now() + Duration::minutes(mins),
            _ => {
                return ToolOutcome::fail(
                    ToolErrorKind::InvalidArgs,
                    "need trigger_at or a positive in_minutes",
                )
            }
        };

        let name = args.name.unwrap_or_else(|| args.message.clone());
        let mut task =
            ScheduledTask::one_shot_at(name, trigger_at, reminder_instruction(&args.message));
        task.timezone = ctx.config.read().await.timezone.clone();

        match install_task(ctx, task.clone()).await {
            Ok(()) => ToolOutcome::ok(format!(
                "Reminder `{}` set for {} (id {}).",
                task.name,
                trigger_at.to_rfc3339(),
                task.id
            )),
            Err(e) => ToolOutcome::fail(ToolErrorKind::Failed, e),
        }
    }
}

pub struct AddSchedule;

#[derive(Deserialize)]
struct AddScheduleArgs {
    name: String,
    /// Cron or natural language ("every day at 14:00").
    cron: String,
    instruction: String,
    #[serde(default)]
    one_shot: bool,
}

#[async_trait]
impl Tool for AddSchedule {
    fn name(&self) -> &str {
        "add_schedule"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "add_schedule".into(),
            description:
                "Create a recurring task from a cron expression or simple natural language."
                    .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                    "cron": {"type": "string"},
                    "instruction": {"type": "string"},
                    "one_shot": {"type": "boolean"}
                },
                "required": ["name", "cron", "instruction"]
            }),
            rarely_used: false,
        }
    }

    async fn call(&self, params: Value, ctx: &ToolContext) -> ToolOutcome {
        let args = parse_args!(AddScheduleArgs, params);
        let cron = preparse_natural(&args.cron);
        let valid = CronExpr::parse(&cron).is_ok();
        if !valid {
            tracing::warn!(expr = %cron, "schedule stored with invalid cron; it will never fire");
        }

        let mut task = ScheduledTask::recurring(args.name, cron.clone(), args.instruction);
        task.one_shot = args.one_shot;
        task.timezone = ctx.config.read().await.timezone.clone();

        match install_task(ctx, task.clone()).await {
            Ok(()) if valid => {
                ToolOutcome::ok(format!("Schedule `{}` added as `{cron}` (id {}).", task.name, task.id))
            }
            // Pass-through semantics: store it, but tell the model the
            // expression did not validate so it can correct the user.
            Ok(()) => ToolOutcome::ok(format!(
                "Schedule `{}` stored, but `{cron}` is not a valid cron expression and will never fire. \
                 Ask the user to rephrase the timing.",
                task.name
            )),
            Err(e) => ToolOutcome::fail(ToolErrorKind::Failed, e),
        }
    }
}

pub struct RemoveSchedule;

#[derive(Deserialize)]
struct RemoveScheduleArgs {
    id: String,
}

#[async_trait]
impl Tool for RemoveSchedule {
    fn name(&self) -> &str {
        "remove_schedule"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "remove_schedule".into(),
            description: "Delete a scheduled task by id.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {"id": {"type": "string"}},
                "required": ["id"]
            }),
            rarely_used: false,
        }
    }

    async fn call(&self, params: Value, ctx: &ToolContext) -> ToolOutcome {
        let args = parse_args!(RemoveScheduleArgs, params);
        let agent_id = ctx.agent_id().await;
        if let Err(e) = ctx.scope.delete::<ScheduleRecord>(&args.id) {
            return ToolOutcome::fail(ToolErrorKind::Failed, e.to_string());
        }
        match ctx.scheduler.remove_task(&agent_id, &args.id).await {
            Ok(()) => ToolOutcome::ok(format!("Schedule {} removed.", args.id)),
            Err(e) => ToolOutcome::fail(ToolErrorKind::Failed, e.to_string()),
        }
    }
}

pub struct ToggleSchedule;

#[derive(Deserialize)]
struct ToggleScheduleArgs {
    id: String,
    enabled: bool,
}

#[async_trait]
impl Tool for ToggleSchedule {
    fn name(&self) -> &str {
        "toggle_schedule"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "toggle_schedule".into(),
            description: "Enable or disable a scheduled task.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "id": {"type": "string"},
                    "enabled": {"type": "boolean"}
                },
                "required": ["id", "enabled"]
            }),
            rarely_used: true,
        }
    }

    async fn call(&self, params: Value, ctx: &ToolContext) -> ToolOutcome {
        let args = parse_args!(ToggleScheduleArgs, params);
        let agent_id = ctx.agent_id().await;
        if let Err(e) = ctx.scheduler.toggle_task(&agent_id, &args.id, args.enabled).await {
            return ToolOutcome::fail(ToolErrorKind::Failed, e.to_string());
        }
        // Mirror the flag into the persisted record.
        if let Ok(Some(mut record)) = ctx.scope.get::<ScheduleRecord>(&args.id) {
            record.task.enabled = args.enabled;
            let _ = ctx.scope.put(&mut record);
        }
        ToolOutcome::ok(format!(
            "Schedule {} {}.",
            args.id,
            if args.enabled { "enabled" } else { "disabled" }
        ))
    }
}

pub struct ListSchedules;

#[async_trait]
impl Tool for ListSchedules {
    fn name(&self) -> &str {
        "list_schedules"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "list_schedules".into(),
            description: "Show the agent's scheduled tasks.".into(),
            input_schema: json!({"type": "object", "properties": {}}),
            rarely_used: false,
        }
    }

    fn parallel_safe(&self) -> bool {
        true
    }

    async fn call(&self, _params: Value, ctx: &ToolContext) -> ToolOutcome {
        let agent_id = ctx.agent_id().await;
        let tasks = ctx.scheduler.list_tasks(&agent_id).await;
        if tasks.is_empty() {
            return ToolOutcome::ok("No scheduled tasks.");
        }
        ToolOutcome::ok(
            tasks
                .iter()
                .map(|t| {
                    let when = t
                        .trigger_at
                        .map(|at| at.to_rfc3339())
                        .unwrap_or_else(|| t.cron.clone());
                    format!(
                        "- [{}] {} — {} ({})",
                        t.id,
                        t.name,
                        when,
                        if t.enabled { "on" } else { "off" }
                    )
                })
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }
}
