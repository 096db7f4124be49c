//! Undo tool: restores the entity snapshotted by the most recent destructive
//! operation.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::ToolErrorKind;
use crate::store::{ListRecord, Note, UndoRecord};
use crate::tools::{Tool, ToolContext, ToolOutcome, ToolSpec};

pub struct UndoLast;

#[async_trait]
impl Tool for UndoLast {
    fn name(&self) -> &str {
        "undo_last"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "undo_last".into(),
            description: "Undo the most recent destructive operation (note/list deletion).".into(),
            input_schema: json!({"type": "object", "properties": {}}),
            rarely_used: true,
        }
    }

    async fn call(&self, _params: Value, ctx: &ToolContext) -> ToolOutcome {
        let records = match ctx.scope.list::<UndoRecord>() {
            Ok(r) => r,
            Err(e) => return ToolOutcome::fail(ToolErrorKind::Failed, e.to_string()),
        };
        let Some(last) = records.last().cloned() else {
            return ToolOutcome::ok("Nothing to undo.");
        };

        let restore = match last.entity_kind.as_str() {
            "notes" => serde_json::from_value::<Note>(last.payload.clone())
                .map_err(|e| e.to_string())
                .and_then(|mut note| ctx.scope.put(&mut note).map_err(|e| e.to_string())),
            "lists" => serde_json::from_value::<ListRecord>(last.payload.clone())
                .map_err(|e| e.to_string())
                .and_then(|mut list| ctx.scope.put(&mut list).map_err(|e| e.to_string())),
            other => Err(format!("cannot undo entity kind `{other}`")),
        };

        match restore {
            Ok(()) => {
                let _ = ctx.scope.delete::<UndoRecord>(&last.id);
                ToolOutcome::ok(format!("Undone: {}.", last.action))
            }
            Err(e) => ToolOutcome::fail(ToolErrorKind::Failed, e),
        }
    }
}
