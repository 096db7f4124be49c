//! Working-memory tools: free-form context lines the agent maintains.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::parse_args;
use crate::error::ToolErrorKind;
use crate::store::WorkingMemoryEntry;
use crate::tools::{Tool, ToolContext, ToolOutcome, ToolSpec};

pub struct Remember;

#[derive(Deserialize)]
struct RememberArgs {
    content: String,
}

#[async_trait]
impl Tool for Remember {
    fn name(&self) -> &str {
        "remember"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "remember".into(),
            description: "Save a fact to working memory for later turns.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {"content": {"type": "string"}},
                "required": ["content"]
            }),
            rarely_used: false,
        }
    }

    async fn call(&self, params: Value, ctx: &ToolContext) -> ToolOutcome {
        let args = parse_args!(RememberArgs, params);
        let content = args.content.trim();
        if content.is_empty() {
            return ToolOutcome::fail(ToolErrorKind::InvalidArgs, "nothing to remember");
        }
        let mut entry = WorkingMemoryEntry::new(content);
        match ctx.scope.put(&mut entry) {
            Ok(()) => ToolOutcome::ok(format!("Remembered (id {}).", entry.id)),
            Err(e) => ToolOutcome::fail(ToolErrorKind::Failed, e.to_string()),
        }
    }
}

pub struct Forget;

#[derive(Deserialize)]
struct ForgetArgs {
    /// Entry id, or a text fragment matched against contents.
    target: String,
}

#[async_trait]
impl Tool for Forget {
    fn name(&self) -> &str {
        "forget"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "forget".into(),
            description: "Delete a working-memory entry by id or matching text.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {"target": {"type": "string"}},
                "required": ["target"]
            }),
            rarely_used: false,
        }
    }

    async fn call(&self, params: Value, ctx: &ToolContext) -> ToolOutcome {
        let args = parse_args!(ForgetArgs, params);
        // Try as id first.
        match ctx.scope.delete::<WorkingMemoryEntry>(&args.target) {
            Ok(true) => return ToolOutcome::ok("Forgotten."),
            Ok(false) => {}
            Err(e) => return ToolOutcome::fail(ToolErrorKind::Failed, e.to_string()),
        }
        let needle = args.target.to_lowercase();
        let entries = match ctx.scope.list::<WorkingMemoryEntry>() {
            Ok(e) => e,
            Err(e) => return ToolOutcome::fail(ToolErrorKind::Failed, e.to_string()),
        };
        match entries
            .iter()
            .find(|e| e.content.to_lowercase().contains(&needle))
        {
            Some(entry) => match ctx.scope.delete::<WorkingMemoryEntry>(&entry.id) {
                Ok(_) => ToolOutcome::ok(format!("Forgot: {}", entry.content)),
                Err(e) => ToolOutcome::fail(ToolErrorKind::Failed, e.to_string()),
            },
            None => ToolOutcome::fail(
                ToolErrorKind::Failed,
                format!("nothing in working memory matches `{}`", args.target),
            ),
        }
    }
}

pub struct ListWorkingMemory;

#[async_trait]
impl Tool for ListWorkingMemory {
    fn name(&self) -> &str {
        "list_working_memory"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "list_working_memory".into(),
            description: "Show all working-memory entries.".into(),
            input_schema: json!({"type": "object", "properties": {}}),
            rarely_used: true,
        }
    }

    fn parallel_safe(&self) -> bool {
        true
    }

    async fn call(&self, _params: Value, ctx: &ToolContext) -> ToolOutcome {
        match ctx.scope.list::<WorkingMemoryEntry>() {
            Ok(entries) if entries.is_empty() => ToolOutcome::ok("Working memory is empty."),
            Ok(entries) => ToolOutcome::ok(
                entries
                    .iter()
                    .map(|e| format!("- [{}] {}", e.id, e.content))
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
            Err(e) => ToolOutcome::fail(ToolErrorKind::Failed, e.to_string()),
        }
    }
}
