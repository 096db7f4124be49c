//! Note CRUD tools.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::parse_args;
use crate::error::ToolErrorKind;
use crate::store::{Note, UndoRecord};
use crate::tools::{Tool, ToolContext, ToolOutcome, ToolSpec};

pub struct CreateNote;

#[derive(Deserialize)]
struct CreateNoteArgs {
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    tags: Vec<String>,
}

#[async_trait]
impl Tool for CreateNote {
    fn name(&self) -> &str {
        "create_note"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "create_note".into(),
            description: "Create a note with a title, content and optional tags.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "title": {"type": "string"},
                    "content": {"type": "string"},
                    "tags": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["title"]
            }),
            rarely_used: false,
        }
    }

    async fn call(&self, params: Value, ctx: &ToolContext) -> ToolOutcome {
        let args = parse_args!(CreateNoteArgs, params);
        let mut note = Note::new(args.title, args.content, args.tags);
        match ctx.scope.put(&mut note) {
            Ok(()) => ToolOutcome::ok(format!("Note created (id {}): {}", note.id, note.title)),
            Err(e) => ToolOutcome::fail(ToolErrorKind::Failed, e.to_string()),
        }
    }
}

pub struct GetNotes;

#[derive(Deserialize)]
struct GetNotesArgs {
    #[serde(default)]
    query: Option<String>,
}

#[async_trait]
impl Tool for GetNotes {
    fn name(&self) -> &str {
        "get_notes"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "get_notes".into(),
            description: "List notes, or search them by keyword with `query`.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {"query": {"type": "string"}}
            }),
            rarely_used: false,
        }
    }

    fn parallel_safe(&self) -> bool {
        true
    }

    async fn call(&self, params: Value, ctx: &ToolContext) -> ToolOutcome {
        let args = parse_args!(GetNotesArgs, params);
        let render = |notes: Vec<Note>| {
            if notes.is_empty() {
                "No notes found.".to_string()
            } else {
                notes
                    .iter()
                    .map(|n| format!("- [{}] {} — {}", n.id, n.title, summarize(&n.content)))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        };
        let result = match args.query.as_deref().filter(|q| !q.trim().is_empty()) {
            Some(query) => ctx
                .scope
                .search_notes(query)
                .map(|hits| hits.into_iter().map(|h| h.note).collect()),
            None => ctx.scope.list::<Note>(),
        };
        match result {
            Ok(notes) => ToolOutcome::ok(render(notes)),
            Err(e) => ToolOutcome::fail(ToolErrorKind::Failed, e.to_string()),
        }
    }
}

fn summarize(content: &str) -> String {
    let line = content.lines().next().unwrap_or_default();
    if line.chars().count() > 80 {
        format!("{}…", line.chars().take(80).collect::<String>())
    } else {
        line.to_string()
    }
}

pub struct UpdateNote;

#[derive(Deserialize)]
struct UpdateNoteArgs {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[async_trait]
impl Tool for UpdateNote {
    fn name(&self) -> &str {
        "update_note"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "update_note".into(),
            description: "Update a note's title, content or tags by id.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "id": {"type": "string"},
                    "title": {"type": "string"},
                    "content": {"type": "string"},
                    "tags": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["id"]
            }),
            rarely_used: false,
        }
    }

    async fn call(&self, params: Value, ctx: &ToolContext) -> ToolOutcome {
        let args = parse_args!(UpdateNoteArgs, params);
        let mut note = match ctx.scope.get::<Note>(&args.id) {
            Ok(Some(n)) => n,
            Ok(None) => {
                return ToolOutcome::fail(
                    ToolErrorKind::Failed,
                    format!("note {} not found", args.id),
                )
            }
            Err(e) => return ToolOutcome::fail(ToolErrorKind::Failed, e.to_string()),
        };
        if let Some(title) = args.title {
            note.title = title;
        }
        if let Some(content) = args.content {
            note.content = content;
        }
        if let Some(tags) = args.tags {
            note.tags = tags;
        }
        match ctx.scope.put(&mut note) {
            Ok(()) => ToolOutcome::ok(format!("Note {} updated.", note.id)),
            Err(e) => ToolOutcome::fail(ToolErrorKind::Failed, e.to_string()),
        }
    }
}

pub struct DeleteNote;

#[derive(Deserialize)]
struct DeleteNoteArgs {
    id: String,
}

#[async_trait]
impl Tool for DeleteNote {
    fn name(&self) -> &str {
        "delete_note"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "delete_note".into(),
            description: "Delete a note by id (undoable with undo_last).".into(),
            input_schema: json!({
                "type": "object",
                "properties": {"id": {"type": "string"}},
                "required": ["id"]
            }),
            rarely_used: false,
        }
    }

    async fn call(&self, params: Value, ctx: &ToolContext) -> ToolOutcome {
        let args = parse_args!(DeleteNoteArgs, params);
        let note = match ctx.scope.get::<Note>(&args.id) {
            Ok(Some(n)) => n,
            Ok(None) => {
                return ToolOutcome::fail(
                    ToolErrorKind::Failed,
                    format!("note {} not found", args.id),
                )
            }
            Err(e) => return ToolOutcome::fail(ToolErrorKind::Failed, e.to_string()),
        };
        // Snapshot before deleting so undo_last can restore.
        let payload = match serde_json::to_value(&note) {
            Ok(v) => v,
            Err(e) => return ToolOutcome::fail(ToolErrorKind::Failed, e.to_string()),
        };
        let mut undo = UndoRecord::new("notes", format!("deleted note `{}`", note.title), payload);
        if let Err(e) = ctx.scope.put(&mut undo) {
            return ToolOutcome::fail(ToolErrorKind::Failed, e.to_string());
        }
        match ctx.scope.delete::<Note>(&args.id) {
            Ok(true) => ToolOutcome::ok(format!("Note `{}` deleted.", note.title)),
            Ok(false) => ToolOutcome::fail(ToolErrorKind::Failed, "note already gone".to_string()),
            Err(e) => ToolOutcome::fail(ToolErrorKind::Failed, e.to_string()),
        }
    }
}
