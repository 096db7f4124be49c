//! List tools (shopping list and friends).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::parse_args;
use crate::error::ToolErrorKind;
use crate::store::{ListItem, ListRecord, UndoRecord};
use crate::tools::{Tool, ToolContext, ToolOutcome, ToolSpec};

/// Finds a list by title, case-insensitive.
fn find_list(ctx: &ToolContext, title: &str) -> Result<Option<ListRecord>, String> {
    let lists = ctx.scope.list::<ListRecord>().map_err(|e| e.to_string())?;
    let needle = title.trim().to_lowercase();
    Ok(lists.into_iter().find(|l| l.title.to_lowercase() == needle))
}

pub struct AddToList;

#[derive(Deserialize)]
struct AddToListArgs {
    title: String,
    /// One item or several; accepts a string or an array of strings.
    items: Value,
}

fn items_from_value(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => s
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(|i| i.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

#[async_trait]
impl Tool for AddToList {
    fn name(&self) -> &str {
        "add_to_list"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "add_to_list".into(),
            description: "Add one or more items to a list, creating the list if needed.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "title": {"type": "string"},
                    "items": {"type": ["string", "array"], "items": {"type": "string"}}
                },
                "required": ["title", "items"]
            }),
            rarely_used: false,
        }
    }

    async fn call(&self, params: Value, ctx: &ToolContext) -> ToolOutcome {
        let args = parse_args!(AddToListArgs, params);
        let items = items_from_value(&args.items);
        if items.is_empty() {
            return ToolOutcome::fail(ToolErrorKind::InvalidArgs, "no items given");
        }
        let mut list = match find_list(ctx, &args.title) {
            Ok(Some(l)) => l,
            Ok(None) => ListRecord::new(args.title.trim()),
            Err(e) => return ToolOutcome::fail(ToolErrorKind::Failed, e),
        };
        for text in &items {
            list.items.push(ListItem {
                text: text.clone(),
                done: false,
            });
        }
        match ctx.scope.put(&mut list) {
            Ok(()) => ToolOutcome::ok(format!(
                "Added {} item(s) to `{}`: {}",
                items.len(),
                list.title,
                items.join(", ")
            )),
            Err(e) => ToolOutcome::fail(ToolErrorKind::Failed, e.to_string()),
        }
    }
}

pub struct GetLists;

#[derive(Deserialize)]
struct GetListsArgs {
    #[serde(default)]
    title: Option<String>,
}

#[async_trait]
impl Tool for GetLists {
    fn name(&self) -> &str {
        "get_lists"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "get_lists".into(),
            description: "Show all lists, or one list with its items when `title` is given.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {"title": {"type": "string"}}
            }),
            rarely_used: false,
        }
    }

    fn parallel_safe(&self) -> bool {
        true
    }

    async fn call(&self, params: Value, ctx: &ToolContext) -> ToolOutcome {
        let args = parse_args!(GetListsArgs, params);
        if let Some(title) = args.title.as_deref().filter(|t| !t.trim().is_empty()) {
            return match find_list(ctx, title) {
                Ok(Some(list)) => {
                    let body = if list.items.is_empty() {
                        "  (empty)".to_string()
                    } else {
                        list.items
                            .iter()
                            .map(|i| format!("  {} {}", if i.done { "[x]" } else { "[ ]" }, i.text))
                            .collect::<Vec<_>>()
                            .join("\n")
                    };
                    ToolOutcome::ok(format!("{}\n{}", list.title, body))
                }
                Ok(None) => ToolOutcome::ok(format!("No list named `{title}`.")),
                Err(e) => ToolOutcome::fail(ToolErrorKind::Failed, e),
            };
        }
        match ctx.scope.list::<ListRecord>() {
            Ok(lists) if lists.is_empty() => ToolOutcome::ok("No lists yet."),
            Ok(lists) => ToolOutcome::ok(
                lists
                    .iter()
                    .map(|l| format!("- {} ({} items)", l.title, l.items.len()))
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
            Err(e) => ToolOutcome::fail(ToolErrorKind::Failed, e.to_string()),
        }
    }
}

pub struct RemoveFromList;

#[derive(Deserialize)]
struct RemoveFromListArgs {
    title: String,
    item: String,
}

#[async_trait]
impl Tool for RemoveFromList {
    fn name(&self) -> &str {
        "remove_from_list"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "remove_from_list".into(),
            description: "Remove an item from a list (undoable with undo_last).".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "title": {"type": "string"},
                    "item": {"type": "string"}
                },
                "required": ["title", "item"]
            }),
            rarely_used: false,
        }
    }

    async fn call(&self, params: Value, ctx: &ToolContext) -> ToolOutcome {
        let args = parse_args!(RemoveFromListArgs, params);
        let mut list = match find_list(ctx, &args.title) {
            Ok(Some(l)) => l,
            Ok(None) => {
                return ToolOutcome::fail(
                    ToolErrorKind::Failed,
                    format!("no list named `{}`", args.title),
                )
            }
            Err(e) => return ToolOutcome::fail(ToolErrorKind::Failed, e),
        };
        let needle = args.item.trim().to_lowercase();
        let Some(pos) = list
            .items
            .iter()
            .position(|i| i.text.to_lowercase() == needle)
        else {
            return ToolOutcome::fail(
                ToolErrorKind::Failed,
                format!("`{}` is not on `{}`", args.item, list.title),
            );
        };

        let snapshot = match serde_json::to_value(&list) {
            Ok(v) => v,
            Err(e) => return ToolOutcome::fail(ToolErrorKind::Failed, e.to_string()),
        };
        let mut undo = UndoRecord::new(
            "lists",
            format!("removed `{}` from `{}`", args.item, list.title),
            snapshot,
        );
        if let Err(e) = ctx.scope.put(&mut undo) {
            return ToolOutcome::fail(ToolErrorKind::Failed, e.to_string());
        }

        let removed = list.items.remove(pos);
        match ctx.scope.put(&mut list) {
            Ok(()) => ToolOutcome::ok(format!("Removed `{}` from `{}`.", removed.text, list.title)),
            Err(e) => ToolOutcome::fail(ToolErrorKind::Failed, e.to_string()),
        }
    }
}
