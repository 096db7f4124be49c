//! Mid-turn message delivery tool.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::parse_args;
use crate::error::ToolErrorKind;
use crate::tools::{Tool, ToolContext, ToolOutcome, ToolSpec};

pub struct SendMessage;

#[derive(Deserialize)]
struct SendMessageArgs {
    text: String,
}

#[async_trait]
impl Tool for SendMessage {
    fn name(&self) -> &str {
        "send_message"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "send_message".into(),
            description:
                "Send a message to the user right now, before the turn finishes.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            }),
            rarely_used: false,
        }
    }

    async fn call(&self, params: Value, ctx: &ToolContext) -> ToolOutcome {
        let args = parse_args!(SendMessageArgs, params);
        if args.text.trim().is_empty() {
            return ToolOutcome::fail(ToolErrorKind::InvalidArgs, "empty message");
        }
        match ctx.channel.send_text(&args.text).await {
            Ok(()) => {
                // The orchestrator skips the final-text send for this turn.
                ctx.mark_delivered();
                ToolOutcome::ok("Message sent.")
            }
            Err(e) => ToolOutcome::fail(ToolErrorKind::Failed, e.to_string()),
        }
    }
}
