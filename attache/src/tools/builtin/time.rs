//! Clock tool.

use async_trait::async_trait;
use chrono::Utc;
use chrono_tz::Tz;
use serde_json::{json, Value};

use crate::tools::{Tool, ToolContext, ToolOutcome, ToolSpec};

pub struct GetCurrentTime;

#[async_trait]
impl Tool for GetCurrentTime {
    fn name(&self) -> &str {
        "get_current_time"
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "get_current_time".into(),
            description: "Current date and time in the agent's timezone.".into(),
            input_schema: json!({"type": "object", "properties": {}}),
            rarely_used: true,
        }
    }

    fn parallel_safe(&self) -> bool {
        true
    }

    async fn call(&self, _params: Value, ctx: &ToolContext) -> ToolOutcome {
        let tz_label = ctx.config.read().await.timezone.clone();
        let now = Utc::now();
        match tz_label.as_deref().and_then(|l| l.parse::<Tz>().ok()) {
            Some(tz) => ToolOutcome::ok(
                now.with_timezone(&tz)
                    .format("%Y-%m-%d %H:%M:%S %Z")
                    .to_string(),
            ),
            None => ToolOutcome::ok(now.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
        }
    }
}
