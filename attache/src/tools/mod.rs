//! Tool contract: specs, calls, outcomes, and the [`Tool`] trait.
//!
//! Built-in tools implement [`Tool`] and register with
//! [`ToolRegistry`](crate::tools::ToolRegistry); extension tools are routed by
//! qualified name to the extension manager. Outcomes are never raised as
//! errors: they carry a success flag and an optional
//! [`ToolErrorKind`](crate::error::ToolErrorKind) so the engine can fold
//! failures back into the conversation.

mod builtin;
mod context;
mod registry;

pub use builtin::register_builtins;
pub use context::{NoopRecorder, ToolContext, Transcriber, UsageEvent, UsageRecorder};
pub use registry::{DescribeOptions, ToolRegistry, EXTENSION_TOOL_PREFIX};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ToolErrorKind;

/// Prompt-facing specification for one tool.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema for the arguments object.
    pub input_schema: Value,
    /// Rarely-used tools are dropped from the fast prompt variant.
    #[serde(default)]
    pub rarely_used: bool,
}

/// One tool invocation emitted by the LLM.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub params: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, params: Value) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    /// Stable identity for dedup and the loop guard: name plus the params
    /// serialized with sorted keys.
    pub fn signature(&self) -> String {
        format!("{}:{}", self.name, canonical_json(&self.params))
    }
}

/// Serializes a JSON value with object keys sorted, recursively.
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let inner: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", serde_json::to_string(k).unwrap_or_default(), canonical_json(&map[k])))
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", inner.join(","))
        }
        other => other.to_string(),
    }
}

/// Result of one tool execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub success: bool,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolErrorKind>,
}

impl ToolOutcome {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
            error: None,
        }
    }

    pub fn fail(kind: ToolErrorKind, content: impl Into<String>) -> Self {
        Self {
            success: false,
            content: content.into(),
            error: Some(kind),
        }
    }
}

/// A single callable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn spec(&self) -> ToolSpec;

    /// Read-only/idempotent tools may run concurrently with their peers in
    /// one iteration. Defaults to serial (side-effecting).
    fn parallel_safe(&self) -> bool {
        false
    }

    async fn call(&self, params: Value, ctx: &ToolContext) -> ToolOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn signature_is_key_order_independent() {
        let a = ToolCall::new("t", json!({"b": 1, "a": {"y": 2, "x": 3}}));
        let b = ToolCall::new("t", json!({"a": {"x": 3, "y": 2}, "b": 1}));
        assert_eq!(a.signature(), b.signature());
    }

    #[test]
    fn signature_distinguishes_args() {
        let a = ToolCall::new("t", json!({"a": 1}));
        let b = ToolCall::new("t", json!({"a": 2}));
        assert_ne!(a.signature(), b.signature());
    }
}
