//! LLM provider abstraction.
//!
//! The engine depends on [`LlmProvider`]: given messages (and optionally
//! native tool definitions) return assistant text, tool calls, and usage.
//! Feature detection is capability-based: providers that can emit structured
//! tool calls return `true` from [`LlmProvider::supports_native_tools`] and
//! implement [`LlmProvider::chat_with_tools`]; everything else gets plain
//! completions whose tool calls the engine parses from text.
//!
//! Implementations: [`MockLlm`] (scripted, for tests) and [`ChatOpenAi`]
//! (OpenAI-compatible HTTP backend).

mod mock;
mod openai;

pub use mock::{MockLlm, MockReply};
pub use openai::ChatOpenAi;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::message::AgentMessage;
use crate::tools::ToolCall;

/// Token usage for one LLM call.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LlmUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl LlmUsage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// One request to a provider.
#[derive(Clone, Debug)]
pub struct LlmRequest<'a> {
    pub messages: &'a [AgentMessage],
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Native tool definition passed to providers that support structured calls.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NativeToolDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Provider reply: text plus zero or more structured tool calls.
#[derive(Clone, Debug, Default)]
pub struct LlmReply {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<LlmUsage>,
}

/// Chat provider. `chat` is required; native tool calling is optional and
/// discovered via [`supports_native_tools`](Self::supports_native_tools).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn model(&self) -> &str;

    async fn chat(&self, req: LlmRequest<'_>) -> Result<LlmReply, LlmError>;

    fn supports_native_tools(&self) -> bool {
        false
    }

    async fn chat_with_tools(
        &self,
        _req: LlmRequest<'_>,
        _tools: &[NativeToolDef],
    ) -> Result<LlmReply, LlmError> {
        Err(LlmError::NativeToolsUnsupported)
    }
}

/// Deterministic token estimate used when a provider reports no usage:
/// ceil(chars / 4) over the message contents or emitted content.
pub fn estimate_tokens(texts: &[&str]) -> u32 {
    let chars: usize = texts.iter().map(|t| t.chars().count()).sum();
    chars.div_ceil(4) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_is_deterministic_and_rounds_up() {
        assert_eq!(estimate_tokens(&["abcd"]), 1);
        assert_eq!(estimate_tokens(&["abcde"]), 2);
        assert_eq!(estimate_tokens(&["ab", "cd"]), 1);
        assert_eq!(estimate_tokens(&[]), 0);
    }
}
