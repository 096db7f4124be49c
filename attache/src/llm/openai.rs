//! OpenAI-compatible Chat Completions provider implementing [`LlmProvider`].
//!
//! Works against the real OpenAI API or any compatible server via
//! `OpenAIConfig::with_api_base`. Native tool calling is supported; the
//! engine prefers it over text parsing when this provider is configured.

use async_trait::async_trait;
use tracing::debug;

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionMessageToolCalls, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage, ChatCompletionTool,
        ChatCompletionTools, CreateChatCompletionRequestArgs, FunctionObject,
    },
    Client,
};

use super::{LlmProvider, LlmReply, LlmRequest, LlmUsage, NativeToolDef};
use crate::error::LlmError;
use crate::message::{AgentMessage, Role};
use crate::tools::ToolCall;

/// OpenAI-compatible chat provider.
pub struct ChatOpenAi {
    client: Client<OpenAIConfig>,
    model: String,
}

impl ChatOpenAi {
    /// API key from `OPENAI_API_KEY`.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            model: model.into(),
        }
    }

    /// Custom config (key, base URL) for compatible servers.
    pub fn with_config(config: OpenAIConfig, model: impl Into<String>) -> Self {
        Self {
            client: Client::with_config(config),
            model: model.into(),
        }
    }

    /// Maps conversation messages to request messages. Tool results become
    /// user messages carrying a `[tool results]` preamble: the text-parse
    /// protocol keeps the transcript model-agnostic.
    fn request_messages(messages: &[AgentMessage]) -> Vec<ChatCompletionRequestMessage> {
        messages
            .iter()
            .map(|m| match m.role {
                Role::System => ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessage::from(m.content.as_str()),
                ),
                Role::User => ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessage::from(m.content.as_str()),
                ),
                Role::Assistant => {
                    ChatCompletionRequestMessage::Assistant(m.content.as_str().into())
                }
                Role::ToolResult => ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessage::from(
                        format!("[tool results]\n{}", m.content).as_str(),
                    ),
                ),
            })
            .collect()
    }

    async fn create(
        &self,
        req: LlmRequest<'_>,
        tools: Option<&[NativeToolDef]>,
    ) -> Result<LlmReply, LlmError> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(self.model.clone());
        args.messages(Self::request_messages(req.messages));
        args.max_completion_tokens(req.max_tokens);
        args.temperature(req.temperature);

        if let Some(tools) = tools {
            let chat_tools: Vec<ChatCompletionTools> = tools
                .iter()
                .map(|t| {
                    ChatCompletionTools::Function(ChatCompletionTool {
                        function: FunctionObject {
                            name: t.name.clone(),
                            description: Some(t.description.clone()),
                            parameters: Some(t.parameters.clone()),
                            ..Default::default()
                        },
                    })
                })
                .collect();
            args.tools(chat_tools);
        }

        let request = args
            .build()
            .map_err(|e| LlmError::Transport(format!("request build: {e}")))?;

        debug!(model = %self.model, message_count = req.messages.len(), "chat create");

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| classify_api_error(&e.to_string()))?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::Malformed("no choices".into()))?;

        let msg = choice.message;
        let content = msg.content.unwrap_or_default();
        let tool_calls: Vec<ToolCall> = msg
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .filter_map(|tc| {
                if let ChatCompletionMessageToolCalls::Function(f) = tc {
                    let params = serde_json::from_str(&f.function.arguments)
                        .unwrap_or(serde_json::Value::Null);
                    Some(ToolCall::new(f.function.name, params))
                } else {
                    None
                }
            })
            .collect();

        let usage = response.usage.map(|u| LlmUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        });

        Ok(LlmReply {
            content,
            tool_calls,
            usage,
        })
    }
}

/// Maps provider error text to our taxonomy. Truncation/length errors become
/// `OutputLimit` so the engine can retry with a doubled token cap.
fn classify_api_error(text: &str) -> LlmError {
    let lower = text.to_lowercase();
    if lower.contains("max_tokens")
        || lower.contains("maximum context length")
        || lower.contains("output limit")
    {
        LlmError::OutputLimit
    } else if lower.contains("timed out") || lower.contains("timeout") {
        LlmError::Timeout(std::time::Duration::from_secs(0))
    } else {
        LlmError::Transport(text.to_string())
    }
}

#[async_trait]
impl LlmProvider for ChatOpenAi {
    fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, req: LlmRequest<'_>) -> Result<LlmReply, LlmError> {
        self.create(req, None).await
    }

    fn supports_native_tools(&self) -> bool {
        true
    }

    async fn chat_with_tools(
        &self,
        req: LlmRequest<'_>,
        tools: &[NativeToolDef],
    ) -> Result<LlmReply, LlmError> {
        self.create(req, Some(tools)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_maps_length_errors_to_output_limit() {
        assert!(matches!(
            classify_api_error("This model's maximum context length is 8192 tokens"),
            LlmError::OutputLimit
        ));
        assert!(matches!(
            classify_api_error("request timed out"),
            LlmError::Timeout(_)
        ));
        assert!(matches!(
            classify_api_error("connection refused"),
            LlmError::Transport(_)
        ));
    }

    /// **Scenario**: invoke against an unreachable base returns Err without a
    /// real API key.
    #[tokio::test]
    async fn chat_with_unreachable_base_returns_error() {
        let config = OpenAIConfig::new()
            .with_api_key("test-key")
            .with_api_base("https://127.0.0.1:1");
        let client = ChatOpenAi::with_config(config, "gpt-4o-mini");
        let messages = [AgentMessage::user("Hello")];
        let result = client
            .chat(LlmRequest {
                messages: &messages,
                max_tokens: 256,
                temperature: 0.2,
            })
            .await;
        assert!(result.is_err());
    }
}
