//! Scripted LLM for tests: pops one reply per call, records requests.

use std::sync::Mutex;

use async_trait::async_trait;

use super::{LlmProvider, LlmReply, LlmRequest, LlmUsage, NativeToolDef};
use crate::error::LlmError;
use crate::message::AgentMessage;
use crate::tools::ToolCall;

/// One scripted reply (or error) for [`MockLlm`].
pub enum MockReply {
    Reply(LlmReply),
    Error(LlmError),
}

impl MockReply {
    pub fn text(content: impl Into<String>) -> Self {
        MockReply::Reply(LlmReply {
            content: content.into(),
            tool_calls: vec![],
            usage: Some(LlmUsage {
                prompt_tokens: 10,
                completion_tokens: 10,
            }),
        })
    }

    pub fn tool_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        MockReply::Reply(LlmReply {
            content: content.into(),
            tool_calls: calls,
            usage: Some(LlmUsage {
                prompt_tokens: 10,
                completion_tokens: 10,
            }),
        })
    }
}

/// Scripted provider: replies are consumed in order; once exhausted every
/// call returns an empty reply. Requests are recorded for assertions.
pub struct MockLlm {
    replies: Mutex<std::collections::VecDeque<MockReply>>,
    requests: Mutex<Vec<Vec<AgentMessage>>>,
    native_tools: bool,
}

impl MockLlm {
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
            native_tools: false,
        }
    }

    /// Same, but reporting native tool-call support.
    pub fn with_native_tools(replies: Vec<MockReply>) -> Self {
        Self {
            native_tools: true,
            ..Self::new(replies)
        }
    }

    /// Number of chat calls made so far.
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Message snapshots per call, for prompt assertions.
    pub fn recorded_requests(&self) -> Vec<Vec<AgentMessage>> {
        self.requests.lock().unwrap().clone()
    }

    fn next(&self, req: &LlmRequest<'_>) -> Result<LlmReply, LlmError> {
        self.requests
            .lock()
            .unwrap()
            .push(req.messages.to_vec());
        match self.replies.lock().unwrap().pop_front() {
            Some(MockReply::Reply(r)) => Ok(r),
            Some(MockReply::Error(e)) => Err(e),
            None => Ok(LlmReply::default()),
        }
    }
}

#[async_trait]
impl LlmProvider for MockLlm {
    fn model(&self) -> &str {
        "mock"
    }

    async fn chat(&self, req: LlmRequest<'_>) -> Result<LlmReply, LlmError> {
        self.next(&req)
    }

    fn supports_native_tools(&self) -> bool {
        self.native_tools
    }

    async fn chat_with_tools(
        &self,
        req: LlmRequest<'_>,
        _tools: &[NativeToolDef],
    ) -> Result<LlmReply, LlmError> {
        self.next(&req)
    }
}
