//! The LLM tool-use loop.
//!
//! One [`Engine::run_turn`] call handles one inbound message: assemble the
//! system prompt, iterate LLM calls bounded by the iteration cap, parse and
//! execute tool calls (parallel-safe batch concurrently, serial batch in
//! order), fold results back into the conversation, and terminate with
//! artifact-free text. The budget gate runs before *every* LLM call within
//! the turn; the loop guard short-circuits a call signature after two
//! identical failures.

mod guard;
mod parse;
mod prompt;
mod recall;

pub use guard::{asks_confirmation, detect_language, is_action_request, is_affirmative};
pub use parse::{looks_like_tool_call, parse_tool_calls, strip_artifacts};
pub use prompt::{PromptInputs, StoreSummary};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::agent::AgentConfig;
use crate::budget::cost_usd;
use crate::error::{EngineError, LlmError, ToolErrorKind};
use crate::llm::{estimate_tokens, LlmProvider, LlmReply, LlmRequest};
use crate::message::AgentMessage;
use crate::orchestrator::QueueSource;
use crate::tools::{DescribeOptions, ToolCall, ToolContext, ToolOutcome, ToolRegistry, UsageEvent};

/// Starting completion budget; doubled on output-limit errors up to the cap.
const START_MAX_TOKENS: u32 = 1024;
const MAX_TOKENS_CAP: u32 = 8192;
/// History window used by fast-path turns.
const FAST_HISTORY_WINDOW: usize = 12;
/// Identical failures after which a signature is short-circuited.
const LOOP_GUARD_THRESHOLD: u32 = 2;
/// Guard corrections per turn; iterations stay bounded by the cap anyway.
const GUARD_MAX_FIRES: u32 = 2;

/// Reduced-iteration mode for this turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FastPath {
    Confirmation,
    Action,
}

/// One inbound message to process.
#[derive(Clone, Debug)]
pub struct TurnRequest {
    pub text: String,
    pub source: QueueSource,
    pub fast_path: Option<FastPath>,
}

/// Result of one turn.
#[derive(Debug)]
pub struct TurnOutcome {
    pub final_text: String,
    pub history: Vec<AgentMessage>,
    pub llm_calls: u32,
}

/// The agent execution engine. One instance per agent, bound to its provider,
/// registry and tool context.
pub struct Engine {
    llm: Arc<dyn LlmProvider>,
    registry: Arc<ToolRegistry>,
    ctx: ToolContext,
}

impl Engine {
    pub fn new(llm: Arc<dyn LlmProvider>, registry: Arc<ToolRegistry>, ctx: ToolContext) -> Self {
        Self { llm, registry, ctx }
    }

    /// Runs one turn. `history` must already end with the inbound message
    /// (the orchestrator appends it for immediate visibility before calling).
    pub async fn run_turn(
        &self,
        req: &TurnRequest,
        history: Vec<AgentMessage>,
    ) -> Result<TurnOutcome, EngineError> {
        let config = self.ctx.config.read().await.clone();
        let options = &config.options;
        let language = detect_language(&[&config.system_prompt, &config.name]);

        let iteration_cap = match req.fast_path {
            Some(FastPath::Confirmation) => options.fast_confirmation_max_tool_iterations(),
            _ => options.max_tool_iterations(),
        };

        // Preamble: recall + prompt sections.
        let recalled = recall::recall_memories(
            &self.ctx.scope,
            &req.text,
            options.memory_recall_limit(),
            options.smart_recall(),
            self.llm.as_ref(),
        )
        .await;
        let summary = StoreSummary::collect(&self.ctx.scope);
        let schedules = self.ctx.scheduler.list_tasks(&config.id).await;
        let tool_descriptions = self
            .registry
            .describe_all(
                language,
                DescribeOptions {
                    compact: options.compact_system_prompt(),
                    fast: req.fast_path.is_some(),
                    max_extension_tools: options.max_mcp_tools_in_prompt(),
                },
            )
            .await;
        let fast_directive = match req.fast_path {
            Some(FastPath::Confirmation) => Some(prompt::confirmation_directive(language)),
            Some(FastPath::Action) => Some(prompt::action_directive(language)),
            None => None,
        };
        let system = prompt::compose(
            &config,
            language,
            &PromptInputs {
                tool_descriptions: &tool_descriptions,
                recalled: &recalled,
                schedules: &schedules,
                summary: &summary,
                fast_directive,
            },
        );
        let system_msg = AgentMessage::system(system);

        let native = self.llm.supports_native_tools();
        let native_defs = if native {
            self.registry.native_definitions().await
        } else {
            Vec::new()
        };

        let mut new_history = history;
        let mut max_tokens = START_MAX_TOKENS;
        let mut llm_calls = 0u32;
        let mut failures: HashMap<String, u32> = HashMap::new();
        let mut tools_ran = false;
        let mut guard_fires = 0u32;

        for iteration in 0..iteration_cap {
            // Budget gate, before every LLM call within the turn.
            if self.ctx.budget.is_exhausted(
                &config.id,
                config.timezone.as_deref(),
                config.daily_budget_usd,
            ) {
                let notice = budget_notice(language);
                new_history.push(AgentMessage::assistant(&notice));
                return Ok(TurnOutcome {
                    final_text: notice,
                    history: new_history,
                    llm_calls,
                });
            }

            let view = self.view(&system_msg, &new_history, req.fast_path.is_some());
            let reply = self
                .call_llm(&view, &mut max_tokens, native, &native_defs, options.llm_timeout_ms())
                .await?;
            llm_calls += 1;
            self.record_usage(&config, &view, &reply);

            // Collect calls: native first, text parsing as the safety net.
            let (calls, text) = if reply.tool_calls.is_empty() {
                parse::parse_tool_calls(&reply.content)
            } else {
                (reply.tool_calls.clone(), parse::strip_artifacts(&reply.content))
            };
            let calls = dedup_calls(calls);

            if calls.is_empty() {
                let final_text = parse::strip_artifacts(&text);
                if final_text.is_empty() {
                    // Only artifacts, no prose: iterate again silently.
                    debug!(iteration, "empty reply after artifact stripping");
                    continue;
                }
                if !tools_ran
                    && guard_fires < GUARD_MAX_FIRES
                    && hallucination_detected(req, &final_text)
                {
                    guard_fires += 1;
                    debug!(iteration, "anti-hallucination guard fired");
                    new_history.push(AgentMessage::assistant(&final_text));
                    new_history
                        .push(AgentMessage::tool_result(guard::corrective_instruction(language)));
                    continue;
                }
                let final_text = if req.fast_path == Some(FastPath::Confirmation) {
                    guard::trim_confirmation_followup(&final_text)
                } else {
                    final_text
                };
                new_history.push(AgentMessage::assistant(&final_text));
                return Ok(TurnOutcome {
                    final_text,
                    history: new_history,
                    llm_calls,
                });
            }

            // Execute: parallel-safe batch concurrently, serial batch in
            // order, results reassembled by original index.
            let outcomes = self.execute_calls(&calls, &mut failures).await;
            tools_ran = true;

            let combined = render_results(
                &calls,
                &outcomes,
                options.tool_result_max_chars(),
                options.tool_results_total_max_chars(),
            );
            if !text.is_empty() {
                new_history.push(AgentMessage::assistant(&text));
            }
            new_history.push(AgentMessage::tool_result(combined));
        }

        warn!(agent = %config.id, "iteration cap reached without final text");
        let fallback = iteration_fallback(language);
        new_history.push(AgentMessage::assistant(&fallback));
        Ok(TurnOutcome {
            final_text: fallback,
            history: new_history,
            llm_calls,
        })
    }

    /// The message view for one LLM call: system prompt plus the (possibly
    /// fast-path-trimmed) conversation window.
    fn view(
        &self,
        system: &AgentMessage,
        history: &[AgentMessage],
        fast: bool,
    ) -> Vec<AgentMessage> {
        let window = if fast && history.len() > FAST_HISTORY_WINDOW {
            &history[history.len() - FAST_HISTORY_WINDOW..]
        } else {
            history
        };
        let mut view = Vec::with_capacity(window.len() + 1);
        view.push(system.clone());
        view.extend_from_slice(window);
        view
    }

    /// One LLM call with the per-call timeout and the adaptive max-tokens
    /// doubling on output-limit errors.
    async fn call_llm(
        &self,
        view: &[AgentMessage],
        max_tokens: &mut u32,
        native: bool,
        native_defs: &[crate::llm::NativeToolDef],
        timeout_ms: u64,
    ) -> Result<LlmReply, EngineError> {
        let timeout = Duration::from_millis(timeout_ms);
        loop {
            let request = LlmRequest {
                messages: view,
                max_tokens: *max_tokens,
                temperature: 0.3,
            };
            let call = async {
                if native {
                    self.llm.chat_with_tools(request.clone(), native_defs).await
                } else {
                    self.llm.chat(request.clone()).await
                }
            };
            match tokio::time::timeout(timeout, call).await {
                Err(_) => return Err(EngineError::Llm(LlmError::Timeout(timeout))),
                Ok(Err(LlmError::OutputLimit)) if *max_tokens < MAX_TOKENS_CAP => {
                    *max_tokens = (*max_tokens * 2).min(MAX_TOKENS_CAP);
                    debug!(max_tokens = *max_tokens, "output limit hit, doubling completion budget");
                    continue;
                }
                Ok(Err(e)) => return Err(EngineError::Llm(e)),
                Ok(Ok(reply)) => return Ok(reply),
            }
        }
    }

    fn record_usage(&self, config: &AgentConfig, view: &[AgentMessage], reply: &LlmReply) {
        let usage = reply.usage.clone().unwrap_or_else(|| {
            // Deterministic estimate when the provider reports nothing.
            let prompt_texts: Vec<&str> = view.iter().map(|m| m.content.as_str()).collect();
            let call_desc = reply
                .tool_calls
                .iter()
                .map(|c| c.signature())
                .collect::<Vec<_>>()
                .join(" ");
            crate::llm::LlmUsage {
                prompt_tokens: estimate_tokens(&prompt_texts),
                completion_tokens: estimate_tokens(&[reply.content.as_str(), call_desc.as_str()]),
            }
        });
        let cost = cost_usd(
            usage.prompt_tokens,
            usage.completion_tokens,
            config.pricing.input_per_1k,
            config.pricing.output_per_1k,
        );
        self.ctx
            .budget
            .record_cost(&config.id, config.timezone.as_deref(), cost);
        self.ctx.recorder.record_usage(
            &config.id,
            &UsageEvent {
                model: config.model.clone(),
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                cost_usd: cost,
            },
        );
    }

    /// Executes one iteration's calls with the loop guard, preserving the
    /// emission order in the returned outcomes.
    async fn execute_calls(
        &self,
        calls: &[ToolCall],
        failures: &mut HashMap<String, u32>,
    ) -> Vec<ToolOutcome> {
        let mut outcomes: Vec<Option<ToolOutcome>> = vec![None; calls.len()];

        let mut parallel: Vec<usize> = Vec::new();
        let mut serial: Vec<usize> = Vec::new();
        for (idx, call) in calls.iter().enumerate() {
            if self.registry.is_parallel_safe(&call.name) {
                parallel.push(idx);
            } else {
                serial.push(idx);
            }
        }

        // Parallel-safe batch runs concurrently.
        let parallel_results = join_all(parallel.iter().map(|&idx| {
            let call = &calls[idx];
            let blocked = failures.get(&call.signature()).copied().unwrap_or(0)
                >= LOOP_GUARD_THRESHOLD;
            async move {
                if blocked {
                    loop_guard_outcome(call)
                } else {
                    self.registry.execute(call, &self.ctx).await
                }
            }
        }))
        .await;
        for (&idx, outcome) in parallel.iter().zip(parallel_results) {
            outcomes[idx] = Some(outcome);
        }

        // Serial batch runs sequentially in original order.
        for &idx in &serial {
            let call = &calls[idx];
            let blocked = failures.get(&call.signature()).copied().unwrap_or(0)
                >= LOOP_GUARD_THRESHOLD;
            let outcome = if blocked {
                loop_guard_outcome(call)
            } else {
                self.registry.execute(call, &self.ctx).await
            };
            outcomes[idx] = Some(outcome);
        }

        let outcomes: Vec<ToolOutcome> = outcomes.into_iter().flatten().collect();
        for (call, outcome) in calls.iter().zip(&outcomes) {
            if !outcome.success && outcome.error != Some(ToolErrorKind::LoopBlocked) {
                *failures.entry(call.signature()).or_insert(0) += 1;
            }
        }
        outcomes
    }
}

fn loop_guard_outcome(call: &ToolCall) -> ToolOutcome {
    ToolOutcome::fail(
        ToolErrorKind::LoopBlocked,
        format!(
            "`{}` already failed twice with these exact arguments; not retrying. \
             Change the arguments or tell the user what went wrong.",
            call.name
        ),
    )
}

fn hallucination_detected(req: &TurnRequest, text: &str) -> bool {
    let action_request = is_action_request(&req.text);
    let confirmed =
        req.fast_path == Some(FastPath::Confirmation) || is_affirmative(&req.text);
    (action_request && guard::promises_execution(text))
        || guard::claims_completed_action(text)
        || (confirmed && guard::asks_confirmation(text))
}

/// Collapses duplicate calls within one iteration by signature, keeping the
/// first occurrence's position.
fn dedup_calls(calls: Vec<ToolCall>) -> Vec<ToolCall> {
    let mut seen = HashSet::new();
    calls
        .into_iter()
        .filter(|c| seen.insert(c.signature()))
        .collect()
}

/// Renders combined tool results with per-result and total caps.
fn render_results(
    calls: &[ToolCall],
    outcomes: &[ToolOutcome],
    per_result_cap: usize,
    total_cap: usize,
) -> String {
    let mut out = String::new();
    for (call, outcome) in calls.iter().zip(outcomes) {
        let status = if outcome.success {
            "ok".to_string()
        } else {
            format!(
                "error:{}",
                outcome
                    .error
                    .map(|k| k.to_string())
                    .unwrap_or_else(|| "failed".into())
            )
        };
        let mut body = outcome.content.clone();
        if body.chars().count() > per_result_cap {
            body = format!(
                "{}… [truncated]",
                body.chars().take(per_result_cap).collect::<String>()
            );
        }
        let entry = format!("[{}] {status}: {body}\n", call.name);
        if out.chars().count() + entry.chars().count() > total_cap {
            out.push_str("… [remaining tool results truncated]\n");
            break;
        }
        out.push_str(&entry);
    }
    out
}

fn budget_notice(language: &str) -> String {
    if language == "es" {
        "💸 Se ha alcanzado el límite de gasto diario de este agente. Responderé de nuevo cuando \
         se renueve el presupuesto o se apruebe una excepción."
            .to_string()
    } else {
        "💸 This agent's daily budget limit has been reached. I'll respond again once the budget \
         renews or an override is approved."
            .to_string()
    }
}

fn iteration_fallback(language: &str) -> String {
    if language == "es" {
        "No he podido completar la tarea dentro del límite de pasos. ¿Quieres que lo intente de \
         otra forma?"
            .to_string()
    } else {
        "I couldn't finish within the step limit. Want me to try a different approach?".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dedup_keeps_first_occurrence() {
        let calls = vec![
            ToolCall::new("a", json!({"x": 1})),
            ToolCall::new("b", json!({})),
            ToolCall::new("a", json!({"x": 1})),
        ];
        let out = dedup_calls(calls);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].name, "a");
        assert_eq!(out[1].name, "b");
    }

    #[test]
    fn render_results_applies_caps() {
        let calls = vec![
            ToolCall::new("one", json!({})),
            ToolCall::new("two", json!({})),
        ];
        let outcomes = vec![
            ToolOutcome::ok("x".repeat(100)),
            ToolOutcome::ok("y".repeat(100)),
        ];
        let text = render_results(&calls, &outcomes, 50, 90);
        assert!(text.contains("… [truncated]"));
        assert!(text.contains("[remaining tool results truncated]"));
    }

    #[test]
    fn hallucination_conditions() {
        let req = TurnRequest {
            text: "Add eggs to the shopping list".into(),
            source: QueueSource::User,
            fast_path: None,
        };
        assert!(hallucination_detected(&req, "I'll add eggs right away."));
        assert!(hallucination_detected(&req, "I've added eggs to the list."));
        assert!(!hallucination_detected(&req, "Your list has 3 items."));

        let confirmed = TurnRequest {
            text: "yes".into(),
            source: QueueSource::User,
            fast_path: Some(FastPath::Confirmation),
        };
        assert!(hallucination_detected(&confirmed, "Do you confirm?"));
    }
}
