//! Memory recall for the prompt preamble.
//!
//! Candidates come from the keyword-ranked conversation search. With
//! `smart_recall` enabled, the LLM scores each candidate 0–10 and only
//! scores ≥ 5 survive (up to the recall limit); any failure — timeout,
//! transport, unparseable reply — falls back to the keyword order.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::llm::{LlmProvider, LlmRequest};
use crate::message::AgentMessage;
use crate::store::{StoreScope, CONVERSATION_SCAN_DEFAULT};

/// Bound on the smart-RAG scoring call.
const SCORING_TIMEOUT: Duration = Duration::from_secs(10);
/// Candidates offered to the scorer, per recall-limit slot.
const CANDIDATE_FACTOR: usize = 3;

static SCORE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""index"\s*:\s*(\d+)\s*,\s*"score"\s*:\s*(\d+)"#).unwrap());

/// Retrieves the memories injected into this turn's prompt.
pub async fn recall_memories(
    scope: &StoreScope,
    query: &str,
    limit: usize,
    smart: bool,
    llm: &dyn LlmProvider,
) -> Vec<AgentMessage> {
    let candidates = scope
        .search_conversation(query, CONVERSATION_SCAN_DEFAULT, limit * CANDIDATE_FACTOR)
        .unwrap_or_default();
    if candidates.is_empty() {
        return candidates;
    }
    if !smart {
        return keep_first(candidates, limit);
    }

    match smart_scores(&candidates, query, llm).await {
        Some(scores) => {
            let mut picked: Vec<(usize, u32)> = scores
                .into_iter()
                .filter(|(idx, score)| *score >= 5 && *idx < candidates.len())
                .collect();
            picked.sort_by(|a, b| b.1.cmp(&a.1));
            picked.truncate(limit);
            picked.sort_by_key(|(idx, _)| *idx);
            picked
                .into_iter()
                .map(|(idx, _)| candidates[idx].clone())
                .collect()
        }
        None => {
            debug!("smart recall failed, falling back to keyword order");
            keep_first(candidates, limit)
        }
    }
}

fn keep_first(mut candidates: Vec<AgentMessage>, limit: usize) -> Vec<AgentMessage> {
    candidates.truncate(limit);
    candidates
}

/// Asks the LLM for `[{"index": …, "score": 0-10}]` and parses it leniently.
async fn smart_scores(
    candidates: &[AgentMessage],
    query: &str,
    llm: &dyn LlmProvider,
) -> Option<Vec<(usize, u32)>> {
    let mut listing = String::new();
    for (idx, msg) in candidates.iter().enumerate() {
        listing.push_str(&format!(
            "{{\"index\": {idx}, \"role\": \"{:?}\", \"date\": \"{}\", \"content\": {}}}\n",
            msg.role,
            msg.timestamp.format("%Y-%m-%d"),
            serde_json::to_string(&msg.content).unwrap_or_default(),
        ));
    }
    let prompt = format!(
        "Score each snippet 0-10 for relevance to this request:\n{query}\n\nSnippets:\n{listing}\n\
         Reply ONLY with a JSON array of {{\"index\": n, \"score\": n}}."
    );
    let messages = [AgentMessage::user(prompt)];
    let reply = tokio::time::timeout(
        SCORING_TIMEOUT,
        llm.chat(LlmRequest {
            messages: &messages,
            max_tokens: 512,
            temperature: 0.0,
        }),
    )
    .await
    .ok()?
    .ok()?;

    let scores: Vec<(usize, u32)> = SCORE_RE
        .captures_iter(&reply.content)
        .filter_map(|cap| {
            Some((
                cap[1].parse::<usize>().ok()?,
                cap[2].parse::<u32>().ok()?,
            ))
        })
        .collect();
    if scores.is_empty() {
        None
    } else {
        Some(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockLlm, MockReply};
    use crate::store::Store;

    fn seeded_scope() -> (tempfile::TempDir, StoreScope) {
        let dir = tempfile::tempdir().unwrap();
        let scope = Store::new(dir.path()).scope("u", "a");
        for text in [
            "we discussed the dentist appointment",
            "the dentist is on friday",
            "unrelated chatter about weather",
        ] {
            scope.append_message(&AgentMessage::user(text)).unwrap();
        }
        (dir, scope)
    }

    #[tokio::test]
    async fn keyword_recall_without_smart() {
        let (_d, scope) = seeded_scope();
        let llm = MockLlm::new(vec![]);
        let out = recall_memories(&scope, "dentist", 2, false, &llm).await;
        assert_eq!(out.len(), 2);
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn smart_recall_keeps_high_scores() {
        let (_d, scope) = seeded_scope();
        let llm = MockLlm::new(vec![MockReply::text(
            r#"[{"index": 0, "score": 9}, {"index": 1, "score": 2}]"#,
        )]);
        let out = recall_memories(&scope, "dentist", 5, true, &llm).await;
        assert_eq!(out.len(), 1);
        assert!(out[0].content.contains("discussed"));
    }

    #[tokio::test]
    async fn smart_recall_falls_back_on_garbage() {
        let (_d, scope) = seeded_scope();
        let llm = MockLlm::new(vec![MockReply::text("I cannot score these.")]);
        let out = recall_memories(&scope, "dentist", 2, true, &llm).await;
        assert_eq!(out.len(), 2);
    }
}
