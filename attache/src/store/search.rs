//! Keyword ranking for notes and conversation recall.
//!
//! Note scoring (per query):
//!   200 title exact + 140 tag exact + 120 title contains + 90 tag contains +
//!   70 content contains + 18/14/9 per token match in title/tags/content +
//!   up to 12 points of recency (linear decay over 12 days).
//!
//! Conversation scoring: token overlap over the recent window with a
//! bilingual ES/EN stopword list, recency position in [0, 1], and a role
//! boost (user +0.3, assistant +0.2). Top K returned chronologically.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

use super::entity::Note;
use crate::message::{AgentMessage, Role};

/// Default number of recent messages scanned by conversation recall.
pub const CONVERSATION_SCAN_DEFAULT: usize = 500;

/// One scored note match.
#[derive(Clone, Debug)]
pub struct NoteHit {
    pub note: Note,
    pub score: f64,
}

static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w{3,}").unwrap());

/// Bilingual stopword list (Spanish + English), lowercase.
static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        // Spanish
        "que", "con", "para", "por", "una", "uno", "unos", "unas", "los", "las",
        "del", "este", "esta", "estos", "estas", "ese", "esa", "esos", "esas",
        "pero", "más", "mas", "como", "muy", "donde", "cuando", "desde", "hasta",
        "sobre", "entre", "también", "tambien", "porque", "qué", "sin", "son",
        "fue", "ser", "estar", "hay", "algo", "todo", "toda", "todos", "todas",
        "era", "tiene", "tienes", "tengo", "hacer", "puede", "puedo",
        // English
        "the", "and", "for", "are", "but", "not", "you", "all", "can", "had",
        "her", "was", "one", "our", "out", "day", "get", "has", "him", "his",
        "how", "its", "may", "new", "now", "old", "see", "two", "way", "who",
        "did", "your", "from", "they", "this", "that", "have", "with", "what",
        "when", "where", "will", "would", "there", "their", "about", "been",
        "them", "then", "than", "some", "into", "just", "like", "over",
    ]
    .into_iter()
    .collect()
});

/// Tokenizes by Unicode word characters of length ≥ 3, lowercased, stopwords
/// dropped.
pub fn tokenize(text: &str) -> Vec<String> {
    WORD_RE
        .find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .filter(|t| !STOPWORDS.contains(t.as_str()))
        .collect()
}

/// Ranks notes against a query; zero-score notes are dropped, highest first.
pub fn rank_notes(notes: &[Note], query: &str, now: DateTime<Utc>) -> Vec<NoteHit> {
    let q = query.trim().to_lowercase();
    if q.is_empty() {
        return Vec::new();
    }
    let q_tokens = tokenize(&q);

    let mut hits: Vec<NoteHit> = notes
        .iter()
        .filter_map(|note| {
            let title = note.title.to_lowercase();
            let content = note.content.to_lowercase();
            let tags: Vec<String> = note.tags.iter().map(|t| t.to_lowercase()).collect();

            let mut score = 0.0;
            if title == q {
                score += 200.0;
            }
            if tags.iter().any(|t| *t == q) {
                score += 140.0;
            }
            if title.contains(&q) {
                score += 120.0;
            }
            if tags.iter().any(|t| t.contains(&q)) {
                score += 90.0;
            }
            if content.contains(&q) {
                score += 70.0;
            }

            let title_tokens = tokenize(&title);
            let tag_tokens: Vec<String> = tags.iter().flat_map(|t| tokenize(t)).collect();
            let content_tokens = tokenize(&content);
            for t in &q_tokens {
                if title_tokens.contains(t) {
                    score += 18.0;
                }
                if tag_tokens.contains(t) {
                    score += 14.0;
                }
                if content_tokens.contains(t) {
                    score += 9.0;
                }
            }

            // Recency: linear decay over 12 days, up to 12 points.
            let age_days = (now - note.updated_at).num_seconds().max(0) as f64 / 86_400.0;
            if age_days < 12.0 {
                score += 12.0 * (1.0 - age_days / 12.0);
            }

            if score > 0.0 {
                Some(NoteHit {
                    note: note.clone(),
                    score,
                })
            } else {
                None
            }
        })
        .collect();

    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits
}

/// Scores the recent conversation window and returns the top `limit` matches
/// in chronological order.
pub fn rank_conversation(recent: &[AgentMessage], query: &str, limit: usize) -> Vec<AgentMessage> {
    let q_tokens: HashSet<String> = tokenize(query).into_iter().collect();
    if q_tokens.is_empty() || recent.is_empty() {
        return Vec::new();
    }

    let len = recent.len() as f64;
    let mut scored: Vec<(usize, f64)> = recent
        .iter()
        .enumerate()
        .filter_map(|(idx, msg)| {
            let tokens: HashSet<String> = tokenize(&msg.content).into_iter().collect();
            let overlap = tokens.intersection(&q_tokens).count();
            if overlap == 0 {
                return None;
            }
            let recency = idx as f64 / len;
            let role_boost = match msg.role {
                Role::User => 0.3,
                Role::Assistant => 0.2,
                _ => 0.0,
            };
            Some((idx, 3.0 * overlap as f64 + recency + role_boost))
        })
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);
    scored.sort_by_key(|(idx, _)| *idx);
    scored.into_iter().map(|(idx, _)| recent[idx].clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(title: &str, content: &str, tags: &[&str]) -> Note {
        Note::new(title, content, tags.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn exact_title_beats_content_match() {
        let notes = vec![
            note("shopping", "some text", &[]),
            note("other", "about shopping today", &[]),
        ];
        let hits = rank_notes(&notes, "shopping", Utc::now());
        assert_eq!(hits[0].note.title, "shopping");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn tag_exact_scores_over_tag_contains() {
        let notes = vec![
            note("a", "", &["work"]),
            note("b", "", &["workout"]),
        ];
        let hits = rank_notes(&notes, "work", Utc::now());
        assert_eq!(hits[0].note.title, "a");
    }

    #[test]
    fn zero_score_notes_dropped() {
        let notes = vec![note("alpha", "beta", &[])];
        let hits = rank_notes(&notes, "zzzqqq", Utc::now());
        assert!(hits.is_empty());
    }

    #[test]
    fn recency_breaks_ties() {
        let mut old = note("meeting notes", "x", &[]);
        old.updated_at = Utc::now() - chrono::Duration::days(20);
        let fresh = note("meeting notes", "x", &[]);
        let hits = rank_notes(&[old, fresh.clone()], "meeting", Utc::now());
        assert_eq!(hits[0].note.id, fresh.id);
    }

    #[test]
    fn tokenize_drops_stopwords_and_short_words() {
        let tokens = tokenize("I went to the mercado para comprar manzanas");
        assert!(tokens.contains(&"mercado".to_string()));
        assert!(tokens.contains(&"manzanas".to_string()));
        assert!(!tokens.contains(&"the".to_string()));
        assert!(!tokens.contains(&"para".to_string()));
        assert!(!tokens.iter().any(|t| t.len() < 3));
    }

    #[test]
    fn conversation_results_chronological_with_role_boost() {
        let msgs = vec![
            AgentMessage::assistant("we talked about the dentist appointment"),
            AgentMessage::user("remind me about the dentist"),
            AgentMessage::system("dentist event processed"),
            AgentMessage::user("unrelated"),
        ];
        let out = rank_conversation(&msgs, "dentist", 2);
        assert_eq!(out.len(), 2);
        // Top two by score are the user and assistant lines; chronological
        // order puts the assistant line first.
        assert_eq!(out[0].role, Role::Assistant);
        assert_eq!(out[1].role, Role::User);
    }

    #[test]
    fn conversation_empty_query_returns_nothing() {
        let msgs = vec![AgentMessage::user("hello there")];
        assert!(rank_conversation(&msgs, "the", 5).is_empty());
    }
}
