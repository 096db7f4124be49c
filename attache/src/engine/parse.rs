//! Textual tool-call parsing and artifact stripping.
//!
//! Providers without native tool calling emit calls inside their text. Three
//! representations are recognized, and every matched fragment is removed from
//! the reply so no artifact can reach the user:
//!
//! 1. `<tool_call>{"name": …, "params": {…}}</tool_call>` blocks, with
//!    `params`, `parameters` or `arguments` as the key;
//! 2. bare JSON objects on their own line with the same shape;
//! 3. compact self-closing tags with HTML-entity-encoded attribute JSON:
//!    `<tool_call name="create_note" args="{&quot;title&quot;:…}"/>`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::tools::ToolCall;

static BLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<tool_call>\s*(\{.*?\})\s*</tool_call>").unwrap());

static COMPACT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"<(?:tool_call|invoke)\s+name="([^"]+)"(?:\s+(?:args|params|arguments)="([^"]*)")?\s*/>"#,
    )
    .unwrap()
});

static INVOKE_BLOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<invoke\s[^>]*>.*?</invoke>").unwrap());

static PARAMETER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<parameter\s[^>]*>.*?</parameter>").unwrap());

static MARKER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[tool_calls?:[^\]]*\]").unwrap());

static LEFTOVER_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"</?(?:tool_call|invoke|parameter)[^>]*>").unwrap());

/// Extracts the call from a parsed JSON object of the recognized shape.
fn call_from_object(value: &Value) -> Option<ToolCall> {
    let obj = value.as_object()?;
    let name = obj.get("name")?.as_str()?.trim();
    if name.is_empty() {
        return None;
    }
    let params = obj
        .get("params")
        .or_else(|| obj.get("parameters"))
        .or_else(|| obj.get("arguments"))?
        .clone();
    Some(ToolCall::new(name, params))
}

fn decode_entities(text: &str) -> String {
    text.replace("&quot;", "\"")
        .replace("&#34;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Parses every recognized tool-call representation out of `text`, returning
/// the calls in order of appearance plus the text with all matched fragments
/// removed.
pub fn parse_tool_calls(text: &str) -> (Vec<ToolCall>, String) {
    let mut calls = Vec::new();
    let mut cleaned = text.to_string();

    // 1. <tool_call>{…}</tool_call> blocks.
    for cap in BLOCK_RE.captures_iter(text) {
        if let Ok(value) = serde_json::from_str::<Value>(&cap[1]) {
            if let Some(call) = call_from_object(&value) {
                calls.push(call);
            }
        }
    }
    cleaned = BLOCK_RE.replace_all(&cleaned, "").into_owned();

    // 2. Compact self-closing tags with entity-encoded attribute JSON.
    for cap in COMPACT_RE.captures_iter(&cleaned.clone()) {
        let name = cap[1].trim().to_string();
        if name.is_empty() {
            continue;
        }
        let params = cap
            .get(2)
            .map(|m| decode_entities(m.as_str()))
            .and_then(|raw| serde_json::from_str::<Value>(&raw).ok())
            .unwrap_or(Value::Object(Default::default()));
        calls.push(ToolCall::new(name, params));
    }
    cleaned = COMPACT_RE.replace_all(&cleaned, "").into_owned();

    // 3. Bare JSON objects on their own lines.
    let mut kept_lines: Vec<&str> = Vec::new();
    for line in cleaned.lines() {
        let trimmed = line.trim();
        let mut consumed = false;
        if trimmed.starts_with('{') && trimmed.ends_with('}') && trimmed.contains("\"name\"") {
            if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
                if let Some(call) = call_from_object(&value) {
                    calls.push(call);
                    consumed = true;
                }
            }
        }
        if !consumed {
            kept_lines.push(line);
        }
    }
    let cleaned = kept_lines.join("\n");

    (calls, tidy(&cleaned))
}

/// Removes every tool-call artifact shape from `text`, including malformed
/// leftovers that did not parse as calls.
pub fn strip_artifacts(text: &str) -> String {
    let mut out = BLOCK_RE.replace_all(text, "").into_owned();
    out = COMPACT_RE.replace_all(&out, "").into_owned();
    out = INVOKE_BLOCK_RE.replace_all(&out, "").into_owned();
    out = PARAMETER_RE.replace_all(&out, "").into_owned();
    out = MARKER_RE.replace_all(&out, "").into_owned();
    out = LEFTOVER_TAG_RE.replace_all(&out, "").into_owned();

    let kept: Vec<&str> = out
        .lines()
        .filter(|line| {
            let t = line.trim();
            !(t.starts_with('{') && t.ends_with('}') && t.contains("\"name\""))
        })
        .collect();
    tidy(&kept.join("\n"))
}

/// True when the text still carries something tool-call shaped; the engine
/// uses this as the native-mode safety net.
pub fn looks_like_tool_call(text: &str) -> bool {
    BLOCK_RE.is_match(text)
        || COMPACT_RE.is_match(text)
        || text.lines().any(|line| {
            let t = line.trim();
            t.starts_with('{') && t.ends_with('}') && t.contains("\"name\"")
        })
}

/// Collapses the whitespace scars left by fragment removal.
fn tidy(text: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut blank_run = 0;
    for line in text.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push(line.trim_end());
    }
    out.join("\n").trim().to_string()
}
