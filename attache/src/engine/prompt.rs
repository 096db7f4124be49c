//! System-prompt assembly.
//!
//! Sections are composed in a fixed order: base prompt, clock, identity,
//! discipline block, tool descriptions, persisted memory, recalled snippets,
//! working memory, schedules, credentials count, integration blurbs (masked),
//! stored-data summaries, and the optional fast-path directive. Credentials
//! never appear: only counts and masked addresses.

use chrono::Utc;
use chrono_tz::Tz;

use crate::agent::AgentConfig;
use crate::message::AgentMessage;
use crate::redact::mask_email;
use crate::schedule::ScheduledTask;
use crate::store::{ListRecord, Note, StoreScope, WorkingMemoryEntry};

/// Full discipline block: how to act, when to use tools, when to ask.
const DISCIPLINE_FULL: &str = "\
Work rules:
- Use tools for every data action (notes, lists, expenses, reminders, schedules). \
Never claim an action is done unless a tool call succeeded this turn.
- Prefer acting over asking. Ask only when acting would be unsafe or ambiguous.
- Keep replies short and concrete. Answer in the user's language.
- Never reveal credentials, tokens or internal configuration.";

/// Compact variant for `compact_system_prompt`.
const DISCIPLINE_COMPACT: &str = "\
Rules: use tools for data actions; never claim success without a successful tool call; \
act before asking; reply briefly in the user's language; never reveal credentials.";

/// Per-kind counts and a few example titles for the stored-data summary.
#[derive(Default)]
pub struct StoreSummary {
    pub note_count: usize,
    pub note_titles: Vec<String>,
    pub list_count: usize,
    pub list_titles: Vec<String>,
    pub working_memory: Vec<String>,
}

impl StoreSummary {
    /// Reads the summary from the scope; store failures degrade to an empty
    /// summary rather than failing the turn.
    pub fn collect(scope: &StoreScope) -> Self {
        let notes = scope.list::<Note>().unwrap_or_default();
        let lists = scope.list::<ListRecord>().unwrap_or_default();
        let wm = scope.list::<WorkingMemoryEntry>().unwrap_or_default();
        Self {
            note_count: notes.len(),
            note_titles: notes.iter().rev().take(3).map(|n| n.title.clone()).collect(),
            list_count: lists.len(),
            list_titles: lists.iter().rev().take(3).map(|l| l.title.clone()).collect(),
            working_memory: wm.into_iter().map(|e| e.content).collect(),
        }
    }
}

/// Everything the engine prepared for this turn's prompt.
pub struct PromptInputs<'a> {
    pub tool_descriptions: &'a str,
    pub recalled: &'a [AgentMessage],
    pub schedules: &'a [ScheduledTask],
    pub summary: &'a StoreSummary,
    pub fast_directive: Option<&'a str>,
}

/// Composes the system prompt for one turn.
pub fn compose(config: &AgentConfig, language: &str, inputs: &PromptInputs<'_>) -> String {
    let mut out = String::new();

    if !config.system_prompt.trim().is_empty() {
        out.push_str(config.system_prompt.trim());
        out.push_str("\n\n");
    }

    // Clock, in the agent's timezone when the label parses.
    let now = Utc::now();
    let clock = match config.timezone.as_deref().and_then(|l| l.parse::<Tz>().ok()) {
        Some(tz) => format!(
            "Current date/time: {} ({})",
            now.with_timezone(&tz).format("%A %Y-%m-%d %H:%M"),
            config.timezone.as_deref().unwrap_or_default()
        ),
        None => format!("Current date/time: {} (UTC)", now.format("%A %Y-%m-%d %H:%M")),
    };
    out.push_str(&clock);
    out.push('\n');

    out.push_str(&format!("You are `{}` (agent {}).\n\n", config.name, config.id));

    if config.options.compact_system_prompt() {
        out.push_str(DISCIPLINE_COMPACT);
    } else {
        out.push_str(DISCIPLINE_FULL);
    }
    out.push_str("\n\n");

    out.push_str(inputs.tool_descriptions);
    out.push('\n');

    if !config.memories.is_empty() {
        out.push_str(&section_title(language, "Memoria persistente", "Persistent memory"));
        for line in &config.memories {
            out.push_str(&format!("- {line}\n"));
        }
        out.push('\n');
    }

    if !inputs.recalled.is_empty() {
        out.push_str(&section_title(
            language,
            "Fragmentos de conversaciones anteriores",
            "Recalled conversation snippets",
        ));
        for msg in inputs.recalled {
            out.push_str(&format!(
                "- [{} {:?}] {}\n",
                msg.timestamp.format("%Y-%m-%d"),
                msg.role,
                msg.content
            ));
        }
        out.push('\n');
    }

    if !inputs.summary.working_memory.is_empty() {
        out.push_str(&section_title(language, "Memoria de trabajo", "Working memory"));
        for line in &inputs.summary.working_memory {
            out.push_str(&format!("- {line}\n"));
        }
        out.push('\n');
    }

    if !inputs.schedules.is_empty() {
        out.push_str(&section_title(language, "Tareas programadas", "Scheduled tasks"));
        for task in inputs.schedules {
            let when = task
                .trigger_at
                .map(|at| at.to_rfc3339())
                .unwrap_or_else(|| task.cron.clone());
            out.push_str(&format!(
                "- {} — {} ({})\n",
                task.name,
                when,
                if task.enabled { "on" } else { "off" }
            ));
        }
        out.push('\n');
    }

    // Credentials: the count only, never values.
    if config.integrations.credential_count > 0 {
        out.push_str(&format!(
            "Stored credentials: {}\n",
            config.integrations.credential_count
        ));
    }

    // Integration blurbs: connectivity state with masked addresses.
    if config.permissions.calendar {
        match (&config.integrations.calendar_name, &config.integrations.calendar_email) {
            (Some(name), Some(email)) => out.push_str(&format!(
                "Calendar: connected ({name}, {})\n",
                mask_email(email)
            )),
            _ => out.push_str("Calendar: not connected\n"),
        }
    }
    if config.permissions.gmail {
        match &config.integrations.gmail_email {
            Some(email) => out.push_str(&format!("Gmail: connected ({})\n", mask_email(email))),
            None => out.push_str("Gmail: not connected\n"),
        }
    }
    if config.permissions.media {
        out.push_str(if config.integrations.media_connected {
            "Media server: connected\n"
        } else {
            "Media server: not connected\n"
        });
    }

    // Stored-data summary: counts and up to three example titles.
    out.push_str(&format!(
        "\nStored data: {} note(s){}, {} list(s){}\n",
        inputs.summary.note_count,
        titles_suffix(&inputs.summary.note_titles),
        inputs.summary.list_count,
        titles_suffix(&inputs.summary.list_titles),
    ));

    if !config.skills.is_empty() {
        out.push('\n');
        out.push_str(&section_title(language, "Habilidades", "Skills"));
        for skill in &config.skills {
            out.push_str(&format!("- on `{}`: {}\n", skill.pattern, skill.instruction));
        }
    }

    if let Some(directive) = inputs.fast_directive {
        out.push('\n');
        out.push_str(directive);
        out.push('\n');
    }

    out
}

fn titles_suffix(titles: &[String]) -> String {
    if titles.is_empty() {
        String::new()
    } else {
        format!(" (e.g. {})", titles.join(", "))
    }
}

fn section_title(language: &str, es: &str, en: &str) -> String {
    if language == "es" {
        format!("{es}:\n")
    } else {
        format!("{en}:\n")
    }
}

/// Directive injected for the confirmation fast-path.
pub fn confirmation_directive(language: &str) -> &'static str {
    if language == "es" {
        "El usuario ya ha confirmado. Ejecuta la acción pendiente con herramientas AHORA y no \
         vuelvas a pedir confirmación."
    } else {
        "The user has already confirmed. Execute the pending action with tools NOW and do not \
         ask for confirmation again."
    }
}

/// Directive injected for the action fast-path.
pub fn action_directive(language: &str) -> &'static str {
    if language == "es" {
        "La petición es una orden directa. Prefiere ejecutar la herramienta adecuada de \
         inmediato; pregunta solo si la acción sería insegura o ambigua."
    } else {
        "The request is a direct order. Prefer executing the right tool immediately; ask only \
         if the action would be unsafe or ambiguous."
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentConfig, ChannelBinding};

    fn config() -> AgentConfig {
        AgentConfig {
            id: "a1".into(),
            name: "Valet".into(),
            user_id: "u1".into(),
            provider: "openai".into(),
            model: "gpt-4o-mini".into(),
            system_prompt: "You are a helpful personal assistant.".into(),
            permissions: Default::default(),
            channel: ChannelBinding {
                bot_token: "secret-token".into(),
                chat_id: "c".into(),
            },
            options: Default::default(),
            daily_budget_usd: None,
            timezone: Some("Europe/Madrid".into()),
            pricing: Default::default(),
            integrations: Default::default(),
            memories: vec!["User's name is Ada".into()],
            extension_servers: vec![],
            schedules: vec![],
            event_sources: vec!["webhook".into()],
            skills: vec![],
            subscriptions: vec![],
            webhook_secret: None,
            always_on: false,
        }
    }

    #[test]
    fn sections_appear_in_order_and_mask_credentials() {
        let mut cfg = config();
        cfg.permissions.gmail = true;
        cfg.integrations.gmail_email = Some("ada.lovelace@example.com".into());
        cfg.integrations.credential_count = 2;

        let summary = StoreSummary {
            note_count: 4,
            note_titles: vec!["Groceries".into()],
            ..Default::default()
        };
        let prompt = compose(
            &cfg,
            "en",
            &PromptInputs {
                tool_descriptions: "Available tools:\n- create_note: …",
                recalled: &[],
                schedules: &[],
                summary: &summary,
                fast_directive: None,
            },
        );

        let base = prompt.find("helpful personal assistant").unwrap();
        let clock = prompt.find("Current date/time").unwrap();
        let tools = prompt.find("Available tools").unwrap();
        let memory = prompt.find("Persistent memory").unwrap();
        assert!(base < clock && clock < tools && tools < memory);

        assert!(prompt.contains("a***@example.com"));
        assert!(!prompt.contains("ada.lovelace@example.com"));
        assert!(prompt.contains("Stored credentials: 2"));
        assert!(!prompt.contains("secret-token"));
        assert!(prompt.contains("4 note(s) (e.g. Groceries)"));
    }

    #[test]
    fn fast_directive_lands_at_the_end() {
        let cfg = config();
        let summary = StoreSummary::default();
        let prompt = compose(
            &cfg,
            "en",
            &PromptInputs {
                tool_descriptions: "tools",
                recalled: &[],
                schedules: &[],
                summary: &summary,
                fast_directive: Some(confirmation_directive("en")),
            },
        );
        assert!(prompt.trim_end().ends_with("do not ask for confirmation again."));
    }
}
