//! Heuristics: language detection, fast-path triggers, and the
//! anti-hallucination guard.
//!
//! All matching is bilingual (EN/ES) and intentionally cheap: lowercase
//! substring and word lists, no model calls.

/// ES markers beat EN markers on a tie.
pub fn detect_language(samples: &[&str]) -> &'static str {
    const ES: &[&str] = &[
        "hola", "gracias", "por favor", "según", "también", "añade", "recuérdame", "mañana",
        "lista", "nota", "gasto", "eres", "responde", "siempre", "usuario", "castellano",
        "español",
    ];
    const EN: &[&str] = &[
        "hello", "please", "thanks", "remember", "tomorrow", "always", "answer", "you are",
        "assistant", "respond", "english", "the user",
    ];
    let text = samples.join(" ").to_lowercase();
    let es = ES.iter().filter(|m| text.contains(*m)).count();
    let en = EN.iter().filter(|m| text.contains(*m)).count();
    if es >= en {
        "es"
    } else {
        "en"
    }
}

/// Imperative data-action verbs that trigger the action fast-path.
pub fn is_action_request(text: &str) -> bool {
    const VERBS: &[&str] = &[
        "add ", "create ", "delete ", "remove ", "schedule ", "remind ", "set ", "update ",
        "save ", "record ", "cancel ", "añade ", "agrega ", "crea ", "borra ", "elimina ",
        "recuérdame ", "recuerdame ", "apunta ", "guarda ", "pon ", "programa ", "cancela ",
        "actualiza ",
    ];
    let t = normalize(text);
    VERBS.iter().any(|v| t.starts_with(v) || t.contains(&format!(" {v}")))
}

/// Future-tense execution promises ("I'll add it", "voy a crearlo").
pub fn promises_execution(text: &str) -> bool {
    const MARKERS: &[&str] = &[
        "i'll ", "i will ", "let me ", "i'm going to ", "im going to ", "going to add",
        "voy a ", "ahora mismo ", "en seguida ", "enseguida ", "lo haré", "lo hare",
        "procedo a ",
    ];
    let t = normalize(text);
    MARKERS.iter().any(|m| t.contains(m))
}

/// Past-tense claims of a completed data action in a known domain.
pub fn claims_completed_action(text: &str) -> bool {
    const CLAIMS: &[&str] = &[
        "i've added", "i have added", "added", "created", "deleted", "removed", "updated",
        "saved", "scheduled", "set a reminder", "recorded", "he añadido", "he anadido",
        "añadido", "anadido", "creado", "borrado", "eliminado", "actualizado", "guardado",
        "programado", "apuntado", "registrado", "listo, ",
    ];
    const DOMAINS: &[&str] = &[
        "calendar", "event", "note", "list", "expense", "reminder", "schedule", "calendario",
        "evento", "nota", "lista", "gasto", "recordatorio", "tarea",
    ];
    let t = normalize(text);
    CLAIMS.iter().any(|c| t.contains(c)) && DOMAINS.iter().any(|d| t.contains(d))
}

/// Confirmation questions ("Do you confirm?", "¿Quieres que lo haga?").
pub fn asks_confirmation(text: &str) -> bool {
    const MARKERS: &[&str] = &[
        "do you confirm", "confirm?", "should i ", "do you want me to", "shall i ",
        "would you like me to", "confirmas", "¿confirmas", "quieres que", "¿quieres que",
        "deseas que", "te parece bien", "procedo?", "lo confirmas",
    ];
    let t = normalize(text);
    MARKERS.iter().any(|m| t.contains(m))
}

/// Affirmative lexicon driving the confirmation fast-path.
pub fn is_affirmative(text: &str) -> bool {
    const WORDS: &[&str] = &[
        "yes", "yep", "yeah", "sure", "ok", "okay", "confirm", "confirmed", "do it",
        "go ahead", "sí", "si", "dale", "claro", "hazlo", "confirmo", "adelante", "vale",
        "venga", "correcto", "exacto",
    ];
    let t = normalize(text);
    let t = t.trim_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace());
    WORDS.contains(&t)
        || WORDS
            .iter()
            .any(|w| t.starts_with(&format!("{w} ")) || t.starts_with(&format!("{w},")))
}

/// Corrective tool_result injected when the guard fires.
pub fn corrective_instruction(lang: &str) -> String {
    if lang == "es" {
        "No se ha ejecutado ninguna herramienta. No afirmes que la acción está hecha ni vuelvas a \
         pedir confirmación: llama AHORA a la herramienta correcta con los datos del usuario."
            .to_string()
    } else {
        "No tool has been executed. Do not claim the action is done and do not ask for \
         confirmation again: call the correct tool NOW with the user's data."
            .to_string()
    }
}

/// Removes a trailing re-confirmation question from fast-path replies.
pub fn trim_confirmation_followup(text: &str) -> String {
    let trimmed = text.trim_end();
    if let Some(pos) = trimmed.rfind(['.', '!', '\n']) {
        let tail = &trimmed[pos + 1..];
        if tail.trim_end().ends_with('?') && asks_confirmation(tail) {
            return trimmed[..=pos].trim().to_string();
        }
    }
    trimmed.to_string()
}

fn normalize(text: &str) -> String {
    text.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_detection_with_es_tiebreak() {
        assert_eq!(detect_language(&["Eres un asistente, responde siempre en español"]), "es");
        assert_eq!(detect_language(&["You are a helpful assistant, answer the user"]), "en");
        assert_eq!(detect_language(&["x"]), "es");
    }

    #[test]
    fn action_requests() {
        assert!(is_action_request("Add eggs to the shopping list"));
        assert!(is_action_request("añade huevos a la lista"));
        assert!(!is_action_request("what's on my list?"));
    }

    #[test]
    fn execution_promises() {
        assert!(promises_execution("I'll add eggs right away"));
        assert!(promises_execution("Voy a crear la nota"));
        assert!(!promises_execution("The eggs are on the list"));
    }

    #[test]
    fn completed_claims_require_domain() {
        assert!(claims_completed_action("I've added eggs to your shopping list"));
        assert!(claims_completed_action("He añadido el gasto"));
        assert!(!claims_completed_action("I've added some thoughts"));
    }

    #[test]
    fn confirmation_questions_and_affirmatives() {
        assert!(asks_confirmation("Do you confirm?"));
        assert!(asks_confirmation("¿Quieres que lo borre?"));
        assert!(is_affirmative("yes"));
        assert!(is_affirmative("sí, adelante"));
        assert!(!is_affirmative("what do you mean"));
    }

    #[test]
    fn followup_trimming_cuts_re_asking() {
        let text = "Done, the note is created. Do you want me to add anything else, confirm?";
        let out = trim_confirmation_followup(text);
        assert_eq!(out, "Done, the note is created.");
        // Text without a trailing confirmation survives untouched.
        assert_eq!(trim_confirmation_followup("All set."), "All set.");
    }
}
