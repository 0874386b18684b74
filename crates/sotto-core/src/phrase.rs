//! Phrase normalization and panic-phrase detection

/// Built-in panic phrases. A transcription containing any of these wipes
/// every active session before any authentication is attempted.
pub const PANIC_PHRASES: &[&str] = &["panic mode", "emergency wipe", "burn everything"];

/// Normalize a transcription for matching: lowercase, punctuation stripped,
/// whitespace collapsed. Returns the empty string for silence.
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Check an already-normalized phrase against the built-in panic phrases
/// plus any configured extras. Substring match, so surrounding speech does
/// not defeat detection.
pub fn is_panic_phrase(normalized: &str, extra: &[String]) -> bool {
    if normalized.is_empty() {
        return false;
    }
    PANIC_PHRASES.iter().any(|p| normalized.contains(p))
        || extra.iter().any(|p| {
            let p = normalize(p);
            !p.is_empty() && normalized.contains(&p)
        })
}
