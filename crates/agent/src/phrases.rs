//! End-of-call phrase detection

/// Case-insensitive containment match of any configured phrase against
/// the transcribed user text. Containment means "the good bye song"
/// matches a "good bye" phrase; phrase lists should be chosen with that
/// in mind.
pub fn matches_end_phrase(phrases: &[String], text: &str) -> bool {
    if text.is_empty() {
        return false;
    }
    let lowered = text.to_lowercase();
    phrases
        .iter()
        .filter(|p| !p.is_empty())
        .any(|p| lowered.contains(&p.to_lowercase()))
}
