//! Small shared helpers.

/// Truncate a string to at most `max_chars` characters, appending "..."
/// when something was cut. Works on char boundaries so multi-byte UTF-8
/// in provider error bodies never panics.
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", s[..idx].trim_end()),
        None => s.to_string(),
    }
}
