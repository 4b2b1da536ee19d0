//! Shared text munging: entity decode/encode, invisible-character stripping,
//! bounded previews.

/// Characters Gmail bodies are routinely padded with that carry no content:
/// combining grapheme joiner, zero-width non-joiner, BOM/zero-width no-break.
const INVISIBLE_CHARS: [char; 3] = ['\u{034f}', '\u{200c}', '\u{feff}'];

/// Decode the handful of HTML entities that show up in mail text.
/// `&amp;` is handled last so `&amp;lt;` decodes to `&lt;`, not `<`.
pub fn decode_html_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

/// Simple HTML escape for user-generated content.
pub fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// Unescape entities, drop invisible padding characters, trim whitespace.
pub fn clean_text(text: &str) -> String {
    let unescaped = decode_html_entities(text);
    let stripped: String = unescaped
        .chars()
        .filter(|c| !INVISIBLE_CHARS.contains(c))
        .collect();
    stripped.trim().to_string()
}

/// Truncate to at most `max_chars` characters, never splitting a code point.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
