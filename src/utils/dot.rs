//! Helpers for emitting Graphviz DOT text.

/// Escapes a string for use inside a quoted DOT label.
///
/// Quotes, backslashes and angle brackets are escaped, line breaks become the
/// centered `\n` escape and carriage returns are dropped.
///
/// ```rust,ignore
/// use vmopt::utils::escape_dot;
///
/// assert_eq!(escape_dot("v3 = Phi<v1, v2>"), "v3 = Phi\\<v1, v2\\>");
/// ```
#[must_use]
pub fn escape_dot(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            '<' => out.push_str("\\<"),
            '>' => out.push_str("\\>"),
            '{' => out.push_str("\\{"),
            '}' => out.push_str("\\}"),
            _ => out.push(c),
        }
    }
    out
}
