//! Named bind placeholders.
//!
//! Statements refer to bound parameters as `$name`. Drivers want positional
//! markers, so [`rewrite_named`] replaces each known `$name` with `$1`, `?1`,
//! etc., and reports which parameter fills each position.
//!
//! Quoted strings, quoted identifiers, comments and dollar-quoted bodies are
//! copied through untouched. Unknown `$words` are left for the backend.

/// Positional marker syntax of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `$1`, `$2`, ... (Postgres)
    Dollar,
    /// `?1`, `?2`, ... (SQLite)
    QuestionNumbered,
}

impl PlaceholderStyle {
    fn marker(self, position: usize) -> String {
        match self {
            PlaceholderStyle::Dollar => format!("${position}"),
            PlaceholderStyle::QuestionNumbered => format!("?{position}"),
        }
    }
}

/// A statement rewritten to positional markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionalStatement {
    pub sql: String,
    /// Parameter name for each position, starting at position 1.
    pub order: Vec<String>,
}

/// Rewrite every `$name` whose name is in `names` to a positional marker.
/// Repeated names share a position.
pub fn rewrite_named(statement: &str, names: &[&str], style: PlaceholderStyle) -> PositionalStatement {
    let bytes = statement.as_bytes();
    let mut sql = String::with_capacity(statement.len());
    let mut order: Vec<String> = Vec::new();
    let mut copied = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"') => i = skip_past(bytes, i + 1, &[quote]),
            b'-' if bytes.get(i + 1) == Some(&b'-') => i = skip_past(bytes, i + 2, b"\n"),
            b'/' if bytes.get(i + 1) == Some(&b'*') => i = skip_past(bytes, i + 2, b"*/"),
            b'$' => {
                let start = i + 1;
                let end = ident_end(bytes, start);
                if end > start && bytes.get(end) == Some(&b'$') {
                    // $tag$ ... $tag$
                    i = skip_past(bytes, end + 1, &bytes[i..=end]);
                } else if end == start && bytes.get(start) == Some(&b'$') {
                    i = skip_past(bytes, start + 1, b"$$");
                } else if end > start && names.contains(&&statement[start..end]) {
                    let name = &statement[start..end];
                    let position = match order.iter().position(|n| n == name) {
                        Some(index) => index + 1,
                        None => {
                            order.push(name.to_string());
                            order.len()
                        }
                    };
                    sql.push_str(&statement[copied..i]);
                    sql.push_str(&style.marker(position));
                    copied = end;
                    i = end;
                } else {
                    i = end.max(start);
                }
            }
            _ => i += 1,
        }
    }
    sql.push_str(&statement[copied..]);

    PositionalStatement { sql, order }
}

/// Index just past the next `terminator` at or after `from`, or the end.
fn skip_past(bytes: &[u8], from: usize, terminator: &[u8]) -> usize {
    if from >= bytes.len() {
        return bytes.len();
    }
    bytes[from..]
        .windows(terminator.len())
        .position(|window| window == terminator)
        .map_or(bytes.len(), |offset| from + offset + terminator.len())
}

fn ident_end(bytes: &[u8], start: usize) -> usize {
    match bytes.get(start) {
        Some(b) if b.is_ascii_alphabetic() || *b == b'_' => {}
        _ => return start,
    }
    let mut end = start + 1;
    while bytes
        .get(end)
        .is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'_')
    {
        end += 1;
    }
    end
}
