//! Pull the first well-formed JSON object out of free-form model text.
//!
//! Oracle replies wrap their JSON in prose, markdown fences or both. Callers get either a
//! parsed object or `None`; there is no fallback guess.

use serde_json::{Map, Value};

/// Returns the first balanced `{...}` span that parses as a JSON object.
///
/// Braces inside string literals are ignored. A balanced span that fails to parse is
/// skipped and the scan resumes after its opening brace, so a stray `{note}` in prose does
/// not hide a real object later in the text. An opening brace that is never closed ends
/// the scan: a truncated object never yields one of its nested members.
pub fn first_json_object(text: &str) -> Option<Map<String, Value>> {
    let bytes = text.as_bytes();
    let mut start = 0;
    while let Some(offset) = text[start..].find('{') {
        let open = start + offset;
        // Everything after an unclosed brace sits inside it.
        let close = matching_brace(bytes, open)?;
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&text[open..=close]) {
            return Some(map);
        }
        start = open + 1;
    }
    None
}

fn matching_brace(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Reads `key` as an integer, accepting integral floats (`87.0`) but nothing fractional.
pub fn integer_field(object: &Map<String, Value>, key: &str) -> Option<i64> {
    match object.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.is_finite())
                .map(|f| f as i64)
        }),
        _ => None,
    }
}
