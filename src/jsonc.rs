// src/jsonc.rs
//
// Hand-rolled JSONC support. Config and account files carry comments that a
// human operator writes and expects to survive round-trips (spec.md §4.1),
// so this is not a crate-parse-and-discard job: `strip_comments` feeds
// serde_json, while `set_account_enabled` rewrites one field of the raw text
// in place without disturbing anything else the operator wrote.

use std::fmt;

#[derive(Debug)]
pub struct JsoncError {
    pub message: String,
}

impl fmt::Display for JsoncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for JsoncError {}

/// Strips `//` and `/* */` comments (outside of string literals) and
/// trailing commas before array/object closers, producing plain JSON text
/// suitable for `serde_json::from_str`.
pub fn strip_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let bytes: Vec<char> = input.chars().collect();
    let mut i = 0;
    let mut in_string = false;
    let mut escape = false;

    while i < bytes.len() {
        let c = bytes[i];

        if in_string {
            out.push(c);
            if escape {
                escape = false;
            } else if c == '\\' {
                escape = true;
            } else if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
                i += 1;
            }
            '/' if bytes.get(i + 1) == Some(&'/') => {
                while i < bytes.len() && bytes[i] != '\n' {
                    i += 1;
                }
            }
            '/' if bytes.get(i + 1) == Some(&'*') => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == '*' && bytes[i + 1] == '/') {
                    i += 1;
                }
                i += 2;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    strip_trailing_commas(&out)
}

fn strip_trailing_commas(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    let mut in_string = false;
    let mut escape = false;

    while i < chars.len() {
        let c = chars[i];
        if in_string {
            out.push(c);
            if escape {
                escape = false;
            } else if c == '\\' {
                escape = true;
            } else if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        if c == '"' {
            in_string = true;
            out.push(c);
            i += 1;
            continue;
        }
        if c == ',' {
            // Look ahead past whitespace for a closer; if found, drop the comma.
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && (chars[j] == '}' || chars[j] == ']') {
                i += 1;
                continue;
            }
        }
        out.push(c);
        i += 1;
    }
    out
}

/// Parses JSONC text into a `serde_json::Value`.
pub fn parse(input: &str) -> Result<serde_json::Value, JsoncError> {
    let stripped = strip_comments(input);
    serde_json::from_str(&stripped).map_err(|e| JsoncError { message: format!("{e}") })
}

/// Rewrites `"enabled": <bool>` for the account object whose `"email"` field
/// matches `email`, in the raw source text, leaving every comment, every
/// other field, and all formatting untouched. Used by the account-disabler
/// to mark a banned account without clobbering operator annotations.
///
/// This is a textual patch, not a parse-mutate-reserialize round trip: the
/// account array's object boundaries are found by brace-depth tracking over
/// the original bytes, and only the matched object's `enabled` value (or a
/// freshly inserted one) is replaced.
pub fn set_account_enabled(source: &str, email: &str, enabled: bool) -> Result<String, JsoncError> {
    set_account_enabled_with_comment(source, email, enabled, None)
}

/// Same as [`set_account_enabled`], but when `ban_comment` is `Some`, also
/// inserts that text as a `//`-prefixed line immediately before the account
/// object — used by the ban detector to leave a `BANNED <date>: <reason>`
/// trail (spec.md §4.9/§6) without disturbing any other entry.
pub fn set_account_enabled_with_comment(
    source: &str,
    email: &str,
    enabled: bool,
    ban_comment: Option<&str>,
) -> Result<String, JsoncError> {
    let needle = format!("\"{email}\"");
    let email_pos = find_outside_strings_and_comments(source, &needle).ok_or_else(|| JsoncError {
        message: format!("account with email {email} not found in source"),
    })?;

    let obj_start = find_enclosing_brace_start(source, email_pos)?;
    let obj_end = find_matching_brace_end(source, obj_start)?;
    let object_text = &source[obj_start..=obj_end];

    let patched_object = patch_enabled_field(object_text, enabled);

    let line_start = source[..obj_start].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let indent = &source[line_start..obj_start];

    let mut result = String::with_capacity(source.len() + 64);
    if let Some(comment) = ban_comment {
        if indent.trim().is_empty() {
            // obj_start begins its own line: write the BANNED note as a
            // standalone `//` line above it, matching the object's indent.
            result.push_str(&source[..line_start]);
            result.push_str(indent);
            result.push_str("// ");
            result.push_str(comment);
            result.push('\n');
            result.push_str(indent);
        } else {
            // Object shares a line with other text; a `//` line comment
            // would swallow the rest of that line, so use a block comment
            // that can't escape past the object it annotates.
            result.push_str(&source[..obj_start]);
            result.push_str("/* ");
            result.push_str(comment);
            result.push_str(" */ ");
        }
    } else {
        result.push_str(&source[..obj_start]);
    }
    result.push_str(&patched_object);
    result.push_str(&source[obj_end + 1..]);
    Ok(result)
}

fn patch_enabled_field(object_text: &str, enabled: bool) -> String {
    if let Some(rel) = find_outside_strings_and_comments(object_text, "\"enabled\"") {
        // Find the colon, then the value token, then replace up to the next
        // structural delimiter (comma, brace) outside of strings/comments.
        let after_key = rel + "\"enabled\"".len();
        let colon_rel = object_text[after_key..].find(':').unwrap_or(0) + after_key;
        let value_start = colon_rel + 1;
        let rest = &object_text[value_start..];
        let value_len = rest
            .find(|c: char| c == ',' || c == '}')
            .unwrap_or(rest.len());
        let mut out = String::with_capacity(object_text.len());
        out.push_str(&object_text[..value_start]);
        out.push(' ');
        out.push_str(if enabled { "true" } else { "false" });
        out.push_str(&object_text[value_start + value_len..]);
        out
    } else {
        // No existing field: insert right after the opening brace.
        let insert_at = object_text.find('{').map(|i| i + 1).unwrap_or(0);
        let mut out = String::with_capacity(object_text.len() + 24);
        out.push_str(&object_text[..insert_at]);
        out.push_str(&format!(" \"enabled\": {enabled},"));
        out.push_str(&object_text[insert_at..]);
        out
    }
}

fn find_outside_strings_and_comments(haystack: &str, needle: &str) -> Option<usize> {
    let bytes = haystack.as_bytes();
    let needle_bytes = needle.as_bytes();
    let mut in_string = false;
    let mut escape = false;
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if in_string {
            if escape {
                escape = false;
            } else if c == b'\\' {
                escape = true;
            } else if c == b'"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        if c == b'"' {
            in_string = true;
            i += 1;
            continue;
        }
        if c == b'/' && bytes.get(i + 1) == Some(&b'/') {
            while i < bytes.len() && bytes[i] != b'\n' {
                i += 1;
            }
            continue;
        }
        if haystack[i..].as_bytes().starts_with(needle_bytes) {
            return Some(i);
        }
        i += 1;
    }
    None
}

fn find_enclosing_brace_start(source: &str, pos: usize) -> Result<usize, JsoncError> {
    let bytes = source.as_bytes();
    let mut depth: i32 = 0;
    let mut i = pos;
    loop {
        if bytes[i] == b'}' {
            depth += 1;
        } else if bytes[i] == b'{' {
            if depth == 0 {
                return Ok(i);
            }
            depth -= 1;
        }
        if i == 0 {
            break;
        }
        i -= 1;
    }
    Err(JsoncError { message: "no enclosing object found".to_string() })
}

fn find_matching_brace_end(source: &str, start: usize) -> Result<usize, JsoncError> {
    let bytes = source.as_bytes();
    let mut depth: i32 = 0;
    for (offset, &b) in bytes[start..].iter().enumerate() {
        if b == b'{' {
            depth += 1;
        } else if b == b'}' {
            depth -= 1;
            if depth == 0 {
                return Ok(start + offset);
            }
        }
    }
    Err(JsoncError { message: "unterminated object".to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_line_and_block_comments() {
        let input = r#"{
            // a comment
            "a": 1, /* inline */
            "b": "keep // not a comment"
        }"#;
        let stripped = strip_comments(input);
        let v: serde_json::Value = serde_json::from_str(&stripped).unwrap();
        assert_eq!(v["a"], 1);
        assert_eq!(v["b"], "keep // not a comment");
    }

    #[test]
    fn strips_trailing_commas() {
        let input = r#"{"a": [1, 2, 3,], "b": 2,}"#;
        let stripped = strip_comments(input);
        let v: serde_json::Value = serde_json::from_str(&stripped).unwrap();
        assert_eq!(v["a"].as_array().unwrap().len(), 3);
        assert_eq!(v["b"], 2);
    }

    #[test]
    fn set_account_enabled_preserves_comments() {
        let source = r#"{
  "accounts": [
    {
      // primary account
      "email": "a@example.com",
      "password": "pw1",
      "enabled": true
    },
    {
      "email": "b@example.com",
      "password": "pw2",
      "enabled": true
    }
  ]
}"#;
        let patched = set_account_enabled(source, "a@example.com", false).unwrap();
        assert!(patched.contains("// primary account"));
        assert!(patched.contains("\"email\": \"b@example.com\""));
        let v = parse(&patched).unwrap();
        let accounts = v["accounts"].as_array().unwrap();
        assert_eq!(accounts[0]["enabled"], false);
        assert_eq!(accounts[1]["enabled"], true);
    }

    #[test]
    fn set_account_enabled_with_comment_inserts_banned_note() {
        let source = r#"{
  "accounts": [
    {
      "email": "a@example.com",
      "password": "pw1",
      "enabled": true
    }
  ]
}"#;
        let patched =
            set_account_enabled_with_comment(source, "a@example.com", false, Some("BANNED 2026-07-28: hard-ban"))
                .unwrap();
        assert!(patched.contains("// BANNED 2026-07-28: hard-ban"));
        let v = parse(&patched).unwrap();
        assert_eq!(v["accounts"][0]["enabled"], false);
    }

    #[test]
    fn set_account_enabled_inserts_missing_field() {
        let source = r#"{"accounts": [{"email": "a@example.com", "password": "pw1"}]}"#;
        let patched = set_account_enabled(source, "a@example.com", false).unwrap();
        let v = parse(&patched).unwrap();
        assert_eq!(v["accounts"][0]["enabled"], false);
    }
}
