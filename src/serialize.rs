//! Escaping for JSON embedded in HTML.
//!
//! - Attribute payloads (`data-props`)
//! - Inline `<script type="application/json">` payloads
//! - Plain HTML attribute and text escaping for the document shell

use std::fmt::Write;

use serde::Serialize;

// ---------------------------------------------------------------------------
// JSON Payload Escaping
// ---------------------------------------------------------------------------

/// Characters rewritten for attribute payloads.
const ATTRIBUTE_ESCAPES: [char; 5] = ['&', '<', '>', '"', '\''];

/// Characters rewritten for inline script payloads.
const SCRIPT_ESCAPES: [char; 3] = ['&', '<', '>'];

/// JSON-encode `value` for a quoted HTML attribute.
///
/// `&`, `<`, `>`, `"` and `'` become JSON unicode escapes, so the result can
/// sit inside either quote style without closing the attribute or the tag.
/// Escaped backslashes inside strings are spelled `\u005c`, which keeps
/// every quote escape unambiguous for [`unescape_unicode`]. `None` encodes
/// as `null`.
pub fn serialize_for_attribute<T: Serialize + ?Sized>(
    value: &T,
) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(value)?;
    let mut out = String::with_capacity(json.len() + 16);
    let mut chars = json.chars();

    while let Some(c) = chars.next() {
        match c {
            // serde_json only emits a backslash as the first half of an escape.
            '\\' => match chars.next() {
                Some('\\') => push_unicode_escape(&mut out, '\\'),
                Some('"') => {
                    out.push('\\');
                    push_unicode_escape(&mut out, '"');
                }
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            },
            c if ATTRIBUTE_ESCAPES.contains(&c) => push_unicode_escape(&mut out, c),
            c => out.push(c),
        }
    }

    Ok(out)
}

/// Escape a JSON document for an inline `<script>` element.
///
/// Only `&`, `<` and `>` are rewritten. Those can only occur inside JSON
/// strings, where the unicode escape is an equivalent spelling, so the
/// output stays valid JSON and can never contain `</script>`.
pub fn escape_for_inline_script(json: &str) -> String {
    let mut out = String::with_capacity(json.len() + 16);
    for c in json.chars() {
        if SCRIPT_ESCAPES.contains(&c) {
            push_unicode_escape(&mut out, c);
        } else {
            out.push(c);
        }
    }
    out
}

/// Turn attribute or script payload text back into plain JSON.
///
/// Rewrites the five escapes listed in [`serialize_for_attribute`] and
/// leaves every other escape for the JSON parser.
pub fn unescape_unicode(escaped: &str) -> String {
    let mut out = String::with_capacity(escaped.len());
    let mut rest = escaped;

    while let Some(pos) = rest.find('\\') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        let decoded = tail
            .strip_prefix("\\u")
            .and_then(|hex| hex.get(..4))
            .and_then(decode_escape);

        match decoded {
            Some(ch) => {
                out.push(ch);
                rest = &tail[6..];
            }
            None => {
                out.push('\\');
                rest = &tail[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

fn push_unicode_escape(out: &mut String, c: char) {
    // Writing to a String cannot fail.
    let _ = write!(out, "\\u{:04x}", c as u32);
}

fn decode_escape(hex: &str) -> Option<char> {
    let code = u32::from_str_radix(hex, 16).ok()?;
    let ch = char::from_u32(code)?;
    ATTRIBUTE_ESCAPES.contains(&ch).then_some(ch)
}

// ---------------------------------------------------------------------------
// HTML Escaping
// ---------------------------------------------------------------------------

/// Escape a string for a double- or single-quoted HTML attribute value.
pub fn escape_html_attribute(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 16);
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Escape a string for HTML text content.
pub fn escape_html_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 16);
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
