//! The substitution primitive and its escaping rules.
//!
//! [`splice_all`] replaces every occurrence of a needle, interpreting two
//! control sequences in the replacement text: `\x` inserts `x` literally and
//! a bare `&` inserts the matched text. Values headed into a template must
//! therefore pass through [`escape_replacement`] first; a URL like
//! `http://host/a?b&c` would otherwise come out mangled.

/// Escape a value so [`splice_all`] reproduces it byte for byte.
///
/// Backslashes are escaped before `&`: each character is handled in one
/// pass, so the backslash introduced for an `&` is never itself re-escaped.
pub fn escape_replacement(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str(r"\\"),
            '&' => out.push_str(r"\&"),
            _ => out.push(c),
        }
    }
    out
}

/// Replace every occurrence of `needle` in `text` with `replacement`,
/// honoring the escape sequences described in the module docs.
pub fn splice_all(text: &str, needle: &str, replacement: &str) -> String {
    if needle.is_empty() {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(idx) = rest.find(needle) {
        out.push_str(&rest[..idx]);
        expand_into(&mut out, replacement, needle);
        rest = &rest[idx + needle.len()..];
    }
    out.push_str(rest);
    out
}

/// Expand one replacement, resolving `\x` and `&`.
fn expand_into(out: &mut String, replacement: &str, matched: &str) {
    let mut chars = replacement.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(next) => out.push(next),
                // A trailing lone backslash stands for itself.
                None => out.push('\\'),
            },
            '&' => out.push_str(matched),
            c => out.push(c),
        }
    }
}
