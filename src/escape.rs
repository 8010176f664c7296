//! Escaping of text payloads for embedding into double-quoted script literals.
//!
//! The composed render script embeds CSS, body markup and the output path into
//! `"..."` literals that may span several physical lines through backslash
//! line continuations. [`escape`] maps arbitrary text into a form that can be
//! pasted between the quotes without closing the literal early or changing
//! what the host decodes.
//!
//! | Input                | Output                                   |
//! |----------------------|------------------------------------------|
//! | `\`                  | `\\`                                     |
//! | `"`                  | `\"`                                     |
//! | LF                   | `\n\` then a physical LF (continuation)  |
//! | CR                   | `\r`                                     |
//! | U+2028 / U+2029      | `\u2028` / `\u2029`                      |
//! | `</` (opt-in only)   | `<\/`                                    |
//!
//! Escaping is single pass: escaping an already escaped fragment escapes it
//! again.

use std::fmt;

/// Knobs for [`escape_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EscapeOptions {
    /// Rewrite `</` as `<\/` so the composed script can itself be placed
    /// inside a `<script>` element. The decoded value is unchanged.
    pub neutralize_closing_tags: bool,
}

/// Text that is safe to place between the quotes of a script string literal.
///
/// Only produced by this module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EscapedFragment(String);

impl EscapedFragment {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for EscapedFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EscapedFragment {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Escape `text` with default options.
pub fn escape(text: &str) -> EscapedFragment {
    escape_with(text, EscapeOptions::default())
}

/// Escape optional content; `None` yields an empty fragment.
pub fn escape_opt(text: Option<&str>) -> EscapedFragment {
    text.map(escape).unwrap_or_default()
}

/// Escape `text` for a double-quoted, backslash-continued literal.
pub fn escape_with(text: &str, options: EscapeOptions) -> EscapedFragment {
    let mut out = String::with_capacity(text.len() + text.len() / 8);
    let mut prev = '\0';
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n\\\n"),
            '\r' => out.push_str("\\r"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            '/' if options.neutralize_closing_tags && prev == '<' => out.push_str("\\/"),
            c => out.push(c),
        }
        prev = ch;
    }
    EscapedFragment(out)
}
