//! Canonical text transformation for clause spans.
//!
//! ## Purpose
//!
//! Clause text reaches the kernel through PDF extraction, OCR and HTML
//! scraping. The same clause arrives with different line breaks, list
//! numbering, typographic quotes and OCR substitutions. Canonical text makes
//! all of those variants byte-identical while leaving every substantive
//! word intact.
//!
//! ## Passes
//!
//! ```text
//! canonicalize(text) = fixpoint(ocr ∘ quotes_and_dashes ∘ strip_prefix ∘ collapse_whitespace)
//! ```
//!
//! 1. `collapse_whitespace`: whitespace and control runs → one space, zero-width
//!    characters and soft hyphens removed, trimmed
//! 2. `strip_prefix`: leading bullets, section numbers, letter and roman markers
//! 3. `quotes_and_dashes`: typographic quotes → ASCII, dash variants → `-`,
//!    ellipsis → `...`, ligatures expanded
//! 4. `ocr`: `l`/`1` and `O`/`0` confusables resolved by token context
//!
//! The pipeline repeats until nothing changes, so the output is always a fixed
//! point. No pass reorders tokens.
//!
//! ## Reserved Characters
//!
//! Canonical text never contains control characters. The identity engine
//! relies on this for its field separator (`U+001F`) and absent-field
//! sentinel (`U+0000`).

use std::sync::OnceLock;

use regex_lite::Regex;


/// Version of the canonical text pass set.
///
/// Increment this when any pass changes. Changes to this version invalidate
/// every stored identity.
pub const CANONICAL_TEXT_VERSION: &str = "1.0.0";

const MAX_FIXPOINT_ROUNDS: usize = 16;

/// Normalize raw clause text to canonical form.
///
/// # Example
///
/// ```rust
/// use obligation_kernel::canonical_text::canonicalize;
///
/// let text = "  1.  The operator  sha1l keep \u{201C}records\u{201D}\r\n";
/// assert_eq!(canonicalize(text), "The operator shall keep \"records\"");
/// ```
pub fn canonicalize(raw: &str) -> String {
    let mut current = run_passes(raw);
    for _ in 0..MAX_FIXPOINT_ROUNDS {
        let next = run_passes(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn run_passes(text: &str) -> String {
    let text = collapse_whitespace(text);
    let text = strip_prefix(&text);
    let text = normalize_quotes_and_dashes(&text);
    normalize_ocr_confusables(&text)
}

/// Whether `c` is dropped outright rather than treated as a separator.
fn is_invisible(c: char) -> bool {
    matches!(
        c,
        '\u{00AD}' | '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}'
    )
}

/// Pass 1: collapse every whitespace or control run into one ASCII space.
pub fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for c in text.chars() {
        if is_invisible(c) {
            continue;
        }
        if c.is_whitespace() || c.is_control() {
            pending_space = true;
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        out.push(c);
    }
    out
}

fn prefix_regex() -> &'static Regex {
    static PREFIX: OnceLock<Regex> = OnceLock::new();
    PREFIX.get_or_init(|| {
        Regex::new(concat!(
            r"^(?:",
            r"[-*•·▪◦‣–—]",
            r"|§+ ?\d+(?:\.\d+)*\.?",
            r"|\(?\d+(?:\.\d+)*[.)]",
            r"|\d+(?:\.\d+){2,}",
            r"|\([A-Za-z]\)",
            r"|[A-Za-z][.)]",
            r"|\(?(?:[ivxlcdm]{1,7}|[IVXLCDM]{1,7})[.)]",
            r") "
        ))
        .expect("list prefix pattern is valid")
    })
}

/// Pass 2: strip leading list markers (`1.`, `(a)`, `iv)`, `•`, `§ 3`).
///
/// Expects whitespace already collapsed; a marker is only stripped when a
/// space follows it.
pub fn strip_prefix(text: &str) -> String {
    let re = prefix_regex();
    let mut rest = text;
    while let Some(m) = re.find(rest) {
        rest = &rest[m.end()..];
    }
    rest.to_string()
}

/// Pass 3: typographic quotes, dashes, ellipsis and ligatures to ASCII.
pub fn normalize_quotes_and_dashes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' | '\u{2032}' | '\u{0060}'
            | '\u{00B4}' => out.push('\''),
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' | '\u{2033}' | '\u{00AB}'
            | '\u{00BB}' => out.push('"'),
            '\u{2010}' | '\u{2011}' | '\u{2012}' | '\u{2013}' | '\u{2014}' | '\u{2015}'
            | '\u{2212}' | '\u{FE58}' | '\u{FE63}' | '\u{FF0D}' => out.push('-'),
            '\u{2026}' => out.push_str("..."),
            '\u{FB00}' => out.push_str("ff"),
            '\u{FB01}' => out.push_str("fi"),
            '\u{FB02}' => out.push_str("fl"),
            '\u{FB03}' => out.push_str("ffi"),
            '\u{FB04}' => out.push_str("ffl"),
            _ => out.push(c),
        }
    }
    out
}

fn is_number_confusable(c: char) -> bool {
    matches!(c, 'l' | 'I' | 'O' | 'o')
}

/// Pass 4: resolve OCR confusables inside each alphanumeric token.
///
/// - Numeric tokens (digits plus only `l I O o`): letters become digits,
///   so `l0` reads `10`.
/// - Word tokens: a `1` or `0` with letters on both sides becomes `l`/`o`
///   (`I`/`O` in all-caps tokens), so `sha1l` reads `shall`.
pub fn normalize_ocr_confusables(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        if !chars[i].is_alphanumeric() {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        let start = i;
        while i < chars.len() && chars[i].is_alphanumeric() {
            i += 1;
        }
        fix_token(&chars[start..i], &mut out);
    }
    out
}

fn fix_token(token: &[char], out: &mut String) {
    let has_digit = token.iter().any(|c| c.is_ascii_digit());
    if !has_digit {
        out.extend(token);
        return;
    }

    if token.iter().all(|&c| c.is_ascii_digit() || is_number_confusable(c)) {
        out.extend(token.iter().map(|&c| match c {
            'l' | 'I' => '1',
            'O' | 'o' => '0',
            other => other,
        }));
        return;
    }

    let lowercase = token.iter().any(|c| c.is_lowercase());
    for (idx, &c) in token.iter().enumerate() {
        let between_letters = idx > 0
            && idx + 1 < token.len()
            && token[idx - 1].is_alphabetic()
            && token[idx + 1].is_alphabetic();
        let fixed = match (c, between_letters, lowercase) {
            ('1', true, true) => 'l',
            ('1', true, false) => 'I',
            ('0', true, true) => 'o',
            ('0', true, false) => 'O',
            _ => c,
        };
        out.push(fixed);
    }
}
