//! Post-processing: deterministic cleanup of raw OCR page text.
//!
//! Tesseract output is mostly clean, but scanned pages and PDF text layers
//! bring a handful of artefacts that make the concatenated document harder
//! to consume: Windows line endings from text layers, zero-width and
//! soft-hyphen characters, typographic ligatures, ragged trailing spaces and
//! long runs of empty lines where a page had whitespace-only regions.
//!
//! ## Rule Order
//!
//! Line endings are normalised first so every later rule only sees `\n`.
//! Blank-line collapsing runs after trailing whitespace is trimmed, so lines
//! holding only spaces count as blank.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all cleanup rules to one page of recognised text.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF / CR → LF)
/// 2. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 3. Expand typographic ligatures (`ﬁ` → `fi`)
/// 4. Trim trailing whitespace per line
/// 5. Collapse 3+ consecutive newlines to a single blank line
/// 6. Trim leading and trailing blank space from the page
///
/// The result never starts or ends with whitespace, so pages join cleanly
/// with any separator.
pub fn clean_text(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = expand_ligatures(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    s.trim().to_string()
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 3: Expand ligatures ────────────────────────────────────────────────

fn expand_ligatures(input: &str) -> String {
    const LIGATURES: &[(char, &str)] = &[
        ('\u{FB00}', "ff"),
        ('\u{FB01}', "fi"),
        ('\u{FB02}', "fl"),
        ('\u{FB03}', "ffi"),
        ('\u{FB04}', "ffl"),
    ];
    if !input.chars().any(|c| ('\u{FB00}'..='\u{FB04}').contains(&c)) {
        return input.to_string();
    }
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match LIGATURES.iter().find(|(lig, _)| *lig == c) {
            Some((_, expanded)) => out.push_str(expanded),
            None => out.push(c),
        }
    }
    out
}

// ── Rule 4: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 5: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

// ── Tests ────────────────────────────────────────────────────────────────────
