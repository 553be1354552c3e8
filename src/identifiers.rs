//! Identifier detection over extracted document text.
//!
//! Scanned ID cards, licences and application forms usually carry one of a
//! few well-known number formats. The detector looks for:
//!
//! | key        | format                                                  |
//! |------------|---------------------------------------------------------|
//! | `nic_12`   | 12-digit national identity number, optionally grouped 4-4-4 |
//! | `nic_9v`   | 9 digits followed by `V` or `X` (older identity cards)  |
//! | `passport` | one capital letter followed by 7 digits                 |
//!
//! Old-format numbers are where OCR struggles most, so `nic_9v` is found in
//! three tiers: values next to a label (`NIC No`, `ID No`, licence field
//! `4d.`), tolerant hits that allow small gaps before the suffix, and fuzzy
//! hits in which letters commonly confused with digits (`O`→`0`, `I`→`1`,
//! `S`→`5`, `B`→`8`, …) are mapped back. Within a tier, values that recur
//! more often in the text come first. A trailing `Y` is read as `V`.
//!
//! Every list is deduplicated and keeps first-seen order otherwise.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::{BTreeMap, HashSet};

pub const NIC_12: &str = "nic_12";
pub const NIC_9V: &str = "nic_9v";
pub const PASSPORT: &str = "passport";

static RE_NIC12_GROUPED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{4})[ \t-](\d{4})[ \t-](\d{4})\b").unwrap());
static RE_NIC12: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{12}\b").unwrap());

static RE_PASSPORT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[A-Z]\d{7}\b").unwrap());

static RE_NIC9_ANCHORED: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?is)\b4d\b\.?\s*[:\-]?\s*(\d{9})\s*([VvXxYy])",
        r"(?is)\bNIC(?:\s*No\.?)?\b.*?(\d{9})\s*([VvXxYy])",
        r"(?is)\bID(?:\s*No\.?)?\b.*?(\d{9})\s*([VvXxYy])",
    ]
    .iter()
    .map(|rx| Regex::new(rx).unwrap())
    .collect()
});

static RE_NIC9_TOLERANT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{9})[\W_]{0,4}([VvXxYy])\b").unwrap());

static RE_NIC9_FUZZY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b([0-9OQDBIl|ZzSsGgq]{3})[\W_]{0,3}([0-9OQDBIl|ZzSsGgq]{3})[\W_]{0,3}([0-9OQDBIl|ZzSsGgq]{3})[\W_]{0,4}([VvXxYy])\b",
    )
    .unwrap()
});

static RE_TRIPLE_BLOCKS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{3})[ \t\-_.:]+(\d{3})[ \t\-_.:]+(\d{3})\b").unwrap());

/// Scan `text` for identifiers. Keys with no hits are omitted.
pub fn find_identifiers(text: &str) -> BTreeMap<String, Vec<String>> {
    let mut found = BTreeMap::new();

    let mut insert = |key: &str, values: Vec<String>| {
        if !values.is_empty() {
            found.insert(key.to_string(), values);
        }
    };

    insert(NIC_12, find_nic12(text));
    insert(NIC_9V, find_nic9(text));
    insert(
        PASSPORT,
        dedup(RE_PASSPORT.find_iter(text).map(|m| m.as_str().to_string())),
    );

    found
}

fn find_nic12(text: &str) -> Vec<String> {
    let joined = RE_NIC12_GROUPED.replace_all(text, "$1$2$3");
    dedup(RE_NIC12.find_iter(&joined).map(|m| m.as_str().to_string()))
}

fn find_nic9(text: &str) -> Vec<String> {
    let anchored = dedup(RE_NIC9_ANCHORED.iter().flat_map(|rx| {
        rx.captures_iter(text)
            .map(|c| canonical_nic9(&c[1], &c[2]))
            .collect::<Vec<_>>()
    }));

    let tolerant: Vec<String> = dedup(
        RE_NIC9_TOLERANT
            .captures_iter(text)
            .map(|c| canonical_nic9(&c[1], &c[2])),
    )
    .into_iter()
    .filter(|v| !anchored.contains(v))
    .collect();

    let fuzzy: Vec<String> = dedup(RE_NIC9_FUZZY.captures_iter(text).filter_map(|c| {
        let digits: String = format!("{}{}{}", &c[1], &c[2], &c[3])
            .chars()
            .map(ocr_to_digit)
            .collect();
        digits
            .chars()
            .all(|ch| ch.is_ascii_digit())
            .then(|| canonical_nic9(&digits, &c[4]))
    }))
    .into_iter()
    .filter(|v| !anchored.contains(v) && !tolerant.contains(v))
    .collect();

    let pool = normalise_for_counts(text);
    let mut ranked = Vec::with_capacity(anchored.len() + tolerant.len() + fuzzy.len());
    for mut tier in [anchored, tolerant, fuzzy] {
        // Stable: ties keep first-seen order.
        tier.sort_by_key(|v| std::cmp::Reverse(pool.matches(v.as_str()).count()));
        ranked.extend(tier);
    }
    ranked
}

fn canonical_nic9(head: &str, tail: &str) -> String {
    let tail = match tail.to_ascii_uppercase().as_str() {
        "Y" => "V".to_string(),
        other => other.to_string(),
    };
    format!("{head}{tail}")
}

fn ocr_to_digit(c: char) -> char {
    match c {
        'O' | 'o' | 'Q' | 'D' => '0',
        'I' | 'l' | '|' => '1',
        'Z' | 'z' => '2',
        'S' | 's' => '5',
        'B' => '8',
        'G' | 'g' => '6',
        'q' => '9',
        other => other,
    }
}

/// Uppercased text with `123 456 789 v` style runs folded to `123456789V`.
fn normalise_for_counts(text: &str) -> String {
    let joined = RE_TRIPLE_BLOCKS.replace_all(text, "$1$2$3");
    RE_NIC9_TOLERANT
        .replace_all(&joined, |c: &Captures<'_>| canonical_nic9(&c[1], &c[2]))
        .to_uppercase()
}

fn dedup(values: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .into_iter()
        .filter(|v| seen.insert(v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_grouped_twelve_digit_number() {
        let ids = find_identifiers("Identity: 1990 1234 5678\nIssued 2015");
        assert_eq!(ids[NIC_12], vec!["199012345678"]);
    }

    #[test]
    fn old_format_tolerates_gap_and_y_suffix() {
        let ids = find_identifiers("holder 913153782_y signature");
        assert_eq!(ids[NIC_9V], vec!["913153782V"]);
    }

    #[test]
    fn fuzzy_maps_confused_letters() {
        let ids = find_identifiers("9O6 O74 O6O V");
        assert_eq!(ids[NIC_9V], vec!["906074060V"]);
    }

    #[test]
    fn anchored_values_come_first() {
        let text = "ref 123456789V\nNIC No: 966074060 V";
        let ids = find_identifiers(text);
        assert_eq!(ids[NIC_9V], vec!["966074060V", "123456789V"]);
    }

    #[test]
    fn passport_and_dedup() {
        let ids = find_identifiers("Passport N1234567, copy of N1234567; old M7654321");
        assert_eq!(ids[PASSPORT], vec!["N1234567", "M7654321"]);
    }

    #[test]
    fn nothing_found_is_empty() {
        assert!(find_identifiers("Hello world").is_empty());
        assert!(find_identifiers("").is_empty());
    }
}
