//! Text-level guards applied to model output and checklist input.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// A single value, a dimension group (`12x9`, `7 x 7 x 3`) or a range
/// (`1.5-2`, `3 to 4`) followed by a unit. Compact forms have no word boundary
/// before the digits, so the group is anchored on any non-numeric character.
static MEASUREMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:^|[^\d.])(\d+(?:\.\d+)?(?:\s*(?:x|×|by|-|–|to)\s*\d+(?:\.\d+)?)*)\s*(mm|cm|ml)\b",
    )
    .expect("valid measurement regex")
});

static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("valid number regex"));

static COMPARATIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(new|newly|progressive|progression|progressed|compared?|comparison|prior|previous|previously|interval|worsen(?:ed|ing)?|improv(?:ed|ing|ement)|stable|unchanged)\b",
    )
    .expect("valid comparative regex")
});

/// Recommendation language that must never appear in an impression.
pub const BANNED_IMPRESSION_PHRASES: &[&str] = &[
    "warranting further evaluation",
    "warrants further evaluation",
    "further evaluation",
    "may require assessment",
    "may require additional assessment",
    "potentially contributing to",
    "suggesting need for follow-up",
    "recommend",
    "clinical correlation",
];

const PROCEDURAL_MARKERS: &[&str] = &[
    "scroll",
    "compare",
    "comparison",
    "prior stud",
    "prior exam",
    "previous stud",
    "review history",
    "clinical history",
    "technique",
    "image quality",
    "artifact",
    "adequacy",
    "protocol",
    "window setting",
    "reformat",
    "radiation dose",
];

const PROCEDURAL_CATEGORIES: &[&str] = &["initial assessment", "final checks", "image quality"];

/// Normalised measurement token, e.g. `"7 mm"` for "7mm" or "7 MM".
fn normalise(value: &str, unit: &str) -> String {
    format!("{} {}", value, unit.to_ascii_lowercase())
}

/// Every number of every measurement, each paired with its group's unit.
pub fn measurement_tokens(text: &str) -> Vec<String> {
    MEASUREMENT
        .captures_iter(text)
        .flat_map(|caps| {
            let unit = caps[2].to_string();
            NUMBER
                .find_iter(&caps[1])
                .map(|value| normalise(value.as_str(), &unit))
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Measurement tokens in `output` that do not occur in any of `sources`.
pub fn unsupported_measurements<'a>(
    output: &str,
    sources: impl IntoIterator<Item = &'a str>,
) -> Vec<String> {
    let known: HashSet<String> = sources
        .into_iter()
        .flat_map(measurement_tokens)
        .collect();
    measurement_tokens(output)
        .into_iter()
        .filter(|token| !known.contains(token))
        .collect()
}

pub fn has_comparative_language(text: &str) -> bool {
    COMPARATIVE.is_match(text)
}

/// Drops comparative or temporal words and tidies the spacing left behind.
pub fn remove_comparative_language(text: &str) -> String {
    COMPARATIVE
        .replace_all(text, "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn banned_phrases(text: &str) -> Vec<&'static str> {
    let lowered = text.to_lowercase();
    BANNED_IMPRESSION_PHRASES
        .iter()
        .copied()
        .filter(|phrase| lowered.contains(phrase))
        .collect()
}

/// True when a checklist item describes a step of reading the study rather
/// than a finding.
pub fn is_procedural_item(finding: &str) -> bool {
    let lowered = finding.to_lowercase();
    lowered.trim().is_empty() || PROCEDURAL_MARKERS.iter().any(|m| lowered.contains(m))
}

pub fn is_procedural_category(category: &str) -> bool {
    let lowered = category.to_lowercase();
    PROCEDURAL_CATEGORIES.iter().any(|c| lowered.contains(c))
}
