//! Merchant name heuristics.

use std::sync::LazyLock;

use regex::Regex;

use super::amounts::split_trailing_amount;

/// Words that mark a line as receipt bookkeeping rather than a store name.
static BOOKKEEPING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:sub\s*-?\s*total|total|tax|vat|gst|balance|amount|due|change|cash|date|time|qty|price|item)\b")
        .expect("failed to compile regex")
});

/// Score how much `line` looks like a store name, from 0 to 1.
///
/// `position` counts non-empty lines from the top, and `search_lines` is how
/// many lines we consider at all. Short, upper-case lines near the top score
/// highest; digits and amounts count against a line.
pub fn merchant_score(line: &str, position: usize, search_lines: usize) -> f64 {
    let line = line.trim();
    let letters = line.chars().filter(|c| c.is_alphabetic()).collect::<Vec<_>>();
    if letters.len() < 2 || position >= search_lines || BOOKKEEPING.is_match(line) {
        return 0.0;
    }
    // Dates, phone numbers and the like.
    let digits = line.chars().filter(|c| c.is_ascii_digit()).count();
    if digits >= letters.len() {
        return 0.0;
    }

    let mut score = 0.0;
    if letters.iter().all(|c| c.is_uppercase()) {
        score += 0.4;
    } else if line
        .split_whitespace()
        .all(|w| w.chars().next().is_some_and(|c| !c.is_lowercase()))
    {
        score += 0.2;
    }

    let len = line.chars().count();
    if (3..=30).contains(&len) {
        score += 0.2;
    } else if len > 40 {
        score -= 0.2;
    }
    if line.split_whitespace().count() <= 5 {
        score += 0.1;
    }

    score += 0.3 * (1.0 - position as f64 / search_lines as f64);

    if line.chars().any(|c| c.is_ascii_digit()) {
        score -= 0.3;
    }
    if line.contains(['$', '€', '£', '¥']) || split_trailing_amount(line).is_some() {
        score -= 0.5;
    }
    score.clamp(0.0, 1.0)
}

/// Tidy a merchant line for display.
pub fn clean_merchant_name(line: &str) -> String {
    line.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c: char| !c.is_alphanumeric() && c != '\'' && c != '&')
        .to_owned()
}
