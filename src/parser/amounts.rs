//! Money amounts and quantities, tolerant of OCR noise.
//!
//! OCR engines routinely read `0` as `O`, `1` as `l` or `I`, and `5` as `S`,
//! and European receipts use a decimal comma. We repair those inside tokens
//! that already contain at least one real digit, so ordinary words are never
//! turned into numbers.

use std::{borrow::Cow, sync::LazyLock};

use regex::Regex;

const CURRENCY_SYMBOLS: [char; 4] = ['$', '€', '£', '¥'];

/// Plain decimal, e.g. `12.99` or `12,99`.
static DECIMAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+[.,]\d{1,2}$").expect("failed to compile regex"));

/// US thousands separators, e.g. `1,234.56`.
static US_THOUSANDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{1,3}(?:,\d{3})+\.\d{2}$").expect("failed to compile regex")
});

/// European thousands separators, e.g. `1.234,56`.
static EU_THOUSANDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{1,3}(?:\.\d{3})+,\d{2}$").expect("failed to compile regex")
});

static INTEGER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+$").expect("failed to compile regex"));

/// A currency symbol separated from its amount, as in `$ 5.49`.
static DETACHED_CURRENCY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([$€£¥])\s+(\d)").expect("failed to compile regex"));

/// Parse a single money token such as `$5.49`, `12,99` or `12.9O`.
///
/// Whole numbers are only accepted with a currency symbol, since a bare `3`
/// on a receipt is far more often a quantity or code than a price. This does
/// not apply any plausibility bounds; see [`super::ParserConfig::max_price`].
pub fn parse_price(token: &str) -> Option<f64> {
    let mut s = token.trim();
    let mut has_currency = false;
    if let Some(rest) = s.strip_prefix(CURRENCY_SYMBOLS) {
        s = rest.trim_start();
        has_currency = true;
    } else if let Some(rest) = s.strip_prefix('S')
        && rest.starts_with(|c: char| c.is_ascii_digit())
    {
        // A leading `S` before digits is a misread dollar sign.
        s = rest;
        has_currency = true;
    }
    if let Some(rest) = s.strip_suffix(CURRENCY_SYMBOLS) {
        s = rest.trim_end();
        has_currency = true;
    }
    if !s.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let repaired = s
        .chars()
        .map(|c| match c {
            'O' | 'o' => '0',
            'I' | 'l' | '|' => '1',
            'S' | 's' => '5',
            c => c,
        })
        .collect::<String>();

    let normalized: Cow<'_, str> = if US_THOUSANDS.is_match(&repaired) {
        Cow::Owned(repaired.replace(',', ""))
    } else if EU_THOUSANDS.is_match(&repaired) {
        Cow::Owned(repaired.replace('.', "").replace(',', "."))
    } else if DECIMAL.is_match(&repaired) {
        Cow::Owned(repaired.replace(',', "."))
    } else if has_currency && INTEGER.is_match(&repaired) {
        Cow::Borrowed(repaired.as_str())
    } else {
        return None;
    };
    let value = normalized.parse::<f64>().ok()?;
    Some((value * 100.0).round() / 100.0)
}

/// Is this token a tax flag or currency code that may follow a price, as in
/// `2.99 A` or `4.84 USD`?
fn is_price_suffix(token: &str) -> bool {
    (token.len() <= 2 && token.chars().all(|c| c.is_ascii_alphabetic() || c == '*'))
        || matches!(token, "USD" | "EUR" | "GBP" | "CAD" | "AUD")
}

/// Split whitespace tokens, reattaching detached currency symbols.
fn tokens(line: &str) -> Vec<String> {
    DETACHED_CURRENCY
        .replace_all(line, "$1$2")
        .split_whitespace()
        .map(str::to_owned)
        .collect()
}

/// Split a line into the text before its last money token, and the amount.
///
/// The money token must be the last token on the line, optionally followed
/// by one tax flag or currency code.
pub fn split_trailing_amount(line: &str) -> Option<(String, f64)> {
    let mut tokens = tokens(line);
    let last = tokens.pop()?;
    let amount = match parse_price(&last) {
        Some(amount) => amount,
        None if is_price_suffix(&last) => parse_price(&tokens.pop()?)?,
        None => return None,
    };
    Some((tokens.join(" "), amount))
}

/// If the whole line is a single amount, return it.
pub fn price_only(line: &str) -> Option<f64> {
    let (before, amount) = split_trailing_amount(line)?;
    before.trim().is_empty().then_some(amount)
}

/// Rewrites a local currency symbol as `$`, so amount parsing understands it.
///
/// `$`, `€`, `£` and `¥` are always understood and need no rewriting.
#[derive(Clone, Debug, Default)]
pub struct CurrencyNormalizer {
    /// Matches the symbol directly before an amount.
    pattern: Option<Regex>,
}

impl CurrencyNormalizer {
    pub fn new(symbol: &str) -> Self {
        let symbol = symbol.trim();
        let pattern = if symbol.is_empty() || ["$", "€", "£", "¥"].contains(&symbol) {
            None
        } else {
            // Only replace the symbol where it directly precedes an amount.
            Regex::new(&format!(r"(^|\s){}\s*(\d)", regex::escape(symbol))).ok()
        };
        Self { pattern }
    }

    pub fn normalize<'a>(&self, text: &'a str) -> Cow<'a, str> {
        match &self.pattern {
            Some(re) => re.replace_all(text, "${1}$$${2}"),
            None => Cow::Borrowed(text),
        }
    }
}

/// The name part of an item line, with any quantity removed.
#[derive(Clone, Debug, PartialEq)]
pub struct NameAndQuantity {
    pub name: String,
    /// `None` if the line didn't state a quantity.
    pub quantity: Option<u32>,
    /// The line ended in `qty @`, so its amount is a unit price.
    pub amount_is_unit_price: bool,
}

static INFIX_UNIT_PRICE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?P<name>.+?)\s+(?P<qty>\d{1,3})\s*(?:@|x|×)\s*(?P<unit>\S+)$")
        .expect("failed to compile regex")
});

static TRAILING_AT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?P<name>.+?)\s+(?P<qty>\d{1,3})\s*(?:@|x|×)$")
        .expect("failed to compile regex")
});

static PREFIX_QUANTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?P<qty>\d{1,3})\s*(?:@|x|×|pcs?\b|ea\b)\s*(?P<name>.+)$")
        .expect("failed to compile regex")
});

static QTY_LABEL_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:qty|quantity)\s*[:.]?\s*(?P<qty>\d{1,3})\s+(?P<name>.+)$")
        .expect("failed to compile regex")
});

static QTY_LABEL_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?P<name>.+?)\s+(?:qty|quantity)\s*[:.]?\s*(?P<qty>\d{1,3})$")
        .expect("failed to compile regex")
});

static SUFFIX_TIMES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?P<name>.+?)\s+(?:x|×)\s*(?P<qty>\d{1,3})$")
        .expect("failed to compile regex")
});

/// Pull a quantity out of the name part of an item line.
///
/// Handles `3 x Apples`, `3 @ Apples`, `qty: 3 Apples`, `Apples qty 3`,
/// `Apples x3`, and the infix `Apples 3 @ 1.99`.
pub fn split_quantity(text: &str) -> NameAndQuantity {
    let text = text.trim();
    let quantity = |caps: &regex::Captures<'_>| {
        caps["qty"].parse::<u32>().ok().filter(|q| *q >= 1)
    };

    if let Some(caps) = INFIX_UNIT_PRICE.captures(text)
        && parse_price(&caps["unit"]).is_some()
    {
        return NameAndQuantity {
            name: caps["name"].to_owned(),
            quantity: quantity(&caps),
            amount_is_unit_price: false,
        };
    }
    if let Some(caps) = TRAILING_AT.captures(text) {
        return NameAndQuantity {
            name: caps["name"].to_owned(),
            quantity: quantity(&caps),
            amount_is_unit_price: true,
        };
    }
    for regex in [&*PREFIX_QUANTITY, &*QTY_LABEL_PREFIX, &*QTY_LABEL_SUFFIX, &*SUFFIX_TIMES] {
        if let Some(caps) = regex.captures(text) {
            return NameAndQuantity {
                name: caps["name"].to_owned(),
                quantity: quantity(&caps),
                amount_is_unit_price: false,
            };
        }
    }
    NameAndQuantity {
        name: text.to_owned(),
        quantity: None,
        amount_is_unit_price: false,
    }
}
