//! Per-line classification.
//!
//! Each line is tested against an ordered cascade: noise, date, merchant,
//! total labels, then items. The first match wins. Classification looks at
//! one line at a time; combining lines (multi-line items, labels whose amount
//! sits on the next line) is left to [`super::ReceiptParser`].

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;

use super::{
    ParserConfig,
    amounts::{price_only, split_quantity, split_trailing_amount},
    dates::find_date,
    merchant::{clean_merchant_name, merchant_score},
};

/// Which kind of aggregate a label introduces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TotalKind {
    Subtotal,
    /// One of possibly several tax lines.
    Tax,
    /// The sum of all taxes, as printed.
    TotalTax,
    GrandTotal,
    Total,
    AmountDue,
    Balance,
}

/// A line that looks like a purchased item.
#[derive(Clone, Debug, PartialEq)]
pub struct ItemCandidate {
    pub name: String,
    /// `None` only when the line states a quantity but no amount, e.g.
    /// `3 x Apples` with the price on the next line.
    pub price: Option<f64>,
    pub quantity: u32,
}

/// What a single line is.
#[derive(Clone, Debug, PartialEq)]
pub enum LineClass {
    /// Blank, decorative, or bookkeeping we don't extract.
    Noise,
    Merchant(String),
    Date(NaiveDate),
    /// A total label, and its amount if it is on the same line.
    Total(TotalKind, Option<f64>),
    Item(ItemCandidate),
    /// A line containing nothing but an amount.
    PriceOnly(f64),
    /// Anything else. May still name a multi-line item.
    Unclassified,
}

/// Where a line sits, as far as classification cares.
#[derive(Clone, Copy, Debug, Default)]
pub struct LineContext {
    /// Index among non-empty lines, counting from 0.
    pub position: usize,
    /// Have we already found the merchant?
    pub merchant_found: bool,
}

static NOISE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Decorative separators.
        r"^[\s\-=_*#.~+]+$",
        // Banners.
        r"(?i)\bthank\s*(?:you|s)\b|\bcome\s+again\b|\bhave\s+a\s+\w+\s+day\b|\bwelcome\b|\bcustomer\s+copy\b",
        // Item counts.
        r"(?i)\btotal\s+(?:items?|qty|quantity|units?)\b|\bitems?\s+sold\b|\b(?:number|no\.?|#)\s+of\s+items\b",
        // Reference numbers.
        r"(?i)\b(?:receipt|order|trans(?:action)?|invoice|ticket|ref(?:erence)?|auth(?:orization)?|approval|store|register|reg|terminal|term|cashier|lane|server|table|check|member)\s*(?:#|no\b|num(?:ber)?\b|id\b|:)",
        // Payment tender and change.
        r"(?i)^\s*(?:cash|change(?:\s+due)?|visa|master\s*card|mc|amex|american\s+express|discover|debit|credit|card|tend(?:er(?:ed)?)?|payment|paid|tip|gratuity|ebt)\b",
        // Masked card numbers.
        r"(?i)(?:\*{3,}|x{4,})\s*\d{4}",
        // Phone numbers and web addresses.
        r"(?i)\(?\b\d{3}\)?[\s.\-]\d{3}[\s.\-]\d{4}\b|\bwww\.|https?://|\.com\b|\b(?:tel|phone|fax)\b",
        // Savings summaries.
        r"(?i)\byou\s+saved\b|\btotal\s+savings\b|\bsavings\b",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("failed to compile regex"))
    .collect()
});

/// Total labels, most specific first. Labels must start the line, but may be
/// preceded by decoration such as `****TOTAL`.
static TOTAL_LABELS: LazyLock<Vec<(TotalKind, Regex)>> = LazyLock::new(|| {
    [
        (TotalKind::Subtotal, r"(?i)^[\s*#=\-]*sub\s*-?\s*total\b"),
        (
            TotalKind::TotalTax,
            r"(?i)^[\s*#=\-]*total\s+(?:sales\s+)?(?:tax|vat|gst|hst|pst)\b",
        ),
        (
            TotalKind::Tax,
            r"(?i)^[\s*#=\-]*(?:(?:sales|state|local|city|county)\s+)?(?:tax|vat|gst|hst|pst)\b",
        ),
        (TotalKind::GrandTotal, r"(?i)^[\s*#=\-]*grand\s*total\b"),
        (TotalKind::AmountDue, r"(?i)^[\s*#=\-]*(?:total\s+)?amount\s+due\b"),
        (TotalKind::Total, r"(?i)^[\s*#=\-]*total\b"),
        (TotalKind::Balance, r"(?i)^[\s*#=\-]*balance(?:\s+due)?\b"),
    ]
    .into_iter()
    .map(|(kind, pattern)| (kind, Regex::new(pattern).expect("failed to compile regex")))
    .collect()
});

/// Leading product codes, which aren't part of the item name.
static NAME_CODES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4,}\s+").expect("failed to compile regex"));

/// Classifies single lines.
#[derive(Clone, Debug)]
pub struct LineClassifier {
    config: ParserConfig,
    today: NaiveDate,
}

impl LineClassifier {
    pub fn new(config: ParserConfig, today: NaiveDate) -> Self {
        Self { config, today }
    }

    /// Classify one line of OCR text.
    pub fn classify(&self, text: &str, context: LineContext) -> LineClass {
        let text = text.trim();
        if text.is_empty() || NOISE.iter().any(|re| re.is_match(text)) {
            return LineClass::Noise;
        }

        if let Some(date) = find_date(text, &self.config.date_formats, self.today) {
            return LineClass::Date(date);
        }

        if !context.merchant_found
            && merchant_score(text, context.position, self.config.merchant_search_lines)
                >= self.config.merchant_min_score
        {
            return LineClass::Merchant(clean_merchant_name(text));
        }

        if let Some(kind) = total_label(text) {
            let amount = split_trailing_amount(text)
                .map(|(_, amount)| amount)
                .filter(|amount| self.is_plausible_amount(*amount));
            return LineClass::Total(kind, amount);
        }

        if let Some(amount) = price_only(text) {
            return if self.is_plausible_amount(amount) {
                LineClass::PriceOnly(amount)
            } else {
                LineClass::Noise
            };
        }

        self.classify_item(text)
    }

    fn classify_item(&self, text: &str) -> LineClass {
        let (name_part, amount) = match split_trailing_amount(text) {
            Some((name_part, amount)) => (name_part, Some(amount)),
            None => (text.to_owned(), None),
        };
        if amount.is_some_and(|a| !self.is_plausible_amount(a)) {
            return LineClass::Unclassified;
        }

        let split = split_quantity(&name_part);
        let name = clean_item_name(&split.name);
        if name.chars().filter(|c| c.is_alphabetic()).count() < 2 {
            return LineClass::Unclassified;
        }
        let quantity = split.quantity.unwrap_or(1);
        let price = match amount {
            Some(amount) if split.amount_is_unit_price => {
                Some((amount * f64::from(quantity) * 100.0).round() / 100.0)
                    .filter(|total| self.is_plausible_amount(*total))
            }
            Some(amount) => Some(amount),
            // A bare name is only an item if it states a quantity.
            None if split.quantity.is_some() => None,
            None => return LineClass::Unclassified,
        };
        if amount.is_some() && price.is_none() {
            return LineClass::Unclassified;
        }
        LineClass::Item(ItemCandidate {
            name,
            price,
            quantity,
        })
    }

    /// Is this a believable price on a receipt?
    pub fn is_plausible_amount(&self, amount: f64) -> bool {
        amount > 0.0 && amount < self.config.max_price
    }

    /// Could this unclassified line be the name half of a multi-line item?
    pub fn could_be_item_name(&self, text: &str) -> bool {
        let name = clean_item_name(text);
        name.chars().filter(|c| c.is_alphabetic()).count() >= 2
            && split_trailing_amount(text).is_none()
    }
}

/// Which total label, if any, starts this line?
pub fn total_label(text: &str) -> Option<TotalKind> {
    TOTAL_LABELS
        .iter()
        .find(|(_, re)| re.is_match(text))
        .map(|(kind, _)| *kind)
}

/// Strip product codes, leader dots and stray punctuation from an item name.
pub fn clean_item_name(name: &str) -> String {
    let name = NAME_CODES.replace(name.trim(), "");
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(|c: char| c == '.' || c == '-' || c == ':' || c == '*' || c.is_whitespace())
        .trim_start_matches(|c: char| c == '-' || c == '*' || c == '#' || c.is_whitespace())
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> LineClassifier {
        LineClassifier::new(
            ParserConfig::default(),
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        )
    }

    fn later() -> LineContext {
        LineContext {
            position: 10,
            merchant_found: true,
        }
    }

    #[test]
    fn noise_lines() {
        let c = classifier();
        for line in [
            "",
            "   ",
            "--------------",
            "THANK YOU FOR SHOPPING",
            "Total items: 3",
            "Receipt #004512",
            "Order No 12",
            "CASH 20.00",
            "CHANGE 15.16",
            "VISA ************1234",
            "(555) 123-4567",
            "www.grocery.example.com",
            "You saved 1.20",
        ] {
            assert_eq!(c.classify(line, later()), LineClass::Noise, "{line:?}");
        }
    }

    #[test]
    fn merchant_only_near_the_top() {
        let c = classifier();
        assert_eq!(
            c.classify("GROCERY STORE", LineContext::default()),
            LineClass::Merchant("GROCERY STORE".to_owned())
        );
        assert_eq!(
            c.classify(
                "GROCERY STORE",
                LineContext {
                    position: 0,
                    merchant_found: true
                }
            ),
            LineClass::Unclassified
        );
    }

    #[test]
    fn dates_at_the_top_are_not_merchants() {
        assert_eq!(
            classifier().classify("JAN 15, 2024", LineContext::default()),
            LineClass::Date(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap())
        );
    }

    #[test]
    fn dates() {
        assert_eq!(
            classifier().classify("01/15/2024 12:30", later()),
            LineClass::Date(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap())
        );
    }

    #[test]
    fn total_labels() {
        let c = classifier();
        let cases = [
            ("Subtotal 4.48", TotalKind::Subtotal, Some(4.48)),
            ("SUB-TOTAL: $4.48", TotalKind::Subtotal, Some(4.48)),
            ("Tax 0.36", TotalKind::Tax, Some(0.36)),
            ("TOTAL TAX 0.36", TotalKind::TotalTax, Some(0.36)),
            ("Total Sales Tax 0.36", TotalKind::TotalTax, Some(0.36)),
            ("Sales Tax 8.25% 0.36", TotalKind::Tax, Some(0.36)),
            ("VAT 20% 1.00", TotalKind::Tax, Some(1.00)),
            ("Grand Total 4.84", TotalKind::GrandTotal, Some(4.84)),
            ("TOTAL 4.84", TotalKind::Total, Some(4.84)),
            ("Total:", TotalKind::Total, None),
            ("Amount Due 4.84", TotalKind::AmountDue, Some(4.84)),
            ("Balance Due $4.84", TotalKind::Balance, Some(4.84)),
            ("****TOTAL 2.99", TotalKind::Total, Some(2.99)),
            ("## SUBTOTAL 2.99", TotalKind::Subtotal, Some(2.99)),
            ("--- Tax 0.24", TotalKind::Tax, Some(0.24)),
        ];
        for (line, kind, amount) in cases {
            assert_eq!(c.classify(line, later()), LineClass::Total(kind, amount), "{line}");
        }
    }

    #[test]
    fn items_and_prices() {
        let c = classifier();
        assert_eq!(
            c.classify("Apples 2.99", later()),
            LineClass::Item(ItemCandidate {
                name: "Apples".to_owned(),
                price: Some(2.99),
                quantity: 1
            })
        );
        assert_eq!(
            c.classify("3 x Apples 5.97", later()),
            LineClass::Item(ItemCandidate {
                name: "Apples".to_owned(),
                price: Some(5.97),
                quantity: 3
            })
        );
        assert_eq!(
            c.classify("Apples 3 @ 1.99", later()),
            LineClass::Item(ItemCandidate {
                name: "Apples".to_owned(),
                price: Some(5.97),
                quantity: 3
            })
        );
        assert_eq!(
            c.classify("0041234 WHOLE MILK ..... 3.49", later()),
            LineClass::Item(ItemCandidate {
                name: "WHOLE MILK".to_owned(),
                price: Some(3.49),
                quantity: 1
            })
        );
        assert_eq!(
            c.classify("2 x Bread", later()),
            LineClass::Item(ItemCandidate {
                name: "Bread".to_owned(),
                price: None,
                quantity: 2
            })
        );
        assert_eq!(c.classify("$ 1.49", later()), LineClass::PriceOnly(1.49));
        assert_eq!(c.classify("Bananas", later()), LineClass::Unclassified);
    }

    #[test]
    fn implausible_prices_are_discarded() {
        let c = classifier();
        assert_eq!(c.classify("TV Stand 12345.00", later()), LineClass::Unclassified);
        assert_eq!(c.classify("99999.99", later()), LineClass::Noise);
        assert_eq!(c.classify("Total 0.00", later()), LineClass::Total(TotalKind::Total, None));
    }
}
