//! Turning OCR lines into a structured receipt.
//!
//! Parsing never fails. A receipt we can't make sense of comes back with no
//! items and a low confidence, because "nothing found" is common and needs to
//! reach the user as a result rather than as an error.

use chrono::NaiveDate;
use schemars::JsonSchema;

use crate::{ocr::OcrLine, prelude::*};

use self::{
    amounts::CurrencyNormalizer,
    classify::{ItemCandidate, LineClass, LineClassifier, LineContext, TotalKind},
    dates::DateFormat,
};

pub mod amounts;
pub mod classify;
pub mod dates;
pub mod merchant;

pub use self::amounts::parse_price;

/// Parser configuration.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields, rename_all = "snake_case")]
pub struct ParserConfig {
    /// Items from OCR lines less confident than this are dropped.
    pub min_item_confidence: f64,

    /// The local currency symbol. `$`, `€`, `£` and `¥` are always
    /// understood; anything else is treated as equivalent to them.
    pub currency_symbol: String,

    /// Date layouts to try, in order.
    pub date_formats: Vec<DateFormat>,

    /// How many non-empty lines at the top may contain the merchant name.
    pub merchant_search_lines: usize,

    /// Minimum heuristic score for a merchant name.
    pub merchant_min_score: f64,

    /// Amounts at or above this are OCR errors, not prices.
    pub max_price: f64,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            min_item_confidence: 0.6,
            currency_symbol: "$".to_owned(),
            date_formats: DateFormat::all(),
            merchant_search_lines: 5,
            merchant_min_score: 0.6,
            max_price: 10_000.0,
        }
    }
}

/// A purchased line item.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedItem {
    /// `item-<line number>`. Stable for the same OCR output.
    pub id: String,
    pub name: String,
    /// The amount charged for this line, if we found one.
    pub price: Option<f64>,
    /// Always at least 1.
    pub quantity: u32,
    /// Confidence of the OCR line(s) this item came from.
    pub confidence: f64,
    /// 1-based index into the OCR lines.
    pub line_number: usize,
    pub raw_text: String,
}

/// Everything we extracted from a receipt.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedReceipt {
    pub items: Vec<ExtractedItem>,
    pub total: Option<f64>,
    pub subtotal: Option<f64>,
    pub tax: Option<f64>,
    pub date: Option<NaiveDate>,
    pub merchant_name: Option<String>,
    /// Mean of the item confidence and the presence of merchant, date and
    /// total. 0 for an empty receipt.
    pub confidence: f64,
    pub raw_text: String,
}

/// Parse OCR lines using the default configuration and today's date.
pub fn parse_receipt(lines: &[OcrLine]) -> ParsedReceipt {
    ReceiptParser::new(ParserConfig::default()).parse(lines)
}

/// A name line waiting for a price on the next line.
struct PendingName {
    name: String,
    quantity: u32,
    line_idx: usize,
    /// The line stated a quantity, so it is an item even if no price follows.
    explicit_quantity: bool,
}

/// Totals seen so far.
#[derive(Default)]
struct Totals {
    subtotal: Option<f64>,
    tax: Option<f64>,
    total_tax: Option<f64>,
    grand_total: Option<f64>,
    total: Option<f64>,
    amount_due: Option<f64>,
    balance: Option<f64>,
}

impl Totals {
    fn record(&mut self, kind: TotalKind, amount: f64) {
        let slot = match kind {
            // Receipts often list several taxes.
            TotalKind::Tax => {
                let sum = self.tax.unwrap_or(0.0) + amount;
                self.tax = Some((sum * 100.0).round() / 100.0);
                return;
            }
            TotalKind::Subtotal => &mut self.subtotal,
            TotalKind::TotalTax => &mut self.total_tax,
            TotalKind::GrandTotal => &mut self.grand_total,
            TotalKind::Total => &mut self.total,
            TotalKind::AmountDue => &mut self.amount_due,
            TotalKind::Balance => &mut self.balance,
        };
        slot.get_or_insert(amount);
    }

    /// The best candidate for the receipt total.
    fn total(&self) -> Option<f64> {
        self.grand_total
            .or(self.total)
            .or(self.amount_due)
            .or(self.balance)
    }

    /// A printed tax total wins over our own sum of tax lines.
    fn tax(&self) -> Option<f64> {
        self.total_tax.or(self.tax)
    }
}

/// Parses receipts. Cheap to clone and safe to share.
#[derive(Clone, Debug)]
pub struct ReceiptParser {
    config: ParserConfig,
    classifier: LineClassifier,
    currency: CurrencyNormalizer,
}

impl ReceiptParser {
    /// Create a parser that judges dates relative to today.
    pub fn new(config: ParserConfig) -> Self {
        Self::with_today(config, chrono::Local::now().date_naive())
    }

    /// Create a parser that judges dates relative to `today`.
    pub fn with_today(config: ParserConfig, today: NaiveDate) -> Self {
        let currency = CurrencyNormalizer::new(&config.currency_symbol);
        Self {
            classifier: LineClassifier::new(config.clone(), today),
            config,
            currency,
        }
    }

    /// Parse OCR lines into a receipt.
    #[instrument(level = "debug", skip_all, fields(lines = lines.len()))]
    pub fn parse(&self, lines: &[OcrLine]) -> ParsedReceipt {
        let mut items = vec![];
        let mut totals = Totals::default();
        let mut merchant_name: Option<String> = None;
        let mut date: Option<NaiveDate> = None;
        let mut pending_label: Option<TotalKind> = None;
        let mut pending_name: Option<PendingName> = None;
        let mut position = 0;

        for (idx, line) in lines.iter().enumerate() {
            let text = self.currency.normalize(&line.text);
            let context = LineContext {
                position,
                merchant_found: merchant_name.is_some(),
            };
            let class = self.classifier.classify(&text, context);
            if !text.trim().is_empty() {
                position += 1;
            }
            trace!(line = idx + 1, ?class, text = %line.text, "Classified line");

            let label = pending_label.take();
            let mut waiting = pending_name.take();
            let keeps_waiting = match class {
                LineClass::Noise => true,
                LineClass::PriceOnly(_) => label.is_none(),
                _ => false,
            };
            if !keeps_waiting && let Some(name) = waiting.take() {
                self.push_unpriced(&mut items, lines, &name);
            }

            match class {
                // Pending state survives noise, but nothing else.
                LineClass::Noise => {
                    pending_label = label;
                    pending_name = waiting;
                }
                LineClass::Merchant(name) => merchant_name = Some(name),
                LineClass::Date(found) => {
                    date.get_or_insert(found);
                }
                LineClass::Total(kind, Some(amount)) => totals.record(kind, amount),
                LineClass::Total(kind, None) => pending_label = Some(kind),
                LineClass::PriceOnly(amount) => {
                    if let Some(kind) = label {
                        totals.record(kind, amount);
                    } else if let Some(waiting) = waiting {
                        self.push_item(&mut items, lines, &waiting, idx, Some(amount));
                    }
                }
                LineClass::Item(ItemCandidate {
                    name,
                    price: Some(price),
                    quantity,
                }) => {
                    self.push_item(
                        &mut items,
                        lines,
                        &PendingName {
                            name,
                            quantity,
                            line_idx: idx,
                            explicit_quantity: true,
                        },
                        idx,
                        Some(price),
                    );
                }
                LineClass::Item(ItemCandidate {
                    name,
                    price: None,
                    quantity,
                }) => {
                    pending_name = Some(PendingName {
                        name,
                        quantity,
                        line_idx: idx,
                        explicit_quantity: true,
                    });
                }
                LineClass::Unclassified => {
                    if self.classifier.could_be_item_name(&text) {
                        pending_name = Some(PendingName {
                            name: classify::clean_item_name(&text),
                            quantity: 1,
                            line_idx: idx,
                            explicit_quantity: false,
                        });
                    }
                }
            }
        }
        if let Some(name) = pending_name.take() {
            self.push_unpriced(&mut items, lines, &name);
        }

        let total = totals.total();
        let item_confidence = if items.is_empty() {
            0.0
        } else {
            items.iter().map(|i| i.confidence).sum::<f64>() / items.len() as f64
        };
        let present = [merchant_name.is_some(), date.is_some(), total.is_some()]
            .iter()
            .filter(|p| **p)
            .count() as f64;
        let confidence = (item_confidence + present) / 4.0;
        debug!(
            items = items.len(),
            merchant = merchant_name.is_some(),
            date = date.is_some(),
            total = total.is_some(),
            confidence,
            "Parsed receipt"
        );

        ParsedReceipt {
            items,
            total,
            subtotal: totals.subtotal,
            tax: totals.tax(),
            date,
            merchant_name,
            confidence,
            raw_text: lines
                .iter()
                .map(|l| l.text.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// A name that never found its price is still an item if it stated a
    /// quantity, as in `2 x Bread`.
    fn push_unpriced(&self, items: &mut Vec<ExtractedItem>, lines: &[OcrLine], name: &PendingName) {
        if name.explicit_quantity {
            self.push_item(items, lines, name, name.line_idx, None);
        }
    }

    /// Add an item spanning lines `name.line_idx..=price_idx`, unless those
    /// lines are too unreliable.
    fn push_item(
        &self,
        items: &mut Vec<ExtractedItem>,
        lines: &[OcrLine],
        name: &PendingName,
        price_idx: usize,
        price: Option<f64>,
    ) {
        let source = &lines[name.line_idx..=price_idx];
        let confidence = source
            .iter()
            .map(|l| l.confidence)
            .fold(f64::INFINITY, f64::min)
            .clamp(0.0, 1.0);
        if confidence < self.config.min_item_confidence {
            debug!(
                line = name.line_idx + 1,
                confidence,
                name = %name.name,
                "Dropping low-confidence item"
            );
            return;
        }
        let line_number = name.line_idx + 1;
        items.push(ExtractedItem {
            id: format!("item-{line_number}"),
            name: name.name.clone(),
            price,
            quantity: name.quantity.max(1),
            confidence,
            line_number,
            raw_text: source
                .iter()
                .map(|l| l.text.trim())
                .collect::<Vec<_>>()
                .join("\n"),
        });
    }
}
