//! Grading an extraction.
//!
//! The parser's own `confidence` is a quick summary. Here we look deeper:
//! how well the OCR went, how much of the receipt we understood, which
//! fields we can trust, and what the user could do about the rest.

use schemars::JsonSchema;

use crate::{
    ocr::OcrLine,
    parser::{
        ParsedReceipt,
        amounts::{CurrencyNormalizer, price_only, split_trailing_amount},
        classify::{TotalKind, total_label},
        dates::DateFormat,
        merchant::clean_merchant_name,
    },
    prelude::*,
};

/// Weights and thresholds for [`ConfidenceScorer`].
///
/// The defaults were tuned by hand on real receipts. Treat them as starting
/// points.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields, rename_all = "snake_case")]
pub struct ScoringConfig {
    /// Weight of the mean OCR line confidence in `overall`.
    pub ocr_weight: f64,
    /// Weight of the mean item confidence in `overall`.
    pub items_weight: f64,
    /// Weight of the completeness score in `overall`.
    pub completeness_weight: f64,

    /// Completeness weight for having a total.
    pub total_weight: f64,
    /// Completeness weight for having a date.
    pub date_weight: f64,
    /// Completeness weight for having a merchant.
    pub merchant_weight: f64,
    /// Completeness weight for having at least one item.
    pub has_items_weight: f64,

    /// `overall` at or above this is `excellent`.
    pub excellent_threshold: f64,
    /// `overall` at or above this is `good`.
    pub good_threshold: f64,
    /// `overall` at or above this is `fair`. Anything lower is `poor`.
    pub fair_threshold: f64,

    /// Field confidence at or above this is `high`.
    pub high_confidence: f64,
    /// Line or field confidence below this is worth flagging.
    pub medium_confidence: f64,
    /// Field confidence at or above this is `low`. Anything lower is
    /// `very-low`.
    pub low_confidence: f64,

    /// Allowed difference, in currency units, when checking that amounts add
    /// up.
    pub arithmetic_tolerance: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            ocr_weight: 0.3,
            items_weight: 0.3,
            completeness_weight: 0.4,
            total_weight: 0.3,
            date_weight: 0.2,
            merchant_weight: 0.2,
            has_items_weight: 0.3,
            excellent_threshold: 0.9,
            good_threshold: 0.75,
            fair_threshold: 0.6,
            high_confidence: 0.85,
            medium_confidence: 0.6,
            low_confidence: 0.4,
            arithmetic_tolerance: 0.02,
        }
    }
}

/// Overall verdict.
#[derive(Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceStatus {
    Excellent,
    Good,
    Fair,
    Poor,
}

/// How far to trust a single field.
#[derive(Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldStatus {
    High,
    Medium,
    Low,
    VeryLow,
}

/// The fields we grade individually.
#[derive(Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldName {
    Total,
    Date,
    Merchant,
    Items,
}

#[derive(Clone, Debug, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldConfidence {
    pub field: FieldName,
    /// 0 when the field is missing.
    pub confidence: f64,
    pub status: FieldStatus,
    /// The 1-based OCR line the value came from, if we could find it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_number: Option<usize>,
}

#[derive(Clone, Debug, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrQuality {
    pub average_confidence: f64,
    pub line_count: usize,
    /// Lines below the medium confidence threshold.
    pub low_confidence_lines: usize,
}

#[derive(Clone, Debug, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsingQuality {
    pub item_count: usize,
    pub items_with_price: usize,
    /// Fraction of items with a price. 0 with no items.
    pub price_coverage: f64,
    pub average_item_confidence: f64,
}

#[derive(Clone, Debug, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Completeness {
    pub has_total: bool,
    pub has_date: bool,
    pub has_merchant: bool,
    pub has_items: bool,
    /// Weighted presence, 0 to 1 with default weights.
    pub score: f64,
}

/// The full verdict on one extraction.
#[derive(Clone, Debug, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceAnalysis {
    pub overall: f64,
    pub status: ConfidenceStatus,
    pub fields: Vec<FieldConfidence>,
    pub ocr_quality: OcrQuality,
    pub parsing_quality: ParsingQuality,
    pub completeness: Completeness,
    /// Advice for the user, most important first.
    pub recommendations: Vec<String>,
}

/// Analyze with the default configuration.
pub fn analyze_confidence(receipt: &ParsedReceipt, lines: &[OcrLine]) -> ConfidenceAnalysis {
    ConfidenceScorer::default().analyze(receipt, lines)
}

/// Grades extractions. Pure, and safe to share.
#[derive(Clone, Debug, Default)]
pub struct ConfidenceScorer {
    config: ScoringConfig,
    currency: CurrencyNormalizer,
}

impl ConfidenceScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self {
            config,
            currency: CurrencyNormalizer::default(),
        }
    }

    /// Read amounts written with a local currency symbol, matching
    /// [`crate::parser::ParserConfig::currency_symbol`].
    pub fn with_currency_symbol(mut self, symbol: &str) -> Self {
        self.currency = CurrencyNormalizer::new(symbol);
        self
    }

    #[instrument(level = "debug", skip_all)]
    pub fn analyze(&self, receipt: &ParsedReceipt, lines: &[OcrLine]) -> ConfidenceAnalysis {
        let c = &self.config;

        let ocr_quality = OcrQuality {
            average_confidence: mean(lines.iter().map(|l| l.confidence)),
            line_count: lines.len(),
            low_confidence_lines: lines
                .iter()
                .filter(|l| l.confidence < c.medium_confidence)
                .count(),
        };

        let item_count = receipt.items.len();
        let items_with_price = receipt.items.iter().filter(|i| i.price.is_some()).count();
        let parsing_quality = ParsingQuality {
            item_count,
            items_with_price,
            price_coverage: if item_count == 0 {
                0.0
            } else {
                items_with_price as f64 / item_count as f64
            },
            average_item_confidence: mean(receipt.items.iter().map(|i| i.confidence)),
        };

        let has_total = receipt.total.is_some();
        let has_date = receipt.date.is_some();
        let has_merchant = receipt.merchant_name.is_some();
        let has_items = item_count > 0;
        let weight = |present: bool, w: f64| if present { w } else { 0.0 };
        let completeness = Completeness {
            has_total,
            has_date,
            has_merchant,
            has_items,
            score: weight(has_total, c.total_weight)
                + weight(has_date, c.date_weight)
                + weight(has_merchant, c.merchant_weight)
                + weight(has_items, c.has_items_weight),
        };

        let overall = (c.ocr_weight * ocr_quality.average_confidence
            + c.items_weight * parsing_quality.average_item_confidence
            + c.completeness_weight * completeness.score)
            .clamp(0.0, 1.0);
        let status = if overall >= c.excellent_threshold {
            ConfidenceStatus::Excellent
        } else if overall >= c.good_threshold {
            ConfidenceStatus::Good
        } else if overall >= c.fair_threshold {
            ConfidenceStatus::Fair
        } else {
            ConfidenceStatus::Poor
        };

        let fields = self.field_confidences(receipt, lines);
        let recommendations = self.recommendations(
            receipt,
            &ocr_quality,
            &parsing_quality,
            &fields,
            status,
        );
        debug!(
            overall,
            ?status,
            ocr = ocr_quality.average_confidence,
            completeness = completeness.score,
            "Scored receipt"
        );

        ConfidenceAnalysis {
            overall,
            status,
            fields,
            ocr_quality,
            parsing_quality,
            completeness,
            recommendations,
        }
    }

    fn field_status(&self, confidence: f64) -> FieldStatus {
        let c = &self.config;
        if confidence >= c.high_confidence {
            FieldStatus::High
        } else if confidence >= c.medium_confidence {
            FieldStatus::Medium
        } else if confidence >= c.low_confidence {
            FieldStatus::Low
        } else {
            FieldStatus::VeryLow
        }
    }

    fn field(&self, field: FieldName, lines: &[OcrLine], idx: Option<usize>) -> FieldConfidence {
        let confidence = idx.map(|i| lines[i].confidence).unwrap_or(0.0);
        FieldConfidence {
            field,
            confidence,
            status: self.field_status(confidence),
            line_number: idx.map(|i| i + 1),
        }
    }

    /// Find the OCR line behind each field.
    fn field_confidences(&self, receipt: &ParsedReceipt, lines: &[OcrLine]) -> Vec<FieldConfidence> {
        let total_idx = receipt
            .total
            .and_then(|total| locate_total(lines, total, &self.currency));
        let date_idx = receipt.date.and_then(|date| {
            let formats = DateFormat::all();
            lines
                .iter()
                .position(|l| formats.iter().any(|f| f.find(&l.text) == Some(date)))
        });
        let merchant_idx = receipt.merchant_name.as_deref().and_then(|merchant| {
            lines
                .iter()
                .position(|l| clean_merchant_name(&l.text) == merchant)
        });

        let items = if receipt.items.is_empty() {
            FieldConfidence {
                field: FieldName::Items,
                confidence: 0.0,
                status: FieldStatus::VeryLow,
                line_number: None,
            }
        } else {
            let confidence = mean(receipt.items.iter().map(|i| i.confidence));
            FieldConfidence {
                field: FieldName::Items,
                confidence,
                status: self.field_status(confidence),
                line_number: None,
            }
        };

        vec![
            self.field(FieldName::Total, lines, total_idx),
            self.field(FieldName::Date, lines, date_idx),
            self.field(FieldName::Merchant, lines, merchant_idx),
            items,
        ]
    }

    fn recommendations(
        &self,
        receipt: &ParsedReceipt,
        ocr: &OcrQuality,
        parsing: &ParsingQuality,
        fields: &[FieldConfidence],
        status: ConfidenceStatus,
    ) -> Vec<String> {
        let c = &self.config;
        let mut recs = vec![];

        if ocr.line_count == 0 {
            recs.push(
                "No text was recognized. Make sure the whole receipt is in frame and in focus."
                    .to_owned(),
            );
        } else if ocr.average_confidence < c.medium_confidence {
            recs.push(
                "Low OCR confidence. Retake the photo in better lighting and hold the camera steady."
                    .to_owned(),
            );
        } else if ocr.low_confidence_lines > 0 {
            recs.push(format!(
                "{} of {} lines were hard to read. Double-check the flagged fields.",
                ocr.low_confidence_lines, ocr.line_count
            ));
        }

        if parsing.item_count == 0 {
            recs.push(
                "No items were extracted. Verify that item names and prices are visible."
                    .to_owned(),
            );
        } else if parsing.items_with_price < parsing.item_count {
            recs.push(format!(
                "{} item(s) have no price. Enter the missing prices manually.",
                parsing.item_count - parsing.items_with_price
            ));
        }

        if receipt.total.is_none() {
            recs.push(
                "Total not found. Make sure the bottom of the receipt is in the photo.".to_owned(),
            );
        }
        if receipt.date.is_none() {
            recs.push("Purchase date not found. Enter it manually.".to_owned());
        }
        if receipt.merchant_name.is_none() {
            recs.push("Store name not found. Enter it manually.".to_owned());
        }

        for field in fields {
            if field.line_number.is_some() && field.status == FieldStatus::VeryLow {
                recs.push(format!(
                    "The {} was read with very low confidence. Please verify it.",
                    field_label(field.field)
                ));
            }
        }

        recs.extend(self.arithmetic_checks(receipt));

        if status == ConfidenceStatus::Poor {
            recs.push("Overall confidence is low. Review every field before saving.".to_owned());
        }
        recs
    }

    /// Do the amounts add up?
    fn arithmetic_checks(&self, receipt: &ParsedReceipt) -> Vec<String> {
        let tolerance = self.config.arithmetic_tolerance;
        let mut recs = vec![];

        if let (Some(subtotal), Some(tax), Some(total)) =
            (receipt.subtotal, receipt.tax, receipt.total)
            && (subtotal + tax - total).abs() > tolerance
        {
            recs.push(format!(
                "Subtotal plus tax ({:.2}) does not match the total ({total:.2}). Double-check these amounts.",
                subtotal + tax
            ));
        }

        let prices = receipt
            .items
            .iter()
            .filter_map(|i| i.price)
            .collect::<Vec<_>>();
        // Only compare when every item has a price, or the sum means nothing.
        if !prices.is_empty() && prices.len() == receipt.items.len() {
            let item_sum: f64 = prices.iter().sum();
            let (label, expected) = match (receipt.subtotal, receipt.tax, receipt.total) {
                (Some(subtotal), _, _) => ("subtotal", Some(subtotal)),
                (None, None, Some(total)) => ("total", Some(total)),
                _ => ("", None),
            };
            if let Some(expected) = expected
                && (item_sum - expected).abs() > tolerance
            {
                recs.push(format!(
                    "Item prices add up to {item_sum:.2}, but the {label} is {expected:.2}. Some items may be missing or misread."
                ));
            }
        }
        recs
    }
}

fn field_label(field: FieldName) -> &'static str {
    match field {
        FieldName::Total => "total",
        FieldName::Date => "date",
        FieldName::Merchant => "store name",
        FieldName::Items => "item list",
    }
}

/// Find the line a total came from: a total label with that amount, or a
/// bare amount directly after a total label.
fn locate_total(lines: &[OcrLine], total: f64, currency: &CurrencyNormalizer) -> Option<usize> {
    let is_total_kind = |kind: TotalKind| {
        !matches!(kind, TotalKind::Subtotal | TotalKind::Tax | TotalKind::TotalTax)
    };
    let same = |amount: f64| (amount - total).abs() < 0.005;

    let labelled = lines.iter().position(|l| {
        total_label(&l.text).is_some_and(is_total_kind)
            && split_trailing_amount(&currency.normalize(&l.text))
                .is_some_and(|(_, amount)| same(amount))
    });
    labelled.or_else(|| {
        lines.iter().enumerate().skip(1).find_map(|(idx, l)| {
            let after_label = lines[..idx]
                .iter()
                .rev()
                .find(|prev| !prev.text.trim().is_empty())
                .is_some_and(|prev| total_label(&prev.text).is_some_and(is_total_kind));
            (after_label && price_only(&currency.normalize(&l.text)).is_some_and(same))
                .then_some(idx)
        })
    })
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::parser::{ParserConfig, ReceiptParser};

    fn lines(texts: &[&str], confidence: f64) -> Vec<OcrLine> {
        texts.iter().map(|t| OcrLine::new(*t, confidence)).collect()
    }

    fn parse(lines: &[OcrLine]) -> ParsedReceipt {
        ReceiptParser::with_today(
            ParserConfig::default(),
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        )
        .parse(lines)
    }

    fn good_receipt(confidence: f64) -> Vec<OcrLine> {
        lines(
            &[
                "GROCERY STORE",
                "01/15/2024",
                "Apples 2.99",
                "Bananas 1.49",
                "Subtotal 4.48",
                "Tax 0.36",
                "Total 4.84",
            ],
            confidence,
        )
    }

    #[test]
    fn empty_receipt_is_poor_with_recommendations() {
        let analysis = analyze_confidence(&ParsedReceipt::default(), &[]);
        assert_eq!(analysis.status, ConfidenceStatus::Poor);
        assert_eq!(analysis.overall, 0.0);
        assert!(!analysis.recommendations.is_empty());
        assert!(
            analysis
                .fields
                .iter()
                .all(|f| f.status == FieldStatus::VeryLow && f.confidence == 0.0)
        );
    }

    #[test]
    fn clean_receipt_is_excellent() {
        let input = good_receipt(0.95);
        let analysis = analyze_confidence(&parse(&input), &input);
        // 0.3 * 0.95 + 0.3 * 0.95 + 0.4 * 1.0
        assert!((analysis.overall - 0.97).abs() < 1e-9);
        assert_eq!(analysis.status, ConfidenceStatus::Excellent);
        assert!(analysis.recommendations.is_empty(), "{:?}", analysis.recommendations);
        assert!((analysis.completeness.score - 1.0).abs() < 1e-9);
        assert_eq!(analysis.parsing_quality.price_coverage, 1.0);

        let line_of = |name: FieldName| {
            analysis
                .fields
                .iter()
                .find(|f| f.field == name)
                .and_then(|f| f.line_number)
        };
        assert_eq!(line_of(FieldName::Merchant), Some(1));
        assert_eq!(line_of(FieldName::Date), Some(2));
        assert_eq!(line_of(FieldName::Total), Some(7));
    }

    #[test]
    fn total_on_the_line_after_its_label_is_located() {
        let input = lines(&["TOTAL", "4.84"], 0.9);
        let currency = CurrencyNormalizer::default();
        assert_eq!(locate_total(&input, 4.84, &currency), Some(1));
        assert_eq!(locate_total(&input, 5.00, &currency), None);
    }

    #[test]
    fn overall_is_monotonic_in_ocr_confidence() {
        let mut previous = -1.0;
        for confidence in [0.6, 0.7, 0.8, 0.9, 1.0] {
            let input = good_receipt(confidence);
            let receipt = parse(&input);
            // Hold item confidence fixed; only the OCR lines change.
            let mut fixed = receipt.clone();
            for item in &mut fixed.items {
                item.confidence = 0.8;
            }
            let overall = analyze_confidence(&fixed, &input).overall;
            assert!(overall >= previous, "{overall} < {previous}");
            previous = overall;
        }
    }

    #[test]
    fn overall_is_monotonic_in_completeness_and_items() {
        let input = good_receipt(0.9);
        let full = parse(&input);
        let scorer = ConfidenceScorer::default();

        let mut receipt = ParsedReceipt {
            items: vec![],
            ..full.clone()
        };
        receipt.total = None;
        receipt.date = None;
        receipt.merchant_name = None;
        let mut previous = scorer.analyze(&receipt, &input).overall;

        receipt.merchant_name = full.merchant_name.clone();
        let next = scorer.analyze(&receipt, &input).overall;
        assert!(next >= previous);
        previous = next;

        receipt.date = full.date;
        let next = scorer.analyze(&receipt, &input).overall;
        assert!(next >= previous);
        previous = next;

        receipt.total = full.total;
        let next = scorer.analyze(&receipt, &input).overall;
        assert!(next >= previous);
        previous = next;

        for item in &full.items {
            receipt.items.push(item.clone());
            let next = scorer.analyze(&receipt, &input).overall;
            assert!(next >= previous);
            previous = next;
        }
    }

    #[test]
    fn arithmetic_mismatches_are_flagged() {
        let input = lines(
            &[
                "GROCERY STORE",
                "01/15/2024",
                "Apples 2.99",
                "Subtotal 4.48",
                "Tax 0.36",
                "Total 5.84",
            ],
            0.95,
        );
        let analysis = analyze_confidence(&parse(&input), &input);
        let recs = analysis.recommendations.join("\n");
        assert!(recs.contains("Subtotal plus tax (4.84)"), "{recs}");
        assert!(recs.contains("Item prices add up to 2.99"), "{recs}");
    }

    #[test]
    fn low_ocr_confidence_recommends_retaking() {
        let input = good_receipt(0.5);
        let config = ParserConfig {
            min_item_confidence: 0.0,
            ..ParserConfig::default()
        };
        let receipt =
            ReceiptParser::with_today(config, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())
                .parse(&input);
        let analysis = analyze_confidence(&receipt, &input);
        assert!(analysis.recommendations[0].contains("Retake"));
        assert_eq!(analysis.ocr_quality.low_confidence_lines, 7);
        assert_eq!(analysis.fields[0].status, FieldStatus::Low);
    }

    #[test]
    fn totals_in_a_local_currency_are_located() {
        let input = lines(&["ROOIBOS HOUSE", "Rooibos Tea R 45.99", "Total R45.99"], 0.9);
        let config = ParserConfig {
            currency_symbol: "R".to_owned(),
            ..ParserConfig::default()
        };
        let receipt =
            ReceiptParser::with_today(config, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())
                .parse(&input);
        assert_eq!(receipt.total, Some(45.99));

        let analysis = ConfidenceScorer::default()
            .with_currency_symbol("R")
            .analyze(&receipt, &input);
        let total = &analysis.fields[0];
        assert_eq!(total.field, FieldName::Total);
        assert_eq!(total.line_number, Some(3));
        assert!((total.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn unpriced_items_are_flagged() {
        let input = lines(&["GROCERY STORE", "01/15/2024", "2 x Bread", "Total 3.00"], 0.9);
        let analysis = analyze_confidence(&parse(&input), &input);
        assert_eq!(analysis.parsing_quality.item_count, 1);
        assert_eq!(analysis.parsing_quality.price_coverage, 0.0);
        assert!(
            analysis
                .recommendations
                .iter()
                .any(|r| r.contains("1 item(s) have no price")),
            "{:?}",
            analysis.recommendations
        );
    }

    #[test]
    fn weights_are_configurable() {
        let input = good_receipt(0.9);
        let receipt = parse(&input);
        let scorer = ConfidenceScorer::new(ScoringConfig {
            ocr_weight: 1.0,
            items_weight: 0.0,
            completeness_weight: 0.0,
            ..ScoringConfig::default()
        });
        assert!((scorer.analyze(&receipt, &input).overall - 0.9).abs() < 1e-9);
    }

    #[test]
    fn statuses_serialize_for_javascript() -> Result<()> {
        let analysis = analyze_confidence(&ParsedReceipt::default(), &[]);
        let json = serde_json::to_value(&analysis)?;
        assert_eq!(json["status"], "poor");
        assert_eq!(json["fields"][0]["status"], "very-low");
        assert!(json["ocrQuality"]["averageConfidence"].is_number());
        Ok(())
    }
}
