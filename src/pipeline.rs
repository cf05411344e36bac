//! The end-to-end receipt pipeline.
//!
//! Stages run strictly in order, and each one either hands its output to the
//! next or stops with a typed error. CPU-heavy image work runs on Tokio's
//! blocking pool. The OCR adapter is the only state shared between requests.

use std::sync::Arc;

use chrono::NaiveDate;
use schemars::JsonSchema;

use crate::{
    async_utils::spawn_blocking_propagating_panics,
    confidence::{ConfidenceAnalysis, ConfidenceScorer},
    config::PipelineConfig,
    error::{ErrorReport, PipelineError},
    intake::{RawImage, check_input},
    ocr::{LineSource, OcrAdapter},
    parser::{ParsedReceipt, ReceiptParser},
    prelude::*,
    preprocess::{PreprocessingSummary, preprocess},
    quality::{QualityReport, validate_or_err},
};

/// What the OCR stage did, for diagnostics.
#[derive(Clone, Debug, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrSummary {
    /// The engine that produced the text.
    pub engine: String,
    /// Which part of the engine response the lines came from.
    pub line_source: LineSource,
    /// Number of non-empty lines recognized.
    pub line_count: usize,
}

/// A successful extraction.
#[derive(Clone, Debug, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOutput {
    pub parsed_receipt: ParsedReceipt,
    pub confidence: ConfidenceAnalysis,
    pub quality: QualityReport,
    pub preprocessing: PreprocessingSummary,
    pub ocr: OcrSummary,
}

/// The result of scanning one image, as written by the CLI.
#[derive(Clone, Debug, JsonSchema, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScanOutput {
    Ok(Box<PipelineOutput>),
    Failed { error: ErrorReport },
}

impl From<Result<PipelineOutput, PipelineError>> for ScanOutput {
    fn from(result: Result<PipelineOutput, PipelineError>) -> Self {
        match result {
            Ok(output) => ScanOutput::Ok(Box::new(output)),
            Err(err) => ScanOutput::Failed {
                error: err.to_report(),
            },
        }
    }
}

/// Runs images through validation, preprocessing, OCR, parsing and scoring.
///
/// Cheap to clone. Clones share one OCR engine.
#[derive(Clone)]
pub struct ReceiptPipeline {
    config: Arc<PipelineConfig>,
    ocr: Arc<OcrAdapter>,
    scorer: ConfidenceScorer,
    /// Fixed "today" for date plausibility checks, for reproducible output.
    today: Option<NaiveDate>,
}

impl ReceiptPipeline {
    /// Create a pipeline, building the OCR engine named in `config`. The
    /// engine is started lazily.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let ocr = Arc::new(OcrAdapter::from_config(&config.ocr)?);
        Ok(Self::with_ocr(config, ocr))
    }

    /// Create a pipeline around an existing OCR adapter.
    pub fn with_ocr(config: PipelineConfig, ocr: Arc<OcrAdapter>) -> Self {
        Self {
            scorer: ConfidenceScorer::new(config.scoring.clone())
                .with_currency_symbol(&config.parser.currency_symbol),
            config: Arc::new(config),
            ocr,
            today: None,
        }
    }

    /// Judge receipt dates relative to `today` instead of the system clock.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    /// Process a single image.
    #[instrument(level = "debug", skip_all, fields(content_type = %image.content_type, bytes = image.bytes.len()))]
    pub async fn process(&self, image: RawImage) -> Result<PipelineOutput, PipelineError> {
        check_input(&image, &self.config.intake)?;
        let bytes: Arc<[u8]> = image.bytes.into();

        let quality = {
            let bytes = bytes.clone();
            let config = self.config.quality.clone();
            spawn_blocking_propagating_panics(move || validate_or_err(&bytes, &config)).await?
        };
        if !quality.warnings.is_empty() {
            debug!(warnings = ?quality.warnings, "Image passed with warnings");
        }

        let options = self.config.preprocess.options();
        let preprocessed =
            spawn_blocking_propagating_panics(move || preprocess(&bytes, &options)).await?;
        debug!(
            operations = ?preprocessed.operations_applied,
            "Preprocessed image"
        );

        let recognition = self
            .ocr
            .recognize_detailed(&preprocessed.bytes, preprocessed.mime_type)
            .await?;

        let parser = match self.today {
            Some(today) => ReceiptParser::with_today(self.config.parser.clone(), today),
            None => ReceiptParser::new(self.config.parser.clone()),
        };
        let parsed_receipt = parser.parse(&recognition.lines);

        let mut confidence = self.scorer.analyze(&parsed_receipt, &recognition.lines);
        for suggestion in quality.warning_suggestions() {
            if !confidence.recommendations.contains(&suggestion) {
                confidence.recommendations.push(suggestion);
            }
        }
        debug!(
            overall = confidence.overall,
            status = ?confidence.status,
            items = parsed_receipt.items.len(),
            "Scored receipt"
        );

        Ok(PipelineOutput {
            parsed_receipt,
            confidence,
            preprocessing: preprocessed.summary(),
            ocr: OcrSummary {
                engine: self.ocr.engine_name().to_owned(),
                line_source: recognition.source,
                line_count: recognition.lines.len(),
            },
            quality,
        })
    }

    /// Stop the OCR engine.
    pub async fn shutdown(&self) -> Result<()> {
        self.ocr.terminate().await?;
        Ok(())
    }
}
