//! Pipeline configuration.
//!
//! Every section has working defaults, so an empty file (or no file at all)
//! is a valid configuration. Files may be TOML or JSON:
//!
//! ```toml
//! [preprocess]
//! level = "quick"
//!
//! [ocr]
//! language = "eng+fra"
//!
//! [parser]
//! min_item_confidence = 0.5
//! ```

use schemars::JsonSchema;

use crate::{
    async_utils::io::read_json_or_toml, confidence::ScoringConfig, intake::IntakeConfig,
    ocr::OcrConfig, parser::ParserConfig, prelude::*, preprocess::PreprocessConfig,
    quality::QualityConfig,
};

/// Configuration for [`crate::pipeline::ReceiptPipeline`].
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields, rename_all = "snake_case")]
pub struct PipelineConfig {
    /// Checks applied before an image is decoded.
    pub intake: IntakeConfig,
    /// Image quality gates.
    pub quality: QualityConfig,
    /// Image cleanup before OCR.
    pub preprocess: PreprocessConfig,
    /// OCR engine selection and options.
    pub ocr: OcrConfig,
    /// Receipt parsing heuristics.
    pub parser: ParserConfig,
    /// Confidence weights and thresholds.
    pub scoring: ScoringConfig,
}

impl PipelineConfig {
    /// Load configuration from a TOML or JSON file.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub async fn from_path(path: &Path) -> Result<Self> {
        let config = read_json_or_toml::<Self>(path).await?;
        config
            .check()
            .with_context(|| format!("invalid configuration in {:?}", path.display()))?;
        Ok(config)
    }

    /// Load configuration from `path`, or use the defaults.
    pub async fn from_optional_path(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_path(path).await,
            None => Ok(Self::default()),
        }
    }

    /// Reject settings that would make the pipeline misbehave rather than
    /// fail loudly.
    pub fn check(&self) -> Result<()> {
        if self.intake.allowed_content_types.is_empty() {
            return Err(anyhow!("intake.allowed_content_types must not be empty"));
        }
        if self.preprocess.max_dimension == 0 {
            return Err(anyhow!("preprocess.max_dimension must be positive"));
        }
        if !(0.0..=1.0).contains(&self.parser.min_item_confidence) {
            return Err(anyhow!(
                "parser.min_item_confidence must be between 0 and 1, got {}",
                self.parser.min_item_confidence
            ));
        }
        if self.parser.date_formats.is_empty() {
            return Err(anyhow!("parser.date_formats must not be empty"));
        }
        let s = &self.scoring;
        if !(s.excellent_threshold >= s.good_threshold && s.good_threshold >= s.fair_threshold)
        {
            return Err(anyhow!(
                "scoring thresholds must satisfy excellent >= good >= fair"
            ));
        }
        Ok(())
    }
}
