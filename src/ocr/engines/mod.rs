//! OCR engine interface.

use std::sync::Arc;

use schemars::JsonSchema;

use crate::prelude::*;

use super::{BoundingBox, OcrConfig};

pub mod fixture;
pub mod tesseract;

/// An external OCR engine.
///
/// Engines are black boxes. They may report rich per-line data, a per-word
/// table, or only flat text with an overall confidence; [`super::extract_lines`]
/// copes with all three.
#[async_trait]
pub trait OcrEngine: Send + Sync + 'static {
    /// A short name for logs and error reports.
    fn name(&self) -> &str;

    /// Acquire whatever the engine needs. Called once before the first
    /// recognition, and again after [`OcrEngine::stop`].
    async fn start(&self) -> Result<()>;

    /// Recognize text in an image.
    async fn recognize(&self, image: &[u8], mime_type: &str) -> Result<EngineResponse>;

    /// Release the engine's resources.
    async fn stop(&self) -> Result<()>;
}

/// Which scale an engine reports confidences on.
#[derive(Clone, Copy, Debug, Default, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceScale {
    /// 0–100, as Tesseract reports.
    #[default]
    Percent,
    /// 0–1.
    Unit,
}

impl ConfidenceScale {
    /// Convert a raw confidence to `[0, 1]`.
    pub fn normalize(self, raw: f64) -> f64 {
        if !raw.is_finite() {
            return 0.0;
        }
        let value = match self {
            ConfidenceScale::Percent => raw / 100.0,
            ConfidenceScale::Unit => raw,
        };
        value.clamp(0.0, 1.0)
    }
}

/// One line as an engine reports it, before normalisation.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineLine {
    pub text: String,
    /// On the response's [`ConfidenceScale`].
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
}

/// Everything an engine might tell us about an image.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineResponse {
    /// The full recognized text.
    pub text: String,

    /// Overall confidence, on `confidence_scale`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,

    /// The scale of `confidence` and of any `lines`.
    pub confidence_scale: ConfidenceScale,

    /// Rich per-line data, if the engine provides it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines: Option<Vec<EngineLine>>,

    /// A Tesseract-style per-word TSV report. Always on a 0–100 scale.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tsv: Option<String>,
}

/// Available engines.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    JsonSchema,
    PartialEq,
    Eq,
    Serialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// The `tesseract` command-line tool.
    #[default]
    Tesseract,
    /// Replay a recorded [`EngineResponse`] from a JSON file.
    Fixture,
}

/// Build the engine named in our configuration.
pub fn engine_for_config(config: &OcrConfig) -> Result<Arc<dyn OcrEngine>> {
    match config.engine {
        EngineKind::Tesseract => Ok(Arc::new(tesseract::TesseractEngine::new(
            config.language.clone(),
            config.page_segmentation_mode,
        ))),
        EngineKind::Fixture => {
            let path = config
                .fixture
                .as_deref()
                .ok_or_else(|| anyhow!("the fixture engine requires a fixture path"))?;
            Ok(Arc::new(fixture::FixtureEngine::new(path)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidences_are_normalized_and_clamped() {
        assert!((ConfidenceScale::Percent.normalize(91.0) - 0.91).abs() < 1e-9);
        assert_eq!(ConfidenceScale::Unit.normalize(0.4), 0.4);
        assert_eq!(ConfidenceScale::Percent.normalize(-1.0), 0.0);
        assert_eq!(ConfidenceScale::Unit.normalize(3.0), 1.0);
        assert_eq!(ConfidenceScale::Unit.normalize(f64::NAN), 0.0);
    }

    #[test]
    fn fixture_engine_requires_a_path() {
        let config = OcrConfig {
            engine: EngineKind::Fixture,
            ..OcrConfig::default()
        };
        assert!(engine_for_config(&config).is_err());
    }

    #[test]
    fn responses_deserialize_from_sparse_json() -> Result<()> {
        let response: EngineResponse =
            serde_json::from_str(r#"{ "text": "A\nB", "confidence": 0.8, "confidenceScale": "unit" }"#)?;
        assert_eq!(response.confidence_scale, ConfidenceScale::Unit);
        assert!(response.lines.is_none());
        Ok(())
    }
}
