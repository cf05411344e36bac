//! OCR adapter.
//!
//! Engines disagree about what they return. Some give us rich per-line
//! objects, some only a per-word table, and some nothing but a text blob and
//! one overall score. [`extract_lines`] turns all of these into
//! [`OcrLine`]s, preferring the most detailed shape available. Returning an
//! empty list when text *was* recognized would make every later stage fail,
//! so the fallbacks matter.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use schemars::JsonSchema;
use tokio::sync::Mutex;

use crate::{error::RecognitionError, prelude::*};

use self::engines::{EngineKind, EngineResponse, OcrEngine};

pub mod engines;
mod tsv;

/// OCR configuration.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields, rename_all = "snake_case")]
pub struct OcrConfig {
    /// Which engine to use.
    pub engine: EngineKind,

    /// Tesseract language code(s), e.g. `eng` or `eng+fra`.
    pub language: String,

    /// Tesseract page segmentation mode. 4 ("a single column of text of
    /// variable sizes") suits most receipts.
    pub page_segmentation_mode: u8,

    /// Recorded response for the fixture engine.
    pub fixture: Option<PathBuf>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::Tesseract,
            language: "eng".to_owned(),
            page_segmentation_mode: 4,
            fixture: None,
        }
    }
}

/// A pixel rectangle, `x0,y0` inclusive and `x1,y1` exclusive.
#[derive(Clone, Copy, Debug, Deserialize, JsonSchema, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl BoundingBox {
    /// The smallest box containing both boxes.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }
}

/// One recognized line of text, in reading order.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrLine {
    pub text: String,
    /// Always in `[0, 1]`.
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<BoundingBox>,
}

impl OcrLine {
    pub fn new(text: impl Into<String>, confidence: f64) -> Self {
        Self {
            text: text.into(),
            confidence,
            bbox: None,
        }
    }
}

/// Which part of the engine response our lines came from.
#[derive(Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineSource {
    /// Rich per-line data.
    Structured,
    /// The per-word TSV report, grouped into lines.
    Tabular,
    /// The flat text, split on newlines. Every line carries the overall
    /// confidence.
    FlatText,
    /// The engine recognized nothing.
    Empty,
}

/// Lines plus where they came from.
#[derive(Clone, Debug)]
pub struct Recognition {
    pub lines: Vec<OcrLine>,
    pub source: LineSource,
}

/// Extract lines from an engine response, using the richest data available.
pub fn extract_lines(response: &EngineResponse) -> Recognition {
    let scale = response.confidence_scale;

    if let Some(lines) = &response.lines {
        let lines = lines
            .iter()
            .filter(|l| !l.text.trim().is_empty())
            .map(|l| OcrLine {
                text: l.text.trim().to_owned(),
                confidence: scale.normalize(l.confidence),
                bbox: l.bbox,
            })
            .collect::<Vec<_>>();
        if !lines.is_empty() {
            return Recognition {
                lines,
                source: LineSource::Structured,
            };
        }
    }

    if let Some(tsv) = &response.tsv {
        let lines = tsv::parse_tsv_lines(tsv)
            .into_iter()
            .map(|l| OcrLine {
                text: l.text,
                confidence: engines::ConfidenceScale::Percent.normalize(l.confidence),
                bbox: l.bbox,
            })
            .collect::<Vec<_>>();
        if !lines.is_empty() {
            return Recognition {
                lines,
                source: LineSource::Tabular,
            };
        }
    }

    // Last resort. Don't invent per-line precision we don't have.
    let overall = scale.normalize(response.confidence.unwrap_or(0.0));
    let lines = response
        .text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| OcrLine::new(l, overall))
        .collect::<Vec<_>>();
    if lines.is_empty() {
        Recognition {
            lines,
            source: LineSource::Empty,
        }
    } else {
        Recognition {
            lines,
            source: LineSource::FlatText,
        }
    }
}

/// Owns an [`OcrEngine`] and its lifecycle.
///
/// The engine is started at most once, on the first call to
/// [`OcrAdapter::initialize`] or [`OcrAdapter::recognize`]. Create one
/// adapter at startup, share it via `Arc`, and call
/// [`OcrAdapter::terminate`] on shutdown.
pub struct OcrAdapter {
    engine: Arc<dyn OcrEngine>,
    initialized: AtomicBool,
    /// Serializes start and stop.
    lifecycle: Mutex<()>,
}

impl OcrAdapter {
    pub fn new(engine: Arc<dyn OcrEngine>) -> Self {
        Self {
            engine,
            initialized: AtomicBool::new(false),
            lifecycle: Mutex::new(()),
        }
    }

    /// Build an adapter for the engine named in `config`.
    pub fn from_config(config: &OcrConfig) -> Result<Self> {
        Ok(Self::new(engines::engine_for_config(config)?))
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Start the engine if needed. Safe to call repeatedly and concurrently.
    #[instrument(level = "debug", skip_all, fields(engine = %self.engine.name()))]
    pub async fn initialize(&self) -> Result<(), RecognitionError> {
        if self.is_initialized() {
            return Ok(());
        }
        let _guard = self.lifecycle.lock().await;
        if self.is_initialized() {
            return Ok(());
        }
        self.engine
            .start()
            .await
            .map_err(|err| RecognitionError::Initialization {
                engine: self.engine.name().to_owned(),
                message: format!("{err:#}"),
            })?;
        self.initialized.store(true, Ordering::Release);
        info!(engine = %self.engine.name(), "OCR engine initialized");
        Ok(())
    }

    /// Recognize lines of text in an image.
    pub async fn recognize(
        &self,
        image: &[u8],
        mime_type: &str,
    ) -> Result<Vec<OcrLine>, RecognitionError> {
        Ok(self.recognize_detailed(image, mime_type).await?.lines)
    }

    /// Like [`OcrAdapter::recognize`], but also report which part of the
    /// engine response the lines came from.
    #[instrument(level = "debug", skip_all, fields(engine = %self.engine.name()))]
    pub async fn recognize_detailed(
        &self,
        image: &[u8],
        mime_type: &str,
    ) -> Result<Recognition, RecognitionError> {
        self.initialize().await?;
        let response = self
            .engine
            .recognize(image, mime_type)
            .await
            .map_err(|err| RecognitionError::engine(self.engine.name(), &err))?;
        let recognition = extract_lines(&response);
        debug!(
            source = ?recognition.source,
            lines = recognition.lines.len(),
            "Extracted OCR lines"
        );
        if recognition.source == LineSource::FlatText {
            warn!("OCR engine returned no line data; split flat text instead");
        }
        Ok(recognition)
    }

    /// Stop the engine. A later call to [`OcrAdapter::initialize`] or
    /// [`OcrAdapter::recognize`] starts it again.
    #[instrument(level = "debug", skip_all, fields(engine = %self.engine.name()))]
    pub async fn terminate(&self) -> Result<(), RecognitionError> {
        let _guard = self.lifecycle.lock().await;
        if !self.is_initialized() {
            return Ok(());
        }
        self.engine
            .stop()
            .await
            .map_err(|err| RecognitionError::engine(self.engine.name(), &err))?;
        self.initialized.store(false, Ordering::Release);
        info!(engine = %self.engine.name(), "OCR engine terminated");
        Ok(())
    }
}
