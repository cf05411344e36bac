//! Typed errors for each pipeline stage.
//!
//! Validation and preprocessing fail fast. OCR failures are reported but never
//! retried. Parsing and scoring never fail: an unreadable receipt is a
//! low-confidence result, not an error.

use schemars::JsonSchema;

use crate::{prelude::*, quality::QualityError};

/// The machine-readable category of a pipeline failure.
#[derive(Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The input was rejected before entering the pipeline.
    InputError,
    /// The image failed quality checks. The user should retake the photo.
    ValidationError,
    /// An image operation failed on otherwise acceptable bytes.
    PreprocessingError,
    /// The OCR engine failed to start or crashed mid-recognition.
    RecognitionError,
}

/// A structured error suitable for returning to the calling application.
#[derive(Clone, Debug, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    /// What kind of failure this was.
    pub kind: ErrorKind,

    /// A human-readable description.
    pub message: String,

    /// Things the end user can do about it.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
}

/// Errors raised while rejecting input at the pipeline boundary.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("unsupported content type {0:?} (supported: {1})")]
    UnsupportedContentType(String, String),

    #[error("declared content type {declared:?} does not match image data ({detected:?})")]
    ContentTypeMismatch { declared: String, detected: String },

    #[error("image is {size} bytes, larger than the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },

    #[error("image is empty")]
    Empty,
}

/// An image operation failed.
#[derive(Debug, thiserror::Error)]
pub enum PreprocessingError {
    #[error("could not decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("{operation} failed: {message}")]
    Operation {
        operation: &'static str,
        message: String,
    },

    #[error("could not encode preprocessed image: {0}")]
    Encode(#[source] image::ImageError),
}

/// The OCR engine failed.
#[derive(Debug, thiserror::Error)]
pub enum RecognitionError {
    #[error("OCR engine {engine} failed to initialize: {message}")]
    Initialization { engine: String, message: String },

    #[error("OCR engine {engine} failed: {message}")]
    Engine { engine: String, message: String },
}

impl RecognitionError {
    /// Wrap an [`anyhow::Error`] from an engine, keeping its full context
    /// chain as diagnostic text.
    pub fn engine(engine: &str, err: &anyhow::Error) -> Self {
        Self::Engine {
            engine: engine.to_owned(),
            message: format!("{err:#}"),
        }
    }
}

/// Any failure of [`crate::pipeline::ReceiptPipeline::process`].
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Validation(#[from] QualityError),

    #[error(transparent)]
    Preprocessing(#[from] PreprocessingError),

    #[error(transparent)]
    Recognition(#[from] RecognitionError),
}

impl PipelineError {
    /// Which category does this error belong to?
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Input(_) => ErrorKind::InputError,
            PipelineError::Validation(_) => ErrorKind::ValidationError,
            PipelineError::Preprocessing(_) => ErrorKind::PreprocessingError,
            PipelineError::Recognition(_) => ErrorKind::RecognitionError,
        }
    }

    /// Convert to a serializable report.
    pub fn to_report(&self) -> ErrorReport {
        let suggestions = match self {
            PipelineError::Input(InputError::TooLarge { .. }) => {
                vec!["Upload a smaller photo, or lower the camera resolution".to_owned()]
            }
            PipelineError::Input(_) => {
                vec!["Upload the receipt as a JPEG, PNG or WebP image".to_owned()]
            }
            PipelineError::Validation(err) => err.suggestions.clone(),
            PipelineError::Preprocessing(_) => vec![],
            PipelineError::Recognition(_) => {
                vec!["Try the request again; the OCR engine may have been busy".to_owned()]
            }
        };
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
            suggestions,
        }
    }
}
