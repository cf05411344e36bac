//! Accepting images at the pipeline boundary.
//!
//! These checks are cheap and happen before any decoding: the declared
//! content type must be on the allow-list, the bytes must look like that
//! type, and the buffer must be under the size ceiling.

use schemars::JsonSchema;

use crate::{error::InputError, prelude::*};

/// An uploaded image, exactly as received.
#[derive(Clone, Debug)]
pub struct RawImage {
    pub bytes: Vec<u8>,
    /// The declared MIME type, e.g. `image/jpeg`.
    pub content_type: String,
}

impl RawImage {
    pub fn new(bytes: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            bytes,
            content_type: content_type.into(),
        }
    }

    /// Load an image from disk, sniffing its MIME type.
    pub async fn from_path(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {:?}", path.display()))?;
        let content_type = get_mime_type(path, &bytes)?;
        Ok(Self::new(bytes, content_type))
    }
}

/// Intake configuration.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields, rename_all = "snake_case")]
pub struct IntakeConfig {
    /// Accepted MIME types.
    pub allowed_content_types: Vec<String>,

    /// Images larger than this many bytes are rejected outright.
    pub max_bytes: usize,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            allowed_content_types: vec![
                "image/jpeg".to_owned(),
                "image/png".to_owned(),
                "image/webp".to_owned(),
            ],
            max_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Check an image against the allow-list and size ceiling.
pub fn check_input(image: &RawImage, config: &IntakeConfig) -> Result<(), InputError> {
    if image.bytes.is_empty() {
        return Err(InputError::Empty);
    }
    if image.bytes.len() > config.max_bytes {
        return Err(InputError::TooLarge {
            size: image.bytes.len(),
            limit: config.max_bytes,
        });
    }

    let declared = normalize_content_type(&image.content_type);
    if !config.allowed_content_types.iter().any(|t| *t == declared) {
        return Err(InputError::UnsupportedContentType(
            image.content_type.clone(),
            config.allowed_content_types.join(", "),
        ));
    }

    // If we can't recognise the bytes at all, let the decoder complain later.
    if let Some(detected) = infer::get(&image.bytes).map(|t| t.mime_type())
        && detected != declared
    {
        return Err(InputError::ContentTypeMismatch {
            declared,
            detected: detected.to_owned(),
        });
    }
    Ok(())
}

/// Lower-case a content type and drop any parameters. Also accepts the
/// common non-standard `image/jpg`.
fn normalize_content_type(content_type: &str) -> String {
    let base = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if base == "image/jpg" {
        "image/jpeg".to_owned()
    } else {
        base
    }
}

/// Get the MIME type of a file, from its contents if possible, otherwise its
/// extension.
pub fn get_mime_type(path: &Path, bytes: &[u8]) -> Result<String> {
    if let Some(kind) = infer::get(bytes) {
        return Ok(kind.mime_type().to_owned());
    }
    mime_guess::from_path(path)
        .first_raw()
        .map(|m| m.to_owned())
        .ok_or_else(|| anyhow!("unknown MIME type for {:?}", path.display()))
}
