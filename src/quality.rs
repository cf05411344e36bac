//! Image quality gates.
//!
//! We inspect the raw upload before spending any time on OCR. Each check has
//! an error threshold, which blocks the request, and a warning threshold, which
//! is passed along to the caller and later folded into recommendations.

use image::{GenericImageView as _, GrayImage};
use schemars::JsonSchema;

use crate::prelude::*;

/// Thresholds for [`validate`].
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields, rename_all = "snake_case")]
pub struct QualityConfig {
    /// Images narrower than this are rejected.
    pub min_width: u32,
    /// Images shorter than this are rejected.
    pub min_height: u32,
    /// Images narrower than this get a warning.
    pub recommended_width: u32,
    /// Images shorter than this get a warning.
    pub recommended_height: u32,
    /// Files smaller than this are rejected. Tiny files are usually
    /// thumbnails or heavily recompressed.
    pub min_bytes: usize,
    /// Files larger than this are rejected.
    pub max_bytes: usize,
    /// Laplacian variance below this is rejected as hopelessly blurred.
    pub sharpness_error_below: f64,
    /// Laplacian variance below this gets a blur warning.
    pub sharpness_warning_below: f64,
    /// Luminance standard deviation below this is rejected (blank image).
    pub contrast_error_below: f64,
    /// Luminance standard deviation below this gets a warning.
    pub contrast_warning_below: f64,
    /// Luminance standard deviation above this gets a warning (harsh
    /// shadows, flash glare).
    pub contrast_warning_above: f64,
    /// Mean luminance outside `[min, max]` is rejected.
    pub brightness_error_range: [f64; 2],
    /// Mean luminance outside `[min, max]` gets a warning.
    pub brightness_warning_range: [f64; 2],
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_width: 600,
            min_height: 400,
            recommended_width: 1000,
            recommended_height: 800,
            min_bytes: 50 * 1024,
            max_bytes: 10 * 1024 * 1024,
            sharpness_error_below: 10.0,
            sharpness_warning_below: 100.0,
            contrast_error_below: 8.0,
            contrast_warning_below: 25.0,
            contrast_warning_above: 110.0,
            brightness_error_range: [15.0, 245.0],
            brightness_warning_range: [50.0, 200.0],
        }
    }
}

/// Raw measurements taken from the image.
#[derive(Clone, Debug, Default, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityMetrics {
    /// Variance of the 3×3 Laplacian over greyscale. Higher is sharper.
    pub sharpness: f64,
    /// Standard deviation of luminance, 0–255 scale.
    pub contrast: f64,
    /// Mean luminance, 0–255 scale.
    pub brightness: f64,
    pub width: u32,
    pub height: u32,
    pub byte_size: usize,
}

/// The individual checks [`validate`] performs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QualityCheck {
    Decode,
    Resolution,
    FileTooSmall,
    FileTooLarge,
    Sharpness,
    LowContrast,
    HighContrast,
    TooDark,
    TooBright,
}

impl QualityCheck {
    /// What should the user do about a failure of this check?
    pub fn suggestion(self) -> &'static str {
        match self {
            QualityCheck::Decode => "Upload the receipt as a JPEG, PNG or WebP photo",
            QualityCheck::Resolution => {
                "Move closer or use a higher camera resolution so the receipt fills the frame"
            }
            QualityCheck::FileTooSmall => {
                "Use the camera's normal quality setting instead of a compressed or thumbnail image"
            }
            QualityCheck::FileTooLarge => "Reduce the camera resolution or compress the photo",
            QualityCheck::Sharpness => "Hold the camera steady and tap to focus on the receipt text",
            QualityCheck::LowContrast => {
                "Photograph the receipt on a plain, contrasting background in even light"
            }
            QualityCheck::HighContrast => "Avoid harsh shadows and direct flash on the receipt",
            QualityCheck::TooDark => "Move to a brighter spot or turn on more lights",
            QualityCheck::TooBright => "Avoid direct flash and glare on the paper",
        }
    }
}

/// The result of [`validate`].
#[derive(Clone, Debug, JsonSchema, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityReport {
    /// True when there are no errors. Warnings never block.
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub metrics: QualityMetrics,

    /// Checks that produced errors, used to build suggestions.
    #[serde(skip)]
    failed_checks: Vec<QualityCheck>,

    /// Checks that produced warnings.
    #[serde(skip)]
    warned_checks: Vec<QualityCheck>,
}

impl QualityReport {
    fn new(metrics: QualityMetrics) -> Self {
        Self {
            is_valid: true,
            errors: vec![],
            warnings: vec![],
            metrics,
            failed_checks: vec![],
            warned_checks: vec![],
        }
    }

    fn error(&mut self, check: QualityCheck, message: String) {
        self.is_valid = false;
        self.errors.push(message);
        if !self.failed_checks.contains(&check) {
            self.failed_checks.push(check);
        }
    }

    fn warning(&mut self, check: QualityCheck, message: String) {
        self.warnings.push(message);
        if !self.warned_checks.contains(&check) {
            self.warned_checks.push(check);
        }
    }

    /// Checks which failed outright.
    pub fn failed_checks(&self) -> &[QualityCheck] {
        &self.failed_checks
    }

    /// Suggestions for every failed check, in check order.
    pub fn suggestions(&self) -> Vec<String> {
        self.failed_checks
            .iter()
            .map(|check| check.suggestion().to_owned())
            .collect()
    }

    /// Suggestions for checks that only produced warnings.
    pub fn warning_suggestions(&self) -> Vec<String> {
        self.warned_checks
            .iter()
            .filter(|check| !self.failed_checks.contains(check))
            .map(|check| check.suggestion().to_owned())
            .collect()
    }
}

/// An image failed one or more blocking quality checks.
#[derive(Clone, Debug, thiserror::Error)]
#[error("image failed quality checks: {}", .errors.join("; "))]
pub struct QualityError {
    /// The blocking problems found.
    pub errors: Vec<String>,
    /// What the user can do about them.
    pub suggestions: Vec<String>,
    /// The full report, including warnings and metrics.
    pub report: Box<QualityReport>,
}

/// Inspect image bytes and report whether they are likely to OCR well.
///
/// This never fails: undecodable bytes are reported as a failed check.
#[instrument(level = "debug", skip_all, fields(bytes = bytes.len()))]
pub fn validate(bytes: &[u8], config: &QualityConfig) -> QualityReport {
    let byte_size = bytes.len();
    let image = match image::load_from_memory(bytes) {
        Ok(image) => image,
        Err(err) => {
            let mut report = QualityReport::new(QualityMetrics {
                byte_size,
                ..QualityMetrics::default()
            });
            report.error(QualityCheck::Decode, format!("Could not decode image: {err}"));
            return report;
        }
    };

    let (width, height) = image.dimensions();
    let gray = image.to_luma8();
    let (brightness, contrast) = luminance_stats(&gray);
    let metrics = QualityMetrics {
        sharpness: laplacian_variance(&gray),
        contrast,
        brightness,
        width,
        height,
        byte_size,
    };
    debug!(?metrics, "Measured image quality");

    let mut report = QualityReport::new(metrics);
    check_resolution(&mut report, config);
    check_file_size(&mut report, config);
    check_sharpness(&mut report, config);
    check_contrast(&mut report, config);
    check_brightness(&mut report, config);
    report
}

/// Like [`validate`], but turn a failed report into a [`QualityError`].
pub fn validate_or_err(
    bytes: &[u8],
    config: &QualityConfig,
) -> Result<QualityReport, QualityError> {
    let report = validate(bytes, config);
    if report.is_valid {
        Ok(report)
    } else {
        Err(QualityError {
            errors: report.errors.clone(),
            suggestions: report.suggestions(),
            report: Box::new(report),
        })
    }
}

fn check_resolution(report: &mut QualityReport, config: &QualityConfig) {
    let QualityMetrics { width, height, .. } = report.metrics;
    if width < config.min_width || height < config.min_height {
        report.error(
            QualityCheck::Resolution,
            format!(
                "Image resolution {width}x{height} is below the minimum of {}x{}",
                config.min_width, config.min_height
            ),
        );
    } else if width < config.recommended_width || height < config.recommended_height {
        report.warning(
            QualityCheck::Resolution,
            format!(
                "Image resolution {width}x{height} is below the recommended {}x{}",
                config.recommended_width, config.recommended_height
            ),
        );
    }
}

fn check_file_size(report: &mut QualityReport, config: &QualityConfig) {
    let size = report.metrics.byte_size;
    if size < config.min_bytes {
        report.error(
            QualityCheck::FileTooSmall,
            format!(
                "File size {} KB is below the minimum of {} KB",
                size / 1024,
                config.min_bytes / 1024
            ),
        );
    } else if size > config.max_bytes {
        report.error(
            QualityCheck::FileTooLarge,
            format!(
                "File size {:.1} MB exceeds the maximum of {:.1} MB",
                size as f64 / (1024.0 * 1024.0),
                config.max_bytes as f64 / (1024.0 * 1024.0)
            ),
        );
    }
}

fn check_sharpness(report: &mut QualityReport, config: &QualityConfig) {
    let sharpness = report.metrics.sharpness;
    if sharpness < config.sharpness_error_below {
        report.error(
            QualityCheck::Sharpness,
            format!("Image is too blurry (sharpness {sharpness:.1})"),
        );
    } else if sharpness < config.sharpness_warning_below {
        report.warning(
            QualityCheck::Sharpness,
            format!("Image may be blurry (sharpness {sharpness:.1})"),
        );
    }
}

fn check_contrast(report: &mut QualityReport, config: &QualityConfig) {
    let contrast = report.metrics.contrast;
    if contrast < config.contrast_error_below {
        report.error(
            QualityCheck::LowContrast,
            format!("Image has almost no contrast ({contrast:.1}); it may be blank"),
        );
    } else if contrast < config.contrast_warning_below {
        report.warning(
            QualityCheck::LowContrast,
            format!("Image contrast is low ({contrast:.1})"),
        );
    } else if contrast > config.contrast_warning_above {
        report.warning(
            QualityCheck::HighContrast,
            format!("Image contrast is very high ({contrast:.1}); check for shadows or glare"),
        );
    }
}

fn check_brightness(report: &mut QualityReport, config: &QualityConfig) {
    let brightness = report.metrics.brightness;
    let [error_min, error_max] = config.brightness_error_range;
    let [warn_min, warn_max] = config.brightness_warning_range;
    if brightness < error_min {
        report.error(
            QualityCheck::TooDark,
            format!("Image is too dark (brightness {brightness:.0})"),
        );
    } else if brightness > error_max {
        report.error(
            QualityCheck::TooBright,
            format!("Image is overexposed (brightness {brightness:.0})"),
        );
    } else if brightness < warn_min {
        report.warning(
            QualityCheck::TooDark,
            format!("Image is dark (brightness {brightness:.0})"),
        );
    } else if brightness > warn_max {
        report.warning(
            QualityCheck::TooBright,
            format!("Image is very bright (brightness {brightness:.0})"),
        );
    }
}

/// Mean and standard deviation of luminance.
pub fn luminance_stats(gray: &GrayImage) -> (f64, f64) {
    let count = gray.as_raw().len();
    if count == 0 {
        return (0.0, 0.0);
    }
    let (sum, sum_sq) = gray.as_raw().iter().fold((0.0f64, 0.0f64), |(s, sq), &v| {
        let v = f64::from(v);
        (s + v, sq + v * v)
    });
    let mean = sum / count as f64;
    let variance = (sum_sq / count as f64 - mean * mean).max(0.0);
    (mean, variance.sqrt())
}

/// Variance of the 4-neighbour Laplacian `[0,1,0; 1,-4,1; 0,1,0]`.
///
/// Blurry photos have weak edges everywhere, so the response is flat and the
/// variance is low. Border pixels are skipped.
pub fn laplacian_variance(gray: &GrayImage) -> f64 {
    let (w, h) = (gray.width() as usize, gray.height() as usize);
    if w < 3 || h < 3 {
        return 0.0;
    }
    let px = gray.as_raw();
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for y in 1..h - 1 {
        let row = y * w;
        for x in 1..w - 1 {
            let i = row + x;
            let lap = i32::from(px[i - w]) + i32::from(px[i + w]) + i32::from(px[i - 1])
                + i32::from(px[i + 1])
                - 4 * i32::from(px[i]);
            let lap = f64::from(lap);
            sum += lap;
            sum_sq += lap * lap;
        }
    }
    let count = ((w - 2) * (h - 2)) as f64;
    let mean = sum / count;
    (sum_sq / count - mean * mean).max(0.0)
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, GrayImage, Luma};

    use super::*;
    use crate::test_support::{encode_png, paper_with_text};

    #[test]
    fn good_photo_passes() {
        let bytes = encode_png(&DynamicImage::ImageRgb8(paper_with_text(1200, 900)));
        let report = validate(&bytes, &QualityConfig::default());
        assert!(report.is_valid, "unexpected errors: {:?}", report.errors);
        assert!(report.errors.is_empty());
        assert_eq!(report.metrics.width, 1200);
        assert_eq!(report.metrics.height, 900);
        assert_eq!(report.metrics.byte_size, bytes.len());
    }

    #[test]
    fn small_photo_fails_on_resolution() {
        let bytes = encode_png(&DynamicImage::ImageRgb8(paper_with_text(500, 300)));
        let report = validate(&bytes, &QualityConfig::default());
        assert!(!report.is_valid);
        assert!(
            report.errors.iter().any(|e| e.contains("resolution")),
            "{:?}",
            report.errors
        );
        assert!(report.failed_checks().contains(&QualityCheck::Resolution));
    }

    #[test]
    fn modest_resolution_only_warns() {
        let bytes = encode_png(&DynamicImage::ImageRgb8(paper_with_text(800, 600)));
        let report = validate(&bytes, &QualityConfig::default());
        assert!(report.is_valid, "unexpected errors: {:?}", report.errors);
        assert!(report.warnings.iter().any(|w| w.contains("recommended")));
    }

    #[test]
    fn garbage_bytes_are_an_error_not_a_panic() {
        let report = validate(b"definitely not an image", &QualityConfig::default());
        assert!(!report.is_valid);
        assert_eq!(report.failed_checks(), &[QualityCheck::Decode]);
    }

    #[test]
    fn blank_image_fails_contrast_and_sharpness() {
        let blank = GrayImage::from_pixel(1200, 900, Luma([128]));
        let config = QualityConfig {
            min_bytes: 0,
            ..QualityConfig::default()
        };
        let report = validate(&encode_png(&DynamicImage::ImageLuma8(blank)), &config);
        assert!(report.failed_checks().contains(&QualityCheck::Sharpness));
        assert!(report.failed_checks().contains(&QualityCheck::LowContrast));
    }

    #[test]
    fn validate_or_err_carries_suggestions() {
        let bytes = encode_png(&DynamicImage::ImageRgb8(paper_with_text(500, 300)));
        let err = validate_or_err(&bytes, &QualityConfig::default()).unwrap_err();
        assert!(!err.errors.is_empty());
        assert!(err.suggestions.iter().any(|s| s.contains("Move closer")));
        assert!(err.to_string().contains("resolution"));
    }

    #[test]
    fn laplacian_variance_prefers_edges() {
        let flat = GrayImage::from_pixel(50, 50, Luma([200]));
        let stripes = GrayImage::from_fn(50, 50, |x, _| Luma([if x % 4 < 2 { 0 } else { 255 }]));
        assert_eq!(laplacian_variance(&flat), 0.0);
        assert!(laplacian_variance(&stripes) > 1000.0);
    }

    #[test]
    fn luminance_stats_match_hand_computation() {
        let img = GrayImage::from_fn(2, 1, |x, _| Luma([if x == 0 { 0 } else { 200 }]));
        let (mean, std_dev) = luminance_stats(&img);
        assert_eq!(mean, 100.0);
        assert_eq!(std_dev, 100.0);
    }
}
