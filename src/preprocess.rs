//! Image preprocessing before OCR.
//!
//! Less is more here. Greyscale conversion, histogram equalisation and heavy
//! downscaling all *reduce* Tesseract's accuracy on receipts that are already
//! legible: the engine does its own binarisation and prefers the original
//! anti-aliased strokes. So the default ([`PreprocessLevel::Minimal`]) only
//! flattens transparency, applies EXIF orientation, and shrinks images whose
//! longer side exceeds a generous limit. Everything else is opt-in.

use std::io::Cursor;

use image::{
    DynamicImage, GenericImageView as _, GrayImage, ImageFormat, Luma, Rgb, RgbImage,
    imageops::FilterType,
};
use imageproc::{
    contrast::equalize_histogram,
    filter::{median_filter, sharpen3x3},
    geometric_transformations::{Interpolation, rotate_about_center},
};
use schemars::JsonSchema;

use crate::{error::PreprocessingError, prelude::*};

/// Named presets over the primitive operations.
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
pub enum PreprocessLevel {
    /// Flatten transparency, fix orientation, shrink only very large images.
    #[default]
    Minimal,
    /// Minimal, plus greyscale and contrast enhancement.
    Quick,
    /// Quick, plus denoising, sharpening and small-angle deskewing.
    Full,
}

/// Preprocessing configuration.
#[derive(Clone, Debug, Deserialize, JsonSchema, PartialEq, Serialize)]
#[serde(default, deny_unknown_fields, rename_all = "snake_case")]
pub struct PreprocessConfig {
    /// Which preset to use.
    pub level: PreprocessLevel,

    /// Images whose longer side exceeds this are shrunk to fit inside a
    /// square of this size.
    pub max_dimension: u32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            level: PreprocessLevel::Minimal,
            max_dimension: 3000,
        }
    }
}

impl PreprocessConfig {
    /// Expand into concrete operation switches.
    pub fn options(&self) -> PreprocessOptions {
        let base = PreprocessOptions {
            max_dimension: Some(self.max_dimension),
            ..PreprocessOptions::minimal()
        };
        match self.level {
            PreprocessLevel::Minimal => base,
            PreprocessLevel::Quick => PreprocessOptions {
                grayscale: true,
                enhance_contrast: true,
                ..base
            },
            PreprocessLevel::Full => PreprocessOptions {
                grayscale: true,
                enhance_contrast: true,
                denoise: true,
                sharpen: true,
                deskew: true,
                ..base
            },
        }
    }
}

/// Individual operation switches. Use [`PreprocessConfig::options`] unless
/// you need an unusual combination.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreprocessOptions {
    pub flatten_transparency: bool,
    pub correct_orientation: bool,
    /// Shrink to fit inside this many pixels. Never enlarges.
    pub max_dimension: Option<u32>,
    pub grayscale: bool,
    /// Histogram equalisation. Works on luminance, so output is greyscale.
    pub enhance_contrast: bool,
    /// 3×3 median filter.
    pub denoise: bool,
    /// 3×3 sharpening. Works on luminance, so output is greyscale.
    pub sharpen: bool,
    /// Correct skew of up to ±5° using a projection profile.
    pub deskew: bool,
}

impl PreprocessOptions {
    /// The default, minimal set of operations.
    pub fn minimal() -> Self {
        Self {
            flatten_transparency: true,
            correct_orientation: true,
            max_dimension: Some(3000),
            grayscale: false,
            enhance_contrast: false,
            denoise: false,
            sharpen: false,
            deskew: false,
        }
    }
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self::minimal()
    }
}

/// Width and height in pixels.
#[derive(Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq, Serialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

/// The output of [`preprocess`].
#[derive(Clone, Debug)]
pub struct PreprocessedImage {
    /// Lossless PNG bytes.
    pub bytes: Vec<u8>,
    /// Always `image/png`.
    pub mime_type: &'static str,
    /// Names of the operations that actually changed the image, in order.
    /// This is an audit trail, not something to replay.
    pub operations_applied: Vec<String>,
    pub original_size: ImageSize,
    pub processed_size: ImageSize,
}

impl PreprocessedImage {
    /// Everything except the pixels, for reporting.
    pub fn summary(&self) -> PreprocessingSummary {
        PreprocessingSummary {
            operations_applied: self.operations_applied.clone(),
            original_size: self.original_size,
            processed_size: self.processed_size,
        }
    }
}

/// A serializable description of what preprocessing did.
#[derive(Clone, Debug, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreprocessingSummary {
    pub operations_applied: Vec<String>,
    pub original_size: ImageSize,
    pub processed_size: ImageSize,
}

/// Run the minimal default preprocessing.
pub fn minimal_preprocess(bytes: &[u8]) -> Result<PreprocessedImage, PreprocessingError> {
    preprocess(bytes, &PreprocessConfig::default().options())
}

/// Run the `quick` preset.
pub fn quick_preprocess(bytes: &[u8]) -> Result<PreprocessedImage, PreprocessingError> {
    let config = PreprocessConfig {
        level: PreprocessLevel::Quick,
        ..PreprocessConfig::default()
    };
    preprocess(bytes, &config.options())
}

/// Run the `full` preset.
pub fn full_preprocess(bytes: &[u8]) -> Result<PreprocessedImage, PreprocessingError> {
    let config = PreprocessConfig {
        level: PreprocessLevel::Full,
        ..PreprocessConfig::default()
    };
    preprocess(bytes, &config.options())
}

/// Decode, transform and re-encode an image.
///
/// Any failure is reported. We never fall back to the unprocessed bytes,
/// because OCR on a half-processed buffer is worse than a clear error.
#[instrument(level = "debug", skip_all, fields(bytes = bytes.len()))]
pub fn preprocess(
    bytes: &[u8],
    options: &PreprocessOptions,
) -> Result<PreprocessedImage, PreprocessingError> {
    let mut image = image::load_from_memory(bytes).map_err(PreprocessingError::Decode)?;
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(PreprocessingError::Operation {
            operation: "decode",
            message: "image has no pixels".to_owned(),
        });
    }
    let original_size = ImageSize { width, height };
    let mut ops: Vec<String> = vec![];

    if options.flatten_transparency && image.color().has_alpha() {
        image = DynamicImage::ImageRgb8(flatten_onto_white(&image));
        ops.push("flatten_transparency".to_owned());
    }

    if options.correct_orientation {
        let orientation = read_exif_orientation(bytes);
        if orientation != 1 {
            image = apply_orientation(image, orientation);
            ops.push(format!("correct_orientation({orientation})"));
        }
    }

    if let Some(max_dimension) = options.max_dimension {
        if max_dimension == 0 {
            return Err(PreprocessingError::Operation {
                operation: "downscale",
                message: "max_dimension must be positive".to_owned(),
            });
        }
        let (w, h) = image.dimensions();
        if w.max(h) > max_dimension {
            // `resize` preserves aspect ratio and fits inside the box.
            image = image.resize(max_dimension, max_dimension, FilterType::CatmullRom);
            ops.push("downscale".to_owned());
        }
    }

    if options.grayscale {
        image = DynamicImage::ImageLuma8(image.to_luma8());
        ops.push("grayscale".to_owned());
    }

    if options.denoise {
        image = match image {
            DynamicImage::ImageLuma8(gray) => DynamicImage::ImageLuma8(median_filter(&gray, 1, 1)),
            other => DynamicImage::ImageRgb8(median_filter(&other.to_rgb8(), 1, 1)),
        };
        ops.push("denoise".to_owned());
    }

    if options.enhance_contrast {
        image = DynamicImage::ImageLuma8(equalize_histogram(&image.to_luma8()));
        ops.push("enhance_contrast".to_owned());
    }

    if options.sharpen {
        image = DynamicImage::ImageLuma8(sharpen3x3(&image.to_luma8()));
        ops.push("sharpen".to_owned());
    }

    if options.deskew
        && let Some(angle) = detect_skew_degrees(&image.to_luma8())
    {
        image = rotate(image, angle);
        ops.push(format!("deskew({angle:.2})"));
    }

    let (width, height) = image.dimensions();
    let mut out = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .map_err(PreprocessingError::Encode)?;
    debug!(?ops, width, height, "Preprocessed image");

    Ok(PreprocessedImage {
        bytes: out,
        mime_type: "image/png",
        operations_applied: ops,
        original_size,
        processed_size: ImageSize { width, height },
    })
}

/// Composite an image with alpha over a white background.
fn flatten_onto_white(image: &DynamicImage) -> RgbImage {
    let rgba = image.to_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = f32::from(a) / 255.0;
        let blend = |c: u8| (f32::from(c) * alpha + 255.0 * (1.0 - alpha)).round() as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}

/// Read the EXIF orientation tag. Returns 1 (upright) when absent.
pub fn read_exif_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = Cursor::new(bytes);
    match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(exif) => exif
            .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
            .and_then(|field| field.value.get_uint(0))
            .unwrap_or(1),
        Err(_) => 1,
    }
}

/// Apply an EXIF orientation (1–8) so the image is upright.
pub fn apply_orientation(image: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => image.fliph(),
        3 => image.rotate180(),
        4 => image.flipv(),
        5 => image.rotate90().fliph(),
        6 => image.rotate90(),
        7 => image.rotate270().fliph(),
        8 => image.rotate270(),
        _ => image,
    }
}

/// Estimate text skew in degrees using a horizontal projection profile.
///
/// For each candidate angle we project ink pixels onto rotated rows; when the
/// angle matches the text, the rows alternate sharply between ink and paper
/// and the profile variance peaks. Returns `None` for skews under half a
/// degree or pages with too little ink to judge.
pub fn detect_skew_degrees(gray: &GrayImage) -> Option<f32> {
    // Work on a small copy; the profile does not need full resolution.
    let small = image::imageops::thumbnail(gray, gray.width().min(800), gray.height().min(800));
    let (w, h) = small.dimensions();
    if w < 50 || h < 50 {
        return None;
    }
    let ink: Vec<(f32, f32)> = small
        .enumerate_pixels()
        .filter(|(_, _, p)| p.0[0] < 128)
        .map(|(x, y, _)| (x as f32, y as f32))
        .collect();
    if (ink.len() as f32) < 0.01 * (w * h) as f32 {
        return None;
    }

    let diagonal = ((w * w + h * h) as f32).sqrt().ceil() as usize;
    let mut best = (0.0f32, f64::NEG_INFINITY);
    for step in -20..=20 {
        let angle = step as f32 * 0.25;
        let (sin, cos) = angle.to_radians().sin_cos();
        let mut rows = vec![0u32; 2 * diagonal + 1];
        for &(x, y) in &ink {
            let r = (y * cos - x * sin).round() as isize + diagonal as isize;
            if let Some(slot) = usize::try_from(r).ok().and_then(|r| rows.get_mut(r)) {
                *slot += 1;
            }
        }
        let n = rows.len() as f64;
        let mean = rows.iter().map(|&c| f64::from(c)).sum::<f64>() / n;
        let variance = rows
            .iter()
            .map(|&c| (f64::from(c) - mean).powi(2))
            .sum::<f64>()
            / n;
        if variance > best.1 {
            best = (angle, variance);
        }
    }
    (best.0.abs() >= 0.5).then_some(best.0)
}

/// Rotate so that text sloping at `degrees` becomes horizontal.
fn rotate(image: DynamicImage, degrees: f32) -> DynamicImage {
    // `rotate_about_center` turns clockwise in image coordinates, and a
    // positive skew slopes downward to the right, so we turn the other way.
    let theta = -degrees.to_radians();
    match image {
        DynamicImage::ImageLuma8(gray) => DynamicImage::ImageLuma8(rotate_about_center(
            &gray,
            theta,
            Interpolation::Bilinear,
            Luma([255]),
        )),
        other => DynamicImage::ImageRgb8(rotate_about_center(
            &other.to_rgb8(),
            theta,
            Interpolation::Bilinear,
            Rgb([255, 255, 255]),
        )),
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgba, RgbaImage};

    use super::*;
    use crate::test_support::{encode_png, paper_with_text};

    fn png_of(image: DynamicImage) -> Vec<u8> {
        encode_png(&image)
    }

    #[test]
    fn minimal_leaves_ordinary_photos_alone() -> Result<()> {
        let bytes = png_of(DynamicImage::ImageRgb8(paper_with_text(1200, 900)));
        let out = minimal_preprocess(&bytes)?;
        assert!(out.operations_applied.is_empty(), "{:?}", out.operations_applied);
        assert_eq!(out.original_size, out.processed_size);
        assert_eq!(out.mime_type, "image/png");
        let decoded = image::load_from_memory(&out.bytes)?;
        assert!(matches!(decoded, DynamicImage::ImageRgb8(_)));
        Ok(())
    }

    #[test]
    fn minimal_only_downscales_huge_images() -> Result<()> {
        let bytes = png_of(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            3200,
            1600,
            Rgb([240, 240, 240]),
        )));
        let out = minimal_preprocess(&bytes)?;
        assert_eq!(out.operations_applied, vec!["downscale"]);
        assert_eq!(out.processed_size, ImageSize { width: 3000, height: 1500 });
        Ok(())
    }

    #[test]
    fn transparency_is_flattened_onto_white() -> Result<()> {
        let rgba = RgbaImage::from_pixel(10, 10, Rgba([0, 0, 0, 0]));
        let out = minimal_preprocess(&png_of(DynamicImage::ImageRgba8(rgba)))?;
        assert_eq!(out.operations_applied, vec!["flatten_transparency"]);
        let decoded = image::load_from_memory(&out.bytes)?.to_rgb8();
        assert_eq!(decoded.get_pixel(5, 5), &Rgb([255, 255, 255]));
        Ok(())
    }

    #[test]
    fn full_preset_records_every_operation() -> Result<()> {
        let bytes = png_of(DynamicImage::ImageRgb8(paper_with_text(800, 600)));
        let out = full_preprocess(&bytes)?;
        for op in ["grayscale", "denoise", "enhance_contrast", "sharpen"] {
            assert!(
                out.operations_applied.iter().any(|o| o == op),
                "missing {op} in {:?}",
                out.operations_applied
            );
        }
        let decoded = image::load_from_memory(&out.bytes)?;
        assert!(matches!(decoded, DynamicImage::ImageLuma8(_)));
        Ok(())
    }

    #[test]
    fn quick_preset_is_grayscale_and_contrast() -> Result<()> {
        let bytes = png_of(DynamicImage::ImageRgb8(paper_with_text(800, 600)));
        let out = quick_preprocess(&bytes)?;
        assert_eq!(out.operations_applied, vec!["grayscale", "enhance_contrast"]);
        Ok(())
    }

    #[test]
    fn undecodable_bytes_are_an_error() {
        let err = minimal_preprocess(b"not an image").unwrap_err();
        assert!(matches!(err, PreprocessingError::Decode(_)));
    }

    #[test]
    fn zero_max_dimension_is_an_error() {
        let bytes = png_of(DynamicImage::ImageRgb8(paper_with_text(100, 100)));
        let options = PreprocessOptions {
            max_dimension: Some(0),
            ..PreprocessOptions::minimal()
        };
        let err = preprocess(&bytes, &options).unwrap_err();
        assert!(err.to_string().contains("downscale"));
    }

    #[test]
    fn orientation_six_rotates_clockwise() {
        let tall = DynamicImage::ImageRgb8(RgbImage::new(20, 10));
        let rotated = apply_orientation(tall, 6);
        assert_eq!(rotated.dimensions(), (10, 20));
    }

    #[test]
    fn images_without_exif_are_upright() {
        let bytes = png_of(DynamicImage::ImageRgb8(RgbImage::new(4, 4)));
        assert_eq!(read_exif_orientation(&bytes), 1);
    }

    /// Horizontal bars of ink, sloped by `degrees`.
    fn sloped_bars(degrees: f32) -> GrayImage {
        let slope = degrees.to_radians().tan();
        GrayImage::from_fn(600, 600, |x, y| {
            let y0 = y as f32 - x as f32 * slope;
            let band = (y0.rem_euclid(40.0)) < 8.0;
            Luma([if band && x > 50 && x < 550 { 0 } else { 255 }])
        })
    }

    #[test]
    fn straight_text_is_not_deskewed() {
        assert_eq!(detect_skew_degrees(&sloped_bars(0.0)), None);
    }

    #[test]
    fn skew_is_detected() {
        let angle = detect_skew_degrees(&sloped_bars(3.0)).expect("skew should be found");
        assert!((angle - 3.0).abs() <= 0.5, "detected {angle}");
    }

    #[test]
    fn preset_options_follow_level() {
        let quick = PreprocessConfig {
            level: PreprocessLevel::Quick,
            max_dimension: 2000,
        }
        .options();
        assert!(quick.grayscale && quick.enhance_contrast);
        assert!(!quick.denoise && !quick.deskew);
        assert_eq!(quick.max_dimension, Some(2000));
        assert_eq!(PreprocessConfig::default().options(), PreprocessOptions::minimal());
    }
}
