//! Tesseract OCR engine.

use tokio::process::Command;

use crate::{
    async_utils::check_for_command_failure, cpu_limit::with_cpu_semaphore, ocr::tsv,
    prelude::*,
};

use super::{ConfidenceScale, EngineResponse, OcrEngine};

/// OCR engine wrapping the `tesseract` CLI tool.
///
/// Each recognition runs one short-lived `tesseract` process, asking for
/// both plain text and the per-word TSV report.
pub struct TesseractEngine {
    language: String,
    page_segmentation_mode: u8,
}

impl TesseractEngine {
    /// Create a new `tesseract` engine.
    pub fn new(language: String, page_segmentation_mode: u8) -> Self {
        Self {
            language,
            page_segmentation_mode,
        }
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    fn name(&self) -> &str {
        "tesseract"
    }

    #[instrument(level = "debug", skip_all)]
    async fn start(&self) -> Result<()> {
        let output = Command::new("tesseract")
            .arg("--version")
            .output()
            .await
            .context("cannot run tesseract (is it installed?)")?;
        check_for_command_failure("tesseract", &output, None)?;

        let output = Command::new("tesseract")
            .arg("--list-langs")
            .output()
            .await
            .context("cannot list tesseract languages")?;
        check_for_command_failure("tesseract", &output, None)?;
        let available = String::from_utf8_lossy(&output.stdout);
        for lang in self.language.split('+') {
            // The first line is a "List of available languages" header.
            if !available.lines().skip(1).any(|l| l.trim() == lang) {
                return Err(anyhow!("tesseract language {lang:?} is not installed"));
            }
        }
        debug!(language = %self.language, "tesseract is available");
        Ok(())
    }

    #[instrument(level = "debug", skip_all, fields(bytes = image.len(), %mime_type))]
    async fn recognize(&self, image: &[u8], mime_type: &str) -> Result<EngineResponse> {
        let extension = mime_guess::get_mime_extensions_str(mime_type)
            .and_then(|o| o.first())
            .ok_or_else(|| anyhow!("cannot determine extension for {}", mime_type))?;

        // Write our input to a temporary file.
        let tmpdir = tempfile::TempDir::with_prefix("tesseract")?;
        let input_path = tmpdir.path().join(format!("input.{extension}"));
        let output_base = tmpdir.path().join("output");
        tokio::fs::write(&input_path, image)
            .await
            .context("cannot write tesseract input file")?;

        // Run tesseract on the input file, one process per core at most.
        let output = with_cpu_semaphore(|| async {
            Command::new("tesseract")
                .arg(&input_path)
                .arg(&output_base)
                .arg("-l")
                .arg(&self.language)
                .arg("--psm")
                .arg(self.page_segmentation_mode.to_string())
                .arg("txt")
                .arg("tsv")
                .output()
                .await
                .context("cannot run tesseract")
        })
        .await?;
        check_for_command_failure("tesseract", &output, None)?;

        // Read the output files.
        let text = tokio::fs::read_to_string(output_base.with_extension("txt"))
            .await
            .context("cannot read tesseract text output")?;
        let tsv = tokio::fs::read_to_string(output_base.with_extension("tsv"))
            .await
            .context("cannot read tesseract TSV output")?;
        let confidence = tsv::mean_word_confidence(&tsv);
        Ok(EngineResponse {
            text,
            confidence,
            confidence_scale: ConfidenceScale::Percent,
            lines: None,
            tsv: Some(tsv),
        })
    }

    async fn stop(&self) -> Result<()> {
        // Nothing is kept running between recognitions.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use image::DynamicImage;

    use std::sync::Arc;

    use super::*;
    use crate::{
        ocr::OcrAdapter,
        preprocess::minimal_preprocess,
        test_support::{encode_png, render_text},
    };

    #[tokio::test]
    #[ignore = "Requires tesseract to be installed"]
    async fn recognizes_rendered_text() -> Result<()> {
        let engine = TesseractEngine::new("eng".to_owned(), 6);
        engine.start().await?;
        let png = encode_png(&DynamicImage::ImageRgb8(render_text(&["HELLO 12.99"], 6, false)));
        let response = engine.recognize(&png, "image/png").await?;
        assert!(response.text.contains("HELLO"), "{:?}", response.text);
        assert!(response.tsv.is_some());
        Ok(())
    }

    #[tokio::test]
    #[ignore = "Requires tesseract to be installed"]
    async fn crisp_text_is_recognized_confidently() -> Result<()> {
        let png = encode_png(&DynamicImage::ImageRgb8(render_text(
            &["CORNER MARKET", "APPLES 2.99", "TOTAL 2.99"],
            6,
            false,
        )));
        let preprocessed = minimal_preprocess(&png)?;
        let adapter = OcrAdapter::new(Arc::new(TesseractEngine::new("eng".to_owned(), 6)));
        let lines = adapter
            .recognize(&preprocessed.bytes, preprocessed.mime_type)
            .await?;
        assert!(
            lines.iter().any(|line| line.confidence > 0.5),
            "{lines:?}"
        );
        adapter.terminate().await?;
        Ok(())
    }

    #[tokio::test]
    async fn unknown_mime_types_are_rejected() {
        let engine = TesseractEngine::new("eng".to_owned(), 6);
        let err = engine
            .recognize(b"", "application/x-not-a-real-type")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("extension"));
    }
}
