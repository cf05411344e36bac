//! The `scan` subcommand.

use clap::Args;

use crate::{
    async_utils::io::write_json_pretty, intake::RawImage, pipeline::ScanOutput, prelude::*,
};

use super::PipelineOpts;

/// Scan command line arguments.
#[derive(Debug, Args)]
pub struct ScanOpts {
    /// The receipt image (JPEG, PNG or WebP).
    pub image_path: PathBuf,

    /// Declared content type. Detected from the file if not given.
    #[clap(long)]
    pub content_type: Option<String>,

    /// Write the result here instead of standard output.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,

    #[clap(flatten)]
    pub pipeline_opts: PipelineOpts,
}

/// The `scan` subcommand.
///
/// Error reports are written like results, but we also exit with an error so
/// scripts can tell the difference.
#[instrument(level = "debug", skip_all, fields(image = %opts.image_path.display()))]
pub async fn cmd_scan(opts: &ScanOpts) -> Result<()> {
    let pipeline = opts.pipeline_opts.pipeline().await?;

    let mut image = RawImage::from_path(&opts.image_path).await?;
    if let Some(content_type) = &opts.content_type {
        image.content_type = content_type.to_owned();
    }

    let result = pipeline.process(image).await;
    pipeline.shutdown().await?;

    let failure = result.as_ref().err().map(|err| err.to_string());
    if let Ok(output) = &result {
        info!(
            items = output.parsed_receipt.items.len(),
            overall = output.confidence.overall,
            status = ?output.confidence.status,
            "Scanned receipt"
        );
    }
    write_json_pretty(opts.output_path.as_deref(), &ScanOutput::from(result)).await?;

    match failure {
        Some(message) => Err(anyhow!(
            "could not scan {:?}: {message}",
            opts.image_path.display()
        )),
        None => Ok(()),
    }
}
