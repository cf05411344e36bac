//! The `preprocess` subcommand, for seeing what the OCR engine sees.

use clap::Args;

use crate::{
    async_utils::spawn_blocking_propagating_panics,
    config::PipelineConfig,
    prelude::*,
    preprocess::{PreprocessLevel, preprocess},
    ui::Ui,
};

/// Preprocess command line arguments.
#[derive(Debug, Args)]
pub struct PreprocessOpts {
    /// The receipt image.
    pub image_path: PathBuf,

    /// Where to write the preprocessed PNG.
    #[clap(short = 'o', long = "out")]
    pub output_path: PathBuf,

    /// Pipeline configuration, as TOML or JSON. Only `[preprocess]` is used.
    #[clap(long = "config", value_name = "PATH")]
    pub config_path: Option<PathBuf>,

    /// How much image cleanup to do.
    #[clap(long, value_enum)]
    pub level: Option<PreprocessLevel>,

    /// Downscale so neither side exceeds this many pixels.
    #[clap(long)]
    pub max_dimension: Option<u32>,
}

/// The `preprocess` subcommand.
#[instrument(level = "debug", skip_all, fields(image = %opts.image_path.display()))]
pub async fn cmd_preprocess(ui: &Ui, opts: &PreprocessOpts) -> Result<()> {
    let mut config = PipelineConfig::from_optional_path(opts.config_path.as_deref())
        .await?
        .preprocess;
    if let Some(level) = opts.level {
        config.level = level;
    }
    if let Some(max_dimension) = opts.max_dimension {
        config.max_dimension = max_dimension;
    }

    let bytes = tokio::fs::read(&opts.image_path)
        .await
        .with_context(|| format!("failed to read {:?}", opts.image_path.display()))?;
    let options = config.options();
    let image = spawn_blocking_propagating_panics(move || preprocess(&bytes, &options))
        .await
        .with_context(|| format!("failed to preprocess {:?}", opts.image_path.display()))?;

    tokio::fs::write(&opts.output_path, &image.bytes)
        .await
        .with_context(|| format!("failed to write {:?}", opts.output_path.display()))?;

    info!(operations = ?image.operations_applied, "Preprocessed image");
    let operations = if image.operations_applied.is_empty() {
        "no changes".to_owned()
    } else {
        image.operations_applied.join(", ")
    };
    ui.display_message(
        "🖼️",
        &format!(
            "{}x{} -> {}x{} ({operations})",
            image.original_size.width,
            image.original_size.height,
            image.processed_size.width,
            image.processed_size.height,
        ),
    );
    Ok(())
}
