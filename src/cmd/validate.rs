//! The `validate` subcommand.

use clap::Args;

use crate::{
    async_utils::{io::write_json_pretty, spawn_blocking_propagating_panics},
    config::PipelineConfig,
    prelude::*,
    quality::validate,
};

/// Validate command line arguments.
#[derive(Debug, Args)]
pub struct ValidateOpts {
    /// The receipt image.
    pub image_path: PathBuf,

    /// Pipeline configuration, as TOML or JSON. Only `[quality]` is used.
    #[clap(long = "config", value_name = "PATH")]
    pub config_path: Option<PathBuf>,

    /// Write the report here instead of standard output.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,
}

/// The `validate` subcommand. Prints a quality report, and fails if the
/// image would be rejected.
#[instrument(level = "debug", skip_all, fields(image = %opts.image_path.display()))]
pub async fn cmd_validate(opts: &ValidateOpts) -> Result<()> {
    let config = PipelineConfig::from_optional_path(opts.config_path.as_deref()).await?;
    let bytes = tokio::fs::read(&opts.image_path)
        .await
        .with_context(|| format!("failed to read {:?}", opts.image_path.display()))?;

    let report =
        spawn_blocking_propagating_panics(move || validate(&bytes, &config.quality)).await;
    write_json_pretty(opts.output_path.as_deref(), &report).await?;

    if report.is_valid {
        Ok(())
    } else {
        Err(anyhow!(
            "{:?} failed quality checks: {}",
            opts.image_path.display(),
            report.errors.join("; ")
        ))
    }
}
