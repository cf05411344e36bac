//! Command-line entry points.

use clap::Args;
use futures::StreamExt as _;

use crate::{
    async_utils::BoxedStream, config::PipelineConfig, ocr::engines::EngineKind,
    pipeline::ReceiptPipeline, prelude::*, preprocess::PreprocessLevel,
};

pub mod batch;
pub mod preprocess;
pub mod scan;
pub mod schema;
pub mod validate;

/// Common options for subcommands that process data streams.
#[derive(Debug, Clone, Args)]
pub struct StreamOpts {
    /// Limit processing to the first N records.
    #[clap(long)]
    pub take_first: Option<usize>,

    /// Max number of receipts to process at a time.
    #[clap(short = 'j', long = "jobs", default_value = "4")]
    pub job_count: usize,

    /// What portion of inputs should we allow to fail? Specified as a
    /// number between 0.0 and 1.0.
    #[clap(long, default_value = "0.01")]
    pub allowed_failure_rate: f32,
}

impl StreamOpts {
    /// Apply any necessary stream opts to our input stream.
    pub fn apply_stream_input_opts<T>(
        &self,
        input: BoxedStream<Result<T>>,
    ) -> BoxedStream<Result<T>>
    where
        T: 'static,
    {
        if let Some(take_first) = self.take_first {
            input.take(take_first).boxed()
        } else {
            input
        }
    }
}

/// Options for subcommands that run the full pipeline. Flags override values
/// from `--config`.
#[derive(Debug, Clone, Args)]
pub struct PipelineOpts {
    /// Pipeline configuration, as TOML or JSON.
    #[clap(long = "config", value_name = "PATH")]
    pub config_path: Option<PathBuf>,

    /// OCR engine to use.
    #[clap(long, value_enum)]
    pub engine: Option<EngineKind>,

    /// Recorded engine response to replay. Implies `--engine fixture`.
    #[clap(long, value_name = "JSON")]
    pub fixture: Option<PathBuf>,

    /// How much image cleanup to do before OCR.
    #[clap(long, value_enum)]
    pub level: Option<PreprocessLevel>,

    /// Tesseract language(s), e.g. `eng` or `eng+fra`.
    #[clap(long)]
    pub lang: Option<String>,

    /// Drop items whose OCR confidence is below this (0.0 to 1.0).
    #[clap(long)]
    pub min_item_confidence: Option<f64>,
}

impl PipelineOpts {
    /// Load the configuration file, if any, and apply our overrides.
    pub async fn load_config(&self) -> Result<PipelineConfig> {
        let mut config = PipelineConfig::from_optional_path(self.config_path.as_deref()).await?;
        if let Some(fixture) = &self.fixture {
            config.ocr.fixture = Some(fixture.to_owned());
            config.ocr.engine = EngineKind::Fixture;
        }
        if let Some(engine) = self.engine {
            config.ocr.engine = engine;
        }
        if let Some(level) = self.level {
            config.preprocess.level = level;
        }
        if let Some(lang) = &self.lang {
            config.ocr.language = lang.to_owned();
        }
        if let Some(min_item_confidence) = self.min_item_confidence {
            config.parser.min_item_confidence = min_item_confidence;
        }
        config.check().context("invalid command-line options")?;
        debug!(?config, "Loaded pipeline configuration");
        Ok(config)
    }

    /// Build a pipeline from our configuration.
    pub async fn pipeline(&self) -> Result<ReceiptPipeline> {
        ReceiptPipeline::new(self.load_config().await?)
    }
}
