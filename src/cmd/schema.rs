//! The `schema` subcommand.

use clap::{Args, ValueEnum};
use schemars::schema_for;
use tokio::io::AsyncWriteExt as _;

use crate::{
    async_utils::io::create_writer,
    config::PipelineConfig,
    ocr::engines::EngineResponse,
    pipeline::ScanOutput,
    prelude::*,
    work::{ReceiptInput, ReceiptResult, WorkInput, WorkOutput},
};

/// The different schema types we support.
///
/// We parse these as PascalCase, because they represent type names.
#[derive(Debug, Clone, Copy, ValueEnum)]
#[clap(rename_all = "PascalCase")]
pub enum SchemaType {
    /// One `batch` input record.
    ReceiptInput,
    /// One `batch` output record.
    BatchOutput,
    /// The output of `scan`.
    ScanOutput,
    /// The `--config` file.
    PipelineConfig,
    /// A recorded OCR engine response, for `--fixture`.
    EngineResponse,
}

/// Schema command line arguments.
#[derive(Debug, Args)]
pub struct SchemaOpts {
    /// The schema type to generate.
    #[clap(value_enum, value_name = "TYPE")]
    pub schema_type: SchemaType,

    /// The output path to write the schema to.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,
}

/// The `schema` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_schema(schema_opts: &SchemaOpts) -> Result<()> {
    let schema = match schema_opts.schema_type {
        SchemaType::ReceiptInput => schema_for!(WorkInput<ReceiptInput>),
        SchemaType::BatchOutput => schema_for!(WorkOutput<ReceiptResult>),
        SchemaType::ScanOutput => schema_for!(ScanOutput),
        SchemaType::PipelineConfig => schema_for!(PipelineConfig),
        SchemaType::EngineResponse => schema_for!(EngineResponse),
    };

    let mut wtr = create_writer(schema_opts.output_path.as_deref()).await?;
    let mut schema_str =
        serde_json::to_string_pretty(&schema).context("failed to serialize schema")?;
    schema_str.push('\n');
    wtr.write_all(schema_str.as_bytes())
        .await
        .context("failed to write schema")?;
    wtr.flush().await.context("failed to flush schema")?;
    Ok(())
}
