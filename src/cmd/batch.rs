//! The `batch` subcommand.

use clap::Args;
use futures::StreamExt as _;

use crate::{
    prelude::*,
    ui::{Activity, Ui},
    work::{ReceiptInput, WorkInput, WorkOutput, process_receipt},
};

use super::{PipelineOpts, StreamOpts};

/// Batch command line arguments.
#[derive(Debug, Args)]
pub struct BatchOpts {
    /// JSONL or CSV records with an `id` and either a `path` or a `data_url`.
    /// Reads standard input if omitted.
    pub input_path: Option<PathBuf>,

    /// Write JSONL results here instead of standard output.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,

    #[clap(flatten)]
    pub stream_opts: StreamOpts,

    #[clap(flatten)]
    pub pipeline_opts: PipelineOpts,
}

/// The `batch` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_batch(ui: Ui, opts: &BatchOpts) -> Result<()> {
    let pipeline = opts.pipeline_opts.pipeline().await?;

    // Open up our input stream and parse into records.
    let input =
        WorkInput::<ReceiptInput>::read_stream(ui.clone(), opts.input_path.as_deref()).await?;
    let input = opts.stream_opts.apply_stream_input_opts(input);

    // Configure our progress bar.
    let pb = ui.new_from_size_hint(
        &Activity {
            emoji: "🧾",
            running: "Scanning receipts",
            finished: "Scanned receipts",
        },
        input.size_hint(),
    );

    // Records are independent, but we keep output in input order.
    let worker_pipeline = pipeline.clone();
    let output = input
        .map(move |input| {
            let pipeline = worker_pipeline.clone();
            async move { Ok::<_, anyhow::Error>(process_receipt(&pipeline, input?).await) }
        })
        .buffered(opts.stream_opts.job_count.max(1));
    let output = pb.wrap_stream(output).boxed();

    let written = WorkOutput::write_stream(
        &ui,
        opts.output_path.as_deref(),
        output,
        &opts.stream_opts,
    )
    .await;
    pipeline.shutdown().await?;
    written
}
