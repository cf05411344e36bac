use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::Directive, fmt::format::FmtSpan, layer::SubscriberExt,
    util::SubscriberInitExt as _,
};

use receipt_scanner::{cmd, prelude::*, ui::Ui};

/// Extract line items, totals and confidence scores from receipt photos.
#[derive(Debug, Parser)]
#[clap(
    version,
    author,
    after_help = r#"
Environment Variables:
  - RUST_LOG (optional): Logging filter, e.g. `receipt_scanner=debug`.
  - TESSDATA_PREFIX (optional): Where tesseract looks for language data.

  These variables may be set in a standard `.env` file.
"#
)]
struct Opts {
    #[clap(subcommand)]
    subcmd: Cmd,
}

/// The subcommands we support.
#[derive(Debug, Subcommand)]
enum Cmd {
    /// Extract a single receipt and print the result as JSON.
    Scan(cmd::scan::ScanOpts),
    /// Extract many receipts. The input file should have `id` and `path` (or
    /// `data_url`) fields.
    Batch(cmd::batch::BatchOpts),
    /// Check whether an image is good enough to OCR.
    Validate(cmd::validate::ValidateOpts),
    /// Write the preprocessed image that would be sent to OCR.
    Preprocess(cmd::preprocess::PreprocessOpts),
    /// Print schemas for input, output and configuration formats.
    Schema(cmd::schema::SchemaOpts),
}

impl Cmd {
    /// Are we using stdout for output?
    fn using_stdout_for_output(&self) -> bool {
        match self {
            Cmd::Scan(opts) => opts.output_path.is_none(),
            Cmd::Batch(opts) => opts.output_path.is_none(),
            Cmd::Validate(opts) => opts.output_path.is_none(),
            Cmd::Preprocess(_) => false,
            Cmd::Schema(opts) => opts.output_path.is_none(),
        }
    }
}

/// Our entry point, which can return an error. [`anyhow::Result`] will
/// automatically print a nice error message with optional backtrace.
#[tokio::main]
async fn main() -> Result<()> {
    let ui = Ui::init();

    // Initialize tracing.
    let directive =
        Directive::from_str("info").expect("built-in directive should be valid");
    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_writer(ui.get_stderr_writer())
        .with_filter(env_filter);
    tracing_subscriber::registry().with(subscriber).init();

    real_main(ui).await
}

/// Our real entry point.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main(ui: Ui) -> Result<()> {
    // Load environment variables from a `.env` file, if it exists.
    dotenvy::dotenv().ok();

    let opts = Opts::parse();
    debug!("Parsed options: {:?}", opts);

    // Hide the progress bar if we're using stdout for output.
    if opts.subcmd.using_stdout_for_output() {
        ui.hide_progress_bars();
    }

    match &opts.subcmd {
        Cmd::Scan(opts) => cmd::scan::cmd_scan(opts).await,
        Cmd::Batch(opts) => cmd::batch::cmd_batch(ui, opts).await,
        Cmd::Validate(opts) => cmd::validate::cmd_validate(opts).await,
        Cmd::Preprocess(opts) => cmd::preprocess::cmd_preprocess(&ui, opts).await,
        Cmd::Schema(opts) => cmd::schema::cmd_schema(opts).await,
    }
}
