//! Batch records and their outcomes.
//!
//! A batch is a JSONL or CSV stream of [`WorkInput<ReceiptInput>`] records.
//! Each one is run through the pipeline independently and produces exactly
//! one [`WorkOutput<ReceiptResult>`]. A bad image fails its own record, never
//! the batch; only the overall failure rate decides the exit status.

use std::sync::{Arc, Mutex};

use futures::StreamExt as _;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;

use crate::{
    async_utils::{
        BoxedStream,
        io::{read_jsonl_or_csv, write_output},
    },
    cmd::StreamOpts,
    data_url::decode_data_url,
    error::ErrorReport,
    intake::RawImage,
    pipeline::{PipelineOutput, ReceiptPipeline},
    prelude::*,
    ui::Ui,
};

/// Input record for batch processing.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct WorkInput<T>
where
    T: 'static,
{
    /// The unique ID of the record. Copied to the output as-is.
    pub id: Value,

    /// The input data for the record.
    #[serde(flatten)]
    pub data: T,
}

impl<T> WorkInput<T>
where
    T: DeserializeOwned + Send + 'static,
{
    /// Convert from a JSON value to the input type.
    pub fn from_json(value: Value) -> Result<Self> {
        serde_json::from_value::<Self>(value).context("failed to deserialize input")
    }

    /// Read a stream from a [`Path`] or from standard input.
    pub async fn read_stream(
        ui: Ui,
        path: Option<&Path>,
    ) -> Result<BoxedStream<Result<Self>>> {
        Ok(read_jsonl_or_csv(ui, path)
            .await?
            .map(|value| Self::from_json(value?))
            .boxed())
    }
}

/// Where to find one receipt image. Exactly one of `path` and `data_url`
/// should be set.
#[derive(Clone, Debug, Default, Deserialize, JsonSchema)]
pub struct ReceiptInput {
    /// Path to an image file.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// The image itself, as a base64 `data:` URL.
    #[serde(default)]
    pub data_url: Option<String>,

    /// Declared MIME type. Defaults to the type in `data_url`, or to the type
    /// sniffed from the file.
    #[serde(default)]
    pub content_type: Option<String>,
}

impl ReceiptInput {
    /// Load the image this record points at.
    pub async fn load(&self) -> Result<RawImage> {
        // CSV inputs give us empty strings for blank cells.
        let non_empty = |s: &Option<String>| s.clone().filter(|s| !s.trim().is_empty());
        let content_type = non_empty(&self.content_type);
        let data_url = non_empty(&self.data_url);
        let path = self
            .path
            .as_ref()
            .filter(|p| !p.as_os_str().is_empty());

        match (path, data_url) {
            (Some(_), Some(_)) => Err(anyhow!("record has both a path and a data_url")),
            (None, Some(data_url)) => {
                let (mime_type, bytes) = decode_data_url(&data_url)?;
                Ok(RawImage::new(bytes, content_type.unwrap_or(mime_type)))
            }
            (Some(path), None) => {
                let image = RawImage::from_path(path).await?;
                Ok(match content_type {
                    Some(content_type) => RawImage::new(image.bytes, content_type),
                    None => image,
                })
            }
            (None, None) => Err(anyhow!("record needs a path or a data_url")),
        }
    }
}

/// Output status of a record.
#[derive(Clone, Copy, Debug, JsonSchema, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    /// The receipt was extracted. Check the confidence before trusting it.
    Ok,

    /// The record could not be processed.
    Failed,
}

/// Output record for batch processing.
#[derive(Clone, Debug, JsonSchema, Serialize)]
pub struct WorkOutput<T>
where
    T: 'static,
{
    /// The unique ID of the record.
    pub id: Value,

    /// What is the status of this record?
    pub status: WorkStatus,

    /// Any errors that occurred during processing.
    pub errors: Vec<String>,

    /// The output data for the record.
    #[serde(flatten)]
    pub data: T,
}

impl<T> WorkOutput<T>
where
    T: Serialize + NeedsReview + Send + 'static,
{
    /// Create a new failed output record.
    pub fn new_failed(id: Value, errors: Vec<String>, data: T) -> Self {
        Self {
            id,
            status: WorkStatus::Failed,
            errors,
            data,
        }
    }

    /// Convert from the output type to a JSON value.
    pub fn to_json(&self) -> Result<Value> {
        serde_json::to_value(self).context("failed to serialize output")
    }

    /// Write a stream of outputs to a [`Path`] or to standard output.
    pub async fn write_stream(
        ui: &Ui,
        path: Option<&Path>,
        stream: BoxedStream<Result<Self>>,
        stream_opts: &StreamOpts,
    ) -> Result<()> {
        let (stream, counters) = WorkOutputCounters::wrap_stream(stream);
        let output = stream.map(|value| value?.to_json()).boxed();
        write_output(path, output).await?;
        counters.finish(ui, stream_opts.allowed_failure_rate)
    }
}

/// What we extracted from one receipt, or why we couldn't.
#[derive(Clone, Debug, Default, JsonSchema, Serialize)]
pub struct ReceiptResult {
    /// The extraction, for successful records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Box<PipelineOutput>>,

    /// A structured error, when the pipeline rejected the image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
}

/// Run one batch record through `pipeline`. This never fails: problems are
/// reported in the output record.
#[instrument(level = "debug", skip_all, fields(id = %input.id))]
pub async fn process_receipt(
    pipeline: &ReceiptPipeline,
    input: WorkInput<ReceiptInput>,
) -> WorkOutput<ReceiptResult> {
    let image = match input.data.load().await {
        Ok(image) => image,
        Err(err) => {
            warn!(id = %input.id, "Could not load receipt: {err:#}");
            return WorkOutput::new_failed(
                input.id,
                vec![format!("{err:#}")],
                ReceiptResult::default(),
            );
        }
    };

    match pipeline.process(image).await {
        Ok(output) => WorkOutput {
            id: input.id,
            status: WorkStatus::Ok,
            errors: vec![],
            data: ReceiptResult {
                result: Some(Box::new(output)),
                error: None,
            },
        },
        Err(err) => {
            let report = err.to_report();
            warn!(id = %input.id, kind = ?report.kind, "Could not extract receipt: {err}");
            WorkOutput::new_failed(
                input.id,
                vec![report.message.clone()],
                ReceiptResult {
                    result: None,
                    error: Some(report),
                },
            )
        }
    }
}

/// Counters for a batch.
#[derive(Clone, Debug, Default)]
pub struct WorkOutputCounters {
    /// How many records did we process?
    pub total_record_count: usize,

    /// How many records did we fail to process?
    pub failure_count: usize,

    /// How many successful records came back with low confidence?
    pub needs_review_count: usize,
}

impl WorkOutputCounters {
    /// Wrap a stream with counters.
    pub fn wrap_stream<T>(
        stream: BoxedStream<Result<WorkOutput<T>>>,
    ) -> (
        BoxedStream<Result<WorkOutput<T>>>,
        Arc<Mutex<WorkOutputCounters>>,
    )
    where
        T: NeedsReview + 'static,
    {
        let counters = Arc::new(Mutex::new(Self::default()));
        let counters_clone = counters.clone();
        let stream = stream
            .map(move |value| {
                let value = value?;
                counters_clone.update(&value);
                Ok(value)
            })
            .boxed();
        (stream, counters)
    }
}

/// Output data that may deserve a human look even when it succeeded.
pub trait NeedsReview {
    fn needs_review(&self) -> bool;
}

impl NeedsReview for ReceiptResult {
    fn needs_review(&self) -> bool {
        self.result
            .as_ref()
            .is_some_and(|output| !output.confidence.recommendations.is_empty())
    }
}

/// We actually want to put methods in `Mutex<WorkOutputCounters>`, because
/// that's the type we actually work with. To do that, we need to define an
/// extension trait with the methods we want.
pub trait WorkItemCounterExt {
    /// Update counters for a record.
    fn update<T: NeedsReview>(&self, item: &WorkOutput<T>);

    /// Display counter values to the user, and fail if too many records
    /// failed.
    fn finish(self: Arc<Self>, ui: &Ui, allowed_failure_rate: f32) -> Result<()>;
}

impl WorkItemCounterExt for Mutex<WorkOutputCounters> {
    fn update<T: NeedsReview>(&self, item: &WorkOutput<T>) {
        // Hold a sync lock, but just for an instant to update counters.
        let mut counters = self.lock().expect("lock poisoned");
        counters.total_record_count += 1;
        if item.status != WorkStatus::Ok {
            counters.failure_count += 1;
        } else if item.data.needs_review() {
            counters.needs_review_count += 1;
        }
    }

    fn finish(self: Arc<Self>, ui: &Ui, allowed_failure_rate: f32) -> Result<()> {
        let counters = self.lock().expect("lock poisoned").to_owned();
        if counters.total_record_count == 0 {
            ui.display_message("🫙", "No records to process");
            return Ok(());
        }
        let failure_rate =
            counters.failure_count as f32 / counters.total_record_count as f32;
        if failure_rate > allowed_failure_rate {
            Err(anyhow!(
                "{}/{} ({:.2}%) of receipts failed, but only {:.2}% were allowed",
                counters.failure_count,
                counters.total_record_count,
                failure_rate * 100.0,
                allowed_failure_rate * 100.0
            ))
        } else {
            if counters.needs_review_count > 0 {
                ui.display_message(
                    "🔎",
                    &format!(
                        "{} receipts came with recommendations and may need review",
                        counters.needs_review_count
                    ),
                );
            }
            if counters.failure_count > 0 {
                ui.display_message(
                    "❌",
                    &format!("{} receipts could not be processed", counters.failure_count),
                );
            }
            Ok(())
        }
    }
}
