//! I/O utilities.
//!
//! This module reads configuration files (JSON or TOML) and batch inputs
//! (JSONL or CSV), and writes JSON and JSONL outputs. Batch inputs may come
//! from a file or from standard input, so we detect the format either from the
//! file extension or by peeking at the first byte.

use std::{pin::Pin, sync::Arc};

use futures::{TryStreamExt as _, pin_mut, stream::StreamExt as _};
use peekable::tokio::AsyncPeekable;
use serde_json::Map;
use tokio::{
    fs::File,
    io::{
        AsyncBufRead, AsyncBufReadExt as _, AsyncRead, AsyncReadExt as _, AsyncWrite,
        AsyncWriteExt as _, BufReader, BufWriter,
    },
};
use tokio_stream::wrappers::LinesStream;

use crate::{
    prelude::*,
    ui::{Activity, Ui},
};

use super::{BoxedStream, size_hint::WithSizeHintExt as _};

/// Record formats we accept for batch input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordFormat {
    /// One JSON object per line.
    Jsonl,
    /// CSV with a header row.
    Csv,
}

/// An opened batch input, with its detected format.
pub struct RecordReader {
    /// The detected record format.
    format: RecordFormat,

    /// A human-readable description of the input source, for error messages.
    description: Arc<String>,

    /// The underlying reader.
    reader: Pin<Box<dyn AsyncBufRead + Send + Sync + 'static>>,
}

impl RecordReader {
    /// Open a reader, peeking at the first byte to decide between JSONL and
    /// CSV.
    pub async fn from_reader(
        description: String,
        reader: impl AsyncRead + Unpin + Send + Sync + 'static,
    ) -> Result<Self> {
        let mut peekable = AsyncPeekable::new(BufReader::new(reader));
        let mut first = [0u8; 1];
        let format = match peekable.peek_exact(&mut first).await {
            Ok(_) if first[0] == b'{' => RecordFormat::Jsonl,
            Ok(_) => RecordFormat::Csv,
            // Empty input. Either format yields zero records.
            Err(_) => RecordFormat::Jsonl,
        };
        Ok(Self {
            format,
            description: Arc::new(description),
            reader: Box::pin(BufReader::new(peekable)),
        })
    }

    /// Open a file, using its extension to pick a format.
    pub async fn from_path(path: &Path) -> Result<Self> {
        let ext = path.extension().unwrap_or_default();
        let format = if ext == "json" || ext == "jsonl" {
            RecordFormat::Jsonl
        } else {
            RecordFormat::Csv
        };
        let file = File::open(path)
            .await
            .with_context(|| format!("failed to open {:?}", path.display()))?;
        Ok(Self {
            format,
            description: Arc::new(path.display().to_string()),
            reader: Box::pin(BufReader::new(file)),
        })
    }

    /// Open a file or standard input.
    pub async fn from_path_or_stdin(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_path(path).await,
            None => Self::from_reader("stdin".to_owned(), tokio::io::stdin()).await,
        }
    }

    /// The detected record format.
    pub fn format(&self) -> RecordFormat {
        self.format
    }
}

/// Read TOML or JSON from a file. JSON is recognised by a leading `{`.
pub async fn read_json_or_toml<T>(path: &Path) -> Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let mut data = String::new();
    File::open(path)
        .await
        .with_context(|| format!("failed to open {:?}", path.display()))?
        .read_to_string(&mut data)
        .await
        .with_context(|| format!("failed to read {:?}", path.display()))?;
    if data.trim_start().starts_with('{') {
        serde_json::from_str(&data)
            .with_context(|| format!("failed to parse JSON from {:?}", path.display()))
    } else {
        toml::from_str(&data)
            .with_context(|| format!("failed to parse TOML from {:?}", path.display()))
    }
}

/// Count JSONL or CSV records in a file, so we can show a real progress bar.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
async fn count_records(ui: &Ui, path: &Path) -> Result<(usize, Option<usize>)> {
    // Named pipes and the like can only be read once.
    if !path.is_file() {
        return Ok((0, None));
    }

    let spinner = ui.new_spinner(&Activity {
        emoji: "🧮",
        running: "Counting input records",
        finished: "Counted input records",
    });
    let input = RecordReader::from_path(path).await?;
    let count = match input.format {
        RecordFormat::Jsonl => {
            LinesStream::new(input.reader.lines())
                .try_filter(|line| futures::future::ready(!line.trim().is_empty()))
                .try_fold(0, |acc, _| async move { Ok(acc + 1) })
                .await?
        }
        RecordFormat::Csv => {
            csv_async::AsyncReaderBuilder::new()
                .create_reader(input.reader)
                .into_byte_records()
                .try_fold(0, |acc, _| async move { Ok(acc + 1) })
                .await?
        }
    };
    spinner.finish_with_message(format!("Found {count} records"));
    Ok((count, Some(count)))
}

/// A stream of JSON objects, one per input record.
pub type JsonStream = BoxedStream<Result<Value>>;

/// Read JSONL or CSV records from a file or stdin.
///
/// CSV rows become JSON objects keyed by the header row, with every value a
/// string.
pub async fn read_jsonl_or_csv(ui: Ui, path: Option<&Path>) -> Result<JsonStream> {
    let size_hint = match path {
        Some(path) => count_records(&ui, path).await?,
        None => (0, None),
    };

    let input = RecordReader::from_path_or_stdin(path).await?;
    let description = input.description.clone();
    match input.format {
        RecordFormat::Jsonl => Ok(LinesStream::new(input.reader.lines())
            .try_filter(|line| futures::future::ready(!line.trim().is_empty()))
            .with_size_hint(size_hint)
            .map(move |line| {
                let line = line?;
                serde_json::from_str::<Value>(&line).with_context(|| {
                    format!("failed to parse JSON line from {description}: {line:?}")
                })
            })
            .boxed()),
        RecordFormat::Csv => {
            let mut reader = csv_async::AsyncReaderBuilder::new().create_reader(input.reader);
            let headers = Arc::new(
                reader
                    .headers()
                    .await
                    .with_context(|| format!("failed to read CSV headers from {description}"))?
                    .to_owned(),
            );
            Ok(reader
                .into_records()
                .with_size_hint(size_hint)
                .map(move |record| {
                    let record = record.with_context(|| {
                        format!("failed to read CSV record from {description}")
                    })?;
                    let map = headers
                        .iter()
                        .zip(record.iter())
                        .map(|(header, value)| {
                            (header.to_owned(), Value::String(value.to_owned()))
                        })
                        .collect::<Map<String, Value>>();
                    Ok(Value::Object(map))
                })
                .boxed())
        }
    }
}

/// Create an [`AsyncWrite`] for a file or stdout.
pub async fn create_writer(
    path: Option<&Path>,
) -> Result<Box<dyn AsyncWrite + Unpin + Send + Sync + 'static>> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .await
                .with_context(|| format!("failed to create {:?}", path.display()))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(tokio::io::stdout())),
    }
}

/// Write a single value as pretty-printed JSON.
pub async fn write_json_pretty<T: Serialize>(path: Option<&Path>, value: &T) -> Result<()> {
    let mut writer = create_writer(path).await?;
    let mut json = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    json.push('\n');
    writer
        .write_all(json.as_bytes())
        .await
        .context("failed to write output")?;
    writer.flush().await.context("failed to flush output")
}

/// Write a stream of JSON values to a file or stdout as JSONL.
pub async fn write_output(path: Option<&Path>, stream: JsonStream) -> Result<()> {
    let mut writer = BufWriter::new(create_writer(path).await?);
    pin_mut!(stream);
    while let Some(value) = stream.next().await {
        let value = value?;
        let json = serde_json::to_string(&value)
            .with_context(|| format!("failed to serialize output record: {value:?}"))?;
        writer
            .write_all(json.as_bytes())
            .await
            .context("failed to write output record")?;
        writer
            .write_all(b"\n")
            .await
            .context("failed to write newline to output")?;
    }
    writer.flush().await.context("failed to flush output")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use futures::TryStreamExt as _;

    use super::*;

    #[tokio::test]
    async fn reads_jsonl_records() -> Result<()> {
        let mut file = tempfile::Builder::new().suffix(".jsonl").tempfile()?;
        writeln!(file, r#"{{"id": 1, "path": "a.jpg"}}"#)?;
        writeln!(file)?;
        writeln!(file, r#"{{"id": 2, "path": "b.png"}}"#)?;
        let records = read_jsonl_or_csv(Ui::init_for_tests(), Some(file.path()))
            .await?
            .try_collect::<Vec<_>>()
            .await?;
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["path"], "b.png");
        Ok(())
    }

    #[tokio::test]
    async fn reads_csv_records_as_strings() -> Result<()> {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile()?;
        writeln!(file, "id,path")?;
        writeln!(file, "r1,receipts/r1.jpg")?;
        let records = read_jsonl_or_csv(Ui::init_for_tests(), Some(file.path()))
            .await?
            .try_collect::<Vec<_>>()
            .await?;
        assert_eq!(records, vec![serde_json::json!({"id": "r1", "path": "receipts/r1.jpg"})]);
        Ok(())
    }

    #[tokio::test]
    async fn sniffs_jsonl_from_first_byte() -> Result<()> {
        let input = RecordReader::from_reader("test".to_owned(), &b"{\"id\": 1}\n"[..]).await?;
        assert_eq!(input.format(), RecordFormat::Jsonl);
        let input = RecordReader::from_reader("test".to_owned(), &b"id,path\n"[..]).await?;
        assert_eq!(input.format(), RecordFormat::Csv);
        let input = RecordReader::from_reader("test".to_owned(), &b""[..]).await?;
        assert_eq!(input.format(), RecordFormat::Jsonl);
        Ok(())
    }

    #[tokio::test]
    async fn reads_toml_and_json_config() -> Result<()> {
        #[derive(Deserialize)]
        struct Small {
            level: String,
        }
        let mut toml_file = tempfile::Builder::new().suffix(".toml").tempfile()?;
        writeln!(toml_file, "level = \"quick\"")?;
        let small: Small = read_json_or_toml(toml_file.path()).await?;
        assert_eq!(small.level, "quick");

        let mut json_file = tempfile::Builder::new().suffix(".json").tempfile()?;
        writeln!(json_file, r#"{{ "level": "full" }}"#)?;
        let small: Small = read_json_or_toml(json_file.path()).await?;
        assert_eq!(small.level, "full");
        Ok(())
    }
}
