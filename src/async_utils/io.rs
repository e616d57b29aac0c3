//! I/O utilities.
//!
//! This module reads JSONL command scripts, and writes text and JSONL to either
//! a file or standard output. Async I/O comes from Tokio, and we keep the
//! stream plumbing in here so callers just see a stream of parsed records.

use std::sync::Arc;

use futures::stream::StreamExt as _;
use serde::de::DeserializeOwned;
use tokio::{
    fs::File,
    io::{AsyncBufReadExt as _, AsyncRead, AsyncWrite, AsyncWriteExt as _, BufReader, BufWriter},
};
use tokio_stream::wrappers::LinesStream;

use crate::prelude::*;

use super::BoxedStream;

/// Open a file or standard input, with a description for error messages.
async fn open_reader(
    path: Option<&Path>,
) -> Result<(String, Box<dyn AsyncRead + Unpin + Send + Sync + 'static>)> {
    match path {
        Some(path) => {
            let file = File::open(path)
                .await
                .with_context(|| format!("Failed to open file at path: {:?}", path))?;
            Ok((path.to_string_lossy().into_owned(), Box::new(file)))
        }
        None => Ok(("stdin".to_owned(), Box::new(tokio::io::stdin()))),
    }
}

/// Read JSONL records from a file or stdin. Blank lines are skipped.
///
/// Records are parsed as they are read, so a script piped in on stdin can be
/// acted on before it has been fully written.
pub async fn read_jsonl<T>(path: Option<&Path>) -> Result<BoxedStream<Result<T>>>
where
    T: DeserializeOwned + Send + 'static,
{
    let (description, reader) = open_reader(path).await?;
    let description = Arc::new(description);
    let lines = LinesStream::new(BufReader::new(reader).lines());
    Ok(Box::pin(
        lines
            .filter(|line| {
                let blank = matches!(line, Ok(line) if line.trim().is_empty());
                futures::future::ready(!blank)
            })
            .map(move |line| {
                let line = line.with_context(|| {
                    format!("Failed to read line from {:?}", description)
                })?;
                serde_json::from_str::<T>(&line).with_context(|| {
                    format!(
                        "Failed to parse JSON from line in {:?}: {:?}",
                        description, line
                    )
                })
            }),
    ))
}

/// Create an [`AsyncWrite`] for a file or stdout.
pub async fn create_writer(
    path: Option<&Path>,
) -> Result<Box<dyn AsyncWrite + Unpin + Send + Sync + 'static>> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .await
                .with_context(|| format!("Failed to create file at path: {:?}", path))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(tokio::io::stdout())),
    }
}

/// Write text to either standard output or a file.
pub async fn write_text(path: Option<&Path>, text: &str) -> Result<()> {
    let mut writer = BufWriter::new(create_writer(path).await?);
    writer
        .write_all(text.as_bytes())
        .await
        .context("Failed to write output")?;
    writer.flush().await.context("Failed to flush output")?;
    Ok(())
}

/// Write records as JSONL to either standard output or a file.
pub async fn write_jsonl<T>(path: Option<&Path>, records: &[T]) -> Result<()>
where
    T: Serialize + std::fmt::Debug,
{
    let mut writer = BufWriter::new(create_writer(path).await?);
    for record in records {
        let json = serde_json::to_string(record)
            .with_context(|| format!("Failed to serialize JSON from {:?}", record))?;
        writer
            .write_all(json.as_bytes())
            .await
            .context("Failed to write JSON to output")?;
        writer
            .write_all(b"\n")
            .await
            .context("Failed to write newline to output")?;
    }
    writer.flush().await.context("Failed to flush output")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt as _;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq, Serialize)]
    struct Record {
        n: u32,
    }

    #[tokio::test]
    async fn jsonl_round_trips_through_a_file() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("io-test")?;
        let path = dir.path().join("records.jsonl");
        write_jsonl(Some(path.as_path()), &[Record { n: 1 }, Record { n: 2 }]).await?;

        // Blank lines in hand-written scripts are fine.
        let mut text = tokio::fs::read_to_string(&path).await?;
        text.push_str("\n   \n{\"n\":3}\n");
        write_text(Some(path.as_path()), &text).await?;

        let records = read_jsonl::<Record>(Some(path.as_path()))
            .await?
            .try_collect::<Vec<_>>()
            .await?;
        assert_eq!(
            records,
            vec![Record { n: 1 }, Record { n: 2 }, Record { n: 3 }]
        );
        Ok(())
    }

    #[tokio::test]
    async fn bad_lines_are_reported_with_their_source() -> Result<()> {
        let dir = tempfile::TempDir::with_prefix("io-test")?;
        let path = dir.path().join("bad.jsonl");
        write_text(Some(path.as_path()), "{\"n\":1}\nnot json\n").await?;
        let results = read_jsonl::<Record>(Some(path.as_path()))
            .await?
            .collect::<Vec<_>>()
            .await;
        assert!(results[0].is_ok());
        let err = results[1].as_ref().expect_err("should fail to parse");
        assert!(format!("{err:#}").contains("bad.jsonl"));
        Ok(())
    }
}
