//! Line-delimited JSON reading and appending.
//!
//! Every record is one line, written whole and flushed before the next one is
//! accepted. A crash can at worst leave a torn final line; readers in
//! tolerant mode skip it, and reopening for append terminates it first.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufWriter, SeekFrom};

use super::error::{StoreError, StoreResult};

/// Append-only writer for one JSONL file.
pub struct JsonlWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    written: usize,
}

impl JsonlWriter {
    /// Open `path` for appending, creating it and its parent directories.
    pub async fn append(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent, e))?;
        }

        let torn = ends_without_newline(&path).await?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| StoreError::io(&path, e))?;
        let mut writer = BufWriter::new(file);

        if torn {
            tracing::warn!(
                target: "store",
                "{} ends with a partial line; it will be skipped on load",
                path.display()
            );
            writer
                .write_all(b"\n")
                .await
                .map_err(|e| StoreError::io(&path, e))?;
            writer.flush().await.map_err(|e| StoreError::io(&path, e))?;
        }

        Ok(Self {
            path,
            writer,
            written: 0,
        })
    }

    /// Serialize `value` as one line and flush it.
    pub async fn write<T: Serialize>(&mut self, value: &T) -> StoreResult<()> {
        let mut line = serde_json::to_vec(value)?;
        line.push(b'\n');
        self.writer
            .write_all(&line)
            .await
            .map_err(|e| StoreError::io(&self.path, e))?;
        self.writer
            .flush()
            .await
            .map_err(|e| StoreError::io(&self.path, e))?;
        self.written += 1;
        Ok(())
    }

    /// Flush, sync to disk and return the number of lines written.
    pub async fn finish(mut self) -> StoreResult<usize> {
        self.writer
            .flush()
            .await
            .map_err(|e| StoreError::io(&self.path, e))?;
        self.writer
            .get_ref()
            .sync_all()
            .await
            .map_err(|e| StoreError::io(&self.path, e))?;
        Ok(self.written)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

async fn ends_without_newline(path: &Path) -> StoreResult<bool> {
    let mut file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    let len = file
        .metadata()
        .await
        .map_err(|e| StoreError::io(path, e))?
        .len();
    if len == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1))
        .await
        .map_err(|e| StoreError::io(path, e))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)
        .await
        .map_err(|e| StoreError::io(path, e))?;
    Ok(last[0] != b'\n')
}

/// Parsed lines of a JSONL file.
#[derive(Debug)]
pub struct JsonlRead<T> {
    pub records: Vec<T>,
    /// Lines that failed to parse (tolerant mode only).
    pub skipped: usize,
}

/// Read every record from `path`. A missing file reads as empty.
///
/// With `strict`, the first unparsable line is an error; otherwise it is
/// logged and skipped.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path, strict: bool) -> StoreResult<JsonlRead<T>> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_lines(path, &content, strict),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(JsonlRead::empty()),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

/// Async variant of [`read_jsonl`] for callers on the runtime.
pub async fn read_jsonl_async<T: DeserializeOwned>(
    path: &Path,
    strict: bool,
) -> StoreResult<JsonlRead<T>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => parse_lines(path, &content, strict),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(JsonlRead::empty()),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

impl<T> JsonlRead<T> {
    fn empty() -> Self {
        Self {
            records: Vec::new(),
            skipped: 0,
        }
    }
}

fn parse_lines<T: DeserializeOwned>(
    path: &Path,
    content: &str,
    strict: bool,
) -> StoreResult<JsonlRead<T>> {
    let mut records = Vec::new();
    let mut skipped = 0;
    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(record) => records.push(record),
            Err(e) if strict => {
                return Err(StoreError::Corrupt {
                    path: path.to_path_buf(),
                    line: index + 1,
                    reason: e.to_string(),
                });
            }
            Err(e) => {
                tracing::warn!(
                    target: "store",
                    "skipping unreadable line {} of {}: {e}",
                    index + 1,
                    path.display()
                );
                skipped += 1;
            }
        }
    }
    Ok(JsonlRead { records, skipped })
}
