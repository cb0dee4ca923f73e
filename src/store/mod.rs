//! Artifact store.
//!
//! Layout under the output directory:
//!
//! ```text
//! chunks.jsonl            one chunk per line, written atomically
//! chunks.manifest.json    input fingerprint for chunk reuse
//! stages/<stage>.jsonl    append-only stage records
//! corpus.jsonl            joined lineage records, written at the end of a run
//! run_summary.json        per-stage counts and timing
//! ```
//!
//! Stage files are the only resumability signal. They are never rewritten;
//! later lines supersede earlier ones for the same (chunk, stage).

pub mod error;
pub mod jsonl;

pub use error::{StoreError, StoreResult};
pub use jsonl::{JsonlRead, JsonlWriter, read_jsonl, read_jsonl_async};

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::documents::{Chunk, ChunkId, InputManifest};
use crate::pipeline::{RecordStatus, Stage, StageRecord};

pub const CHUNKS_FILE: &str = "chunks.jsonl";
pub const MANIFEST_FILE: &str = "chunks.manifest.json";
pub const STAGES_DIR: &str = "stages";
pub const CORPUS_FILE: &str = "corpus.jsonl";
pub const SUMMARY_FILE: &str = "run_summary.json";

/// Latest record per chunk for one stage.
#[derive(Debug, Clone, Default)]
pub struct StageLog {
    pub records: BTreeMap<ChunkId, StageRecord>,
    /// Lines read, superseded ones included.
    pub lines: usize,
    /// Unreadable lines that were skipped.
    pub skipped: usize,
}

impl StageLog {
    pub fn latest(&self, chunk_id: ChunkId) -> Option<&StageRecord> {
        self.records.get(&chunk_id)
    }

    /// The chunk needs no further work at this stage.
    pub fn is_done(&self, chunk_id: ChunkId) -> bool {
        self.latest(chunk_id).is_some_and(|r| r.status.is_done())
    }

    /// The chunk has a record that ends processing at this stage.
    pub fn is_terminal(&self, chunk_id: ChunkId) -> bool {
        self.latest(chunk_id).is_some_and(|r| r.status.is_terminal())
    }

    pub fn count(&self, status: RecordStatus) -> usize {
        self.records.values().filter(|r| r.status == status).count()
    }

    fn from_read(stage: Stage, read: JsonlRead<StageRecord>) -> Self {
        let mut log = StageLog {
            lines: read.records.len() + read.skipped,
            skipped: read.skipped,
            ..Default::default()
        };
        for record in read.records.into_iter().filter(|r| r.stage == stage) {
            log.apply(record);
        }
        log
    }

    /// Apply a record with last-write-wins semantics.
    pub fn apply(&mut self, record: StageRecord) {
        self.records.insert(record.chunk_id, record);
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn chunks_path(&self) -> PathBuf {
        self.root.join(CHUNKS_FILE)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn stages_dir(&self) -> PathBuf {
        self.root.join(STAGES_DIR)
    }

    pub fn stage_path(&self, stage: Stage) -> PathBuf {
        self.stages_dir().join(format!("{}.jsonl", stage.as_str()))
    }

    pub fn corpus_path(&self) -> PathBuf {
        self.root.join(CORPUS_FILE)
    }

    pub fn summary_path(&self) -> PathBuf {
        self.root.join(SUMMARY_FILE)
    }

    pub fn ensure_dirs(&self) -> StoreResult<()> {
        let stages = self.stages_dir();
        fs::create_dir_all(&stages).map_err(|e| StoreError::io(&stages, e))
    }

    /// Write to a temp file in the output directory and rename over `target`.
    fn write_atomic<F>(&self, target: &Path, write: F) -> StoreResult<()>
    where
        F: FnOnce(&mut dyn Write) -> StoreResult<()>,
    {
        fs::create_dir_all(&self.root).map_err(|e| StoreError::io(&self.root, e))?;
        let mut temp = NamedTempFile::new_in(&self.root).map_err(|e| StoreError::io(&self.root, e))?;
        {
            let mut writer = BufWriter::new(temp.as_file_mut());
            write(&mut writer)?;
            writer.flush().map_err(|e| StoreError::io(target, e))?;
        }
        temp.as_file()
            .sync_all()
            .map_err(|e| StoreError::io(target, e))?;
        temp.persist(target)
            .map_err(|e| StoreError::io(target, e.error))?;
        Ok(())
    }

    fn write_lines<T: Serialize>(&self, target: &Path, items: &[T]) -> StoreResult<()> {
        self.write_atomic(target, |w| {
            for item in items {
                serde_json::to_writer(&mut *w, item)?;
                w.write_all(b"\n").map_err(|e| StoreError::io(target, e))?;
            }
            Ok(())
        })
    }

    fn write_pretty<T: Serialize>(&self, target: &Path, value: &T) -> StoreResult<()> {
        self.write_atomic(target, |w| {
            serde_json::to_writer_pretty(&mut *w, value)?;
            w.write_all(b"\n").map_err(|e| StoreError::io(target, e))
        })
    }

    fn read_json<T: DeserializeOwned>(&self, path: &Path) -> StoreResult<Option<T>> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    pub fn write_chunks(&self, chunks: &[Chunk]) -> StoreResult<()> {
        self.write_lines(&self.chunks_path(), chunks)
    }

    /// Chunks from `chunks.jsonl`, `None` when the file does not exist.
    pub fn read_chunks(&self) -> StoreResult<Option<Vec<Chunk>>> {
        let path = self.chunks_path();
        if !path.exists() {
            return Ok(None);
        }
        let read = read_jsonl::<Chunk>(&path, true)?;
        Ok(Some(read.records))
    }

    pub fn write_manifest(&self, manifest: &InputManifest) -> StoreResult<()> {
        self.write_pretty(&self.manifest_path(), manifest)
    }

    pub fn read_manifest(&self) -> StoreResult<Option<InputManifest>> {
        self.read_json(&self.manifest_path())
    }

    /// Open the append handle for `stage`.
    pub async fn stage_writer(&self, stage: Stage) -> StoreResult<JsonlWriter> {
        JsonlWriter::append(self.stage_path(stage)).await
    }

    /// Latest record per chunk for `stage`. Records for other stages are ignored.
    pub fn load_stage(&self, stage: Stage) -> StoreResult<StageLog> {
        let read = read_jsonl::<StageRecord>(&self.stage_path(stage), false)?;
        Ok(StageLog::from_read(stage, read))
    }

    /// Logs of every stage, read without blocking the runtime.
    pub async fn load_stages(&self) -> StoreResult<BTreeMap<Stage, StageLog>> {
        let mut logs = BTreeMap::new();
        for stage in Stage::ALL {
            let read = read_jsonl_async::<StageRecord>(&self.stage_path(stage), false).await?;
            logs.insert(stage, StageLog::from_read(stage, read));
        }
        Ok(logs)
    }

    /// Whether any stage file holds records.
    pub fn has_stage_artifacts(&self) -> bool {
        Stage::ALL.iter().any(|stage| {
            fs::metadata(self.stage_path(*stage))
                .map(|m| m.len() > 0)
                .unwrap_or(false)
        })
    }

    /// Delete every artifact this store writes. Unrelated files are left alone.
    pub fn reset(&self) -> StoreResult<()> {
        for path in [
            self.chunks_path(),
            self.manifest_path(),
            self.corpus_path(),
            self.summary_path(),
        ] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::io(&path, e)),
            }
        }
        let stages = self.stages_dir();
        match fs::remove_dir_all(&stages) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::io(&stages, e)),
        }
        crate::log_event!("store", "reset", "{}", self.root.display());
        Ok(())
    }

    pub fn write_corpus<T: Serialize>(&self, records: &[T]) -> StoreResult<()> {
        self.write_lines(&self.corpus_path(), records)
    }

    pub fn write_summary<T: Serialize>(&self, summary: &T) -> StoreResult<()> {
        self.write_pretty(&self.summary_path(), summary)
    }

    pub fn read_summary<T: DeserializeOwned>(&self) -> StoreResult<Option<T>> {
        self.read_json(&self.summary_path())
    }
}
