//! Reads extracted documents from an input directory.
//!
//! Accepted layouts:
//! - `.txt` / `.md` files, one document each. Form feeds separate pages.
//! - `.jsonl` files with one `{source, page, text}` record per line, the
//!   format produced by the PDF/OCR extraction step.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

use super::types::SourcePage;

const PAGE_BREAK: char = '\u{000C}';
const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "markdown"];

#[derive(Error, Debug)]
pub enum InputError {
    #[error("Input directory not found: {0}")]
    MissingDirectory(PathBuf),

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to walk {path}: {reason}")]
    Walk { path: PathBuf, reason: String },

    #[error("Invalid page record in {path} line {line}: {reason}")]
    InvalidRecord {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

pub type InputResult<T> = Result<T, InputError>;

/// One input file and the hash of its bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Identifier relative to the input directory, `/`-separated.
    pub source: String,
    pub content_hash: String,
}

/// Pages loaded from an input directory in deterministic order.
#[derive(Debug, Default)]
pub struct LoadedCorpus {
    pub pages: Vec<SourcePage>,
    pub files: Vec<SourceFile>,
}

/// Load every supported file under `dir`, sorted by path.
pub fn load_directory(dir: &Path) -> InputResult<LoadedCorpus> {
    if !dir.is_dir() {
        return Err(InputError::MissingDirectory(dir.to_path_buf()));
    }

    let mut corpus = LoadedCorpus::default();
    let walker = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()));

    for entry in walker {
        let entry = entry.map_err(|e| InputError::Walk {
            path: dir.to_path_buf(),
            reason: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let Some(kind) = FileKind::from_path(path) else {
            tracing::debug!(target: "chunking", "skipping unsupported file {}", path.display());
            continue;
        };

        let bytes = std::fs::read(path).map_err(|source| InputError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let content = String::from_utf8_lossy(&bytes);
        let source = relative_source(dir, path);

        let pages = match kind {
            FileKind::Text => pages_from_text(&source, &content),
            FileKind::PageRecords => pages_from_jsonl(path, &content)?,
        };
        tracing::debug!(
            target: "chunking",
            "loaded {} page(s) from {}",
            pages.len(),
            path.display()
        );

        corpus.files.push(SourceFile {
            path: path.to_path_buf(),
            source,
            content_hash: hash_bytes(&bytes),
        });
        corpus.pages.extend(pages);
    }

    tracing::info!(
        target: "chunking",
        "loaded {} pages from {} files in {}",
        corpus.pages.len(),
        corpus.files.len(),
        dir.display()
    );
    Ok(corpus)
}

/// Split plain text into pages at form feeds. Text without form feeds is a
/// single page with no locator.
pub fn pages_from_text(source: &str, text: &str) -> Vec<SourcePage> {
    if !text.contains(PAGE_BREAK) {
        if text.trim().is_empty() {
            return Vec::new();
        }
        return vec![SourcePage::new(source, None, text)];
    }

    text.split(PAGE_BREAK)
        .enumerate()
        .filter(|(_, page)| !page.trim().is_empty())
        .map(|(i, page)| SourcePage::new(source, Some(i as u32 + 1), page))
        .collect()
}

/// Parse line-delimited page records. Blank lines are ignored.
pub fn pages_from_jsonl(path: &Path, content: &str) -> InputResult<Vec<SourcePage>> {
    let mut pages = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let page: SourcePage =
            serde_json::from_str(line).map_err(|e| InputError::InvalidRecord {
                path: path.to_path_buf(),
                line: idx + 1,
                reason: e.to_string(),
            })?;
        if !page.text.trim().is_empty() {
            pages.push(page);
        }
    }
    Ok(pages)
}

/// Hex-encoded SHA-256 of `bytes`.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

enum FileKind {
    Text,
    PageRecords,
}

impl FileKind {
    fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if ext == "jsonl" {
            Some(FileKind::PageRecords)
        } else if TEXT_EXTENSIONS.contains(&ext.as_str()) {
            Some(FileKind::Text)
        } else {
            None
        }
    }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|s| s.starts_with('.'))
}

fn relative_source(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_pages_from_text_without_form_feed() {
        let pages = pages_from_text("notes.txt", "Just one page.");
        assert_eq!(pages, vec![SourcePage::new("notes.txt", None, "Just one page.")]);
        assert!(pages_from_text("blank.txt", "  \n ").is_empty());
    }

    #[test]
    fn test_pages_from_text_splits_on_form_feed() {
        let pages = pages_from_text("book.txt", "Page one.\u{000C}\u{000C}Page three.");
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].page, Some(1));
        assert_eq!(pages[1].page, Some(3));
        assert_eq!(pages[1].text, "Page three.");
    }

    #[test]
    fn test_pages_from_jsonl() {
        let content = "{\"source\":\"a.pdf\",\"page\":1,\"text\":\"First.\"}\n\n{\"source\":\"a.pdf\",\"page\":2,\"text\":\"Second.\"}\n";
        let pages = pages_from_jsonl(Path::new("a.jsonl"), content).unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[1].page, Some(2));
    }

    #[test]
    fn test_pages_from_jsonl_reports_line() {
        let content = "{\"source\":\"a\",\"text\":\"ok\"}\nnot json\n";
        let err = pages_from_jsonl(Path::new("bad.jsonl"), content).unwrap_err();
        match err {
            InputError::InvalidRecord { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_load_directory_is_sorted_and_skips_hidden() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::create_dir_all(dir.path().join(".cache")).unwrap();
        fs::write(dir.path().join("b.txt"), "Second file.").unwrap();
        fs::write(dir.path().join("a.md"), "First file.").unwrap();
        fs::write(dir.path().join("sub/c.txt"), "Nested file.").unwrap();
        fs::write(dir.path().join(".cache/x.txt"), "Hidden.").unwrap();
        fs::write(dir.path().join("image.png"), [0u8, 1, 2]).unwrap();

        let corpus = load_directory(dir.path()).unwrap();
        let sources: Vec<&str> = corpus.pages.iter().map(|p| p.source.as_str()).collect();
        assert_eq!(sources, vec!["a.md", "b.txt", "sub/c.txt"]);
        assert_eq!(corpus.files.len(), 3);
        assert_eq!(corpus.files[0].content_hash, hash_bytes(b"First file."));
    }

    #[test]
    fn test_missing_directory() {
        let dir = TempDir::new().unwrap();
        let err = load_directory(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, InputError::MissingDirectory(_)));
    }
}
