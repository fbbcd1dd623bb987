//! Directory scanning for supplementary context.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use tsuzuri_core::{ContextScanner, ScannedContext, WorkflowError};

/// Reads every regular file under a directory, recursively.
///
/// Files are visited in path order. Content that is not valid UTF-8 is
/// decoded byte-for-byte as Latin-1 instead of failing the scan, and files
/// that cannot be read at all are skipped with a warning.
#[derive(Debug, Clone, Default)]
pub struct DirectoryScanner;

impl DirectoryScanner {
    /// Creates a scanner.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ContextScanner for DirectoryScanner {
    async fn scan(&self, path: &Path) -> Result<ScannedContext, WorkflowError> {
        let not_found = || WorkflowError::NotFound {
            path: path.display().to_string(),
        };
        let meta = tokio::fs::metadata(path).await.map_err(|_| not_found())?;
        if !meta.is_dir() {
            return Err(not_found());
        }

        let files = collect_files(path).await;
        let mut context_text = String::new();
        let mut count = 0;
        for file in &files {
            let bytes = match tokio::fs::read(file).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(file = %file.display(), error = %e, "skipping unreadable file");
                    continue;
                }
            };
            let relative = file.strip_prefix(path).unwrap_or(file);
            context_text.push_str(&format!(
                "--- {} ---\n{}\n",
                relative.display(),
                decode(bytes)
            ));
            count += 1;
        }

        debug!(path = %path.display(), files = count, "context scanned");
        Ok(ScannedContext {
            context_text,
            files: count,
        })
    }
}

async fn collect_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "skipping unreadable directory");
                continue;
            }
        };
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => match entry.file_type().await {
                    Ok(t) if t.is_dir() => pending.push(entry.path()),
                    Ok(t) if t.is_file() => files.push(entry.path()),
                    _ => {}
                },
                Ok(None) => break,
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "stopped listing directory");
                    break;
                }
            }
        }
    }

    files.sort();
    files
}

fn decode(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => e.into_bytes().into_iter().map(char::from).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mixed_encodings_are_combined() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.txt"), "plain utf-8 ✓").expect("write");
        std::fs::write(dir.path().join("b.bin"), [b'c', b'a', b'f', 0xE9, 0xFF]).expect("write");

        let scanned = DirectoryScanner::new()
            .scan(dir.path())
            .await
            .expect("scan");

        assert_eq!(scanned.files, 2);
        assert!(scanned.context_text.contains("--- a.txt ---\nplain utf-8 ✓"));
        assert!(scanned.context_text.contains("--- b.bin ---\ncaf\u{e9}\u{ff}"));
    }

    #[tokio::test]
    async fn test_nested_directories_in_path_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("notes")).expect("mkdir");
        std::fs::write(dir.path().join("notes").join("z.md"), "inner").expect("write");
        std::fs::write(dir.path().join("a.md"), "outer").expect("write");

        let scanned = DirectoryScanner::new()
            .scan(dir.path())
            .await
            .expect("scan");

        let outer = scanned.context_text.find("outer").expect("outer");
        let inner = scanned.context_text.find("inner").expect("inner");
        assert!(outer < inner);
    }

    #[tokio::test]
    async fn test_missing_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = DirectoryScanner::new()
            .scan(&dir.path().join("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound { .. }));
    }

    #[test]
    fn test_latin1_fallback_preserves_bytes() {
        let bytes = vec![0x41, 0x80, 0xFE];
        let decoded = decode(bytes.clone());
        let round_trip: Vec<u8> = decoded.chars().map(|c| c as u8).collect();
        assert_eq!(round_trip, bytes);
    }
}
