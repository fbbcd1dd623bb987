//! Writing finished content to disk.

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::info;
use tsuzuri_core::{ExportStatus, Exporter, WorkflowError};

/// Writes each export to `<root>/<slug>.md`.
#[derive(Debug, Clone)]
pub struct FileExporter {
    root: PathBuf,
}

impl FileExporter {
    /// Creates an exporter writing Markdown files under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.md", slug(name)))
    }
}

#[async_trait]
impl Exporter for FileExporter {
    async fn export(&self, content: &str, name: &str) -> Result<ExportStatus, WorkflowError> {
        let write_failure = |e: std::io::Error| WorkflowError::WriteFailure {
            name: name.to_string(),
            details: e.to_string(),
        };
        let path = self.path_for(name);
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(write_failure)?;
        tokio::fs::write(&path, content)
            .await
            .map_err(write_failure)?;
        info!(path = %path.display(), bytes = content.len(), "export written");
        Ok(ExportStatus::Success)
    }
}

/// Lowercases and keeps `[a-z0-9]`, joining everything else with `-`.
fn slug(name: &str) -> String {
    let mut out = String::new();
    for c in name.trim().chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('-') && !out.is_empty() {
            out.push('-');
        }
    }
    let out = out.trim_end_matches('-');
    if out.is_empty() {
        "export".to_string()
    } else {
        out.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug() {
        assert_eq!(slug("Rust Async: A Primer!"), "rust-async-a-primer");
        assert_eq!(slug("../../etc/passwd"), "etc-passwd");
        assert_eq!(slug("   "), "export");
    }

    #[tokio::test]
    async fn test_export_writes_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let exporter = FileExporter::new(dir.path().join("out"));

        let status = exporter
            .export("# Title\n\nBody", "My Post")
            .await
            .expect("export");

        assert_eq!(status, ExportStatus::Success);
        let written =
            std::fs::read_to_string(dir.path().join("out").join("my-post.md")).expect("read");
        assert_eq!(written, "# Title\n\nBody");
    }

    #[tokio::test]
    async fn test_export_failure_is_write_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "a file, not a directory").expect("write");
        let exporter = FileExporter::new(&blocker);

        let err = exporter.export("content", "post").await.unwrap_err();
        assert!(matches!(err, WorkflowError::WriteFailure { ref name, .. } if name == "post"));
    }
}
