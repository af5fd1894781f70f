//! Input resolution: validate the source document and derive output paths.
//!
//! The rendered PDF and the fallback HTML share the source's base file name.
//! When the source is itself HTML the fallback gets a `.print.html` suffix so
//! the original is never overwritten.

use crate::error::StorybookError;
use std::path::{Path, PathBuf};
use tracing::debug;

/// How the source document is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Markdown,
    Html,
}

impl SourceFormat {
    /// Detect by extension; anything that is not `.html`/`.htm` is Markdown.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("html" | "htm") => SourceFormat::Html,
            _ => SourceFormat::Markdown,
        }
    }
}

/// A validated, loaded source document.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub path: PathBuf,
    pub format: SourceFormat,
    pub content: String,
}

impl SourceDocument {
    /// Where every backend writes its PDF.
    pub fn pdf_path(&self) -> PathBuf {
        self.path.with_extension("pdf")
    }

    /// Where the printable HTML fallback goes.
    pub fn fallback_path(&self) -> PathBuf {
        match self.format {
            SourceFormat::Markdown => self.path.with_extension("html"),
            SourceFormat::Html => self.path.with_extension("print.html"),
        }
    }

    /// Directory relative image references resolve against.
    pub fn base_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

/// Check the document exists and is readable, then load it.
pub async fn load_document(path: &Path) -> Result<SourceDocument, StorybookError> {
    if !path.is_file() {
        return Err(StorybookError::DocumentNotFound {
            path: path.to_path_buf(),
        });
    }

    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            StorybookError::DocumentNotFound {
                path: path.to_path_buf(),
            }
        } else {
            StorybookError::DocumentUnreadable {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })?;

    let format = SourceFormat::from_path(path);
    debug!("Loaded {:?} document: {} ({} bytes)", format, path.display(), content.len());
    Ok(SourceDocument {
        path: path.to_path_buf(),
        format,
        content,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_from_extension() {
        assert_eq!(SourceFormat::from_path(Path::new("a/story.md")), SourceFormat::Markdown);
        assert_eq!(SourceFormat::from_path(Path::new("story.HTML")), SourceFormat::Html);
        assert_eq!(SourceFormat::from_path(Path::new("story.htm")), SourceFormat::Html);
        assert_eq!(SourceFormat::from_path(Path::new("story")), SourceFormat::Markdown);
    }

    #[test]
    fn derived_paths_share_base_name() {
        let doc = SourceDocument {
            path: PathBuf::from("out/story.md"),
            format: SourceFormat::Markdown,
            content: String::new(),
        };
        assert_eq!(doc.pdf_path(), PathBuf::from("out/story.pdf"));
        assert_eq!(doc.fallback_path(), PathBuf::from("out/story.html"));
        assert_eq!(doc.base_dir(), PathBuf::from("out"));
    }

    #[test]
    fn html_source_is_not_overwritten_by_fallback() {
        let doc = SourceDocument {
            path: PathBuf::from("story.html"),
            format: SourceFormat::Html,
            content: String::new(),
        };
        assert_eq!(doc.fallback_path(), PathBuf::from("story.print.html"));
        assert_eq!(doc.base_dir(), PathBuf::from("."));
    }

    #[tokio::test]
    async fn missing_document_is_not_found() {
        let err = load_document(Path::new("/definitely/not/here.md"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorybookError::DocumentNotFound { .. }));
    }

    #[tokio::test]
    async fn directory_is_not_a_document() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_document(dir.path()).await.unwrap_err();
        assert!(matches!(err, StorybookError::DocumentNotFound { .. }));
    }

    #[tokio::test]
    async fn loads_existing_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("story.md");
        std::fs::write(&path, "# Title\n").unwrap();
        let doc = load_document(&path).await.unwrap();
        assert_eq!(doc.format, SourceFormat::Markdown);
        assert_eq!(doc.content, "# Title\n");
    }
}
