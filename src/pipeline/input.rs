//! Input resolution: validate the Markdown path and load its text.
//!
//! Every check here runs before extraction so that a missing or unreadable
//! document aborts the run without touching the output directory.

use crate::error::Mermaid2PngError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Extensions accepted when `require_markdown_extension` is on.
const MARKDOWN_EXTENSIONS: &[&str] = &["md", "markdown"];

/// Resolve a user-supplied path to a readable Markdown file.
pub fn resolve_document(
    path: &Path,
    require_markdown_extension: bool,
) -> Result<PathBuf, Mermaid2PngError> {
    let path = path.to_path_buf();

    match std::fs::metadata(&path) {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => return Err(Mermaid2PngError::DocumentNotFound { path }),
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            return Err(Mermaid2PngError::PermissionDenied { path });
        }
        Err(_) => return Err(Mermaid2PngError::DocumentNotFound { path }),
    }

    if require_markdown_extension && !has_markdown_extension(&path) {
        return Err(Mermaid2PngError::NotMarkdown { path });
    }

    // Check read permission by attempting to open
    match std::fs::File::open(&path) {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            return Err(Mermaid2PngError::PermissionDenied { path });
        }
        Err(_) => return Err(Mermaid2PngError::DocumentNotFound { path }),
    }

    debug!("Resolved Markdown document: {}", path.display());
    Ok(path)
}

fn has_markdown_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            MARKDOWN_EXTENSIONS
                .iter()
                .any(|m| e.eq_ignore_ascii_case(m))
        })
        .unwrap_or(false)
}

/// Read the document as text.
///
/// Documents that are not valid UTF-8 are decoded as Latin-1, which maps
/// every byte to a char and therefore never fails.
pub async fn read_document(path: &Path) -> Result<String, Mermaid2PngError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        ErrorKind::PermissionDenied => Mermaid2PngError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => Mermaid2PngError::DocumentNotFound {
            path: path.to_path_buf(),
        },
    })?;

    Ok(decode_text(bytes))
}

fn decode_text(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(e) => {
            debug!("Document is not valid UTF-8; decoding as Latin-1");
            e.into_bytes().into_iter().map(char::from).collect()
        }
    }
}

/// The default output directory: `<stem>_diagrams` next to the document.
pub fn default_output_dir(document: &Path) -> PathBuf {
    let stem = document
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    let parent = document.parent().unwrap_or_else(|| Path::new(""));
    parent.join(format!("{stem}_diagrams"))
}
