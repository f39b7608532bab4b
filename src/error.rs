//! Error types for the mermaid2png library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Mermaid2PngError`] — **Fatal**: the batch cannot proceed at all
//!   (document missing, renderer not installed). Returned as
//!   `Err(Mermaid2PngError)` from the top-level `convert*` functions.
//!
//! * [`TaskError`] — **Non-fatal**: a single diagram failed (write error,
//!   renderer rejected the syntax, timeout) but every other diagram is still
//!   attempted. Stored inside [`crate::output::ConversionTask`] so callers can
//!   inspect partial success rather than losing the whole batch to one bad
//!   diagram.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the mermaid2png library.
///
/// Per-diagram failures use [`TaskError`] and are stored in
/// [`crate::output::ConversionTask`] rather than propagated here.
#[derive(Debug, Error)]
pub enum Mermaid2PngError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The Markdown document was not found at the given path.
    #[error("Markdown file not found: '{path}'\nCheck the path exists and is readable.")]
    DocumentNotFound { path: PathBuf },

    /// Process does not have read permission on the document.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The document does not carry a Markdown extension.
    #[error("'{path}' is not a Markdown file (expected a .md or .markdown extension)")]
    NotMarkdown { path: PathBuf },

    // ── Renderer errors ───────────────────────────────────────────────────
    /// The renderer (or the runtime it needs) did not answer a version query.
    #[error(
        "Diagram renderer '{program}' is unavailable: {detail}\n\n\
Install Node.js, then either:\n\
  • npm install -g @mermaid-js/mermaid-cli   (and pass --mmdc mmdc), or\n\
  • let mermaid2png fetch it on demand through npx (default).\n"
    )]
    RendererUnavailable { program: String, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single diagram.
///
/// Stored alongside [`crate::output::ConversionTask`] when a task fails.
/// The batch always continues with the next diagram.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum TaskError {
    /// The source file (or its directory) could not be written.
    #[error("Diagram {index}: cannot write '{path}': {detail}")]
    FileSystem {
        index: usize,
        path: PathBuf,
        detail: String,
    },

    /// The renderer process could not be started.
    #[error("Diagram {index}: failed to start renderer: {detail}")]
    SpawnFailed { index: usize, detail: String },

    /// The renderer exited with a non-zero status.
    #[error("Diagram {index}: renderer exited with {}: {diagnostic}", exit_label(.exit_code))]
    RenderFailed {
        index: usize,
        exit_code: Option<i32>,
        diagnostic: String,
    },

    /// The renderer reported success but produced no image.
    #[error("Diagram {index}: renderer produced no output at '{path}'")]
    EmptyOutput { index: usize, path: PathBuf },

    /// The renderer exceeded its wall-clock budget and was terminated.
    ///
    /// `diagnostic` holds whatever the renderer printed before it hung.
    #[error("Diagram {index}: renderer timed out after {secs}s{}", detail_suffix(.diagnostic))]
    Timeout {
        index: usize,
        secs: u64,
        diagnostic: String,
    },

    /// The task panicked; caught so the rest of the batch still runs.
    #[error("Diagram {index}: internal error: {detail}")]
    Internal { index: usize, detail: String },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("status {c}"),
        None => "a signal".to_string(),
    }
}

fn detail_suffix(diagnostic: &str) -> String {
    if diagnostic.is_empty() {
        String::new()
    } else {
        format!(": {diagnostic}")
    }
}

impl TaskError {
    /// 1-indexed diagram number this error belongs to.
    pub fn index(&self) -> usize {
        match self {
            TaskError::FileSystem { index, .. }
            | TaskError::SpawnFailed { index, .. }
            | TaskError::RenderFailed { index, .. }
            | TaskError::EmptyOutput { index, .. }
            | TaskError::Timeout { index, .. }
            | TaskError::Internal { index, .. } => *index,
        }
    }
}
