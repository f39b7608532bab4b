//! Result types produced by the extraction and conversion pipeline.
//!
//! [`DiagramBlock`] is what the extractor yields, [`ConversionTask`] tracks a
//! single block through materialisation and rendering, and [`BatchResult`]
//! is the immutable report for one document run.

use crate::error::TaskError;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

/// A fenced diagram found in a Markdown document.
///
/// Only the extractor creates blocks; the index is fixed from then on so it
/// always matches the `diagram_<n>` file numbering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagramBlock {
    index: usize,
    raw_text: String,
    source_lines: Option<RangeInclusive<usize>>,
}

impl DiagramBlock {
    pub(crate) fn new(
        index: usize,
        raw_text: String,
        source_lines: Option<RangeInclusive<usize>>,
    ) -> Self {
        Self {
            index,
            raw_text,
            source_lines,
        }
    }

    /// 1-indexed position among the *kept* blocks of the document.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Diagram source with leading/trailing blank lines removed.
    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    /// 1-indexed, inclusive line range of `raw_text` in the document.
    pub fn source_lines(&self) -> Option<&RangeInclusive<usize>> {
        self.source_lines.as_ref()
    }
}

/// Lifecycle of a [`ConversionTask`].
///
/// `Pending` is the only non-terminal state; once a task leaves it the status
/// never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Success,
    Failed,
    TimedOut,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Pending)
    }

    /// `TimedOut` is aggregated as a failure.
    pub fn is_failure(self) -> bool {
        matches!(self, TaskStatus::Failed | TaskStatus::TimedOut)
    }
}

/// One diagram → one source file → one image.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionTask {
    block: DiagramBlock,
    source_path: PathBuf,
    image_path: PathBuf,
    status: TaskStatus,
    error: Option<TaskError>,
    /// Wall-clock time spent writing and rendering this diagram.
    pub duration_ms: u64,
    /// Pixel size of the rendered PNG, when it could be read back.
    pub dimensions: Option<(u32, u32)>,
}

impl ConversionTask {
    pub fn new(block: DiagramBlock, source_path: PathBuf, image_path: PathBuf) -> Self {
        Self {
            block,
            source_path,
            image_path,
            status: TaskStatus::Pending,
            error: None,
            duration_ms: 0,
            dimensions: None,
        }
    }

    pub fn index(&self) -> usize {
        self.block.index
    }

    pub fn block(&self) -> &DiagramBlock {
        &self.block
    }

    /// `diagram_<n>.<ext>`, written before the renderer runs.
    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// `diagram_<n>.png`; exists only when the status is `Success`.
    pub fn image_path(&self) -> &Path {
        &self.image_path
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn error(&self) -> Option<&TaskError> {
        self.error.as_ref()
    }

    /// Mark the task as successfully rendered.
    ///
    /// Returns `false` (and changes nothing) if the task already finished.
    pub fn succeed(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = TaskStatus::Success;
        true
    }

    /// Mark the task as failed, deriving `Failed`/`TimedOut` from the error.
    ///
    /// Returns `false` (and changes nothing) if the task already finished.
    pub fn fail(&mut self, error: TaskError) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = match error {
            TaskError::Timeout { .. } => TaskStatus::TimedOut,
            _ => TaskStatus::Failed,
        };
        self.error = Some(error);
        true
    }
}

/// Final report for one document.
///
/// Only constructible from a finished task list, so
/// `total == succeeded + failed` always holds. Serialise-only for the same
/// reason.
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    total: usize,
    succeeded: usize,
    failed: usize,
    skipped_blocks: usize,
    output_dir: PathBuf,
    tasks: Vec<ConversionTask>,
    duration_ms: u64,
}

impl BatchResult {
    /// Assemble the report. Any task still `Pending` is counted as failed;
    /// the coordinator never hands one over, but the invariant must not
    /// depend on that.
    pub fn new(
        output_dir: PathBuf,
        tasks: Vec<ConversionTask>,
        skipped_blocks: usize,
        duration_ms: u64,
    ) -> Self {
        let total = tasks.len();
        let succeeded = tasks
            .iter()
            .filter(|t| t.status() == TaskStatus::Success)
            .count();
        Self {
            total,
            succeeded,
            failed: total - succeeded,
            skipped_blocks,
            output_dir,
            tasks,
            duration_ms,
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn succeeded(&self) -> usize {
        self.succeeded
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    /// Fenced blocks that were dropped as malformed or empty.
    pub fn skipped_blocks(&self) -> usize {
        self.skipped_blocks
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Tasks in extraction order.
    pub fn tasks(&self) -> &[ConversionTask] {
        &self.tasks
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    /// `true` when every discovered diagram converted (vacuously for zero).
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// One-line summary used by the CLI report.
    pub fn summary_line(&self) -> String {
        format!(
            "Conversion complete: {}/{} diagrams converted successfully",
            self.succeeded, self.total
        )
    }
}

/// Result of writing diagram sources without rendering them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractOutput {
    pub output_dir: PathBuf,
    /// Source files written, in extraction order.
    pub written: Vec<PathBuf>,
    /// Blocks whose source file could not be written.
    pub errors: Vec<TaskError>,
    pub skipped_blocks: usize,
}
