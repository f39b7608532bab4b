//! Source materialisation: write each diagram to `diagram_<n>.<ext>`.
//!
//! File names depend only on the block index, so re-running the tool on an
//! unchanged document overwrites the same files with the same bytes.

use crate::error::TaskError;
use crate::output::DiagramBlock;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// `diagram_<index>.<ext>`
pub fn source_file_name(index: usize, extension: &str) -> String {
    format!("diagram_{index}.{extension}")
}

/// `diagram_<index>.png`
pub fn image_file_name(index: usize) -> String {
    format!("diagram_{index}.png")
}

/// Write `block` into `dir`, creating the directory if needed.
///
/// Atomic write (temp file in `dir` + rename) so a crash never leaves a
/// half-written source for the renderer to pick up on the next run.
pub fn write_source(
    block: &DiagramBlock,
    dir: &Path,
    extension: &str,
) -> Result<PathBuf, TaskError> {
    let path = dir.join(source_file_name(block.index(), extension));
    let fs_error = |e: std::io::Error| TaskError::FileSystem {
        index: block.index(),
        path: path.clone(),
        detail: e.to_string(),
    };

    std::fs::create_dir_all(dir).map_err(fs_error)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(fs_error)?;
    tmp.write_all(block.raw_text().as_bytes()).map_err(fs_error)?;
    tmp.write_all(b"\n").map_err(fs_error)?;
    tmp.flush().map_err(fs_error)?;
    tmp.persist(&path).map_err(|e| fs_error(e.error))?;

    debug!(
        "Wrote diagram {} source ({} bytes) to {}",
        block.index(),
        block.raw_text().len() + 1,
        path.display()
    );
    Ok(path)
}
