//! Batch coordination: one document in, one [`BatchResult`] out.
//!
//! The coordinator owns the ordering guarantees: documents are validated
//! before extraction, the renderer is verified before any file is written,
//! diagrams are converted in extraction order, and a failing diagram never
//! stops the ones after it.

use crate::config::ConversionConfig;
use crate::error::{Mermaid2PngError, TaskError};
use crate::output::{BatchResult, ConversionTask, DiagramBlock, ExtractOutput, TaskStatus};
use crate::pipeline::render::{self, RenderOptions, VerifiedRenderer};
use crate::pipeline::{extract, input, materialize};
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Convert every diagram in a Markdown document to PNG.
///
/// This is the primary entry point for the library.
///
/// # Returns
/// `Ok(BatchResult)` once every diagram has been attempted, even if some
/// failed (check [`BatchResult::is_success`]). A document without diagrams
/// yields an empty result and does not require the renderer.
///
/// # Errors
/// Returns `Err(Mermaid2PngError)` only for fatal errors:
/// - Document not found / unreadable / not Markdown
/// - Renderer or its runtime unavailable (checked before any file is written)
pub async fn convert(
    document: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<BatchResult, Mermaid2PngError> {
    let batch = match prepare(document.as_ref(), config).await? {
        Prepared::Empty(result) => return Ok(result),
        Prepared::Batch(batch) => batch,
    };

    // ── Step 3: Preflight the renderer ───────────────────────────────────
    let renderer = render::preflight(
        &config.renderer,
        Duration::from_secs(config.preflight_timeout_secs),
    )
    .await?;

    // ── Step 4: Materialise + render ─────────────────────────────────────
    Ok(run_batch(batch, &renderer, config).await)
}

/// Like [`convert`], but with a renderer verified by the caller.
///
/// Useful when converting many documents: run [`render::preflight`] once and
/// reuse the [`VerifiedRenderer`].
pub async fn convert_with_renderer(
    document: impl AsRef<Path>,
    renderer: &VerifiedRenderer,
    config: &ConversionConfig,
) -> Result<BatchResult, Mermaid2PngError> {
    match prepare(document.as_ref(), config).await? {
        Prepared::Empty(result) => Ok(result),
        Prepared::Batch(batch) => Ok(run_batch(batch, renderer, config).await),
    }
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    document: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<BatchResult, Mermaid2PngError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Mermaid2PngError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(document, config))
}

/// List the diagram blocks of a document without writing anything.
///
/// Does not require the renderer.
pub async fn inspect(
    document: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<Vec<DiagramBlock>, Mermaid2PngError> {
    let (_, text) = load_document(document.as_ref(), config).await?;
    Ok(collect_blocks(&text, &config.language).0)
}

/// Write `diagram_<n>.<ext>` for every block, skipping rendering entirely.
///
/// Does not require the renderer.
pub async fn extract_only(
    document: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ExtractOutput, Mermaid2PngError> {
    let (path, text) = load_document(document.as_ref(), config).await?;
    let output_dir = output_dir_for(&path, config);
    let (blocks, skipped) = collect_blocks(&text, &config.language);

    ensure_output_dir(&output_dir).await;

    let mut written = Vec::with_capacity(blocks.len());
    let mut errors = Vec::new();
    for block in &blocks {
        match write_source(block, &output_dir, &config.source_extension).await {
            Ok(p) => written.push(p),
            Err(e) => {
                warn!("{}", e);
                errors.push(e);
            }
        }
    }

    info!(
        "Extracted {}/{} diagram source(s) to {}",
        written.len(),
        blocks.len(),
        output_dir.display()
    );

    Ok(ExtractOutput {
        output_dir,
        written,
        errors,
        skipped_blocks: skipped,
    })
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// A document that has been read and scanned, with at least one diagram.
struct Batch {
    blocks: Vec<DiagramBlock>,
    skipped: usize,
    output_dir: PathBuf,
    started: Instant,
}

enum Prepared {
    /// No diagrams: the output directory exists and the result is final.
    Empty(BatchResult),
    Batch(Batch),
}

/// Steps 1 and 2 shared by every converting entry point.
async fn prepare(
    document: &Path,
    config: &ConversionConfig,
) -> Result<Prepared, Mermaid2PngError> {
    let started = Instant::now();
    info!("Starting conversion: {}", document.display());

    // ── Step 1: Resolve and read the document ────────────────────────────
    let (path, text) = load_document(document, config).await?;
    let output_dir = output_dir_for(&path, config);

    // ── Step 2: Extract diagram blocks ───────────────────────────────────
    let (blocks, skipped) = collect_blocks(&text, &config.language);
    info!(
        "Found {} {} diagram(s){}",
        blocks.len(),
        config.language,
        if skipped > 0 {
            format!(", skipped {skipped} malformed/empty")
        } else {
            String::new()
        }
    );

    if blocks.is_empty() {
        ensure_output_dir(&output_dir).await;
        if let Some(ref cb) = config.progress_callback {
            cb.on_batch_start(0);
            cb.on_batch_complete(0, 0);
        }
        return Ok(Prepared::Empty(BatchResult::new(
            output_dir,
            Vec::new(),
            skipped,
            started.elapsed().as_millis() as u64,
        )));
    }

    Ok(Prepared::Batch(Batch {
        blocks,
        skipped,
        output_dir,
        started,
    }))
}

async fn load_document(
    document: &Path,
    config: &ConversionConfig,
) -> Result<(PathBuf, String), Mermaid2PngError> {
    let path = input::resolve_document(document, config.require_markdown_extension)?;
    let text = input::read_document(&path).await?;
    Ok((path, text))
}

fn output_dir_for(document: &Path, config: &ConversionConfig) -> PathBuf {
    config
        .output_dir
        .clone()
        .unwrap_or_else(|| input::default_output_dir(document))
}

fn collect_blocks(text: &str, language: &str) -> (Vec<DiagramBlock>, usize) {
    let mut blocks = extract::extract_blocks(text, language);
    let found: Vec<DiagramBlock> = blocks.by_ref().collect();
    (found, blocks.skipped().len())
}

/// Create the output directory up front.
///
/// A failure here is not fatal: each task retries the creation and records
/// its own `FileSystem` error.
async fn ensure_output_dir(dir: &Path) {
    if let Err(e) = tokio::fs::create_dir_all(dir).await {
        warn!("Cannot create output directory {}: {}", dir.display(), e);
    }
}

async fn run_batch(
    batch: Batch,
    renderer: &VerifiedRenderer,
    config: &ConversionConfig,
) -> BatchResult {
    let Batch {
        blocks,
        skipped,
        output_dir,
        started,
    } = batch;
    let total = blocks.len();
    ensure_output_dir(&output_dir).await;

    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_start(total);
    }

    // Completion events are reported as tasks leave the pipeline, which is
    // extraction order in both branches.
    let opts = RenderOptions::from_config(config);
    let tasks: Vec<ConversionTask> = if config.concurrency <= 1 {
        let mut tasks = Vec::with_capacity(total);
        for block in blocks {
            let task = run_task(block, &output_dir, renderer, &opts, config, total).await;
            report_task(&task, config, total);
            tasks.push(task);
        }
        tasks
    } else {
        // `buffered` (not `buffer_unordered`) keeps extraction order.
        stream::iter(
            blocks
                .into_iter()
                .map(|block| run_task(block, &output_dir, renderer, &opts, config, total)),
        )
        .buffered(config.concurrency)
        .inspect(|task| report_task(task, config, total))
        .collect()
        .await
    };

    let result = BatchResult::new(
        output_dir,
        tasks,
        skipped,
        started.elapsed().as_millis() as u64,
    );

    info!(
        "Conversion complete: {}/{} diagrams, {}ms total",
        result.succeeded(),
        result.total(),
        result.duration_ms()
    );

    if let Some(ref cb) = config.progress_callback {
        cb.on_batch_complete(result.total(), result.succeeded());
    }

    result
}

/// Materialise and render one block. Always returns a finished task.
async fn run_task(
    block: DiagramBlock,
    output_dir: &Path,
    renderer: &VerifiedRenderer,
    opts: &RenderOptions<'_>,
    config: &ConversionConfig,
    total: usize,
) -> ConversionTask {
    let start = Instant::now();
    let index = block.index();
    if let Some(ref cb) = config.progress_callback {
        cb.on_diagram_start(index, total);
    }

    let source_path = output_dir.join(materialize::source_file_name(
        index,
        &config.source_extension,
    ));
    let image_path = output_dir.join(materialize::image_file_name(index));
    let mut task = ConversionTask::new(block, source_path, image_path);

    let attempt = async {
        write_source(task.block(), output_dir, &config.source_extension).await?;
        render::render(renderer, index, task.source_path(), task.image_path(), opts).await
    };
    let outcome = AssertUnwindSafe(attempt)
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            Err(TaskError::Internal {
                index,
                detail: panic_message(panic.as_ref()),
            })
        });

    match outcome {
        Ok(rendered) => {
            task.dimensions = rendered.dimensions;
            task.succeed();
            debug!(
                "Diagram {}: rendered {} in {}ms",
                index,
                task.image_path().display(),
                rendered.elapsed_ms
            );
        }
        Err(e) => {
            warn!("{}", e);
            task.fail(e);
        }
    }
    task.duration_ms = start.elapsed().as_millis() as u64;
    task
}

fn report_task(task: &ConversionTask, config: &ConversionConfig, total: usize) {
    if let Some(ref cb) = config.progress_callback {
        match task.status() {
            TaskStatus::Success => cb.on_diagram_complete(task, total),
            _ => cb.on_diagram_error(task, total),
        }
    }
}

/// Run the blocking source write on the blocking pool.
async fn write_source(
    block: &DiagramBlock,
    dir: &Path,
    extension: &str,
) -> Result<PathBuf, TaskError> {
    let index = block.index();
    let (block, dir, extension) = (block.clone(), dir.to_path_buf(), extension.to_string());
    tokio::task::spawn_blocking(move || materialize::write_source(&block, &dir, &extension))
        .await
        .unwrap_or_else(|e| {
            Err(TaskError::Internal {
                index,
                detail: format!("source write task failed: {e}"),
            })
        })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}
