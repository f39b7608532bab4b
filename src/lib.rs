//! # mermaid2png
//!
//! Extract Mermaid diagrams from a Markdown document and render each one to
//! PNG with [mermaid-cli](https://github.com/mermaid-js/mermaid-cli).
//!
//! This crate does not render diagrams itself. It finds the fenced
//! ` ```mermaid ` blocks, writes each to its own source file, runs the
//! external renderer once per file under a timeout, and reports which
//! diagrams made it.
//!
//! ## Pipeline Overview
//!
//! ```text
//! guide.md
//!  │
//!  ├─ 1. Input       validate path, decode text (UTF-8, Latin-1 fallback)
//!  ├─ 2. Extract     state-machine scan for ```mermaid fences
//!  ├─ 3. Preflight   `node --version`, `mmdc --version` (once per run)
//!  ├─ 4. Materialize guide_diagrams/diagram_N.mmd
//!  ├─ 5. Render      mmdc -i diagram_N.mmd -o diagram_N.png (timeout, kill)
//!  └─ 6. Report      BatchResult: per-diagram status + X/Y summary
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mermaid2png::{convert, ConversionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConversionConfig::default();
//!     let result = convert("guide.md", &config).await?;
//!     println!("{}", result.summary_line());
//!     for task in result.tasks() {
//!         if let Some(err) = task.error() {
//!             eprintln!("{err}");
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `mermaid2png` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! mermaid2png = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ConversionConfig, ConversionConfigBuilder, MermaidTheme};
pub use convert::{convert, convert_sync, convert_with_renderer, extract_only, inspect};
pub use error::{Mermaid2PngError, TaskError};
pub use output::{BatchResult, ConversionTask, DiagramBlock, ExtractOutput, TaskStatus};
pub use pipeline::extract::{extract_blocks, SkipReason, SkippedBlock};
pub use pipeline::render::{preflight, RendererCommand, VerifiedRenderer};
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
