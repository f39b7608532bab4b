//! CLI binary for mermaid2png.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ConversionConfig` and prints the per-diagram report.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use mermaid2png::{
    convert, extract_only, inspect, BatchResult, ConversionConfig, ConversionProgressCallback,
    ConversionTask, MermaidTheme, ProgressCallback, RendererCommand, TaskError,
};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI report callback using indicatif ──────────────────────────────────────

/// Prints one status line per diagram, in extraction order. When the
/// progress bar is active the lines go through it so they stay above the
/// bar; otherwise to stdout.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new(show_bar: bool) -> Arc<Self> {
        let bar = if show_bar {
            let bar = ProgressBar::new(0);
            let style = ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>3}/{len} diagrams  ⏱ {elapsed_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
            bar.set_style(style);
            bar.set_prefix("Rendering");
            bar
        } else {
            ProgressBar::hidden()
        };
        Arc::new(Self { bar })
    }

    fn line(&self, s: String) {
        if self.bar.is_hidden() {
            println!("{s}");
        } else {
            self.bar.println(s);
        }
    }
}

fn file_name(p: &Path) -> String {
    p.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| p.display().to_string())
}

/// Keep failure lines on one terminal row.
fn short_error(err: &TaskError) -> String {
    let msg = err.to_string();
    let first = msg.lines().next().unwrap_or("");
    if first.chars().count() > 100 {
        let cut: String = first.chars().take(99).collect();
        format!("{cut}\u{2026}")
    } else {
        first.to_string()
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total: usize) {
        if total == 0 {
            return;
        }
        self.bar.set_length(total as u64);
        self.bar.enable_steady_tick(Duration::from_millis(80));
        self.line(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Found {total} mermaid diagram(s)"))
        ));
    }

    fn on_diagram_start(&self, index: usize, _total: usize) {
        self.bar.set_message(format!("diagram {index}"));
    }

    fn on_diagram_complete(&self, task: &ConversionTask, total: usize) {
        let dims = task
            .dimensions
            .map(|(w, h)| format!("{w}×{h}"))
            .unwrap_or_default();
        self.line(format!(
            "  {} Diagram {:>3}/{:<3}  {} → {}  {:<10} {}",
            green("✓"),
            task.index(),
            total,
            file_name(task.source_path()),
            task.image_path().display(),
            dim(&dims),
            dim(&format!("{:.1}s", task.duration_ms as f64 / 1000.0)),
        ));
        self.bar.inc(1);
    }

    fn on_diagram_error(&self, task: &ConversionTask, total: usize) {
        let msg = task.error().map(short_error).unwrap_or_default();
        self.line(format!(
            "  {} Diagram {:>3}/{:<3}  {}  {}  {}",
            red("✗"),
            task.index(),
            total,
            task.source_path().display(),
            red(&msg),
            dim(&format!("{:.1}s", task.duration_ms as f64 / 1000.0)),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, _total: usize, _succeeded: usize) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Render every ```mermaid block of a document (writes guide_diagrams/)
  mermaid2png guide.md

  # Use a globally installed mermaid-cli instead of npx
  mermaid2png --mmdc mmdc guide.md

  # Dark theme on white, custom output directory
  mermaid2png --theme dark --background white -o images/ guide.md

  # Only write diagram_N.mmd sources (no Node.js needed)
  mermaid2png --extract-only guide.md

  # List diagrams and their line numbers
  mermaid2png --list guide.md

  # Pass extra flags through to mmdc
  mermaid2png --renderer-arg=--scale --renderer-arg=2 guide.md

OUTPUT LAYOUT:
  <stem>_diagrams/diagram_<N>.mmd   extracted source (always written)
  <stem>_diagrams/diagram_<N>.png   rendered image (only on success)

EXIT STATUS:
  0  every diagram converted (also when the document has none)
  1  at least one diagram failed, or a fatal error occurred
  2  invalid command line

ENVIRONMENT VARIABLES:
  MERMAID2PNG_MMDC        Path to an mmdc binary (skips npx)
  MERMAID2PNG_OUTPUT_DIR  Output directory
  MERMAID2PNG_TIMEOUT     Per-diagram timeout in seconds
  RUST_LOG                Override log filter (e.g. mermaid2png=debug)

SETUP:
  Node.js must be installed. By default each render runs
  `npx -p @mermaid-js/mermaid-cli mmdc`, which downloads mermaid-cli on
  first use. For faster runs: npm install -g @mermaid-js/mermaid-cli
  and pass --mmdc mmdc.
"#;

/// Render the Mermaid diagrams of a Markdown file to PNG.
#[derive(Parser, Debug)]
#[command(
    name = "mermaid2png",
    version,
    about = "Render the Mermaid diagrams of a Markdown file to PNG",
    long_about = "Extract every ```mermaid block from a Markdown document, write each to \
diagram_<N>.mmd and render it to diagram_<N>.png with mermaid-cli.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Markdown file to process.
    input: PathBuf,

    /// Output directory (default: <stem>_diagrams next to the input).
    #[arg(short, long, env = "MERMAID2PNG_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Run this mmdc binary directly instead of `npx -p @mermaid-js/mermaid-cli mmdc`.
    #[arg(long, env = "MERMAID2PNG_MMDC")]
    mmdc: Option<PathBuf>,

    /// mermaid-cli theme.
    #[arg(short, long, env = "MERMAID2PNG_THEME", value_enum, default_value = "default")]
    theme: ThemeArg,

    /// Background colour (e.g. transparent, white, '#F0F0F0').
    #[arg(short, long, env = "MERMAID2PNG_BACKGROUND", default_value = "transparent")]
    background: String,

    /// Per-diagram renderer timeout in seconds.
    #[arg(long, env = "MERMAID2PNG_TIMEOUT", default_value_t = 120,
          value_parser = clap::value_parser!(u64).range(1..))]
    timeout: u64,

    /// Number of renderer processes to run at once.
    #[arg(short, long, env = "MERMAID2PNG_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// Extra argument passed to the renderer (repeatable).
    #[arg(long = "renderer-arg", value_name = "ARG", allow_hyphen_values = true)]
    renderer_args: Vec<String>,

    /// Fence tag that marks a diagram block.
    #[arg(long, default_value = "mermaid")]
    language: String,

    /// Extension for the extracted source files.
    #[arg(long, default_value = "mmd")]
    extension: String,

    /// Accept inputs without a .md/.markdown extension.
    #[arg(long)]
    any_extension: bool,

    /// Write diagram sources only; do not render.
    #[arg(long, conflicts_with = "list")]
    extract_only: bool,

    /// List the diagrams found, write nothing.
    #[arg(long)]
    list: bool,

    /// Print the result as JSON instead of the text report.
    #[arg(long, env = "MERMAID2PNG_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "MERMAID2PNG_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "MERMAID2PNG_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "MERMAID2PNG_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum ThemeArg {
    Default,
    Dark,
    Forest,
    Neutral,
}

impl From<ThemeArg> for MermaidTheme {
    fn from(v: ThemeArg) -> Self {
        match v {
            ThemeArg::Default => MermaidTheme::Default,
            ThemeArg::Dark => MermaidTheme::Dark,
            ThemeArg::Forest => MermaidTheme::Forest,
            ThemeArg::Neutral => MermaidTheme::Neutral,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The report lines carry everything the user needs; library logs stay
    // at error level unless asked for.
    let show_report = !cli.quiet && !cli.json;
    let show_progress = show_report && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "warn"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── List mode ────────────────────────────────────────────────────────
    if cli.list {
        let config = build_config(&cli, None)?;
        let blocks = inspect(&cli.input, &config)
            .await
            .context("Failed to read document")?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&blocks).context("Failed to serialise blocks")?
            );
        } else {
            for b in &blocks {
                let lines = b
                    .source_lines()
                    .map(|r| format!("lines {}-{}", r.start(), r.end()))
                    .unwrap_or_default();
                let first = b.raw_text().lines().next().unwrap_or("");
                println!("{:>3}  {:<14} {}", b.index(), lines, first);
            }
            println!("{} diagram(s)", blocks.len());
        }
        return Ok(ExitCode::SUCCESS);
    }

    // ── Extract-only mode ────────────────────────────────────────────────
    if cli.extract_only {
        let config = build_config(&cli, None)?;
        let out = extract_only(&cli.input, &config)
            .await
            .context("Extraction failed")?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&out).context("Failed to serialise output")?
            );
        } else if !cli.quiet {
            for p in &out.written {
                println!("  {} {}", green("✓"), p.display());
            }
            for e in &out.errors {
                println!("  {} {}", red("✗"), e);
            }
            println!(
                "\nExtraction complete: {}/{} diagram sources written",
                out.written.len(),
                out.written.len() + out.errors.len()
            );
            println!("Diagrams saved in: {}/", out.output_dir.display());
        }
        return Ok(if out.errors.is_empty() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        });
    }

    // ── Build config ─────────────────────────────────────────────────────
    let reporter: Option<ProgressCallback> = if show_report {
        Some(CliProgressCallback::new(show_progress) as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, reporter)?;

    if show_report {
        println!("Processing: {}", cli.input.display());
    }

    // ── Run conversion ───────────────────────────────────────────────────
    let result = convert(&cli.input, &config)
        .await
        .context("Conversion failed")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("Failed to serialise result")?
        );
    } else if show_report {
        print_summary(&result);
    }

    Ok(if result.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_summary(result: &BatchResult) {
    if result.total() == 0 {
        println!("No mermaid diagrams found in the file.");
    }
    if result.skipped_blocks() > 0 {
        println!(
            "{} {} malformed or empty block(s) skipped",
            cyan("⚠"),
            result.skipped_blocks()
        );
    }
    let mark = if result.is_success() {
        green("✔")
    } else if result.succeeded() == 0 {
        red("✘")
    } else {
        cyan("⚠")
    };
    println!("\n{} {}", mark, result.summary_line());
    println!(
        "Diagrams saved in: {}/  {}",
        result.output_dir().display(),
        dim(&format!("({}ms)", result.duration_ms()))
    );
}

/// Map CLI args to `ConversionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ConversionConfig> {
    let renderer = match cli.mmdc {
        Some(ref path) => RendererCommand::new(path),
        None => RendererCommand::npx(),
    };

    let mut builder = ConversionConfig::builder()
        .renderer(renderer)
        .theme(cli.theme.clone().into())
        .background(cli.background.clone())
        .extra_args(cli.renderer_args.clone())
        .timeout_secs(cli.timeout)
        .concurrency(cli.concurrency)
        .language(cli.language.clone())
        .source_extension(cli.extension.clone())
        .require_markdown_extension(!cli.any_extension);

    if let Some(ref dir) = cli.output_dir {
        builder = builder.output_dir(dir);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
