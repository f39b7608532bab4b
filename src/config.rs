//! Configuration types for Markdown-to-PNG diagram conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. Keeping every knob in one struct makes
//! it trivial to share a config between runs and to log exactly what a run
//! was asked to do.

use crate::error::Mermaid2PngError;
use crate::pipeline::render::RendererCommand;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Configuration for one document conversion.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use mermaid2png::{ConversionConfig, MermaidTheme, RendererCommand};
///
/// let config = ConversionConfig::builder()
///     .renderer(RendererCommand::new("mmdc"))
///     .theme(MermaidTheme::Forest)
///     .timeout_secs(30)
///     .build()
///     .unwrap();
/// assert_eq!(config.timeout_secs, 30);
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Info-string tag that marks a fenced block as a diagram. Default: `mermaid`.
    ///
    /// Matched exactly and case-sensitively against the first word of the
    /// fence's info string.
    pub language: String,

    /// Extension of the materialised source files. Default: `mmd`.
    pub source_extension: String,

    /// Where to write `diagram_<n>.*`. Default: `<document-stem>_diagrams`
    /// next to the document.
    pub output_dir: Option<PathBuf>,

    /// How to invoke the external renderer. Default: mermaid-cli through npx.
    pub renderer: RendererCommand,

    /// mermaid-cli theme (`-t`). Default: [`MermaidTheme::Default`].
    pub theme: MermaidTheme,

    /// Background colour (`-b`). Default: `transparent`.
    pub background: String,

    /// Extra arguments appended after the standard renderer flags.
    pub extra_args: Vec<String>,

    /// Per-diagram renderer timeout in seconds. Default: 120.
    ///
    /// mermaid-cli starts a headless browser on every call, so the first
    /// diagram on a cold npx cache can take a long time.
    pub timeout_secs: u64,

    /// Time allowed for a timed-out renderer to exit after SIGTERM before it
    /// is force-killed, in milliseconds. Default: 2000.
    pub kill_grace_ms: u64,

    /// Timeout for each `--version` probe in the preflight check. Default: 60.
    pub preflight_timeout_secs: u64,

    /// Number of renderer processes allowed to run at once. Default: 1.
    ///
    /// Results are always reported in extraction order regardless.
    pub concurrency: usize,

    /// Reject documents without a `.md`/`.markdown` extension. Default: true.
    pub require_markdown_extension: bool,

    /// Optional per-diagram progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            language: "mermaid".to_string(),
            source_extension: "mmd".to_string(),
            output_dir: None,
            renderer: RendererCommand::default(),
            theme: MermaidTheme::default(),
            background: "transparent".to_string(),
            extra_args: Vec::new(),
            timeout_secs: 120,
            kill_grace_ms: 2000,
            preflight_timeout_secs: 60,
            concurrency: 1,
            require_markdown_extension: true,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("language", &self.language)
            .field("source_extension", &self.source_extension)
            .field("output_dir", &self.output_dir)
            .field("renderer", &self.renderer)
            .field("theme", &self.theme)
            .field("background", &self.background)
            .field("extra_args", &self.extra_args)
            .field("timeout_secs", &self.timeout_secs)
            .field("kill_grace_ms", &self.kill_grace_ms)
            .field("concurrency", &self.concurrency)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ConversionProgressCallback>"),
            )
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn language(mut self, tag: impl Into<String>) -> Self {
        self.config.language = tag.into();
        self
    }

    pub fn source_extension(mut self, ext: impl Into<String>) -> Self {
        self.config.source_extension = ext.into().trim_start_matches('.').to_string();
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = Some(dir.into());
        self
    }

    pub fn renderer(mut self, renderer: RendererCommand) -> Self {
        self.config.renderer = renderer;
        self
    }

    pub fn theme(mut self, theme: MermaidTheme) -> Self {
        self.config.theme = theme;
        self
    }

    pub fn background(mut self, bg: impl Into<String>) -> Self {
        self.config.background = bg.into();
        self
    }

    pub fn extra_args(mut self, args: Vec<String>) -> Self {
        self.config.extra_args = args;
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.timeout_secs = secs;
        self
    }

    pub fn kill_grace_ms(mut self, ms: u64) -> Self {
        self.config.kill_grace_ms = ms;
        self
    }

    pub fn preflight_timeout_secs(mut self, secs: u64) -> Self {
        self.config.preflight_timeout_secs = secs;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn require_markdown_extension(mut self, v: bool) -> Self {
        self.config.require_markdown_extension = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, Mermaid2PngError> {
        let c = &self.config;
        if c.language.trim().is_empty() || c.language.chars().any(char::is_whitespace) {
            return Err(Mermaid2PngError::InvalidConfig(format!(
                "Diagram language tag must be a single non-empty word, got {:?}",
                c.language
            )));
        }
        if c.source_extension.is_empty() || c.source_extension == "png" {
            return Err(Mermaid2PngError::InvalidConfig(format!(
                "Source extension must be non-empty and differ from 'png', got {:?}",
                c.source_extension
            )));
        }
        if c.timeout_secs == 0 {
            return Err(Mermaid2PngError::InvalidConfig(
                "Renderer timeout must be ≥ 1 second".into(),
            ));
        }
        if c.renderer.program.as_os_str().is_empty() {
            return Err(Mermaid2PngError::InvalidConfig(
                "Renderer program must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Built-in mermaid-cli themes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MermaidTheme {
    /// Dark text on a light background (default).
    #[default]
    Default,
    /// Light text on a dark background.
    Dark,
    /// Green tones.
    Forest,
    /// Grayscale; works well with transparent backgrounds.
    Neutral,
}

impl MermaidTheme {
    /// The value passed to mermaid-cli's `-t` flag.
    pub fn as_str(&self) -> &'static str {
        match self {
            MermaidTheme::Default => "default",
            MermaidTheme::Dark => "dark",
            MermaidTheme::Forest => "forest",
            MermaidTheme::Neutral => "neutral",
        }
    }
}

impl fmt::Display for MermaidTheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
