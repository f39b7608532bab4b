//! Renderer invocation: run mermaid-cli once per diagram with a time budget.
//!
//! ## Process lifecycle
//!
//! Each call owns exactly one child process, wrapped in [`RenderProcess`].
//! The child is spawned with `kill_on_drop`, so every exit path (success,
//! failure, timeout, or the caller dropping the future) tears it down.
//! stdout/stderr are drained by background tasks while the child runs;
//! otherwise a chatty renderer would block on a full pipe and look like a
//! timeout.
//!
//! On timeout the child gets SIGTERM (unix), then `kill_grace` to exit, then
//! SIGKILL, then another `kill_grace` to be reaped. Whatever it printed
//! before hanging is kept as the timeout's diagnostic. Nothing here waits
//! without a bound.
//!
//! ## Why a preflight check?
//!
//! `npx` without Node.js, or a mistyped `--mmdc` path, would otherwise fail
//! identically for every diagram in the document. [`preflight`] asks the
//! runtime and the renderer for `--version` once, and the coordinator only
//! accepts the resulting [`VerifiedRenderer`].

use crate::config::{ConversionConfig, MermaidTheme};
use crate::error::{Mermaid2PngError, TaskError};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// npm package that provides the `mmdc` binary.
pub const MERMAID_CLI_PACKAGE: &str = "@mermaid-js/mermaid-cli";

/// Upper bound on diagnostic text kept per failed diagram.
const MAX_DIAGNOSTIC_CHARS: usize = 4000;

/// How to start the external renderer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RendererCommand {
    /// Executable to spawn (`npx`, `mmdc`, or an absolute path).
    pub program: PathBuf,
    /// Arguments placed before the per-diagram flags.
    pub prefix_args: Vec<String>,
    /// Runtime that must answer `--version` before the renderer is trusted.
    pub runtime: Option<PathBuf>,
}

impl Default for RendererCommand {
    fn default() -> Self {
        Self::npx()
    }
}

impl RendererCommand {
    /// `npx -p @mermaid-js/mermaid-cli mmdc`, gated on `node`.
    pub fn npx() -> Self {
        let program = if cfg!(windows) { "npx.cmd" } else { "npx" };
        Self {
            program: PathBuf::from(program),
            prefix_args: vec![
                "-p".to_string(),
                MERMAID_CLI_PACKAGE.to_string(),
                "mmdc".to_string(),
            ],
            runtime: Some(PathBuf::from("node")),
        }
    }

    /// Run `program` directly with no prefix arguments and no runtime check.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            prefix_args: Vec::new(),
            runtime: None,
        }
    }

    pub fn with_runtime(mut self, runtime: impl Into<PathBuf>) -> Self {
        self.runtime = Some(runtime.into());
        self
    }

    /// Human-readable command line, e.g. `npx -p @mermaid-js/mermaid-cli mmdc`.
    pub fn display_name(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.prefix_args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.prefix_args);
        cmd
    }
}

/// A renderer that answered the preflight check.
///
/// Computed once per run and never mutated; holding one is the proof that
/// invoking the renderer is worth attempting.
#[derive(Debug, Clone)]
pub struct VerifiedRenderer {
    command: RendererCommand,
    version: String,
    runtime_version: Option<String>,
}

impl VerifiedRenderer {
    pub fn command(&self) -> &RendererCommand {
        &self.command
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn runtime_version(&self) -> Option<&str> {
        self.runtime_version.as_deref()
    }
}

/// Per-invocation knobs, borrowed from [`ConversionConfig`].
#[derive(Debug, Clone)]
pub struct RenderOptions<'a> {
    pub theme: MermaidTheme,
    pub background: &'a str,
    pub extra_args: &'a [String],
    pub timeout: Duration,
    pub kill_grace: Duration,
}

impl<'a> RenderOptions<'a> {
    pub fn from_config(config: &'a ConversionConfig) -> Self {
        Self {
            theme: config.theme,
            background: &config.background,
            extra_args: &config.extra_args,
            timeout: Duration::from_secs(config.timeout_secs),
            kill_grace: Duration::from_millis(config.kill_grace_ms),
        }
    }
}

/// A successful render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rendered {
    /// PNG size in pixels, if the file could be decoded.
    pub dimensions: Option<(u32, u32)>,
    pub elapsed_ms: u64,
}

/// Verify that the runtime (if any) and the renderer respond to `--version`.
pub async fn preflight(
    command: &RendererCommand,
    probe_timeout: Duration,
) -> Result<VerifiedRenderer, Mermaid2PngError> {
    let runtime_version = match &command.runtime {
        Some(runtime) => Some(
            probe_version(Command::new(runtime), probe_timeout)
                .await
                .map_err(|detail| Mermaid2PngError::RendererUnavailable {
                    program: runtime.display().to_string(),
                    detail: format!("runtime check failed: {detail}"),
                })?,
        ),
        None => None,
    };

    let version = probe_version(command.command(), probe_timeout)
        .await
        .map_err(|detail| Mermaid2PngError::RendererUnavailable {
            program: command.display_name(),
            detail,
        })?;

    info!(
        "Renderer ready: {} ({}){}",
        command.display_name(),
        version,
        runtime_version
            .as_deref()
            .map(|v| format!(", runtime {v}"))
            .unwrap_or_default()
    );

    Ok(VerifiedRenderer {
        command: command.clone(),
        version,
        runtime_version,
    })
}

async fn probe_version(mut cmd: Command, probe_timeout: Duration) -> Result<String, String> {
    cmd.arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(|e| e.to_string())?;
    match timeout(probe_timeout, child.wait_with_output()).await {
        Err(_) => Err(format!(
            "no answer to --version within {}s",
            probe_timeout.as_secs()
        )),
        Ok(Err(e)) => Err(e.to_string()),
        Ok(Ok(out)) if out.status.success() => Ok(String::from_utf8_lossy(&out.stdout)
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("unknown")
            .to_string()),
        Ok(Ok(out)) => Err(format!(
            "--version exited with {}: {}",
            out.status,
            diagnostic(&out.stderr, &out.stdout)
        )),
    }
}

/// Render `source` into `image`.
///
/// Never leaves an image behind unless the result is `Ok`.
pub async fn render(
    renderer: &VerifiedRenderer,
    index: usize,
    source: &Path,
    image: &Path,
    opts: &RenderOptions<'_>,
) -> Result<Rendered, TaskError> {
    let start = Instant::now();

    match tokio::fs::remove_file(image).await {
        Ok(()) => debug!("Removed stale image {}", image.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            return Err(TaskError::FileSystem {
                index,
                path: image.to_path_buf(),
                detail: e.to_string(),
            })
        }
    }

    let mut cmd = renderer.command.command();
    cmd.arg("-i")
        .arg(source)
        .arg("-o")
        .arg(image)
        .arg("-t")
        .arg(opts.theme.as_str())
        .arg("-b")
        .arg(opts.background)
        .args(opts.extra_args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("Diagram {}: spawning {:?}", index, cmd.as_std());
    let mut process = RenderProcess::spawn(cmd).map_err(|e| TaskError::SpawnFailed {
        index,
        detail: e.to_string(),
    })?;

    let status = match timeout(opts.timeout, process.child.wait()).await {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => {
            discard(image).await;
            return Err(TaskError::RenderFailed {
                index,
                exit_code: None,
                diagnostic: format!("failed to wait for renderer: {e}"),
            });
        }
        Err(_) => {
            warn!(
                "Diagram {}: renderer exceeded {}s, terminating",
                index,
                opts.timeout.as_secs()
            );
            process.terminate(opts.kill_grace).await;
            let (stdout, stderr) = process.collect_output(opts.kill_grace).await;
            discard(image).await;
            return Err(TaskError::Timeout {
                index,
                secs: opts.timeout.as_secs(),
                diagnostic: diagnostic(&stderr, &stdout),
            });
        }
    };

    let (stdout, stderr) = process.collect_output(opts.kill_grace).await;

    if !status.success() {
        discard(image).await;
        return Err(TaskError::RenderFailed {
            index,
            exit_code: status.code(),
            diagnostic: diagnostic(&stderr, &stdout),
        });
    }

    match tokio::fs::metadata(image).await {
        Ok(meta) if meta.len() > 0 => {}
        _ => {
            discard(image).await;
            return Err(TaskError::EmptyOutput {
                index,
                path: image.to_path_buf(),
            });
        }
    }

    let png = image.to_path_buf();
    let dimensions = match tokio::task::spawn_blocking(move || image::image_dimensions(png)).await
    {
        Ok(Ok(dims)) => Some(dims),
        Ok(Err(e)) => {
            debug!("Diagram {}: could not read PNG header: {}", index, e);
            None
        }
        Err(e) => {
            debug!("Diagram {}: PNG header task failed: {}", index, e);
            None
        }
    };

    Ok(Rendered {
        dimensions,
        elapsed_ms: start.elapsed().as_millis() as u64,
    })
}

/// A running renderer plus the tasks draining its output pipes.
struct RenderProcess {
    child: Child,
    stdout: Option<JoinHandle<Vec<u8>>>,
    stderr: Option<JoinHandle<Vec<u8>>>,
}

impl RenderProcess {
    fn spawn(mut cmd: Command) -> std::io::Result<Self> {
        let mut child = cmd.spawn()?;
        let stdout = child.stdout.take().map(|s| tokio::spawn(read_all(s)));
        let stderr = child.stderr.take().map(|s| tokio::spawn(read_all(s)));
        Ok(Self {
            child,
            stdout,
            stderr,
        })
    }

    /// SIGTERM, wait `grace`, SIGKILL, wait `grace`.
    async fn terminate(&mut self, grace: Duration) {
        let pid = self.child.id();

        #[cfg(unix)]
        if let Some(pid) = pid {
            // SAFETY: `pid` is our own child and has not been reaped yet
            // (`Child::id` returns None after that), so it cannot have been
            // recycled for another process.
            let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            if rc == 0 && timeout(grace, self.child.wait()).await.is_ok() {
                return;
            }
        }

        if let Err(e) = self.child.start_kill() {
            warn!("Failed to kill renderer process {:?}: {}", pid, e);
        }
        if timeout(grace, self.child.wait()).await.is_err() {
            warn!(
                "Renderer process {:?} did not exit within {}ms of SIGKILL",
                pid,
                grace.as_millis()
            );
        }
    }

    /// Collect captured output once the child has exited.
    ///
    /// Grandchildren (npx → node → chromium) can hold the pipes open after
    /// the direct child exits, so each reader gets at most `grace`.
    async fn collect_output(&mut self, grace: Duration) -> (Vec<u8>, Vec<u8>) {
        let stdout = join_reader(self.stdout.take(), grace).await;
        let stderr = join_reader(self.stderr.take(), grace).await;
        (stdout, stderr)
    }
}

impl Drop for RenderProcess {
    fn drop(&mut self) {
        for handle in [self.stdout.take(), self.stderr.take()].into_iter().flatten() {
            handle.abort();
        }
    }
}

async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Err(e) = reader.read_to_end(&mut buf).await {
        debug!("Renderer output pipe closed with error: {}", e);
    }
    buf
}

async fn join_reader(handle: Option<JoinHandle<Vec<u8>>>, grace: Duration) -> Vec<u8> {
    let Some(mut handle) = handle else {
        return Vec::new();
    };
    match timeout(grace, &mut handle).await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => {
            debug!("Output reader task failed: {}", e);
            Vec::new()
        }
        Err(_) => {
            handle.abort();
            Vec::new()
        }
    }
}

/// Prefer stderr, fall back to stdout; trimmed and length-capped.
fn diagnostic(stderr: &[u8], stdout: &[u8]) -> String {
    let stderr = String::from_utf8_lossy(stderr);
    let text = if stderr.trim().is_empty() {
        String::from_utf8_lossy(stdout)
    } else {
        stderr
    };
    let text = text.trim();
    if text.chars().count() > MAX_DIAGNOSTIC_CHARS {
        let cut: String = text.chars().take(MAX_DIAGNOSTIC_CHARS).collect();
        format!("{cut}\u{2026}")
    } else {
        text.to_string()
    }
}

async fn discard(image: &Path) {
    match tokio::fs::remove_file(image).await {
        Ok(()) => debug!("Removed partial image {}", image.display()),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove partial image {}: {}", image.display(), e),
    }
}
