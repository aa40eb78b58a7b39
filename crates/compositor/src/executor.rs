//! Process executor
//!
//! [`MediaEngine`] is the seam between graph assembly and the external
//! process. [`FfmpegEngine`] runs one `ffmpeg` child per render, keeps stderr
//! verbatim for diagnostics and feeds parsed status lines to an optional
//! progress channel without ever waiting on it.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn, Instrument};

use crate::config::EngineConfig;
use crate::error::{CompositorError, CompositorResult};
use crate::job::RenderJob;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderProgress {
    /// 0-100; `None` when the job has no expected duration.
    pub percent: Option<f64>,
    /// Output position as the engine prints it, e.g. `00:00:05.00`.
    pub timemark: String,
    pub elapsed_seconds: f64,
    pub frame: Option<u64>,
    pub speed: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RenderOutput {
    pub stdout: String,
    pub stderr: String,
}

#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Raw `ffprobe`-style JSON for one file.
    async fn probe_json(&self, path: &Path) -> CompositorResult<Value>;

    /// Run one render to completion. Exactly one process per call.
    async fn render(
        &self,
        job: &RenderJob,
        progress: Option<mpsc::Sender<RenderProgress>>,
    ) -> CompositorResult<RenderOutput>;
}

// ============ FFMPEG ============

pub struct FfmpegEngine {
    ffmpeg_path: PathBuf,
    ffprobe_path: PathBuf,
}

impl FfmpegEngine {
    pub fn new(config: &EngineConfig) -> CompositorResult<Self> {
        let ffmpeg_path = match &config.ffmpeg_path {
            Some(path) => path.clone(),
            None => find_executable("ffmpeg")?,
        };
        let ffprobe_path = match &config.ffprobe_path {
            Some(path) => path.clone(),
            None => find_executable("ffprobe")?,
        };

        debug!(
            ffmpeg = %ffmpeg_path.display(),
            ffprobe = %ffprobe_path.display(),
            "Resolved media engine"
        );
        Ok(Self {
            ffmpeg_path,
            ffprobe_path,
        })
    }

    pub fn ffmpeg_path(&self) -> &Path {
        &self.ffmpeg_path
    }
}

/// `PATH` first, then the usual install prefixes.
pub fn find_executable(name: &str) -> CompositorResult<PathBuf> {
    if let Ok(path) = which::which(name) {
        return Ok(path);
    }

    let mut candidates = Vec::new();
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join("bin").join(name));
        candidates.push(home.join(".local").join("bin").join(name));
    }
    candidates.push(PathBuf::from("/usr/local/bin").join(name));
    candidates.push(PathBuf::from("/opt/homebrew/bin").join(name));
    candidates.push(PathBuf::from("/usr/bin").join(name));

    candidates
        .into_iter()
        .find(|p| p.exists())
        .ok_or_else(|| CompositorError::EngineNotFound(format!("{} not found in PATH", name)))
}

#[async_trait]
impl MediaEngine for FfmpegEngine {
    async fn probe_json(&self, path: &Path) -> CompositorResult<Value> {
        if !path.exists() {
            return Err(CompositorError::FileNotFound(path.to_path_buf()));
        }

        let output = Command::new(&self.ffprobe_path)
            .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path)
            .output()
            .await?;

        if !output.status.success() {
            return Err(CompositorError::Process {
                message: format!("ffprobe failed on {}", path.display()),
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        serde_json::from_slice(&output.stdout).map_err(|e| CompositorError::Process {
            message: format!("unreadable ffprobe output: {}", e),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn render(
        &self,
        job: &RenderJob,
        progress: Option<mpsc::Sender<RenderProgress>>,
    ) -> CompositorResult<RenderOutput> {
        let args = job.to_args();
        info!(
            operation = %job.operation,
            inputs = job.inputs.len(),
            output = %job.output_path.display(),
            "Spawning ffmpeg"
        );
        debug!(filter_complex = %job.graph, "Filter graph");
        debug!(args = ?args, "ffmpeg arguments");

        let mut child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout_task = child
            .stdout
            .take()
            .map(|stdout| tokio::spawn(collect_stdout(stdout).in_current_span()));

        // stderr is drained here so the child never blocks on a full pipe.
        let stderr = match child.stderr.take() {
            Some(stderr) => {
                let started = Instant::now();
                collect_stderr(stderr, job.expected_duration, progress.as_ref(), started).await
            }
            None => String::new(),
        };

        let status = child.wait().await?;
        let stdout = match stdout_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if status.success() {
            info!(
                operation = %job.operation,
                output = %job.output_path.display(),
                "Render finished"
            );
            Ok(RenderOutput { stdout, stderr })
        } else {
            warn!(operation = %job.operation, exit_code = ?status.code(), "Render failed");
            Err(CompositorError::Process {
                message: match status.code() {
                    Some(code) => format!("ffmpeg exited with code {}", code),
                    None => "ffmpeg was terminated by a signal".to_string(),
                },
                exit_code: status.code(),
                stdout,
                stderr,
            })
        }
    }
}

/// Read stdout to the end. A failed read keeps whatever arrived before it.
async fn collect_stdout<R>(mut reader: R) -> String
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Err(e) = reader.read_to_end(&mut buf).await {
        warn!(error = %e, captured = buf.len(), "Failed to read ffmpeg stdout");
    }
    String::from_utf8_lossy(&buf).to_string()
}

/// Read stderr to the end, emitting progress for every status line.
/// Status lines are `\r`-terminated, log lines `\n`-terminated.
async fn collect_stderr<R>(
    mut reader: R,
    expected_duration: Option<f64>,
    progress: Option<&mpsc::Sender<RenderProgress>>,
    started: Instant,
) -> String
where
    R: AsyncRead + Unpin,
{
    let mut captured = Vec::new();
    let mut line = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let read = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, captured = captured.len(), "Failed to read ffmpeg stderr");
                break;
            }
        };
        captured.extend_from_slice(&chunk[..read]);

        for &byte in &chunk[..read] {
            if byte == b'\r' || byte == b'\n' {
                emit_progress(&line, expected_duration, progress, started);
                line.clear();
            } else {
                line.push(byte);
            }
        }
    }
    emit_progress(&line, expected_duration, progress, started);

    String::from_utf8_lossy(&captured).to_string()
}

fn emit_progress(
    line: &[u8],
    expected_duration: Option<f64>,
    progress: Option<&mpsc::Sender<RenderProgress>>,
    started: Instant,
) {
    let Some(tx) = progress else {
        return;
    };
    let text = String::from_utf8_lossy(line);
    let elapsed = started.elapsed().as_secs_f64();
    if let Some(update) = parse_progress(&text, expected_duration, elapsed) {
        // A slow observer loses updates; it never stalls the render.
        let _ = tx.try_send(update);
    }
}

/// Parse one `frame=… time=… speed=…` status line.
pub fn parse_progress(
    line: &str,
    expected_duration: Option<f64>,
    elapsed_seconds: f64,
) -> Option<RenderProgress> {
    let timemark = extract_value(line, "time=")?;
    let position = parse_timemark(&timemark)?;

    let percent = expected_duration
        .filter(|total| *total > 0.0)
        .map(|total| (position / total * 100.0).clamp(0.0, 100.0));

    Some(RenderProgress {
        percent,
        timemark,
        elapsed_seconds,
        frame: extract_value(line, "frame=").and_then(|v| v.parse().ok()),
        speed: extract_value(line, "speed="),
    })
}

fn extract_value(line: &str, key: &str) -> Option<String> {
    let start = line.find(key)? + key.len();
    let rest = line[start..].trim_start();
    let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
    let value = &rest[..end];
    if value.is_empty() || value == "N/A" {
        None
    } else {
        Some(value.to_string())
    }
}

/// `HH:MM:SS.ss` to seconds.
pub fn parse_timemark(text: &str) -> Option<f64> {
    let mut parts = text.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}
