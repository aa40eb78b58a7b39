//! Media prober
//!
//! Probing is best-effort: a file the engine cannot read still yields a
//! descriptor with default shape and zero duration. Operations that cannot work
//! without a real duration check [`MediaDescriptor::require_duration`] themselves.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{CompositorError, CompositorResult};
use crate::executor::MediaEngine;

pub const DEFAULT_FRAME_RATE: f64 = 30.0;
pub const DEFAULT_WIDTH: u32 = 1920;
pub const DEFAULT_HEIGHT: u32 = 1080;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaDescriptor {
    pub path: PathBuf,
    /// 0 when unknown.
    pub duration_seconds: f64,
    pub has_audio: bool,
    pub frame_rate: f64,
    pub width: u32,
    pub height: u32,
}

impl MediaDescriptor {
    /// Descriptor used when the engine could not tell us anything.
    pub fn fallback(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            duration_seconds: 0.0,
            has_audio: false,
            frame_rate: DEFAULT_FRAME_RATE,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
        }
    }

    pub fn has_duration(&self) -> bool {
        self.duration_seconds.is_finite() && self.duration_seconds > 0.0
    }

    /// Fail with `PreconditionFailed` unless the probe produced a real duration.
    pub fn require_duration(&self, role: &str) -> CompositorResult<f64> {
        if self.has_duration() {
            Ok(self.duration_seconds)
        } else {
            Err(CompositorError::precondition(format!(
                "could not determine duration of {} ({})",
                role,
                self.path.display()
            )))
        }
    }
}

/// Frame rate as the engine reports it, e.g. `30000/1001`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rational {
    pub num: i64,
    pub den: i64,
}

impl Rational {
    pub fn parse(text: &str) -> Option<Self> {
        let (num, den) = text.trim().split_once('/')?;
        let num = num.trim().parse().ok()?;
        let den = den.trim().parse().ok()?;
        Some(Self { num, den })
    }

    /// `None` when either component is zero.
    pub fn value(&self) -> Option<f64> {
        if self.num == 0 || self.den == 0 {
            None
        } else {
            Some(self.num as f64 / self.den as f64)
        }
    }
}

/// Parse `num/den` (or a plain decimal), falling back to 30.
pub fn parse_frame_rate(text: &str) -> f64 {
    let parsed = match Rational::parse(text) {
        Some(rational) => rational.value(),
        None => text.trim().parse::<f64>().ok(),
    };

    match parsed {
        Some(fps) if fps.is_finite() && fps > 0.0 => fps,
        _ => DEFAULT_FRAME_RATE,
    }
}

/// Build a descriptor from `ffprobe -print_format json -show_format -show_streams`.
pub fn descriptor_from_probe(path: &Path, json: &Value) -> MediaDescriptor {
    let mut descriptor = MediaDescriptor::fallback(path);
    let streams = json["streams"].as_array().map(Vec::as_slice).unwrap_or(&[]);

    let video = streams
        .iter()
        .find(|s| s["codec_type"].as_str() == Some("video"));
    descriptor.has_audio = streams
        .iter()
        .any(|s| s["codec_type"].as_str() == Some("audio"));

    let format_duration = number_field(&json["format"]["duration"]);
    let stream_duration = video.and_then(|v| number_field(&v["duration"]));
    if let Some(duration) = format_duration.or(stream_duration) {
        if duration.is_finite() && duration > 0.0 {
            descriptor.duration_seconds = duration;
        }
    }

    if let Some(video) = video {
        if let Some(rate) = video["r_frame_rate"].as_str() {
            descriptor.frame_rate = parse_frame_rate(rate);
        }
        if let Some(width) = video["width"].as_u64().filter(|w| *w > 0) {
            descriptor.width = width as u32;
        }
        if let Some(height) = video["height"].as_u64().filter(|h| *h > 0) {
            descriptor.height = height as u32;
        }
    }

    descriptor
}

/// ffprobe emits numbers as strings; accept either.
fn number_field(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

#[derive(Clone)]
pub struct MediaProber {
    engine: Arc<dyn MediaEngine>,
}

impl MediaProber {
    pub fn new(engine: Arc<dyn MediaEngine>) -> Self {
        Self { engine }
    }

    /// Never fails; read errors degrade to [`MediaDescriptor::fallback`].
    pub async fn probe(&self, path: &Path) -> MediaDescriptor {
        match self.engine.probe_json(path).await {
            Ok(json) => {
                let descriptor = descriptor_from_probe(path, &json);
                debug!(
                    path = %path.display(),
                    duration = descriptor.duration_seconds,
                    has_audio = descriptor.has_audio,
                    fps = descriptor.frame_rate,
                    "Probed media"
                );
                descriptor
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Probe failed, using defaults");
                MediaDescriptor::fallback(path)
            }
        }
    }

    /// Probe every input concurrently; results keep input order.
    pub async fn probe_all(&self, paths: &[PathBuf]) -> Vec<MediaDescriptor> {
        join_all(paths.iter().map(|path| self.probe(path))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_rational_frame_rates() {
        assert!((parse_frame_rate("30000/1001") - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate("25/1"), 25.0);
        assert_eq!(parse_frame_rate("24"), 24.0);
    }

    #[test]
    fn degenerate_frame_rates_fall_back() {
        assert_eq!(parse_frame_rate("0/0"), 30.0);
        assert_eq!(parse_frame_rate("30/0"), 30.0);
        assert_eq!(parse_frame_rate("abc/1"), 30.0);
        assert_eq!(parse_frame_rate(""), 30.0);
    }

    #[test]
    fn reads_probe_json() {
        let probe = json!({
            "streams": [
                {"codec_type": "video", "width": 1280, "height": 720, "r_frame_rate": "24000/1001"},
                {"codec_type": "audio", "sample_rate": "48000"}
            ],
            "format": {"duration": "12.480000"}
        });
        let d = descriptor_from_probe(Path::new("a.mp4"), &probe);
        assert_eq!(d.duration_seconds, 12.48);
        assert!(d.has_audio);
        assert_eq!((d.width, d.height), (1280, 720));
        assert!((d.frame_rate - 23.976).abs() < 0.001);
    }

    #[test]
    fn missing_fields_keep_defaults() {
        let probe = json!({"streams": [{"codec_type": "audio"}], "format": {}});
        let d = descriptor_from_probe(Path::new("song.mp3"), &probe);
        assert_eq!(d.duration_seconds, 0.0);
        assert!(d.has_audio);
        assert_eq!((d.width, d.height), (1920, 1080));
        assert!(d.require_duration("audio track").is_err());
    }

    #[test]
    fn require_duration_reports_precondition() {
        let d = MediaDescriptor::fallback("x.mp4");
        assert!(matches!(
            d.require_duration("clip"),
            Err(CompositorError::PreconditionFailed(_))
        ));
    }
}
