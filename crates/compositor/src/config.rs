//! Configuration for the compositor
//!
//! Loaded from `~/.compositor/config.toml` (or an explicit path), then
//! overridden by `COMPOSITOR_*` environment variables.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CompositorError, CompositorResult};
use crate::job::{AudioCodec, OutputOptions, VideoCodec};

pub const ENV_FFMPEG: &str = "COMPOSITOR_FFMPEG";
pub const ENV_FFPROBE: &str = "COMPOSITOR_FFPROBE";
pub const ENV_OUTPUT_DIR: &str = "COMPOSITOR_OUTPUT_DIR";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositorConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default)]
    pub canvas: CanvasConfig,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub encoding: EncodingConfig,
}

fn default_output_dir() -> PathBuf {
    std::env::temp_dir().join("compositor")
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            output_dir: default_output_dir(),
            canvas: CanvasConfig::default(),
            audio: AudioConfig::default(),
            encoding: EncodingConfig::default(),
        }
    }
}

/// Explicit engine binaries; unset means discover on `PATH`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    #[serde(default)]
    pub ffprobe_path: Option<PathBuf>,
}

/// Delivery canvas every video input is normalized to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanvasConfig {
    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    #[serde(default = "default_fps")]
    pub fps: u32,

    #[serde(default = "default_pix_fmt")]
    pub pix_fmt: String,
}

fn default_width() -> u32 {
    1920
}

fn default_height() -> u32 {
    1080
}

fn default_fps() -> u32 {
    30
}

fn default_pix_fmt() -> String {
    "yuv420p".to_string()
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            pix_fmt: default_pix_fmt(),
        }
    }
}

impl CanvasConfig {
    pub fn frame_seconds(&self) -> f64 {
        1.0 / self.fps.max(1) as f64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    #[serde(default = "default_channel_layout")]
    pub channel_layout: String,

    #[serde(default = "default_sample_fmt")]
    pub sample_fmt: String,
}

fn default_sample_rate() -> u32 {
    44100
}

fn default_channel_layout() -> String {
    "stereo".to_string()
}

fn default_sample_fmt() -> String {
    "fltp".to_string()
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            channel_layout: default_channel_layout(),
            sample_fmt: default_sample_fmt(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodingConfig {
    #[serde(default = "default_video_codec")]
    pub video_codec: VideoCodec,

    #[serde(default = "default_crf")]
    pub crf: u8,

    #[serde(default = "default_preset")]
    pub preset: String,

    #[serde(default = "default_audio_codec")]
    pub audio_codec: AudioCodec,

    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
}

fn default_video_codec() -> VideoCodec {
    VideoCodec::H264
}

fn default_crf() -> u8 {
    20
}

fn default_preset() -> String {
    "medium".to_string()
}

fn default_audio_codec() -> AudioCodec {
    AudioCodec::Aac
}

fn default_audio_bitrate() -> String {
    "192k".to_string()
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            video_codec: default_video_codec(),
            crf: default_crf(),
            preset: default_preset(),
            audio_codec: default_audio_codec(),
            audio_bitrate: default_audio_bitrate(),
        }
    }
}

impl EncodingConfig {
    /// Standard audio+video output settings.
    pub fn output_options(&self, pix_fmt: &str) -> OutputOptions {
        self.output_for(Some(self.video_codec), Some(self.audio_codec), pix_fmt)
    }

    pub fn output_for(
        &self,
        video: Option<VideoCodec>,
        audio: Option<AudioCodec>,
        pix_fmt: &str,
    ) -> OutputOptions {
        OutputOptions {
            video_codec: video,
            audio_codec: audio,
            crf: video.map(|_| self.crf),
            preset: video.map(|_| self.preset.clone()),
            pix_fmt: video.map(|_| pix_fmt.to_string()),
            audio_bitrate: audio.map(|_| self.audio_bitrate.clone()),
            ..Default::default()
        }
    }
}

impl CompositorConfig {
    /// Default config file location.
    pub fn config_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".compositor")
            .join("config.toml")
    }

    /// Load from `path` (or the default location), falling back to defaults
    /// when the default file does not exist. A missing explicit path is an error.
    pub fn load(path: Option<&Path>) -> CompositorResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Self::config_path();
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> CompositorResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CompositorError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> CompositorResult<Self> {
        toml::from_str(content).map_err(|e| CompositorError::Config(e.to_string()))
    }

    /// Apply `COMPOSITOR_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(path) = non_empty(ENV_FFMPEG) {
            self.engine.ffmpeg_path = Some(PathBuf::from(path));
        }
        if let Some(path) = non_empty(ENV_FFPROBE) {
            self.engine.ffprobe_path = Some(PathBuf::from(path));
        }
        if let Some(dir) = non_empty(ENV_OUTPUT_DIR) {
            self.output_dir = PathBuf::from(dir);
        }
    }
}
