//! Render jobs
//!
//! A [`RenderJob`] is everything one engine invocation needs: ordered inputs,
//! the filter graph, which pads get mapped, and the encoder settings. It is the
//! last structured form before the argument vector is produced.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::error::{CompositorError, CompositorResult};
use crate::graph::{secs, FilterGraph, Pad, PadLabel};

// ============ CODECS ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum VideoCodec {
    H264,
    H265,
    Vp9,
    Mpeg4,
    Gif,
    /// Stream copy; only valid for raw (unfiltered) maps.
    Copy,
}

impl VideoCodec {
    pub fn ffmpeg_codec(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "libx264",
            VideoCodec::H265 => "libx265",
            VideoCodec::Vp9 => "libvpx-vp9",
            VideoCodec::Mpeg4 => "mpeg4",
            VideoCodec::Gif => "gif",
            VideoCodec::Copy => "copy",
        }
    }

    pub fn supports_crf(&self) -> bool {
        matches!(self, VideoCodec::H264 | VideoCodec::H265 | VideoCodec::Vp9)
    }

    pub fn supports_preset(&self) -> bool {
        matches!(self, VideoCodec::H264 | VideoCodec::H265)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum AudioCodec {
    Aac,
    Mp3,
    Opus,
    Pcm,
    Copy,
}

impl AudioCodec {
    pub fn ffmpeg_codec(&self) -> &'static str {
        match self {
            AudioCodec::Aac => "aac",
            AudioCodec::Mp3 => "libmp3lame",
            AudioCodec::Opus => "libopus",
            AudioCodec::Pcm => "pcm_s16le",
            AudioCodec::Copy => "copy",
        }
    }

    pub fn uses_bitrate(&self) -> bool {
        matches!(self, AudioCodec::Aac | AudioCodec::Mp3 | AudioCodec::Opus)
    }
}

/// Container formats accepted by the convert operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum OutputFormat {
    Mp4,
    Mov,
    Mkv,
    Webm,
    Avi,
    Gif,
    Mp3,
    Wav,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Mov => "mov",
            OutputFormat::Mkv => "mkv",
            OutputFormat::Webm => "webm",
            OutputFormat::Avi => "avi",
            OutputFormat::Gif => "gif",
            OutputFormat::Mp3 => "mp3",
            OutputFormat::Wav => "wav",
        }
    }

    pub fn is_audio_only(&self) -> bool {
        matches!(self, OutputFormat::Mp3 | OutputFormat::Wav)
    }

    pub fn has_audio(&self) -> bool {
        !matches!(self, OutputFormat::Gif)
    }

    /// Container-appropriate codecs; `None` means the container takes no stream of that kind.
    pub fn codecs(
        &self,
        video: VideoCodec,
        audio: AudioCodec,
    ) -> (Option<VideoCodec>, Option<AudioCodec>) {
        match self {
            OutputFormat::Mp4 | OutputFormat::Mov | OutputFormat::Mkv => (Some(video), Some(audio)),
            OutputFormat::Webm => (Some(VideoCodec::Vp9), Some(AudioCodec::Opus)),
            OutputFormat::Avi => (Some(VideoCodec::Mpeg4), Some(AudioCodec::Mp3)),
            OutputFormat::Gif => (Some(VideoCodec::Gif), None),
            OutputFormat::Mp3 => (None, Some(AudioCodec::Mp3)),
            OutputFormat::Wav => (None, Some(AudioCodec::Pcm)),
        }
    }
}

// ============ JOB ============

#[derive(Debug, Clone, PartialEq)]
pub struct InputSpec {
    pub path: PathBuf,
    /// Options placed before this input's `-i`.
    pub options: Vec<String>,
}

impl InputSpec {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            options: Vec::new(),
        }
    }

    pub fn with_option(mut self, flag: &str, value: impl Into<String>) -> Self {
        self.options.push(flag.to_string());
        self.options.push(value.into());
        self
    }
}

/// What a `-map` argument points at.
#[derive(Debug, Clone, PartialEq)]
pub enum MapTarget {
    Label(PadLabel),
    /// Raw stream specifier such as `0:v:0`.
    Stream(String),
}

impl MapTarget {
    fn to_arg(&self) -> String {
        match self {
            MapTarget::Label(label) => label.to_string(),
            MapTarget::Stream(spec) => spec.clone(),
        }
    }
}

impl From<PadLabel> for MapTarget {
    fn from(label: PadLabel) -> Self {
        MapTarget::Label(label)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputOptions {
    pub video_codec: Option<VideoCodec>,
    pub audio_codec: Option<AudioCodec>,
    pub crf: Option<u8>,
    pub preset: Option<String>,
    pub pix_fmt: Option<String>,
    pub audio_bitrate: Option<String>,
    pub frames: Option<u32>,
    /// `-t`
    pub duration_limit: Option<f64>,
    pub shortest: bool,
    pub extra: Vec<String>,
}

impl OutputOptions {
    fn push_args(&self, args: &mut Vec<String>) {
        if let Some(codec) = self.video_codec {
            args.extend(["-c:v".to_string(), codec.ffmpeg_codec().to_string()]);
            if codec.supports_crf() {
                if let Some(crf) = self.crf {
                    args.extend(["-crf".to_string(), crf.to_string()]);
                    if codec == VideoCodec::Vp9 {
                        args.extend(["-b:v".to_string(), "0".to_string()]);
                    }
                }
            }
            if codec.supports_preset() {
                if let Some(preset) = &self.preset {
                    args.extend(["-preset".to_string(), preset.clone()]);
                }
            }
            if codec != VideoCodec::Copy && codec != VideoCodec::Gif {
                if let Some(pix_fmt) = &self.pix_fmt {
                    args.extend(["-pix_fmt".to_string(), pix_fmt.clone()]);
                }
            }
        }

        if let Some(codec) = self.audio_codec {
            args.extend(["-c:a".to_string(), codec.ffmpeg_codec().to_string()]);
            if codec.uses_bitrate() {
                if let Some(bitrate) = &self.audio_bitrate {
                    args.extend(["-b:a".to_string(), bitrate.clone()]);
                }
            }
        }

        if let Some(frames) = self.frames {
            args.extend(["-frames:v".to_string(), frames.to_string()]);
        }
        if let Some(limit) = self.duration_limit {
            args.extend(["-t".to_string(), secs(limit)]);
        }
        if self.shortest {
            args.push("-shortest".to_string());
        }
        args.extend(self.extra.iter().cloned());
    }
}

#[derive(Debug, Clone)]
pub struct RenderJob {
    /// Operation name, also the output file stem.
    pub operation: String,
    pub inputs: Vec<InputSpec>,
    pub graph: FilterGraph,
    pub maps: Vec<MapTarget>,
    pub output: OutputOptions,
    pub output_path: PathBuf,
    /// Rendered length, when known, for progress percentages.
    pub expected_duration: Option<f64>,
}

impl RenderJob {
    pub fn new(operation: impl Into<String>, inputs: Vec<InputSpec>, graph: FilterGraph) -> Self {
        Self {
            operation: operation.into(),
            inputs,
            graph,
            maps: Vec::new(),
            output: OutputOptions::default(),
            output_path: PathBuf::new(),
            expected_duration: None,
        }
    }

    pub fn map(mut self, target: impl Into<MapTarget>) -> Self {
        self.maps.push(target.into());
        self
    }

    pub fn with_output(mut self, output: OutputOptions) -> Self {
        self.output = output;
        self
    }

    pub fn expecting(mut self, duration: f64) -> Self {
        if duration.is_finite() && duration > 0.0 {
            self.expected_duration = Some(duration);
        }
        self
    }

    pub fn terminals(&self) -> Vec<&PadLabel> {
        self.maps
            .iter()
            .filter_map(|m| match m {
                MapTarget::Label(label) => Some(label),
                MapTarget::Stream(_) => None,
            })
            .collect()
    }

    /// Reject jobs the engine would choke on: no inputs, raw pads past the
    /// input list, or a graph whose unconsumed outputs are not the mapped terminals.
    pub fn validate(&self) -> CompositorResult<()> {
        if self.inputs.is_empty() {
            return Err(CompositorError::invalid("render job has no inputs"));
        }
        if self.maps.is_empty() {
            return Err(CompositorError::invalid("render job maps no streams"));
        }

        for node in self.graph.nodes() {
            for pad in &node.inputs {
                if let Pad::Input { index, .. } = pad {
                    if *index >= self.inputs.len() {
                        return Err(CompositorError::invalid(format!(
                            "graph references input {} but only {} inputs are given",
                            index,
                            self.inputs.len()
                        )));
                    }
                }
            }
        }

        self.graph.validate(&self.terminals())?;
        Ok(())
    }

    /// Full argument vector for the engine, output path last.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec!["-hide_banner".to_string(), "-nostdin".to_string(), "-y".to_string()];

        for input in &self.inputs {
            args.extend(input.options.iter().cloned());
            args.push("-i".to_string());
            args.push(input.path.to_string_lossy().to_string());
        }

        if !self.graph.is_empty() {
            args.push("-filter_complex".to_string());
            args.push(self.graph.to_filter_complex());
        }

        for target in &self.maps {
            args.push("-map".to_string());
            args.push(target.to_arg());
        }

        self.output.push_args(&mut args);
        args.push(self.output_path.to_string_lossy().to_string());
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_argument_vector() {
        let mut graph = FilterGraph::new();
        let v = graph.chain([Pad::video(0)], "scale=1920:1080", "v");
        let a = graph.chain([Pad::audio(0)], "anull", "a");

        let mut job = RenderJob::new("convert", vec![InputSpec::file("in.mov")], graph)
            .map(v)
            .map(a)
            .with_output(OutputOptions {
                video_codec: Some(VideoCodec::H264),
                audio_codec: Some(AudioCodec::Aac),
                crf: Some(20),
                preset: Some("medium".to_string()),
                pix_fmt: Some("yuv420p".to_string()),
                audio_bitrate: Some("192k".to_string()),
                ..Default::default()
            });
        job.output_path = PathBuf::from("/tmp/out.mp4");

        assert!(job.validate().is_ok());
        assert_eq!(
            job.to_args(),
            vec![
                "-hide_banner", "-nostdin", "-y", "-i", "in.mov",
                "-filter_complex", "[0:v]scale=1920:1080[v0];[0:a]anull[a1]",
                "-map", "[v0]", "-map", "[a1]",
                "-c:v", "libx264", "-crf", "20", "-preset", "medium", "-pix_fmt", "yuv420p",
                "-c:a", "aac", "-b:a", "192k",
                "/tmp/out.mp4",
            ]
        );
    }

    #[test]
    fn input_options_precede_their_input() {
        let mut graph = FilterGraph::new();
        let v = graph.chain([Pad::video(0)], "null", "v");
        let job = RenderJob::new(
            "thumbnail",
            vec![InputSpec::file("clip.mp4").with_option("-ss", "1.500")],
            graph,
        )
        .map(v);
        let args = job.to_args();
        let ss = args.iter().position(|a| a == "-ss").unwrap();
        let i = args.iter().position(|a| a == "-i").unwrap();
        assert!(ss < i);
    }

    #[test]
    fn rejects_out_of_range_input() {
        let mut graph = FilterGraph::new();
        let v = graph.chain([Pad::video(0), Pad::video(1)], "xfade", "v");
        let job = RenderJob::new("pair", vec![InputSpec::file("a.mp4")], graph).map(v);
        assert!(matches!(job.validate(), Err(CompositorError::InvalidRequest(_))));
    }

    #[test]
    fn rejects_unmapped_graph_output() {
        let mut graph = FilterGraph::new();
        let v = graph.chain([Pad::video(0)], "null", "v");
        graph.chain([Pad::audio(0)], "anull", "a");
        let job = RenderJob::new("x", vec![InputSpec::file("a.mp4")], graph).map(v);
        assert!(matches!(job.validate(), Err(CompositorError::Graph(_))));
    }

    #[test]
    fn format_codecs_follow_container() {
        let (v, a) = OutputFormat::Webm.codecs(VideoCodec::H264, AudioCodec::Aac);
        assert_eq!((v, a), (Some(VideoCodec::Vp9), Some(AudioCodec::Opus)));
        let (v, a) = OutputFormat::Wav.codecs(VideoCodec::H264, AudioCodec::Aac);
        assert_eq!((v, a), (None, Some(AudioCodec::Pcm)));
        assert_eq!("MP4".parse::<OutputFormat>().unwrap(), OutputFormat::Mp4);
    }
}
