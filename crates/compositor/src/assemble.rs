//! Filter graph assembly
//!
//! Every operation is a composition of a few reusable sub-graphs. Video inputs
//! always go through [`Assembler::normalize_video`] first so effects only ever
//! see the delivery canvas, and audio goes through
//! [`Assembler::normalize_audio`], which synthesizes silence for inputs that
//! have no audio stream.
//!
//! Planners return a [`RenderJob`] without an output path; the caller picks the
//! path once the plan is known to be valid.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::config::{AudioConfig, CanvasConfig, CompositorConfig, EncodingConfig};
use crate::error::{CompositorError, CompositorResult};
use crate::graph::{secs, FilterGraph, Pad, PadLabel};
use crate::job::{InputSpec, MapTarget, OutputFormat, OutputOptions, RenderJob, VideoCodec};
use crate::probe::MediaDescriptor;
use crate::tempo::tempo_filter;
use crate::timing::{safe_duration, ChainTimeline, EffectFamily};
use crate::transitions::TransitionKind;

/// Shortest silence synthesized for an input without audio.
pub const MIN_SILENCE_SECONDS: f64 = 0.1;
pub const THUMBNAIL_TAIL_SECONDS: f64 = 0.1;
pub const WATERMARK_WIDTH_RATIO: f64 = 0.15;
pub const WATERMARK_OPACITY: f64 = 0.8;
pub const WATERMARK_MARGIN: u32 = 20;
const GIF_FPS: u32 = 15;
const GIF_WIDTH: u32 = 640;

/// Optional audio stream of the first input, mapped untouched.
pub(crate) const FIRST_AUDIO: &str = "0:a?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum NamedFilter {
    #[serde(alias = "greyscale")]
    #[strum(to_string = "grayscale", serialize = "greyscale")]
    Grayscale,
    Sepia,
    Blur,
    Sharpen,
    Vintage,
    Negate,
    Vignette,
    Brighten,
    Contrast,
    /// Horizontal flip.
    Mirror,
    /// Vertical flip.
    Flip,
}

impl NamedFilter {
    pub fn expression(&self) -> &'static str {
        match self {
            NamedFilter::Grayscale => "hue=s=0",
            NamedFilter::Sepia => {
                "colorchannelmixer=.393:.769:.189:0:.349:.686:.168:0:.272:.534:.131"
            }
            NamedFilter::Blur => "boxblur=5:1",
            NamedFilter::Sharpen => "unsharp=5:5:1.0:5:5:0.0",
            NamedFilter::Vintage => "curves=preset=vintage",
            NamedFilter::Negate => "negate",
            NamedFilter::Vignette => "vignette=PI/4",
            NamedFilter::Brighten => "eq=brightness=0.1",
            NamedFilter::Contrast => "eq=contrast=1.3",
            NamedFilter::Mirror => "hflip",
            NamedFilter::Flip => "vflip",
        }
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum WatermarkPosition {
    TopLeft,
    TopRight,
    BottomLeft,
    #[default]
    BottomRight,
    Center,
}

impl WatermarkPosition {
    /// `x:y` for the overlay filter, in main (`W`,`H`) and overlay (`w`,`h`) units.
    pub fn overlay_xy(&self) -> String {
        let m = WATERMARK_MARGIN;
        match self {
            WatermarkPosition::TopLeft => format!("{m}:{m}"),
            WatermarkPosition::TopRight => format!("W-w-{m}:{m}"),
            WatermarkPosition::BottomLeft => format!("{m}:H-h-{m}"),
            WatermarkPosition::BottomRight => format!("W-w-{m}:H-h-{m}"),
            WatermarkPosition::Center => "(W-w)/2:(H-h)/2".to_string(),
        }
    }
}

/// Round down to an even pixel count; yuv420p needs even dimensions.
pub fn even(value: u32) -> u32 {
    (value / 2 * 2).max(2)
}

/// Seek position for a thumbnail, kept inside the last 0.1s of a known duration.
pub fn thumbnail_timestamp(requested: f64, duration: f64) -> f64 {
    let requested = requested.max(0.0);
    if duration.is_finite() && duration > 0.0 && requested > duration - THUMBNAIL_TAIL_SECONDS {
        (duration - THUMBNAIL_TAIL_SECONDS).max(0.0)
    } else {
        requested
    }
}

pub(crate) fn inputs_for(clips: &[MediaDescriptor]) -> Vec<InputSpec> {
    clips.iter().map(|c| InputSpec::file(&c.path)).collect()
}

#[derive(Debug, Clone)]
pub struct Assembler {
    pub(crate) canvas: CanvasConfig,
    pub(crate) audio: AudioConfig,
    pub(crate) encoding: EncodingConfig,
}

impl Assembler {
    pub fn new(config: &CompositorConfig) -> Self {
        Self {
            canvas: config.canvas.clone(),
            audio: config.audio.clone(),
            encoding: config.encoding.clone(),
        }
    }

    pub fn canvas(&self) -> &CanvasConfig {
        &self.canvas
    }

    /// Delivery encoder settings for an audio+video output.
    pub fn standard_output(&self) -> OutputOptions {
        self.encoding.output_options(&self.canvas.pix_fmt)
    }

    // ============ SUB-GRAPHS ============

    /// Fit inside `width`x`height`, letterbox to the exact size, then force
    /// unit SAR, the canvas frame rate and pixel format.
    pub fn fit_filter(&self, width: u32, height: u32) -> String {
        format!(
            "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:color=black,setsar=1,fps={fps},format={pix},setpts=PTS-STARTPTS",
            w = width,
            h = height,
            fps = self.canvas.fps,
            pix = self.canvas.pix_fmt,
        )
    }

    pub fn normalize_video(&self, graph: &mut FilterGraph, index: usize) -> PadLabel {
        graph.chain(
            [Pad::video(index)],
            self.fit_filter(self.canvas.width, self.canvas.height),
            "v",
        )
    }

    pub fn audio_format(&self) -> String {
        format!(
            "aformat=sample_fmts={}:sample_rates={}:channel_layouts={}",
            self.audio.sample_fmt, self.audio.sample_rate, self.audio.channel_layout
        )
    }

    /// Uniform sample format/rate/layout, or silence of the source's length
    /// when it has no audio stream.
    pub fn normalize_audio(
        &self,
        graph: &mut FilterGraph,
        index: usize,
        source: &MediaDescriptor,
    ) -> PadLabel {
        if source.has_audio {
            return graph.chain(
                [Pad::audio(index)],
                format!("{},asetpts=PTS-STARTPTS", self.audio_format()),
                "a",
            );
        }

        let length = if source.has_duration() {
            source.duration_seconds.max(MIN_SILENCE_SECONDS)
        } else {
            MIN_SILENCE_SECONDS
        };
        graph.source(
            format!(
                "anullsrc=channel_layout={}:sample_rate={},atrim=duration={},{}",
                self.audio.channel_layout,
                self.audio.sample_rate,
                secs(length),
                self.audio_format()
            ),
            "a",
        )
    }

    // ============ SINGLE-INPUT OPERATIONS ============

    pub fn plan_convert(&self, source: &MediaDescriptor, format: OutputFormat) -> RenderJob {
        let mut graph = FilterGraph::new();
        let inputs = vec![InputSpec::file(&source.path)];
        let (video_codec, audio_codec) =
            format.codecs(self.encoding.video_codec, self.encoding.audio_codec);
        let output = self
            .encoding
            .output_for(video_codec, audio_codec, &self.canvas.pix_fmt);

        let job = match format {
            OutputFormat::Gif => {
                let scaled = graph.chain(
                    [Pad::video(0)],
                    format!("fps={},scale={}:-1:flags=lanczos", GIF_FPS, GIF_WIDTH),
                    "v",
                );
                let (to_palette, to_frames) = (graph.label("p"), graph.label("p"));
                graph.push([scaled], "split=2", vec![to_frames.clone(), to_palette.clone()]);
                let palette = graph.chain([to_palette], "palettegen", "pal");
                let out = graph.chain([to_frames, palette], "paletteuse", "gif");
                RenderJob::new("convert", inputs, graph).map(out)
            }
            OutputFormat::Mp3 | OutputFormat::Wav => {
                let audio = self.normalize_audio(&mut graph, 0, source);
                RenderJob::new("convert", inputs, graph).map(audio)
            }
            _ => {
                let video = graph.chain(
                    [Pad::video(0)],
                    format!("scale=trunc(iw/2)*2:trunc(ih/2)*2,format={}", self.canvas.pix_fmt),
                    "v",
                );
                RenderJob::new("convert", inputs, graph)
                    .map(video)
                    .map(MapTarget::Stream(FIRST_AUDIO.to_string()))
            }
        };

        job.with_output(output).expecting(source.duration_seconds)
    }

    pub fn plan_resize(&self, source: &MediaDescriptor, width: u32, height: u32) -> RenderJob {
        let (w, h) = (even(width), even(height));
        let mut graph = FilterGraph::new();
        let video = graph.chain(
            [Pad::video(0)],
            format!(
                "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:color=black,setsar=1,format={pix}",
                pix = self.canvas.pix_fmt
            ),
            "v",
        );

        RenderJob::new("resize", vec![InputSpec::file(&source.path)], graph)
            .map(video)
            .map(MapTarget::Stream(FIRST_AUDIO.to_string()))
            .with_output(self.standard_output())
            .expecting(source.duration_seconds)
    }

    pub fn plan_trim(
        &self,
        source: &MediaDescriptor,
        start: f64,
        duration: f64,
    ) -> CompositorResult<RenderJob> {
        if source.has_duration() && start >= source.duration_seconds {
            return Err(CompositorError::invalid(format!(
                "trim start {}s is past the end of a {}s clip",
                secs(start),
                secs(source.duration_seconds)
            )));
        }

        let mut graph = FilterGraph::new();
        let window = format!("start={}:duration={}", secs(start), secs(duration));
        let video = graph.chain(
            [Pad::video(0)],
            format!("trim={},setpts=PTS-STARTPTS", window),
            "v",
        );
        let audio = source.has_audio.then(|| {
            graph.chain(
                [Pad::audio(0)],
                format!("atrim={},asetpts=PTS-STARTPTS", window),
                "a",
            )
        });

        let expected = if source.has_duration() {
            duration.min(source.duration_seconds - start)
        } else {
            duration
        };

        let mut job = RenderJob::new("trim", vec![InputSpec::file(&source.path)], graph).map(video);
        if let Some(audio) = audio {
            job = job.map(audio);
        }
        Ok(job.with_output(self.standard_output()).expecting(expected))
    }

    pub fn plan_filter(&self, source: &MediaDescriptor, filter: NamedFilter) -> RenderJob {
        let mut graph = FilterGraph::new();
        let video = graph.chain(
            [Pad::video(0)],
            format!("{},format={}", filter.expression(), self.canvas.pix_fmt),
            "v",
        );

        RenderJob::new("filter", vec![InputSpec::file(&source.path)], graph)
            .map(video)
            .map(MapTarget::Stream(FIRST_AUDIO.to_string()))
            .with_output(self.standard_output())
            .expecting(source.duration_seconds)
    }

    /// Single JPEG frame; the seek happens on the input side.
    pub fn plan_thumbnail(&self, source: &MediaDescriptor, timestamp: f64) -> RenderJob {
        let at = thumbnail_timestamp(timestamp, source.duration_seconds);
        let mut graph = FilterGraph::new();
        let frame = graph.chain(
            [Pad::video(0)],
            "scale=trunc(iw/2)*2:trunc(ih/2)*2,format=yuvj420p",
            "v",
        );

        let input = InputSpec::file(&source.path).with_option("-ss", secs(at));
        RenderJob::new("thumbnail", vec![input], graph)
            .map(frame)
            .with_output(OutputOptions {
                frames: Some(1),
                extra: vec!["-q:v".to_string(), "2".to_string()],
                ..Default::default()
            })
    }

    pub fn plan_watermark(
        &self,
        source: &MediaDescriptor,
        mark: &MediaDescriptor,
        position: WatermarkPosition,
    ) -> RenderJob {
        let mark_width = even((source.width as f64 * WATERMARK_WIDTH_RATIO).round() as u32);
        let mut graph = FilterGraph::new();
        let scaled = graph.chain(
            [Pad::video(1)],
            format!(
                "scale={}:-1,format=rgba,colorchannelmixer=aa={:.2}",
                mark_width, WATERMARK_OPACITY
            ),
            "wm",
        );
        let video = graph.chain(
            [Pad::video(0), Pad::from(scaled)],
            format!("overlay={},format={}", position.overlay_xy(), self.canvas.pix_fmt),
            "v",
        );

        RenderJob::new(
            "watermark",
            vec![InputSpec::file(&source.path), InputSpec::file(&mark.path)],
            graph,
        )
        .map(video)
        .map(MapTarget::Stream(FIRST_AUDIO.to_string()))
        .with_output(self.standard_output())
        .expecting(source.duration_seconds)
    }

    /// `setpts` on video, chained `atempo` on audio.
    pub fn plan_speed(&self, source: &MediaDescriptor, factor: f64) -> CompositorResult<RenderJob> {
        if !factor.is_finite() || factor <= 0.0 {
            return Err(CompositorError::invalid(format!(
                "speed factor must be a positive number, got {}",
                factor
            )));
        }

        let mut graph = FilterGraph::new();
        let video = graph.chain([Pad::video(0)], format!("setpts=PTS/{:.6}", factor), "v");
        let audio = source
            .has_audio
            .then(|| graph.chain([Pad::audio(0)], tempo_filter(factor), "a"));

        let mut job =
            RenderJob::new("speed", vec![InputSpec::file(&source.path)], graph).map(video);
        if let Some(audio) = audio {
            job = job.map(audio);
        }
        Ok(job
            .with_output(self.standard_output())
            .expecting(source.duration_seconds / factor))
    }

    /// Video stream-copied from the first input, audio from the second shifted
    /// by `offset` seconds. Length is bounded by the shorter stream.
    pub fn plan_merge(
        &self,
        video: &MediaDescriptor,
        audio: &MediaDescriptor,
        offset: f64,
    ) -> RenderJob {
        let mut chain = vec![self.audio_format()];
        if offset > 0.0 {
            let ms = (offset * 1000.0).round() as u64;
            chain.push(format!("adelay={ms}|{ms}"));
        } else if offset < 0.0 {
            chain.push(format!("atrim=start={},asetpts=PTS-STARTPTS", secs(-offset)));
        }

        let mut graph = FilterGraph::new();
        let shifted = graph.chain([Pad::audio(1)], chain.join(","), "a");

        let limit = match (video.has_duration(), audio.has_duration()) {
            (true, true) => Some(video.duration_seconds.min(audio.duration_seconds)),
            (true, false) => Some(video.duration_seconds),
            (false, true) => Some(audio.duration_seconds),
            (false, false) => None,
        };

        let mut output = self.encoding.output_for(
            Some(VideoCodec::Copy),
            Some(self.encoding.audio_codec),
            &self.canvas.pix_fmt,
        );
        output.duration_limit = limit;
        output.shortest = true;

        let mut job = RenderJob::new(
            "merge",
            vec![InputSpec::file(&video.path), InputSpec::file(&audio.path)],
            graph,
        )
        .map(MapTarget::Stream("0:v:0".to_string()))
        .map(shifted)
        .with_output(output);
        job.expected_duration = limit;
        job
    }

    // ============ MULTI-CLIP OPERATIONS ============

    pub fn plan_concat(
        &self,
        clips: &[MediaDescriptor],
        kind: TransitionKind,
        requested: f64,
    ) -> CompositorResult<RenderJob> {
        if clips.len() < 2 {
            return Err(CompositorError::invalid("concat needs at least 2 clips"));
        }

        match kind {
            TransitionKind::None => Ok(self.hard_concat(clips)),
            TransitionKind::FadeBlack => self.fade_concat(clips, requested),
            TransitionKind::LightLeak => Err(CompositorError::invalid(
                "light-leak concat is planned as a batch light leak",
            )),
            _ => self.xfade_chain("concat", clips, kind, requested),
        }
    }

    /// Two-clip transition built on the backend's xfade primitive.
    pub fn plan_pairwise(
        &self,
        operation: &str,
        first: &MediaDescriptor,
        second: &MediaDescriptor,
        kind: TransitionKind,
        requested: f64,
    ) -> CompositorResult<RenderJob> {
        self.xfade_chain(operation, &[first.clone(), second.clone()], kind, requested)
    }

    fn hard_concat(&self, clips: &[MediaDescriptor]) -> RenderJob {
        let mut graph = FilterGraph::new();
        let mut pads = Vec::with_capacity(clips.len() * 2);
        for (i, clip) in clips.iter().enumerate() {
            pads.push(Pad::from(self.normalize_video(&mut graph, i)));
            pads.push(Pad::from(self.normalize_audio(&mut graph, i, clip)));
        }

        let (video, audio) = (graph.label("v"), graph.label("a"));
        graph.push(
            pads,
            format!("concat=n={}:v=1:a=1", clips.len()),
            vec![video.clone(), audio.clone()],
        );

        let total = clips.iter().map(|c| c.duration_seconds).sum();
        RenderJob::new("concat", inputs_for(clips), graph)
            .map(video)
            .map(audio)
            .with_output(self.standard_output())
            .expecting(total)
    }

    /// Fade through black at every junction: half the safe duration out of
    /// one clip, half into the next, then a hard concat. Length is unchanged.
    fn fade_concat(
        &self,
        clips: &[MediaDescriptor],
        requested: f64,
    ) -> CompositorResult<RenderJob> {
        // The fade-out is placed from the end of each clip.
        let durations = clips
            .iter()
            .enumerate()
            .map(|(i, clip)| clip.require_duration(&format!("clip {}", i + 1)))
            .collect::<CompositorResult<Vec<_>>>()?;
        let halves: Vec<f64> = durations
            .windows(2)
            .map(|pair| safe_duration(requested, pair[0], pair[1], EffectFamily::Geometric) / 2.0)
            .collect();

        let mut graph = FilterGraph::new();
        let mut pads = Vec::with_capacity(clips.len() * 2);
        let last = clips.len() - 1;

        for (i, clip) in clips.iter().enumerate() {
            let mut video_fx = Vec::new();
            let mut audio_fx = Vec::new();
            if i > 0 {
                let d = secs(halves[i - 1]);
                video_fx.push(format!("fade=t=in:st=0:d={}", d));
                audio_fx.push(format!("afade=t=in:st=0:d={}", d));
            }
            if i < last {
                let d = halves[i];
                let st = secs((durations[i] - d).max(0.0));
                video_fx.push(format!("fade=t=out:st={}:d={}", st, secs(d)));
                audio_fx.push(format!("afade=t=out:st={}:d={}", st, secs(d)));
            }

            let video = self.normalize_video(&mut graph, i);
            let video = graph.chain([video], video_fx.join(","), "v");
            let audio = self.normalize_audio(&mut graph, i, clip);
            let audio = graph.chain([audio], audio_fx.join(","), "a");
            pads.push(Pad::from(video));
            pads.push(Pad::from(audio));
        }

        let (video, audio) = (graph.label("v"), graph.label("a"));
        graph.push(
            pads,
            format!("concat=n={}:v=1:a=1", clips.len()),
            vec![video.clone(), audio.clone()],
        );

        let total = durations.iter().sum();
        Ok(RenderJob::new("concat", inputs_for(clips), graph)
            .map(video)
            .map(audio)
            .with_output(self.standard_output())
            .expecting(total))
    }

    /// N-way xfade chain with matching audio cross-fades. The output of each
    /// junction is the base of the next; offsets come from [`ChainTimeline`].
    fn xfade_chain(
        &self,
        operation: &str,
        clips: &[MediaDescriptor],
        kind: TransitionKind,
        requested: f64,
    ) -> CompositorResult<RenderJob> {
        let (transition, zoom_out) = match (kind.xfade_name(), kind) {
            (Some(name), _) => (name, false),
            (None, TransitionKind::ZoomOut) => ("fade", true),
            (None, other) => {
                return Err(CompositorError::invalid(format!(
                    "{} is not an overlapping transition",
                    other
                )))
            }
        };

        let durations: Vec<f64> = clips.iter().map(|c| c.duration_seconds).collect();
        let timeline = ChainTimeline::plan(
            kind,
            &durations,
            requested,
            kind.family(),
            self.canvas.frame_seconds(),
        );

        let mut graph = FilterGraph::new();
        let videos: Vec<PadLabel> = (0..clips.len())
            .map(|i| self.normalize_video(&mut graph, i))
            .collect();
        let audios: Vec<PadLabel> = clips
            .iter()
            .enumerate()
            .map(|(i, clip)| self.normalize_audio(&mut graph, i, clip))
            .collect();

        let mut videos = videos.into_iter();
        let mut audios = audios.into_iter();
        let (Some(mut video), Some(mut audio)) = (videos.next(), audios.next()) else {
            return Err(CompositorError::invalid(format!("{} needs at least 2 clips", operation)));
        };

        let stages = timeline.junctions.iter().zip(videos).zip(audios);
        for ((junction, next_video), next_audio) in stages {
            let width = junction.safe_duration;
            let next_video = if zoom_out {
                self.zoom_out_head(&mut graph, next_video, width)
            } else {
                next_video
            };

            video = graph.chain(
                [video, next_video],
                format!(
                    "xfade=transition={}:duration={}:offset={}",
                    transition,
                    secs(width),
                    secs(junction.offset)
                ),
                "vx",
            );
            audio = graph.chain(
                [audio, next_audio],
                format!("acrossfade=d={}:c1=tri:c2=tri", secs(width)),
                "ax",
            );
        }

        Ok(RenderJob::new(operation, inputs_for(clips), graph)
            .map(video)
            .map(audio)
            .with_output(self.standard_output())
            .expecting(timeline.total_duration()))
    }
}
