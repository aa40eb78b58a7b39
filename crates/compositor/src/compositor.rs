//! Composition service
//!
//! One async entry point per operation. Each request runs the same pipeline:
//! validate the request, probe every input concurrently, plan the render job,
//! pick the output path, run one engine process.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::assemble::{Assembler, NamedFilter, WatermarkPosition};
use crate::config::CompositorConfig;
use crate::error::{
    CompositionFailure, CompositionResult, CompositionSuccess, CompositorError, CompositorResult,
};
use crate::executor::{FfmpegEngine, MediaEngine, RenderProgress};
use crate::job::{OutputFormat, RenderJob};
use crate::ken_burns::{AspectRatio, ZoomParams, ZoomType};
use crate::output::OutputResolver;
use crate::probe::{MediaDescriptor, MediaProber};
use crate::transitions::TransitionKind;

pub const DEFAULT_TRANSITION_SECONDS: f64 = 1.0;

fn default_transition_duration() -> f64 {
    DEFAULT_TRANSITION_SECONDS
}

fn default_transition() -> TransitionKind {
    TransitionKind::None
}

/// A fully specified edit. Inputs are listed in the order the engine sees them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Operation {
    Convert {
        input: PathBuf,
        format: OutputFormat,
    },
    Resize {
        input: PathBuf,
        width: u32,
        height: u32,
    },
    Trim {
        input: PathBuf,
        start: f64,
        duration: f64,
    },
    Filter {
        input: PathBuf,
        filter: NamedFilter,
    },
    Thumbnail {
        input: PathBuf,
        timestamp: f64,
    },
    Watermark {
        input: PathBuf,
        overlay: PathBuf,
        #[serde(default)]
        position: WatermarkPosition,
    },
    Concat {
        files: Vec<PathBuf>,
        #[serde(default = "default_transition")]
        transition: TransitionKind,
        #[serde(default = "default_transition_duration")]
        transition_duration: f64,
    },
    /// Exactly one of `speed_factor` / `target_duration`.
    Speed {
        input: PathBuf,
        #[serde(default)]
        speed_factor: Option<f64>,
        #[serde(default)]
        target_duration: Option<f64>,
    },
    Zoom {
        input: PathBuf,
        #[serde(default)]
        zoom: ZoomParams,
    },
    Merge {
        video: PathBuf,
        audio: PathBuf,
        #[serde(default)]
        audio_offset: f64,
    },
    /// Clip A, clip B, overlay.
    LightLeak {
        files: Vec<PathBuf>,
        #[serde(default = "default_transition_duration")]
        transition_duration: f64,
    },
    /// Clips followed by the overlay.
    BatchLightLeak {
        files: Vec<PathBuf>,
        #[serde(default = "default_transition_duration")]
        transition_duration: f64,
    },
    ZoomInTransition {
        files: Vec<PathBuf>,
        #[serde(default = "default_transition_duration")]
        transition_duration: f64,
    },
    ZoomOutTransition {
        files: Vec<PathBuf>,
        #[serde(default = "default_transition_duration")]
        transition_duration: f64,
    },
    BlurCrossfade {
        files: Vec<PathBuf>,
        #[serde(default = "default_transition_duration")]
        transition_duration: f64,
    },
    Radial {
        files: Vec<PathBuf>,
        #[serde(default = "default_transition_duration")]
        transition_duration: f64,
    },
    Circle {
        files: Vec<PathBuf>,
        #[serde(default = "default_transition_duration")]
        transition_duration: f64,
    },
    KenBurnsImage {
        image: PathBuf,
        audio: PathBuf,
        #[serde(default)]
        zoom_type: ZoomType,
    },
    KenBurnsVideo {
        video: PathBuf,
        #[serde(default)]
        zoom_type: ZoomType,
        #[serde(default)]
        aspect_ratio: AspectRatio,
    },
}

impl Operation {
    /// Kebab-case name, also the output file stem.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Convert { .. } => "convert",
            Operation::Resize { .. } => "resize",
            Operation::Trim { .. } => "trim",
            Operation::Filter { .. } => "filter",
            Operation::Thumbnail { .. } => "thumbnail",
            Operation::Watermark { .. } => "watermark",
            Operation::Concat { .. } => "concat",
            Operation::Speed { .. } => "speed",
            Operation::Zoom { .. } => "zoom",
            Operation::Merge { .. } => "merge",
            Operation::LightLeak { .. } => "light-leak",
            Operation::BatchLightLeak { .. } => "batch-light-leak",
            Operation::ZoomInTransition { .. } => "zoom-in-transition",
            Operation::ZoomOutTransition { .. } => "zoom-out-transition",
            Operation::BlurCrossfade { .. } => "blur-crossfade",
            Operation::Radial { .. } => "radial",
            Operation::Circle { .. } => "circle",
            Operation::KenBurnsImage { .. } => "ken-burns-image",
            Operation::KenBurnsVideo { .. } => "ken-burns-video",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Operation::Convert { format, .. } => format.extension(),
            Operation::Thumbnail { .. } => "jpg",
            _ => "mp4",
        }
    }

    pub fn input_paths(&self) -> Vec<PathBuf> {
        match self {
            Operation::Convert { input, .. }
            | Operation::Resize { input, .. }
            | Operation::Trim { input, .. }
            | Operation::Filter { input, .. }
            | Operation::Thumbnail { input, .. }
            | Operation::Speed { input, .. }
            | Operation::Zoom { input, .. } => vec![input.clone()],
            Operation::Watermark { input, overlay, .. } => vec![input.clone(), overlay.clone()],
            Operation::Merge { video, audio, .. } => vec![video.clone(), audio.clone()],
            Operation::KenBurnsImage { image, audio, .. } => vec![image.clone(), audio.clone()],
            Operation::KenBurnsVideo { video, .. } => vec![video.clone()],
            Operation::Concat { files, .. }
            | Operation::LightLeak { files, .. }
            | Operation::BatchLightLeak { files, .. }
            | Operation::ZoomInTransition { files, .. }
            | Operation::ZoomOutTransition { files, .. }
            | Operation::BlurCrossfade { files, .. }
            | Operation::Radial { files, .. }
            | Operation::Circle { files, .. } => files.clone(),
        }
    }

    /// Transition used by the fixed two-clip operations.
    pub fn pairwise_kind(&self) -> Option<TransitionKind> {
        match self {
            Operation::ZoomInTransition { .. } => Some(TransitionKind::ZoomIn),
            Operation::ZoomOutTransition { .. } => Some(TransitionKind::ZoomOut),
            Operation::BlurCrossfade { .. } => Some(TransitionKind::Blur),
            Operation::Radial { .. } => Some(TransitionKind::Radial),
            Operation::Circle { .. } => Some(TransitionKind::CircleClose),
            _ => None,
        }
    }

    /// Checks that need no probing: input counts and parameter ranges.
    pub fn validate(&self) -> CompositorResult<()> {
        let count = self.input_paths().len();
        let name = self.name();

        match self {
            Operation::Concat { transition, .. } => {
                let minimum = if *transition == TransitionKind::LightLeak { 3 } else { 2 };
                require_at_least(name, count, minimum)?;
            }
            Operation::LightLeak { .. } => require_exactly(name, count, 3)?,
            Operation::BatchLightLeak { .. } => require_at_least(name, count, 3)?,
            _ if self.pairwise_kind().is_some() => require_exactly(name, count, 2)?,
            Operation::Resize { width, height, .. } => {
                if *width == 0 || *height == 0 {
                    return Err(CompositorError::invalid(
                        "resize needs a non-zero width and height",
                    ));
                }
            }
            Operation::Trim { start, duration, .. } => {
                if !start.is_finite() || *start < 0.0 {
                    return Err(CompositorError::invalid("trim start must be >= 0"));
                }
                if !duration.is_finite() || *duration <= 0.0 {
                    return Err(CompositorError::invalid("trim duration must be > 0"));
                }
            }
            Operation::Thumbnail { timestamp, .. } => {
                if !timestamp.is_finite() || *timestamp < 0.0 {
                    return Err(CompositorError::invalid("thumbnail timestamp must be >= 0"));
                }
            }
            Operation::Speed {
                speed_factor,
                target_duration,
                ..
            } => match (speed_factor, target_duration) {
                (Some(value), None) | (None, Some(value)) => {
                    if !value.is_finite() || *value <= 0.0 {
                        return Err(CompositorError::invalid(format!(
                            "speed needs a positive value, got {}",
                            value
                        )));
                    }
                }
                _ => {
                    return Err(CompositorError::invalid(
                        "speed needs exactly one of speedFactor or targetDuration",
                    ))
                }
            },
            Operation::Zoom { zoom, .. } => zoom.validate()?,
            Operation::Merge { audio_offset, .. } => {
                if !audio_offset.is_finite() {
                    return Err(CompositorError::invalid("audio offset must be finite"));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn require_at_least(operation: &str, count: usize, minimum: usize) -> CompositorResult<()> {
    if count < minimum {
        return Err(CompositorError::invalid(format!(
            "{} needs at least {} files, got {}",
            operation, minimum, count
        )));
    }
    Ok(())
}

fn require_exactly(operation: &str, count: usize, expected: usize) -> CompositorResult<()> {
    if count != expected {
        return Err(CompositorError::invalid(format!(
            "{} needs exactly {} files, got {}",
            operation, expected, count
        )));
    }
    Ok(())
}

/// Boundary request: an operation plus an optional explicit output path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositionRequest {
    #[serde(flatten)]
    pub operation: Operation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
}

fn input(media: &[MediaDescriptor], index: usize) -> CompositorResult<&MediaDescriptor> {
    media
        .get(index)
        .ok_or_else(|| CompositorError::invalid(format!("missing input {}", index + 1)))
}

/// Last input is the overlay, everything before it a clip.
fn clips_and_overlay(
    media: &[MediaDescriptor],
) -> CompositorResult<(&[MediaDescriptor], &MediaDescriptor)> {
    match media.split_last() {
        Some((overlay, clips)) if clips.len() >= 2 => Ok((clips, overlay)),
        _ => Err(CompositorError::invalid("light leak needs at least 2 clips and an overlay")),
    }
}

#[derive(Clone)]
pub struct Compositor {
    engine: Arc<dyn MediaEngine>,
    prober: MediaProber,
    assembler: Arc<Assembler>,
    resolver: OutputResolver,
    progress: Option<mpsc::Sender<RenderProgress>>,
}

impl Compositor {
    /// Compositor backed by the ffmpeg binaries the config points at (or finds).
    pub fn new(config: &CompositorConfig) -> CompositorResult<Self> {
        let engine = Arc::new(FfmpegEngine::new(&config.engine)?);
        Ok(Self::with_engine(config, engine))
    }

    pub fn with_engine(config: &CompositorConfig, engine: Arc<dyn MediaEngine>) -> Self {
        Self {
            prober: MediaProber::new(engine.clone()),
            engine,
            assembler: Arc::new(Assembler::new(config)),
            resolver: OutputResolver::new(&config.output_dir),
            progress: None,
        }
    }

    /// Receive progress updates for every render. Updates are dropped when the
    /// channel is full.
    pub fn with_progress(mut self, progress: mpsc::Sender<RenderProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn output_dir(&self) -> &Path {
        self.resolver.dir()
    }

    /// Boundary form: all-or-nothing result with captured process output on failure.
    pub async fn compose(&self, request: CompositionRequest) -> CompositionResult {
        self.execute(request.operation, request.output_path)
            .await
            .map(|output_path| CompositionSuccess { output_path })
            .map_err(CompositionFailure::from)
    }

    pub async fn execute(
        &self,
        operation: Operation,
        output_path: Option<PathBuf>,
    ) -> CompositorResult<PathBuf> {
        let request_id = Uuid::new_v4();
        let span = info_span!("compose", operation = operation.name(), %request_id);

        async {
            let result = self.run(&operation, output_path).await;
            if let Err(e) = &result {
                warn!(error = %e, "Composition failed");
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        operation: &Operation,
        output_path: Option<PathBuf>,
    ) -> CompositorResult<PathBuf> {
        operation.validate()?;

        let paths = operation.input_paths();
        info!(inputs = paths.len(), "Starting composition");
        let media = self.prober.probe_all(&paths).await;

        let mut job = self.plan(operation, &media)?;
        job.validate()?;

        let reserved = output_path.is_none();
        job.output_path = match output_path {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent).await?;
                }
                path
            }
            None => {
                self.resolver
                    .allocate(operation.name(), operation.extension())
                    .await?
            }
        };

        if let Err(e) = self.engine.render(&job, self.progress.clone()).await {
            if reserved {
                self.resolver.release(&job.output_path).await;
            }
            return Err(e);
        }
        info!(output = %job.output_path.display(), "Composition finished");
        Ok(job.output_path)
    }

    fn plan(
        &self,
        operation: &Operation,
        media: &[MediaDescriptor],
    ) -> CompositorResult<RenderJob> {
        let a = &self.assembler;

        match operation {
            Operation::Convert { format, .. } => Ok(a.plan_convert(input(media, 0)?, *format)),
            Operation::Resize { width, height, .. } => {
                Ok(a.plan_resize(input(media, 0)?, *width, *height))
            }
            Operation::Trim { start, duration, .. } => {
                a.plan_trim(input(media, 0)?, *start, *duration)
            }
            Operation::Filter { filter, .. } => Ok(a.plan_filter(input(media, 0)?, *filter)),
            Operation::Thumbnail { timestamp, .. } => {
                Ok(a.plan_thumbnail(input(media, 0)?, *timestamp))
            }
            Operation::Watermark { position, .. } => {
                Ok(a.plan_watermark(input(media, 0)?, input(media, 1)?, *position))
            }
            Operation::Concat {
                transition: TransitionKind::LightLeak,
                transition_duration,
                ..
            } => {
                let (clips, overlay) = clips_and_overlay(media)?;
                a.plan_batch_light_leak(clips, overlay, *transition_duration)
            }
            Operation::Concat {
                transition,
                transition_duration,
                ..
            } => a.plan_concat(media, *transition, *transition_duration),
            Operation::Speed {
                speed_factor,
                target_duration,
                ..
            } => {
                let source = input(media, 0)?;
                let factor = match (speed_factor, target_duration) {
                    (Some(factor), _) => *factor,
                    (None, Some(target)) => source.require_duration("speed source")? / target,
                    (None, None) => {
                        return Err(CompositorError::invalid(
                            "speed needs a factor or a target duration",
                        ))
                    }
                };
                a.plan_speed(source, factor)
            }
            Operation::Zoom { zoom, .. } => a.plan_zoom(input(media, 0)?, zoom),
            Operation::Merge { audio_offset, .. } => {
                Ok(a.plan_merge(input(media, 0)?, input(media, 1)?, *audio_offset))
            }
            Operation::LightLeak {
                transition_duration,
                ..
            } => a.plan_light_leak(
                input(media, 0)?,
                input(media, 1)?,
                input(media, 2)?,
                *transition_duration,
            ),
            Operation::BatchLightLeak {
                transition_duration,
                ..
            } => {
                let (clips, overlay) = clips_and_overlay(media)?;
                a.plan_batch_light_leak(clips, overlay, *transition_duration)
            }
            Operation::ZoomInTransition { transition_duration, .. }
            | Operation::ZoomOutTransition { transition_duration, .. }
            | Operation::BlurCrossfade { transition_duration, .. }
            | Operation::Radial { transition_duration, .. }
            | Operation::Circle { transition_duration, .. } => {
                let kind = operation
                    .pairwise_kind()
                    .ok_or_else(|| CompositorError::invalid("not a pairwise transition"))?;
                a.plan_pairwise(
                    operation.name(),
                    input(media, 0)?,
                    input(media, 1)?,
                    kind,
                    *transition_duration,
                )
            }
            Operation::KenBurnsImage { zoom_type, .. } => {
                a.plan_ken_burns_image(input(media, 0)?, input(media, 1)?, *zoom_type)
            }
            Operation::KenBurnsVideo {
                zoom_type,
                aspect_ratio,
                ..
            } => a.plan_ken_burns_video(input(media, 0)?, *zoom_type, *aspect_ratio),
        }
    }

    // ============ OPERATIONS ============

    pub async fn convert<P: AsRef<Path>>(
        &self,
        input: P,
        format: OutputFormat,
    ) -> CompositorResult<PathBuf> {
        self.execute(
            Operation::Convert {
                input: input.as_ref().to_path_buf(),
                format,
            },
            None,
        )
        .await
    }

    pub async fn resize<P: AsRef<Path>>(
        &self,
        input: P,
        width: u32,
        height: u32,
    ) -> CompositorResult<PathBuf> {
        self.execute(
            Operation::Resize {
                input: input.as_ref().to_path_buf(),
                width,
                height,
            },
            None,
        )
        .await
    }

    pub async fn trim<P: AsRef<Path>>(
        &self,
        input: P,
        start: f64,
        duration: f64,
    ) -> CompositorResult<PathBuf> {
        self.execute(
            Operation::Trim {
                input: input.as_ref().to_path_buf(),
                start,
                duration,
            },
            None,
        )
        .await
    }

    pub async fn filter<P: AsRef<Path>>(
        &self,
        input: P,
        filter: NamedFilter,
    ) -> CompositorResult<PathBuf> {
        self.execute(
            Operation::Filter {
                input: input.as_ref().to_path_buf(),
                filter,
            },
            None,
        )
        .await
    }

    pub async fn thumbnail<P: AsRef<Path>>(
        &self,
        input: P,
        timestamp: f64,
    ) -> CompositorResult<PathBuf> {
        self.execute(
            Operation::Thumbnail {
                input: input.as_ref().to_path_buf(),
                timestamp,
            },
            None,
        )
        .await
    }

    pub async fn watermark<P: AsRef<Path>>(
        &self,
        input: P,
        overlay: P,
        position: WatermarkPosition,
    ) -> CompositorResult<PathBuf> {
        self.execute(
            Operation::Watermark {
                input: input.as_ref().to_path_buf(),
                overlay: overlay.as_ref().to_path_buf(),
                position,
            },
            None,
        )
        .await
    }

    pub async fn concat<P: AsRef<Path>>(
        &self,
        files: &[P],
        transition: TransitionKind,
        transition_duration: f64,
    ) -> CompositorResult<PathBuf> {
        self.execute(
            Operation::Concat {
                files: to_paths(files),
                transition,
                transition_duration,
            },
            None,
        )
        .await
    }

    pub async fn speed<P: AsRef<Path>>(
        &self,
        input: P,
        speed_factor: f64,
    ) -> CompositorResult<PathBuf> {
        self.execute(
            Operation::Speed {
                input: input.as_ref().to_path_buf(),
                speed_factor: Some(speed_factor),
                target_duration: None,
            },
            None,
        )
        .await
    }

    /// Retime a clip so it plays for `target_duration` seconds.
    pub async fn speed_to_duration<P: AsRef<Path>>(
        &self,
        input: P,
        target_duration: f64,
    ) -> CompositorResult<PathBuf> {
        self.execute(
            Operation::Speed {
                input: input.as_ref().to_path_buf(),
                speed_factor: None,
                target_duration: Some(target_duration),
            },
            None,
        )
        .await
    }

    pub async fn zoom<P: AsRef<Path>>(
        &self,
        input: P,
        zoom: ZoomParams,
    ) -> CompositorResult<PathBuf> {
        self.execute(
            Operation::Zoom {
                input: input.as_ref().to_path_buf(),
                zoom,
            },
            None,
        )
        .await
    }

    pub async fn merge<P: AsRef<Path>>(
        &self,
        video: P,
        audio: P,
        audio_offset: f64,
    ) -> CompositorResult<PathBuf> {
        self.execute(
            Operation::Merge {
                video: video.as_ref().to_path_buf(),
                audio: audio.as_ref().to_path_buf(),
                audio_offset,
            },
            None,
        )
        .await
    }

    /// `files` is clip A, clip B, overlay.
    pub async fn light_leak<P: AsRef<Path>>(
        &self,
        files: &[P],
        transition_duration: f64,
    ) -> CompositorResult<PathBuf> {
        self.execute(
            Operation::LightLeak {
                files: to_paths(files),
                transition_duration,
            },
            None,
        )
        .await
    }

    /// `files` is every clip followed by the overlay.
    pub async fn batch_light_leak<P: AsRef<Path>>(
        &self,
        files: &[P],
        transition_duration: f64,
    ) -> CompositorResult<PathBuf> {
        self.execute(
            Operation::BatchLightLeak {
                files: to_paths(files),
                transition_duration,
            },
            None,
        )
        .await
    }

    pub async fn zoom_in_transition<P: AsRef<Path>>(
        &self,
        files: &[P],
        transition_duration: f64,
    ) -> CompositorResult<PathBuf> {
        self.execute(
            Operation::ZoomInTransition {
                files: to_paths(files),
                transition_duration,
            },
            None,
        )
        .await
    }

    pub async fn zoom_out_transition<P: AsRef<Path>>(
        &self,
        files: &[P],
        transition_duration: f64,
    ) -> CompositorResult<PathBuf> {
        self.execute(
            Operation::ZoomOutTransition {
                files: to_paths(files),
                transition_duration,
            },
            None,
        )
        .await
    }

    pub async fn blur_crossfade<P: AsRef<Path>>(
        &self,
        files: &[P],
        transition_duration: f64,
    ) -> CompositorResult<PathBuf> {
        self.execute(
            Operation::BlurCrossfade {
                files: to_paths(files),
                transition_duration,
            },
            None,
        )
        .await
    }

    pub async fn radial<P: AsRef<Path>>(
        &self,
        files: &[P],
        transition_duration: f64,
    ) -> CompositorResult<PathBuf> {
        self.execute(
            Operation::Radial {
                files: to_paths(files),
                transition_duration,
            },
            None,
        )
        .await
    }

    pub async fn circle<P: AsRef<Path>>(
        &self,
        files: &[P],
        transition_duration: f64,
    ) -> CompositorResult<PathBuf> {
        self.execute(
            Operation::Circle {
                files: to_paths(files),
                transition_duration,
            },
            None,
        )
        .await
    }

    pub async fn ken_burns_image<P: AsRef<Path>>(
        &self,
        image: P,
        audio: P,
        zoom_type: ZoomType,
    ) -> CompositorResult<PathBuf> {
        self.execute(
            Operation::KenBurnsImage {
                image: image.as_ref().to_path_buf(),
                audio: audio.as_ref().to_path_buf(),
                zoom_type,
            },
            None,
        )
        .await
    }

    pub async fn ken_burns_video<P: AsRef<Path>>(
        &self,
        video: P,
        zoom_type: ZoomType,
        aspect_ratio: AspectRatio,
    ) -> CompositorResult<PathBuf> {
        self.execute(
            Operation::KenBurnsVideo {
                video: video.as_ref().to_path_buf(),
                zoom_type,
                aspect_ratio,
            },
            None,
        )
        .await
    }
}

fn to_paths<P: AsRef<Path>>(files: &[P]) -> Vec<PathBuf> {
    files.iter().map(|f| f.as_ref().to_path_buf()).collect()
}
