//! Compositor CLI
//!
//! One subcommand per composition operation, plus `request` for JSON requests
//! and `probe` for inspecting what the engine sees in a file.

mod commands;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use compositor::{
    AspectRatio, NamedFilter, Operation, OutputFormat, TransitionKind, WatermarkPosition,
    ZoomParams, ZoomType,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Compositor - render edits with ffmpeg
#[derive(Parser)]
#[command(name = "compose")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Compose clips, transitions and Ken Burns motion into one render")]
#[command(long_about = r#"
Each subcommand plans a single ffmpeg filter graph from the probed inputs and
runs it once. Results land in the configured output directory as
<operation>-<timestamp>.<ext> unless --output is given.

Examples:
  compose concat a.mp4 b.mp4 c.mp4 --transition fade --duration 1.5
  compose light-leak a.mp4 b.mp4 leak.mov --duration 2
  compose ken-burns-image photo.jpg narration.mp3 --zoom-type zoom-out
  compose request edit.json
"#)]
struct Cli {
    /// Config file (defaults to ~/.compositor/config.toml)
    #[arg(short, long, env = "COMPOSITOR_CONFIG")]
    config: Option<PathBuf>,

    /// Explicit output path
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Re-encode into another container
    Convert {
        input: PathBuf,
        /// mp4, mov, mkv, webm, avi, gif, mp3 or wav
        #[arg(short, long)]
        format: OutputFormat,
    },

    /// Fit into a box, letterboxed
    Resize {
        input: PathBuf,
        #[arg(long)]
        width: u32,
        #[arg(long)]
        height: u32,
    },

    /// Cut a section out of a clip
    Trim {
        input: PathBuf,
        #[arg(long, default_value = "0")]
        start: f64,
        #[arg(long)]
        duration: f64,
    },

    /// Apply a named look
    Filter {
        input: PathBuf,
        /// grayscale, sepia, blur, sharpen, vintage, negate, vignette,
        /// brighten, contrast, mirror, flip
        filter: NamedFilter,
    },

    /// Grab one frame as JPEG
    Thumbnail {
        input: PathBuf,
        #[arg(long, default_value = "1")]
        timestamp: f64,
    },

    /// Stamp an image over a clip
    Watermark {
        input: PathBuf,
        overlay: PathBuf,
        #[arg(long, default_value = "bottom-right")]
        position: WatermarkPosition,
    },

    /// Join clips, optionally with a transition at every junction
    Concat {
        #[arg(required = true, num_args = 2..)]
        files: Vec<PathBuf>,
        #[arg(short, long, default_value = "none")]
        transition: TransitionKind,
        #[arg(short, long, default_value = "1")]
        duration: f64,
    },

    /// Change playback speed by factor or to a target length
    Speed {
        input: PathBuf,
        #[arg(long, conflicts_with = "target", required_unless_present = "target")]
        factor: Option<f64>,
        /// Target duration in seconds
        #[arg(long)]
        target: Option<f64>,
    },

    /// Animated zoom toward a focus point
    Zoom {
        input: PathBuf,
        #[arg(long, default_value = "1")]
        start_zoom: f64,
        #[arg(long, default_value = "1.5")]
        end_zoom: f64,
        #[arg(long, default_value = "0.5")]
        focus_x: f64,
        #[arg(long, default_value = "0.5")]
        focus_y: f64,
    },

    /// Lay an audio track over a video
    Merge {
        video: PathBuf,
        audio: PathBuf,
        /// Seconds; negative skips into the audio
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        offset: f64,
    },

    /// Fade two clips with a light-leak overlay (clip, clip, overlay)
    LightLeak {
        #[arg(required = true, num_args = 3)]
        files: Vec<PathBuf>,
        #[arg(short, long, default_value = "1")]
        duration: f64,
    },

    /// Light leak at every junction (clips..., overlay)
    BatchLightLeak {
        #[arg(required = true, num_args = 3..)]
        files: Vec<PathBuf>,
        #[arg(short, long, default_value = "1")]
        duration: f64,
    },

    /// Two-clip transition
    Transition {
        /// zoom-in, zoom-out, blur, radial or circle
        kind: PairTransition,
        first: PathBuf,
        second: PathBuf,
        #[arg(short, long, default_value = "1")]
        duration: f64,
    },

    /// Still image animated for the length of an audio track
    KenBurnsImage {
        image: PathBuf,
        audio: PathBuf,
        #[arg(long, default_value = "zoom-in")]
        zoom_type: ZoomType,
    },

    /// Motion over an existing clip, reframed to an aspect ratio
    KenBurnsVideo {
        video: PathBuf,
        #[arg(long, default_value = "zoom-in")]
        zoom_type: ZoomType,
        #[arg(long, default_value = "16:9")]
        aspect: AspectRatio,
    },

    /// Run a JSON request from a file, or stdin with `-`
    Request { path: PathBuf },

    /// Show what the engine reports for a file
    Probe { input: PathBuf },

    /// Show the effective configuration
    Config,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum PairTransition {
    ZoomIn,
    ZoomOut,
    Blur,
    Radial,
    Circle,
}

impl Commands {
    /// The composition this subcommand describes, if it is one.
    fn operation(&self) -> Option<Operation> {
        let op = match self {
            Commands::Convert { input, format } => Operation::Convert {
                input: input.clone(),
                format: *format,
            },
            Commands::Resize { input, width, height } => Operation::Resize {
                input: input.clone(),
                width: *width,
                height: *height,
            },
            Commands::Trim { input, start, duration } => Operation::Trim {
                input: input.clone(),
                start: *start,
                duration: *duration,
            },
            Commands::Filter { input, filter } => Operation::Filter {
                input: input.clone(),
                filter: *filter,
            },
            Commands::Thumbnail { input, timestamp } => Operation::Thumbnail {
                input: input.clone(),
                timestamp: *timestamp,
            },
            Commands::Watermark { input, overlay, position } => Operation::Watermark {
                input: input.clone(),
                overlay: overlay.clone(),
                position: *position,
            },
            Commands::Concat { files, transition, duration } => Operation::Concat {
                files: files.clone(),
                transition: *transition,
                transition_duration: *duration,
            },
            Commands::Speed { input, factor, target } => Operation::Speed {
                input: input.clone(),
                speed_factor: *factor,
                target_duration: *target,
            },
            Commands::Zoom {
                input,
                start_zoom,
                end_zoom,
                focus_x,
                focus_y,
            } => Operation::Zoom {
                input: input.clone(),
                zoom: ZoomParams {
                    start_zoom: *start_zoom,
                    end_zoom: *end_zoom,
                    focus_x: *focus_x,
                    focus_y: *focus_y,
                },
            },
            Commands::Merge { video, audio, offset } => Operation::Merge {
                video: video.clone(),
                audio: audio.clone(),
                audio_offset: *offset,
            },
            Commands::LightLeak { files, duration } => Operation::LightLeak {
                files: files.clone(),
                transition_duration: *duration,
            },
            Commands::BatchLightLeak { files, duration } => Operation::BatchLightLeak {
                files: files.clone(),
                transition_duration: *duration,
            },
            Commands::Transition {
                kind,
                first,
                second,
                duration,
            } => {
                let files = vec![first.clone(), second.clone()];
                let transition_duration = *duration;
                match kind {
                    PairTransition::ZoomIn => Operation::ZoomInTransition {
                        files,
                        transition_duration,
                    },
                    PairTransition::ZoomOut => Operation::ZoomOutTransition {
                        files,
                        transition_duration,
                    },
                    PairTransition::Blur => Operation::BlurCrossfade {
                        files,
                        transition_duration,
                    },
                    PairTransition::Radial => Operation::Radial {
                        files,
                        transition_duration,
                    },
                    PairTransition::Circle => Operation::Circle {
                        files,
                        transition_duration,
                    },
                }
            }
            Commands::KenBurnsImage { image, audio, zoom_type } => Operation::KenBurnsImage {
                image: image.clone(),
                audio: audio.clone(),
                zoom_type: *zoom_type,
            },
            Commands::KenBurnsVideo { video, zoom_type, aspect } => Operation::KenBurnsVideo {
                video: video.clone(),
                zoom_type: *zoom_type,
                aspect_ratio: *aspect,
            },
            Commands::Request { .. } | Commands::Probe { .. } | Commands::Config => return None,
        };
        Some(op)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    format!("compositor={},compose={},warn", log_level, log_level).into()
                }),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();

    let config = compositor::CompositorConfig::load(cli.config.as_deref())?;

    if let Some(operation) = cli.command.operation() {
        return commands::compose(&config, operation, cli.output, cli.json).await;
    }

    match cli.command {
        Commands::Request { path } => {
            commands::run_request(&config, &path, cli.output, cli.json).await
        }
        Commands::Probe { input } => commands::probe(&config, &input).await,
        Commands::Config => commands::show_config(&config),
        _ => Ok(()),
    }
}
