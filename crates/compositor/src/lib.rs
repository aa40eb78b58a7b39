//! # Compositor - media composition engine
//!
//! Turns high-level edit requests (concatenate with transitions, light-leak
//! blends, Ken Burns motion, merges, conversions) into a single validated
//! ffmpeg filter graph and runs it. Timing is computed from probed durations so
//! transitions never overrun the clips they join.

pub mod assemble;
pub mod compositor;
pub mod config;
pub mod error;
pub mod executor;
pub mod graph;
pub mod job;
pub mod ken_burns;
pub mod light_leak;
pub mod output;
pub mod probe;
pub mod tempo;
pub mod timing;
pub mod transitions;

#[cfg(test)]
mod compositor_tests;

pub use assemble::{Assembler, NamedFilter, WatermarkPosition};
pub use compositor::{CompositionRequest, Compositor, Operation};
pub use config::CompositorConfig;
pub use error::{
    CompositionFailure, CompositionResult, CompositionSuccess, CompositorError, CompositorResult,
};
pub use executor::{FfmpegEngine, MediaEngine, RenderOutput, RenderProgress};
pub use graph::{FilterGraph, FilterNode, GraphError, Pad, PadLabel};
pub use job::{AudioCodec, OutputFormat, RenderJob, VideoCodec};
pub use ken_burns::{AspectRatio, ZoomParams, ZoomType};
pub use probe::{MediaDescriptor, MediaProber};
pub use timing::{EffectFamily, EffectiveTransition};
pub use transitions::TransitionKind;
