//! Zoom and Ken Burns graphs
//!
//! zoompan rounds its crop window to whole pixels on every frame. Run at
//! delivery resolution that rounding shows up as judder, so every zoom here is
//! computed on a supersampled canvas (4x for stills, 2x for video) and scaled
//! down afterwards.

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::assemble::{Assembler, FIRST_AUDIO};
use crate::error::{CompositorError, CompositorResult};
use crate::graph::{FilterGraph, Pad, PadLabel};
use crate::job::{InputSpec, MapTarget, RenderJob};
use crate::probe::MediaDescriptor;
use crate::timing::{focus_exprs, ZoomCurve};

pub const IMAGE_SUPERSAMPLE: u32 = 4;
pub const VIDEO_SUPERSAMPLE: u32 = 2;

/// Incoming clip of a zoom-out transition starts this far in.
pub const ZOOM_OUT_TRANSITION_START: f64 = 1.5;

const CENTER_X: &str = "iw/2-(iw/zoom/2)";
const CENTER_Y: &str = "ih/2-(ih/zoom/2)";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum ZoomType {
    #[default]
    ZoomIn,
    ZoomOut,
    /// Constant zoom, diagonal drift.
    Pan,
}

impl ZoomType {
    pub fn zoom_range(&self) -> (f64, f64) {
        match self {
            ZoomType::ZoomIn => (1.0, 1.3),
            ZoomType::ZoomOut => (1.3, 1.0),
            ZoomType::Pan => (1.2, 1.2),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "16:9")]
    #[strum(serialize = "16:9")]
    Landscape,

    #[serde(rename = "9:16")]
    #[strum(serialize = "9:16")]
    Portrait,

    #[serde(rename = "1:1")]
    #[strum(serialize = "1:1")]
    Square,

    #[serde(rename = "4:5")]
    #[strum(serialize = "4:5")]
    Vertical,
}

impl AspectRatio {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            AspectRatio::Landscape => (1920, 1080),
            AspectRatio::Portrait => (1080, 1920),
            AspectRatio::Square => (1080, 1080),
            AspectRatio::Vertical => (1080, 1350),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZoomParams {
    pub start_zoom: f64,
    pub end_zoom: f64,
    /// Point kept in view, as a fraction of frame width.
    #[serde(default = "default_focus")]
    pub focus_x: f64,
    #[serde(default = "default_focus")]
    pub focus_y: f64,
}

fn default_focus() -> f64 {
    0.5
}

impl Default for ZoomParams {
    fn default() -> Self {
        Self {
            start_zoom: 1.0,
            end_zoom: 1.5,
            focus_x: default_focus(),
            focus_y: default_focus(),
        }
    }
}

impl ZoomParams {
    pub fn validate(&self) -> CompositorResult<()> {
        for (name, zoom) in [("startZoom", self.start_zoom), ("endZoom", self.end_zoom)] {
            if !zoom.is_finite() || zoom < 1.0 {
                return Err(CompositorError::invalid(format!(
                    "{} must be a number >= 1.0, got {}",
                    name, zoom
                )));
            }
        }
        if !self.focus_x.is_finite() || !self.focus_y.is_finite() {
            return Err(CompositorError::invalid("focus point must be finite"));
        }
        Ok(())
    }
}

fn zoompan(
    z: &str,
    x: &str,
    y: &str,
    frames_per_input: u64,
    width: u32,
    height: u32,
    fps: u32,
) -> String {
    format!(
        "zoompan=z='{}':x='{}':y='{}':d={}:s={}x{}:fps={}",
        z, x, y, frames_per_input, width, height, fps
    )
}

impl Assembler {
    /// Zoom the head of an already normalized clip from 1.5x back to 1.0x over
    /// `window` seconds, then hold. Fed into a plain fade this reads as a
    /// zoom-out transition.
    pub fn zoom_out_head(&self, graph: &mut FilterGraph, clip: PadLabel, window: f64) -> PadLabel {
        let (w, h, fps) = (self.canvas.width, self.canvas.height, self.canvas.fps);
        let (big_w, big_h) = (w * VIDEO_SUPERSAMPLE, h * VIDEO_SUPERSAMPLE);
        let curve = ZoomCurve::new(ZOOM_OUT_TRANSITION_START, 1.0, window, fps as f64);

        graph.chain(
            [clip],
            format!(
                "scale={big_w}:{big_h},{},scale={w}:{h}:flags=lanczos,setsar=1,format={}",
                zoompan(&curve.zoom_expr(), CENTER_X, CENTER_Y, 1, big_w, big_h, fps),
                self.canvas.pix_fmt
            ),
            "vz",
        )
    }

    /// Linear zoom across the whole clip around a fixed focus point.
    pub fn plan_zoom(
        &self,
        source: &MediaDescriptor,
        params: &ZoomParams,
    ) -> CompositorResult<RenderJob> {
        let duration = source.require_duration("zoom source")?;
        let (w, h, fps) = (self.canvas.width, self.canvas.height, self.canvas.fps);
        let (big_w, big_h) = (w * VIDEO_SUPERSAMPLE, h * VIDEO_SUPERSAMPLE);
        let curve = ZoomCurve::new(params.start_zoom, params.end_zoom, duration, fps as f64);
        let (x, y) = focus_exprs(params.focus_x, params.focus_y);

        let mut graph = FilterGraph::new();
        let base = self.normalize_video(&mut graph, 0);
        let video = graph.chain(
            [base],
            format!(
                "scale={big_w}:{big_h},{},scale={w}:{h}:flags=lanczos,setsar=1,format={}",
                zoompan(&curve.zoom_expr(), &x, &y, 1, big_w, big_h, fps),
                self.canvas.pix_fmt
            ),
            "v",
        );

        Ok(RenderJob::new("zoom", vec![InputSpec::file(&source.path)], graph)
            .map(video)
            .map(MapTarget::Stream(FIRST_AUDIO.to_string()))
            .with_output(self.standard_output())
            .expecting(duration))
    }

    /// A still image driven for exactly the length of its audio track.
    pub fn plan_ken_burns_image(
        &self,
        image: &MediaDescriptor,
        audio: &MediaDescriptor,
        zoom_type: ZoomType,
    ) -> CompositorResult<RenderJob> {
        let duration = audio.require_duration("audio track")?;
        let (w, h, fps) = (self.canvas.width, self.canvas.height, self.canvas.fps);
        let (big_w, big_h) = (w * IMAGE_SUPERSAMPLE, h * IMAGE_SUPERSAMPLE);

        let (start, end) = zoom_type.zoom_range();
        let curve = ZoomCurve::new(start, end, duration, fps as f64);
        let (x, y) = self.pan_exprs(zoom_type, &curve);

        let mut graph = FilterGraph::new();
        // One input frame expanded to every output frame.
        let video = graph.chain(
            [Pad::video(0)],
            format!(
                "scale={big_w}:{big_h}:force_original_aspect_ratio=increase,crop={big_w}:{big_h},setsar=1,{},scale={w}:{h}:flags=lanczos,format={}",
                zoompan(&curve.zoom_expr(), &x, &y, curve.total_frames, big_w, big_h, fps),
                self.canvas.pix_fmt
            ),
            "v",
        );
        let sound = self.normalize_audio(&mut graph, 1, audio);

        let mut output = self.standard_output();
        output.duration_limit = Some(duration);

        Ok(RenderJob::new(
            "ken-burns-image",
            vec![InputSpec::file(&image.path), InputSpec::file(&audio.path)],
            graph,
        )
        .map(video)
        .map(sound)
        .with_output(output)
        .expecting(duration))
    }

    /// Reframe a clip to `aspect` and drift across it.
    pub fn plan_ken_burns_video(
        &self,
        video: &MediaDescriptor,
        zoom_type: ZoomType,
        aspect: AspectRatio,
    ) -> CompositorResult<RenderJob> {
        let duration = video.require_duration("video")?;
        let (w, h) = aspect.dimensions();
        let fps = self.canvas.fps;
        let (big_w, big_h) = (w * VIDEO_SUPERSAMPLE, h * VIDEO_SUPERSAMPLE);

        let (start, end) = zoom_type.zoom_range();
        let curve = ZoomCurve::new(start, end, duration, fps as f64);
        let (x, y) = self.pan_exprs(zoom_type, &curve);

        let mut graph = FilterGraph::new();
        let framed = graph.chain(
            [Pad::video(0)],
            format!(
                "scale={big_w}:{big_h}:force_original_aspect_ratio=increase,crop={big_w}:{big_h},setsar=1,fps={fps},{},scale={w}:{h}:flags=lanczos,format={}",
                zoompan(&curve.zoom_expr(), &x, &y, 1, big_w, big_h, fps),
                self.canvas.pix_fmt
            ),
            "v",
        );
        let sound = self.normalize_audio(&mut graph, 0, video);

        Ok(RenderJob::new("ken-burns-video", vec![InputSpec::file(&video.path)], graph)
            .map(framed)
            .map(sound)
            .with_output(self.standard_output())
            .expecting(duration))
    }

    fn pan_exprs(&self, zoom_type: ZoomType, curve: &ZoomCurve) -> (String, String) {
        match zoom_type {
            ZoomType::Pan => curve.pan_exprs(),
            ZoomType::ZoomIn | ZoomType::ZoomOut => (CENTER_X.to_string(), CENTER_Y.to_string()),
        }
    }
}
