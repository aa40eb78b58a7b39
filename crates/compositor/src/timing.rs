//! Transition timing and zoom geometry
//!
//! Everything here is pure arithmetic over probed durations. Degenerate inputs
//! (zero durations from failed probes, NaN, negative requests) are replaced by
//! per-family fallback constants so nothing non-finite reaches a filter graph.

use serde::{Deserialize, Serialize};

use crate::transitions::TransitionKind;

/// Clamp constants per effect family. Batch light leaks use the tighter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectFamily {
    /// xfade variants: fade, wipes, slides, zooms, radial, circle, blur.
    Geometric,
    LightLeak,
    BatchLightLeak,
}

impl EffectFamily {
    /// Fraction of the shorter adjacent clip a transition may occupy.
    pub fn clip_ratio(&self) -> f64 {
        match self {
            EffectFamily::Geometric | EffectFamily::LightLeak => 0.8,
            EffectFamily::BatchLightLeak => 0.4,
        }
    }

    pub fn cap_seconds(&self) -> f64 {
        match self {
            EffectFamily::Geometric => 3.0,
            EffectFamily::LightLeak => 2.5,
            EffectFamily::BatchLightLeak => 1.5,
        }
    }

    pub fn fallback_seconds(&self) -> f64 {
        match self {
            EffectFamily::Geometric => 1.0,
            EffectFamily::LightLeak => 1.1,
            EffectFamily::BatchLightLeak => 0.8,
        }
    }
}

/// `min(requested, ratio × shorter clip, cap)`, or the family fallback when
/// that is not a positive finite number.
pub fn safe_duration(requested: f64, clip_a: f64, clip_b: f64, family: EffectFamily) -> f64 {
    let shorter = clip_a.min(clip_b);
    let value = requested
        .min(family.clip_ratio() * shorter)
        .min(family.cap_seconds());

    if value.is_finite() && value > 0.0 && requested.is_finite() && shorter.is_finite() {
        value
    } else {
        family.fallback_seconds()
    }
}

/// A transition resolved against its two clips. Computed once, never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffectiveTransition {
    pub kind: TransitionKind,
    pub requested_duration: f64,
    pub safe_duration: f64,
    /// Where the transition starts in the output timeline.
    pub offset: f64,
}

impl EffectiveTransition {
    pub fn end(&self) -> f64 {
        self.offset + self.safe_duration
    }
}

/// Two-clip case: the transition starts `safe` seconds before the first clip ends.
pub fn pair_transition(
    kind: TransitionKind,
    requested: f64,
    first: f64,
    second: f64,
    family: EffectFamily,
) -> EffectiveTransition {
    let safe = safe_duration(requested, first, second, family);
    EffectiveTransition {
        kind,
        requested_duration: requested,
        safe_duration: safe,
        offset: (first - safe).max(0.0),
    }
}

/// Offsets for an N-way xfade chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainTimeline {
    pub durations: Vec<f64>,
    pub junctions: Vec<EffectiveTransition>,
}

impl ChainTimeline {
    /// Each junction's offset is `cumulative + current − width`, where
    /// `cumulative` sums `(duration − width)` over earlier junctions. A width is
    /// also held under what is left of its clip after the previous transition,
    /// with one frame as the floor.
    pub fn plan(
        kind: TransitionKind,
        durations: &[f64],
        requested: f64,
        family: EffectFamily,
        frame_seconds: f64,
    ) -> Self {
        let mut junctions = Vec::with_capacity(durations.len().saturating_sub(1));
        let mut cumulative = 0.0;
        let mut previous_width = 0.0;

        for pair in durations.windows(2) {
            let (current, next) = (pair[0], pair[1]);
            let mut width = safe_duration(requested, current, next, family);
            let room = current - previous_width;
            if width > room {
                width = room.max(frame_seconds);
            }

            let offset = (cumulative + current - width).max(0.0);
            junctions.push(EffectiveTransition {
                kind,
                requested_duration: requested,
                safe_duration: width,
                offset,
            });

            cumulative += current - width;
            previous_width = width;
        }

        Self {
            durations: durations.to_vec(),
            junctions,
        }
    }

    pub fn overlap(&self) -> f64 {
        self.junctions.iter().map(|j| j.safe_duration).sum()
    }

    /// Rendered length: sum of clip durations minus total overlap.
    pub fn total_duration(&self) -> f64 {
        self.durations.iter().sum::<f64>() - self.overlap()
    }
}

/// Where a compressed light-leak overlay sits in the output timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OverlayWindow {
    pub start: f64,
    pub end: f64,
    /// Playback speed applied to the overlay so it spans `start..end`.
    pub speed: f64,
}

/// Fraction of the transition the overlay leads in by.
pub const OVERLAY_LEAD_RATIO: f64 = 0.1;

/// Start slightly before the transition (floored at 0) and finish exactly at
/// its end; the overlay asset is sped up or slowed down to fit.
pub fn overlay_window(transition: &EffectiveTransition, overlay_duration: f64) -> OverlayWindow {
    let start = (transition.offset - OVERLAY_LEAD_RATIO * transition.safe_duration).max(0.0);
    let end = transition.end();
    let span = end - start;

    let speed = overlay_duration / span;
    let speed = if speed.is_finite() && speed > 0.0 { speed } else { 1.0 };

    OverlayWindow { start, end, speed }
}

/// Number of frames in `duration` seconds, rounded up, never zero.
pub fn total_frames(duration: f64, fps: f64) -> u64 {
    let frames = (duration * fps).ceil();
    if frames.is_finite() && frames >= 1.0 {
        frames as u64
    } else {
        1
    }
}

/// Linear zoom from `start_zoom` to `end_zoom` over `total_frames` output frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomCurve {
    pub start_zoom: f64,
    pub end_zoom: f64,
    pub total_frames: u64,
}

impl ZoomCurve {
    pub fn new(start_zoom: f64, end_zoom: f64, duration: f64, fps: f64) -> Self {
        Self {
            start_zoom,
            end_zoom,
            total_frames: total_frames(duration, fps),
        }
    }

    pub fn zoom_at(&self, frame: u64) -> f64 {
        let t = frame.min(self.total_frames) as f64 / self.total_frames as f64;
        self.start_zoom + (self.end_zoom - self.start_zoom) * t
    }

    /// The same curve as a zoompan expression over the output frame number.
    pub fn zoom_expr(&self) -> String {
        if (self.end_zoom - self.start_zoom).abs() < 1e-9 {
            return format!("{:.6}", self.start_zoom);
        }
        format!(
            "{:.6}+({:.6})*min(on/{},1)",
            self.start_zoom,
            self.end_zoom - self.start_zoom,
            self.total_frames
        )
    }

    /// Pan offsets moving linearly from (0,0) to (1,1) of the free pan range.
    pub fn pan_exprs(&self) -> (String, String) {
        (
            format!("(iw-iw/zoom)*min(on/{},1)", self.total_frames),
            format!("(ih-ih/zoom)*min(on/{},1)", self.total_frames),
        )
    }
}

/// Crop offsets that keep a fixed focus point (0..1 of the frame) in view.
pub fn focus_exprs(focus_x: f64, focus_y: f64) -> (String, String) {
    (
        format!("(iw-iw/zoom)*{:.4}", focus_x.clamp(0.0, 1.0)),
        format!("(ih-ih/zoom)*{:.4}", focus_y.clamp(0.0, 1.0)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: f64 = 1.0 / 30.0;

    fn fade_chain(durations: &[f64], requested: f64) -> ChainTimeline {
        ChainTimeline::plan(
            TransitionKind::Fade,
            durations,
            requested,
            EffectFamily::Geometric,
            FRAME,
        )
    }

    #[test]
    fn two_clip_fade_example() {
        let t = pair_transition(TransitionKind::Fade, 2.0, 5.0, 4.0, EffectFamily::Geometric);
        assert_eq!(t.safe_duration, 2.0);
        assert_eq!(t.offset, 3.0);

        let chain = fade_chain(&[5.0, 4.0], 2.0);
        assert!((chain.total_duration() - 7.0).abs() < 1e-9);
    }

    #[test]
    fn clamps_to_shorter_clip_and_cap() {
        assert!((safe_duration(5.0, 10.0, 2.0, EffectFamily::Geometric) - 1.6).abs() < 1e-9);
        assert_eq!(safe_duration(5.0, 10.0, 10.0, EffectFamily::Geometric), 3.0);
        assert_eq!(safe_duration(5.0, 10.0, 10.0, EffectFamily::LightLeak), 2.5);
        assert_eq!(safe_duration(5.0, 10.0, 10.0, EffectFamily::BatchLightLeak), 1.5);
        assert!((safe_duration(5.0, 2.0, 3.0, EffectFamily::BatchLightLeak) - 0.8).abs() < 1e-9);
    }

    #[test]
    fn degenerate_durations_use_fallback() {
        assert_eq!(safe_duration(2.0, 0.0, 4.0, EffectFamily::Geometric), 1.0);
        assert_eq!(safe_duration(f64::NAN, 4.0, 4.0, EffectFamily::LightLeak), 1.1);
        assert_eq!(safe_duration(-1.0, 4.0, 4.0, EffectFamily::BatchLightLeak), 0.8);
    }

    #[test]
    fn safe_duration_stays_within_bounds() {
        let durations = [0.3, 0.9, 1.0, 2.5, 4.0, 7.5, 12.0];
        for &a in &durations {
            for &b in &durations {
                for requested in [0.1, 0.5, 1.0, 2.0, 5.0] {
                    let safe = safe_duration(requested, a, b, EffectFamily::Geometric);
                    assert!(safe > 0.0);
                    assert!(safe <= 0.8 * a.min(b) + 1e-12, "{} for {}/{}", safe, a, b);
                }
            }
        }
    }

    #[test]
    fn chain_offsets_accumulate() {
        let chain = fade_chain(&[5.0, 4.0, 6.0], 1.0);
        assert_eq!(chain.junctions.len(), 2);
        assert!((chain.junctions[0].offset - 4.0).abs() < 1e-9);
        assert!((chain.junctions[1].offset - 7.0).abs() < 1e-9);
        assert!((chain.total_duration() - 13.0).abs() < 1e-9);
    }

    #[test]
    fn chain_width_respects_previous_transition() {
        // The middle clip cannot host two 0.8s transitions.
        let chain = fade_chain(&[4.0, 1.0, 4.0], 3.0);
        let first = chain.junctions[0].safe_duration;
        let second = chain.junctions[1].safe_duration;
        assert!((first - 0.8).abs() < 1e-9);
        assert!(first + second <= 1.0 + 1e-9);
        assert!(chain.junctions[1].offset >= chain.junctions[0].end() - 1e-9);
    }

    #[test]
    fn overlay_window_ends_at_transition_end() {
        let t = pair_transition(TransitionKind::LightLeak, 2.0, 5.0, 5.0, EffectFamily::LightLeak);
        let window = overlay_window(&t, 4.4);
        assert!((window.start - 2.8).abs() < 1e-9);
        assert!((window.end - 5.0).abs() < 1e-9);
        assert!((window.speed - 2.0).abs() < 1e-9);
    }

    #[test]
    fn overlay_window_floors_start() {
        let t = EffectiveTransition {
            kind: TransitionKind::LightLeak,
            requested_duration: 1.0,
            safe_duration: 1.0,
            offset: 0.0,
        };
        let window = overlay_window(&t, 0.0);
        assert_eq!(window.start, 0.0);
        assert_eq!(window.speed, 1.0);
    }

    #[test]
    fn zoom_curve_interpolates_linearly() {
        let curve = ZoomCurve::new(1.0, 1.3, 5.0, 30.0);
        assert_eq!(curve.total_frames, 150);
        assert_eq!(curve.zoom_at(0), 1.0);
        assert!((curve.zoom_at(75) - 1.15).abs() < 1e-9);
        assert!((curve.zoom_at(150) - 1.3).abs() < 1e-9);
        assert!((curve.zoom_at(400) - 1.3).abs() < 1e-9);
        assert_eq!(curve.zoom_expr(), "1.000000+(0.300000)*min(on/150,1)");
    }

    #[test]
    fn total_frames_rounds_up() {
        assert_eq!(total_frames(2.01, 30.0), 61);
        assert_eq!(total_frames(0.0, 30.0), 1);
    }
}
