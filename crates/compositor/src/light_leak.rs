//! Light-leak transitions
//!
//! A fade between clips with an overlay asset (lens flare footage) blended on
//! top in `lighten` mode. The overlay is retimed to span its window exactly:
//! it starts shortly before the transition and ends with it, padded with black
//! (and silence) everywhere else so it lines up with the accumulated timeline.
//!
//! The batch form splits one overlay into a copy per junction and threads the
//! output of each junction into the next.

use crate::assemble::{inputs_for, Assembler};
use crate::error::{CompositorError, CompositorResult};
use crate::graph::{secs, FilterGraph, Pad, PadLabel};
use crate::job::{InputSpec, RenderJob};
use crate::probe::MediaDescriptor;
use crate::tempo::tempo_filter;
use crate::timing::{overlay_window, ChainTimeline, EffectFamily, OverlayWindow};
use crate::transitions::TransitionKind;

/// Durations every clip and the overlay must have before planning starts.
fn required_durations(
    clips: &[MediaDescriptor],
    overlay: &MediaDescriptor,
) -> CompositorResult<(Vec<f64>, f64)> {
    let durations = clips
        .iter()
        .enumerate()
        .map(|(i, clip)| clip.require_duration(&format!("clip {}", i + 1)))
        .collect::<CompositorResult<Vec<_>>>()?;
    let overlay_duration = overlay.require_duration("light-leak overlay")?;
    Ok((durations, overlay_duration))
}

impl Assembler {
    /// Clip A, clip B and an overlay, in that input order.
    pub fn plan_light_leak(
        &self,
        first: &MediaDescriptor,
        second: &MediaDescriptor,
        overlay: &MediaDescriptor,
        requested: f64,
    ) -> CompositorResult<RenderJob> {
        self.light_leak_chain(
            "light-leak",
            &[first.clone(), second.clone()],
            overlay,
            requested,
            EffectFamily::LightLeak,
        )
    }

    /// N clips followed by one overlay, which is split across the N-1 junctions.
    pub fn plan_batch_light_leak(
        &self,
        clips: &[MediaDescriptor],
        overlay: &MediaDescriptor,
        requested: f64,
    ) -> CompositorResult<RenderJob> {
        self.light_leak_chain(
            "batch-light-leak",
            clips,
            overlay,
            requested,
            EffectFamily::BatchLightLeak,
        )
    }

    fn light_leak_chain(
        &self,
        operation: &str,
        clips: &[MediaDescriptor],
        overlay: &MediaDescriptor,
        requested: f64,
        family: EffectFamily,
    ) -> CompositorResult<RenderJob> {
        if clips.len() < 2 {
            return Err(CompositorError::invalid(format!(
                "{} needs at least 2 clips and an overlay",
                operation
            )));
        }

        let (durations, overlay_duration) = required_durations(clips, overlay)?;
        let timeline = ChainTimeline::plan(
            TransitionKind::LightLeak,
            &durations,
            requested,
            family,
            self.canvas.frame_seconds(),
        );
        let junctions = timeline.junctions.len();
        let overlay_index = clips.len();

        let mut graph = FilterGraph::new();
        let videos: Vec<PadLabel> = (0..clips.len())
            .map(|i| self.normalize_video(&mut graph, i))
            .collect();
        let audios: Vec<PadLabel> = clips
            .iter()
            .enumerate()
            .map(|(i, clip)| self.normalize_audio(&mut graph, i, clip))
            .collect();

        let overlay_base = self.normalize_video(&mut graph, overlay_index);
        let overlay_copies = split(&mut graph, overlay_base, junctions, "split", "lk");
        let overlay_audio = overlay.has_audio.then(|| {
            let formatted = graph.chain(
                [Pad::audio(overlay_index)],
                format!("{},asetpts=PTS-STARTPTS", self.audio_format()),
                "la",
            );
            split(&mut graph, formatted, junctions, "asplit", "la")
        });

        let mut videos = videos.into_iter();
        let mut audios = audios.into_iter();
        let (Some(mut video), Some(mut audio)) = (videos.next(), audios.next()) else {
            return Err(CompositorError::invalid(format!("{} needs at least 2 clips", operation)));
        };
        let mut overlay_audio = overlay_audio.map(Vec::into_iter);

        for (i, ((junction, copy), (next_video, next_audio))) in timeline
            .junctions
            .iter()
            .zip(overlay_copies)
            .zip(videos.zip(audios))
            .enumerate()
        {
            let window = overlay_window(junction, overlay_duration);
            // The xfade output runs this far past the transition end.
            let tail = (durations[i + 1] - junction.safe_duration).max(0.0);

            let base = graph.chain(
                [video, next_video],
                format!(
                    "xfade=transition=fade:duration={}:offset={},format=gbrp",
                    secs(junction.safe_duration),
                    secs(junction.offset)
                ),
                "lx",
            );
            let leak = graph.chain([copy], self.retime_overlay(&window, tail), "lk");
            video = graph.chain(
                [base, leak],
                format!("blend=all_mode=lighten,format={}", self.canvas.pix_fmt),
                "lb",
            );

            audio = graph.chain(
                [audio, next_audio],
                format!("acrossfade=d={}:c1=tri:c2=tri", secs(junction.safe_duration)),
                "ax",
            );
            if let Some(copies) = overlay_audio.as_mut() {
                if let Some(leak_audio) = copies.next() {
                    let shifted = graph.chain([leak_audio], retime_overlay_audio(&window), "la");
                    audio = graph.chain(
                        [audio, shifted],
                        "amix=inputs=2:duration=first:dropout_transition=0:normalize=0",
                        "am",
                    );
                }
            }
        }

        Ok(RenderJob::new(operation, inputs_for_with_overlay(clips, overlay), graph)
            .map(video)
            .map(audio)
            .with_output(self.standard_output())
            .expecting(timeline.total_duration()))
    }

    /// Compress or stretch the overlay into its window, then pad it with black
    /// so it starts at `window.start` and runs `tail` seconds past the end.
    fn retime_overlay(&self, window: &OverlayWindow, tail: f64) -> String {
        format!(
            "setpts=(PTS-STARTPTS)/{:.6},fps={},format=gbrp,tpad=start_mode=add:start_duration={}:stop_mode=add:stop_duration={}:color=black",
            window.speed,
            self.canvas.fps,
            secs(window.start),
            secs(tail)
        )
    }
}

fn retime_overlay_audio(window: &OverlayWindow) -> String {
    let delay_ms = (window.start * 1000.0).round() as u64;
    format!("{},adelay={delay_ms}|{delay_ms}", tempo_filter(window.speed))
}

/// One statement fanning `input` out into `copies` labels.
fn split(
    graph: &mut FilterGraph,
    input: PadLabel,
    copies: usize,
    filter: &str,
    prefix: &str,
) -> Vec<PadLabel> {
    let outputs: Vec<PadLabel> = (0..copies).map(|_| graph.label(prefix)).collect();
    graph.push([input], format!("{}={}", filter, copies), outputs.clone());
    outputs
}

fn inputs_for_with_overlay(clips: &[MediaDescriptor], overlay: &MediaDescriptor) -> Vec<InputSpec> {
    let mut inputs = inputs_for(clips);
    inputs.push(InputSpec::file(&overlay.path));
    inputs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompositorConfig;
    use std::path::PathBuf;

    fn media(name: &str, duration: f64, has_audio: bool) -> MediaDescriptor {
        MediaDescriptor {
            path: PathBuf::from(name),
            duration_seconds: duration,
            has_audio,
            ..MediaDescriptor::fallback(name)
        }
    }

    fn assembler() -> Assembler {
        Assembler::new(&CompositorConfig::default())
    }

    fn split_outputs(job: &RenderJob, filter: &str) -> Vec<usize> {
        job.graph
            .nodes()
            .iter()
            .filter(|n| n.stages().first() == Some(&filter))
            .map(|n| n.outputs.len())
            .collect()
    }

    #[test]
    fn single_pair_blends_once() {
        let job = assembler()
            .plan_light_leak(
                &media("a.mp4", 5.0, true),
                &media("b.mp4", 5.0, true),
                &media("leak.mp4", 4.4, false),
                2.0,
            )
            .unwrap();
        assert!(job.validate().is_ok());
        assert_eq!(job.inputs.len(), 3);
        assert_eq!(job.graph.count_filter("xfade"), 1);
        assert_eq!(job.graph.count_filter("blend"), 1);
        assert_eq!(job.graph.count_filter("amix"), 0);

        // safe 2.0, offset 3.0, window 2.8..5.0, speed 4.4 / 2.2
        let text = job.graph.to_filter_complex();
        assert!(text.contains("xfade=transition=fade:duration=2.000:offset=3.000"));
        assert!(text.contains("setpts=(PTS-STARTPTS)/2.000000"));
        assert!(text.contains("start_duration=2.800:stop_mode=add:stop_duration=3.000"));
        assert!(text.contains("blend=all_mode=lighten"));
        assert!((job.expected_duration.unwrap() - 8.0).abs() < 1e-9);
    }

    #[test]
    fn single_pair_caps_at_two_and_a_half_seconds() {
        let job = assembler()
            .plan_light_leak(
                &media("a.mp4", 10.0, true),
                &media("b.mp4", 10.0, true),
                &media("leak.mp4", 3.0, false),
                5.0,
            )
            .unwrap();
        assert!(job.graph.to_filter_complex().contains("duration=2.500:offset=7.500"));
    }

    #[test]
    fn batch_splits_overlay_per_junction() {
        let clips: Vec<MediaDescriptor> =
            (0..5).map(|i| media(&format!("{}.mp4", i), 4.0, true)).collect();
        let job = assembler()
            .plan_batch_light_leak(&clips, &media("leak.mp4", 2.0, true), 1.0)
            .unwrap();
        assert!(job.validate().is_ok());
        assert_eq!(job.inputs.len(), 6);

        assert_eq!(split_outputs(&job, "split"), vec![4]);
        assert_eq!(split_outputs(&job, "asplit"), vec![4]);
        assert_eq!(job.graph.count_filter("blend"), 4);
        assert_eq!(job.graph.count_filter("xfade"), 4);
        assert_eq!(job.graph.count_filter("amix"), 4);
        assert!(job.graph.to_filter_complex().contains("[5:a]"));
    }

    #[test]
    fn batch_uses_tighter_clamp() {
        let clips = vec![media("a.mp4", 3.0, true), media("b.mp4", 3.0, true)];
        let job = assembler()
            .plan_batch_light_leak(&clips, &media("leak.mp4", 2.0, false), 2.0)
            .unwrap();
        // min(2.0, 0.4 * 3.0, 1.5)
        assert!(job.graph.to_filter_complex().contains("duration=1.200:offset=1.800"));
    }

    #[test]
    fn overlay_audio_is_retimed_and_delayed() {
        let job = assembler()
            .plan_light_leak(
                &media("a.mp4", 5.0, true),
                &media("b.mp4", 5.0, false),
                &media("leak.mp4", 6.6, true),
                2.0,
            )
            .unwrap();
        assert!(job.validate().is_ok());
        let text = job.graph.to_filter_complex();
        assert!(text.contains("atempo=2.0,atempo=1.5,adelay=2800|2800"));
        assert!(text.contains("amix=inputs=2:duration=first:dropout_transition=0:normalize=0"));
    }

    #[test]
    fn missing_durations_fail_before_planning() {
        let result = assembler().plan_light_leak(
            &media("a.mp4", 5.0, true),
            &media("b.mp4", 0.0, true),
            &media("leak.mp4", 2.0, false),
            1.0,
        );
        assert!(matches!(result, Err(CompositorError::PreconditionFailed(_))));

        let result = assembler().plan_batch_light_leak(
            &[media("a.mp4", 5.0, true), media("b.mp4", 5.0, true)],
            &media("leak.mp4", 0.0, false),
            1.0,
        );
        assert!(matches!(result, Err(CompositorError::PreconditionFailed(_))));
    }
}
