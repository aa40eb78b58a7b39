#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::{json, Value};
    use tokio::sync::{mpsc, Barrier};

    use crate::compositor::{CompositionRequest, Compositor, Operation};
    use crate::config::CompositorConfig;
    use crate::error::{CompositorError, CompositorResult};
    use crate::executor::{MediaEngine, RenderOutput, RenderProgress};
    use crate::job::RenderJob;
    use crate::ken_burns::ZoomType;
    use crate::transitions::TransitionKind;

    /// Canned probe answers keyed by file name; records every render it is given.
    #[derive(Default)]
    struct FakeEngine {
        media: HashMap<String, (f64, bool)>,
        rendered: Mutex<Vec<RenderJob>>,
        probes: Mutex<usize>,
        fail_with: Option<String>,
        probe_barrier: Option<Arc<Barrier>>,
    }

    impl FakeEngine {
        fn with(mut self, name: &str, duration: f64, has_audio: bool) -> Self {
            self.media.insert(name.to_string(), (duration, has_audio));
            self
        }

        fn failing(mut self, stderr: &str) -> Self {
            self.fail_with = Some(stderr.to_string());
            self
        }

        /// Every probe waits until `parties` probes are in flight at once.
        fn probing_together(mut self, parties: usize) -> Self {
            self.probe_barrier = Some(Arc::new(Barrier::new(parties)));
            self
        }

        fn jobs(&self) -> Vec<RenderJob> {
            self.rendered.lock().unwrap().clone()
        }

        fn probe_count(&self) -> usize {
            *self.probes.lock().unwrap()
        }
    }

    #[async_trait]
    impl MediaEngine for FakeEngine {
        async fn probe_json(&self, path: &Path) -> CompositorResult<Value> {
            *self.probes.lock().unwrap() += 1;
            if let Some(barrier) = &self.probe_barrier {
                barrier.wait().await;
            }
            let name = path.to_string_lossy().to_string();
            let Some((duration, has_audio)) = self.media.get(&name) else {
                return Err(CompositorError::FileNotFound(path.to_path_buf()));
            };

            let mut streams = vec![json!({
                "codec_type": "video",
                "width": 1280,
                "height": 720,
                "r_frame_rate": "30/1"
            })];
            if *has_audio {
                streams.push(json!({ "codec_type": "audio" }));
            }
            Ok(json!({
                "format": { "duration": duration.to_string() },
                "streams": streams
            }))
        }

        async fn render(
            &self,
            job: &RenderJob,
            progress: Option<mpsc::Sender<RenderProgress>>,
        ) -> CompositorResult<RenderOutput> {
            self.rendered.lock().unwrap().push(job.clone());
            if let Some(stderr) = &self.fail_with {
                return Err(CompositorError::Process {
                    message: "ffmpeg exited with code 1".to_string(),
                    exit_code: Some(1),
                    stdout: String::new(),
                    stderr: stderr.clone(),
                });
            }
            if let Some(tx) = progress {
                let _ = tx.try_send(RenderProgress {
                    percent: Some(100.0),
                    timemark: "00:00:01.00".to_string(),
                    elapsed_seconds: 0.1,
                    frame: None,
                    speed: None,
                });
            }
            Ok(RenderOutput::default())
        }
    }

    fn setup(engine: FakeEngine) -> (Compositor, Arc<FakeEngine>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = CompositorConfig {
            output_dir: dir.path().to_path_buf(),
            ..CompositorConfig::default()
        };
        let engine = Arc::new(engine);
        let compositor = Compositor::with_engine(&config, engine.clone());
        (compositor, engine, dir)
    }

    #[tokio::test]
    async fn fade_between_two_clips_uses_safe_duration() {
        let (compositor, engine, dir) = setup(
            FakeEngine::default()
                .with("a.mp4", 5.0, true)
                .with("b.mp4", 4.0, true),
        );

        let output = compositor
            .concat(&["a.mp4", "b.mp4"], TransitionKind::Fade, 2.0)
            .await
            .unwrap();
        assert!(output.starts_with(dir.path()));

        let jobs = engine.jobs();
        assert_eq!(jobs.len(), 1);
        let text = jobs[0].graph.to_filter_complex();
        assert!(text.contains("xfade=transition=fade:duration=2.000:offset=3.000"));
        assert!((jobs[0].expected_duration.unwrap() - 7.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn hard_cut_keeps_full_length() {
        let (compositor, engine, _dir) = setup(
            FakeEngine::default()
                .with("a.mp4", 3.0, true)
                .with("b.mp4", 2.5, false)
                .with("c.mp4", 4.0, true),
        );

        compositor
            .concat(&["a.mp4", "b.mp4", "c.mp4"], TransitionKind::None, 1.0)
            .await
            .unwrap();

        let job = &engine.jobs()[0];
        assert_eq!(job.graph.count_filter("concat"), 1);
        assert_eq!(job.graph.count_filter("anullsrc"), 1);
        assert!((job.expected_duration.unwrap() - 9.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn input_metadata_is_read_concurrently() {
        let (compositor, engine, _dir) = setup(
            FakeEngine::default()
                .with("a.mp4", 3.0, true)
                .with("b.mp4", 3.0, true)
                .with("c.mp4", 3.0, true)
                .probing_together(3),
        );

        let composed = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            compositor.concat(&["a.mp4", "b.mp4", "c.mp4"], TransitionKind::None, 1.0),
        )
        .await;
        assert!(composed.expect("probes ran one after another").is_ok());
        assert_eq!(engine.probe_count(), 3);
    }

    #[tokio::test]
    async fn too_few_files_are_rejected_before_probing() {
        let (compositor, engine, _dir) = setup(FakeEngine::default().with("a.mp4", 5.0, true));

        let err = compositor
            .concat(&["a.mp4"], TransitionKind::Fade, 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, CompositorError::InvalidRequest(_)));

        let err = compositor
            .light_leak(&["a.mp4", "a.mp4"], 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, CompositorError::InvalidRequest(_)));

        let err = compositor
            .radial(&["a.mp4", "a.mp4", "a.mp4"], 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, CompositorError::InvalidRequest(_)));

        assert_eq!(engine.probe_count(), 0);
        assert!(engine.jobs().is_empty());
    }

    #[tokio::test]
    async fn ken_burns_without_audio_duration_never_renders() {
        let (compositor, engine, _dir) = setup(FakeEngine::default().with("photo.jpg", 0.0, false));

        let err = compositor
            .ken_burns_image("photo.jpg", "missing.mp3", ZoomType::ZoomIn)
            .await
            .unwrap_err();
        assert!(matches!(err, CompositorError::PreconditionFailed(_)));
        assert_eq!(engine.probe_count(), 2);
        assert!(engine.jobs().is_empty());
    }

    #[tokio::test]
    async fn merge_is_bounded_by_shorter_stream() {
        let (compositor, engine, _dir) = setup(
            FakeEngine::default()
                .with("video.mp4", 10.0, true)
                .with("voice.mp3", 6.0, true),
        );

        compositor.merge("video.mp4", "voice.mp3", 0.4).await.unwrap();

        let job = &engine.jobs()[0];
        assert_eq!(job.output.duration_limit, Some(6.0));
        assert!(job.output.shortest);
        assert!(job.graph.to_filter_complex().contains("adelay=400|400"));
    }

    #[tokio::test]
    async fn batch_light_leak_splits_overlay_across_junctions() {
        let (compositor, engine, _dir) = setup(
            FakeEngine::default()
                .with("1.mp4", 4.0, true)
                .with("2.mp4", 4.0, true)
                .with("3.mp4", 4.0, true)
                .with("4.mp4", 4.0, true)
                .with("leak.mp4", 2.0, false),
        );

        compositor
            .batch_light_leak(&["1.mp4", "2.mp4", "3.mp4", "4.mp4", "leak.mp4"], 1.0)
            .await
            .unwrap();

        let job = &engine.jobs()[0];
        assert_eq!(job.inputs.len(), 5);
        assert_eq!(job.graph.count_filter("blend"), 3);
        assert_eq!(job.graph.count_filter("split"), 1);
        assert!(job.graph.to_filter_complex().contains("split=3"));
    }

    #[tokio::test]
    async fn light_leak_concat_treats_last_file_as_overlay() {
        let (compositor, engine, _dir) = setup(
            FakeEngine::default()
                .with("a.mp4", 5.0, true)
                .with("b.mp4", 5.0, true)
                .with("leak.mp4", 2.0, false),
        );

        compositor
            .concat(&["a.mp4", "b.mp4", "leak.mp4"], TransitionKind::LightLeak, 1.0)
            .await
            .unwrap();

        let job = &engine.jobs()[0];
        assert_eq!(job.operation, "batch-light-leak");
        assert_eq!(job.graph.count_filter("blend"), 1);
    }

    #[tokio::test]
    async fn speed_to_target_duration_derives_factor() {
        let (compositor, engine, _dir) = setup(FakeEngine::default().with("clip.mp4", 12.0, true));

        compositor.speed_to_duration("clip.mp4", 4.0).await.unwrap();

        let job = &engine.jobs()[0];
        let text = job.graph.to_filter_complex();
        assert!(text.contains("atempo=2.0,atempo=1.5"));
        assert!((job.expected_duration.unwrap() - 4.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn output_names_follow_operation_and_extension() {
        let (compositor, _engine, dir) = setup(FakeEngine::default().with("clip.mp4", 3.0, true));

        let thumb = compositor.thumbnail("clip.mp4", 1.0).await.unwrap();
        let name = thumb.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("thumbnail-"));
        assert!(name.ends_with(".jpg"));
        assert_eq!(thumb.parent().unwrap(), dir.path());

        let first = compositor.resize("clip.mp4", 640, 360).await.unwrap();
        assert!(first.to_string_lossy().ends_with(".mp4"));
    }

    #[tokio::test]
    async fn concurrent_requests_get_distinct_outputs() {
        let (compositor, _engine, _dir) = setup(FakeEngine::default().with("clip.mp4", 3.0, true));

        let (a, b, c) = tokio::join!(
            compositor.thumbnail("clip.mp4", 1.0),
            compositor.thumbnail("clip.mp4", 1.0),
            compositor.thumbnail("clip.mp4", 1.0),
        );
        let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn fade_black_with_unknown_duration_never_renders() {
        let (compositor, engine, _dir) = setup(FakeEngine::default().with("b.mp4", 5.0, true));

        let err = compositor
            .concat(&["missing.mp4", "b.mp4"], TransitionKind::FadeBlack, 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, CompositorError::PreconditionFailed(_)));
        assert!(engine.jobs().is_empty());
    }

    #[tokio::test]
    async fn explicit_output_path_is_used_as_is() {
        let (compositor, engine, dir) = setup(FakeEngine::default().with("clip.mp4", 3.0, true));
        let target = dir.path().join("nested").join("out.mp4");

        let output = compositor
            .execute(
                Operation::Trim {
                    input: PathBuf::from("clip.mp4"),
                    start: 0.5,
                    duration: 1.0,
                },
                Some(target.clone()),
            )
            .await
            .unwrap();

        assert_eq!(output, target);
        assert!(target.parent().unwrap().is_dir());
        assert_eq!(engine.jobs()[0].output_path, target);
    }

    #[tokio::test]
    async fn failed_render_reports_captured_stderr() {
        let (compositor, _engine, dir) = setup(
            FakeEngine::default()
                .with("clip.mp4", 3.0, true)
                .failing("Invalid filter graph"),
        );

        let request: CompositionRequest = serde_json::from_value(json!({
            "operation": "resize",
            "input": "clip.mp4",
            "width": 640,
            "height": 360
        }))
        .unwrap();
        let failure = compositor.compose(request).await.unwrap_err();
        assert_eq!(failure.message, "ffmpeg exited with code 1");
        assert_eq!(failure.stderr.as_deref(), Some("Invalid filter graph"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn progress_is_forwarded_to_subscriber() {
        let (tx, mut rx) = mpsc::channel(8);
        let (compositor, _engine, _dir) = setup(FakeEngine::default().with("clip.mp4", 3.0, true));
        let compositor = compositor.with_progress(tx);

        compositor
            .filter("clip.mp4", crate::assemble::NamedFilter::Grayscale)
            .await
            .unwrap();

        let update = rx.recv().await.unwrap();
        assert_eq!(update.percent, Some(100.0));
    }

    #[test]
    fn requests_parse_with_defaults() {
        let request: CompositionRequest = serde_json::from_value(json!({
            "operation": "concat",
            "files": ["a.mp4", "b.mp4"]
        }))
        .unwrap();
        assert_eq!(
            request.operation,
            Operation::Concat {
                files: vec![PathBuf::from("a.mp4"), PathBuf::from("b.mp4")],
                transition: TransitionKind::None,
                transition_duration: 1.0,
            }
        );
        assert!(request.output_path.is_none());

        let request: CompositionRequest = serde_json::from_value(json!({
            "operation": "ken-burns-video",
            "video": "clip.mp4",
            "zoomType": "pan",
            "aspectRatio": "9:16",
            "outputPath": "/tmp/out.mp4"
        }))
        .unwrap();
        assert_eq!(request.operation.name(), "ken-burns-video");
        assert_eq!(request.output_path, Some(PathBuf::from("/tmp/out.mp4")));
    }

    #[test]
    fn speed_needs_exactly_one_parameter() {
        let both = Operation::Speed {
            input: PathBuf::from("clip.mp4"),
            speed_factor: Some(2.0),
            target_duration: Some(3.0),
        };
        assert!(matches!(both.validate(), Err(CompositorError::InvalidRequest(_))));

        let negative = Operation::Speed {
            input: PathBuf::from("clip.mp4"),
            speed_factor: Some(-1.0),
            target_duration: None,
        };
        assert!(matches!(negative.validate(), Err(CompositorError::InvalidRequest(_))));
    }
}
