use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;

use camwatch::alert::NullNotifier;
use camwatch::detect::StubBackend;
use camwatch::{
    open_source, AlertClassConfig, AlertSink, BoundingBox, Detection, DetectionEngine,
    FrameAnnotator, FrameSource, LatestFrameSlot, PipelineConfig, PipelineExit, SnapshotStore, SourceConfig,
    StreamPipeline,
};

fn person() -> Detection {
    Detection::new("person", 0.9, BoundingBox::new(10.0, 10.0, 60.0, 100.0))
}

#[test]
fn synthetic_stream_runs_to_completion_with_one_alert() {
    let dir = tempdir().unwrap();
    let mut source = open_source(SourceConfig {
        url: "stub://camera?frames=5&fps=200&width=160&height=120".to_string(),
        ..SourceConfig::default()
    })
    .unwrap();
    source.connect().unwrap();

    let engine = DetectionEngine::new(
        Box::new(StubBackend::with_detections(vec![person()])),
        0.4,
        0.4,
    );
    let sink = AlertSink::new("1", SnapshotStore::new(dir.path()), Box::new(NullNotifier));
    let slot = Arc::new(LatestFrameSlot::new());
    let pipeline = StreamPipeline::new(
        source,
        engine,
        sink,
        FrameAnnotator::new(None),
        slot.clone(),
        PipelineConfig {
            camera_id: "1".to_string(),
            alert_classes: vec![AlertClassConfig::new("person", 0.5)],
            ..PipelineConfig::default()
        },
    );
    let stats = pipeline.stats();
    let handle = pipeline.spawn().unwrap();

    assert_eq!(handle.wait().unwrap(), PipelineExit::SourceExhausted);

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.frames_processed, 5);
    assert_eq!(snapshot.frames_failed, 0);
    assert_eq!(snapshot.alerts_fired, 1);
    assert_eq!(snapshot.last_sequence, Some(5));

    let latest = slot.latest().expect("a published frame");
    assert_eq!(latest.sequence, 5);
    assert_eq!((latest.width, latest.height), (160, 120));

    let files: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(files.len(), 1);
    assert!(files[0].starts_with("camera1_person_"));
    assert!(files[0].ends_with(".jpg"));
}

#[test]
fn stop_interrupts_an_endless_stream() {
    let dir = tempdir().unwrap();
    let mut source = open_source(SourceConfig {
        url: "stub://camera?fps=50&width=64&height=48".to_string(),
        ..SourceConfig::default()
    })
    .unwrap();
    source.connect().unwrap();

    let slot = Arc::new(LatestFrameSlot::new());
    let pipeline = StreamPipeline::new(
        source,
        DetectionEngine::new(Box::new(StubBackend::new()), 0.4, 0.4),
        AlertSink::new("0", SnapshotStore::new(dir.path()), Box::new(NullNotifier)),
        FrameAnnotator::new(None),
        slot.clone(),
        PipelineConfig::default(),
    );
    let running = pipeline.running();
    let handle = pipeline.spawn().unwrap();

    assert!(slot.wait_newer(None, Duration::from_secs(5)).is_some());
    assert!(running.is_running());
    assert_eq!(handle.stop().unwrap(), PipelineExit::Stopped);
    assert!(!running.is_running());
}
