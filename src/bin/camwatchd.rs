//! camwatchd - per-camera detection service
//!
//! This daemon:
//! 1. Loads configuration (file, `CAMWATCH_*` environment, command-line flags)
//! 2. Loads the detector and connects to the camera (both fatal on failure)
//! 3. Runs the frame pipeline on a background thread
//! 4. Serves the annotated feed over HTTP until Ctrl-C or the pipeline ends

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::time::Duration;

use camwatch::{
    alert::notifier_from_name, ApiServer, AlertSink, CamwatchConfig, DetectionEngine,
    FrameAnnotator, FrameBroadcaster, FrameSource, LatestFrameSlot, PipelineExit, SnapshotStore,
    StreamPipeline,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Detect objects on a camera stream, raise alerts and serve an MJPEG feed"
)]
struct Args {
    /// JSON or TOML config file.
    #[arg(long, env = "CAMWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Camera stream URL (http(s):// or stub://).
    #[arg(long)]
    stream_url: Option<String>,

    /// Camera id used in snapshot names.
    #[arg(long)]
    camera_id: Option<String>,

    /// Detector backend: tract or stub.
    #[arg(long)]
    backend: Option<String>,

    /// Path to the ONNX model weights.
    #[arg(long)]
    model: Option<PathBuf>,

    /// HTTP listen address.
    #[arg(long)]
    api_addr: Option<String>,

    /// Alert classes as `name[:confidence[:trigger]]`, comma separated.
    #[arg(long)]
    alert_classes: Option<String>,

    /// Directory for alert snapshots.
    #[arg(long)]
    capture_dir: Option<PathBuf>,

    /// Notifier: log, bell or none.
    #[arg(long)]
    notifier: Option<String>,

    /// TrueType font for overlay text.
    #[arg(long)]
    font: Option<PathBuf>,
}

impl Args {
    fn apply(self, cfg: &mut CamwatchConfig) -> Result<()> {
        if let Some(url) = self.stream_url {
            cfg.stream_url = url;
        }
        if let Some(id) = self.camera_id {
            cfg.camera_id = id;
        }
        if let Some(backend) = self.backend {
            cfg.detector.backend = backend;
        }
        if let Some(model) = self.model {
            cfg.detector.model_path = model;
        }
        if let Some(addr) = self.api_addr {
            cfg.api_addr = addr;
        }
        if let Some(classes) = self.alert_classes {
            cfg.alert_classes = camwatch::config::parse_alert_classes(&classes)?;
        }
        if let Some(dir) = self.capture_dir {
            cfg.capture_dir = dir;
        }
        if let Some(notifier) = self.notifier {
            cfg.notifier = notifier;
        }
        if let Some(font) = self.font {
            cfg.font_path = Some(font);
        }
        cfg.validate()
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = CamwatchConfig::load_from(args.config.as_deref())?;
    args.apply(&mut cfg)?;

    log::info!(
        "camwatchd {} starting for camera {}{}",
        env!("CARGO_PKG_VERSION"),
        cfg.camera_id,
        cfg.camera_name
            .as_deref()
            .map(|name| format!(" ({})", name))
            .unwrap_or_default()
    );

    // Startup failures below are fatal: nothing is served without a detector
    // and a camera.
    let engine = DetectionEngine::load(&cfg.detector)?;
    let mut source = camwatch::open_source(cfg.source_config())?;
    source.connect()?;

    let annotator = FrameAnnotator::load(cfg.font_path.as_deref())?;
    let sink = AlertSink::new(
        cfg.camera_id.clone(),
        SnapshotStore::new(&cfg.capture_dir),
        notifier_from_name(&cfg.notifier)?,
    );
    let slot = Arc::new(LatestFrameSlot::new());
    let pipeline = StreamPipeline::new(
        source,
        engine,
        sink,
        annotator,
        slot.clone(),
        cfg.pipeline_config(),
    );
    let broadcaster = FrameBroadcaster::new(slot, pipeline.running())
        .with_poll_interval(cfg.poll_interval)
        .with_jpeg_quality(cfg.jpeg_quality);
    let stats = pipeline.stats();
    let pipeline_handle = pipeline.spawn()?;

    let api_handle = ApiServer::new(cfg.api_config(), broadcaster, stats).spawn()?;
    log::info!("video feed at http://{}/video_feed", api_handle.addr);
    log::info!(
        "snapshots go to {}; alert classes: {}",
        cfg.capture_dir.display(),
        cfg.alert_classes
            .iter()
            .map(|class| format!("{}>{:.2}", class.name, class.confidence_threshold))
            .collect::<Vec<_>>()
            .join(", ")
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("camwatchd running; Ctrl-C to stop");
    loop {
        match rx.recv_timeout(Duration::from_millis(500)) {
            Ok(()) => {
                log::info!("shutdown signal received, stopping pipeline...");
                break;
            }
            Err(mpsc::RecvTimeoutError::Timeout) if !pipeline_handle.is_finished() => continue,
            Err(_) => break,
        }
    }

    let exit = pipeline_handle.stop()?;
    api_handle.stop()?;

    match exit {
        PipelineExit::Stopped | PipelineExit::SourceExhausted => {
            log::info!("camwatchd stopped: {:?}", exit);
            Ok(())
        }
        PipelineExit::SourceFailed(msg) => Err(anyhow!("camera stream failed: {}", msg)),
        PipelineExit::TooManyFailures(count) => {
            Err(anyhow!("{} frames in a row failed to process", count))
        }
    }
}
