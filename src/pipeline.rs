//! The frame loop: read, detect, gate alerts, annotate, publish.
//!
//! One `StreamPipeline` runs on one dedicated thread. Frames are processed
//! strictly one at a time; a failure while processing a frame drops that frame
//! and the loop moves on. Only the source ending, a broken read, the run flag
//! clearing or a long run of failed frames ends the loop.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::alert::{select_candidate, AlertClassConfig, AlertGate, AlertSink, DEFAULT_COOLDOWN};
use crate::annotate::{plan_boxes, plan_text, FrameAnnotator};
use crate::detect::DetectionEngine;
use crate::frame::{Frame, LatestFrameSlot, RunFlag};
use crate::ingest::FrameSource;

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 50;

/// Fixed per-camera settings for the loop.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub camera_id: String,
    pub alert_classes: Vec<AlertClassConfig>,
    pub cooldown: Duration,
    /// Failed frames in a row before the loop gives up. 0 never gives up.
    pub max_consecutive_failures: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            camera_id: "0".to_string(),
            alert_classes: Vec::new(),
            cooldown: DEFAULT_COOLDOWN,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
        }
    }
}

/// Counters shared with the HTTP surface.
#[derive(Debug, Default)]
pub struct PipelineStats {
    frames_processed: AtomicU64,
    frames_failed: AtomicU64,
    alerts_fired: AtomicU64,
    last_sequence: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub frames_processed: u64,
    pub frames_failed: u64,
    pub alerts_fired: u64,
    /// Sequence of the last published frame; `None` before the first one.
    pub last_sequence: Option<u64>,
}

impl PipelineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        let last = self.last_sequence.load(Ordering::Relaxed);
        StatsSnapshot {
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            frames_failed: self.frames_failed.load(Ordering::Relaxed),
            alerts_fired: self.alerts_fired.load(Ordering::Relaxed),
            last_sequence: (last > 0).then_some(last),
        }
    }

    fn record_published(&self, sequence: u64) {
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
        self.last_sequence.store(sequence, Ordering::Relaxed);
    }

    fn record_failed(&self) {
        self.frames_failed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_alert(&self) {
        self.alerts_fired.fetch_add(1, Ordering::Relaxed);
    }
}

/// State owned by one running pipeline: run flag, alert gate, settings and
/// counters.
pub struct PipelineContext {
    pub running: RunFlag,
    pub gate: AlertGate,
    pub config: PipelineConfig,
    pub stats: Arc<PipelineStats>,
}

impl PipelineContext {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            running: RunFlag::new(),
            gate: AlertGate::new(config.cooldown),
            config,
            stats: Arc::new(PipelineStats::default()),
        }
    }
}

/// Why the loop ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipelineExit {
    /// The run flag was cleared.
    Stopped,
    /// The source reported end of stream.
    SourceExhausted,
    /// Reading from the source failed.
    SourceFailed(String),
    /// Too many frames in a row failed to process.
    TooManyFailures(u32),
}

impl PipelineExit {
    /// True for the exits that should make the daemon report failure.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            PipelineExit::SourceFailed(_) | PipelineExit::TooManyFailures(_)
        )
    }
}

pub struct StreamPipeline<S: FrameSource> {
    source: S,
    engine: DetectionEngine,
    sink: AlertSink,
    annotator: FrameAnnotator,
    slot: Arc<LatestFrameSlot>,
    ctx: PipelineContext,
}

impl<S: FrameSource> StreamPipeline<S> {
    /// `source` must already be connected.
    pub fn new(
        source: S,
        engine: DetectionEngine,
        sink: AlertSink,
        annotator: FrameAnnotator,
        slot: Arc<LatestFrameSlot>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            source,
            engine,
            sink,
            annotator,
            slot,
            ctx: PipelineContext::new(config),
        }
    }

    pub fn running(&self) -> RunFlag {
        self.ctx.running.clone()
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        self.ctx.stats.clone()
    }

    pub fn gate(&self) -> &AlertGate {
        &self.ctx.gate
    }

    /// Run until one of the exit conditions holds. The source is released and
    /// the run flag cleared on every exit path.
    pub fn run(&mut self) -> PipelineExit {
        log::info!(
            "pipeline started for camera {} (detector={}, alert classes={})",
            self.ctx.config.camera_id,
            self.engine.backend_name(),
            self.ctx
                .config
                .alert_classes
                .iter()
                .map(|class| class.name.as_str())
                .collect::<Vec<_>>()
                .join(",")
        );

        let exit = self.run_loop();
        self.source.release();
        self.ctx.running.stop();
        self.slot.wake_all();

        let stats = self.ctx.stats.snapshot();
        log::info!(
            "pipeline exited: {:?} (processed={}, failed={}, alerts={})",
            exit,
            stats.frames_processed,
            stats.frames_failed,
            stats.alerts_fired
        );
        exit
    }

    fn run_loop(&mut self) -> PipelineExit {
        let mut consecutive_failures = 0u32;
        let mut last_health_log = Instant::now();

        loop {
            if !self.ctx.running.is_running() {
                return PipelineExit::Stopped;
            }

            let frame = match self.source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    log::info!("camera stream ended");
                    return PipelineExit::SourceExhausted;
                }
                Err(e) => {
                    log::error!("failed to read frame from camera: {:#}", e);
                    return PipelineExit::SourceFailed(format!("{:#}", e));
                }
            };

            let sequence = frame.sequence;
            match self.process_frame(frame) {
                Ok(()) => consecutive_failures = 0,
                Err(e) => {
                    consecutive_failures += 1;
                    self.ctx.stats.record_failed();
                    log::warn!("frame #{} dropped: {:#}", sequence, e);
                    let limit = self.ctx.config.max_consecutive_failures;
                    if limit > 0 && consecutive_failures >= limit {
                        log::error!("{} frames in a row failed; giving up", consecutive_failures);
                        return PipelineExit::TooManyFailures(consecutive_failures);
                    }
                }
            }

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                let source_stats = self.source.stats();
                log::info!(
                    "source health={} captured={} dropped={} source={}",
                    self.source.is_healthy(),
                    source_stats.frames_captured,
                    source_stats.frames_dropped,
                    source_stats.source
                );
                last_health_log = Instant::now();
            }
        }
    }

    /// Detect, draw boxes, gate at most one alert, add the text overlay and
    /// publish one frame.
    fn process_frame(&mut self, frame: Frame) -> Result<()> {
        let detections = self.engine.detect(&frame)?;
        let classes = &self.ctx.config.alert_classes;
        let sequence = frame.sequence;

        let boxes = plan_boxes(&detections, classes)?;
        let boxed = self.annotator.draw_boxes(frame, &boxes)?;

        let mut triggered = None;
        if let Some(index) = select_candidate(&detections, classes) {
            let candidate = &detections[index];
            if self.ctx.gate.should_fire(&candidate.class_name, Instant::now()) {
                // Snapshots carry the boxes but not the counters.
                self.sink.dispatch(&boxed, candidate);
                self.ctx.stats.record_alert();
                triggered = Some(candidate.class_name.clone());
            }
        }

        let lines = plan_text(&detections, &self.ctx.gate, classes, triggered.as_deref());
        let annotated = self.annotator.draw_text(boxed, &lines)?;
        self.slot.publish(annotated);
        self.ctx.stats.record_published(sequence);
        Ok(())
    }
}

impl<S: FrameSource + 'static> StreamPipeline<S> {
    /// Move the pipeline onto its own thread.
    pub fn spawn(mut self) -> Result<PipelineHandle> {
        let running = self.running();
        let stats = self.stats();
        let slot = self.slot.clone();
        let join = std::thread::Builder::new()
            .name("pipeline".to_string())
            .spawn(move || self.run())?;
        Ok(PipelineHandle {
            running,
            stats,
            slot,
            join,
        })
    }
}

pub struct PipelineHandle {
    running: RunFlag,
    stats: Arc<PipelineStats>,
    slot: Arc<LatestFrameSlot>,
    join: JoinHandle<PipelineExit>,
}

impl PipelineHandle {
    pub fn running(&self) -> RunFlag {
        self.running.clone()
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Clear the run flag, wake stream readers and wait for the loop to end.
    pub fn stop(self) -> Result<PipelineExit> {
        self.running.stop();
        self.slot.wake_all();
        self.wait()
    }

    /// Wait for the loop to end on its own.
    pub fn wait(self) -> Result<PipelineExit> {
        self.join
            .join()
            .map_err(|_| anyhow!("pipeline thread panicked"))
    }
}
