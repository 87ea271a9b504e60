//! camwatch: per-camera detection pipeline.
//!
//! A single background worker pulls frames from a network camera, runs object
//! detection on each one, raises cooldown-gated alerts for configured classes
//! and republishes the annotated stream as a motion-JPEG feed.
//!
//! # Module Structure
//!
//! - `frame`: frames, the latest-frame slot and the shared run flag
//! - `ingest`: frame sources (HTTP MJPEG/JPEG cameras, synthetic `stub://`)
//! - `detect`: detector backends and the thresholding/NMS engine
//! - `alert`: alert classes, per-class cooldown gate, snapshot + notification sink
//! - `annotate`: overlay planning and drawing
//! - `pipeline`: the frame loop and its thread handle
//! - `broadcast`: per-client multipart streams over the latest frame
//! - `api`: HTTP surface (`/`, `/video_feed`, `/health`)
//! - `config`: startup configuration (file + `CAMWATCH_*` environment)

pub mod alert;
pub mod annotate;
pub mod api;
pub mod broadcast;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod pipeline;

pub use alert::{
    AlertClassConfig, AlertEvent, AlertGate, AlertSink, Notifier, SnapshotStore,
};
pub use annotate::{FrameAnnotator, Overlay};
pub use api::{ApiConfig, ApiHandle, ApiServer};
pub use broadcast::{FrameBroadcaster, FrameStream, StreamTick};
pub use config::CamwatchConfig;
pub use detect::{BoundingBox, Detection, DetectionEngine, DetectorBackend, DetectorSettings};
pub use frame::{Frame, LatestFrameSlot, RunFlag};
pub use ingest::{open_source, FrameSource, SourceConfig, SourceStats};
pub use pipeline::{
    PipelineConfig, PipelineExit, PipelineHandle, PipelineStats, StreamPipeline,
};
