//! Frame ingestion sources.
//!
//! This module provides the sources the pipeline pulls frames from:
//! - HTTP MJPEG / JPEG snapshot endpoints (IP cameras, phone camera apps)
//! - Synthetic source (`stub://`) for tests and demos
//!
//! Every source reports end-of-stream as `Ok(None)` and a broken read as `Err`,
//! so the pipeline can stop deliberately instead of unwinding mid-loop.

pub mod http;
pub mod synthetic;

use anyhow::{anyhow, Context, Result};
use std::time::Duration;
use url::Url;

use crate::frame::Frame;

pub use http::HttpSource;
pub use synthetic::SyntheticSource;

/// Pull-based handle over a camera stream.
pub trait FrameSource: Send {
    /// Open the underlying stream. Failure here is a startup error.
    fn connect(&mut self) -> Result<()>;

    /// Next decoded frame. `Ok(None)` means the stream ended.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Drop any open connection. Called on every pipeline exit path.
    fn release(&mut self) {}

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        (**self).next_frame()
    }

    fn release(&mut self) {
        (**self).release()
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }

    fn stats(&self) -> SourceStats {
        (**self).stats()
    }
}

/// Statistics for a frame source.
#[derive(Clone, Debug, Default)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub frames_dropped: u64,
    pub source: String,
}

/// Configuration for a camera source.
#[derive(Clone, Debug)]
pub struct SourceConfig {
    /// `http(s)://` for MJPEG/JPEG, `stub://` for synthetic frames.
    pub url: String,
    /// Decimate to this rate. 0 keeps the source's native rate.
    pub target_fps: u32,
    /// Undecodable parts tolerated in a row before a read is reported as failed.
    pub max_decode_failures: u32,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: "stub://camera".to_string(),
            target_fps: 0,
            max_decode_failures: 5,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(10),
        }
    }
}

/// Address the camera exposes its feed on, given its `host[:port]`.
pub fn camera_feed_url(camera_ip: &str) -> String {
    format!("http://{}/video", camera_ip.trim())
}

/// Build a source for `config.url`, dispatching on the scheme.
pub fn open_source(config: SourceConfig) -> Result<Box<dyn FrameSource>> {
    let url = Url::parse(&config.url)
        .with_context(|| format!("parse camera stream url '{}'", config.url))?;
    match url.scheme() {
        "http" | "https" => Ok(Box::new(HttpSource::new(config))),
        "stub" => Ok(Box::new(SyntheticSource::from_url(&url, config.target_fps)?)),
        other => Err(anyhow!(
            "unsupported stream scheme '{}'; expected http(s) or stub",
            other
        )),
    }
}

pub(crate) fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::from_millis(0)
    } else {
        Duration::from_millis((1000 / target_fps).max(1) as u64)
    }
}

pub(crate) fn health_grace(target_fps: u32) -> Duration {
    let base_ms = if target_fps == 0 {
        2_000
    } else {
        (1000 / target_fps).saturating_mul(6)
    };
    Duration::from_millis(base_ms.max(2_000) as u64)
}
