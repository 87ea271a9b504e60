//! HTTP camera source.
//!
//! Pulls frames from cameras that serve MJPEG (`multipart/x-mixed-replace`) or
//! a single JPEG per request over HTTP, which covers most IP cameras and phone
//! camera apps (`http://<ip>:<port>/video`).
//!
//! The source is responsible for:
//! - Opening the HTTP stream with bounded connect/read timeouts
//! - Splitting the multipart body on JPEG SOI/EOI markers
//! - Decoding JPEG parts in-memory to RGB8
//! - Skipping corrupt parts, up to `max_decode_failures` in a row
//! - Decimating to `target_fps` when configured
//! - Pacing single-JPEG polling to at most one request per
//!   `SINGLE_JPEG_MIN_INTERVAL`, even with no `target_fps`

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::time::{Duration, Instant};

use super::{frame_interval, health_grace, FrameSource, SourceConfig, SourceStats};
use crate::frame::Frame;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;

/// Floor between two snapshot requests to a single-JPEG endpoint.
pub(crate) const SINGLE_JPEG_MIN_INTERVAL: Duration = Duration::from_millis(100);

pub struct HttpSource {
    config: SourceConfig,
    agent: ureq::Agent,
    stream: Option<HttpStream>,
    last_frame_at: Option<Instant>,
    last_fetch_at: Option<Instant>,
    connected_at: Option<Instant>,
    frame_count: u64,
    dropped: u64,
    last_error: Option<String>,
}

enum HttpStream {
    Mjpeg(MjpegStream),
    SingleJpeg,
}

impl HttpSource {
    pub fn new(config: SourceConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(config.connect_timeout)
            .timeout_read(config.read_timeout)
            .build();
        Self {
            config,
            agent,
            stream: None,
            last_frame_at: None,
            last_fetch_at: None,
            connected_at: None,
            frame_count: 0,
            dropped: 0,
            last_error: None,
        }
    }

    fn read_jpeg(&mut self) -> Result<Option<Vec<u8>>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| anyhow!("http source not connected; call connect() first"))?;
        match stream {
            HttpStream::Mjpeg(stream) => stream.read_next_jpeg(),
            HttpStream::SingleJpeg => {
                let delay = poll_delay(self.last_fetch_at, self.config.target_fps, Instant::now());
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
                self.last_fetch_at = Some(Instant::now());
                fetch_single_jpeg(&self.agent, &self.config.url).map(Some)
            }
        }
    }
}

impl FrameSource for HttpSource {
    fn connect(&mut self) -> Result<()> {
        let response = self
            .agent
            .get(&self.config.url)
            .call()
            .with_context(|| format!("connect to camera stream {}", self.config.url))?;
        let content_type = response.header("Content-Type").unwrap_or("");
        if content_type.to_lowercase().contains("multipart") {
            let reader = response.into_reader();
            self.stream = Some(HttpStream::Mjpeg(MjpegStream::new(reader)));
        } else {
            self.stream = Some(HttpStream::SingleJpeg);
        }
        self.connected_at = Some(Instant::now());
        self.last_error = None;
        log::info!("HttpSource: connected to {}", self.config.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        // Snapshot polling is paced before each request instead.
        let min_interval = match self.stream {
            Some(HttpStream::SingleJpeg) => Duration::ZERO,
            _ => frame_interval(self.config.target_fps),
        };
        let mut decode_failures = 0u32;
        loop {
            let jpeg_bytes = match self.read_jpeg() {
                Ok(Some(bytes)) => bytes,
                Ok(None) => return Ok(None),
                Err(err) => {
                    self.last_error = Some(err.to_string());
                    return Err(err);
                }
            };

            let now = Instant::now();
            if let Some(last) = self.last_frame_at {
                if now.duration_since(last) < min_interval {
                    continue;
                }
            }

            let image = match decode_jpeg(&jpeg_bytes) {
                Ok(image) => image,
                Err(err) => {
                    self.dropped += 1;
                    decode_failures += 1;
                    if decode_failures > self.config.max_decode_failures {
                        self.last_error = Some(err.to_string());
                        return Err(err.context(format!(
                            "{} consecutive undecodable frames",
                            decode_failures
                        )));
                    }
                    log::warn!("HttpSource: skipping undecodable frame: {:#}", err);
                    continue;
                }
            };

            self.frame_count += 1;
            self.last_frame_at = Some(now);
            return Ok(Some(Frame::from_image(image, self.frame_count)));
        }
    }

    fn release(&mut self) {
        if self.stream.take().is_some() {
            log::info!("HttpSource: released {}", self.config.url);
        }
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        let Some(last_frame_at) = self.last_frame_at else {
            return connected_at.elapsed() <= Duration::from_secs(5);
        };
        last_frame_at.elapsed() <= health_grace(self.config.target_fps)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            frames_dropped: self.dropped,
            source: self.config.url.clone(),
        }
    }
}

struct MjpegStream {
    reader: Box<dyn Read + Send>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    /// Next complete JPEG in the body, `None` once the body is exhausted.
    fn read_next_jpeg(&mut self) -> Result<Option<Vec<u8>>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(Some(frame));
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Ok(None);
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

/// How long to wait before the next snapshot request.
fn poll_delay(last_fetch: Option<Instant>, target_fps: u32, now: Instant) -> Duration {
    let Some(last) = last_fetch else {
        return Duration::ZERO;
    };
    let interval = frame_interval(target_fps).max(SINGLE_JPEG_MIN_INTERVAL);
    interval.saturating_sub(now.saturating_duration_since(last))
}

fn fetch_single_jpeg(agent: &ureq::Agent, url: &str) -> Result<Vec<u8>> {
    let response = agent
        .get(url)
        .call()
        .with_context(|| format!("fetch jpeg snapshot from {}", url))?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_JPEG_BYTES as u64)
        .read_to_end(&mut bytes)
        .context("read jpeg snapshot")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg snapshot"));
    }
    Ok(bytes)
}

fn decode_jpeg(bytes: &[u8]) -> Result<image::RgbImage> {
    let image = image::load_from_memory_with_format(bytes, image::ImageFormat::Jpeg)
        .context("decode jpeg")?;
    Ok(image.into_rgb8())
}

fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}
