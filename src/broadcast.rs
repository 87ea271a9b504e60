//! Fan-out of the latest annotated frame to stream clients.
//!
//! Each client gets its own `FrameStream`. A stream only reads the shared slot;
//! it keeps the sequence of the last frame it sent so a client never receives
//! the same frame twice.

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use std::sync::Arc;
use std::time::Duration;

use crate::frame::{Frame, LatestFrameSlot, RunFlag};

pub const BOUNDARY: &str = "frame";
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

#[derive(Clone)]
pub struct FrameBroadcaster {
    slot: Arc<LatestFrameSlot>,
    running: RunFlag,
    poll_interval: Duration,
    jpeg_quality: u8,
}

impl FrameBroadcaster {
    pub fn new(slot: Arc<LatestFrameSlot>, running: RunFlag) -> Self {
        Self {
            slot,
            running,
            poll_interval: DEFAULT_POLL_INTERVAL,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.is_running()
    }

    /// A fresh stream for one client.
    pub fn subscribe(&self) -> FrameStream {
        FrameStream {
            broadcaster: self.clone(),
            last_sent: None,
            closed: false,
        }
    }
}

/// Outcome of one poll tick.
#[derive(Debug, PartialEq, Eq)]
pub enum StreamTick {
    /// A framed multipart part ready to write.
    Chunk(Vec<u8>),
    /// Nothing new this tick.
    Idle,
    /// The run flag cleared; the stream is over.
    Closed,
}

pub struct FrameStream {
    broadcaster: FrameBroadcaster,
    last_sent: Option<u64>,
    closed: bool,
}

impl FrameStream {
    pub fn last_sent(&self) -> Option<u64> {
        self.last_sent
    }

    /// Wait up to one poll interval for a frame newer than the last one sent.
    pub fn poll_chunk(&mut self) -> StreamTick {
        if self.closed || !self.broadcaster.is_running() {
            self.closed = true;
            return StreamTick::Closed;
        }
        let Some(frame) = self
            .broadcaster
            .slot
            .wait_newer(self.last_sent, self.broadcaster.poll_interval)
        else {
            return StreamTick::Idle;
        };
        match encode_jpeg(&frame, self.broadcaster.jpeg_quality) {
            Ok(jpeg) => {
                self.last_sent = Some(frame.sequence);
                StreamTick::Chunk(multipart_chunk(&jpeg))
            }
            Err(e) => {
                log::debug!("skipping frame #{}: {:#}", frame.sequence, e);
                StreamTick::Idle
            }
        }
    }
}

impl Iterator for FrameStream {
    type Item = Vec<u8>;

    /// Blocks across idle ticks; ends once the run flag clears.
    fn next(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.poll_chunk() {
                StreamTick::Chunk(chunk) => return Some(chunk),
                StreamTick::Idle => continue,
                StreamTick::Closed => return None,
            }
        }
    }
}

pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode(
            frame.pixels(),
            frame.width,
            frame.height,
            ExtendedColorType::Rgb8,
        )
        .context("jpeg encode")?;
    Ok(out)
}

/// One part of a `multipart/x-mixed-replace` body.
pub fn multipart_chunk(jpeg: &[u8]) -> Vec<u8> {
    let header = format!("--{}\r\nContent-Type: image/jpeg\r\n\r\n", BOUNDARY);
    let mut chunk = Vec::with_capacity(header.len() + jpeg.len() + 2);
    chunk.extend_from_slice(header.as_bytes());
    chunk.extend_from_slice(jpeg);
    chunk.extend_from_slice(b"\r\n");
    chunk
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(sequence: u64) -> Frame {
        Frame::from_rgb(vec![90; 8 * 8 * 3], 8, 8, sequence).unwrap()
    }

    fn broadcaster(slot: Arc<LatestFrameSlot>, running: RunFlag) -> FrameBroadcaster {
        FrameBroadcaster::new(slot, running).with_poll_interval(Duration::from_millis(20))
    }

    #[test]
    fn empty_tick_then_populated_tick() {
        let slot = Arc::new(LatestFrameSlot::new());
        let mut stream = broadcaster(slot.clone(), RunFlag::new()).subscribe();

        assert_eq!(stream.poll_chunk(), StreamTick::Idle);

        slot.publish(frame(1));
        match stream.poll_chunk() {
            StreamTick::Chunk(chunk) => {
                assert!(chunk.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n"));
                assert!(chunk.ends_with(b"\r\n"));
            }
            other => panic!("expected a chunk, got {:?}", other),
        }
        assert_eq!(stream.last_sent(), Some(1));
    }

    #[test]
    fn same_frame_is_not_sent_twice() {
        let slot = Arc::new(LatestFrameSlot::new());
        slot.publish(frame(4));
        let mut stream = broadcaster(slot.clone(), RunFlag::new()).subscribe();

        assert!(matches!(stream.poll_chunk(), StreamTick::Chunk(_)));
        assert_eq!(stream.poll_chunk(), StreamTick::Idle);
        slot.publish(frame(5));
        assert!(matches!(stream.poll_chunk(), StreamTick::Chunk(_)));
    }

    #[test]
    fn clients_are_independent() {
        let slot = Arc::new(LatestFrameSlot::new());
        slot.publish(frame(1));
        let b = broadcaster(slot, RunFlag::new());
        let mut first = b.subscribe();
        let mut second = b.subscribe();
        assert!(matches!(first.poll_chunk(), StreamTick::Chunk(_)));
        assert!(matches!(second.poll_chunk(), StreamTick::Chunk(_)));
    }

    #[test]
    fn stream_closes_when_running_clears() {
        let slot = Arc::new(LatestFrameSlot::new());
        let running = RunFlag::new();
        let mut stream = broadcaster(slot, running.clone()).subscribe();
        running.stop();
        assert_eq!(stream.poll_chunk(), StreamTick::Closed);
        assert!(stream.next().is_none());
    }

    #[test]
    fn encoded_part_is_a_jpeg() {
        let jpeg = encode_jpeg(&frame(1), 80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let chunk = multipart_chunk(&jpeg);
        assert_eq!(chunk.len(), jpeg.len() + 39);
    }
}
