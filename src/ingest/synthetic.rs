//! Synthetic frame source (`stub://`).
//!
//! Produces a static gradient scene with a square drifting across it, paced at
//! a fixed rate. Query parameters tune it:
//! `stub://camera?frames=100&fps=15&width=640&height=480`.
//! `frames` bounds the stream (default unbounded), which makes end-of-stream
//! handling easy to exercise.

use anyhow::{anyhow, Result};
use rand::Rng;
use std::time::Instant;
use url::Url;

use super::{frame_interval, FrameSource, SourceStats};
use crate::frame::Frame;

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FPS: u32 = 15;

pub struct SyntheticSource {
    url: String,
    width: u32,
    height: u32,
    fps: u32,
    frame_limit: Option<u64>,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    connected: bool,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, fps: u32, frame_limit: Option<u64>) -> Self {
        Self {
            url: "stub://camera".to_string(),
            width,
            height,
            fps,
            frame_limit,
            frame_count: 0,
            last_frame_at: None,
            connected: false,
        }
    }

    /// Parse `stub://` query parameters. `target_fps` applies when `fps` is absent.
    pub fn from_url(url: &Url, target_fps: u32) -> Result<Self> {
        let mut source = Self::new(
            DEFAULT_WIDTH,
            DEFAULT_HEIGHT,
            if target_fps == 0 { DEFAULT_FPS } else { target_fps },
            None,
        );
        source.url = url.to_string();
        for (key, value) in url.query_pairs() {
            let parsed: u64 = value
                .parse()
                .map_err(|_| anyhow!("stub source parameter '{}' must be an integer", key))?;
            match key.as_ref() {
                "frames" => source.frame_limit = Some(parsed),
                "fps" => source.fps = parsed as u32,
                "width" => source.width = parsed as u32,
                "height" => source.height = parsed as u32,
                other => return Err(anyhow!("unknown stub source parameter '{}'", other)),
            }
        }
        if source.width == 0 || source.height == 0 {
            return Err(anyhow!("stub source dimensions must be non-zero"));
        }
        Ok(source)
    }

    fn generate_pixels(&self) -> Vec<u8> {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut pixels = vec![0u8; w * h * 3];
        for y in 0..h {
            for x in 0..w {
                let idx = (y * w + x) * 3;
                pixels[idx] = (x * 255 / w.max(1)) as u8;
                pixels[idx + 1] = (y * 255 / h.max(1)) as u8;
                pixels[idx + 2] = 64;
            }
        }

        // Drifting square, a tenth of the frame, with a little jitter.
        let side = (w.min(h) / 10).max(1);
        let jitter: usize = rand::thread_rng().gen_range(0..=2);
        let span = w.saturating_sub(side).max(1);
        let left = ((self.frame_count as usize * 4) + jitter) % span;
        let top = h.saturating_sub(side) / 2;
        for y in top..(top + side).min(h) {
            for x in left..(left + side).min(w) {
                let idx = (y * w + x) * 3;
                pixels[idx..idx + 3].copy_from_slice(&[255, 255, 255]);
            }
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        log::info!("SyntheticSource: connected to {}", self.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if !self.connected {
            return Err(anyhow!("synthetic source not connected; call connect() first"));
        }
        if self
            .frame_limit
            .is_some_and(|limit| self.frame_count >= limit)
        {
            return Ok(None);
        }

        let interval = frame_interval(self.fps);
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }

        let pixels = self.generate_pixels();
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Frame::from_rgb(pixels, self.width, self.height, self.frame_count).map(Some)
    }

    fn release(&mut self) {
        self.connected = false;
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            frames_dropped: 0,
            source: self.url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub(url: &str) -> SyntheticSource {
        SyntheticSource::from_url(&Url::parse(url).unwrap(), 0).unwrap()
    }

    #[test]
    fn synthetic_source_produces_sized_frames() -> Result<()> {
        let mut source = stub("stub://test?width=64&height=48&fps=0");
        source.connect()?;

        let frame = source.next_frame()?.expect("frame");
        assert_eq!(frame.width, 64);
        assert_eq!(frame.height, 48);
        assert_eq!(frame.pixels().len(), 64 * 48 * 3);
        Ok(())
    }

    #[test]
    fn sequence_numbers_increase() -> Result<()> {
        let mut source = stub("stub://test?width=16&height=16&fps=0");
        source.connect()?;
        let a = source.next_frame()?.expect("frame");
        let b = source.next_frame()?.expect("frame");
        assert!(b.sequence > a.sequence);
        Ok(())
    }

    #[test]
    fn frame_limit_ends_stream() -> Result<()> {
        let mut source = stub("stub://test?frames=1&width=8&height=8&fps=0");
        source.connect()?;
        assert!(source.next_frame()?.is_some());
        assert!(source.next_frame()?.is_none());
        assert_eq!(source.stats().frames_captured, 1);
        Ok(())
    }

    #[test]
    fn unknown_parameter_is_rejected() {
        let url = Url::parse("stub://test?colour=3").unwrap();
        assert!(SyntheticSource::from_url(&url, 0).is_err());
    }

    #[test]
    fn released_source_refuses_reads() -> Result<()> {
        let mut source = stub("stub://test?width=8&height=8&fps=0");
        source.connect()?;
        source.release();
        assert!(source.next_frame().is_err());
        assert!(!source.is_healthy());
        Ok(())
    }
}
