//! Frames and the latest-frame slot.
//!
//! - `Frame`: RGB8 pixel buffer with a monotonically increasing sequence number.
//! - `LatestFrameSlot`: single-item overwrite cell between the pipeline (sole
//!   writer) and broadcaster loops (many readers).
//! - `RunFlag`: shared cancellation flag for the pipeline and every reader.
//!
//! A frame is owned by whichever stage holds it until it is published. Once in
//! the slot it is shared read-only behind an `Arc` and never mutated again.

use anyhow::{anyhow, Result};
use image::RgbImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One decoded RGB8 image captured from a stream.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Assigned by the source; strictly increasing per source.
    pub sequence: u64,
    pub captured_at: Instant,
}

impl Frame {
    /// Wrap raw RGB8 pixels. The buffer length must equal `width * height * 3`.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            sequence,
            captured_at: Instant::now(),
        })
    }

    /// Build a frame from an already-decoded image.
    pub fn from_image(image: RgbImage, sequence: u64) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            sequence,
            captured_at: Instant::now(),
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Copy the pixels into an `RgbImage` for drawing or encoding.
    pub fn to_image(&self) -> Result<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.data.clone()).ok_or_else(|| {
            anyhow!(
                "frame #{} buffer does not match {}x{}",
                self.sequence,
                self.width,
                self.height
            )
        })
    }

    /// Consume the frame into an `RgbImage` without copying.
    pub fn into_image(self) -> Result<RgbImage> {
        let Self {
            data,
            width,
            height,
            sequence,
            ..
        } = self;
        RgbImage::from_raw(width, height, data).ok_or_else(|| {
            anyhow!(
                "frame #{} buffer does not match {}x{}",
                sequence,
                width,
                height
            )
        })
    }

    /// Replace the pixels with a rendered image, keeping sequence and capture time.
    pub fn with_image(self, image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            ..self
        }
    }
}

// ----------------------------------------------------------------------------
// RunFlag
// ----------------------------------------------------------------------------

/// Shared `running` flag. Clearing it is the only cancellation signal.
#[derive(Clone, Debug)]
pub struct RunFlag(Arc<AtomicBool>);

impl RunFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// LatestFrameSlot
// ----------------------------------------------------------------------------

/// Single-item overwrite buffer.
///
/// `publish` swaps the stored `Arc` under the lock and wakes every waiter; it
/// never waits for a reader. Readers clone the `Arc` and drop the lock before
/// doing any work with the frame, so they observe either the previous or the
/// new frame and never a partial one.
pub struct LatestFrameSlot {
    current: Mutex<Option<Arc<Frame>>>,
    updated: Condvar,
}

impl LatestFrameSlot {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(None),
            updated: Condvar::new(),
        }
    }

    /// Install `frame`, discarding whatever was there.
    pub fn publish(&self, frame: Frame) {
        let frame = Arc::new(frame);
        {
            let mut guard = match self.current.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *guard = Some(frame);
        }
        self.updated.notify_all();
    }

    /// Newest frame, if any.
    pub fn latest(&self) -> Option<Arc<Frame>> {
        match self.current.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Wait up to `timeout` for a frame whose sequence is greater than `after`.
    ///
    /// `after = None` accepts any frame. Returns `None` when nothing newer shows
    /// up in time; callers treat that as an idle tick.
    pub fn wait_newer(&self, after: Option<u64>, timeout: Duration) -> Option<Arc<Frame>> {
        let is_newer = |slot: &Option<Arc<Frame>>| match (slot, after) {
            (Some(frame), Some(seen)) => frame.sequence > seen,
            (Some(_), None) => true,
            (None, _) => false,
        };
        let guard = match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let (guard, _timed_out) = match self
            .updated
            .wait_timeout_while(guard, timeout, |slot| !is_newer(slot))
        {
            Ok(result) => result,
            Err(poisoned) => poisoned.into_inner(),
        };
        if is_newer(&guard) {
            guard.clone()
        } else {
            None
        }
    }

    /// Wake every waiting reader without publishing (used on shutdown).
    pub fn wake_all(&self) {
        self.updated.notify_all();
    }
}

impl Default for LatestFrameSlot {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn solid_frame(value: u8, sequence: u64) -> Frame {
        Frame::from_rgb(vec![value; 4 * 2 * 3], 4, 2, sequence).expect("frame")
    }

    #[test]
    fn frame_rejects_mismatched_buffer() {
        assert!(Frame::from_rgb(vec![0u8; 10], 4, 2, 0).is_err());
    }

    #[test]
    fn frame_image_round_trip_keeps_sequence() {
        let frame = solid_frame(7, 42);
        let image = frame.to_image().unwrap();
        let rebuilt = frame.with_image(image);
        assert_eq!(rebuilt.sequence, 42);
        assert_eq!(rebuilt.pixels()[0], 7);
    }

    #[test]
    fn slot_keeps_only_last_write() {
        for n in 1..=16u64 {
            let slot = LatestFrameSlot::new();
            for seq in 1..=n {
                slot.publish(solid_frame(seq as u8, seq));
            }
            let latest = slot.latest().expect("slot populated");
            assert_eq!(latest.sequence, n);
            assert_eq!(latest.pixels()[0], n as u8);
        }
    }

    #[test]
    fn empty_slot_times_out() {
        let slot = LatestFrameSlot::new();
        assert!(slot.wait_newer(None, Duration::from_millis(20)).is_none());
    }

    #[test]
    fn wait_newer_skips_already_seen_frame() {
        let slot = LatestFrameSlot::new();
        slot.publish(solid_frame(1, 1));
        assert!(slot
            .wait_newer(Some(1), Duration::from_millis(20))
            .is_none());
        assert_eq!(
            slot.wait_newer(Some(0), Duration::from_millis(20))
                .map(|f| f.sequence),
            Some(1)
        );
    }

    #[test]
    fn waiting_reader_wakes_on_publish() {
        let slot = Arc::new(LatestFrameSlot::new());
        let reader = {
            let slot = slot.clone();
            thread::spawn(move || slot.wait_newer(None, Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        slot.publish(solid_frame(9, 3));
        let got = reader.join().unwrap().expect("frame delivered");
        assert_eq!(got.sequence, 3);
    }

    #[test]
    fn run_flag_is_shared_between_clones() {
        let flag = RunFlag::new();
        let other = flag.clone();
        assert!(other.is_running());
        flag.stop();
        assert!(!other.is_running());
    }
}
