use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Stub backend for demos and tests. Finds nothing, or replays a fixed list of
/// detections on every frame.
#[derive(Default)]
pub struct StubBackend {
    fixed: Vec<Detection>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `detections` for every frame.
    pub fn with_detections(detections: Vec<Detection>) -> Self {
        Self { fixed: detections }
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        Ok(self.fixed.clone())
    }
}
