mod backend;
mod backends;
mod engine;
mod labels;
mod result;

pub use backend::DetectorBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use engine::{DetectionEngine, DetectorSettings, Device};
pub use labels::COCO_CLASSES;
pub use result::{non_max_suppression, BoundingBox, Detection};
