use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::detect::backend::DetectorBackend;
use crate::detect::backends::StubBackend;
use crate::detect::labels::COCO_CLASSES;
use crate::detect::result::{non_max_suppression, Detection};
use crate::frame::Frame;

/// Compute device the detector runs on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Cuda,
}

impl FromStr for Device {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "cpu" => Ok(Device::Cpu),
            "cuda" | "gpu" => Ok(Device::Cuda),
            other => Err(anyhow!("unknown device '{}'; expected cpu or cuda", other)),
        }
    }
}

/// Everything needed to bring up a detector once, before the pipeline starts.
#[derive(Clone, Debug)]
pub struct DetectorSettings {
    /// `tract` (ONNX) or `stub`.
    pub backend: String,
    pub model_path: PathBuf,
    pub device: Device,
    pub confidence: f32,
    pub iou: f32,
    /// Square model input side in pixels.
    pub input_size: u32,
    pub class_names: Vec<String>,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: "tract".to_string(),
            model_path: PathBuf::from("model.onnx"),
            device: Device::Cpu,
            confidence: 0.4,
            iou: 0.4,
            input_size: 640,
            class_names: COCO_CLASSES.iter().map(|name| name.to_string()).collect(),
        }
    }
}

/// Loaded detector plus the thresholds applied to its raw output.
///
/// `detect` returns detections sorted by descending confidence, after the
/// confidence filter and NMS.
pub struct DetectionEngine {
    backend: Box<dyn DetectorBackend>,
    confidence: f32,
    iou: f32,
}

impl DetectionEngine {
    pub fn new(backend: Box<dyn DetectorBackend>, confidence: f32, iou: f32) -> Self {
        Self {
            backend,
            confidence,
            iou,
        }
    }

    /// Load and warm up the configured backend. Any failure here is fatal to
    /// startup; nothing is retried per frame.
    pub fn load(settings: &DetectorSettings) -> Result<Self> {
        if settings.device != Device::Cpu {
            return Err(anyhow!(
                "device {:?} is not available in this build; use cpu",
                settings.device
            ));
        }
        let mut backend: Box<dyn DetectorBackend> = match settings.backend.as_str() {
            "stub" => Box::new(StubBackend::new()),
            "tract" => load_tract(settings)?,
            other => {
                return Err(anyhow!(
                    "unknown detector backend '{}'; expected tract or stub",
                    other
                ))
            }
        };
        backend.warm_up()?;
        log::info!(
            "detector '{}' ready on {:?} (conf={:.2}, iou={:.2})",
            backend.name(),
            settings.device,
            settings.confidence,
            settings.iou
        );
        Ok(Self::new(backend, settings.confidence, settings.iou))
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let mut detections = self.backend.detect(frame)?;
        detections.retain(|det| det.confidence >= self.confidence);
        non_max_suppression(&mut detections, self.iou);
        Ok(detections)
    }
}

fn ensure_model_file(path: &Path) -> Result<()> {
    if !path.is_file() {
        return Err(anyhow!("model file not found at: {}", path.display()));
    }
    Ok(())
}

#[cfg(feature = "backend-tract")]
fn load_tract(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    ensure_model_file(&settings.model_path)?;
    let backend = crate::detect::backends::TractBackend::new(
        &settings.model_path,
        settings.input_size,
        settings.class_names.clone(),
    )?;
    Ok(Box::new(backend))
}

#[cfg(not(feature = "backend-tract"))]
fn load_tract(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    ensure_model_file(&settings.model_path)?;
    Err(anyhow!("ONNX detection requires the backend-tract feature"))
}
