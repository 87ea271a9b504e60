#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

const BOX_CHANNELS: usize = 4;
const LETTERBOX_FILL: f32 = 114.0 / 255.0;

/// Tract-based backend for YOLOv8-style ONNX detectors.
///
/// Expects a single `[1, 3, S, S]` float input and a `[1, 4 + classes, anchors]`
/// output (the ultralytics export layout). Frames are letterboxed into the
/// top-left of the square input, so decoded boxes only need rescaling.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
    class_names: Vec<String>,
    score_floor: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        input_size: u32,
        class_names: Vec<String>,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            class_names,
            score_floor: 0.01,
        })
    }

    /// Drop raw candidates below this score before they reach the engine.
    pub fn with_score_floor(mut self, floor: f32) -> Self {
        self.score_floor = floor;
        self
    }

    fn build_input(&self, frame: &Frame) -> Result<(Tensor, f32)> {
        let image = frame.to_image()?;
        let side = self.input_size;
        let ratio = (side as f32 / frame.width as f32).min(side as f32 / frame.height as f32);
        let new_w = ((frame.width as f32 * ratio).round() as u32).clamp(1, side);
        let new_h = ((frame.height as f32 * ratio).round() as u32).clamp(1, side);
        let resized = imageops::resize(&image, new_w, new_h, FilterType::Triangle);

        let side = side as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            if x < new_w as usize && y < new_h as usize {
                resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
            } else {
                LETTERBOX_FILL
            }
        });
        Ok((input.into_tensor(), ratio))
    }

    fn class_name(&self, id: usize) -> String {
        self.class_names
            .get(id)
            .cloned()
            .unwrap_or_else(|| format!("class{}", id))
    }

    fn decode(&self, outputs: TVec<TValue>, ratio: f32, frame: &Frame) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let preds = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = preds.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 {
            return Err(anyhow!("unexpected model output shape {:?}", shape));
        }
        // Ultralytics exports channels-first; tolerate the transposed layout too.
        let channels_first = shape[1] < shape[2];
        let (channels, anchors) = if channels_first {
            (shape[1], shape[2])
        } else {
            (shape[2], shape[1])
        };
        if channels <= BOX_CHANNELS {
            return Err(anyhow!("model output has no class channels: {:?}", shape));
        }
        let at = |c: usize, a: usize| {
            if channels_first {
                preds[[0, c, a]]
            } else {
                preds[[0, a, c]]
            }
        };

        let (w, h) = (frame.width as f32, frame.height as f32);
        let mut detections = Vec::new();
        for anchor in 0..anchors {
            let (class_id, score) = (BOX_CHANNELS..channels)
                .map(|c| (c - BOX_CHANNELS, at(c, anchor)))
                .fold((0, f32::NEG_INFINITY), |best, item| {
                    if item.1 > best.1 {
                        item
                    } else {
                        best
                    }
                });
            if !score.is_finite() || score < self.score_floor {
                continue;
            }
            let bbox = BoundingBox::from_center(
                at(0, anchor) / ratio,
                at(1, anchor) / ratio,
                at(2, anchor) / ratio,
                at(3, anchor) / ratio,
            )
            .clamp(w, h);
            detections.push(Detection::new(
                self.class_name(class_id),
                score.clamp(0.0, 1.0),
                bbox,
            ));
        }
        Ok(detections)
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let (input, ratio) = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, ratio, frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        let side = self.input_size;
        let blank = Frame::from_rgb(vec![0u8; (side * side * 3) as usize], side, side, 0)?;
        self.detect(&blank).map(|_| ())
    }
}
