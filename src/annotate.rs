//! Frame annotation.
//!
//! `plan` turns detections plus alert state into an `Overlay`: which boxes to
//! draw in which style and which text lines go in the top-left corner. It is a
//! pure function, split into `plan_boxes` and `plan_text` so the pipeline can
//! snapshot a frame that has boxes but no counters yet. `FrameAnnotator` draws
//! with `imageproc`; text needs a TrueType font and is skipped without one.

use ab_glyph::{FontVec, PxScale};
use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::collections::HashMap;
use std::path::Path;

use crate::alert::{alert_class_for, AlertClassConfig, AlertGate};
use crate::detect::{BoundingBox, Detection};
use crate::frame::Frame;

pub const ALERT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const NORMAL_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

const LEFT_MARGIN: i32 = 10;
const LINE_STEP: i32 = 30;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoxStyle {
    pub color: Rgb<u8>,
    pub thickness: u32,
    pub label_scale: f32,
}

impl BoxStyle {
    pub const ALERT: BoxStyle = BoxStyle {
        color: ALERT_COLOR,
        thickness: 3,
        label_scale: 22.0,
    };
    pub const NORMAL: BoxStyle = BoxStyle {
        color: NORMAL_COLOR,
        thickness: 2,
        label_scale: 16.0,
    };
}

#[derive(Clone, Debug, PartialEq)]
pub struct BoxMark {
    pub bbox: BoundingBox,
    pub label: String,
    pub style: BoxStyle,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TextLine {
    pub text: String,
    pub x: i32,
    pub y: i32,
    pub scale: f32,
    pub color: Rgb<u8>,
}

/// Everything to draw on one frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Overlay {
    pub boxes: Vec<BoxMark>,
    pub lines: Vec<TextLine>,
}

impl Overlay {
    pub fn texts(&self) -> Vec<&str> {
        self.lines.iter().map(|line| line.text.as_str()).collect()
    }
}

/// Plan the overlay for one frame.
///
/// `triggered` names the class whose alert fired on this frame, if any. Text
/// runs top to bottom: the alert banner, current-frame counts for alert classes
/// seen in this frame, then the cumulative total for every alert class.
pub fn plan(
    detections: &[Detection],
    gate: &AlertGate,
    alert_classes: &[AlertClassConfig],
    triggered: Option<&str>,
) -> Result<Overlay> {
    Ok(Overlay {
        boxes: plan_boxes(detections, alert_classes)?,
        lines: plan_text(detections, gate, alert_classes, triggered),
    })
}

/// One mark per detection, alert style for alert classes above threshold.
/// Fails on a box with a non-finite coordinate.
pub fn plan_boxes(
    detections: &[Detection],
    alert_classes: &[AlertClassConfig],
) -> Result<Vec<BoxMark>> {
    let mut boxes = Vec::with_capacity(detections.len());
    for det in detections {
        let b = det.bbox;
        if ![b.x1, b.y1, b.x2, b.y2].iter().all(|v| v.is_finite()) {
            return Err(anyhow!(
                "detection '{}' has a non-finite box {:?}",
                det.class_name,
                b
            ));
        }

        let mark = if alert_class_for(alert_classes, det).is_some() {
            BoxMark {
                bbox: b,
                label: format!("ALERT: {} {:.1}", det.class_name, det.confidence),
                style: BoxStyle::ALERT,
            }
        } else {
            BoxMark {
                bbox: b,
                label: format!("{} {:.1}", det.class_name, det.confidence),
                style: BoxStyle::NORMAL,
            }
        };
        boxes.push(mark);
    }
    Ok(boxes)
}

/// The top-left text block: banner, current counts, then totals.
pub fn plan_text(
    detections: &[Detection],
    gate: &AlertGate,
    alert_classes: &[AlertClassConfig],
    triggered: Option<&str>,
) -> Vec<TextLine> {
    let mut lines = Vec::new();
    let mut current_counts: HashMap<&str, u32> = HashMap::new();
    for det in detections {
        *current_counts.entry(det.class_name.as_str()).or_default() += 1;
    }

    if let Some(class) = triggered {
        lines.push(TextLine {
            text: format!("ALERT: {} DETECTED!", class.to_uppercase()),
            x: LEFT_MARGIN,
            y: 10,
            scale: 30.0,
            color: ALERT_COLOR,
        });
    }

    let mut y = 55;
    for class in alert_classes {
        let count = current_counts.get(class.name.as_str()).copied().unwrap_or(0);
        if count > 0 {
            lines.push(TextLine {
                text: format!("Current {}: {}", class.name, count),
                x: LEFT_MARGIN,
                y,
                scale: 22.0,
                color: NORMAL_COLOR,
            });
            y += LINE_STEP;
        }
    }

    y += 20;
    lines.push(TextLine {
        text: "Total Counts:".to_string(),
        x: LEFT_MARGIN,
        y,
        scale: 22.0,
        color: TEXT_COLOR,
    });
    y += LINE_STEP;
    for class in alert_classes {
        lines.push(TextLine {
            text: format!("Total {}: {}", class.name, gate.total_count(&class.name)),
            x: LEFT_MARGIN,
            y,
            scale: 22.0,
            color: TEXT_COLOR,
        });
        y += LINE_STEP;
    }

    lines
}

/// Draws overlays onto frames.
pub struct FrameAnnotator {
    font: Option<FontVec>,
}

impl FrameAnnotator {
    pub fn new(font: Option<FontVec>) -> Self {
        Self { font }
    }

    /// Load the label font, if one is configured.
    pub fn load(font_path: Option<&Path>) -> Result<Self> {
        let Some(path) = font_path else {
            log::warn!("no font configured; frames get boxes but no text overlay");
            return Ok(Self::new(None));
        };
        let bytes =
            std::fs::read(path).with_context(|| format!("read font {}", path.display()))?;
        let font = FontVec::try_from_vec(bytes)
            .map_err(|_| anyhow!("invalid font file {}", path.display()))?;
        Ok(Self::new(Some(font)))
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Plan and draw in one step.
    pub fn annotate(
        &self,
        frame: Frame,
        detections: &[Detection],
        gate: &AlertGate,
        alert_classes: &[AlertClassConfig],
        triggered: Option<&str>,
    ) -> Result<Frame> {
        let overlay = plan(detections, gate, alert_classes, triggered)?;
        self.render(frame, &overlay)
    }

    pub fn render(&self, frame: Frame, overlay: &Overlay) -> Result<Frame> {
        let boxed = self.draw_boxes(frame, &overlay.boxes)?;
        self.draw_text(boxed, &overlay.lines)
    }

    /// Draw box outlines, plus their labels when a font is loaded.
    pub fn draw_boxes(&self, frame: Frame, boxes: &[BoxMark]) -> Result<Frame> {
        let mut image = frame.to_image()?;
        let (width, height) = image.dimensions();

        for mark in boxes {
            let b = mark.bbox.clamp(width as f32, height as f32);
            draw_box(&mut image, &b, mark.style);
            if let Some(font) = &self.font {
                let label_y = (b.y1 as i32 - mark.style.label_scale as i32 - 2).max(0);
                draw_text_mut(
                    &mut image,
                    mark.style.color,
                    b.x1 as i32,
                    label_y,
                    PxScale::from(mark.style.label_scale),
                    font,
                    &mark.label,
                );
            }
        }

        Ok(frame.with_image(image))
    }

    pub fn draw_text(&self, frame: Frame, lines: &[TextLine]) -> Result<Frame> {
        let Some(font) = &self.font else {
            return Ok(frame);
        };
        let mut image = frame.to_image()?;
        for line in lines {
            draw_text_mut(
                &mut image,
                line.color,
                line.x,
                line.y,
                PxScale::from(line.scale),
                font,
                &line.text,
            );
        }
        Ok(frame.with_image(image))
    }
}

fn draw_box(image: &mut RgbImage, b: &BoundingBox, style: BoxStyle) {
    let x = b.x1.round() as i32;
    let y = b.y1.round() as i32;
    let w = b.width().round() as i32;
    let h = b.height().round() as i32;
    for inset in 0..style.thickness as i32 {
        let (iw, ih) = (w - 2 * inset, h - 2 * inset);
        if iw <= 0 || ih <= 0 {
            break;
        }
        let rect = Rect::at(x + inset, y + inset).of_size(iw as u32, ih as u32);
        draw_hollow_rect_mut(image, rect, style.color);
    }
}
