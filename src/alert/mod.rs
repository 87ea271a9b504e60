//! Alerting: which detections count as alerts, per-class cooldown gating, and
//! the side effects (snapshot + notification) of an accepted alert.

pub mod gate;
pub mod notify;
pub mod sink;

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::PathBuf;

use crate::detect::Detection;

pub use gate::{AlertGate, AlertState, DEFAULT_COOLDOWN};
pub use notify::{
    notifier_from_name, BackgroundNotifier, BellNotifier, LogNotifier, Notifier, NullNotifier,
};
pub use sink::{AlertSink, SnapshotStore};

/// A detection class that raises alerts on one camera.
///
/// Accepts the camera document layout as well (`confidence`, `threshold`).
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct AlertClassConfig {
    pub name: String,
    /// A detection must score strictly above this to be alert-styled and to
    /// become an alert candidate.
    #[serde(alias = "confidence", default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    /// Additional floor for raising an alert. 0 leaves `confidence_threshold`
    /// as the only gate.
    #[serde(alias = "threshold", default)]
    pub trigger_threshold: f32,
}

fn default_confidence_threshold() -> f32 {
    0.5
}

impl AlertClassConfig {
    pub fn new(name: impl Into<String>, confidence_threshold: f32) -> Self {
        Self {
            name: name.into(),
            confidence_threshold,
            trigger_threshold: 0.0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(anyhow!("alert class name must not be empty"));
        }
        for (label, value) in [
            ("confidence", self.confidence_threshold),
            ("trigger", self.trigger_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!(
                    "alert class '{}' {} threshold {} is outside [0, 1]",
                    self.name,
                    label,
                    value
                ));
            }
        }
        Ok(())
    }

    /// True when `detection` is this class and clears the confidence threshold.
    pub fn matches(&self, detection: &Detection) -> bool {
        detection.class_name == self.name && detection.confidence > self.confidence_threshold
    }

    fn triggers(&self, detection: &Detection) -> bool {
        self.matches(detection) && detection.confidence >= self.trigger_threshold
    }
}

/// Alert class config for `detection`, if it is an above-threshold alert detection.
pub fn alert_class_for<'a>(
    classes: &'a [AlertClassConfig],
    detection: &Detection,
) -> Option<&'a AlertClassConfig> {
    classes.iter().find(|class| class.matches(detection))
}

/// Index of the frame's single alert candidate: the first qualifying detection
/// in iteration order.
pub fn select_candidate(detections: &[Detection], classes: &[AlertClassConfig]) -> Option<usize> {
    detections
        .iter()
        .position(|det| classes.iter().any(|class| class.triggers(det)))
}

/// An alert accepted by the gate, handed to the sink and notifiers.
#[derive(Clone, Debug)]
pub struct AlertEvent {
    pub camera_id: String,
    pub class_name: String,
    pub confidence: f32,
    pub frame_sequence: u64,
    pub at: chrono::DateTime<chrono::Local>,
    /// Where the snapshot was written, when persisting succeeded.
    pub snapshot: Option<PathBuf>,
}
