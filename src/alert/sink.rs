use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use image::ImageFormat;
use std::path::{Path, PathBuf};

use super::{AlertEvent, Notifier};
use crate::detect::Detection;
use crate::frame::Frame;

pub const DEFAULT_CAPTURE_DIR: &str = "captures";

/// Writes alert snapshots as JPEG files.
///
/// Files are named `camera<id>_<class>_<YYYYmmdd_HHMMSS>.jpg`; two alerts for
/// the same class and camera within one second share a name and the later one
/// overwrites the earlier.
#[derive(Clone, Debug)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, camera_id: &str, class_name: &str, at: &DateTime<Local>) -> PathBuf {
        self.dir.join(format!(
            "camera{}_{}_{}.jpg",
            file_safe(camera_id),
            file_safe(class_name),
            at.format("%Y%m%d_%H%M%S")
        ))
    }

    pub fn save(
        &self,
        frame: &Frame,
        camera_id: &str,
        class_name: &str,
        at: &DateTime<Local>,
    ) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("create capture dir {}", self.dir.display()))?;
        let path = self.path_for(camera_id, class_name, at);
        frame
            .to_image()?
            .save_with_format(&path, ImageFormat::Jpeg)
            .with_context(|| format!("write alert snapshot {}", path.display()))?;
        Ok(path)
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPTURE_DIR)
    }
}

fn file_safe(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Side effects of an accepted alert: snapshot first, then notification.
///
/// Neither step can fail the caller; errors are logged and the event is
/// returned with whatever succeeded.
pub struct AlertSink {
    camera_id: String,
    store: SnapshotStore,
    notifier: Box<dyn Notifier>,
}

impl AlertSink {
    pub fn new(
        camera_id: impl Into<String>,
        store: SnapshotStore,
        notifier: Box<dyn Notifier>,
    ) -> Self {
        Self {
            camera_id: camera_id.into(),
            store,
            notifier,
        }
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    pub fn dispatch(&self, frame: &Frame, detection: &Detection) -> AlertEvent {
        let at = Local::now();
        let snapshot = match self
            .store
            .save(frame, &self.camera_id, &detection.class_name, &at)
        {
            Ok(path) => {
                log::info!("saved alert snapshot: {}", path.display());
                Some(path)
            }
            Err(err) => {
                log::error!("alert snapshot failed: {:#}", err);
                None
            }
        };

        let event = AlertEvent {
            camera_id: self.camera_id.clone(),
            class_name: detection.class_name.clone(),
            confidence: detection.confidence,
            frame_sequence: frame.sequence,
            at,
            snapshot,
        };
        if let Err(err) = self.notifier.notify(&event) {
            log::error!(
                "alert notification via '{}' failed: {:#}",
                self.notifier.name(),
                err
            );
        }
        event
    }
}
