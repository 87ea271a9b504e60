use anyhow::{anyhow, Result};
use std::io::Write;
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::Mutex;
use std::thread::JoinHandle;

use super::AlertEvent;

/// Notification capability for accepted alerts.
///
/// `notify` is called from the pipeline thread and must return quickly; wrap
/// anything that can block in `BackgroundNotifier`.
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    fn notify(&self, event: &AlertEvent) -> Result<()>;
}

/// Default notifier: a warning in the log.
#[derive(Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    fn notify(&self, event: &AlertEvent) -> Result<()> {
        log::warn!(
            "ALERT: {} detected on camera {} at {} (conf={:.2}, frame #{})",
            event.class_name,
            event.camera_id,
            event.at.format("%Y-%m-%d %H:%M:%S"),
            event.confidence,
            event.frame_sequence
        );
        Ok(())
    }
}

/// Terminal bell on stderr, plus the log line.
#[derive(Default)]
pub struct BellNotifier;

impl Notifier for BellNotifier {
    fn name(&self) -> &'static str {
        "bell"
    }

    fn notify(&self, event: &AlertEvent) -> Result<()> {
        LogNotifier.notify(event)?;
        let mut stderr = std::io::stderr().lock();
        stderr.write_all(b"\x07")?;
        stderr.flush()?;
        Ok(())
    }
}

#[derive(Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn name(&self) -> &'static str {
        "none"
    }

    fn notify(&self, _event: &AlertEvent) -> Result<()> {
        Ok(())
    }
}

/// Runs another notifier on its own thread behind a bounded queue.
///
/// `notify` never blocks: when the queue is full the event is dropped and the
/// call returns an error for the caller to log.
pub struct BackgroundNotifier {
    name: &'static str,
    tx: Mutex<Option<SyncSender<AlertEvent>>>,
    join: Option<JoinHandle<()>>,
}

impl BackgroundNotifier {
    pub fn spawn(inner: Box<dyn Notifier>, capacity: usize) -> Result<Self> {
        let name = inner.name();
        let (tx, rx) = mpsc::sync_channel::<AlertEvent>(capacity.max(1));
        let join = std::thread::Builder::new()
            .name(format!("notify-{}", name))
            .spawn(move || {
                for event in rx {
                    if let Err(err) = inner.notify(&event) {
                        log::error!("notifier '{}' failed: {:#}", inner.name(), err);
                    }
                }
            })?;
        Ok(Self {
            name,
            tx: Mutex::new(Some(tx)),
            join: Some(join),
        })
    }
}

impl Notifier for BackgroundNotifier {
    fn name(&self) -> &'static str {
        self.name
    }

    fn notify(&self, event: &AlertEvent) -> Result<()> {
        let guard = self
            .tx
            .lock()
            .map_err(|_| anyhow!("notifier queue lock poisoned"))?;
        let tx = guard
            .as_ref()
            .ok_or_else(|| anyhow!("notifier '{}' is shut down", self.name))?;
        match tx.try_send(event.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(anyhow!(
                "notifier '{}' queue full; dropped alert for {}",
                self.name,
                event.class_name
            )),
            Err(TrySendError::Disconnected(_)) => {
                Err(anyhow!("notifier '{}' worker has exited", self.name))
            }
        }
    }
}

impl Drop for BackgroundNotifier {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop once the queue drains.
        if let Ok(mut guard) = self.tx.lock() {
            guard.take();
        }
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Build a notifier by config name. Anything other than `none` runs in the
/// background.
pub fn notifier_from_name(name: &str) -> Result<Box<dyn Notifier>> {
    let inner: Box<dyn Notifier> = match name.trim().to_lowercase().as_str() {
        "none" => return Ok(Box::new(NullNotifier)),
        "log" => Box::new(LogNotifier),
        "bell" => Box::new(BellNotifier),
        other => {
            return Err(anyhow!(
                "unknown notifier '{}'; expected log, bell or none",
                other
            ))
        }
    };
    Ok(Box::new(BackgroundNotifier::spawn(inner, 16)?))
}
