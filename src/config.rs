use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::alert::{AlertClassConfig, DEFAULT_COOLDOWN};
use crate::api::ApiConfig;
use crate::broadcast::{DEFAULT_JPEG_QUALITY, DEFAULT_POLL_INTERVAL};
use crate::detect::{DetectorSettings, Device};
use crate::ingest::{camera_feed_url, SourceConfig};
use crate::pipeline::{PipelineConfig, DEFAULT_MAX_CONSECUTIVE_FAILURES};

const DEFAULT_CAMERA_ID: &str = "0";
const DEFAULT_STREAM_URL: &str = "stub://camera";
const DEFAULT_API_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_CAPTURE_DIR: &str = "captures";
const DEFAULT_NOTIFIER: &str = "log";

#[derive(Debug, Deserialize, Default)]
struct CamwatchConfigFile {
    camera: Option<CameraConfigFile>,
    detector: Option<DetectorConfigFile>,
    alerts: Option<AlertsConfigFile>,
    api: Option<ApiConfigFile>,
    stream: Option<StreamConfigFile>,
    pipeline: Option<PipelineConfigFile>,
    font_path: Option<PathBuf>,
}

/// Camera section. Also matches a camera record exported from the management
/// backend: `{name, ip, user_id, alert_classes: [{name, confidence, threshold}]}`.
#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    #[serde(alias = "_id")]
    id: Option<serde_json::Value>,
    name: Option<String>,
    ip: Option<String>,
    user_id: Option<String>,
    stream_url: Option<String>,
    target_fps: Option<u32>,
    alert_classes: Option<Vec<AlertClassConfig>>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    device: Option<String>,
    confidence: Option<f32>,
    iou: Option<f32>,
    input_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertsConfigFile {
    cooldown_secs: Option<f64>,
    capture_dir: Option<PathBuf>,
    notifier: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    poll_interval_ms: Option<u64>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    max_consecutive_failures: Option<u32>,
}

/// Startup configuration for one camera service. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct CamwatchConfig {
    pub camera_id: String,
    pub camera_name: Option<String>,
    pub user_id: Option<String>,
    pub stream_url: String,
    pub target_fps: u32,
    pub detector: DetectorSettings,
    pub alert_classes: Vec<AlertClassConfig>,
    pub cooldown: Duration,
    pub capture_dir: PathBuf,
    pub notifier: String,
    pub api_addr: String,
    pub poll_interval: Duration,
    pub jpeg_quality: u8,
    pub max_consecutive_failures: u32,
    pub font_path: Option<PathBuf>,
}

impl CamwatchConfig {
    /// File named by `CAMWATCH_CONFIG` (if any), then `CAMWATCH_*` overrides,
    /// then validation.
    pub fn load() -> Result<Self> {
        let config_path = env_value("CAMWATCH_CONFIG").map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Like `load`, with the config file given explicitly.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self> {
        let file_cfg = match config_path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CamwatchConfigFile) -> Result<Self> {
        let camera = file.camera.unwrap_or_default();
        let camera_id = match camera.id {
            Some(serde_json::Value::String(id)) => id,
            Some(serde_json::Value::Number(id)) => id.to_string(),
            Some(other) => return Err(anyhow!("camera id must be a string or number, got {}", other)),
            None => DEFAULT_CAMERA_ID.to_string(),
        };
        let stream_url = match (camera.stream_url, camera.ip.as_deref()) {
            (Some(url), _) => url,
            (None, Some(ip)) => camera_feed_url(ip),
            (None, None) => DEFAULT_STREAM_URL.to_string(),
        };

        let detector_file = file.detector.unwrap_or_default();
        let defaults = DetectorSettings::default();
        let device = match detector_file.device.as_deref() {
            Some(device) => device.parse::<Device>()?,
            None => defaults.device,
        };
        let detector = DetectorSettings {
            backend: detector_file.backend.unwrap_or(defaults.backend),
            model_path: detector_file.model_path.unwrap_or(defaults.model_path),
            device,
            confidence: detector_file.confidence.unwrap_or(defaults.confidence),
            iou: detector_file.iou.unwrap_or(defaults.iou),
            input_size: detector_file.input_size.unwrap_or(defaults.input_size),
            class_names: defaults.class_names,
        };

        let alerts = file.alerts.unwrap_or_default();
        let cooldown = match alerts.cooldown_secs {
            Some(secs) => cooldown_from_secs(secs)?,
            None => DEFAULT_COOLDOWN,
        };
        let stream = file.stream.unwrap_or_default();

        Ok(Self {
            camera_id,
            camera_name: camera.name,
            user_id: camera.user_id,
            stream_url,
            target_fps: camera.target_fps.unwrap_or(0),
            detector,
            alert_classes: camera.alert_classes.unwrap_or_default(),
            cooldown,
            capture_dir: alerts
                .capture_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CAPTURE_DIR)),
            notifier: alerts
                .notifier
                .unwrap_or_else(|| DEFAULT_NOTIFIER.to_string()),
            api_addr: file
                .api
                .and_then(|api| api.addr)
                .unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            poll_interval: stream
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_POLL_INTERVAL),
            jpeg_quality: stream.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            max_consecutive_failures: file
                .pipeline
                .and_then(|pipeline| pipeline.max_consecutive_failures)
                .unwrap_or(DEFAULT_MAX_CONSECUTIVE_FAILURES),
            font_path: file.font_path,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(id) = env_value("CAMWATCH_CAMERA_ID") {
            self.camera_id = id;
        }
        // An explicit stream URL wins over one derived from the camera address.
        if let Some(ip) = env_value("CAMWATCH_CAMERA_IP") {
            self.stream_url = camera_feed_url(&ip);
        }
        if let Some(url) = env_value("CAMWATCH_STREAM_URL") {
            self.stream_url = url;
        }
        if let Some(path) = env_value("CAMWATCH_MODEL_PATH") {
            self.detector.model_path = PathBuf::from(path);
        }
        if let Some(device) = env_value("CAMWATCH_DEVICE") {
            self.detector.device = device.parse()?;
        }
        if let Some(addr) = env_value("CAMWATCH_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(dir) = env_value("CAMWATCH_CAPTURE_DIR") {
            self.capture_dir = PathBuf::from(dir);
        }
        if let Some(secs) = env_value("CAMWATCH_COOLDOWN_SECS") {
            let secs: f64 = secs
                .parse()
                .map_err(|_| anyhow!("CAMWATCH_COOLDOWN_SECS must be a number of seconds"))?;
            self.cooldown = cooldown_from_secs(secs)?;
        }
        if let Some(classes) = env_value("CAMWATCH_ALERT_CLASSES") {
            self.alert_classes = parse_alert_classes(&classes)?;
        }
        if let Some(path) = env_value("CAMWATCH_FONT_PATH") {
            self.font_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    pub fn validate(&mut self) -> Result<()> {
        if self.camera_id.trim().is_empty() {
            return Err(anyhow!("camera id must not be empty"));
        }
        url::Url::parse(&self.stream_url)
            .with_context(|| format!("invalid stream url '{}'", self.stream_url))?;
        for (label, value) in [
            ("confidence", self.detector.confidence),
            ("iou", self.detector.iou),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("detector {} {} is outside [0, 1]", label, value));
            }
        }
        if self.detector.input_size == 0 || self.detector.input_size % 32 != 0 {
            return Err(anyhow!(
                "detector input size {} must be a positive multiple of 32",
                self.detector.input_size
            ));
        }
        for class in &self.alert_classes {
            class.validate()?;
        }
        if self.alert_classes.is_empty() {
            log::warn!("no alert classes configured; detections will be drawn but never alert");
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(anyhow!("jpeg quality {} is outside 1..=100", self.jpeg_quality));
        }
        if self.poll_interval.is_zero() {
            return Err(anyhow!("stream poll interval must be greater than zero"));
        }
        self.notifier = self.notifier.trim().to_lowercase();
        Ok(())
    }

    pub fn source_config(&self) -> SourceConfig {
        SourceConfig {
            url: self.stream_url.clone(),
            target_fps: self.target_fps,
            ..SourceConfig::default()
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            camera_id: self.camera_id.clone(),
            alert_classes: self.alert_classes.clone(),
            cooldown: self.cooldown,
            max_consecutive_failures: self.max_consecutive_failures,
        }
    }

    pub fn api_config(&self) -> ApiConfig {
        ApiConfig {
            addr: self.api_addr.clone(),
        }
    }
}

fn read_config_file(path: &Path) -> Result<CamwatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn cooldown_from_secs(secs: f64) -> Result<Duration> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(anyhow!("cooldown must be a non-negative number of seconds"));
    }
    Ok(Duration::from_secs_f64(secs))
}

/// Parse `name[:confidence[:trigger]]` entries separated by commas.
pub fn parse_alert_classes(value: &str) -> Result<Vec<AlertClassConfig>> {
    split_csv(value)
        .into_iter()
        .map(|entry| {
            let mut parts = entry.split(':').map(str::trim);
            let name = parts.next().unwrap_or_default();
            let mut class = AlertClassConfig::new(name, 0.5);
            if let Some(conf) = parts.next() {
                class.confidence_threshold = conf
                    .parse()
                    .map_err(|_| anyhow!("invalid confidence in alert class '{}'", entry))?;
            }
            if let Some(trigger) = parts.next() {
                class.trigger_threshold = trigger
                    .parse()
                    .map_err(|_| anyhow!("invalid trigger threshold in alert class '{}'", entry))?;
            }
            if parts.next().is_some() {
                return Err(anyhow!("alert class '{}' has too many fields", entry));
            }
            Ok(class)
        })
        .collect()
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
