use std::sync::Mutex;
use std::time::Duration;

use tempfile::Builder;

use camwatch::config::CamwatchConfig;
use camwatch::detect::Device;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "CAMWATCH_CONFIG",
        "CAMWATCH_CAMERA_ID",
        "CAMWATCH_CAMERA_IP",
        "CAMWATCH_STREAM_URL",
        "CAMWATCH_MODEL_PATH",
        "CAMWATCH_DEVICE",
        "CAMWATCH_API_ADDR",
        "CAMWATCH_CAPTURE_DIR",
        "CAMWATCH_COOLDOWN_SECS",
        "CAMWATCH_ALERT_CLASSES",
        "CAMWATCH_FONT_PATH",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
    let mut file = Builder::new().suffix(suffix).tempfile().expect("temp config");
    std::io::Write::write_all(&mut file, contents.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_json_config_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        ".json",
        r#"{
            "camera": {
                "id": "7",
                "stream_url": "http://10.0.0.9:8080/video",
                "target_fps": 12,
                "alert_classes": [
                    {"name": "person", "confidence_threshold": 0.6},
                    {"name": "knife", "confidence_threshold": 0.3, "trigger_threshold": 0.5}
                ]
            },
            "detector": {"backend": "stub", "confidence": 0.25, "iou": 0.5},
            "alerts": {"cooldown_secs": 2.5, "capture_dir": "/tmp/caps", "notifier": "Bell"},
            "api": {"addr": "0.0.0.0:9000"},
            "stream": {"poll_interval_ms": 50, "jpeg_quality": 70},
            "pipeline": {"max_consecutive_failures": 0}
        }"#,
    );

    std::env::set_var("CAMWATCH_CONFIG", file.path());
    std::env::set_var("CAMWATCH_CAMERA_ID", "8");
    std::env::set_var("CAMWATCH_COOLDOWN_SECS", "10");

    let cfg = CamwatchConfig::load().expect("load config");

    assert_eq!(cfg.camera_id, "8");
    assert_eq!(cfg.stream_url, "http://10.0.0.9:8080/video");
    assert_eq!(cfg.target_fps, 12);
    assert_eq!(cfg.alert_classes.len(), 2);
    assert_eq!(cfg.alert_classes[1].trigger_threshold, 0.5);
    assert_eq!(cfg.detector.backend, "stub");
    assert_eq!(cfg.detector.confidence, 0.25);
    assert_eq!(cfg.cooldown, Duration::from_secs(10));
    assert_eq!(cfg.capture_dir.to_str(), Some("/tmp/caps"));
    assert_eq!(cfg.notifier, "bell");
    assert_eq!(cfg.api_addr, "0.0.0.0:9000");
    assert_eq!(cfg.poll_interval, Duration::from_millis(50));
    assert_eq!(cfg.jpeg_quality, 70);
    assert_eq!(cfg.max_consecutive_failures, 0);

    clear_env();
}

#[test]
fn camera_document_configures_the_service() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        ".json",
        r#"{
            "camera": {
                "_id": "65f1c0ffee",
                "name": "Front door",
                "ip": "192.168.1.20:8080",
                "user_id": "u-42",
                "alert_classes": [{"name": "person", "confidence": 0.55, "threshold": 0.7}]
            }
        }"#,
    );

    let cfg = CamwatchConfig::load_from(Some(file.path())).expect("load camera document");
    assert_eq!(cfg.camera_id, "65f1c0ffee");
    assert_eq!(cfg.camera_name.as_deref(), Some("Front door"));
    assert_eq!(cfg.user_id.as_deref(), Some("u-42"));
    assert_eq!(cfg.stream_url, "http://192.168.1.20:8080/video");
    assert_eq!(cfg.alert_classes[0].confidence_threshold, 0.55);
    assert_eq!(cfg.alert_classes[0].trigger_threshold, 0.7);

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        ".toml",
        r#"
font_path = "/usr/share/fonts/DejaVuSans.ttf"

[camera]
id = 3
stream_url = "stub://camera?frames=10"

[[camera.alert_classes]]
name = "dog"
confidence_threshold = 0.45

[detector]
backend = "stub"
device = "cpu"
"#,
    );

    let cfg = CamwatchConfig::load_from(Some(file.path())).expect("load toml config");
    assert_eq!(cfg.camera_id, "3");
    assert_eq!(cfg.stream_url, "stub://camera?frames=10");
    assert_eq!(cfg.alert_classes[0].name, "dog");
    assert_eq!(cfg.detector.device, Device::Cpu);
    assert!(cfg.font_path.is_some());

    clear_env();
}

#[test]
fn env_alert_classes_and_camera_ip() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("CAMWATCH_CAMERA_IP", "10.1.1.1");
    std::env::set_var("CAMWATCH_ALERT_CLASSES", "person:0.6,knife:0.3:0.5");

    let cfg = CamwatchConfig::load().expect("load from env");
    assert_eq!(cfg.stream_url, "http://10.1.1.1/video");
    assert_eq!(cfg.alert_classes.len(), 2);
    assert_eq!(cfg.alert_classes[1].name, "knife");
    assert_eq!(cfg.alert_classes[1].trigger_threshold, 0.5);

    std::env::set_var("CAMWATCH_STREAM_URL", "stub://camera");
    let cfg = CamwatchConfig::load().expect("explicit url wins");
    assert_eq!(cfg.stream_url, "stub://camera");

    clear_env();
}

#[test]
fn rejects_invalid_settings() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("CAMWATCH_ALERT_CLASSES", "person:1.5");
    assert!(CamwatchConfig::load().is_err());
    clear_env();

    std::env::set_var("CAMWATCH_COOLDOWN_SECS", "soon");
    assert!(CamwatchConfig::load().is_err());
    clear_env();

    std::env::set_var("CAMWATCH_DEVICE", "tpu");
    assert!(CamwatchConfig::load().is_err());
    clear_env();

    let bad = write_config(".json", "{ not json");
    assert!(CamwatchConfig::load_from(Some(bad.path())).is_err());
    assert!(CamwatchConfig::load_from(Some(std::path::Path::new("/nonexistent/camwatch.json"))).is_err());

    clear_env();
}
