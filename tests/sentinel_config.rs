use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::{Builder, NamedTempFile};

use threat_sentinel::config::SentinelConfig;
use threat_sentinel::{build_scheduler, CycleOutcome, TriggerOutcome};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SENTINEL_CONFIG",
        "SENTINEL_SOURCE_URL",
        "SENTINEL_DETECT_URL",
        "SENTINEL_INTERVAL_MS",
        "SENTINEL_MIN_INTERVAL_MS",
        "SENTINEL_AUTO_ANALYZE",
        "SENTINEL_MQTT_BROKER",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "source": { "url": "stub://lobby-cam", "width": 160, "height": 120 },
        "detection": { "endpoint": "http://10.0.0.9:5001/detect", "timeout_ms": 2500 },
        "schedule": { "interval_ms": 2000, "min_interval_ms": 100, "auto_analyze": false },
        "locations": { "Lobby": { "lat": 12.9716, "lon": 77.5946 } }
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("SENTINEL_CONFIG", file.path());
    std::env::set_var("SENTINEL_INTERVAL_MS", "750");
    std::env::set_var("SENTINEL_AUTO_ANALYZE", "yes");

    let cfg = SentinelConfig::load().expect("load config");
    assert_eq!(cfg.source.url, "stub://lobby-cam");
    assert_eq!(cfg.source.width, 160);
    assert_eq!(cfg.detection.endpoint, "http://10.0.0.9:5001/detect");
    assert_eq!(cfg.detection.timeout, Duration::from_millis(2500));
    assert_eq!(cfg.schedule.interval, Duration::from_millis(750));
    assert_eq!(cfg.schedule.min_interval, Duration::from_millis(100));
    assert!(cfg.schedule.auto_analyze);
    assert!(cfg.mqtt.is_none());

    let coords = cfg
        .location_directory()
        .resolve("  lobby ")
        .expect("lobby coordinates");
    assert!((coords.lat - 12.9716).abs() < 1e-9);

    clear_env();
}

#[test]
fn toml_files_are_selected_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp toml config");
    let toml = r#"
        [detection]
        endpoint = "stub://Atrium"

        [mqtt]
        broker = "127.0.0.1:1883"
        topic = "site-a/alerts"
    "#;
    file.write_all(toml.as_bytes()).expect("write config");

    std::env::set_var("SENTINEL_MQTT_BROKER", "broker.local:1884");
    let cfg = SentinelConfig::load_from(Some(file.path())).expect("load toml");
    let mqtt = cfg.mqtt.expect("mqtt configured");
    assert_eq!(mqtt.broker, "broker.local:1884");
    assert_eq!(mqtt.topic, "site-a/alerts");
    assert_eq!(cfg.detection.endpoint, "stub://Atrium");

    clear_env();
}

#[test]
fn interval_below_the_floor_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SENTINEL_INTERVAL_MS", "10");
    let err = SentinelConfig::load_from(None).expect_err("below floor");
    assert!(err.to_string().contains("below the minimum"));

    std::env::set_var("SENTINEL_MIN_INTERVAL_MS", "5");
    let cfg = SentinelConfig::load_from(None).expect("lowered floor");
    assert_eq!(cfg.schedule.interval, Duration::from_millis(10));

    std::env::set_var("SENTINEL_INTERVAL_MS", "soon");
    assert!(SentinelConfig::load_from(None).is_err());

    clear_env();
}

#[test]
fn malformed_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(b"{ \"schedule\": { \"interval_ms\": \"fast\" } }")
        .expect("write config");
    let err = SentinelConfig::load_from(Some(file.path())).expect_err("bad type");
    assert!(err.to_string().contains("invalid config file"));

    clear_env();
}

#[test]
fn configured_scheduler_runs_against_the_demo_detector() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("SENTINEL_SOURCE_URL", "stub://atrium-cam");
    std::env::set_var("SENTINEL_DETECT_URL", "stub://Atrium");
    let cfg = SentinelConfig::load_from(None).expect("load config");
    clear_env();

    let scheduler = build_scheduler(&cfg).expect("scheduler");
    assert!(scheduler.camera_active().expect("camera"));

    let report = match scheduler.analyze_now().expect("trigger") {
        TriggerOutcome::Completed(report) => report,
        other => panic!("unexpected trigger outcome {:?}", other),
    };
    match report.outcome {
        CycleOutcome::Completed { incident, .. } => {
            assert_eq!(incident.detection.location, "Atrium");
        }
        other => panic!("unexpected cycle outcome {:?}", other),
    }
    assert_eq!(scheduler.incidents().expect("incidents").len(), 1);
    scheduler.shutdown();
}
