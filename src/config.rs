use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::alert::MqttSinkConfig;
use crate::frame::MAX_FRAME_DIMENSION;
use crate::incident::{Coordinates, LocationDirectory};
use crate::scheduler::{SchedulerSettings, DEFAULT_INTERVAL, DEFAULT_MIN_INTERVAL};

const DEFAULT_SOURCE_URL: &str = "stub://camera";
const DEFAULT_SOURCE_WIDTH: u32 = 640;
const DEFAULT_SOURCE_HEIGHT: u32 = 480;
const DEFAULT_DETECT_URL: &str = "http://127.0.0.1:5001/detect";
const DEFAULT_DETECT_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_MQTT_TOPIC: &str = "sentinel/alerts";
const DEFAULT_MQTT_CLIENT_ID: &str = "sentineld";

#[derive(Debug, Deserialize, Default)]
struct SentinelConfigFile {
    source: Option<SourceConfigFile>,
    detection: Option<DetectionConfigFile>,
    schedule: Option<ScheduleConfigFile>,
    locations: Option<BTreeMap<String, Coordinates>>,
    mqtt: Option<MqttConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    endpoint: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ScheduleConfigFile {
    interval_ms: Option<u64>,
    min_interval_ms: Option<u64>,
    auto_analyze: Option<bool>,
    camera_active: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct MqttConfigFile {
    broker: Option<String>,
    topic: Option<String>,
    client_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SentinelConfig {
    pub source: SourceSettings,
    pub detection: DetectionSettings,
    pub schedule: ScheduleSettings,
    pub locations: BTreeMap<String, Coordinates>,
    pub mqtt: Option<MqttSinkConfig>,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub url: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    /// `http(s)://` endpoint, or `stub://<location>` for the offline demo script.
    pub endpoint: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ScheduleSettings {
    pub interval: Duration,
    pub min_interval: Duration,
    pub auto_analyze: bool,
    pub camera_active: bool,
}

impl SentinelConfig {
    /// File named by `SENTINEL_CONFIG` (optional), then `SENTINEL_*` overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SENTINEL_CONFIG")
            .ok()
            .filter(|path| !path.trim().is_empty());
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Explicit config file (JSON, or TOML by extension), then `SENTINEL_*`
    /// overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SentinelConfigFile) -> Self {
        let source = file.source.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let schedule = file.schedule.unwrap_or_default();
        let mqtt = file.mqtt.and_then(|mqtt| {
            mqtt.broker.map(|broker| MqttSinkConfig {
                broker,
                topic: mqtt.topic.unwrap_or_else(|| DEFAULT_MQTT_TOPIC.to_string()),
                client_id: mqtt
                    .client_id
                    .unwrap_or_else(|| DEFAULT_MQTT_CLIENT_ID.to_string()),
            })
        });
        Self {
            source: SourceSettings {
                url: source
                    .url
                    .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
                width: source.width.unwrap_or(DEFAULT_SOURCE_WIDTH),
                height: source.height.unwrap_or(DEFAULT_SOURCE_HEIGHT),
            },
            detection: DetectionSettings {
                endpoint: detection
                    .endpoint
                    .unwrap_or_else(|| DEFAULT_DETECT_URL.to_string()),
                timeout: Duration::from_millis(
                    detection.timeout_ms.unwrap_or(DEFAULT_DETECT_TIMEOUT_MS),
                ),
            },
            schedule: ScheduleSettings {
                interval: schedule
                    .interval_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_INTERVAL),
                min_interval: schedule
                    .min_interval_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_MIN_INTERVAL),
                auto_analyze: schedule.auto_analyze.unwrap_or(false),
                camera_active: schedule.camera_active.unwrap_or(true),
            },
            locations: file.locations.unwrap_or_default(),
            mqtt,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("SENTINEL_SOURCE_URL") {
            if !url.trim().is_empty() {
                self.source.url = url;
            }
        }
        if let Ok(url) = std::env::var("SENTINEL_DETECT_URL") {
            if !url.trim().is_empty() {
                self.detection.endpoint = url;
            }
        }
        if let Ok(ms) = std::env::var("SENTINEL_INTERVAL_MS") {
            self.schedule.interval =
                Duration::from_millis(parse_millis("SENTINEL_INTERVAL_MS", &ms)?);
        }
        if let Ok(ms) = std::env::var("SENTINEL_MIN_INTERVAL_MS") {
            self.schedule.min_interval =
                Duration::from_millis(parse_millis("SENTINEL_MIN_INTERVAL_MS", &ms)?);
        }
        if let Ok(flag) = std::env::var("SENTINEL_AUTO_ANALYZE") {
            self.schedule.auto_analyze = parse_flag("SENTINEL_AUTO_ANALYZE", &flag)?;
        }
        if let Ok(broker) = std::env::var("SENTINEL_MQTT_BROKER") {
            if !broker.trim().is_empty() {
                match self.mqtt.as_mut() {
                    Some(mqtt) => mqtt.broker = broker,
                    None => {
                        self.mqtt = Some(MqttSinkConfig {
                            broker,
                            ..MqttSinkConfig::default()
                        })
                    }
                }
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.scheduler_settings().validate()?;

        let endpoint = self.detection.endpoint.trim();
        if endpoint.is_empty() {
            return Err(anyhow!("detection endpoint must not be empty"));
        }
        if !endpoint.starts_with("stub://") {
            let url = url::Url::parse(endpoint)
                .map_err(|e| anyhow!("invalid detection endpoint '{}': {}", endpoint, e))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(anyhow!(
                    "detection endpoint must be http(s) or stub://, got '{}'",
                    endpoint
                ));
            }
        }
        if self.detection.timeout.is_zero() {
            return Err(anyhow!("detection timeout must be greater than zero"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source width and height must be greater than zero"));
        }
        if self.source.width > MAX_FRAME_DIMENSION || self.source.height > MAX_FRAME_DIMENSION {
            return Err(anyhow!(
                "source dimensions {}x{} exceed the {}px limit",
                self.source.width,
                self.source.height,
                MAX_FRAME_DIMENSION
            ));
        }
        for (name, coords) in &self.locations {
            Coordinates::new(coords.lat, coords.lon)
                .map_err(|e| anyhow!("location '{}': {}", name, e))?;
        }
        Ok(())
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            interval: self.schedule.interval,
            min_interval: self.schedule.min_interval,
        }
    }

    pub fn location_directory(&self) -> LocationDirectory {
        let mut directory = LocationDirectory::new();
        for (name, coords) in &self.locations {
            directory.insert(name, *coords);
        }
        directory
    }
}

fn read_config_file(path: &Path) -> Result<SentinelConfigFile> {
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

fn parse_millis(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow!("{} must be an integer number of milliseconds", key))
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!("{} must be a boolean (true/false)", key)),
    }
}
