//! Threat Sentinel
//!
//! Client-resident monitoring loop: periodically captures a still from a
//! video source, submits it to a remote detection service, classifies the
//! returned counts into threat levels, rate-limits outgoing alerts and keeps a
//! bounded incident history for operator review.
//!
//! # Module Structure
//!
//! - `frame`: Encoded still frames
//! - `ingest`: Frame sources (synthetic, HTTP snapshot, local file)
//! - `detect`: Detection service client and wire format
//! - `classify`: Pure threat classification
//! - `alert`: Cooldown-gated alert dispatch and notification sinks
//! - `incident`: Bounded incident log and location directory
//! - `scheduler`: On-demand and repeating analysis cycles
//! - `config`: File + environment configuration

use anyhow::{Context, Result};

pub mod alert;
pub mod classify;
pub mod config;
pub mod detect;
pub mod frame;
pub mod incident;
pub mod ingest;
pub mod scheduler;

pub use alert::{
    AlertContext, AlertDispatcher, DispatchOutcome, FanoutSink, LogSink, MemorySink, MqttSink,
    MqttSinkConfig, NotificationSink, ALERT_COOLDOWN,
};
pub use classify::{classify, AlertCategory, Threat, ThreatAssessment, ThreatLevel};
pub use config::SentinelConfig;
pub use detect::{
    DetectionClient, DetectionResult, HttpDetectionClient, HttpDetectionConfig, ScriptedDetector,
};
pub use frame::EncodedFrame;
pub use incident::{
    Coordinates, IncidentLog, IncidentRecord, LocationDirectory, LocationOverview,
    INCIDENT_LOG_CAPACITY,
};
pub use ingest::{open_source, FrameSource};
pub use scheduler::{
    CycleOutcome, CycleReport, Monitor, Scheduler, SchedulerMode, SchedulerSettings,
    SchedulerStats, SkipReason, TickOutcome, Trigger, TriggerOutcome,
};

/// Build the detection client named by the configured endpoint.
///
/// `stub://<location>` selects the offline demo script.
pub fn open_detector(cfg: &SentinelConfig) -> Result<Box<dyn DetectionClient>> {
    let endpoint = cfg.detection.endpoint.trim();
    if let Some(location) = endpoint.strip_prefix("stub://") {
        let location = if location.is_empty() { "Demo" } else { location };
        return Ok(Box::new(ScriptedDetector::demo(location)));
    }
    let client = HttpDetectionClient::new(HttpDetectionConfig {
        endpoint: endpoint.to_string(),
        timeout: cfg.detection.timeout,
    })?;
    Ok(Box::new(client))
}

/// Log sink, plus MQTT when a broker is configured.
pub fn open_sink(cfg: &SentinelConfig) -> Result<Box<dyn NotificationSink>> {
    let Some(mqtt) = cfg.mqtt.as_ref() else {
        return Ok(Box::new(LogSink));
    };
    let mqtt_sink = MqttSink::connect(mqtt)
        .with_context(|| format!("connect alert sink to {}", mqtt.broker))?;
    log::info!("alerts published to mqtt {} under {}", mqtt.broker, mqtt.topic);
    Ok(Box::new(FanoutSink::new(vec![
        Box::new(LogSink),
        Box::new(mqtt_sink),
    ])))
}

/// Assemble a scheduler from configuration and apply the initial camera and
/// auto-analyze toggles.
pub fn build_scheduler(cfg: &SentinelConfig) -> Result<Scheduler> {
    let source = open_source(&cfg.source.url, cfg.source.width, cfg.source.height)?;
    let detector = open_detector(cfg)?;
    let dispatcher = AlertDispatcher::new(open_sink(cfg)?);
    let monitor = Monitor::new(source, detector, dispatcher, cfg.location_directory());
    let scheduler = Scheduler::new(monitor, cfg.scheduler_settings())?;
    if cfg.schedule.camera_active {
        scheduler.set_camera_active(true)?;
        if cfg.schedule.auto_analyze {
            scheduler.start_auto()?;
        }
    } else if cfg.schedule.auto_analyze {
        log::warn!("auto analysis requested with the camera off; staying idle");
    }
    Ok(scheduler)
}
