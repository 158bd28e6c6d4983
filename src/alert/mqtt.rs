//! MQTT notification sink.
//!
//! Publishes each alert as JSON to `<topic>/<category>` with QoS 1. The
//! connection event loop runs on its own thread and keeps reconnecting with a
//! capped backoff until the sink is closed; publishing never blocks the
//! dispatcher (a full request queue is a delivery failure).

use anyhow::{anyhow, Context, Result};
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, MqttOptions};
use rumqttc::Outgoing;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::sink::NotificationSink;
use crate::classify::AlertCategory;

const REQUEST_QUEUE_CAPACITY: usize = 16;
const RECONNECT_BACKOFF_MIN: Duration = Duration::from_millis(500);
const RECONNECT_BACKOFF_MAX: Duration = Duration::from_secs(30);
/// Granularity at which a sleeping event loop notices `close()`.
const CLOSE_POLL: Duration = Duration::from_millis(50);

#[derive(Clone, Debug)]
pub struct MqttSinkConfig {
    /// Broker as "host:port".
    pub broker: String,
    pub topic: String,
    pub client_id: String,
}

impl Default for MqttSinkConfig {
    fn default() -> Self {
        Self {
            broker: "127.0.0.1:1883".to_string(),
            topic: "sentinel/alerts".to_string(),
            client_id: "sentineld".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct AlertPayload<'a> {
    category: &'a str,
    message: &'a str,
    timestamp_ms: u64,
}

pub struct MqttSink {
    client: Client,
    topic: String,
    closing: Arc<AtomicBool>,
    connection_handle: Mutex<Option<JoinHandle<()>>>,
}

impl MqttSink {
    /// Start the connection event loop. The broker does not have to be
    /// reachable yet; alerts queue until it is.
    pub fn connect(config: &MqttSinkConfig) -> Result<Self> {
        let (host, port) = parse_broker(&config.broker)?;
        let mut options = MqttOptions::new(config.client_id.clone(), host, port);
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_start(true);
        let (client, connection) = Client::new(options, REQUEST_QUEUE_CAPACITY);
        let closing = Arc::new(AtomicBool::new(false));
        let handle = spawn_event_loop(connection, config.broker.clone(), closing.clone())?;
        Ok(Self {
            client,
            topic: config.topic.trim_end_matches('/').to_string(),
            closing,
            connection_handle: Mutex::new(Some(handle)),
        })
    }
}

impl NotificationSink for MqttSink {
    fn name(&self) -> &str {
        "mqtt"
    }

    fn notify(&self, message: &str, category: AlertCategory) -> Result<()> {
        if self.closing.load(Ordering::Acquire) {
            return Err(anyhow!("mqtt sink is closed"));
        }
        let payload = AlertPayload {
            category: category.as_str(),
            message,
            timestamp_ms: now_millis(),
        };
        let json = serde_json::to_vec(&payload).context("serialize alert payload")?;
        let topic = format!("{}/{}", self.topic, category.as_str());
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, json)
            .map_err(|e| anyhow!("mqtt publish failed: {}", e))
    }

    /// Queue a disconnect behind any pending publishes and wait for the event
    /// loop to finish.
    fn close(&self) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.client.disconnect() {
            log::debug!("mqtt disconnect request not queued: {}", e);
        }
        let handle = match self.connection_handle.lock() {
            Ok(mut handle) => handle.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Drop for MqttSink {
    fn drop(&mut self) {
        self.closing.store(true, Ordering::Release);
    }
}

fn spawn_event_loop(
    mut connection: Connection,
    broker: String,
    closing: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("mqtt-alerts".to_string())
        .spawn(move || {
            let mut backoff = RECONNECT_BACKOFF_MIN;
            let mut connected = true;
            for event in connection.iter() {
                match event {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
                    Ok(Event::Incoming(_)) => {
                        if !connected {
                            log::info!("mqtt connection to {} restored", broker);
                        }
                        connected = true;
                        backoff = RECONNECT_BACKOFF_MIN;
                    }
                    Ok(Event::Outgoing(_)) => {}
                    Err(e) => {
                        if closing.load(Ordering::Acquire) {
                            break;
                        }
                        if connected {
                            log::warn!("mqtt connection to {} lost: {}", broker, e);
                        } else {
                            log::debug!("mqtt reconnect to {} failed: {}", broker, e);
                        }
                        connected = false;
                        if sleep_unless_closing(backoff, &closing) {
                            break;
                        }
                        backoff = (backoff * 2).min(RECONNECT_BACKOFF_MAX);
                    }
                }
            }
        })
        .context("spawn mqtt event loop thread")
}

/// Sleep for `total`, waking early when the sink closes. Returns true if it
/// closed.
fn sleep_unless_closing(total: Duration, closing: &AtomicBool) -> bool {
    let mut slept = Duration::ZERO;
    while slept < total {
        if closing.load(Ordering::Acquire) {
            return true;
        }
        let step = CLOSE_POLL.min(total - slept);
        std::thread::sleep(step);
        slept += step;
    }
    closing.load(Ordering::Acquire)
}

pub(crate) fn parse_broker(broker: &str) -> Result<(String, u16)> {
    let (host, port) = broker
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("mqtt broker '{}' must be host:port", broker))?;
    if host.is_empty() {
        return Err(anyhow!("mqtt broker '{}' has an empty host", broker));
    }
    let port: u16 = port
        .parse()
        .map_err(|_| anyhow!("mqtt broker '{}' has an invalid port", broker))?;
    Ok((host.to_string(), port))
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_port_brokers() {
        assert_eq!(
            parse_broker("core-mosquitto:1883").expect("broker"),
            ("core-mosquitto".to_string(), 1883)
        );
        assert!(parse_broker("localhost").is_err());
        assert!(parse_broker(":1883").is_err());
        assert!(parse_broker("localhost:mqtt").is_err());
    }

    #[test]
    fn alerts_queue_while_the_broker_is_unreachable() {
        let sink = MqttSink::connect(&MqttSinkConfig {
            broker: "127.0.0.1:1".to_string(),
            ..MqttSinkConfig::default()
        })
        .expect("sink");
        std::thread::sleep(Duration::from_millis(500));

        sink.notify("fire at lobby", AlertCategory::Fire)
            .expect("queued after a refused connect");
        sink.notify("crowd at hall", AlertCategory::Crowd)
            .expect("still queued");

        sink.close();
        sink.close();
        assert!(sink.notify("late", AlertCategory::Fire).is_err());
    }

    #[test]
    fn payload_names_category_and_message() {
        let payload = AlertPayload {
            category: AlertCategory::Crowd.as_str(),
            message: "crowd at hall",
            timestamp_ms: 1_700_000_000_000,
        };
        let json = serde_json::to_string(&payload).expect("serialize");
        assert_eq!(
            json,
            r#"{"category":"crowd","message":"crowd at hall","timestamp_ms":1700000000000}"#
        );
    }
}
