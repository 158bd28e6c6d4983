use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use crate::classify::AlertCategory;

/// Fire-and-forget notification channel (log, toast, broker, ...).
pub trait NotificationSink: Send {
    fn name(&self) -> &str;

    fn notify(&self, message: &str, category: AlertCategory) -> Result<()>;

    /// Flush pending deliveries and release the channel. Idempotent; later
    /// `notify` calls may fail.
    fn close(&self) {}
}

/// Writes alerts to the log facade.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    fn notify(&self, message: &str, category: AlertCategory) -> Result<()> {
        match category {
            AlertCategory::Fire => log::warn!("[{}] {}", category, message),
            _ => log::info!("[{}] {}", category, message),
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    pub message: String,
    pub category: AlertCategory,
    pub sent_at: SystemTime,
}

/// Records notifications in memory. Clones share one buffer.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl NotificationSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn notify(&self, message: &str, category: AlertCategory) -> Result<()> {
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| anyhow!("memory sink lock poisoned"))?;
        sent.push(Notification {
            message: message.to_string(),
            category,
            sent_at: SystemTime::now(),
        });
        Ok(())
    }
}

/// Delivers to every inner sink; fails if any of them failed.
pub struct FanoutSink {
    sinks: Vec<Box<dyn NotificationSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Box<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }
}

impl NotificationSink for FanoutSink {
    fn name(&self) -> &str {
        "fanout"
    }

    fn notify(&self, message: &str, category: AlertCategory) -> Result<()> {
        let mut failed = Vec::new();
        for sink in &self.sinks {
            if let Err(e) = sink.notify(message, category) {
                failed.push(format!("{}: {:#}", sink.name(), e));
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("notification failed on {}", failed.join("; ")))
        }
    }

    fn close(&self) {
        for sink in &self.sinks {
            sink.close();
        }
    }
}
