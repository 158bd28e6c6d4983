//! Alert dispatch with per-category cooldown.
//!
//! The dispatcher owns the cooldown registry. A dispatch decision reads and
//! updates the registry in one `&mut self` step, so two near-simultaneous
//! decisions can never both observe "not in cooldown".

mod mqtt;
mod sink;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::classify::AlertCategory;

pub use mqtt::{MqttSink, MqttSinkConfig};
pub use sink::{FanoutSink, LogSink, MemorySink, Notification, NotificationSink};

/// Minimum time between two dispatched notifications of one category.
pub const ALERT_COOLDOWN: Duration = Duration::from_secs(30);

/// Extra facts used to fill the notification templates.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlertContext {
    pub fire_count: u32,
    pub crowd_density: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// Notification emitted. `delivered` is false when the sink failed.
    Dispatched { delivered: bool },
    Suppressed,
}

impl DispatchOutcome {
    pub fn is_dispatched(&self) -> bool {
        matches!(self, DispatchOutcome::Dispatched { .. })
    }
}

pub struct AlertDispatcher {
    sink: Box<dyn NotificationSink>,
    cooldown: Duration,
    last_dispatch: HashMap<AlertCategory, Instant>,
}

impl AlertDispatcher {
    pub fn new(sink: Box<dyn NotificationSink>) -> Self {
        Self {
            sink,
            cooldown: ALERT_COOLDOWN,
            last_dispatch: HashMap::new(),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Flush and release the notification sink.
    pub fn close(&self) {
        self.sink.close();
    }

    /// Last dispatch instant for a category; `None` means never dispatched.
    pub fn last_dispatch(&self, category: AlertCategory) -> Option<Instant> {
        self.last_dispatch.get(&category).copied()
    }

    pub fn maybe_dispatch(
        &mut self,
        category: AlertCategory,
        location: &str,
        context: AlertContext,
    ) -> DispatchOutcome {
        self.maybe_dispatch_at(category, location, context, Instant::now())
    }

    /// Dispatch decision evaluated at `now`.
    ///
    /// `AlertCategory::None` is never dispatched. The cooldown timestamp is
    /// recorded before the sink is called and is kept even when delivery
    /// fails.
    pub fn maybe_dispatch_at(
        &mut self,
        category: AlertCategory,
        location: &str,
        context: AlertContext,
        now: Instant,
    ) -> DispatchOutcome {
        if category == AlertCategory::None {
            return DispatchOutcome::Suppressed;
        }
        if let Some(last) = self.last_dispatch.get(&category) {
            if now.saturating_duration_since(*last) < self.cooldown {
                log::debug!("{} alert for {} suppressed (cooldown)", category, location);
                return DispatchOutcome::Suppressed;
            }
        }
        self.last_dispatch.insert(category, now);

        let message = compose_message(category, location, context);
        let delivered = match self.sink.notify(&message, category) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("{} alert delivery via {} failed: {:#}", category, self.sink.name(), e);
                false
            }
        };
        log::info!("{} alert dispatched for {}", category, location);
        DispatchOutcome::Dispatched { delivered }
    }
}

fn compose_message(category: AlertCategory, location: &str, context: AlertContext) -> String {
    match category {
        AlertCategory::Fire => format!(
            "URGENT: Fire detected at {} ({} {}). Evacuate the area immediately and alert emergency services.",
            location,
            context.fire_count,
            if context.fire_count == 1 { "source" } else { "sources" }
        ),
        AlertCategory::Crowd => format!(
            "ALERT: Crowd density at {} has reached {}%. Dispatch security and manage crowd flow.",
            location,
            (context.crowd_density * 100.0).round() as u32
        ),
        AlertCategory::None => String::new(),
    }
}
