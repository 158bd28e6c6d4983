//! Analysis scheduler.
//!
//! Drives the monitor either on demand (one cycle on the caller's thread) or
//! on a repeating timer (one cycle per tick on a worker thread). At most one
//! cycle is in flight at any instant: the in-flight flag is claimed with a
//! compare-and-swap before a cycle starts and released by a drop guard when
//! it ends, whatever the outcome. Ticks and on-demand triggers that find a
//! cycle in flight are dropped, never queued.
//!
//! States:
//! - `Idle`: no timer armed.
//! - `SingleShotRunning`: an on-demand cycle started from `Idle` is running.
//! - `AutoRunning`: a repeating timer is armed.

mod cycle;
mod timer;

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::incident::{IncidentRecord, LocationOverview};

pub use cycle::{CycleOutcome, CycleReport, Monitor, SkipReason, Trigger};
use timer::RepeatingTimer;

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);
/// Documented floor for the analysis interval. Configurable, never below 1ms.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchedulerMode {
    Idle,
    SingleShotRunning,
    AutoRunning,
}

#[derive(Clone, Copy, Debug)]
pub struct SchedulerSettings {
    pub interval: Duration,
    pub min_interval: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            min_interval: DEFAULT_MIN_INTERVAL,
        }
    }
}

impl SchedulerSettings {
    pub fn validate(&self) -> Result<()> {
        if self.min_interval < Duration::from_millis(1) {
            return Err(anyhow!("minimum analysis interval must be at least 1ms"));
        }
        check_interval(self.interval, self.min_interval)
    }
}

fn check_interval(interval: Duration, min_interval: Duration) -> Result<()> {
    if interval < min_interval {
        return Err(anyhow!(
            "analysis interval {}ms is below the minimum of {}ms",
            interval.as_millis(),
            min_interval.as_millis()
        ));
    }
    Ok(())
}

/// Result of an on-demand trigger.
#[derive(Clone, Debug)]
pub enum TriggerOutcome {
    Completed(CycleReport),
    /// A cycle was already in flight; the trigger was dropped.
    Busy,
    CameraInactive,
}

/// Result of a timer tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Started,
    /// A cycle was already in flight; the tick was dropped.
    Dropped,
    NotRunning,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub cycles_started: u64,
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub cycles_skipped: u64,
    pub triggers_dropped: u64,
}

#[derive(Default)]
struct Counters {
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    dropped: AtomicU64,
}

struct Control {
    mode: SchedulerMode,
    interval: Duration,
    min_interval: Duration,
    camera_active: bool,
    timer: Option<RepeatingTimer>,
    /// Bumped whenever the timer is re-armed or cancelled; stale ticks carry
    /// an older generation and are ignored.
    generation: u64,
}

struct Shared {
    monitor: Monitor,
    control: Mutex<Control>,
    in_flight: AtomicBool,
    counters: Counters,
    subscribers: Mutex<Vec<Sender<CycleReport>>>,
}

impl Shared {
    fn control(&self) -> Result<MutexGuard<'_, Control>> {
        self.control
            .lock()
            .map_err(|_| anyhow!("scheduler state lock poisoned"))
    }
}

/// Claimed in-flight slot. Dropping it releases the slot.
struct CycleGuard {
    shared: Arc<Shared>,
}

impl CycleGuard {
    fn try_acquire(shared: &Arc<Shared>) -> Option<Self> {
        shared
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                shared: shared.clone(),
            })
    }

    /// Run one cycle, release the slot, then publish the report.
    fn run(self, trigger: Trigger) -> CycleReport {
        let shared = self.shared.clone();
        shared.counters.started.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();
        let outcome = shared.monitor.run_cycle();
        let report = CycleReport {
            trigger,
            outcome,
            elapsed: start.elapsed(),
        };
        drop(self);
        record_report(&shared, &report);
        report
    }
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.shared.in_flight.store(false, Ordering::Release);
    }
}

pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    /// Create an idle scheduler. The camera starts inactive.
    pub fn new(monitor: Monitor, settings: SchedulerSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                monitor,
                control: Mutex::new(Control {
                    mode: SchedulerMode::Idle,
                    interval: settings.interval,
                    min_interval: settings.min_interval,
                    camera_active: false,
                    timer: None,
                    generation: 0,
                }),
                in_flight: AtomicBool::new(false),
                counters: Counters::default(),
                subscribers: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn mode(&self) -> Result<SchedulerMode> {
        Ok(self.shared.control()?.mode)
    }

    pub fn interval(&self) -> Result<Duration> {
        Ok(self.shared.control()?.interval)
    }

    pub fn min_interval(&self) -> Result<Duration> {
        Ok(self.shared.control()?.min_interval)
    }

    pub fn camera_active(&self) -> Result<bool> {
        Ok(self.shared.control()?.camera_active)
    }

    /// True while the repeating timer is armed.
    pub fn timer_armed(&self) -> Result<bool> {
        Ok(self
            .shared
            .control()?
            .timer
            .as_ref()
            .is_some_and(|timer| timer.is_armed()))
    }

    pub fn is_in_flight(&self) -> bool {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> SchedulerStats {
        let counters = &self.shared.counters;
        SchedulerStats {
            cycles_started: counters.started.load(Ordering::Relaxed),
            cycles_completed: counters.completed.load(Ordering::Relaxed),
            cycles_failed: counters.failed.load(Ordering::Relaxed),
            cycles_skipped: counters.skipped.load(Ordering::Relaxed),
            triggers_dropped: counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Receive a report for every cycle that runs from now on.
    pub fn subscribe(&self) -> Result<Receiver<CycleReport>> {
        let (tx, rx) = mpsc::channel();
        self.shared
            .subscribers
            .lock()
            .map_err(|_| anyhow!("subscriber list lock poisoned"))?
            .push(tx);
        Ok(rx)
    }

    pub fn incidents(&self) -> Result<Vec<IncidentRecord>> {
        self.shared.monitor.incidents()
    }

    pub fn overview(&self) -> Result<Vec<LocationOverview>> {
        self.shared.monitor.overview()
    }

    /// Camera on/off toggle. Turning the camera off tears down auto mode.
    pub fn set_camera_active(&self, active: bool) -> Result<()> {
        if active {
            let mut control = self.shared.control()?;
            self.shared.monitor.connect_source()?;
            control.camera_active = true;
            return Ok(());
        }
        {
            let mut control = self.shared.control()?;
            teardown(&mut control);
            control.camera_active = false;
        }
        // An in-flight capture may hold the source; wait for it without
        // holding the control lock.
        self.shared.monitor.disconnect_source();
        Ok(())
    }

    /// Auto-analyze on/off toggle.
    pub fn set_auto_analyze(&self, enabled: bool) -> Result<()> {
        if enabled {
            self.start_auto()
        } else {
            self.stop_auto()
        }
    }

    /// Change the analysis interval. Re-arms the timer when running.
    pub fn set_interval(&self, interval: Duration) -> Result<()> {
        let mut control = self.shared.control()?;
        check_interval(interval, control.min_interval)?;
        control.interval = interval;
        if control.mode == SchedulerMode::AutoRunning {
            arm_timer(&self.shared, &mut control)?;
            log::info!("analysis interval changed to {}ms", interval.as_millis());
        }
        Ok(())
    }

    /// Start auto analysis: run one cycle now, then one per interval.
    pub fn start_auto(&self) -> Result<()> {
        let guard = {
            let mut control = self.shared.control()?;
            if !control.camera_active {
                return Err(anyhow!("cannot start auto analysis: camera is off"));
            }
            if control.mode == SchedulerMode::AutoRunning {
                return Ok(());
            }
            arm_timer(&self.shared, &mut control)?;
            control.mode = SchedulerMode::AutoRunning;
            log::info!(
                "auto analysis started (every {}ms)",
                control.interval.as_millis()
            );
            claim_slot(&self.shared)
        };
        if let Some(guard) = guard {
            spawn_cycle(guard, Trigger::AutoStart);
        }
        Ok(())
    }

    /// Stop auto analysis. A cycle already in flight runs to completion.
    pub fn stop_auto(&self) -> Result<()> {
        let mut control = self.shared.control()?;
        if control.mode == SchedulerMode::AutoRunning {
            teardown(&mut control);
            log::info!("auto analysis stopped");
        }
        Ok(())
    }

    /// Deliver one timer tick by hand (same path as the armed timer).
    pub fn tick(&self) -> Result<TickOutcome> {
        let guard = {
            let control = self.shared.control()?;
            if control.mode != SchedulerMode::AutoRunning {
                return Ok(TickOutcome::NotRunning);
            }
            claim_slot(&self.shared)
        };
        Ok(match guard {
            Some(guard) => spawn_cycle(guard, Trigger::Timer),
            None => TickOutcome::Dropped,
        })
    }

    /// Run one cycle now on the calling thread.
    pub fn analyze_now(&self) -> Result<TriggerOutcome> {
        let guard = {
            let mut control = self.shared.control()?;
            if !control.camera_active {
                return Ok(TriggerOutcome::CameraInactive);
            }
            let Some(guard) = claim_slot(&self.shared) else {
                return Ok(TriggerOutcome::Busy);
            };
            if control.mode == SchedulerMode::Idle {
                control.mode = SchedulerMode::SingleShotRunning;
            }
            guard
        };

        let report = guard.run(Trigger::OnDemand);

        let mut control = self.shared.control()?;
        if control.mode == SchedulerMode::SingleShotRunning {
            control.mode = SchedulerMode::Idle;
        }
        Ok(TriggerOutcome::Completed(report))
    }

    /// Unconditional teardown: cancel the timer, return to idle, release the
    /// camera and close the notification sinks. Safe to call repeatedly.
    pub fn shutdown(&self) {
        {
            let mut control = match self.shared.control.lock() {
                Ok(control) => control,
                Err(poisoned) => poisoned.into_inner(),
            };
            teardown(&mut control);
            control.camera_active = false;
        }
        self.shared.monitor.disconnect_source();
        self.shared.monitor.close_sinks();
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn teardown(control: &mut Control) {
    if let Some(mut timer) = control.timer.take() {
        timer.cancel();
    }
    control.generation += 1;
    control.mode = SchedulerMode::Idle;
}

/// Cancel any armed timer and arm a fresh one at the current interval.
fn arm_timer(shared: &Arc<Shared>, control: &mut Control) -> Result<()> {
    if let Some(mut old) = control.timer.take() {
        old.cancel();
    }
    control.generation += 1;
    let generation = control.generation;
    let weak = Arc::downgrade(shared);
    let timer = RepeatingTimer::arm(control.interval, move || {
        if let Some(shared) = weak.upgrade() {
            on_timer_tick(&shared, generation);
        }
    })?;
    control.timer = Some(timer);
    Ok(())
}

fn on_timer_tick(shared: &Arc<Shared>, generation: u64) -> TickOutcome {
    let guard = match shared.control() {
        Ok(control) => {
            if control.mode != SchedulerMode::AutoRunning || control.generation != generation {
                return TickOutcome::NotRunning;
            }
            claim_slot(shared)
        }
        Err(e) => {
            log::warn!("timer tick ignored: {}", e);
            return TickOutcome::NotRunning;
        }
    };
    match guard {
        Some(guard) => spawn_cycle(guard, Trigger::Timer),
        None => TickOutcome::Dropped,
    }
}

/// Claim the in-flight slot, counting a drop when it is taken. Callers hold
/// the control lock so a claim cannot interleave with a stop or re-arm.
fn claim_slot(shared: &Arc<Shared>) -> Option<CycleGuard> {
    let guard = CycleGuard::try_acquire(shared);
    if guard.is_none() {
        shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
    }
    guard
}

/// Run a claimed cycle on a worker thread.
fn spawn_cycle(guard: CycleGuard, trigger: Trigger) -> TickOutcome {
    let spawned = std::thread::Builder::new()
        .name("analysis-cycle".to_string())
        .spawn(move || {
            guard.run(trigger);
        });
    match spawned {
        Ok(_) => TickOutcome::Started,
        Err(e) => {
            // The closure, and with it the guard, is dropped on failure.
            log::warn!("failed to spawn analysis cycle: {}", e);
            TickOutcome::Dropped
        }
    }
}

fn record_report(shared: &Shared, report: &CycleReport) {
    let counters = &shared.counters;
    match &report.outcome {
        CycleOutcome::Completed {
            incident,
            assessment,
            dispatch,
        } => {
            counters.completed.fetch_add(1, Ordering::Relaxed);
            log::info!(
                "cycle complete: location={} threats={} alert={} dispatch={:?} ({}ms)",
                incident.detection.location,
                assessment.threats.len(),
                assessment.dominant_alert,
                dispatch,
                report.elapsed.as_millis()
            );
        }
        CycleOutcome::Failed { error } => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            log::warn!("analysis cycle failed: {}", error);
        }
        CycleOutcome::Skipped { reason } => {
            counters.skipped.fetch_add(1, Ordering::Relaxed);
            log::debug!("analysis cycle skipped: {:?}", reason);
        }
    }
    match shared.subscribers.lock() {
        Ok(mut subscribers) => subscribers.retain(|tx| tx.send(report.clone()).is_ok()),
        Err(_) => log::warn!("subscriber list lock poisoned; report not delivered"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use crate::alert::{AlertDispatcher, MemorySink, NotificationSink};
    use crate::classify::AlertCategory;
    use crate::detect::ScriptedDetector;
    use crate::incident::LocationDirectory;
    use crate::ingest::{StubConfig, StubSource};

    fn scheduler(settings: SchedulerSettings) -> Scheduler {
        scheduler_with_sink(settings, Box::new(MemorySink::new()))
    }

    fn scheduler_with_sink(
        settings: SchedulerSettings,
        sink: Box<dyn NotificationSink>,
    ) -> Scheduler {
        let source = StubSource::new(StubConfig {
            name: "unit".to_string(),
            width: 8,
            height: 8,
        });
        let monitor = Monitor::new(
            Box::new(source),
            Box::new(ScriptedDetector::new()),
            AlertDispatcher::new(sink),
            LocationDirectory::new(),
        );
        Scheduler::new(monitor, settings).expect("scheduler")
    }

    fn wait_until_idle(sched: &Scheduler) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while sched.is_in_flight() {
            assert!(Instant::now() < deadline, "cycle never finished");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn generation(sched: &Scheduler) -> u64 {
        sched.shared.control().expect("control").generation
    }

    fn slow() -> SchedulerSettings {
        SchedulerSettings {
            interval: Duration::from_secs(60),
            ..SchedulerSettings::default()
        }
    }

    #[test]
    fn rejects_intervals_below_the_floor() {
        let settings = SchedulerSettings {
            interval: Duration::from_millis(10),
            min_interval: Duration::from_millis(50),
        };
        assert!(settings.validate().is_err());

        let zero_floor = SchedulerSettings {
            interval: Duration::from_millis(10),
            min_interval: Duration::ZERO,
        };
        assert!(zero_floor.validate().is_err());

        let sched = scheduler(slow());
        assert!(sched.set_interval(Duration::from_millis(49)).is_err());
        assert_eq!(sched.interval().expect("interval"), Duration::from_secs(60));
        sched.set_interval(Duration::from_millis(50)).expect("at floor");
    }

    #[test]
    fn on_demand_requires_an_active_camera() {
        let sched = scheduler(slow());
        assert!(matches!(
            sched.analyze_now().expect("trigger"),
            TriggerOutcome::CameraInactive
        ));
        assert!(sched.start_auto().is_err());
        assert_eq!(sched.mode().expect("mode"), SchedulerMode::Idle);
    }

    #[test]
    fn single_shot_returns_to_idle() {
        let sched = scheduler(slow());
        sched.set_camera_active(true).expect("camera on");
        match sched.analyze_now().expect("trigger") {
            TriggerOutcome::Completed(report) => {
                assert_eq!(report.trigger, Trigger::OnDemand);
                assert!(report.assessment().is_some());
            }
            other => panic!("unexpected trigger outcome {:?}", other),
        }
        assert_eq!(sched.mode().expect("mode"), SchedulerMode::Idle);
        assert!(!sched.is_in_flight());
        assert_eq!(sched.stats().cycles_completed, 1);
    }

    #[test]
    fn interval_change_rearms_without_leaving_auto() {
        let sched = scheduler(slow());
        sched.set_camera_active(true).expect("camera on");
        sched.start_auto().expect("start");
        assert_eq!(sched.mode().expect("mode"), SchedulerMode::AutoRunning);

        sched.set_interval(Duration::from_secs(30)).expect("interval");
        assert_eq!(sched.mode().expect("mode"), SchedulerMode::AutoRunning);
        assert!(sched.timer_armed().expect("armed"));
        assert_eq!(sched.interval().expect("interval"), Duration::from_secs(30));
    }

    #[test]
    fn camera_off_tears_down_auto_mode_idempotently() {
        let sched = scheduler(slow());
        sched.set_camera_active(true).expect("camera on");
        sched.start_auto().expect("start");

        sched.set_camera_active(false).expect("camera off");
        assert_eq!(sched.mode().expect("mode"), SchedulerMode::Idle);
        assert!(!sched.timer_armed().expect("armed"));

        sched.set_camera_active(false).expect("camera off again");
        sched.stop_auto().expect("stop when idle");
        sched.shutdown();
        assert_eq!(sched.tick().expect("tick"), TickOutcome::NotRunning);
    }

    #[test]
    fn ticks_from_a_replaced_timer_start_nothing() {
        let sched = scheduler(slow());
        sched.set_camera_active(true).expect("camera on");
        sched.start_auto().expect("start");
        wait_until_idle(&sched);
        let first_generation = generation(&sched);

        sched.set_interval(Duration::from_secs(30)).expect("re-arm");
        assert_eq!(
            on_timer_tick(&sched.shared, first_generation),
            TickOutcome::NotRunning
        );

        let current = generation(&sched);
        assert_eq!(on_timer_tick(&sched.shared, current), TickOutcome::Started);
        wait_until_idle(&sched);
        let started = sched.stats().cycles_started;

        sched.stop_auto().expect("stop");
        assert_eq!(on_timer_tick(&sched.shared, current), TickOutcome::NotRunning);
        assert_eq!(
            on_timer_tick(&sched.shared, generation(&sched)),
            TickOutcome::NotRunning
        );
        assert_eq!(sched.stats().cycles_started, started);
        assert!(!sched.is_in_flight());
    }

    #[test]
    fn shutdown_closes_the_notification_sink() {
        struct CountingSink(Arc<AtomicUsize>);

        impl NotificationSink for CountingSink {
            fn name(&self) -> &str {
                "counting"
            }

            fn notify(&self, _message: &str, _category: AlertCategory) -> Result<()> {
                Ok(())
            }

            fn close(&self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let closed = Arc::new(AtomicUsize::new(0));
        let sched = scheduler_with_sink(slow(), Box::new(CountingSink(closed.clone())));
        sched.set_camera_active(true).expect("camera on");
        assert_eq!(closed.load(Ordering::SeqCst), 0);

        sched.shutdown();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(!sched.camera_active().expect("camera"));
    }
}
