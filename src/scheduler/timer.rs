use anyhow::{Context, Result};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

/// Fixed-rate repeating timer on a dedicated thread.
///
/// Cancellation is idempotent and never blocks: it only signals the thread,
/// which exits at its next wake-up. A tick that was already being delivered
/// when `cancel` ran may still complete; callers filter stale ticks by
/// generation.
pub(crate) struct RepeatingTimer {
    cancel: Option<Sender<()>>,
}

impl RepeatingTimer {
    pub(crate) fn arm<F>(period: Duration, on_tick: F) -> Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<()>();
        std::thread::Builder::new()
            .name("analysis-timer".to_string())
            .spawn(move || {
                let mut next = Instant::now() + period;
                loop {
                    let wait = next.saturating_duration_since(Instant::now());
                    match rx.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => {
                            on_tick();
                            next += period;
                            let now = Instant::now();
                            if next < now {
                                // Missed deadlines are not replayed.
                                next = now + period;
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
            .context("spawn analysis timer thread")?;
        Ok(Self { cancel: Some(tx) })
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.cancel.is_some()
    }

    pub(crate) fn cancel(&mut self) {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for RepeatingTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[test]
    fn fires_repeatedly_until_cancelled() {
        let ticks = Arc::new(AtomicU64::new(0));
        let counter = ticks.clone();
        let mut timer = RepeatingTimer::arm(Duration::from_millis(20), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .expect("arm");
        assert!(timer.is_armed());

        std::thread::sleep(Duration::from_millis(200));
        timer.cancel();
        timer.cancel();
        assert!(!timer.is_armed());

        std::thread::sleep(Duration::from_millis(60));
        let after_cancel = ticks.load(Ordering::SeqCst);
        assert!(after_cancel >= 3, "expected several ticks, got {}", after_cancel);
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(ticks.load(Ordering::SeqCst), after_cancel);
    }

    #[test]
    fn does_not_fire_before_the_first_period() {
        let ticks = Arc::new(AtomicU64::new(0));
        let counter = ticks.clone();
        let timer = RepeatingTimer::arm(Duration::from_secs(30), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .expect("arm");
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
        drop(timer);
    }
}
