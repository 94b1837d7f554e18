//! Wall-clock driver for [`ReplayClock`]: a tokio task advances the clock at a
//! fixed period until it finishes or is paused.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use crate::replay::{ReplayClock, Tick};
use crate::RaceError;

fn lock(clock: &Mutex<ReplayClock>) -> MutexGuard<'_, ReplayClock> {
    clock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct ReplayPlayer {
    clock: Arc<Mutex<ReplayClock>>,
    tick_every: Duration,
    task: Option<JoinHandle<()>>,
}

impl ReplayPlayer {
    pub fn new(clock: ReplayClock, tick_every: Duration) -> Result<Self, RaceError> {
        if tick_every.is_zero() {
            return Err(RaceError::InvalidParameter(
                "tick period must be non-zero".to_string(),
            ));
        }
        Ok(Self {
            clock: Arc::new(Mutex::new(clock)),
            tick_every,
            task: None,
        })
    }

    /// Start (or restart) playback. Must be called from within a tokio runtime.
    ///
    /// `on_tick` runs with the clock locked, once per `Advanced` tick and once
    /// for the final `Finished` tick. It must not lock the clock itself.
    pub fn play<F>(&mut self, mut on_tick: F)
    where
        F: FnMut(Tick) + Send + 'static,
    {
        self.abort_task();
        lock(&self.clock).play();

        let clock = Arc::clone(&self.clock);
        let period = self.tick_every;
        self.task = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let done = {
                    let mut guard = lock(&clock);
                    match guard.tick() {
                        Tick::Ignored => true,
                        tick @ Tick::Advanced(_) => {
                            on_tick(tick);
                            false
                        }
                        tick @ Tick::Finished(cursor_ms) => {
                            debug!(cursor_ms, "replay reached end of range");
                            on_tick(tick);
                            true
                        }
                    }
                };
                if done {
                    break;
                }
            }
        }));
    }

    /// Stop playback. Once this returns the cursor no longer moves.
    pub fn pause(&mut self) {
        lock(&self.clock).pause();
        self.abort_task();
    }

    pub fn seek(&self, t: i64) -> i64 {
        lock(&self.clock).seek(t)
    }

    pub fn reset(&mut self) {
        self.pause();
        lock(&self.clock).reset();
    }

    pub fn is_playing(&self) -> bool {
        lock(&self.clock).is_playing()
    }

    pub fn snapshot(&self) -> ReplayClock {
        lock(&self.clock).clone()
    }

    /// Wait for the running playback task, if any, to end. Dropping the
    /// returned future leaves the task running; `pause` still stops it.
    pub async fn wait(&mut self) {
        if let Some(task) = self.task.as_mut() {
            let _ = task.await;
            self.task = None;
        }
    }

    fn abort_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ReplayPlayer {
    fn drop(&mut self) {
        self.abort_task();
    }
}
