//! Periodic refresh of every stored entity, independent of reader traffic.

use chrono::{DateTime, TimeDelta, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::cache::AggregationCache;
use crate::clock::Clock;
use crate::entity::EntityKey;
use crate::error::CacheError;
use crate::TARGET_SCHEDULER;

/// Default tick interval, 7.5 minutes
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(450);
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

/// Outcome of one tick, per key
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub refreshed: Vec<EntityKey>,
    pub failed: Vec<(EntityKey, CacheError)>,
}

impl TickReport {
    pub fn total(&self) -> usize {
        self.refreshed.len() + self.failed.len()
    }
}

enum State {
    Stopped,
    Running {
        stop_tx: watch::Sender<bool>,
        task: JoinHandle<()>,
    },
}

struct TickRunner {
    cache: AggregationCache,
    permits: Arc<Semaphore>,
    reports: broadcast::Sender<TickReport>,
}

impl TickRunner {
    async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();

        let keys = match self.cache.known_keys().await {
            Ok(keys) => keys,
            Err(e) => {
                error!(target: TARGET_SCHEDULER, "Could not list stored entities: {}", e);
                return report;
            }
        };
        info!(target: TARGET_SCHEDULER, "Refreshing {} entities", keys.len());

        let mut refreshes = JoinSet::new();
        for key in keys {
            let cache = self.cache.clone();
            let permits = Arc::clone(&self.permits);
            refreshes.spawn(async move {
                // The semaphore is never closed
                let _permit = permits.acquire_owned().await.ok();
                let result = cache.refresh(&key).await;
                (key, result)
            });
        }

        while let Some(joined) = refreshes.join_next().await {
            match joined {
                Ok((key, Ok(_))) => report.refreshed.push(key),
                Ok((key, Err(e))) => {
                    if e.is_transient() {
                        warn!(target: TARGET_SCHEDULER, "Refresh of {} will be retried next tick: {}", key, e);
                    } else {
                        error!(target: TARGET_SCHEDULER, "Refresh of {} failed: {}", key, e);
                    }
                    report.failed.push((key, e));
                }
                Err(e) => error!(target: TARGET_SCHEDULER, "Refresh task failed: {}", e),
            }
        }

        report.refreshed.sort_by(|a, b| a.name.cmp(&b.name));
        report.failed.sort_by(|a, b| a.0.name.cmp(&b.0.name));
        info!(
            target: TARGET_SCHEDULER,
            "Tick done: {} refreshed, {} failed",
            report.refreshed.len(),
            report.failed.len()
        );

        // No subscribers is fine
        let _ = self.reports.send(report.clone());
        report
    }
}

/// Drives `AggregationCache::refresh` for every known key on a fixed interval.
///
/// `Stopped -> Running -> Stopped`. Each tick runs on its own task, so a slow
/// tick never delays the next one; overlapping refreshes of one key join the
/// cache's in-flight fetch.
pub struct RefreshScheduler {
    runner: Arc<TickRunner>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    state: Mutex<State>,
}

impl RefreshScheduler {
    pub fn new(
        cache: AggregationCache,
        clock: Arc<dyn Clock>,
        interval: Duration,
        max_concurrent: usize,
    ) -> Self {
        let (reports, _) = broadcast::channel(16);
        Self {
            runner: Arc::new(TickRunner {
                cache,
                permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
                reports,
            }),
            clock,
            interval,
            state: Mutex::new(State::Stopped),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Begin ticking; the first tick is one interval from now.
    ///
    /// Returns false if already running. Must be called within a tokio runtime.
    pub fn start(&self) -> bool {
        let mut state = self.state();
        if let State::Running { task, .. } = &*state {
            if !task.is_finished() {
                return false;
            }
        }

        let interval = TimeDelta::from_std(self.interval)
            .unwrap_or_else(|_| TimeDelta::weeks(52))
            .max(TimeDelta::seconds(1));
        let first = self.clock.now() + interval;
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_loop(
            Arc::clone(&self.runner),
            Arc::clone(&self.clock),
            interval,
            first,
            stop_rx,
        ));

        info!(
            target: TARGET_SCHEDULER,
            "Refresh scheduler started, every {}s", self.interval.as_secs()
        );
        *state = State::Running { stop_tx, task };
        true
    }

    /// Cancel the timer and wait for ticks already running to finish.
    ///
    /// Returns false if the scheduler was not running.
    pub async fn stop(&self) -> bool {
        let previous = std::mem::replace(&mut *self.state(), State::Stopped);
        let State::Running { stop_tx, task } = previous else {
            return false;
        };

        let _ = stop_tx.send(true);
        if let Err(e) = task.await {
            error!(target: TARGET_SCHEDULER, "Scheduler loop failed: {}", e);
        }
        info!(target: TARGET_SCHEDULER, "Refresh scheduler stopped");
        true
    }

    pub fn is_running(&self) -> bool {
        matches!(&*self.state(), State::Running { task, .. } if !task.is_finished())
    }

    /// Run one tick now, outside the timer.
    pub async fn run_tick(&self) -> TickReport {
        self.runner.tick().await
    }

    /// Reports of every tick completed from now on
    pub fn subscribe(&self) -> broadcast::Receiver<TickReport> {
        self.runner.reports.subscribe()
    }
}

async fn run_loop(
    runner: Arc<TickRunner>,
    clock: Arc<dyn Clock>,
    interval: TimeDelta,
    first: DateTime<Utc>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut next = first;
    let mut sleep = clock.sleep_until(next);
    let mut ticks = JoinSet::new();

    loop {
        tokio::select! {
            // A dropped scheduler stops the loop too
            _ = stop_rx.changed() => break,
            _ = &mut sleep => {
                let tick_runner = Arc::clone(&runner);
                ticks.spawn(async move { tick_runner.tick().await });

                let now = clock.now();
                while next <= now {
                    next += interval;
                }
                debug!(target: TARGET_SCHEDULER, "Next tick at {}", next);
                sleep = clock.sleep_until(next);
            }
            Some(joined) = ticks.join_next(), if !ticks.is_empty() => {
                if let Err(e) = joined {
                    error!(target: TARGET_SCHEDULER, "Tick task failed: {}", e);
                }
            }
        }
    }

    if !ticks.is_empty() {
        info!(target: TARGET_SCHEDULER, "Waiting for {} running tick(s)", ticks.len());
    }
    while let Some(joined) = ticks.join_next().await {
        if let Err(e) = joined {
            error!(target: TARGET_SCHEDULER, "Tick task failed: {}", e);
        }
    }
}
