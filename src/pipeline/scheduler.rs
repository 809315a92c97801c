// src/pipeline/scheduler.rs

//! Fixed-period sweep scheduler.
//!
//! The poll cycle sits behind an async mutex. A tick that finds it still
//! locked is skipped, so two sweeps never run at once. Each sweep runs on
//! its own task inside a panic boundary; a crashing sweep is logged and the
//! next tick proceeds normally.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::models::SweepReport;
use crate::pipeline::PollCycle;

/// What a single tick did.
#[derive(Debug)]
pub enum TickOutcome {
    /// A sweep was started; the handle yields its report, or `None` if it panicked
    Started(JoinHandle<Option<SweepReport>>),
    /// The previous sweep was still running
    Overlapping,
}

/// Runs a [`PollCycle`] every `period`.
pub struct Scheduler {
    cycle: Arc<Mutex<PollCycle>>,
    period: Duration,
}

impl Scheduler {
    pub fn new(cycle: PollCycle, period: Duration) -> Self {
        Self {
            cycle: Arc::new(Mutex::new(cycle)),
            period,
        }
    }

    /// Shared handle to the cycle. Anything that locks it blocks ticks.
    pub fn cycle(&self) -> Arc<Mutex<PollCycle>> {
        Arc::clone(&self.cycle)
    }

    /// Start a sweep unless one is already running.
    pub fn tick(&self) -> TickOutcome {
        match Arc::clone(&self.cycle).try_lock_owned() {
            Ok(cycle) => TickOutcome::Started(tokio::spawn(guarded_sweep(cycle))),
            Err(_) => {
                log::warn!("Previous sweep still running, skipping this tick");
                TickOutcome::Overlapping
            }
        }
    }

    /// Run one sweep now, waiting for any sweep in progress to finish first.
    pub async fn run_now(&self) -> Option<SweepReport> {
        let cycle = Arc::clone(&self.cycle).lock_owned().await;
        guarded_sweep(cycle).await
    }

    /// Tick until `shutdown` resolves, then wait for an in-flight sweep.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        log::info!("Scheduler started, sweeping every {}s", self.period.as_secs());
        let mut in_flight: Option<JoinHandle<Option<SweepReport>>> = None;

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    if let TickOutcome::Started(handle) = self.tick() {
                        in_flight = Some(handle);
                    }
                }
            }
        }

        if let Some(handle) = in_flight {
            if !handle.is_finished() {
                log::info!("Waiting for the running sweep to finish");
            }
            if let Err(e) = handle.await {
                log::error!("Sweep task failed: {}", e);
            }
        }
        log::info!("Scheduler stopped");
    }
}

/// Run one sweep, turning a panic into a logged `None`.
async fn guarded_sweep(mut cycle: OwnedMutexGuard<PollCycle>) -> Option<SweepReport> {
    match AssertUnwindSafe(cycle.run_once()).catch_unwind().await {
        Ok(report) => Some(report),
        Err(panic) => {
            log::error!("Sweep panicked: {}", panic_message(panic.as_ref()));
            None
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic payload"
    }
}
