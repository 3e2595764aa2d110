//! Scheduled retrieval passes.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use haul_config::{log_sched_error, log_sched_info, Cadence};
use haul_engine::{RetrievalCoordinator, RunOutcome};
use tokio::signal;
use tokio::task::JoinHandle;
use tokio::time::{self, Interval, MissedTickBehavior};

/// One running pass plus one waiting on the run guard.
const MAX_OUTSTANDING_PASSES: usize = 2;

/// Start passes on `cadence` until Ctrl-C.
///
/// A tick only dispatches; the run guard decides what happens if the
/// previous pass is still going. Ticks that arrive while the tracker is
/// full are dropped, so a long pass never piles up blocked threads. A
/// failing pass is logged and the schedule carries on.
pub async fn run_scheduled(coordinator: Arc<RetrievalCoordinator>, cadence: Cadence) -> Result<()> {
    let mut ticks = Ticks::new(cadence);
    let mut passes = PassTracker::new(MAX_OUTSTANDING_PASSES);

    log_sched_info!(
        "Scheduler started",
        cadence = tracing::field::display(ticks.describe())
    );

    loop {
        tokio::select! {
            fired = ticks.next() => {
                if !fired {
                    log_sched_info!("Schedule has no upcoming time");
                    break;
                }
                let coordinator = Arc::clone(&coordinator);
                if !passes.dispatch(move || retrieve_once(&coordinator)) {
                    log_sched_info!(
                        "Previous passes still outstanding, skipping tick",
                        outstanding = passes.outstanding()
                    );
                }
            }
            _ = signal::ctrl_c() => {
                log_sched_info!("Shutdown signal received");
                break;
            }
        }
    }

    log_sched_info!("Waiting for the active run to finish");
    tokio::task::spawn_blocking(move || coordinator.wait_idle()).await?;
    log_sched_info!("Scheduler stopped");
    Ok(())
}

/// Tick source for a [`Cadence`].
enum Ticks {
    Interval(Interval),
    Cron {
        cadence: Cadence,
        last: Option<DateTime<Utc>>,
    },
}

impl Ticks {
    fn new(cadence: Cadence) -> Self {
        match cadence {
            Cadence::Every(period) => {
                let mut interval = time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                Ticks::Interval(interval)
            }
            cron => Ticks::Cron {
                cadence: cron,
                last: None,
            },
        }
    }

    fn describe(&self) -> String {
        match self {
            Ticks::Interval(interval) => format!("every {}s", interval.period().as_secs()),
            Ticks::Cron { cadence, .. } => match cadence.next_after(Utc::now()) {
                Some(at) => format!("cron, next at {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
                None => "cron, no upcoming time".to_string(),
            },
        }
    }

    /// Wait for the next fire time. `false` when the schedule is exhausted.
    async fn next(&mut self) -> bool {
        match self {
            Ticks::Interval(interval) => {
                interval.tick().await;
                true
            }
            Ticks::Cron { cadence, last } => {
                let now = Utc::now();
                // Never fire the same instant twice if the timer wakes early.
                let from = last.map_or(now, |l| l.max(now));
                let Some(at) = cadence.next_after(from) else {
                    return false;
                };
                let wait = (at - now).to_std().unwrap_or(Duration::ZERO);
                time::sleep(wait).await;
                *last = Some(at);
                true
            }
        }
    }
}

/// Bounds the blocking tasks the scheduler has in flight.
struct PassTracker {
    limit: usize,
    pending: Vec<JoinHandle<()>>,
}

impl PassTracker {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            pending: Vec::new(),
        }
    }

    /// Passes not yet finished.
    fn outstanding(&mut self) -> usize {
        self.pending.retain(|handle| !handle.is_finished());
        self.pending.len()
    }

    /// Start `pass` on the blocking pool unless the tracker is full.
    fn dispatch<F>(&mut self, pass: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.outstanding() >= self.limit {
            return false;
        }
        self.pending.push(tokio::task::spawn_blocking(pass));
        true
    }
}

fn retrieve_once(coordinator: &RetrievalCoordinator) {
    match coordinator.run() {
        Ok(RunOutcome::Dispatched(handle)) => {
            let report = handle.join();
            for (name, error) in &report.failed {
                log_sched_error!(
                    "Entry left for next run",
                    name = name.as_str(),
                    error = error.as_str()
                );
            }
        }
        Ok(RunOutcome::Skipped) => {}
        Err(e) => {
            log_sched_error!(
                "Failed to retrieve new files",
                error = tracing::field::display(&e)
            );
        }
    }
}
