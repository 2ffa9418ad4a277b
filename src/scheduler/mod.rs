//! Timing wrapper around the run orchestrator.
//!
//! Cycles never overlap: a slow cycle delays the next tick. Cancellation is
//! observed only while waiting between cycles, so an in-flight upload finishes.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Local, NaiveDateTime, NaiveTime};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::Result;

/// Anything that can run one production cycle and report success
#[async_trait]
pub trait CycleRunner: Send + Sync {
    async fn run_cycle(&self) -> bool;
}

/// When cycles fire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    /// At each of these local wall-clock times, every day
    Daily(Vec<NaiveTime>),
    /// Immediately, then every interval
    Interval(Duration),
}

impl Schedule {
    pub fn daily(mut times: Vec<NaiveTime>) -> Result<Self> {
        if times.is_empty() {
            anyhow::bail!("A daily schedule needs at least one post time");
        }
        times.sort();
        times.dedup();
        Ok(Schedule::Daily(times))
    }

    pub fn every_hours(hours: u64) -> Result<Self> {
        if hours == 0 {
            anyhow::bail!("Interval must be at least one hour");
        }
        let secs = hours.checked_mul(3600).context("Interval is too large")?;
        Ok(Schedule::Interval(Duration::from_secs(secs)))
    }

    pub fn describe(&self) -> String {
        match self {
            Schedule::Daily(times) => {
                let times: Vec<String> = times.iter().map(|t| t.format("%H:%M").to_string()).collect();
                format!("daily at {}", times.join(", "))
            }
            Schedule::Interval(every) => format!("every {}", crate::utils::format_duration(every.as_secs_f64())),
        }
    }
}

/// Earliest configured time strictly after `now`, rolling over to tomorrow.
///
/// `times` must be sorted; returns `None` when it is empty.
pub fn next_occurrence(now: NaiveDateTime, times: &[NaiveTime]) -> Option<NaiveDateTime> {
    let first = *times.first()?;
    let today = now.date();

    match times.iter().find(|t| **t > now.time()) {
        Some(t) => Some(today.and_time(*t)),
        None => Some((today + ChronoDuration::days(1)).and_time(first)),
    }
}

/// Counts of what a scheduler loop did before it stopped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerSummary {
    pub cycles: u32,
    pub failures: u32,
}

pub struct Scheduler {
    schedule: Schedule,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(schedule: Schedule, shutdown: CancellationToken) -> Self {
        Self { schedule, shutdown }
    }

    /// Drive `runner` until shutdown is requested.
    ///
    /// A failed cycle is counted and the loop carries on.
    pub async fn run(&self, runner: &dyn CycleRunner) -> SchedulerSummary {
        let mut summary = SchedulerSummary::default();
        tracing::info!("Scheduler started: {}", self.schedule.describe());

        match &self.schedule {
            Schedule::Daily(times) => loop {
                let now = Local::now().naive_local();
                let Some(next) = next_occurrence(now, times) else {
                    tracing::error!("Daily schedule has no post times");
                    break;
                };
                let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
                tracing::info!("Next run at {}", next.format("%Y-%m-%d %H:%M"));

                if !self.wait(wait).await {
                    break;
                }
                self.cycle(runner, &mut summary).await;
            },
            Schedule::Interval(every) => loop {
                if self.shutdown.is_cancelled() {
                    break;
                }
                self.cycle(runner, &mut summary).await;

                tracing::info!(
                    "Waiting {} until next run...",
                    crate::utils::format_duration(every.as_secs_f64())
                );
                if !self.wait(*every).await {
                    break;
                }
            },
        }

        tracing::info!(
            cycles = summary.cycles,
            failures = summary.failures,
            "Scheduler stopped"
        );
        summary
    }

    async fn cycle(&self, runner: &dyn CycleRunner, summary: &mut SchedulerSummary) {
        summary.cycles += 1;
        if !runner.run_cycle().await {
            summary.failures += 1;
            tracing::warn!("Cycle {} failed; schedule continues", summary.cycles);
        }
    }

    /// Sleep for `duration`; false if shutdown was requested first
    async fn wait(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => {
                tracing::info!("Shutdown requested, not starting another cycle");
                false
            }
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

/// Cancel the returned token on SIGINT or SIGTERM
pub fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down after the current cycle"),
                        _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down after the current cycle"),
                    }
                }
                Err(e) => {
                    tracing::warn!("Could not install SIGTERM handler: {}", e);
                    let _ = ctrl_c.await;
                    tracing::info!("Received Ctrl+C, shutting down after the current cycle");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            tracing::info!("Received Ctrl+C, shutting down after the current cycle");
        }

        trigger.cancel();
    });

    token
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Records calls and requests shutdown after a fixed number of cycles
    struct CountingRunner {
        calls: AtomicU32,
        succeed: bool,
        stop_after: u32,
        shutdown: CancellationToken,
    }

    impl CountingRunner {
        fn new(succeed: bool, stop_after: u32, shutdown: &CancellationToken) -> Self {
            Self {
                calls: AtomicU32::new(0),
                succeed,
                stop_after,
                shutdown: shutdown.clone(),
            }
        }
    }

    #[async_trait]
    impl CycleRunner for CountingRunner {
        async fn run_cycle(&self) -> bool {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= self.stop_after {
                self.shutdown.cancel();
            }
            self.succeed
        }
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 10).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    fn post_times() -> Vec<NaiveTime> {
        vec![
            NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
        ]
    }

    #[test]
    fn test_next_occurrence_same_day() {
        assert_eq!(next_occurrence(at(6, 30), &post_times()), Some(at(8, 0)));
        assert_eq!(next_occurrence(at(12, 0), &post_times()), Some(at(20, 0)));
    }

    #[test]
    fn test_next_occurrence_is_strictly_after_now() {
        assert_eq!(next_occurrence(at(8, 0), &post_times()), Some(at(20, 0)));
    }

    #[test]
    fn test_next_occurrence_rolls_over_to_tomorrow() {
        let tomorrow = NaiveDate::from_ymd_opt(2024, 3, 11).unwrap().and_hms_opt(8, 0, 0).unwrap();
        assert_eq!(next_occurrence(at(21, 15), &post_times()), Some(tomorrow));
        assert_eq!(next_occurrence(at(21, 15), &[]), None);
    }

    #[test]
    fn test_schedule_constructors() {
        let times = vec![post_times()[1], post_times()[0], post_times()[1]];
        assert_eq!(Schedule::daily(times).unwrap(), Schedule::Daily(post_times()));
        assert!(Schedule::daily(Vec::new()).is_err());

        assert_eq!(Schedule::every_hours(12).unwrap(), Schedule::Interval(Duration::from_secs(43_200)));
        assert!(Schedule::every_hours(0).is_err());
        assert_eq!(Schedule::daily(post_times()).unwrap().describe(), "daily at 08:00, 20:00");
    }

    #[tokio::test]
    async fn test_interval_keeps_going_after_failures() {
        let shutdown = CancellationToken::new();
        let runner = CountingRunner::new(false, 3, &shutdown);

        let scheduler = Scheduler::new(Schedule::Interval(Duration::from_millis(5)), shutdown);
        let summary = scheduler.run(&runner).await;
        assert_eq!(summary, SchedulerSummary { cycles: 3, failures: 3 });
    }

    #[tokio::test]
    async fn test_interval_counts_successes() {
        let shutdown = CancellationToken::new();
        let runner = CountingRunner::new(true, 2, &shutdown);

        let scheduler = Scheduler::new(Schedule::Interval(Duration::from_millis(5)), shutdown);
        assert_eq!(scheduler.run(&runner).await, SchedulerSummary { cycles: 2, failures: 0 });
    }

    #[tokio::test]
    async fn test_cancelled_scheduler_starts_no_cycle() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let runner = CountingRunner::new(true, u32::MAX, &shutdown);

        let interval = Scheduler::new(Schedule::Interval(Duration::from_secs(3600)), shutdown.clone());
        assert_eq!(interval.run(&runner).await.cycles, 0);

        let daily = Scheduler::new(Schedule::Daily(post_times()), shutdown);
        assert_eq!(daily.run(&runner).await.cycles, 0);
    }

    #[tokio::test]
    async fn test_install_signal_handler_returns_live_token() {
        let token = install_signal_handler();
        assert!(!token.is_cancelled());
        token.cancel();
    }
}
