//! Recurring background jobs.
//!
//! A [`Scheduler`] holds named jobs, each with its own [`Interval`]. Once
//! started, every job runs on its own tokio task and fires on each tick
//! until the scheduler is stopped. Job errors are logged and never stop the
//! schedule.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::Error;

/// Boxed future returned by a job.
pub type JobFuture = Pin<Box<dyn Future<Output = Result<(), Error>> + Send>>;

/// A recurring job body. Called once per tick.
pub type Job = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// How often a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    EveryMinute,
    Every5Minutes,
    Every10Minutes,
    Every15Minutes,
    Every30Minutes,
    EveryHour,
    Every(Duration),
}

impl Interval {
    pub fn period(&self) -> Duration {
        match self {
            Interval::EveryMinute => Duration::from_secs(60),
            Interval::Every5Minutes => Duration::from_secs(5 * 60),
            Interval::Every10Minutes => Duration::from_secs(10 * 60),
            Interval::Every15Minutes => Duration::from_secs(15 * 60),
            Interval::Every30Minutes => Duration::from_secs(30 * 60),
            Interval::EveryHour => Duration::from_secs(60 * 60),
            Interval::Every(period) => *period,
        }
    }
}

impl From<Duration> for Interval {
    fn from(period: Duration) -> Self {
        match period.as_secs() {
            60 if period.subsec_nanos() == 0 => Interval::EveryMinute,
            3600 if period.subsec_nanos() == 0 => Interval::EveryHour,
            _ => Interval::Every(period),
        }
    }
}

struct Registration {
    name: &'static str,
    interval: Interval,
    job: Job,
}

#[derive(Default)]
struct Inner {
    registrations: Vec<Registration>,
    handles: Vec<JoinHandle<()>>,
    stopped: bool,
}

/// Runs registered jobs on a fixed cadence.
pub struct Scheduler {
    inner: Mutex<Inner>,
    running: Arc<AtomicBool>,
    shutdown: CancellationToken,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner::default()), running: Arc::new(AtomicBool::new(false)), shutdown: CancellationToken::new() }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a recurring job.
    ///
    /// A job registered while the scheduler is running starts immediately.
    ///
    /// # Errors
    ///
    /// Returns `Error::Schedule` for a zero interval or when the scheduler
    /// has already been stopped.
    pub fn register(&self, name: &'static str, interval: Interval, job: Job) -> Result<(), Error> {
        if interval.period().is_zero() {
            return Err(Error::Schedule(format!("job {name}: interval must be greater than zero")));
        }

        let mut inner = self.lock();
        if inner.stopped {
            return Err(Error::Schedule(format!("job {name}: scheduler is stopped")));
        }

        if self.running.load(Ordering::SeqCst) {
            let handle = self.spawn(name, interval, Arc::clone(&job));
            inner.handles.push(handle);
        }
        inner.registrations.push(Registration { name, interval, job });
        debug!(name, period_ms = interval.period().as_millis() as u64, "job registered");
        Ok(())
    }

    /// Start every registered job. Has no effect if already running or stopped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut inner = self.lock();
        if inner.stopped || self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let handles: Vec<_> = inner
            .registrations
            .iter()
            .map(|r| self.spawn(r.name, r.interval, Arc::clone(&r.job)))
            .collect();
        inner.handles.extend(handles);
        info!(jobs = inner.handles.len(), "scheduler started");
    }

    fn spawn(&self, name: &'static str, interval: Interval, job: Job) -> JoinHandle<()> {
        let running = Arc::clone(&self.running);
        let shutdown = self.shutdown.clone();
        let period = interval.period();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                // A tick can still be delivered after stop; never act on it.
                if !running.load(Ordering::SeqCst) {
                    break;
                }

                if let Err(e) = job().await {
                    error!(job = name, error = %e, "scheduled job failed");
                }
            }
            debug!(job = name, "job stopped");
        })
    }

    /// Stop all jobs and wait for them to exit. Safe to call more than once.
    ///
    /// A job that is mid-run finishes its current invocation first.
    pub async fn stop(&self) {
        let handles = {
            let mut inner = self.lock();
            inner.stopped = true;
            self.running.store(false, Ordering::SeqCst);
            self.shutdown.cancel();
            std::mem::take(&mut inner.handles)
        };

        if handles.is_empty() {
            return;
        }
        for handle in handles {
            if let Err(e) = handle.await
                && !e.is_cancelled()
            {
                error!(error = %e, "scheduled job panicked");
            }
        }
        info!("scheduler stopped");
    }

    /// Signal every job to exit without waiting for it.
    ///
    /// For teardown paths that cannot await, such as `Drop`.
    pub fn halt(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.cancel();
        self.lock().stopped = true;
    }

    /// Number of job tasks currently alive.
    pub fn active_task_count(&self) -> usize {
        self.lock().handles.iter().filter(|h| !h.is_finished()).count()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_job(counter: &Arc<AtomicUsize>) -> Job {
        let counter = Arc::clone(counter);
        Arc::new(move || -> JobFuture {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    #[test]
    fn test_interval_periods() {
        assert_eq!(Interval::EveryMinute.period(), Duration::from_secs(60));
        assert_eq!(Interval::Every15Minutes.period(), Duration::from_secs(900));
        assert_eq!(Interval::EveryHour.period(), Duration::from_secs(3600));
        assert_eq!(Interval::from(Duration::from_secs(60)), Interval::EveryMinute);
        assert_eq!(Interval::from(Duration::from_millis(1500)), Interval::Every(Duration::from_millis(1500)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_fires_every_tick() {
        let counter = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::new();
        scheduler.register("count", Interval::Every(Duration::from_secs(10)), counting_job(&counter)).unwrap();
        assert_eq!(scheduler.active_task_count(), 0);

        scheduler.start();
        assert_eq!(scheduler.active_task_count(), 1);

        // Immediate first tick, then one per period.
        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 4);

        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_runs_after_stop() {
        let counter = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::new();
        scheduler.register("count", Interval::Every(Duration::from_secs(1)), counting_job(&counter)).unwrap();
        scheduler.start();
        tokio::time::sleep(Duration::from_millis(2500)).await;

        scheduler.stop().await;
        let seen = counter.load(Ordering::SeqCst);
        assert_eq!(scheduler.active_task_count(), 0);
        assert!(!scheduler.is_running());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler.register("count", Interval::EveryMinute, counting_job(&counter)).unwrap();
        scheduler.start();

        scheduler.stop().await;
        scheduler.stop().await;
        assert_eq!(scheduler.active_task_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_job_keeps_schedule() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&attempts);
        let job: Job = Arc::new(move || -> JobFuture {
            let seen = Arc::clone(&seen);
            Box::pin(async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Err(Error::InvalidInput("boom".into()))
            })
        });

        let scheduler = Scheduler::new();
        scheduler.register("fails", Interval::Every(Duration::from_secs(1)), job).unwrap();
        scheduler.start();
        tokio::time::sleep(Duration::from_millis(3500)).await;

        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_register_rejects_zero_and_stopped() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let zero = scheduler.register("zero", Interval::Every(Duration::ZERO), counting_job(&counter));
        assert!(matches!(zero, Err(Error::Schedule(_))));

        scheduler.stop().await;
        let late = scheduler.register("late", Interval::EveryMinute, counting_job(&counter));
        assert!(matches!(late, Err(Error::Schedule(_))));
    }

    #[tokio::test]
    async fn test_start_after_stop_does_nothing() {
        let scheduler = Scheduler::new();
        let counter = Arc::new(AtomicUsize::new(0));
        scheduler.register("count", Interval::EveryMinute, counting_job(&counter)).unwrap();

        scheduler.stop().await;
        scheduler.start();
        assert_eq!(scheduler.active_task_count(), 0);
        assert!(!scheduler.is_running());
    }
}
