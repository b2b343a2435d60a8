//! Background sweep of expired entries.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, info};

use super::engine::CacheEngine;
use super::store::EntryStore;
use crate::Error;
use crate::schedule::{Interval, Job, JobFuture, Scheduler};

const SWEEP_JOB: &str = "reclaim_expired";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceState {
    Created,
    Running,
    Stopped,
}

/// Owns the scheduler that periodically calls
/// [`CacheEngine::reclaim_expired`].
///
/// The sweep job is registered at construction and only fires between
/// [`start`](Self::start) and [`stop`](Self::stop).
pub struct Maintenance {
    scheduler: Scheduler,
    state: Mutex<MaintenanceState>,
}

impl Maintenance {
    /// # Errors
    ///
    /// Returns `Error::Schedule` if `interval` is zero.
    pub fn new<S: EntryStore>(engine: Arc<CacheEngine<S>>, interval: Duration) -> Result<Self, Error> {
        let scheduler = Scheduler::new();
        let job: Job = Arc::new(move || -> JobFuture {
            let engine = Arc::clone(&engine);
            Box::pin(async move { engine.reclaim_expired().await.map(|_| ()) })
        });
        scheduler.register(SWEEP_JOB, Interval::from(interval), job)?;

        Ok(Self { scheduler, state: Mutex::new(MaintenanceState::Created) })
    }

    pub fn state(&self) -> MaintenanceState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Begin sweeping. Only a freshly created instance can start.
    pub fn start(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != MaintenanceState::Created {
            debug!(state = ?*state, "maintenance start ignored");
            return;
        }
        self.scheduler.start();
        *state = MaintenanceState::Running;
        info!("maintenance started");
    }

    /// Stop sweeping and wait for an in-flight sweep to finish.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == MaintenanceState::Stopped {
                return;
            }
            *state = MaintenanceState::Stopped;
        }
        self.scheduler.stop().await;
        info!("maintenance stopped");
    }

    /// Signal the sweep to exit without waiting.
    pub(crate) fn halt(&self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = MaintenanceState::Stopped;
        self.scheduler.halt();
    }

    pub fn active_task_count(&self) -> usize {
        self.scheduler.active_task_count()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration as ChronoDuration, Offset, TimeZone, Utc};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::cache::clock::{Clock, ManualClock};
    use crate::cache::connection::{CacheDb, StorageOptions};
    use crate::cache::engine::EngineOptions;

    async fn engine(clock: &ManualClock) -> Arc<CacheEngine<CacheDb>> {
        let db = CacheDb::open_in_memory(&StorageOptions::default()).await.unwrap();
        let options = EngineOptions {
            timezone: Utc.fix(),
            purge_fraction: 0.2,
            purge_timeout: Duration::from_secs(5),
        };
        let clock: Arc<dyn Clock> = Arc::new(clock.clone());
        Arc::new(CacheEngine::new(db, clock, options))
    }

    fn start_clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let clock = start_clock();
        let maintenance = Maintenance::new(engine(&clock).await, Duration::from_secs(60)).unwrap();
        assert_eq!(maintenance.state(), MaintenanceState::Created);
        assert_eq!(maintenance.active_task_count(), 0);

        maintenance.start();
        assert_eq!(maintenance.state(), MaintenanceState::Running);
        assert_eq!(maintenance.active_task_count(), 1);

        maintenance.stop().await;
        maintenance.stop().await;
        assert_eq!(maintenance.state(), MaintenanceState::Stopped);
        assert_eq!(maintenance.active_task_count(), 0);

        maintenance.start();
        assert_eq!(maintenance.state(), MaintenanceState::Stopped);
    }

    #[tokio::test]
    async fn test_halt_ends_job_without_awaiting() {
        let clock = start_clock();
        let maintenance = Maintenance::new(engine(&clock).await, Duration::from_millis(10)).unwrap();
        maintenance.start();

        maintenance.halt();
        assert_eq!(maintenance.state(), MaintenanceState::Stopped);
        for _ in 0..100 {
            if maintenance.active_task_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(maintenance.active_task_count(), 0);
    }

    #[tokio::test]
    async fn test_rejects_zero_interval() {
        let clock = start_clock();
        let result = Maintenance::new(engine(&clock).await, Duration::ZERO);
        assert!(matches!(result, Err(Error::Schedule(_))));
    }

    #[tokio::test]
    async fn test_sweeps_expired_entries_on_tick() {
        let clock = start_clock();
        let engine = engine(&clock).await;
        let cancel = CancellationToken::new();
        engine.set("short", b"v", Duration::from_secs(1), &cancel).await.unwrap();
        engine.set("long", b"v", Duration::from_secs(3600), &cancel).await.unwrap();
        clock.advance(ChronoDuration::seconds(5));

        let maintenance = Maintenance::new(Arc::clone(&engine), Duration::from_millis(20)).unwrap();
        maintenance.start();

        let mut remaining = engine.len().await.unwrap();
        for _ in 0..100 {
            if remaining == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            remaining = engine.len().await.unwrap();
        }
        maintenance.stop().await;

        assert_eq!(remaining, 1);
        assert!(engine.get("long").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_no_sweep_after_stop() {
        let clock = start_clock();
        let engine = engine(&clock).await;
        let maintenance = Maintenance::new(Arc::clone(&engine), Duration::from_millis(10)).unwrap();
        maintenance.start();
        maintenance.stop().await;

        let cancel = CancellationToken::new();
        engine.set("k", b"v", Duration::from_secs(1), &cancel).await.unwrap();
        clock.advance(ChronoDuration::seconds(5));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(engine.len().await.unwrap(), 1);
    }
}
