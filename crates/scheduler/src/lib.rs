//! The cooperative cron driver described in §4.8: a pool of registered
//! jobs, each fired on its own cron/interval/date trigger, with a
//! single-instance guarantee (a job already running is never started
//! again concurrently) and a misfire policy that coalesces firings missed
//! by more than [`MISFIRE_GRACE`] rather than running them late.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Timelike, Utc};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub mod error;
pub use error::SchedulerError;

/// How a job is fired, per §4.8.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// Fires once per minute, at the given second-of-minute.
    Cron { second: u32 },
    /// Fires repeatedly at a fixed period; first firing is one period
    /// after registration.
    Interval(StdDuration),
    /// Fires exactly once, at the given instant.
    Date(DateTime<Utc>),
}

/// A firing missed by more than this is coalesced away instead of run
/// late (§4.8 misfire policy).
pub const MISFIRE_GRACE: StdDuration = StdDuration::from_secs(30);

/// How often the driver loop wakes to check for due jobs. Finer than any
/// `Cron` second-resolution trigger so firings are caught within their
/// own grace window.
const TICK_INTERVAL: StdDuration = StdDuration::from_millis(250);

type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type JobFn = Arc<dyn Fn() -> JobFuture + Send + Sync>;

struct JobEntry {
    trigger: Trigger,
    func: JobFn,
    running: Arc<AtomicBool>,
    next_fire: DateTime<Utc>,
    /// Once a `Date` trigger has fired it never re-arms; the entry is
    /// kept (not removed) so callers can still inspect `is_job_running`
    /// for the tail of its run.
    one_shot_spent: bool,
}

impl JobEntry {
    fn new(trigger: Trigger, func: JobFn) -> Self {
        let next_fire = first_fire(&trigger, Utc::now());
        Self {
            trigger,
            func,
            running: Arc::new(AtomicBool::new(false)),
            next_fire,
            one_shot_spent: false,
        }
    }

    fn advance(&mut self, now: DateTime<Utc>) {
        match self.trigger {
            Trigger::Cron { second } => {
                self.next_fire = next_cron_fire(now, second);
            }
            Trigger::Interval(period) => {
                let period = chrono::Duration::from_std(period).unwrap_or(chrono::Duration::seconds(1));
                let mut next = self.next_fire + period;
                while next <= now {
                    next += period;
                }
                self.next_fire = next;
            }
            Trigger::Date(_) => {
                self.one_shot_spent = true;
            }
        }
    }
}

fn first_fire(trigger: &Trigger, now: DateTime<Utc>) -> DateTime<Utc> {
    match trigger {
        Trigger::Cron { second } => next_cron_fire(now, *second),
        Trigger::Interval(period) => now + chrono::Duration::from_std(*period).unwrap_or(chrono::Duration::seconds(1)),
        Trigger::Date(at) => *at,
    }
}

fn next_cron_fire(now: DateTime<Utc>, second: u32) -> DateTime<Utc> {
    let candidate = now
        .with_second(second.min(59))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now);
    if candidate > now {
        candidate
    } else {
        candidate + chrono::Duration::minutes(1)
    }
}

/// The scheduler itself: a registry of jobs plus a driver task that ticks
/// the registry looking for due firings. Time base is UTC throughout
/// (§4.8 — "for reproducibility across deployments").
pub struct Scheduler {
    jobs: Arc<AsyncMutex<HashMap<String, JobEntry>>>,
    driver: AsyncMutex<Option<JoinHandle<()>>>,
    shutdown: Arc<tokio::sync::Notify>,
    running_tasks: Arc<AsyncMutex<Vec<JoinHandle<()>>>>,
    started: AtomicBool,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(AsyncMutex::new(HashMap::new())),
            driver: AsyncMutex::new(None),
            shutdown: Arc::new(tokio::sync::Notify::new()),
            running_tasks: Arc::new(AsyncMutex::new(Vec::new())),
            started: AtomicBool::new(false),
        }
    }

    /// Registers a job under `id`. A second call with the same `id`
    /// replaces the previous registration (§4.8 — "duplicate id replaces").
    pub async fn register<F, Fut>(&self, id: impl Into<String>, trigger: Trigger, func: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = id.into();
        let wrapped: JobFn = Arc::new(move || Box::pin(func()) as JobFuture);
        let entry = JobEntry::new(trigger, wrapped);
        self.jobs.lock().await.insert(id, entry);
    }

    /// Starts the driver loop. Returns [`SchedulerError::AlreadyRunning`]
    /// if called twice without an intervening `shutdown`.
    pub async fn start(self: &Arc<Self>) -> Result<(), SchedulerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::AlreadyRunning);
        }
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.drive().await });
        *self.driver.lock().await = Some(handle);
        Ok(())
    }

    async fn drive(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    debug!("scheduler driver received shutdown signal");
                    return;
                }
                _ = ticker.tick() => {
                    self.fire_due_jobs().await;
                }
            }
        }
    }

    async fn fire_due_jobs(&self) {
        let now = Utc::now();
        let mut jobs = self.jobs.lock().await;

        for (id, entry) in jobs.iter_mut() {
            if entry.one_shot_spent || entry.next_fire > now {
                continue;
            }

            let overdue = now - entry.next_fire;
            let missed_grace = overdue > chrono::Duration::from_std(MISFIRE_GRACE).unwrap_or(chrono::Duration::seconds(30));

            if missed_grace {
                warn!(job = %id, overdue_ms = overdue.num_milliseconds(), "misfire: coalescing skipped firing");
                entry.advance(now);
                continue;
            }

            if entry.running.load(Ordering::SeqCst) {
                debug!(job = %id, "single-instance guarantee: prior run still in flight, coalescing this firing");
                entry.advance(now);
                continue;
            }

            let running = Arc::clone(&entry.running);
            let func = Arc::clone(&entry.func);
            running.store(true, Ordering::SeqCst);
            let job_id = id.clone();

            let handle = tokio::spawn(async move {
                func().await;
                running.store(false, Ordering::SeqCst);
                debug!(job = %job_id, "job body completed");
            });

            self.running_tasks.lock().await.push(handle);
            entry.advance(now);
        }

        self.running_tasks.lock().await.retain(|h| !h.is_finished());
    }

    /// Stops the driver. With `wait = true`, blocks until every
    /// currently-running job body has completed before returning
    /// (§5 — "graceful shutdown drains the current tick").
    pub async fn shutdown(&self, wait: bool) -> Result<(), SchedulerError> {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Err(SchedulerError::NotRunning);
        }
        self.shutdown.notify_one();

        if let Some(handle) = self.driver.lock().await.take() {
            let _ = handle.await;
        }

        if wait {
            let mut tasks = self.running_tasks.lock().await;
            for handle in tasks.drain(..) {
                let _ = handle.await;
            }
        }

        info!(wait, "scheduler shut down");
        Ok(())
    }

    /// Whether a job is currently inside its body. Backs the liveness
    /// section of `/api/status` and is useful for tests asserting
    /// single-instance behavior.
    pub async fn is_job_running(&self, id: &str) -> Result<bool, SchedulerError> {
        let jobs = self.jobs.lock().await;
        let entry = jobs.get(id).ok_or_else(|| SchedulerError::UnknownJob(id.to_string()))?;
        Ok(entry.running.load(Ordering::SeqCst))
    }

    /// Whether the driver task is still ticking. Unlike `started` (which
    /// only reflects whether `start`/`shutdown` were called), this checks
    /// the actual `JoinHandle`, so a panicked driver reports `false` even
    /// though nothing called `shutdown`. Backs the supervisor heartbeat
    /// (§5 — "restarts it if not").
    pub async fn is_alive(&self) -> bool {
        self.started.load(Ordering::SeqCst)
            && matches!(self.driver.lock().await.as_ref(), Some(handle) if !handle.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn single_instance_guarantee_caps_overlapping_firings() {
        let scheduler = Arc::new(Scheduler::new());
        let starts = Arc::new(AtomicUsize::new(0));
        let concurrent = Arc::new(AtomicUsize::new(0));
        let max_concurrent = Arc::new(AtomicUsize::new(0));

        let starts_c = Arc::clone(&starts);
        let concurrent_c = Arc::clone(&concurrent);
        let max_concurrent_c = Arc::clone(&max_concurrent);

        scheduler
            .register("slow-job", Trigger::Interval(Duration::from_secs(1)), move || {
                let starts = Arc::clone(&starts_c);
                let concurrent = Arc::clone(&concurrent_c);
                let max_concurrent = Arc::clone(&max_concurrent_c);
                async move {
                    starts.fetch_add(1, Ordering::SeqCst);
                    let now_concurrent = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                    max_concurrent.fetch_max(now_concurrent, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    concurrent.fetch_sub(1, Ordering::SeqCst);
                }
            })
            .await;

        scheduler.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        scheduler.shutdown(true).await.unwrap();

        assert!(starts.load(Ordering::SeqCst) <= 3, "job body must not start more than 3 times in 5s at a 1s interval with a 2s body");
        assert_eq!(max_concurrent.load(Ordering::SeqCst), 1, "single-instance guarantee violated: body ran concurrently with itself");
    }

    #[tokio::test]
    async fn graceful_shutdown_drains_in_flight_job_body() {
        let scheduler = Arc::new(Scheduler::new());
        let completed = Arc::new(AtomicBool::new(false));
        let completed_c = Arc::clone(&completed);

        scheduler
            .register("long-job", Trigger::Date(Utc::now()), move || {
                let completed = Arc::clone(&completed_c);
                async move {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    completed.store(true, Ordering::SeqCst);
                }
            })
            .await;

        scheduler.start().await.unwrap();

        while !scheduler.is_job_running("long-job").await.unwrap_or(false) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        scheduler.shutdown(true).await.unwrap();
        assert!(completed.load(Ordering::SeqCst), "shutdown(wait=true) must not return before the in-flight body finishes");
    }

    #[tokio::test]
    async fn duplicate_registration_replaces_the_job() {
        let scheduler = Scheduler::new();
        scheduler.register("job", Trigger::Interval(Duration::from_secs(60)), || async {}).await;
        scheduler.register("job", Trigger::Interval(Duration::from_secs(60)), || async {}).await;
        assert_eq!(scheduler.jobs.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn shutdown_without_start_errors() {
        let scheduler = Scheduler::new();
        assert!(scheduler.shutdown(false).await.is_err());
    }

    #[test]
    fn cron_fire_time_lands_on_requested_second() {
        let now: DateTime<Utc> = "2024-01-01T00:00:00Z".parse().unwrap();
        let fire = next_cron_fire(now, 5);
        assert_eq!(fire.second(), 5);
        assert!(fire > now);
    }
}
