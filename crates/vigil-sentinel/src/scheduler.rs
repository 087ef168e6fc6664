//! Multi-job scheduler
//!
//! One repeating tick, with a period equal to the shortest job interval,
//! scans every active job. Due jobs are dispatched onto the runtime; the tick
//! itself never waits for collection or export.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use vigil_core::{Result, SentinelConf, VigilConfig, VigilError};
use vigil_export::{CircuitBreaker, ExporterRegistry, HttpTransport};
use vigil_metrics::{MetricSampler, MetricsProvider};

use crate::job::{JobStatus, RunClaim, SentinelJob};
use crate::shutdown::{ListenerOutcome, ShutdownListener, ShutdownPipeline};

/// Everything a scheduler needs to run jobs
#[derive(Clone)]
pub struct SchedulerContext {
    /// Node identifier stamped on every snapshot
    pub node: String,
    pub sampler: MetricSampler,
    pub registry: Arc<ExporterRegistry>,
    /// Push a failed job out by a full interval instead of retrying it on
    /// the next tick
    pub advance_on_failure: bool,
}

impl SchedulerContext {
    pub fn new(node: impl Into<String>, sampler: MetricSampler, registry: Arc<ExporterRegistry>) -> Self {
        Self {
            node: node.into(),
            sampler,
            registry,
            advance_on_failure: false,
        }
    }

    pub fn with_advance_on_failure(mut self, advance: bool) -> Self {
        self.advance_on_failure = advance;
        self
    }

    /// Wire a context from node configuration
    pub fn from_config(
        config: &VigilConfig,
        provider: Arc<dyn MetricsProvider>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let breaker = Arc::new(CircuitBreaker::from_config(&config.breaker));
        let registry = Arc::new(ExporterRegistry::new(transport, breaker));
        let sampler = MetricSampler::new(provider).with_delay(config.sampling.delay());

        Self::new(config.name.clone(), sampler, registry)
            .with_advance_on_failure(config.scheduler.advance_on_failure)
    }
}

/// Summary of a successful start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartReport {
    /// Jobs scheduled
    pub jobs: usize,
    /// Entries dropped for lacking tasks or subscribers
    pub dropped: usize,
    pub tick: Duration,
}

struct Inner {
    context: SchedulerContext,
    jobs: RwLock<Vec<Arc<SentinelJob>>>,
    running: AtomicBool,
    /// Bumped on every start so executions from an earlier run can tell
    /// they are stale
    epoch: AtomicU64,
    tick: Mutex<Option<JoinHandle<()>>>,
    tick_period: Mutex<Option<Duration>>,
    listeners: Mutex<ShutdownPipeline>,
}

/// Drives sentinel jobs off one shared timer
pub struct TaskScheduler {
    inner: Arc<Inner>,
}

impl TaskScheduler {
    pub fn new(context: SchedulerContext) -> Self {
        Self {
            inner: Arc::new(Inner {
                context,
                jobs: RwLock::new(Vec::new()),
                running: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                tick: Mutex::new(None),
                tick_period: Mutex::new(None),
                listeners: Mutex::new(ShutdownPipeline::new()),
            }),
        }
    }

    pub fn context(&self) -> &SchedulerContext {
        &self.inner.context
    }

    /// Register a listener to run on [`stop`](Self::stop)
    pub fn add_shutdown_listener(&self, listener: Arc<dyn ShutdownListener>) {
        lock(&self.inner.listeners).add(listener);
    }

    /// Build one job per active entry and start the tick.
    ///
    /// Entries without tasks or subscribers are dropped. Starting with no
    /// active entry at all is an error, as is starting twice. The tick and
    /// every execution run on the current tokio runtime; calling this outside
    /// one is an error.
    pub fn start(&self, confs: &[SentinelConf]) -> Result<StartReport> {
        let runtime = Handle::try_current()
            .map_err(|e| VigilError::Scheduler(format!("no tokio runtime to start on: {}", e)))?;

        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(VigilError::Scheduler("scheduler already running".to_string()));
        }

        let result = self.launch(&runtime, confs);
        if result.is_err() {
            self.inner.running.store(false, Ordering::Release);
        }
        result
    }

    fn launch(&self, runtime: &Handle, confs: &[SentinelConf]) -> Result<StartReport> {
        let active: Vec<&SentinelConf> = confs.iter().filter(|c| c.is_active()).collect();
        let dropped = confs.len() - active.len();
        if dropped > 0 {
            debug!("Dropping {} sentinel entries without tasks or subscribers", dropped);
        }
        if active.is_empty() {
            return Err(VigilError::NoActiveJobs);
        }
        if let Some(conf) = active.iter().find(|c| c.interval == 0) {
            return Err(VigilError::Config(format!(
                "sentinel interval must be positive (tasks: {:?})",
                conf.tasks
            )));
        }

        let now = Instant::now();
        let registry = &self.inner.context.registry;
        let jobs = active
            .iter()
            .enumerate()
            .map(|(id, conf)| -> Result<Arc<SentinelJob>> {
                let destinations = registry.bind_all(&conf.subscribers)?;
                Ok(Arc::new(SentinelJob::new(id, conf, destinations, now)))
            })
            .collect::<Result<Vec<_>>>()?;

        let period = jobs
            .iter()
            .map(|job| job.interval())
            .min()
            .unwrap_or(Duration::from_secs(1));

        let job_count = jobs.len();
        *write(&self.inner.jobs) = jobs;
        *lock(&self.inner.tick_period) = Some(period);
        let epoch = self.inner.epoch.fetch_add(1, Ordering::AcqRel) + 1;

        let inner = self.inner.clone();
        let handle = runtime.spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if !inner.is_current(epoch) {
                    break;
                }
                inner.scan(epoch);
            }
            debug!("Sentinel tick loop exited");
        });
        if let Some(previous) = lock(&self.inner.tick).replace(handle) {
            previous.abort();
        }

        info!(
            "Sentinel scheduler started with {} jobs, tick every {:?}",
            job_count, period
        );

        Ok(StartReport {
            jobs: job_count,
            dropped,
            tick: period,
        })
    }

    /// Cancel the tick, drop every job and run the shutdown listeners.
    ///
    /// In-flight executions are not interrupted; once their collection
    /// completes they notice the stop and skip their fan-out. Exports already
    /// spawned run to completion and still report to the breaker. Stopping a
    /// scheduler that is not running does nothing.
    pub async fn stop(&self, reason: &str) -> Vec<ListenerOutcome> {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            debug!("Stop requested ({}) but scheduler is not running", reason);
            return Vec::new();
        }

        info!("Stopping sentinel scheduler: {}", reason);
        self.inner.epoch.fetch_add(1, Ordering::AcqRel);
        if let Some(handle) = lock(&self.inner.tick).take() {
            handle.abort();
        }
        write(&self.inner.jobs).clear();
        *lock(&self.inner.tick_period) = None;

        let pipeline = lock(&self.inner.listeners).clone();
        let outcomes = pipeline.run_all().await;
        let failed = outcomes.iter().filter(|o| !o.succeeded()).count();
        if failed > 0 {
            warn!("{} of {} shutdown listeners failed", failed, outcomes.len());
        }
        info!("Sentinel scheduler stopped");
        outcomes
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Tick period of the current run
    pub fn tick_period(&self) -> Option<Duration> {
        *lock(&self.inner.tick_period)
    }

    /// Status of every job still in the active set
    pub fn active_jobs(&self) -> Vec<JobStatus> {
        let now = Instant::now();
        read(&self.inner.jobs)
            .iter()
            .map(|job| job.status(now))
            .collect()
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.inner.running.store(false, Ordering::Release);
        if let Some(handle) = lock(&self.inner.tick).take() {
            handle.abort();
        }
    }
}

impl Inner {
    fn is_current(&self, epoch: u64) -> bool {
        self.running.load(Ordering::Acquire) && self.epoch.load(Ordering::Acquire) == epoch
    }

    /// Dispatch every due job that is not already running, retiring jobs
    /// whose dispatch uses up their execution limit
    fn scan(self: &Arc<Self>, epoch: u64) {
        let now = Instant::now();
        let mut jobs = write(&self.jobs);

        jobs.retain(|job| {
            if !job.is_due(now) {
                return true;
            }
            let Some(claim) = job.try_begin() else {
                debug!("Sentinel job {} still in flight, skipping", job.id());
                return true;
            };

            let run = job.record_dispatch();
            let retire = job.is_final_run(run);
            debug!("Dispatching sentinel job {} (run {})", job.id(), run);

            let inner = self.clone();
            tokio::spawn(async move { inner.execute(claim, epoch).await });

            if retire {
                info!("Sentinel job {} retired after {} runs", job.id(), run);
            }
            !retire
        });
    }

    /// Run one execution. The claim is held until this returns or unwinds.
    async fn execute(self: Arc<Self>, claim: RunClaim, epoch: u64) {
        let job = claim.job();
        let context = &self.context;

        match context
            .sampler
            .collect_ports(&context.node, job.tasks(), job.ports())
            .await
        {
            Ok(snapshot) => {
                if !self.is_current(epoch) {
                    debug!("Scheduler stopped, dropping snapshot of job {}", job.id());
                    return;
                }

                let snapshot = Arc::new(snapshot);
                for destination in job.destinations() {
                    let destination = destination.clone();
                    let snapshot = snapshot.clone();
                    tokio::spawn(async move {
                        destination.export(&snapshot).await;
                    });
                }
                job.advance(Instant::now());
            }
            Err(e) => {
                error!("Sentinel job {} collection failed: {}", job.id(), e);
                if context.advance_on_failure {
                    job.advance(Instant::now());
                }
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}
