//! Scheduled jobs: cron-triggered synthetic prompts into the brain.
//!
//! The trigger source is behind the [`CronEngine`] trait so the scheduler is
//! testable by firing callbacks manually. The production engine gives each
//! job its own tokio timer task; a slow handler only ever delays that job's
//! own next trigger.

use crate::brain::Brain;
use crate::error::{Result, SchedulerError};
use futures::FutureExt as _;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::str::FromStr as _;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// A registered scheduled job.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub cron_expr: String,
    pub prompt: String,
}

/// The canonical synthetic prompt injected into the brain when a job fires.
pub fn system_event_prompt(job: &Job) -> String {
    format!(
        "[System Event: Scheduled Job \"{}\"]\n{}",
        job.name, job.prompt
    )
}

/// Invoked with the job on every fire.
pub type EventHandler = Arc<dyn Fn(Job) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Engine-side id for a registered trigger.
pub type EngineJobId = u64;

/// Callback a trigger fires; awaited on the job's own timer task.
pub type EngineCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Cron trigger source.
pub trait CronEngine: Send + Sync {
    /// Register a trigger. Fails on a malformed schedule expression.
    fn add_job(&self, spec: &str, callback: EngineCallback) -> Result<EngineJobId>;
    fn remove(&self, id: EngineJobId);
    fn start(&self);
    fn stop(&self);
}

/// A parsed schedule: fixed interval or cron expression.
#[derive(Debug, Clone)]
enum CronSpec {
    Every(Duration),
    Cron(Box<cron::Schedule>),
}

/// Parse a schedule: five-field cron (a seconds column is prepended for the
/// engine), six/seven-field cron, or the `@every <duration>` shorthand.
fn parse_cron_spec(spec: &str) -> Result<CronSpec> {
    let spec = spec.trim();
    if let Some(duration_text) = spec.strip_prefix("@every ") {
        let duration = parse_duration(duration_text.trim()).ok_or_else(|| {
            SchedulerError::InvalidCron {
                expr: spec.to_string(),
                reason: format!("bad duration {duration_text:?}"),
            }
        })?;
        if duration.is_zero() {
            return Err(SchedulerError::InvalidCron {
                expr: spec.to_string(),
                reason: "duration must be positive".to_string(),
            }
            .into());
        }
        return Ok(CronSpec::Every(duration));
    }

    let normalized = if spec.split_whitespace().count() == 5 {
        format!("0 {spec}")
    } else {
        spec.to_string()
    };

    let schedule =
        cron::Schedule::from_str(&normalized).map_err(|error| SchedulerError::InvalidCron {
            expr: spec.to_string(),
            reason: error.to_string(),
        })?;
    Ok(CronSpec::Cron(Box::new(schedule)))
}

/// Parse durations of the form `500ms`, `30s`, `1m`, `2h`.
fn parse_duration(text: &str) -> Option<Duration> {
    let unit_start = text.find(|c: char| !c.is_ascii_digit())?;
    let value: u64 = text[..unit_start].parse().ok()?;
    match &text[unit_start..] {
        "ms" => Some(Duration::from_millis(value)),
        "s" => Some(Duration::from_secs(value)),
        "m" => Some(Duration::from_secs(value * 60)),
        "h" => Some(Duration::from_secs(value * 3600)),
        _ => None,
    }
}

struct EngineEntry {
    spec: CronSpec,
    callback: EngineCallback,
    handle: Option<tokio::task::JoinHandle<()>>,
}

/// Production engine: one tokio timer task per registered trigger.
#[derive(Default)]
pub struct TokioCronEngine {
    entries: StdMutex<HashMap<EngineJobId, EngineEntry>>,
    next_id: AtomicU64,
    started: AtomicBool,
}

impl TokioCronEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn spawn_timer(id: EngineJobId, spec: CronSpec, callback: EngineCallback) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tracing::debug!(engine_job_id = id, "cron timer started");
            match spec {
                CronSpec::Every(period) => {
                    let mut ticker =
                        tokio::time::interval_at(tokio::time::Instant::now() + period, period);
                    // Skip catch-up ticks if a fire overruns — keep cadence.
                    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                    loop {
                        ticker.tick().await;
                        run_fire(id, &callback).await;
                    }
                }
                CronSpec::Cron(schedule) => loop {
                    let Some(next) = schedule.upcoming(chrono::Utc).next() else {
                        tracing::debug!(engine_job_id = id, "schedule exhausted, timer stopping");
                        break;
                    };
                    let until = (next - chrono::Utc::now()).to_std().unwrap_or_default();
                    tokio::time::sleep(until).await;
                    run_fire(id, &callback).await;
                },
            }
        })
    }
}

/// Run one fire on its own task so aborting the timer never kills an
/// in-flight invocation, and await it so a slow fire delays only this job.
async fn run_fire(id: EngineJobId, callback: &EngineCallback) {
    let fire = tokio::spawn(callback());
    match fire.await {
        Ok(()) => {}
        Err(join_error) if join_error.is_panic() => {
            tracing::warn!(engine_job_id = id, "cron fire task panicked");
        }
        Err(_) => {}
    }
}

impl CronEngine for TokioCronEngine {
    fn add_job(&self, spec: &str, callback: EngineCallback) -> Result<EngineJobId> {
        let parsed = parse_cron_spec(spec)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let handle = if self.started.load(Ordering::Acquire) {
            Some(Self::spawn_timer(id, parsed.clone(), callback.clone()))
        } else {
            None
        };

        self.entries.lock().expect("engine lock poisoned").insert(
            id,
            EngineEntry {
                spec: parsed,
                callback,
                handle,
            },
        );
        Ok(id)
    }

    fn remove(&self, id: EngineJobId) {
        let entry = self.entries.lock().expect("engine lock poisoned").remove(&id);
        if let Some(entry) = entry
            && let Some(handle) = entry.handle
        {
            handle.abort();
        }
    }

    fn start(&self) {
        self.started.store(true, Ordering::Release);
        let mut entries = self.entries.lock().expect("engine lock poisoned");
        for (id, entry) in entries.iter_mut() {
            if entry.handle.is_none() {
                entry.handle = Some(Self::spawn_timer(
                    *id,
                    entry.spec.clone(),
                    entry.callback.clone(),
                ));
            }
        }
    }

    fn stop(&self) {
        self.started.store(false, Ordering::Release);
        let mut entries = self.entries.lock().expect("engine lock poisoned");
        for entry in entries.values_mut() {
            if let Some(handle) = entry.handle.take() {
                handle.abort();
            }
        }
    }
}

impl std::fmt::Debug for TokioCronEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioCronEngine").finish_non_exhaustive()
    }
}

/// Manual engine: triggers fire only when [`ManualCronEngine::fire`] is
/// called. Used by tests and embedders that drive scheduling themselves.
#[derive(Default)]
pub struct ManualCronEngine {
    callbacks: StdMutex<HashMap<EngineJobId, EngineCallback>>,
    next_id: AtomicU64,
}

impl ManualCronEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the trigger with the given engine id, awaiting its callback.
    pub async fn fire(&self, id: EngineJobId) {
        let callback = self
            .callbacks
            .lock()
            .expect("engine lock poisoned")
            .get(&id)
            .cloned();
        if let Some(callback) = callback {
            callback().await;
        }
    }

    /// Engine ids currently registered, in registration order.
    pub fn registered_ids(&self) -> Vec<EngineJobId> {
        let mut ids: Vec<EngineJobId> = self
            .callbacks
            .lock()
            .expect("engine lock poisoned")
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    fn callback_for(&self, id: EngineJobId) -> Option<EngineCallback> {
        self.callbacks
            .lock()
            .expect("engine lock poisoned")
            .get(&id)
            .cloned()
    }
}

impl CronEngine for ManualCronEngine {
    fn add_job(&self, spec: &str, callback: EngineCallback) -> Result<EngineJobId> {
        // Validate even though firing is manual, so bad specs fail loudly in
        // tests too.
        parse_cron_spec(spec)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .lock()
            .expect("engine lock poisoned")
            .insert(id, callback);
        Ok(id)
    }

    fn remove(&self, id: EngineJobId) {
        self.callbacks
            .lock()
            .expect("engine lock poisoned")
            .remove(&id);
    }

    fn start(&self) {}

    fn stop(&self) {}
}

struct JobEntry {
    job: Job,
    engine_id: EngineJobId,
    /// Single-flight guard: at most one in-flight invocation per job.
    in_flight: Arc<tokio::sync::Mutex<()>>,
}

/// Registers jobs against a cron engine and fires an event handler per job.
pub struct Scheduler {
    jobs: Arc<RwLock<HashMap<String, JobEntry>>>,
    engine: Arc<dyn CronEngine>,
    handler: EventHandler,
}

impl Scheduler {
    pub fn new(engine: Arc<dyn CronEngine>, handler: EventHandler) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            engine,
            handler,
        }
    }

    /// Register a job and its trigger.
    pub async fn add_job(&self, job: Job) -> Result<()> {
        if job.id.is_empty() {
            return Err(SchedulerError::EmptyJobId.into());
        }
        if job.cron_expr.is_empty() {
            return Err(SchedulerError::EmptyCron.into());
        }
        if job.prompt.is_empty() {
            return Err(SchedulerError::EmptyPrompt.into());
        }

        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(SchedulerError::DuplicateJob(job.id).into());
        }

        let in_flight = Arc::new(tokio::sync::Mutex::new(()));
        let callback: EngineCallback = {
            let jobs = self.jobs.clone();
            let handler = self.handler.clone();
            let job = job.clone();
            let in_flight = in_flight.clone();
            Arc::new(move || {
                fire_job(jobs.clone(), handler.clone(), job.clone(), in_flight.clone()).boxed()
            })
        };

        // A parse failure here leaves no trace in the registry.
        let engine_id = self.engine.add_job(&job.cron_expr, callback)?;

        tracing::info!(job_id = %job.id, cron = %job.cron_expr, "job registered");
        jobs.insert(
            job.id.clone(),
            JobEntry {
                job,
                engine_id,
                in_flight,
            },
        );
        Ok(())
    }

    /// Remove a job. An in-flight fire may complete; it never fires again.
    pub async fn remove_job(&self, job_id: &str) -> Result<()> {
        if job_id.is_empty() {
            return Err(SchedulerError::EmptyJobId.into());
        }

        let entry = self
            .jobs
            .write()
            .await
            .remove(job_id)
            .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))?;
        self.engine.remove(entry.engine_id);
        tracing::info!(job_id, "job removed");
        Ok(())
    }

    /// Snapshot of registered jobs, sorted by id. Never nil.
    pub async fn list_jobs(&self) -> Vec<Job> {
        let jobs = self.jobs.read().await;
        let mut snapshot: Vec<Job> = jobs.values().map(|entry| entry.job.clone()).collect();
        snapshot.sort_by(|a, b| a.id.cmp(&b.id));
        snapshot
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Job> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .map(|entry| entry.job.clone())
            .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()).into())
    }

    /// Fire a job immediately, outside its timer. Subject to the same
    /// single-flight guard as scheduled fires.
    pub async fn trigger_now(&self, job_id: &str) -> Result<()> {
        let (job, in_flight) = {
            let jobs = self.jobs.read().await;
            let entry = jobs
                .get(job_id)
                .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))?;
            (entry.job.clone(), entry.in_flight.clone())
        };
        tracing::info!(job_id, "job triggered manually");
        fire_job(self.jobs.clone(), self.handler.clone(), job, in_flight).await;
        Ok(())
    }

    /// Preload jobs from configuration. Each failure is logged and skipped so
    /// one bad entry never blocks the rest.
    pub async fn preload(&self, configs: &[crate::config::JobConfig]) {
        for config in configs {
            let job = Job {
                id: config.id.clone(),
                name: if config.name.is_empty() {
                    config.id.clone()
                } else {
                    config.name.clone()
                },
                cron_expr: config.cron.clone(),
                prompt: config.prompt.clone(),
            };
            if let Err(error) = self.add_job(job).await {
                tracing::warn!(job_id = %config.id, %error, "skipping preloaded job");
            }
        }
    }

    pub fn start(&self) {
        self.engine.start();
        tracing::info!("scheduler started");
    }

    pub fn stop(&self) {
        self.engine.stop();
        tracing::info!("scheduler stopped");
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler").finish_non_exhaustive()
    }
}

/// One fire: registry check, single-flight guard, panic-recovered handler.
async fn fire_job(
    jobs: Arc<RwLock<HashMap<String, JobEntry>>>,
    handler: EventHandler,
    job: Job,
    in_flight: Arc<tokio::sync::Mutex<()>>,
) {
    // A job removed after its trigger was queued must not fire.
    if !jobs.read().await.contains_key(&job.id) {
        tracing::debug!(job_id = %job.id, "job no longer registered, skipping fire");
        return;
    }

    let Ok(_guard) = in_flight.try_lock() else {
        tracing::debug!(job_id = %job.id, "previous fire still running, skipping");
        return;
    };

    tracing::info!(job_id = %job.id, job_name = %job.name, "job firing");
    match AssertUnwindSafe(handler(job.clone())).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => {
            tracing::warn!(job_id = %job.id, %error, "job handler failed");
        }
        Err(payload) => {
            tracing::warn!(
                job_id = %job.id,
                panic = %crate::lane::panic_message(payload.as_ref()),
                "job handler panicked"
            );
        }
    }
}

/// Event handler that formats the system-event prompt and runs it through
/// the brain.
pub fn brain_event_handler(brain: Arc<Brain>, cancel: CancellationToken) -> EventHandler {
    Arc::new(move |job: Job| {
        let brain = brain.clone();
        let cancel = cancel.clone();
        async move {
            let prompt = system_event_prompt(&job);
            let reply = brain.generate(&cancel, &prompt).await?;
            tracing::info!(job_id = %job.id, reply_len = reply.len(), "scheduled job completed");
            Ok(())
        }
        .boxed()
    })
}
