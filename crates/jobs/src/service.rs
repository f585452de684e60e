//! Queue service: per-queue dispatchers, retry/backoff, repeat schedules.

use crate::error::{JobError, Result};
use crate::job::{DeadJob, Job, JobOptions, JobPayload, Processor, QueueName};
use crate::limiter::TokenBucket;
use chrono::Utc;
use dashmap::{DashMap, DashSet};
use metrics::{counter, gauge};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct QueueServiceConfig {
    /// Concurrent attempts per queue.
    pub concurrency: usize,
    /// Rate limiter: at most `limiter_max` attempts per `limiter_window`.
    pub limiter_max: usize,
    pub limiter_window: Duration,
    /// Dead set ring size.
    pub dead_capacity: usize,
}

impl Default for QueueServiceConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            limiter_max: 10,
            limiter_window: Duration::from_secs(1),
            dead_capacity: 100,
        }
    }
}

/// Handle to the in-process job queues. Cheap to clone.
#[derive(Clone)]
pub struct QueueService {
    inner: Arc<Inner>,
}

struct Inner {
    config: QueueServiceConfig,
    senders: DashMap<QueueName, mpsc::UnboundedSender<Job>>,
    /// Receivers parked here until a worker is registered for the queue;
    /// jobs enqueued earlier buffer in the channel.
    pending_rx: Mutex<HashMap<QueueName, mpsc::UnboundedReceiver<Job>>>,
    dead: Mutex<VecDeque<DeadJob>>,
    cancelled: DashSet<Uuid>,
    /// Jobs enqueued but not yet terminally finished (success, dead or
    /// cancelled). Includes jobs waiting on a retry backoff.
    in_flight: AtomicUsize,
    shutting_down: AtomicBool,
    drained: Notify,
    dispatcher_tasks: Mutex<Vec<JoinHandle<()>>>,
    repeat_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Inner {
    fn finish(&self) {
        let previous = self.in_flight.fetch_sub(1, Ordering::SeqCst);
        gauge!("jobs_in_flight").set(previous.saturating_sub(1) as f64);
        if previous == 1 {
            self.drained.notify_waiters();
        }
    }

    fn push_dead(&self, job: Job, error: String) {
        error!(
            queue = job.queue.as_str(),
            job = %job.name,
            id = %job.id,
            attempts = job.attempt,
            "job exhausted retries: {error}"
        );
        counter!("jobs_dead_total", "queue" => job.queue.as_str()).increment(1);

        let mut dead = self.dead.lock().unwrap();
        if dead.len() >= self.config.dead_capacity {
            dead.pop_front();
        }
        dead.push_back(DeadJob {
            job,
            error,
            failed_at: Utc::now(),
        });
    }
}

impl QueueService {
    pub fn new(config: QueueServiceConfig) -> Self {
        let senders = DashMap::new();
        let mut pending = HashMap::new();
        for queue in QueueName::ALL {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.insert(queue, tx);
            pending.insert(queue, rx);
        }

        Self {
            inner: Arc::new(Inner {
                config,
                senders,
                pending_rx: Mutex::new(pending),
                dead: Mutex::new(VecDeque::new()),
                cancelled: DashSet::new(),
                in_flight: AtomicUsize::new(0),
                shutting_down: AtomicBool::new(false),
                drained: Notify::new(),
                dispatcher_tasks: Mutex::new(Vec::new()),
                repeat_tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Enqueue a job. Non-blocking; fails only while shutting down.
    pub fn add_job(
        &self,
        queue: QueueName,
        name: impl Into<String>,
        payload: JobPayload,
        opts: JobOptions,
    ) -> Result<Uuid> {
        enqueue(&self.inner, queue, name.into(), payload, opts)
    }

    /// Re-enqueue `payload` every `every`, starting one interval from now.
    /// Each run is an independent job; a failed run never delays the next
    /// tick, and ticks missed under load are skipped rather than bunched.
    pub fn add_repeating(
        &self,
        queue: QueueName,
        name: impl Into<String>,
        payload: JobPayload,
        every: Duration,
    ) {
        let inner = self.inner.clone();
        let name = name.into();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if inner.shutting_down.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(err) = enqueue(
                    &inner,
                    queue,
                    name.clone(),
                    payload.clone(),
                    JobOptions::default(),
                ) {
                    warn!(queue = queue.as_str(), "repeat enqueue skipped: {err}");
                    break;
                }
            }
        });
        self.inner.repeat_tasks.lock().unwrap().push(handle);
    }

    /// Start the dispatcher for `queue`. One worker per queue; a second
    /// registration is ignored.
    pub fn register_worker(&self, queue: QueueName, processor: Arc<dyn Processor>) {
        let rx = match self.inner.pending_rx.lock().unwrap().remove(&queue) {
            Some(rx) => rx,
            None => {
                warn!(queue = queue.as_str(), "worker already registered");
                return;
            }
        };

        info!(
            queue = queue.as_str(),
            concurrency = self.inner.config.concurrency,
            "starting queue worker"
        );
        let inner = self.inner.clone();
        let handle = tokio::spawn(dispatch(inner, queue, processor, rx));
        self.inner.dispatcher_tasks.lock().unwrap().push(handle);
    }

    /// Best-effort cancellation, honored between attempts only. A running
    /// attempt is never interrupted.
    pub fn cancel(&self, job_id: Uuid) {
        self.inner.cancelled.insert(job_id);
    }

    pub fn dead_jobs(&self) -> Vec<DeadJob> {
        self.inner.dead.lock().unwrap().iter().cloned().collect()
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Stop accepting jobs, drain in-flight work up to `timeout`, then abort
    /// the dispatchers.
    pub async fn shutdown(&self, timeout: Duration) {
        info!("queue service draining");
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        for handle in self.inner.repeat_tasks.lock().unwrap().drain(..) {
            handle.abort();
        }

        let drained = async {
            loop {
                let notified = self.inner.drained.notified();
                if self.inner.in_flight.load(Ordering::SeqCst) == 0 {
                    break;
                }
                notified.await;
            }
        };

        if tokio::time::timeout(timeout, drained).await.is_err() {
            warn!(
                in_flight = self.in_flight(),
                "drain timed out, aborting queue dispatchers"
            );
            for handle in self.inner.dispatcher_tasks.lock().unwrap().drain(..) {
                handle.abort();
            }
        } else {
            info!("queue service drained");
        }
    }
}

fn enqueue(
    inner: &Arc<Inner>,
    queue: QueueName,
    name: String,
    payload: JobPayload,
    opts: JobOptions,
) -> Result<Uuid> {
    if inner.shutting_down.load(Ordering::SeqCst) {
        return Err(JobError::ShuttingDown);
    }

    let job = Job::new(queue, name, payload, &opts);
    let id = job.id;
    inner.in_flight.fetch_add(1, Ordering::SeqCst);
    counter!("jobs_enqueued_total", "queue" => queue.as_str()).increment(1);

    match opts.delay {
        Some(delay) if !delay.is_zero() => {
            let inner = inner.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                deliver(&inner, job);
            });
        }
        _ => deliver(inner, job),
    }
    Ok(id)
}

/// Hand a job to its queue channel, settling it instead when the service is
/// draining or the job was cancelled while delayed.
fn deliver(inner: &Arc<Inner>, job: Job) {
    if inner.shutting_down.load(Ordering::SeqCst) && job.attempt == 0 {
        inner.finish();
        return;
    }
    if inner.cancelled.remove(&job.id).is_some() {
        counter!("jobs_cancelled_total", "queue" => job.queue.as_str()).increment(1);
        inner.finish();
        return;
    }
    let sent = inner
        .senders
        .get(&job.queue)
        .map(|tx| tx.send(job).is_ok())
        .unwrap_or(false);
    if !sent {
        inner.finish();
    }
}

async fn dispatch(
    inner: Arc<Inner>,
    queue: QueueName,
    processor: Arc<dyn Processor>,
    mut rx: mpsc::UnboundedReceiver<Job>,
) {
    let semaphore = Arc::new(Semaphore::new(inner.config.concurrency));
    let limiter = Arc::new(TokenBucket::new(
        inner.config.limiter_max,
        inner.config.limiter_window,
    ));

    while let Some(job) = rx.recv().await {
        if inner.cancelled.remove(&job.id).is_some() {
            counter!("jobs_cancelled_total", "queue" => queue.as_str()).increment(1);
            inner.finish();
            continue;
        }

        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        limiter.acquire().await;

        let inner = inner.clone();
        let processor = processor.clone();
        tokio::spawn(async move {
            let _permit = permit;
            run_attempt(inner, processor, job).await;
        });
    }
}

async fn run_attempt(inner: Arc<Inner>, processor: Arc<dyn Processor>, mut job: Job) {
    job.attempt += 1;
    let started = Instant::now();

    match processor.process(&job).await {
        Ok(()) => {
            counter!("jobs_completed_total", "queue" => job.queue.as_str()).increment(1);
            tracing::debug!(
                queue = job.queue.as_str(),
                job = %job.name,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "job completed"
            );
            inner.finish();
        }
        Err(err) if job.attempt >= job.max_attempts => {
            let message = format!("{err:#}");
            inner.push_dead(job, message);
            inner.finish();
        }
        Err(err) => {
            let delay = job.retry_delay();
            warn!(
                queue = job.queue.as_str(),
                job = %job.name,
                attempt = job.attempt,
                retry_in_ms = delay.as_millis() as u64,
                "job attempt failed: {err:#}"
            );
            counter!("jobs_retried_total", "queue" => job.queue.as_str()).increment(1);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if inner.shutting_down.load(Ordering::SeqCst) {
                    inner.finish();
                    return;
                }
                deliver(&inner, job);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn poll_payload(train: &str) -> JobPayload {
        JobPayload::PositionPoll {
            train_number: train.to_string(),
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    /// Records attempt times; fails until `succeed_after` attempts happened.
    struct FlakyProcessor {
        attempts: Mutex<Vec<Instant>>,
        succeed_after: usize,
    }

    impl FlakyProcessor {
        fn new(succeed_after: usize) -> Arc<Self> {
            Arc::new(Self {
                attempts: Mutex::new(Vec::new()),
                succeed_after,
            })
        }

        fn attempt_times(&self) -> Vec<Instant> {
            self.attempts.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Processor for FlakyProcessor {
        async fn process(&self, _job: &Job) -> anyhow::Result<()> {
            let mut attempts = self.attempts.lock().unwrap();
            attempts.push(Instant::now());
            if attempts.len() >= self.succeed_after {
                Ok(())
            } else {
                anyhow::bail!("feed returned nothing")
            }
        }
    }

    struct CountingProcessor {
        runs: AtomicUsize,
        delay: Duration,
    }

    impl CountingProcessor {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                runs: AtomicUsize::new(0),
                delay,
            })
        }
    }

    #[async_trait::async_trait]
    impl Processor for CountingProcessor {
        async fn process(&self, _job: &Job) -> anyhow::Result<()> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_back_off_exponentially_then_job_goes_dead() {
        let service = QueueService::new(QueueServiceConfig::default());
        let processor = FlakyProcessor::new(usize::MAX);
        service.register_worker(QueueName::PositionPoll, processor.clone());

        service
            .add_job(
                QueueName::PositionPoll,
                "poll-12952",
                poll_payload("12952"),
                JobOptions::default(),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;

        let times = processor.attempt_times();
        assert_eq!(times.len(), 3);
        assert!(times[1].duration_since(times[0]) >= Duration::from_secs(2));
        assert!(times[2].duration_since(times[1]) >= Duration::from_secs(4));

        let dead = service.dead_jobs();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].job.attempt, 3);
        assert!(dead[0].error.contains("feed returned nothing"));
        assert_eq!(service.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_a_retry_leaves_no_dead_job() {
        let service = QueueService::new(QueueServiceConfig::default());
        let processor = FlakyProcessor::new(2);
        service.register_worker(QueueName::PositionPoll, processor.clone());

        service
            .add_job(
                QueueName::PositionPoll,
                "poll-12952",
                poll_payload("12952"),
                JobOptions::default(),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(processor.attempt_times().len(), 2);
        assert!(service.dead_jobs().is_empty());
        assert_eq!(service.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limiter_spreads_a_burst_over_windows() {
        let service = QueueService::new(QueueServiceConfig {
            limiter_max: 2,
            ..QueueServiceConfig::default()
        });
        let processor = FlakyProcessor::new(0);
        service.register_worker(QueueName::DataSync, processor.clone());

        for i in 0..4 {
            service
                .add_job(
                    QueueName::DataSync,
                    format!("sync-{i}"),
                    JobPayload::DataSync {
                        scope: "all".to_string(),
                    },
                    JobOptions::default(),
                )
                .unwrap();
        }

        tokio::time::sleep(Duration::from_secs(3)).await;

        let times = processor.attempt_times();
        assert_eq!(times.len(), 4);
        assert!(times[2].duration_since(times[0]) >= Duration::from_secs(1));
        assert!(times[3].duration_since(times[1]) >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn jobs_buffered_before_worker_registration_still_run() {
        let service = QueueService::new(QueueServiceConfig::default());
        service
            .add_job(
                QueueName::DataSync,
                "sync",
                JobPayload::DataSync {
                    scope: "all".to_string(),
                },
                JobOptions::default(),
            )
            .unwrap();
        assert_eq!(service.in_flight(), 1);

        let processor = CountingProcessor::new(Duration::ZERO);
        service.register_worker(QueueName::DataSync, processor.clone());
        settle().await;

        assert_eq!(processor.runs.load(Ordering::SeqCst), 1);
        assert_eq!(service.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_job_runs_after_its_delay() {
        let service = QueueService::new(QueueServiceConfig::default());
        let processor = CountingProcessor::new(Duration::ZERO);
        service.register_worker(QueueName::StatusRefresh, processor.clone());

        service
            .add_job(
                QueueName::StatusRefresh,
                "refresh",
                JobPayload::StatusRefresh {
                    pnr: "8642317590".to_string(),
                    user_id: "u1".to_string(),
                },
                JobOptions::delayed(Duration::from_secs(30)),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(processor.runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(processor.runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_between_attempts_stops_the_retry() {
        let service = QueueService::new(QueueServiceConfig::default());
        let processor = FlakyProcessor::new(usize::MAX);
        service.register_worker(QueueName::PositionPoll, processor.clone());

        let id = service
            .add_job(
                QueueName::PositionPoll,
                "poll-12952",
                poll_payload("12952"),
                JobOptions::default(),
            )
            .unwrap();

        // Let the first attempt fail, then cancel during its backoff.
        settle().await;
        assert_eq!(processor.attempt_times().len(), 1);
        service.cancel(id);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(processor.attempt_times().len(), 1);
        assert!(service.dead_jobs().is_empty());
        assert_eq!(service.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn repeating_jobs_fire_each_interval_regardless_of_outcome() {
        let service = QueueService::new(QueueServiceConfig::default());
        let processor = FlakyProcessor::new(usize::MAX);
        service.register_worker(QueueName::DataSync, processor.clone());

        service.add_repeating(
            QueueName::DataSync,
            "hourly-sync",
            JobPayload::DataSync {
                scope: "all".to_string(),
            },
            Duration::from_secs(3600),
        );

        tokio::time::sleep(Duration::from_secs(3 * 3600 + 10)).await;

        // Three scheduled runs, each retried to death independently.
        assert_eq!(service.dead_jobs().len(), 3);
        assert!(processor.attempt_times().len() >= 9);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drains_in_flight_work_and_rejects_new_jobs() {
        let service = QueueService::new(QueueServiceConfig::default());
        let processor = CountingProcessor::new(Duration::from_secs(1));
        service.register_worker(QueueName::DataSync, processor.clone());

        service
            .add_job(
                QueueName::DataSync,
                "sync",
                JobPayload::DataSync {
                    scope: "all".to_string(),
                },
                JobOptions::default(),
            )
            .unwrap();
        settle().await;

        service.shutdown(Duration::from_secs(10)).await;
        assert_eq!(processor.runs.load(Ordering::SeqCst), 1);
        assert_eq!(service.in_flight(), 0);

        let refused = service.add_job(
            QueueName::DataSync,
            "late",
            JobPayload::DataSync {
                scope: "all".to_string(),
            },
            JobOptions::default(),
        );
        assert!(matches!(refused, Err(JobError::ShuttingDown)));
    }
}
