//! Async video job coordination.
//!
//! Submissions are persisted as `Queued` jobs and handed to a bounded worker
//! pool. In process mode each slot is served by a long-lived `flower-worker`
//! process that loads the model once, then takes one JSON job envelope per
//! line on stdin and answers with one [`WorkerReply`] line on stdout. Workers
//! open their own store clients; the coordinator only watches the replies and
//! marks a job `Failed` if its worker died without finishing it. Outcome
//! metrics are recorded here, in the server, from the stored final status.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::db::JobStore;
use crate::models::job::{JobStatus, JobType, JobUpdate};
use crate::models::record::Location;
use crate::models::responses::JobSnapshot;
use crate::services::storage::StorageError;
use crate::services::video_job::{self, JobError, VideoJobContext, VideoJobSpec, WorkerReply};

/// How long an idle worker gets to exit after its stdin is closed.
const WORKER_EXIT_GRACE: Duration = Duration::from_secs(10);

/// How a worker slot runs a job.
#[derive(Clone)]
pub enum WorkerLauncher {
    /// Feed jobs to pooled worker processes running this executable.
    Process { program: PathBuf },
    /// Run the routine inside this process.
    InProcess(Arc<VideoJobContext>),
}

#[derive(Clone)]
pub struct JobCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    jobs: Arc<dyn JobStore>,
    launcher: WorkerLauncher,
    permits: Arc<Semaphore>,
    pool_size: u32,
    upload_dir: PathBuf,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<JoinSet<()>>,
    idle: Mutex<Vec<WorkerProcess>>,
}

impl JobCoordinator {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        launcher: WorkerLauncher,
        pool_size: u32,
        upload_dir: impl Into<PathBuf>,
    ) -> Self {
        let pool_size = pool_size.max(1);
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                jobs,
                launcher,
                permits: Arc::new(Semaphore::new(pool_size as usize)),
                pool_size,
                upload_dir: upload_dir.into(),
                shutdown,
                tasks: Mutex::new(JoinSet::new()),
                idle: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.inner.upload_dir
    }

    pub fn pool_size(&self) -> u32 {
        self.inner.pool_size
    }

    /// Persist the upload, create a `Queued` job and dispatch it. Returns as
    /// soon as the job is recorded; the worker waits for a free slot.
    pub async fn submit(
        &self,
        video: &[u8],
        location: Location,
        filename: &str,
    ) -> Result<Uuid, JobError> {
        if *self.inner.shutdown.borrow() {
            return Err(JobError::Launch("job coordinator is shutting down".into()));
        }

        let job_id = Uuid::new_v4();
        let spec = VideoJobSpec::new(job_id, &self.inner.upload_dir, filename, location);

        tokio::fs::create_dir_all(&self.inner.upload_dir).await?;
        tokio::fs::write(&spec.input_path, video).await?;

        let metadata = serde_json::json!({
            "filename": filename,
            "location": location,
        });
        if let Err(e) = self
            .inner
            .jobs
            .create(job_id, JobType::VideoClassification, JobStatus::Queued, metadata)
            .await
        {
            drop(spec.scratch_files());
            return Err(e.into());
        }

        metrics::counter!("video_jobs_submitted_total").increment(1);
        tracing::info!(job_id = %job_id, filename, bytes = video.len(), "Video job queued");

        let inner = self.inner.clone();
        let mut tasks = self.inner.tasks.lock().await;
        while tasks.try_join_next().is_some() {}
        tasks.spawn(run_job(inner, spec));

        Ok(job_id)
    }

    /// Current snapshot of a job, with the remaining-time estimate.
    pub async fn poll(&self, job_id: Uuid) -> Result<Option<JobSnapshot>, StorageError> {
        let job = self.inner.jobs.get_by_id(job_id).await?;
        Ok(job.map(|job| JobSnapshot::at(job, Utc::now())))
    }

    /// Delete the job record. A worker already running keeps going and its
    /// later updates are dropped by the store.
    pub async fn cancel(&self, job_id: Uuid) -> Result<bool, StorageError> {
        let deleted = self.inner.jobs.delete_by_id(job_id).await?;
        if deleted {
            tracing::info!(job_id = %job_id, "Job record deleted; any running worker is not interrupted");
        }
        Ok(deleted)
    }

    pub async fn list_active(&self) -> Result<Vec<JobSnapshot>, StorageError> {
        let now = Utc::now();
        Ok(self
            .inner
            .jobs
            .get_active_jobs()
            .await?
            .into_iter()
            .map(|job| JobSnapshot::at(job, now))
            .collect())
    }

    /// Stop accepting submissions and wait for every dispatched job, running
    /// or still waiting for a slot, to finish.
    pub async fn shutdown(&self) {
        let _ = self.inner.shutdown.send(true);
        let mut tasks = std::mem::take(&mut *self.inner.tasks.lock().await);
        tracing::info!(pending = tasks.len(), "Draining video job workers");

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Video job task ended abnormally");
            }
        }

        if let Ok(permits) = self.inner.permits.acquire_many(self.inner.pool_size).await {
            permits.forget();
        }
        self.inner.permits.close();

        let workers = std::mem::take(&mut *self.inner.idle.lock().await);
        for worker in workers {
            worker.close().await;
        }
        tracing::info!("Video job workers drained");
    }
}

async fn run_job(inner: Arc<Inner>, spec: VideoJobSpec) {
    let _permit = match inner.permits.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            drop(spec.scratch_files());
            mark_failed(&inner, spec.job_id, "worker pool is closed").await;
            return;
        }
    };

    let started = Instant::now();
    metrics::gauge!("video_jobs_active").increment(1.0);
    match &inner.launcher {
        WorkerLauncher::Process { program } => run_in_worker(&inner, program, &spec).await,
        WorkerLauncher::InProcess(ctx) => {
            if let Err(e) = video_job::execute(ctx, &spec).await {
                tracing::error!(job_id = %spec.job_id, error = %e, "Failed to record video job outcome");
            }
        }
    }
    metrics::gauge!("video_jobs_active").decrement(1.0);

    record_outcome(&inner, spec.job_id, started.elapsed()).await;
}

async fn run_in_worker(inner: &Inner, program: &Path, spec: &VideoJobSpec) {
    // The worker removes its scratch files; this guard covers jobs that never
    // reached a worker or whose worker crashed.
    let _scratch = spec.scratch_files();

    let mut worker = match checkout(inner, program).await {
        Ok(worker) => worker,
        Err(e) => {
            tracing::error!(job_id = %spec.job_id, program = %program.display(), error = %e, "Failed to spawn worker");
            mark_failed(inner, spec.job_id, &format!("failed to launch worker: {e}")).await;
            return;
        }
    };

    match worker.run(spec).await {
        Ok(status) => {
            tracing::info!(job_id = %spec.job_id, pid = worker.id(), status = %status, "Worker finished job");
            inner.idle.lock().await.push(worker);
            reconcile(inner, spec.job_id, "worker did not record an outcome").await;
        }
        Err(fault) => {
            let pid = worker.id();
            let status = worker.reap().await;
            tracing::warn!(job_id = %spec.job_id, pid, status = %status, error = %fault, "Worker process lost");
            reconcile(inner, spec.job_id, &format!("worker exited ({status}) before finishing")).await;
        }
    }
}

/// Take a live idle worker, or start a new one.
async fn checkout(inner: &Inner, program: &Path) -> std::io::Result<WorkerProcess> {
    {
        let mut idle = inner.idle.lock().await;
        while let Some(mut worker) = idle.pop() {
            if worker.is_alive() {
                return Ok(worker);
            }
            tracing::warn!(pid = worker.id(), "Discarding exited idle worker");
        }
    }

    let worker = WorkerProcess::spawn(program)?;
    tracing::info!(pid = worker.id(), program = %program.display(), "Worker process started");
    Ok(worker)
}

/// Mark a job `Failed` if it is still short of a terminal state.
async fn reconcile(inner: &Inner, job_id: Uuid, reason: &str) {
    match inner.jobs.get_by_id(job_id).await {
        Ok(Some(job)) if !job.status.is_terminal() => {
            tracing::warn!(job_id = %job_id, status = %job.status, reason, "Job left unfinished by its worker");
            mark_failed(inner, job_id, reason).await;
        }
        Ok(_) => {}
        Err(e) => tracing::error!(job_id = %job_id, error = %e, "Failed to reconcile job state"),
    }
}

async fn mark_failed(inner: &Inner, job_id: Uuid, error: &str) {
    if let Err(e) = inner.jobs.update_status(job_id, &JobUpdate::failed(error)).await {
        tracing::error!(job_id = %job_id, error = %e, "Failed to mark job as failed");
    }
}

/// Record processing metrics from the job's stored final status.
async fn record_outcome(inner: &Inner, job_id: Uuid, elapsed: Duration) {
    match inner.jobs.get_by_id(job_id).await {
        Ok(job) => observe_outcome(job.map(|job| job.status), elapsed),
        Err(e) => tracing::error!(job_id = %job_id, error = %e, "Failed to read job outcome"),
    }
}

/// A deleted job (`None`) still counts toward processing time.
fn observe_outcome(status: Option<JobStatus>, elapsed: Duration) {
    metrics::histogram!("video_job_processing_seconds").record(elapsed.as_secs_f64());
    match status {
        Some(JobStatus::Completed) => metrics::counter!("video_jobs_completed_total").increment(1),
        Some(JobStatus::Failed) => metrics::counter!("video_jobs_failed_total").increment(1),
        _ => {}
    }
}

/// A pooled `flower-worker` process.
struct WorkerProcess {
    child: Child,
    stdin: ChildStdin,
    replies: Lines<BufReader<ChildStdout>>,
}

impl WorkerProcess {
    fn spawn(program: &Path) -> std::io::Result<Self> {
        let mut command = tokio::process::Command::new(program);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(false);
        // A terminal interrupt reaches only the server, which then drains
        // the workers itself.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| std::io::Error::other("worker stdin was not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("worker stdout was not captured"))?;

        Ok(Self {
            child,
            stdin,
            replies: BufReader::new(stdout).lines(),
        })
    }

    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Send one job and wait for the worker's reply to it.
    async fn run(&mut self, spec: &VideoJobSpec) -> Result<JobStatus, JobError> {
        let mut envelope = serde_json::to_vec(spec)?;
        envelope.push(b'\n');
        self.stdin.write_all(&envelope).await?;
        self.stdin.flush().await?;

        let line = self
            .replies
            .next_line()
            .await?
            .ok_or_else(|| JobError::Worker("worker closed its output".into()))?;
        let reply: WorkerReply = serde_json::from_str(&line)?;
        if reply.job_id != spec.job_id {
            return Err(JobError::Worker(format!(
                "reply for job {} while running {}",
                reply.job_id, spec.job_id
            )));
        }
        Ok(reply.status)
    }

    /// Kill a worker that broke the protocol and collect its exit status.
    async fn reap(mut self) -> String {
        let _ = self.child.start_kill();
        match self.child.wait().await {
            Ok(status) => status.to_string(),
            Err(e) => format!("unknown status: {e}"),
        }
    }

    /// Close stdin so the worker exits after its current line.
    async fn close(self) {
        let Self {
            mut child, stdin, ..
        } = self;
        drop(stdin);
        let pid = child.id();
        match tokio::time::timeout(WORKER_EXIT_GRACE, child.wait()).await {
            Ok(Ok(status)) => tracing::info!(pid, status = %status, "Worker process exited"),
            Ok(Err(e)) => tracing::error!(pid, error = %e, "Failed to wait for worker"),
            Err(_) => {
                tracing::warn!(pid, "Worker did not exit in time; killing it");
                let _ = child.kill().await;
            }
        }
    }
}
