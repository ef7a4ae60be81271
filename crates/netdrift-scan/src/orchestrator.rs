//! Scan orchestration.
//!
//! The orchestrator owns a job table of queued and active scans and a
//! sweep loop that promotes queued jobs onto the tokio runtime, reaps
//! completed workers, and exits once the table drains. Jobs are keyed
//! by `scan-{target}-{profile}`; a second submission under the same key
//! is rejected until the first reaches a terminal state. Every job
//! carries a cancel token that is checked before the scan starts and
//! again before results are persisted, so a cancelled job never writes
//! to the store.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use netdrift_core::{DriftConfig, ProgressEvent};
use netdrift_diff::DiffOptions;
use netdrift_store::{Profile, Snapshot, SnapshotStore, StoreError};

use crate::error::{Result, ScanError};
use crate::executor::ScanExecutor;
use crate::report::{self, DiffRequest, DiffResult};
use crate::target::validate_target;

/// Cooperative cancellation flag shared between the orchestrator and a
/// worker.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Lifecycle of a scan job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Finished,
    Cancelled,
    Failed,
}

/// Point-in-time view of one job for status listings.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub name: String,
    pub target: String,
    pub profile: String,
    pub state: JobState,
}

/// Record of a completed scan that persisted snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct ScanOutcome {
    pub target: String,
    pub profile: String,
    pub snapshots: Vec<Snapshot>,
    pub finished_at: DateTime<Utc>,
}

/// Handed back on submission; the receiving end of the job's progress
/// channel.
#[derive(Debug)]
pub struct ProgressHandle {
    pub job: String,
    pub events: mpsc::UnboundedReceiver<ProgressEvent>,
}

struct QueuedJob {
    name: String,
    target: String,
    profile: Profile,
    cancel: CancelToken,
    progress: mpsc::UnboundedSender<ProgressEvent>,
}

struct ActiveJob {
    target: String,
    profile: String,
    handle: JoinHandle<()>,
    cancel: CancelToken,
    done: Arc<Mutex<Option<JobState>>>,
}

#[derive(Default)]
struct JobTable {
    queued: VecDeque<QueuedJob>,
    active: HashMap<String, ActiveJob>,
    finished: Vec<JobInfo>,
    session_active: bool,
}

struct Shared {
    store: Arc<dyn SnapshotStore>,
    executor: Arc<dyn ScanExecutor>,
    config: DriftConfig,
    table: Mutex<JobTable>,
    outcomes: Mutex<Vec<ScanOutcome>>,
}

/// The scan orchestrator. Cheap to clone; all clones share one job
/// table.
#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        executor: Arc<dyn ScanExecutor>,
        config: DriftConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                executor,
                config,
                table: Mutex::new(JobTable::default()),
                outcomes: Mutex::new(Vec::new()),
            }),
        }
    }

    fn table(&self) -> MutexGuard<'_, JobTable> {
        self.shared
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a scan of `target` under the named profile.
    ///
    /// The profile is resolved from the store first; a profile that only
    /// exists in the configuration is persisted to the store on first
    /// use. Returns the progress channel for the new job.
    pub fn submit(&self, target: &str, profile: &str) -> Result<ProgressHandle> {
        let name = format!("scan-{target}-{profile}");
        if self.in_flight(&name) {
            return Err(ScanError::DuplicateJob(name));
        }

        let profile = self.resolve_profile(profile)?;
        validate_target(target)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let job = QueuedJob {
            name: name.clone(),
            target: target.to_string(),
            profile,
            cancel: CancelToken::default(),
            progress: tx,
        };

        {
            // Validation ran outside the lock; a concurrent submit may
            // have claimed the key meanwhile, so re-check before the
            // push under the same lock.
            let mut table = self.table();
            if table.active.contains_key(&name) || table.queued.iter().any(|j| j.name == name) {
                return Err(ScanError::DuplicateJob(name));
            }
            table.queued.push_back(job);
        }
        tracing::info!(job = %name, "Scan queued");

        Ok(ProgressHandle {
            job: name,
            events: rx,
        })
    }

    fn in_flight(&self, name: &str) -> bool {
        let table = self.table();
        table.active.contains_key(name) || table.queued.iter().any(|j| j.name == name)
    }

    fn resolve_profile(&self, name: &str) -> Result<Profile> {
        match self.shared.store.get_profile(name) {
            Ok(profile) => Ok(profile),
            Err(StoreError::ProfileNotFound(_)) => {
                let arguments = self
                    .shared
                    .config
                    .profile_arguments(name)
                    .ok_or_else(|| ScanError::ProfileNotFound(name.to_string()))?;
                Ok(self.shared.store.save_profile(name, arguments)?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Cancel a queued or running job by name. Returns false if no such
    /// job is pending.
    pub fn cancel(&self, name: &str) -> bool {
        let mut table = self.table();

        if let Some(pos) = table.queued.iter().position(|j| j.name == name) {
            if let Some(job) = table.queued.remove(pos) {
                let _ = job.progress.send(ProgressEvent::Cancelled);
                table.finished.push(JobInfo {
                    name: job.name,
                    target: job.target,
                    profile: job.profile.name,
                    state: JobState::Cancelled,
                });
                tracing::info!(job = %name, "Queued scan cancelled");
                return true;
            }
        }

        if let Some(job) = table.active.get(name) {
            job.cancel.cancel();
            tracing::info!(job = %name, "Running scan flagged for cancellation");
            return true;
        }

        false
    }

    /// Snapshot of every known job: queued, running, and terminal.
    pub fn jobs(&self) -> Vec<JobInfo> {
        let table = self.table();
        let mut jobs = table.finished.clone();
        jobs.extend(table.active.iter().map(|(name, job)| JobInfo {
            name: name.clone(),
            target: job.target.clone(),
            profile: job.profile.clone(),
            state: JobState::Running,
        }));
        jobs.extend(table.queued.iter().map(|job| JobInfo {
            name: job.name.clone(),
            target: job.target.clone(),
            profile: job.profile.name.clone(),
            state: JobState::Queued,
        }));
        jobs
    }

    /// Outcomes of completed scans that persisted snapshots.
    pub fn outcomes(&self) -> Vec<ScanOutcome> {
        self.shared
            .outcomes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Keep the sweep loop alive even when the job table is empty, for
    /// interactive sessions that submit jobs over time.
    pub fn set_session_active(&self, active: bool) {
        self.table().session_active = active;
    }

    /// Drive the sweep loop until the job table drains.
    ///
    /// Each tick reaps finished workers and promotes queued jobs. The
    /// loop exits once nothing is queued or running, unless a session
    /// is marked active.
    pub async fn run(&self) {
        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.shared.config.poll_interval_ms));
        loop {
            ticker.tick().await;
            if self.sweep() {
                return;
            }
        }
    }

    /// One sweep pass. Returns true when the loop should exit.
    fn sweep(&self) -> bool {
        let mut table = self.table();

        let reaped: Vec<String> = table
            .active
            .iter()
            .filter(|(_, job)| job.handle.is_finished())
            .map(|(name, _)| name.clone())
            .collect();
        for name in reaped {
            if let Some(job) = table.active.remove(&name) {
                let state = job
                    .done
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take()
                    .unwrap_or(JobState::Failed);
                tracing::info!(job = %name, state = ?state, "Scan job reaped");
                table.finished.push(JobInfo {
                    name,
                    target: job.target,
                    profile: job.profile,
                    state,
                });
            }
        }

        while let Some(job) = table.queued.pop_front() {
            let done = Arc::new(Mutex::new(None));
            let handle = tokio::spawn(run_worker(self.shared.clone(), worker_input(&job), done.clone()));
            table.active.insert(
                job.name,
                ActiveJob {
                    target: job.target,
                    profile: job.profile.name,
                    handle,
                    cancel: job.cancel,
                    done,
                },
            );
        }

        table.queued.is_empty() && table.active.is_empty() && !table.session_active
    }

    /// Diff options derived from the configured ignore set.
    pub fn diff_options(&self) -> DiffOptions {
        DiffOptions::with_ignore(self.shared.config.ignore_fields.iter().map(String::as_str))
    }

    /// Diff stored snapshots over a window. See [`report::diff_stored`].
    pub fn recent_diffs(&self, request: &DiffRequest) -> Result<Vec<DiffResult>> {
        report::diff_stored(
            self.shared.store.as_ref(),
            &self.diff_options(),
            request,
            self.shared.config.max_diffs,
        )
    }

    /// Diff two explicitly chosen snapshots. See [`report::diff_pair`].
    pub fn diff_pair(&self, a: Uuid, b: Uuid) -> Result<Option<DiffResult>> {
        report::diff_pair(self.shared.store.as_ref(), &self.diff_options(), a, b)
    }

    pub fn store(&self) -> &dyn SnapshotStore {
        self.shared.store.as_ref()
    }
}

struct WorkerInput {
    name: String,
    target: String,
    profile: Profile,
    cancel: CancelToken,
    progress: mpsc::UnboundedSender<ProgressEvent>,
}

fn worker_input(job: &QueuedJob) -> WorkerInput {
    WorkerInput {
        name: job.name.clone(),
        target: job.target.clone(),
        profile: job.profile.clone(),
        cancel: job.cancel.clone(),
        progress: job.progress.clone(),
    }
}

async fn run_worker(shared: Arc<Shared>, job: WorkerInput, done: Arc<Mutex<Option<JobState>>>) {
    let state = execute_job(&shared, &job).await;
    *done.lock().unwrap_or_else(PoisonError::into_inner) = Some(state);
}

async fn execute_job(shared: &Shared, job: &WorkerInput) -> JobState {
    if job.cancel.is_cancelled() {
        let _ = job.progress.send(ProgressEvent::Cancelled);
        return JobState::Cancelled;
    }

    let results = match shared
        .executor
        .scan(&job.target, &job.profile.arguments, &job.progress)
        .await
    {
        Ok(results) => results,
        Err(e) => {
            tracing::error!(job = %job.name, error = %e, "Scan failed");
            return JobState::Failed;
        }
    };

    // A cancellation that lands mid-scan still prevents persistence.
    if job.cancel.is_cancelled() {
        let _ = job.progress.send(ProgressEvent::Cancelled);
        return JobState::Cancelled;
    }

    if results.is_empty() {
        tracing::info!(job = %job.name, "Scan found no hosts up, nothing to persist");
        return JobState::Finished;
    }

    match shared
        .store
        .save(&job.profile.name, &job.target, &results, None)
    {
        Ok(snapshots) => {
            shared
                .outcomes
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(ScanOutcome {
                    target: job.target.clone(),
                    profile: job.profile.name.clone(),
                    snapshots,
                    finished_at: Utc::now(),
                });
            JobState::Finished
        }
        Err(e) => {
            tracing::error!(job = %job.name, error = %e, "Persisting snapshots failed");
            JobState::Failed
        }
    }
}
