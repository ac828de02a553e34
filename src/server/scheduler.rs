//! The run scheduler
//!
//! Admits submissions, compiles their runs up front, and drives each run
//! on its own task through the interaction engine against a fresh
//! simulator session. One global semaphore caps concurrently running runs;
//! waiters are released in first-in-first-out order. Capacity pressure
//! queues work, it never rejects it; rejection is reserved for policy.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::common::config::ServerConf;
use crate::common::{Error, Result};
use crate::run::{InteractionEngine, Run, RunResult};
use crate::sim::{Console, ProcessConsole};

use super::catalog::{IdentityStore, RunStore, Target, TargetCatalog};
use super::submission::{
    CombinedStats, RejectReason, Rejection, SchedulerStatus, Submission, SubmissionRequest,
};

/// Opens a fresh simulator session for one run
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self, run: &Run, kernel: &str) -> Result<Box<dyn Console>>;
}

/// Factory launching real sys161 processes, one directory per run
pub struct ProcessFactory {
    root: PathBuf,
}

impl ProcessFactory {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl SessionFactory for ProcessFactory {
    async fn open(&self, run: &Run, kernel: &str) -> Result<Box<dyn Console>> {
        let workdir = self.root.join(run.id.to_string());
        tokio::fs::create_dir_all(&workdir)
            .await
            .map_err(|e| Error::file_read(&workdir, e))?;
        let console = ProcessConsole::launch(&run.conf.sim, run.seed, kernel, &workdir).await?;
        Ok(Box::new(console))
    }
}

/// Capacity-bounded scheduler over submissions
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    conf: ServerConf,
    catalog: Arc<dyn TargetCatalog>,
    identity: Arc<dyn IdentityStore>,
    store: Arc<dyn RunStore>,
    sessions: Arc<dyn SessionFactory>,
    /// FIFO permit queue; absent when capacity is unbounded
    permits: Option<Arc<Semaphore>>,
    status: Mutex<SchedulerStatus>,
    queued: AtomicU64,
    running: AtomicU64,
    completed: AtomicU64,
    shutdown: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new(
        conf: ServerConf,
        catalog: Arc<dyn TargetCatalog>,
        identity: Arc<dyn IdentityStore>,
        store: Arc<dyn RunStore>,
        sessions: Arc<dyn SessionFactory>,
    ) -> Self {
        let permits = (conf.capacity > 0).then(|| Arc::new(Semaphore::new(conf.capacity)));
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                conf,
                catalog,
                identity,
                store,
                sessions,
                permits,
                status: Mutex::new(SchedulerStatus::Accepting),
                queued: AtomicU64::new(0),
                running: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                shutdown,
            }),
        }
    }

    /// Validate and compile a request into a submission
    ///
    /// Capacity is never consulted here; saturated capacity queues work in
    /// `run`, it does not reject it.
    pub async fn submit(
        &self,
        request: SubmissionRequest,
    ) -> std::result::Result<Submission, Rejection> {
        let inner = &self.inner;

        if request.users.is_empty() {
            return Err(Rejection::new(
                RejectReason::BadRequest,
                "at least one user is required",
            ));
        }

        if request.client_version < inner.conf.min_client {
            return Err(Rejection::new(
                RejectReason::VersionTooOld,
                format!(
                    "client {} is older than the minimum {}",
                    request.client_version, inner.conf.min_client
                ),
            ));
        }

        let status = self.status();
        if status == SchedulerStatus::Draining {
            return Err(Rejection::new(
                RejectReason::ServiceUnavailable,
                "server is draining and not accepting submissions",
            ));
        }

        let mut all_staff = true;
        for user in &request.users {
            if !inner.identity.is_staff(user).await {
                all_staff = false;
                break;
            }
        }

        if status == SchedulerStatus::StaffOnly && !all_staff {
            return Err(Rejection::new(
                RejectReason::ServiceUnavailable,
                "server is only accepting staff submissions",
            ));
        }

        let Some(target) = inner.catalog.lookup(&request.target).await else {
            return Err(Rejection::new(
                RejectReason::Unprocessable,
                format!("unknown target '{}'", request.target),
            ));
        };

        if inner.conf.disabled_targets.contains(&target.name) {
            return Err(Rejection::new(
                RejectReason::Unprocessable,
                format!("target '{}' is disabled", target.name),
            ));
        }

        if inner.conf.staff_only_targets.contains(&target.name) && !all_staff {
            return Err(Rejection::new(
                RejectReason::Unprocessable,
                format!("target '{}' is restricted to staff", target.name),
            ));
        }

        let mut runs = Vec::with_capacity(target.scripts.len());
        for script in &target.scripts {
            let run = Run::new(script, target.conf.clone()).map_err(|e| {
                Rejection::new(
                    RejectReason::Unprocessable,
                    format!("target script failed to compile: {}", e),
                )
            })?;
            runs.push(Arc::new(run));
        }

        let submission = Submission {
            id: Uuid::new_v4(),
            target,
            users: request.users,
            runs,
        };
        tracing::info!(
            submission = %submission.id,
            target = %submission.target.name,
            runs = submission.runs.len(),
            "submission accepted"
        );
        Ok(submission)
    }

    /// Drive an accepted submission's runs, each on its own task
    ///
    /// The returned handle resolves once every run has finished.
    pub fn run(&self, submission: Submission) -> JoinHandle<()> {
        let Submission {
            id, target, runs, ..
        } = submission;
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            let mut handles = Vec::with_capacity(runs.len());
            for run in runs {
                let inner = Arc::clone(&inner);
                let kernel = target.kernel.clone();
                handles.push(tokio::spawn(async move {
                    inner.execute(run, &kernel).await;
                }));
            }
            for handle in handles {
                let _ = handle.await;
            }
            tracing::info!(submission = %id, "submission finished");
        })
    }

    pub fn status(&self) -> SchedulerStatus {
        *self
            .inner
            .status
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_status(&self, status: SchedulerStatus) {
        *self
            .inner
            .status
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = status;
        tracing::info!(?status, "scheduler status changed");
    }

    /// Stop admitting submissions; in-flight runs continue to completion
    pub fn drain(&self) {
        self.set_status(SchedulerStatus::Draining);
    }

    /// Drain and signal running engines to stop issuing input
    pub fn shutdown(&self) {
        self.drain();
        let _ = self.inner.shutdown.send(true);
    }

    pub async fn targets(&self) -> Vec<Target> {
        self.inner.catalog.list().await
    }

    /// Sample current load without pausing running work
    pub fn combined_stats(&self) -> CombinedStats {
        CombinedStats {
            queued: self.inner.queued.load(Ordering::SeqCst),
            running: self.inner.running.load(Ordering::SeqCst),
            completed: self.inner.completed.load(Ordering::SeqCst),
            capacity: self.inner.conf.capacity,
        }
    }
}

impl Inner {
    async fn execute(&self, run: Arc<Run>, kernel: &str) {
        self.queued.fetch_add(1, Ordering::SeqCst);
        let _permit = match &self.permits {
            Some(sem) => match Arc::clone(sem).acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => {
                    self.queued.fetch_sub(1, Ordering::SeqCst);
                    return;
                }
            },
            None => None,
        };
        self.queued.fetch_sub(1, Ordering::SeqCst);
        self.running.fetch_add(1, Ordering::SeqCst);

        // A run that waited out a shutdown never gets a session
        if *self.shutdown.borrow() {
            tracing::info!(run = %run.id, "shutdown signalled, not starting queued run");
            let _ = run.begin();
            run.finish(RunResult::Error);
        } else {
            let engine = InteractionEngine::with_shutdown(self.shutdown.subscribe());
            match self.sessions.open(&run, kernel).await {
                Ok(mut console) => {
                    engine.run(&run, console.as_mut()).await;
                }
                Err(e) => {
                    tracing::error!(run = %run.id, error = %e, "failed to open simulator session");
                    let _ = run.begin();
                    run.finish(RunResult::Error);
                }
            }
        }

        if let Err(e) = self.store.save(&run.snapshot()).await {
            tracing::warn!(run = %run.id, error = %e, "failed to persist run snapshot");
        }

        self.running.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
}
