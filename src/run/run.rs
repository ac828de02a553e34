//! A single compiled, executable test instance
//!
//! A `Run` owns its command list behind one lock shared between the engine
//! (writer) and any concurrent observer (reader). The engine holds the
//! lock only across appends and status updates, never across I/O.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::common::config::RunConf;
use crate::common::Result;
use crate::script::{compile, EnvSet};

use super::command::Command;
use super::events::{RunEvent, EVENT_CHANNEL_CAPACITY};

/// Terminal result of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunResult {
    /// Not yet executed
    #[default]
    None,
    Running,
    /// Clean kernel exit reached
    Shutdown,
    /// Unexpected panic
    Crash,
    /// A timeout clock expired without tolerance
    Timeout,
    /// Input loss, policy mismatch, or session failure
    Error,
}

impl RunResult {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunResult::None | RunResult::Running)
    }
}

/// One compiled test, executable at most once
#[derive(Debug)]
pub struct Run {
    pub id: Uuid,
    pub script: String,
    pub conf: RunConf,
    /// 16-bit random seed handed to the simulator
    pub seed: u32,
    commands: Arc<Mutex<Vec<Command>>>,
    events: broadcast::Sender<RunEvent>,
    result: Mutex<RunResult>,
    sim_time: Mutex<f64>,
    executed: AtomicBool,
}

impl Run {
    /// Compile script text into a run under the given configuration
    ///
    /// One compilation pass: environment validation and compilation either
    /// both succeed or the run is never created.
    pub fn new(script: &str, conf: RunConf) -> Result<Self> {
        let envs = EnvSet::new(&conf.env_defs)?;
        let commands = compile(script, &envs, &conf.overrides)?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            id: Uuid::new_v4(),
            script: script.to_string(),
            conf,
            seed: rand::random::<u32>() >> 16,
            commands: Arc::new(Mutex::new(commands)),
            events,
            result: Mutex::new(RunResult::None),
            sim_time: Mutex::new(0.0),
            executed: AtomicBool::new(false),
        })
    }

    /// Shared handle to the command list for concurrent observers
    pub fn commands(&self) -> Arc<Mutex<Vec<Command>>> {
        Arc::clone(&self.commands)
    }

    /// Lock the command list; held only across short reads and appends
    pub(crate) fn lock_commands(&self) -> MutexGuard<'_, Vec<Command>> {
        self.commands.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Subscribe to this run's observation events
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.events.subscribe()
    }

    pub(crate) fn events(&self) -> broadcast::Sender<RunEvent> {
        self.events.clone()
    }

    /// Current terminal result, `None`/`Running` while in flight
    pub fn result(&self) -> RunResult {
        *self.result.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Simulated time last reported by the session
    pub fn sim_time(&self) -> f64 {
        *self.sim_time.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn set_sim_time(&self, t: f64) {
        *self.sim_time.lock().unwrap_or_else(|e| e.into_inner()) = t;
    }

    /// Mark the run started; fails if it was already executed
    pub(crate) fn begin(&self) -> Result<()> {
        if self.executed.swap(true, Ordering::SeqCst) {
            return Err(crate::common::Error::RunConsumed);
        }
        *self.result.lock().unwrap_or_else(|e| e.into_inner()) = RunResult::Running;
        Ok(())
    }

    pub(crate) fn finish(&self, result: RunResult) {
        *self.result.lock().unwrap_or_else(|e| e.into_inner()) = result;
        let _ = self.events.send(RunEvent::RunCompleted {
            run: self.id,
            result,
        });
    }

    /// Point-in-time serializable view of the run
    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            id: self.id,
            seed: self.seed,
            result: self.result(),
            sim_time: self.sim_time(),
            commands: self.lock_commands().clone(),
        }
    }
}

/// Serializable view of a run for persistence and CLI output
#[derive(Debug, Clone, Serialize)]
pub struct RunSnapshot {
    pub id: Uuid,
    pub seed: u32,
    pub result: RunResult,
    pub sim_time: f64,
    pub commands: Vec<Command>,
}
