//! Runner and completion watcher abstractions.
//!
//! A `Runner` is a unit of delegated work; `run` starts it and hands back
//! a `CompletionWatcher`, the completion future the coordinator blocks on.
//! Cron-capable runners additionally install themselves on a schedule
//! instead of running once.

use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::common::error::{Error, Result};
use crate::common::resource::ResourceId;

/// Observable state of a running unit of work.
#[derive(Debug, Clone, Default)]
pub enum WatcherState {
    #[default]
    Running,
    Succeeded,
    Failed(String),
}

/// Completion future for a runner.
#[async_trait]
pub trait CompletionWatcher: Send + Sync + fmt::Display {
    /// Block until the work finishes; `Err` carries the failure.
    async fn wait(&self) -> Result<()>;

    /// Whether the work has finished successfully.
    fn complete(&self) -> bool;

    /// The failure message, if the work has failed.
    fn err(&self) -> Option<String>;
}

/// A unit of delegated work.
#[async_trait]
pub trait Runner: Send + Sync + fmt::Debug {
    /// The resource this runner produces.
    fn resource(&self) -> ResourceId;

    /// Whether this is a scheduled update job rather than a first build.
    fn is_update_job(&self) -> bool;

    /// Start the work and return its completion future.
    async fn run(&self) -> Result<Box<dyn CompletionWatcher>>;

    /// The cron-capable view of this runner, when it has one.
    fn as_cron(&self) -> Option<&dyn CronRunner> {
        None
    }
}

/// A runner that can install itself on a cron schedule.
#[async_trait]
pub trait CronRunner: Runner {
    /// Install the work on `schedule` (standard five-field cron).
    async fn schedule_job(&self, schedule: &str) -> Result<()>;
}

/// Watcher over a spawned task.
pub struct TaskCompletionWatcher {
    label: String,
    rx: watch::Receiver<WatcherState>,
}

impl TaskCompletionWatcher {
    /// Spawn `work` and expose its completion.
    pub fn spawn<F>(label: impl Into<String>, work: F) -> Self
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let (tx, rx) = watch::channel(WatcherState::Running);
        tokio::spawn(async move {
            let state = match work.await {
                Ok(()) => WatcherState::Succeeded,
                Err(err) => WatcherState::Failed(err.to_string()),
            };
            let _ = tx.send(state);
        });
        Self {
            label: label.into(),
            rx,
        }
    }

    fn state(&self) -> WatcherState {
        self.rx.borrow().clone()
    }
}

#[async_trait]
impl CompletionWatcher for TaskCompletionWatcher {
    async fn wait(&self) -> Result<()> {
        let mut rx = self.rx.clone();
        loop {
            let state = rx.borrow_and_update().clone();
            match state {
                WatcherState::Succeeded => return Ok(()),
                WatcherState::Failed(msg) => return Err(Error::Internal(msg)),
                WatcherState::Running => {}
            }
            if rx.changed().await.is_err() {
                return Err(Error::internal("runner task ended without reporting"));
            }
        }
    }

    fn complete(&self) -> bool {
        matches!(self.state(), WatcherState::Succeeded)
    }

    fn err(&self) -> Option<String> {
        match self.state() {
            WatcherState::Failed(msg) => Some(msg),
            _ => None,
        }
    }
}

impl fmt::Display for TaskCompletionWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state() {
            WatcherState::Running => write!(f, "{}: running", self.label),
            WatcherState::Succeeded => write!(f, "{}: complete", self.label),
            WatcherState::Failed(msg) => write!(f, "{}: failed: {}", self.label, msg),
        }
    }
}
