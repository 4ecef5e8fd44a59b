//! Task executor: one dedicated worker thread that performs every host
//! mutation, so producers never block on host calls and the host never sees
//! two mutations at once.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info};

use crate::error::InstallerError;
use crate::task::{Task, TaskContext, TaskOutcome};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Outcome of one batch, in execution order.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub results: Vec<(Task, TaskOutcome)>,
}

impl BatchReport {
    /// The tasks that asked to be run again in a later cycle.
    pub fn remaining(&self) -> Vec<Task> {
        self.results
            .iter()
            .filter(|(_, outcome)| matches!(outcome, TaskOutcome::RetryLater(_)))
            .map(|(task, _)| task.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

pub struct TaskExecutor {
    batch_sender: Option<Sender<Vec<Task>>>,
    report_receiver: Receiver<BatchReport>,
    worker: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl TaskExecutor {
    pub fn new(ctx: TaskContext) -> Result<Self, InstallerError> {
        let (batch_sender, batch_receiver) = bounded::<Vec<Task>>(1);
        let (report_sender, report_receiver) = bounded::<BatchReport>(1);
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_flag = Arc::clone(&shutdown);

        let worker = thread::Builder::new()
            .name("installer-executor".to_string())
            .spawn(move || run_worker(ctx, batch_receiver, report_sender, shutdown_flag))
            .map_err(|source| InstallerError::SpawnFailed {
                name: "installer-executor".to_string(),
                source,
            })?;

        debug!("Task executor started");

        Ok(Self {
            batch_sender: Some(batch_sender),
            report_receiver,
            worker: Some(worker),
            shutdown,
        })
    }

    /// Runs `tasks` in ascending sort key order on the worker and waits for
    /// the whole batch. A failing or panicking task never stops the rest.
    pub fn execute_batch(&self, mut tasks: Vec<Task>) -> Result<BatchReport, InstallerError> {
        if tasks.is_empty() {
            return Ok(BatchReport::default());
        }
        if self.is_shutdown() {
            return Err(InstallerError::ExecutorClosed);
        }
        tasks.sort_by(|a, b| a.sort_key().cmp(b.sort_key()));

        let sender = self
            .batch_sender
            .as_ref()
            .ok_or(InstallerError::ExecutorClosed)?;
        sender
            .send(tasks)
            .map_err(|_| InstallerError::ExecutorClosed)?;
        self.report_receiver
            .recv()
            .map_err(|_| InstallerError::ExecutorClosed)
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Stops the worker after the batch in flight, if any, has finished.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        drop(self.batch_sender.take());

        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.join() {
                error!("Task executor panicked: {:?}", e);
            } else {
                debug!("Task executor stopped");
            }
        }
    }
}

impl Drop for TaskExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(
    ctx: TaskContext,
    batch_receiver: Receiver<Vec<Task>>,
    report_sender: Sender<BatchReport>,
    shutdown: Arc<AtomicBool>,
) {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        match batch_receiver.recv_timeout(POLL_INTERVAL) {
            Ok(batch) => {
                let report = run_batch(&ctx, batch);
                if let Err(e) = report_sender.send(report) {
                    error!("Task executor failed to send report: {}", e);
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn run_batch(ctx: &TaskContext, batch: Vec<Task>) -> BatchReport {
    debug!("Executing batch of {} task(s)", batch.len());
    let mut report = BatchReport {
        results: Vec::with_capacity(batch.len()),
    };

    for task in batch {
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| task.execute(ctx))) {
            Ok(outcome) => outcome,
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                TaskOutcome::Failed(format!("task panicked: {}", reason))
            }
        };
        match &outcome {
            TaskOutcome::Done => info!("{} done", task),
            TaskOutcome::RetryLater(reason) => info!("{} deferred: {}", task, reason),
            TaskOutcome::Failed(reason) => error!("{} failed: {}", task, reason),
        }
        report.results.push((task, outcome));
    }

    report
}
