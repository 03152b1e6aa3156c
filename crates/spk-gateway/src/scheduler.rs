//! Delayed task scheduling
//!
//! Timers are abortable tasks. Cancelling a timer that already fired, or was
//! already cancelled, does nothing.

use futures::future::BoxFuture;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Runs a task once after a delay
pub trait Scheduler: Send + Sync {
    fn schedule(&self, delay: Duration, task: BoxFuture<'static, ()>) -> TimerHandle;
}

/// Handle to one scheduled task
#[derive(Debug)]
pub struct TimerHandle {
    inner: JoinHandle<()>,
}

impl TimerHandle {
    pub fn new(inner: JoinHandle<()>) -> Self {
        Self { inner }
    }

    /// Prevent the task from running. Idempotent.
    pub fn cancel(&self) {
        self.inner.abort();
    }

    /// True once the task ran or was cancelled
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}

/// Scheduler backed by the ambient tokio runtime.
///
/// Must be used from within a runtime; current-thread and multi-thread
/// runtimes behave the same.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: BoxFuture<'static, ()>) -> TimerHandle {
        TimerHandle::new(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        }))
    }
}
