//! Per-region control executors.
//!
//! Each executor owns an unbounded inbox drained by a single worker task, so
//! commands for one region run in submission order and never overlap, while
//! different regions proceed in parallel. One shared executor of the same
//! shape serializes the region-agnostic kinds among themselves.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::context::StoreContext;

/// One unit of control work, built from a region command and run to
/// completion on an executor worker.
#[async_trait]
pub trait ControlTask: Send {
    async fn run(self: Box<Self>, ctx: Arc<StoreContext>);
}

enum ExecutorMessage {
    Run(Box<dyn ControlTask>),
    Shutdown,
}

pub struct ControlExecutor {
    label: String,
    tx: mpsc::UnboundedSender<ExecutorMessage>,
    stopping: AtomicBool,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ControlExecutor {
    /// Spawn the worker and return the running executor.
    pub fn start(label: impl Into<String>, ctx: Arc<StoreContext>) -> Arc<Self> {
        let label = label.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<ExecutorMessage>();

        let worker_label = label.clone();
        let handle = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match message {
                    ExecutorMessage::Run(task) => task.run(ctx.clone()).await,
                    ExecutorMessage::Shutdown => break,
                }
            }
            tracing::debug!(executor = %worker_label, "control executor worker exited");
        });

        Arc::new(Self {
            label,
            tx,
            stopping: AtomicBool::new(false),
            worker: tokio::sync::Mutex::new(Some(handle)),
        })
    }

    /// Enqueue a task. Returns false once the executor is shutting down.
    pub fn execute(&self, task: Box<dyn ControlTask>) -> bool {
        if self.stopping.load(Ordering::Acquire) {
            tracing::warn!(executor = %self.label, "control executor is not available");
            return false;
        }
        self.tx.send(ExecutorMessage::Run(task)).is_ok()
    }

    /// Stop accepting work, let already-queued tasks finish, and join the
    /// worker.
    pub async fn stop(&self) {
        self.stopping.store(true, Ordering::Release);
        let _ = self.tx.send(ExecutorMessage::Shutdown);
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                tracing::error!(executor = %self.label, error = ?err, "control executor join failed");
            }
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use std::sync::Mutex;
    use std::time::Duration;

    struct OrderedTask {
        seq: usize,
        order: Arc<Mutex<Vec<usize>>>,
    }

    #[async_trait]
    impl ControlTask for OrderedTask {
        async fn run(self: Box<Self>, _ctx: Arc<StoreContext>) {
            // Yield a few times so overlap would be observable if it existed.
            for _ in 0..3 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            self.order.lock().unwrap().push(self.seq);
        }
    }

    #[tokio::test]
    async fn tasks_run_in_submission_order() {
        let fixture = testing::memory_fixture("executor-fifo");
        let executor = ControlExecutor::start("region-1", fixture.ctx.clone());
        let order = Arc::new(Mutex::new(Vec::new()));

        for seq in 0..8 {
            assert!(executor.execute(Box::new(OrderedTask {
                seq,
                order: order.clone(),
            })));
        }
        executor.stop().await;

        assert_eq!(*order.lock().unwrap(), (0..8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn stop_drains_the_queue_and_rejects_new_work() {
        let fixture = testing::memory_fixture("executor-stop");
        let executor = ControlExecutor::start("region-2", fixture.ctx.clone());
        let order = Arc::new(Mutex::new(Vec::new()));

        for seq in 0..4 {
            executor.execute(Box::new(OrderedTask {
                seq,
                order: order.clone(),
            }));
        }
        executor.stop().await;
        assert_eq!(order.lock().unwrap().len(), 4);

        assert!(!executor.execute(Box::new(OrderedTask {
            seq: 99,
            order: order.clone(),
        })));
    }
}
