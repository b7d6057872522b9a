use std::future::Future;

use parking_lot::Mutex;
use tokio::task::JoinSet;
use tracing::debug;

#[derive(Debug, Default)]
struct Tasks {
    set: JoinSet<()>,
    closed: bool,
}

/// Background tasks owned by one transport
#[derive(Debug, Default)]
pub struct WorkerSet {
    tasks: Mutex<Tasks>,
}

impl WorkerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `task` unless the set was shut down, in which case it is dropped unrun
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock();
        if tasks.closed {
            debug!("Worker set shut down, dropping task");
            return;
        }
        // reap finished tasks so the set tracks live work only
        while tasks.set.try_join_next().is_some() {}
        tasks.set.spawn(task);
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_shut_down(&self) -> bool {
        self.tasks.lock().closed
    }

    /// Refuses new work, then aborts every remaining task and waits for them to unwind
    pub async fn shutdown(&self) {
        let mut set = {
            let mut tasks = self.tasks.lock();
            tasks.closed = true;
            std::mem::take(&mut tasks.set)
        };
        set.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_shutdown_aborts_pending_tasks() {
        let workers = WorkerSet::new();
        workers.spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        assert_eq!(workers.len(), 1);

        workers.shutdown().await;
        assert!(workers.is_empty());
        assert!(workers.is_shut_down());
    }

    #[tokio::test]
    async fn test_tasks_spawned_during_shutdown_never_run() {
        let workers = Arc::new(WorkerSet::new());
        let ran = Arc::new(AtomicBool::new(false));

        // a task that keeps spawning follow-up work while it is being aborted
        let spawner = workers.clone();
        let flag = ran.clone();
        workers.spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let flag = flag.clone();
            spawner.spawn(async move {
                flag.store(true, Ordering::SeqCst);
            });
        });

        workers.shutdown().await;
        workers.spawn({
            let ran = ran.clone();
            async move { ran.store(true, Ordering::SeqCst) }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!ran.load(Ordering::SeqCst));
        assert!(workers.is_empty());
    }
}
