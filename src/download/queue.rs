use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::{Semaphore, watch};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DownloadTask {
    File(String),
    Stop,
}

/// FIFO shared by the coordinator and its workers.
///
/// Every task put on the queue must be handed back through [`task_done`]
/// once it has been dealt with; [`join`] resolves when nothing is left
/// outstanding.
///
/// [`task_done`]: DownloadQueue::task_done
/// [`join`]: DownloadQueue::join
pub struct DownloadQueue {
    items: Mutex<VecDeque<DownloadTask>>,
    available: Semaphore,
    unfinished: watch::Sender<usize>,
}

impl Default for DownloadQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadQueue {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Semaphore::new(0),
            unfinished: watch::Sender::new(0),
        }
    }

    pub fn put(&self, task: DownloadTask) {
        self.unfinished.send_modify(|n| *n += 1);
        self.lock().push_back(task);
        self.available.add_permits(1);
    }

    /// Wait for the next task.
    pub async fn get(&self) -> DownloadTask {
        loop {
            // The semaphore is never closed.
            if let Ok(permit) = self.available.acquire().await {
                permit.forget();
            }
            // Permits can outnumber items after `discard_pending`.
            if let Some(task) = self.lock().pop_front() {
                return task;
            }
        }
    }

    /// Mark one previously fetched task as dealt with.
    pub fn task_done(&self) {
        self.unfinished.send_modify(|n| *n = n.saturating_sub(1));
    }

    /// Wait until every task put so far has been marked done.
    pub async fn join(&self) {
        let mut rx = self.unfinished.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Drop queued file tasks that no worker has picked up yet, counting them
    /// as done. Returns how many were dropped.
    pub fn discard_pending(&self) -> usize {
        let mut items = self.lock();
        let before = items.len();
        items.retain(|task| matches!(task, DownloadTask::Stop));
        let dropped = before - items.len();
        drop(items);
        if dropped > 0 {
            self.unfinished.send_modify(|n| *n = n.saturating_sub(dropped));
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn unfinished(&self) -> usize {
        *self.unfinished.borrow()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<DownloadTask>> {
        // A poisoned queue still holds valid tasks.
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
