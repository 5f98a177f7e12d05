use std::future::Future;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{debug, info};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct TaskEntry {
    run_id: Uuid,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Registry enforcing at most one live generation task per conversation.
///
/// The map entry is the only cross-task shared mutable state: all updates go
/// through per-key entry locks, so superseding a task for one conversation
/// never serializes against traffic for another.
#[derive(Default)]
pub struct TaskManager {
    tasks: DashMap<i64, TaskEntry>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers and spawns a new generation task for the conversation,
    /// cancelling any live predecessor first. The predecessor's token is
    /// cancelled before the new future is spawned, so the old task can never
    /// interleave output after the new one starts.
    pub fn start<F, Fut>(&self, chat_id: i64, make_task: F) -> Uuid
    where
        F: FnOnce(CancellationToken, Uuid) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let run_id = Uuid::new_v4();
        let token = CancellationToken::new();
        let task = make_task(token.clone(), run_id);

        match self.tasks.entry(chat_id) {
            Entry::Occupied(mut slot) => {
                let prev = slot.get();
                info!(
                    "superseding task {} for chat {chat_id} with {run_id}",
                    prev.run_id
                );
                prev.token.cancel();
                slot.insert(TaskEntry {
                    run_id,
                    token,
                    handle: tokio::spawn(task),
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(TaskEntry {
                    run_id,
                    token,
                    handle: tokio::spawn(task),
                });
            }
        }
        run_id
    }

    /// Cancels the conversation's live task, reporting whether there was one
    /// still running to stop.
    pub fn stop(&self, chat_id: i64) -> bool {
        match self.tasks.remove(&chat_id) {
            Some((_, entry)) => {
                entry.token.cancel();
                let was_live = !entry.handle.is_finished();
                info!(
                    "stop for chat {chat_id}: task {} {}",
                    entry.run_id,
                    if was_live { "cancelled" } else { "already finished" }
                );
                was_live
            }
            None => {
                debug!("stop for chat {chat_id}: nothing to stop");
                false
            }
        }
    }

    /// Deregisters a finished task. Guarded by run id so a slow old task
    /// cannot evict the registration of the task that superseded it.
    pub fn finish(&self, chat_id: i64, run_id: Uuid) {
        self.tasks.remove_if(&chat_id, |_, entry| entry.run_id == run_id);
    }

    pub fn has_live_task(&self, chat_id: i64) -> bool {
        self.tasks
            .get(&chat_id)
            .map(|entry| !entry.handle.is_finished())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Notify;

    #[tokio::test(start_paused = true)]
    async fn test_start_cancels_predecessor_before_spawning_successor() {
        let manager = Arc::new(TaskManager::new());
        let first_token: Arc<std::sync::Mutex<Option<CancellationToken>>> = Default::default();

        let slot = first_token.clone();
        manager.start(7, move |token, _| {
            *slot.lock().unwrap() = Some(token.clone());
            async move {
                token.cancelled().await;
            }
        });

        let observed = Arc::new(std::sync::Mutex::new(None));
        let observed_in_task = observed.clone();
        let done = Arc::new(Notify::new());
        let done_in_task = done.clone();
        let first = first_token.lock().unwrap().clone().unwrap();
        manager.start(7, move |_, _| async move {
            // First thing the successor does: the predecessor's token must
            // already be cancelled before this task got spawned.
            *observed_in_task.lock().unwrap() = Some(first.is_cancelled());
            done_in_task.notify_one();
        });

        done.notified().await;
        assert_eq!(*observed.lock().unwrap(), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_reports_live_then_nothing() {
        let manager = Arc::new(TaskManager::new());
        manager.start(3, |token, _| async move {
            token.cancelled().await;
        });

        assert!(manager.stop(3));
        assert!(!manager.stop(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_task_cleans_up_its_registration() {
        let manager = Arc::new(TaskManager::new());
        let done = Arc::new(Notify::new());

        let m = manager.clone();
        let signal = done.clone();
        let run_id = manager.start(11, move |_, run_id| async move {
            m.finish(11, run_id);
            signal.notify_one();
        });

        done.notified().await;
        assert!(!manager.has_live_task(11));
        // Redundant finish calls are harmless.
        manager.finish(11, run_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_finish_does_not_evict_successor() {
        let manager = Arc::new(TaskManager::new());
        let old_run = manager.start(5, |token, _| async move {
            token.cancelled().await;
        });
        manager.start(5, |token, _| async move {
            token.cancelled().await;
        });

        // The superseded task reporting in late must not deregister the
        // successor.
        manager.finish(5, old_run);
        assert!(manager.has_live_task(5));
    }
}
