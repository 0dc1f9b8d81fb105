//! Mailbox of the controlling thread.
//!
//! Worker threads never touch projects or the snapshot set directly. They post
//! a [`SyncTask`] and the controlling thread runs it on its next pump.

use crossbeam_channel::{Receiver, Sender, TryRecvError};

use skysync_types::{AuthToken, SnapshotId};

use crate::project::WeakProject;

/// Continuations scheduled back onto the controlling thread.
#[derive(Debug)]
pub enum SyncTask {
    /// Token validation finished (empty token = not authorized).
    AuthResolved { project: WeakProject, token: AuthToken },
    /// Ask the user whether to authorize and retry.
    UnauthorizedPrompt { project: WeakProject },
    /// A snapshot reached its terminal state; sweep the active set.
    SnapshotFinished { snapshot: SnapshotId },
}

/// Cloneable handle workers use to schedule tasks.
#[derive(Clone)]
pub struct TaskSender {
    tx: Sender<SyncTask>,
}

impl TaskSender {
    pub fn call_after(&self, task: SyncTask) {
        if let Err(e) = self.tx.send(task) {
            log::warn!(target: "cloud", "task dropped, controlling thread gone: {:?}", e.0);
        }
    }
}

pub struct TaskQueue {
    tx: Sender<SyncTask>,
    rx: Receiver<SyncTask>,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    pub fn sender(&self) -> TaskSender {
        TaskSender { tx: self.tx.clone() }
    }

    /// Next scheduled task, if any. Never blocks.
    pub fn try_next(&self) -> Option<SyncTask> {
        match self.rx.try_recv() {
            Ok(task) => Some(task),
            // we hold a sender ourselves, so Disconnected cannot happen
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{Project, ProjectStore};

    #[test]
    fn tasks_arrive_in_send_order() {
        let mut store = ProjectStore::new();
        let id = store.insert(Project::new("demo"));
        let weak = store.get(id).unwrap().weak();

        let queue = TaskQueue::new();
        let sender = queue.sender();
        let handle = std::thread::spawn(move || {
            sender.call_after(SyncTask::UnauthorizedPrompt { project: weak });
            sender.call_after(SyncTask::AuthResolved {
                project: weak,
                token: AuthToken::new("t"),
            });
        });
        handle.join().unwrap();

        assert!(matches!(queue.try_next(), Some(SyncTask::UnauthorizedPrompt { .. })));
        assert!(matches!(queue.try_next(), Some(SyncTask::AuthResolved { .. })));
        assert!(queue.try_next().is_none());
        assert!(queue.is_empty());
    }
}
