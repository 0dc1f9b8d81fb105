//! Authentication gate in front of the identity service.

mod identity;

pub use identity::{Credentials, StaticIdentity, TokenFileIdentity};

use std::sync::Arc;
use std::thread;

use skysync_types::AuthToken;

use crate::scheduler::{SyncTask, TaskSender};

/// Identity service collaborator. Implementations are called from worker
/// threads and may block.
pub trait IdentityProvider: Send + Sync {
    /// Validate the cached credentials with the identity service.
    /// Returns the empty token when they are missing or no longer valid.
    fn validate_auth(&self, interactive: bool) -> AuthToken;

    /// The current access token, without contacting the service.
    fn access_token(&self) -> AuthToken;
}

/// Runs token validation off the controlling thread and schedules the
/// continuation back onto it.
pub struct AuthGate {
    identity: Arc<dyn IdentityProvider>,
    tasks: TaskSender,
}

impl AuthGate {
    pub fn new(identity: Arc<dyn IdentityProvider>, tasks: TaskSender) -> Self {
        Self { identity, tasks }
    }

    pub fn identity(&self) -> Arc<dyn IdentityProvider> {
        self.identity.clone()
    }

    /// Validate the cached token on a worker thread. `on_result` receives the
    /// token (empty = not authenticated) and builds the task that the
    /// controlling thread runs on its next pump.
    pub fn ensure_authenticated<F>(&self, interactive: bool, on_result: F)
    where
        F: FnOnce(AuthToken) -> SyncTask + Send + 'static,
    {
        let identity = self.identity.clone();
        let tasks = self.tasks.clone();

        thread::spawn(move || {
            let token = identity.validate_auth(interactive);
            if token.is_empty() {
                log::info!(target: "auth", "no valid token (interactive={})", interactive);
            } else {
                log::debug!(target: "auth", "token validated");
            }
            tasks.call_after(on_result(token));
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{Project, ProjectStore};
    use crate::scheduler::TaskQueue;
    use std::time::{Duration, Instant};

    fn wait_for_task(queue: &TaskQueue) -> SyncTask {
        let start = Instant::now();
        while start.elapsed() < Duration::from_secs(5) {
            if let Some(task) = queue.try_next() {
                return task;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("no task scheduled");
    }

    #[test]
    fn valid_token_is_delivered_through_the_queue() {
        let mut store = ProjectStore::new();
        let id = store.insert(Project::new("demo"));
        let weak = store.get(id).unwrap().weak();

        let queue = TaskQueue::new();
        let gate = AuthGate::new(Arc::new(StaticIdentity::new("abc")), queue.sender());
        gate.ensure_authenticated(true, move |token| SyncTask::AuthResolved { project: weak, token });

        match wait_for_task(&queue) {
            SyncTask::AuthResolved { token, project } => {
                assert_eq!(token.as_str(), "abc");
                assert_eq!(project, weak);
            }
            other => panic!("unexpected task {:?}", other),
        }
    }

    #[test]
    fn missing_token_resolves_empty() {
        let mut store = ProjectStore::new();
        let id = store.insert(Project::new("demo"));
        let weak = store.get(id).unwrap().weak();

        let queue = TaskQueue::new();
        let gate = AuthGate::new(Arc::new(StaticIdentity::signed_out()), queue.sender());
        gate.ensure_authenticated(true, move |token| SyncTask::AuthResolved { project: weak, token });

        match wait_for_task(&queue) {
            SyncTask::AuthResolved { token, .. } => assert!(token.is_empty()),
            other => panic!("unexpected task {:?}", other),
        }
    }
}
