//! The thread that performs one snapshot's uploads.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use skysync_types::{AuthToken, BlockId, SnapshotId};

use super::{SnapshotPayload, SnapshotState, UpdateCallback, DRIVER_PANICKED};
use crate::auth::IdentityProvider;
use crate::config::ServiceConfig;
use crate::remote::{RemoteSession, RemoteStorage, SnapshotRequest};

pub(super) struct UploadDriver {
    id: SnapshotId,
    state: Arc<Mutex<SnapshotState>>,
    config: ServiceConfig,
    remote: Arc<dyn RemoteStorage>,
    identity: Arc<dyn IdentityProvider>,
    payload: SnapshotPayload,
    on_update: UpdateCallback,
}

impl UploadDriver {
    pub(super) fn new(
        id: SnapshotId,
        state: Arc<Mutex<SnapshotState>>,
        config: ServiceConfig,
        remote: Arc<dyn RemoteStorage>,
        identity: Arc<dyn IdentityProvider>,
        payload: SnapshotPayload,
        on_update: UpdateCallback,
    ) -> Self {
        Self {
            id,
            state,
            config,
            remote,
            identity,
            payload,
            on_update,
        }
    }

    pub(super) fn run(self) {
        log::info!(
            target: "snapshot",
            "{} started: '{}', {} blocks, blob {} bytes",
            self.id,
            self.payload.title,
            self.payload.blocks.len(),
            self.payload.blob.len()
        );

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.upload()))
            .unwrap_or_else(|_| Err(DRIVER_PANICKED.to_string()));
        if let Err(message) = outcome {
            log::warn!(target: "snapshot", "{} failed: {}", self.id, message);
            self.transition(|s| s.fail(message));
        }
    }

    /// Apply a transition and, if it was accepted, publish the new state.
    /// Only this thread writes, so published updates are ordered.
    fn transition(&self, f: impl FnOnce(&mut SnapshotState) -> bool) {
        let update = {
            let mut state = match self.state.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if !f(&mut state) {
                return;
            }
            state.update()
        };
        (self.on_update)(self.id, &update);
    }

    fn upload(&self) -> Result<(), String> {
        let token = self.identity.access_token();
        if token.is_empty() {
            return Err("not authorized".to_string());
        }

        let request = SnapshotRequest {
            title: self.payload.title.clone(),
            remote_project_id: self.payload.remote_project_id.clone(),
            blob_len: self.payload.blob.len() as u64,
            blocks: self.payload.blocks.iter().map(|(id, _)| *id).collect(),
        };
        let session = self
            .remote
            .begin_snapshot(&token, &request)
            .map_err(|e| format!("could not open snapshot: {}", e))?;

        let sent = panic::catch_unwind(AssertUnwindSafe(|| self.send(&token, &session)))
            .unwrap_or_else(|_| Err(DRIVER_PANICKED.to_string()));
        if sent.is_err() {
            match self.remote.abort_snapshot(&token, &session) {
                Ok(()) => log::debug!(
                    target: "snapshot",
                    "{} aborted remote session {}",
                    self.id,
                    session.snapshot_id
                ),
                Err(e) => {
                    log::warn!(target: "snapshot", "{} could not abort remote session: {}", self.id, e)
                }
            }
        }
        sent
    }

    /// Everything after the remote session is open.
    fn send(&self, token: &AuthToken, session: &RemoteSession) -> Result<(), String> {
        let total = session.missing_blocks.len() as u64;
        self.transition(|s| s.begin_upload(session.project_id.clone(), total));

        self.remote
            .upload_blob(token, session, &self.payload.blob)
            .map_err(|e| format!("project blob upload failed: {}", e))?;
        self.transition(|s| s.record_blob_uploaded());

        self.upload_blocks(token, session)?;

        self.remote
            .finish_snapshot(token, session)
            .map_err(|e| format!("could not seal snapshot: {}", e))?;

        let mut completed = false;
        self.transition(|s| {
            completed = s.complete();
            completed
        });
        if completed {
            log::info!(target: "snapshot", "{} completed ({} blocks uploaded)", self.id, total);
            Ok(())
        } else {
            Err("upload incomplete".to_string())
        }
    }

    /// Upload the blocks the remote asked for on a small worker pool.
    /// Workers only do I/O and report back; this thread does the counting.
    fn upload_blocks(&self, token: &AuthToken, session: &RemoteSession) -> Result<(), String> {
        if session.missing_blocks.is_empty() {
            return Ok(());
        }

        let available: HashMap<BlockId, &Arc<[u8]>> =
            self.payload.blocks.iter().map(|(id, data)| (*id, data)).collect();

        let (job_tx, job_rx) = crossbeam_channel::unbounded::<(BlockId, Arc<[u8]>)>();
        for block in &session.missing_blocks {
            match available.get(block) {
                Some(data) => {
                    let _ = job_tx.send((*block, Arc::clone(data)));
                }
                None => return Err(format!("remote requested unknown block {}", block)),
            }
        }
        drop(job_tx);

        let workers = self
            .config
            .upload_concurrency
            .clamp(1, session.missing_blocks.len());
        let (done_tx, done_rx) = crossbeam_channel::unbounded::<Result<BlockId, String>>();
        let failed = AtomicBool::new(false);
        let remote: &dyn RemoteStorage = &*self.remote;

        thread::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let done_tx = done_tx.clone();
                let failed = &failed;
                scope.spawn(move || {
                    for (block, data) in job_rx.iter() {
                        if failed.load(Ordering::Relaxed) {
                            break;
                        }
                        let result = remote
                            .upload_block(token, session, block, &data)
                            .map(|_| block)
                            .map_err(|e| format!("block {} upload failed: {}", block, e));
                        if result.is_err() {
                            failed.store(true, Ordering::Relaxed);
                        }
                        if done_tx.send(result).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(done_tx);

            let mut first_error = None;
            for result in done_rx.iter() {
                match result {
                    Ok(block) => {
                        log::trace!(target: "snapshot", "{} block {} uploaded", self.id, block);
                        self.transition(|s| s.record_block_uploaded());
                    }
                    Err(e) => {
                        first_error.get_or_insert(e);
                    }
                }
            }
            match first_error {
                Some(e) => Err(e),
                None => Ok(()),
            }
        })
    }
}
