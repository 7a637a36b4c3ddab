//! Job correlator: maps a job id to the one consumer waiting on it.
//!
//! Each id holds a single callback slot; registering again replaces the
//! earlier callback. Resolving invokes the callback once and removes the
//! entry, so duplicate and late updates for the same id find nothing and are
//! dropped. Updates for ids this session never registered are expected
//! (other sessions share the push stream) and are dropped silently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use medflow_core::job::JobUpdate;
use medflow_core::types::JobId;
use tokio::sync::{oneshot, Mutex};

/// Consumer callback, invoked at most once with the job's terminal update.
pub type JobCallback = Box<dyn FnOnce(JobUpdate) + Send + 'static>;

/// Identifies one registration, so a timer armed for it cannot fire on a
/// later registration of the same job id.
pub type RegistrationId = u64;

struct Registration {
    id: RegistrationId,
    callback: JobCallback,
}

#[derive(Default)]
pub struct JobCorrelator {
    pending: Mutex<HashMap<JobId, Registration>>,
    next_id: AtomicU64,
}

impl JobCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in `job_id`. The last registration wins.
    pub async fn register(&self, job_id: JobId, callback: JobCallback) -> RegistrationId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let replaced = self
            .pending
            .lock()
            .await
            .insert(job_id.clone(), Registration { id, callback });
        if replaced.is_some() {
            tracing::debug!(job_id = %job_id, "Replaced earlier registration");
        }
        id
    }

    /// Register interest in `job_id` and receive the update on a oneshot.
    ///
    /// If the registration is later replaced or abandoned the receiver
    /// observes a closed channel.
    pub async fn subscribe(&self, job_id: JobId) -> oneshot::Receiver<JobUpdate> {
        self.subscribe_with_id(job_id).await.1
    }

    /// Like [`subscribe`](Self::subscribe), also returning the registration id.
    pub async fn subscribe_with_id(
        &self,
        job_id: JobId,
    ) -> (RegistrationId, oneshot::Receiver<JobUpdate>) {
        let (tx, rx) = oneshot::channel();
        let id = self
            .register(
                job_id,
                Box::new(move |update| {
                    let _ = tx.send(update);
                }),
            )
            .await;
        (id, rx)
    }

    /// Deliver `update` to the consumer registered for `job_id`.
    ///
    /// Returns `true` if a consumer was waiting. The callback runs after the
    /// entry is removed and outside the lock.
    pub async fn resolve(&self, job_id: &JobId, update: JobUpdate) -> bool {
        let registration = self.pending.lock().await.remove(job_id);
        deliver(job_id, registration, update)
    }

    /// Resolve `job_id` only if registration `id` is still the current one.
    pub async fn resolve_registration(
        &self,
        job_id: &JobId,
        id: RegistrationId,
        update: JobUpdate,
    ) -> bool {
        let registration = {
            let mut pending = self.pending.lock().await;
            match pending.get(job_id) {
                Some(current) if current.id == id => pending.remove(job_id),
                _ => None,
            }
        };
        deliver(job_id, registration, update)
    }

    /// Whether registration `id` is still waiting on `job_id`.
    pub async fn is_registered(&self, job_id: &JobId, id: RegistrationId) -> bool {
        self.pending
            .lock()
            .await
            .get(job_id)
            .is_some_and(|current| current.id == id)
    }

    /// Fail the current registration of `job_id` locally if it is still
    /// waiting after `after`.
    ///
    /// Returns `None` if nothing is registered. The timer is bound to the
    /// registration present now, so re-registering disarms it. A result that
    /// arrives first wins and the timeout becomes a no-op.
    pub async fn timeout(
        self: &Arc<Self>,
        job_id: JobId,
        after: Duration,
    ) -> Option<tokio::task::JoinHandle<()>> {
        let id = self.pending.lock().await.get(&job_id)?.id;
        let correlator = Arc::clone(self);
        Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            correlator.expire(&job_id, id, after).await;
        }))
    }

    /// Resolve registration `id` with a timeout failure. Returns `true` if
    /// it was still waiting.
    pub async fn expire(&self, job_id: &JobId, id: RegistrationId, after: Duration) -> bool {
        let expired = self
            .resolve_registration(job_id, id, timeout_update(after))
            .await;
        if expired {
            tracing::warn!(
                job_id = %job_id,
                timeout_ms = after.as_millis() as u64,
                "Job timed out",
            );
        }
        expired
    }

    /// Drop interest in `job_id` without invoking anything.
    pub async fn abandon(&self, job_id: &JobId) -> bool {
        let removed = self.pending.lock().await.remove(job_id).is_some();
        if removed {
            tracing::debug!(job_id = %job_id, "Abandoned pending job");
        }
        removed
    }

    pub async fn is_pending(&self, job_id: &JobId) -> bool {
        self.pending.lock().await.contains_key(job_id)
    }

    pub async fn pending_ids(&self) -> Vec<JobId> {
        self.pending.lock().await.keys().cloned().collect()
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Abandon every pending job. Returns how many were dropped.
    pub async fn clear(&self) -> usize {
        let mut pending = self.pending.lock().await;
        let count = pending.len();
        pending.clear();
        count
    }
}

fn deliver(job_id: &JobId, registration: Option<Registration>, update: JobUpdate) -> bool {
    match registration {
        Some(registration) => {
            tracing::debug!(job_id = %job_id, success = update.is_success(), "Resolving job");
            (registration.callback)(update);
            true
        }
        None => {
            tracing::debug!(job_id = %job_id, "No pending registration, dropping update");
            false
        }
    }
}

/// The failure synthesised when no result arrives in time.
pub fn timeout_update(after: Duration) -> JobUpdate {
    let window = if after.subsec_millis() == 0 && after.as_secs() > 0 {
        format!("{} seconds", after.as_secs())
    } else {
        format!("{} ms", after.as_millis())
    };
    JobUpdate::failed(format!("No result received within {window}"))
}
