//! Pending RPC bookkeeping for one peer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rtcmesh_core::{CorrelationId, MeshError, Result};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

type PendingMap = Arc<Mutex<HashMap<CorrelationId, oneshot::Sender<Result<Value>>>>>;

/// Maps outstanding request ids to the caller waiting on them.
#[derive(Clone, Default)]
pub struct CorrelationRegistry {
    pending: PendingMap,
}

/// One registered request. Await [`PendingRequest::wait`] for its outcome.
pub struct PendingRequest {
    id: CorrelationId,
    deadline: Instant,
    rx: oneshot::Receiver<Result<Value>>,
    pending: PendingMap,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` with a deadline `timeout` from now.
    pub fn register(&self, id: CorrelationId, timeout: Duration) -> PendingRequest {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id.clone(), tx);
        PendingRequest {
            id,
            deadline: Instant::now() + timeout,
            rx,
            pending: Arc::clone(&self.pending),
        }
    }

    /// Complete `id` with `payload`. Returns false if nothing was waiting,
    /// e.g. the request already timed out or was answered.
    pub fn resolve(&self, id: &CorrelationId, payload: Value) -> bool {
        match self.pending.lock().remove(id) {
            Some(tx) => tx.send(Ok(payload)).is_ok(),
            None => false,
        }
    }

    /// Forget `id` without completing it.
    pub fn cancel(&self, id: &CorrelationId) {
        self.pending.lock().remove(id);
    }

    /// Fail every outstanding request with `err`.
    pub fn reject_all(&self, err: &MeshError) -> usize {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        let count = drained.len();
        for (id, tx) in drained {
            debug!(id = %id, "rejecting pending request");
            let _ = tx.send(Err(err.clone()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

impl PendingRequest {
    pub fn id(&self) -> &CorrelationId {
        &self.id
    }

    /// Wait for the response, the deadline, or rejection, whichever comes first.
    ///
    /// The registry entry is removed when this request is dropped, so a
    /// caller that stops waiting early leaves nothing behind.
    pub async fn wait(mut self) -> Result<Value> {
        match tokio::time::timeout_at(self.deadline, &mut self.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(MeshError::destroyed(format!(
                "request {} was abandoned",
                self.id
            ))),
            Err(_) => Err(MeshError::timeout("Request timed out")),
        }
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtcmesh_core::ErrorKind;
    use serde_json::json;

    #[tokio::test]
    async fn resolves_once() {
        let registry = CorrelationRegistry::new();
        let id = CorrelationId::new();
        let pending = registry.register(id.clone(), Duration::from_secs(10));

        assert!(registry.resolve(&id, json!("pong")));
        assert!(!registry.resolve(&id, json!("again")));
        assert_eq!(pending.wait().await.unwrap(), json!("pong"));
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_and_clears_entry() {
        let registry = CorrelationRegistry::new();
        let id = CorrelationId::new();
        let pending = registry.register(id.clone(), Duration::from_millis(250));

        let started = Instant::now();
        let err = pending.wait().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RequestTimeout);
        assert!(started.elapsed() >= Duration::from_millis(250));
        assert!(registry.is_empty());
        assert!(!registry.resolve(&id, json!(null)));
    }

    #[tokio::test]
    async fn reject_all_fails_waiters() {
        let registry = CorrelationRegistry::new();
        let a = registry.register(CorrelationId::new(), Duration::from_secs(10));
        let b = registry.register(CorrelationId::new(), Duration::from_secs(10));

        assert_eq!(registry.reject_all(&MeshError::destroyed("peer closed")), 2);
        assert_eq!(a.wait().await.unwrap_err().kind(), ErrorKind::OperationAfterDestroy);
        assert_eq!(b.wait().await.unwrap_err().kind(), ErrorKind::OperationAfterDestroy);
    }

    #[tokio::test]
    async fn dropped_request_leaves_no_entry() {
        let registry = CorrelationRegistry::new();
        let id = CorrelationId::new();
        let pending = registry.register(id.clone(), Duration::from_secs(10));
        assert_eq!(registry.len(), 1);

        drop(pending);
        assert!(registry.is_empty());
        assert!(!registry.resolve(&id, json!("late")));
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_wait_clears_entry() {
        let registry = CorrelationRegistry::new();
        let pending = registry.register(CorrelationId::new(), Duration::from_secs(10));

        let outcome = tokio::time::timeout(Duration::from_millis(50), pending.wait()).await;
        assert!(outcome.is_err());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn cancelled_request_reports_abandoned() {
        let registry = CorrelationRegistry::new();
        let id = CorrelationId::new();
        let pending = registry.register(id.clone(), Duration::from_secs(10));
        registry.cancel(&id);
        assert_eq!(registry.len(), 0);
        assert_eq!(pending.wait().await.unwrap_err().kind(), ErrorKind::OperationAfterDestroy);
    }
}
