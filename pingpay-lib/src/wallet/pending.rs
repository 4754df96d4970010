//! Outstanding signature requests that the caller may withdraw.

use crate::TransactionId;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::watch;

/// Table of in-flight requests keyed by transaction id.
#[derive(Debug, Default)]
pub(crate) struct PendingRequests {
    inner: Mutex<HashMap<TransactionId, watch::Sender<bool>>>,
}

impl PendingRequests {
    /// Track a request until the returned guard is dropped.
    pub(crate) fn open(&self, id: TransactionId) -> PendingRequest<'_> {
        let (tx, rx) = watch::channel(false);
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.insert(id.clone(), tx);
        PendingRequest {
            owner: self,
            id,
            rx,
        }
    }

    /// Mark a request withdrawn. Returns false if it is not outstanding.
    pub(crate) fn withdraw(&self, id: &TransactionId) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.get(id) {
            Some(tx) => {
                tx.send_replace(true);
                true
            }
            None => false,
        }
    }

    /// Number of outstanding requests.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Guard for one outstanding request.
pub(crate) struct PendingRequest<'a> {
    owner: &'a PendingRequests,
    id: TransactionId,
    rx: watch::Receiver<bool>,
}

impl PendingRequest<'_> {
    /// Resolves once the request is withdrawn.
    pub(crate) async fn withdrawn(&mut self) {
        if self.rx.wait_for(|withdrawn| *withdrawn).await.is_ok() {
            return;
        }
        std::future::pending::<()>().await
    }

    /// Whether the request was withdrawn already.
    #[cfg(any(test, feature = "test-utils"))]
    pub(crate) fn is_withdrawn(&self) -> bool {
        *self.rx.borrow()
    }
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        let mut inner = self.owner.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_withdraw_wakes_the_request() {
        let pending = PendingRequests::default();
        let id = TransactionId::from_hash([7; 32]);

        let mut request = pending.open(id.clone());
        assert!(!request.is_withdrawn());
        assert!(pending.withdraw(&id));
        request.withdrawn().await;
        assert!(request.is_withdrawn());

        drop(request);
        assert_eq!(pending.len(), 0);
        assert!(!pending.withdraw(&id));
    }
}
