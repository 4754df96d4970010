//! Routes signature requests to the backend the subscriber picked.

use super::WalletSigningGateway;
use crate::{
    PingPayError, Result, TransactionId, TransactionOutcome, UnsignedAuthorizationTransaction,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

/// Registry of wallet backends, itself usable as a gateway.
///
/// The first registered backend becomes the selection until
/// [`select`](Self::select) says otherwise. A cancel goes to the backend
/// that received the request, even if the selection changed since.
#[derive(Default)]
pub struct WalletSelector {
    backends: RwLock<HashMap<String, Arc<dyn WalletSigningGateway>>>,
    selected: RwLock<Option<String>>,
    routes: Mutex<HashMap<TransactionId, Arc<dyn WalletSigningGateway>>>,
}

/// Forgets a route once its request settles or is dropped.
struct Route<'a> {
    routes: &'a Mutex<HashMap<TransactionId, Arc<dyn WalletSigningGateway>>>,
    id: TransactionId,
}

impl Drop for Route<'_> {
    fn drop(&mut self) {
        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        routes.remove(&self.id);
    }
}

impl WalletSelector {
    /// Creates an empty selector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a backend under its [`backend_id`](WalletSigningGateway::backend_id).
    ///
    /// A backend with the same id is replaced.
    pub fn register(&self, backend: Arc<dyn WalletSigningGateway>) {
        let id = backend.backend_id().to_string();
        {
            let mut backends = self.backends.write().unwrap_or_else(|e| e.into_inner());
            backends.insert(id.clone(), backend);
        }
        let mut selected = self.selected.write().unwrap_or_else(|e| e.into_inner());
        if selected.is_none() {
            *selected = Some(id);
        }
    }

    /// Removes a backend, clearing the selection if it pointed there.
    pub fn unregister(&self, id: &str) -> Option<Arc<dyn WalletSigningGateway>> {
        let removed = {
            let mut backends = self.backends.write().unwrap_or_else(|e| e.into_inner());
            backends.remove(id)
        };
        let mut selected = self.selected.write().unwrap_or_else(|e| e.into_inner());
        if selected.as_deref() == Some(id) {
            *selected = None;
        }
        removed
    }

    /// Makes `id` the active backend.
    pub fn select(&self, id: &str) -> Result<()> {
        let backends = self.backends.read().unwrap_or_else(|e| e.into_inner());
        if !backends.contains_key(id) {
            return Err(PingPayError::not_found("wallet backend", id));
        }
        let mut selected = self.selected.write().unwrap_or_else(|e| e.into_inner());
        *selected = Some(id.to_string());
        Ok(())
    }

    /// Id of the active backend.
    pub fn selected(&self) -> Option<String> {
        self.selected
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Ids of all registered backends, sorted.
    pub fn available(&self) -> Vec<String> {
        let backends = self.backends.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = backends.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn active(&self) -> Result<Arc<dyn WalletSigningGateway>> {
        let id = self
            .selected()
            .ok_or_else(|| PingPayError::not_found("wallet backend", "<none selected>"))?;
        let backends = self.backends.read().unwrap_or_else(|e| e.into_inner());
        backends
            .get(&id)
            .cloned()
            .ok_or_else(|| PingPayError::not_found("wallet backend", id))
    }
}

#[async_trait]
impl WalletSigningGateway for WalletSelector {
    fn backend_id(&self) -> &str {
        "selector"
    }

    async fn request_signature(
        &self,
        tx: UnsignedAuthorizationTransaction,
    ) -> Result<TransactionOutcome> {
        let backend = self.active()?;
        let id = tx.transaction_id()?;
        #[cfg(feature = "tracing")]
        tracing::debug!(backend = backend.backend_id(), transaction_id = %id, "routing signature request");

        self.routes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), backend.clone());
        let _route = Route {
            routes: &self.routes,
            id,
        };
        backend.request_signature(tx).await
    }

    async fn cancel_signature(&self, transaction_id: &TransactionId) -> Result<()> {
        let routed = self
            .routes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(transaction_id)
            .cloned();
        let backend = match routed {
            Some(backend) => backend,
            None => self.active()?,
        };
        backend.cancel_signature(transaction_id).await
    }
}
