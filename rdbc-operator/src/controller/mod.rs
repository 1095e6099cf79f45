//! Kubernetes controller for Rdbc resources.
//!
//! - [`RdbcController`]: reconciles an Rdbc against the database cluster
//! - [`FinalizerManager`]: guards deletion until the database is gone
//! - [`CredentialProjector`]: publishes endpoint and password in a Secret
//!
//! # Usage with kube-runtime
//!
//! ```ignore
//! use rdbc_operator::controller::{RdbcController, error_policy};
//!
//! Controller::new(rdbcs, watcher_config)
//!     .run(|rdbc, ctx| async move {
//!         RdbcController::new(ctx.clone()).reconcile_object(rdbc).await
//!     }, error_policy, context)
//!     .for_each(|_| futures::future::ready(()))
//!     .await;
//! ```

mod credentials;
mod finalizer;
mod rdbc;

pub use credentials::{
    CREDENTIALS_ENDPOINT_KEY, CREDENTIALS_PASSWORD_KEY, CredentialProjector, MANAGED_BY_LABEL,
    MANAGED_BY_VALUE, Projection, RECORD_LABEL, UID_LABEL, build_credentials_secret,
    credentials_secret_name,
};
pub use finalizer::{Cleanup, FinalizerManager, Lifecycle};
pub use rdbc::{READY_MESSAGE, RdbcController, error_policy, generate_password};

use crate::remote::DatabaseApi;
use crate::store::{KubeStore, RecordStore, SecretStore};
use std::sync::Arc;

/// Shared context for the controller.
pub struct ControllerContext {
    /// Rdbc records.
    pub records: Arc<dyn RecordStore>,
    /// Derived secrets.
    pub secrets: Arc<dyn SecretStore>,
    /// Database cluster API.
    pub databases: Arc<dyn DatabaseApi>,
}

impl ControllerContext {
    /// Create a context backed by Kubernetes and the database REST API.
    pub fn new(client: kube::Client, databases: rdbc_client::Client) -> Self {
        let store = Arc::new(KubeStore::new(client));
        Self {
            records: store.clone(),
            secrets: store,
            databases: Arc::new(databases),
        }
    }

    /// Create a context from explicit collaborators.
    pub fn from_parts(
        records: Arc<dyn RecordStore>,
        secrets: Arc<dyn SecretStore>,
        databases: Arc<dyn DatabaseApi>,
    ) -> Self {
        Self {
            records,
            secrets,
            databases,
        }
    }
}

/// Result type for reconciliation actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Requeue after the specified duration.
    Requeue(std::time::Duration),
    /// Don't requeue (reconciliation complete).
    Done,
}

impl ReconcileAction {
    /// Requeue after 5 seconds (credentials just published).
    pub fn requeue_short() -> Self {
        Self::Requeue(std::time::Duration::from_secs(5))
    }

    /// Requeue after 30 seconds (default for retryable errors).
    pub fn requeue_medium() -> Self {
        Self::Requeue(std::time::Duration::from_secs(30))
    }

    /// Requeue after 5 minutes (periodic credential refresh).
    pub fn requeue_long() -> Self {
        Self::Requeue(std::time::Duration::from_secs(300))
    }
}

impl From<ReconcileAction> for kube::runtime::controller::Action {
    fn from(action: ReconcileAction) -> Self {
        match action {
            ReconcileAction::Requeue(duration) => Self::requeue(duration),
            ReconcileAction::Done => Self::await_change(),
        }
    }
}
