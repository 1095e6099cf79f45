//! Storage seams for Rdbc records and derived secrets.
//!
//! The reconciler only talks to these traits. [`KubeStore`] backs them with the
//! Kubernetes API; `crate::testing::InMemoryStore` backs them in tests.
//!
//! Every write to an Rdbc carries the record's `resourceVersion`, so a write
//! based on a stale read fails with [`OperatorError::Conflict`] instead of
//! overwriting someone else's change.

use crate::crd::{Rdbc, RdbcStatus, RecordKey};
use crate::error::{OperatorError, OperatorResult};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, ResourceExt};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = OperatorResult<T>> + Send + 'a>>;

/// Access to Rdbc records.
pub trait RecordStore: Send + Sync {
    /// Load a record. `None` when it does not exist.
    fn get<'a>(&'a self, key: &'a RecordKey) -> StoreFuture<'a, Option<Rdbc>>;

    /// Replace metadata and spec, guarded by the record's resourceVersion.
    ///
    /// Status is not written by this call.
    fn replace<'a>(&'a self, record: &'a Rdbc) -> StoreFuture<'a, Rdbc>;

    /// Write the status subresource, guarded by the record's resourceVersion.
    fn patch_status<'a>(&'a self, record: &'a Rdbc, status: &'a RdbcStatus)
    -> StoreFuture<'a, Rdbc>;
}

/// Access to Secrets.
pub trait SecretStore: Send + Sync {
    /// Load a secret. `None` when it does not exist.
    fn get<'a>(&'a self, namespace: &'a str, name: &'a str) -> StoreFuture<'a, Option<Secret>>;

    /// Create a secret.
    fn create<'a>(&'a self, secret: &'a Secret) -> StoreFuture<'a, Secret>;

    /// Replace an existing secret.
    fn replace<'a>(&'a self, secret: &'a Secret) -> StoreFuture<'a, Secret>;
}

/// Kubernetes-backed store.
#[derive(Clone)]
pub struct KubeStore {
    client: kube::Client,
}

impl KubeStore {
    /// Create a store over the given client.
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn records(&self, namespace: &str) -> Api<Rdbc> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn namespace_of<K: ResourceExt>(resource: &K, kind: &str) -> OperatorResult<String> {
    resource
        .namespace()
        .ok_or_else(|| OperatorError::InvalidConfig(format!("{} must be namespaced", kind)))
}

/// Map a write error, turning 409 into [`OperatorError::Conflict`].
pub fn map_write_error(err: kube::Error, kind: &str, name: &str) -> OperatorError {
    match err {
        kube::Error::Api(ref resp) if resp.code == 409 => OperatorError::Conflict {
            kind: kind.to_string(),
            name: name.to_string(),
        },
        other => OperatorError::KubeError(other),
    }
}

/// Build a merge patch that writes `status` only if `resourceVersion` still matches.
///
/// Unset optional fields are sent as `null` so that stale values are cleared.
pub fn status_patch(
    resource_version: Option<&str>,
    status: &RdbcStatus,
) -> OperatorResult<serde_json::Value> {
    let mut status_value = serde_json::to_value(status)?;
    if let Some(fields) = status_value.as_object_mut() {
        for key in ["endpointUrl", "externalId", "message", "observedGeneration"] {
            fields
                .entry(key.to_string())
                .or_insert(serde_json::Value::Null);
        }
    }

    let mut patch = serde_json::json!({ "status": status_value });
    if let Some(rv) = resource_version {
        patch["metadata"] = serde_json::json!({ "resourceVersion": rv });
    }
    Ok(patch)
}

impl RecordStore for KubeStore {
    fn get<'a>(&'a self, key: &'a RecordKey) -> StoreFuture<'a, Option<Rdbc>> {
        Box::pin(async move { Ok(self.records(&key.namespace).get_opt(&key.name).await?) })
    }

    fn replace<'a>(&'a self, record: &'a Rdbc) -> StoreFuture<'a, Rdbc> {
        Box::pin(async move {
            let name = record.name_any();
            let namespace = namespace_of(record, "Rdbc")?;

            self.records(&namespace)
                .replace(&name, &PostParams::default(), record)
                .await
                .map_err(|e| map_write_error(e, "Rdbc", &name))
        })
    }

    fn patch_status<'a>(
        &'a self,
        record: &'a Rdbc,
        status: &'a RdbcStatus,
    ) -> StoreFuture<'a, Rdbc> {
        Box::pin(async move {
            let name = record.name_any();
            let namespace = namespace_of(record, "Rdbc")?;
            let patch = status_patch(record.resource_version().as_deref(), status)?;

            self.records(&namespace)
                .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
                .await
                .map_err(|e| map_write_error(e, "Rdbc", &name))
        })
    }
}

impl SecretStore for KubeStore {
    fn get<'a>(&'a self, namespace: &'a str, name: &'a str) -> StoreFuture<'a, Option<Secret>> {
        Box::pin(async move { Ok(self.secrets(namespace).get_opt(name).await?) })
    }

    fn create<'a>(&'a self, secret: &'a Secret) -> StoreFuture<'a, Secret> {
        Box::pin(async move {
            let name = secret.name_any();
            let namespace = namespace_of(secret, "Secret")?;

            self.secrets(&namespace)
                .create(&PostParams::default(), secret)
                .await
                .map_err(|e| map_write_error(e, "Secret", &name))
        })
    }

    fn replace<'a>(&'a self, secret: &'a Secret) -> StoreFuture<'a, Secret> {
        Box::pin(async move {
            let name = secret.name_any();
            let namespace = namespace_of(secret, "Secret")?;

            self.secrets(&namespace)
                .replace(&name, &PostParams::default(), secret)
                .await
                .map_err(|e| map_write_error(e, "Secret", &name))
        })
    }
}
