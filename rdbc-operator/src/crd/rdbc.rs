//! Rdbc Custom Resource Definition.
//!
//! Declares a Redis database that should exist on the Redis Enterprise cluster.

use crate::error::{OperatorError, OperatorResult};
use kube::{CustomResource, ResourceExt};
use rdbc_client::DatabaseUid;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Annotation holding the uid of the bound database.
///
/// This is the canonical record of the external identity. Setting it by hand
/// before the first reconcile adopts an existing database.
pub const DATABASE_UID_ANNOTATION: &str = "rdbc.io/database-uid";

/// Annotation holding the display name persisted with the uid.
pub const DATABASE_NAME_ANNOTATION: &str = "rdbc.io/database-name";

/// Annotation holding the size persisted with the uid.
pub const SIZE_MEGABYTES_ANNOTATION: &str = "rdbc.io/size-megabytes";

/// Finalizer guarding deletion until the database is removed.
pub const DATABASE_FINALIZER: &str = "rdbc.io/database-cleanup";

/// Rdbc is the Schema for the rdbcs API.
///
/// An Rdbc claims a Redis database of a given size. The operator creates (or
/// adopts) the database, publishes its endpoint and password in a Secret named
/// `<name>-redis-credentials`, and deletes the database when the Rdbc is
/// deleted.
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "rdbc.io",
    version = "v1alpha1",
    kind = "Rdbc",
    plural = "rdbcs",
    shortname = "rdbc",
    namespaced,
    status = "RdbcStatus",
    printcolumn = r#"{"name":"Size", "type":"integer", "jsonPath":".spec.sizeMegabytes"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Endpoint", "type":"string", "jsonPath":".status.endpointUrl"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RdbcSpec {
    /// Database name shown on the Redis Enterprise cluster.
    pub display_name: String,

    /// Memory limit in megabytes.
    #[schemars(range(min = 1))]
    pub size_megabytes: u32,

    /// Password for the database. Generated when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Rdbc status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RdbcStatus {
    /// Current phase.
    #[serde(default)]
    pub phase: RdbcPhase,

    /// Database endpoint (`host:port`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,

    /// Uid of the bound database. Mirrors the `rdbc.io/database-uid` annotation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<u32>,

    /// Latest error text, or `ready`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Generation last reconciled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Rdbc phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum RdbcPhase {
    /// No database bound yet.
    #[default]
    New,
    /// Database creation in flight.
    Provisioning,
    /// Database exists and its credentials are published.
    Bound,
    /// Database is being deleted.
    Deleting,
}

impl fmt::Display for RdbcPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RdbcPhase::New => "New",
            RdbcPhase::Provisioning => "Provisioning",
            RdbcPhase::Bound => "Bound",
            RdbcPhase::Deleting => "Deleting",
        };
        f.write_str(s)
    }
}

/// Namespace and name of an Rdbc.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    /// Namespace.
    pub namespace: String,
    /// Name.
    pub name: String,
}

impl RecordKey {
    /// Create a key.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl Rdbc {
    /// Namespace and name of this record.
    pub fn record_key(&self) -> OperatorResult<RecordKey> {
        let namespace = self
            .namespace()
            .ok_or_else(|| OperatorError::InvalidConfig("Rdbc must be namespaced".into()))?;
        Ok(RecordKey::new(namespace, self.name_any()))
    }

    /// Uid of the bound database, if one has been recorded.
    pub fn database_uid(&self) -> OperatorResult<Option<DatabaseUid>> {
        match self.annotations().get(DATABASE_UID_ANNOTATION) {
            None => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|reason| OperatorError::InvalidAnnotation {
                    key: DATABASE_UID_ANNOTATION.to_string(),
                    reason,
                }),
        }
    }

    /// Whether the cleanup finalizer is present.
    pub fn has_finalizer(&self) -> bool {
        self.finalizers().iter().any(|f| f == DATABASE_FINALIZER)
    }

    /// Whether deletion has been requested.
    pub fn deletion_requested(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Whether the identity, display name, and size are already persisted.
    pub fn binding_recorded(&self, uid: DatabaseUid) -> bool {
        let annotations = self.annotations();
        annotations.get(DATABASE_UID_ANNOTATION) == Some(&uid.to_string())
            && annotations.get(DATABASE_NAME_ANNOTATION) == Some(&self.spec.display_name)
            && annotations.get(SIZE_MEGABYTES_ANNOTATION)
                == Some(&self.spec.size_megabytes.to_string())
    }

    /// Copy of this record with the binding annotations set.
    pub fn with_binding(&self, uid: DatabaseUid) -> Rdbc {
        let mut record = self.clone();
        let annotations = record.annotations_mut();
        annotations.insert(DATABASE_UID_ANNOTATION.to_string(), uid.to_string());
        annotations.insert(
            DATABASE_NAME_ANNOTATION.to_string(),
            self.spec.display_name.clone(),
        );
        annotations.insert(
            SIZE_MEGABYTES_ANNOTATION.to_string(),
            self.spec.size_megabytes.to_string(),
        );
        record
    }

    /// Current status, or the default for a fresh record.
    pub fn status_or_default(&self) -> RdbcStatus {
        self.status.clone().unwrap_or_default()
    }
}
