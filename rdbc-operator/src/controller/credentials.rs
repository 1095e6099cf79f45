//! Publishes database credentials into the Rdbc's namespace.

use super::ControllerContext;
use crate::audit::audit_logger;
use crate::crd::Rdbc;
use crate::error::{OperatorError, OperatorResult};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use rdbc_client::DatabaseInfo;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Secret key holding `host:port`.
pub const CREDENTIALS_ENDPOINT_KEY: &str = "endpoint";

/// Secret key holding the database password.
pub const CREDENTIALS_PASSWORD_KEY: &str = "password";

/// Label marking objects managed by this operator.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of [`MANAGED_BY_LABEL`].
pub const MANAGED_BY_VALUE: &str = "rdbc-operator";

/// Label naming the owning Rdbc.
pub const RECORD_LABEL: &str = "rdbc.io/record";

/// Label holding the database uid.
pub const UID_LABEL: &str = "rdbc.io/database-uid";

/// What the projector did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// A new secret was created.
    Created,
    /// An existing secret was overwritten.
    Updated,
}

impl Projection {
    fn as_str(self) -> &'static str {
        match self {
            Projection::Created => "created",
            Projection::Updated => "updated",
        }
    }
}

/// Name of the secret derived from an Rdbc.
pub fn credentials_secret_name(record_name: &str) -> String {
    format!("{}-redis-credentials", record_name)
}

fn labels(record: &Rdbc, db: &DatabaseInfo) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
    labels.insert(RECORD_LABEL.to_string(), record.name_any());
    labels.insert(UID_LABEL.to_string(), db.uid.to_string());
    labels
}

fn data(db: &DatabaseInfo) -> BTreeMap<String, ByteString> {
    let mut data = BTreeMap::new();
    data.insert(
        CREDENTIALS_ENDPOINT_KEY.to_string(),
        ByteString(db.endpoint.to_string().into_bytes()),
    );
    data.insert(
        CREDENTIALS_PASSWORD_KEY.to_string(),
        ByteString(db.password.clone().into_bytes()),
    );
    data
}

/// Build the credentials secret for a bound database.
///
/// The secret is controller-owned by the Rdbc so it is garbage collected with it.
pub fn build_credentials_secret(record: &Rdbc, db: &DatabaseInfo) -> OperatorResult<Secret> {
    let owner = record.controller_owner_ref(&()).ok_or_else(|| {
        OperatorError::InvalidConfig(format!(
            "Rdbc {} has no uid, cannot own its credentials secret",
            record.name_any()
        ))
    })?;

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(credentials_secret_name(&record.name_any())),
            namespace: record.namespace(),
            labels: Some(labels(record, db)),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(data(db)),
        ..Default::default()
    })
}

/// Controller reference on `existing` that belongs to another object.
pub fn foreign_controller<'a>(
    existing: &'a Secret,
    owner_uid: &str,
) -> Option<&'a OwnerReference> {
    existing
        .owner_references()
        .iter()
        .find(|o| o.controller == Some(true) && o.uid != owner_uid)
}

/// Writes the credentials secret for an Rdbc.
#[derive(Clone)]
pub struct CredentialProjector {
    ctx: Arc<ControllerContext>,
}

impl CredentialProjector {
    /// Create a new projector.
    pub fn new(ctx: Arc<ControllerContext>) -> Self {
        Self { ctx }
    }

    /// Create or overwrite the credentials secret with the database's current values.
    pub async fn project(&self, record: &Rdbc, db: &DatabaseInfo) -> OperatorResult<Projection> {
        let desired = build_credentials_secret(record, db)?;
        let name = desired.name_any();
        let namespace = desired.namespace().unwrap_or_default();

        let result = match self.ctx.secrets.get(&namespace, &name).await? {
            None => self
                .ctx
                .secrets
                .create(&desired)
                .await
                .map(|_| Projection::Created),
            Some(existing) => {
                let owner_uid = record.uid().unwrap_or_default();
                if let Some(other) = foreign_controller(&existing, &owner_uid) {
                    return Err(OperatorError::ForeignSecret {
                        name,
                        namespace,
                        owner: format!("{}/{}", other.kind, other.name),
                    });
                }

                let mut updated = existing;
                updated.data = desired.data.clone();
                updated.string_data = None;
                updated.type_ = desired.type_.clone();
                updated.labels_mut().extend(desired.labels().clone());

                let owners = updated.owner_references_mut();
                for owner in desired.owner_references() {
                    if !owners.iter().any(|o| o.uid == owner.uid) {
                        owners.push(owner.clone());
                    }
                }

                self.ctx
                    .secrets
                    .replace(&updated)
                    .await
                    .map(|_| Projection::Updated)
            }
        };

        match &result {
            Ok(projection) => {
                audit_logger().log_credential_projection(
                    &name,
                    &namespace,
                    projection.as_str(),
                    "success",
                );
                tracing::debug!(
                    secret = %name,
                    namespace = %namespace,
                    action = projection.as_str(),
                    "Credentials published"
                );
            }
            Err(e) => {
                audit_logger().log_credential_projection(&name, &namespace, "write", "error");
                tracing::warn!(
                    secret = %name,
                    namespace = %namespace,
                    error = %e,
                    "Failed to publish credentials"
                );
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::RdbcSpec;
    use rdbc_client::{DatabaseType, DatabaseUid, Endpoint};

    fn record() -> Rdbc {
        let mut rdbc = Rdbc::new(
            "cache1",
            RdbcSpec {
                display_name: "cache1".to_string(),
                size_megabytes: 100,
                password: None,
            },
        );
        rdbc.metadata.namespace = Some("apps".to_string());
        rdbc.metadata.uid = Some("c0ffee".to_string());
        rdbc
    }

    fn database() -> DatabaseInfo {
        DatabaseInfo {
            uid: DatabaseUid::new(7).unwrap(),
            name: "cache1".to_string(),
            database_type: DatabaseType::Redis,
            memory_size: 104_857_600,
            password: "s3cret".to_string(),
            endpoint: Endpoint {
                host: "redis-12000.cluster.local".to_string(),
                port: 12000,
            },
        }
    }

    #[test]
    fn secret_name() {
        assert_eq!(credentials_secret_name("cache1"), "cache1-redis-credentials");
    }

    #[test]
    fn secret_contents() {
        let secret = build_credentials_secret(&record(), &database()).unwrap();

        assert_eq!(secret.metadata.name.as_deref(), Some("cache1-redis-credentials"));
        assert_eq!(secret.metadata.namespace.as_deref(), Some("apps"));

        let data = secret.data.unwrap();
        assert_eq!(
            data[CREDENTIALS_ENDPOINT_KEY].0,
            b"redis-12000.cluster.local:12000".to_vec()
        );
        assert_eq!(data[CREDENTIALS_PASSWORD_KEY].0, b"s3cret".to_vec());

        let labels = secret.metadata.labels.unwrap();
        assert_eq!(labels[MANAGED_BY_LABEL], MANAGED_BY_VALUE);
        assert_eq!(labels[RECORD_LABEL], "cache1");
        assert_eq!(labels[UID_LABEL], "7");
    }

    #[test]
    fn secret_is_controller_owned() {
        let secret = build_credentials_secret(&record(), &database()).unwrap();
        let owners = secret.metadata.owner_references.unwrap();

        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].kind, "Rdbc");
        assert_eq!(owners[0].uid, "c0ffee");
        assert_eq!(owners[0].controller, Some(true));
    }

    #[test]
    fn foreign_controller_detection() {
        let mut secret = build_credentials_secret(&record(), &database()).unwrap();
        assert!(foreign_controller(&secret, "c0ffee").is_none());

        secret.owner_references_mut()[0].uid = "other".to_string();
        let other = foreign_controller(&secret, "c0ffee").unwrap();
        assert_eq!(other.uid, "other");

        secret.owner_references_mut()[0].controller = None;
        assert!(foreign_controller(&secret, "c0ffee").is_none());
    }

    #[test]
    fn owner_requires_uid() {
        let mut rdbc = record();
        rdbc.metadata.uid = None;
        assert!(build_credentials_secret(&rdbc, &database()).is_err());
    }
}
