//! Database API credential resolution.
//!
//! The operator authenticates to the database REST API with basic auth. The
//! username and password live in a Kubernetes secret named by configuration.

use crate::audit::audit_logger;
use crate::error::{OperatorError, OperatorResult};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use kube::Api;
use std::collections::BTreeMap;
use std::fmt;

/// Basic-auth credentials for the database API.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiCredentials {
    /// API username.
    pub username: String,
    /// API password.
    pub password: String,
}

impl fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Credentials resolver for fetching the API secret from Kubernetes.
pub struct CredentialsResolver {
    client: kube::Client,
}

impl CredentialsResolver {
    /// Create a new credentials resolver.
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    /// Read `username` and `password` from the named secret.
    ///
    /// # Errors
    ///
    /// Returns [`OperatorError::NotFound`] if the secret does not exist and
    /// [`OperatorError::InvalidConfig`] if a key is missing or not UTF-8.
    pub async fn resolve(
        &self,
        secret_name: &str,
        namespace: &str,
    ) -> OperatorResult<ApiCredentials> {
        tracing::debug!(
            secret = %secret_name,
            namespace = %namespace,
            "Resolving database API credentials"
        );

        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);

        let secret = secrets.get(secret_name).await.map_err(|e| match &e {
            kube::Error::Api(api_err) if api_err.code == 404 => OperatorError::NotFound {
                kind: "Secret".to_string(),
                name: secret_name.to_string(),
                namespace: namespace.to_string(),
            },
            _ => OperatorError::KubeError(e),
        })?;

        let result = parse_api_credentials(secret_name, namespace, secret.data.as_ref());
        let outcome = if result.is_ok() { "success" } else { "error" };
        audit_logger().log_credential_resolve(secret_name, namespace, outcome);

        result
    }
}

/// Extract API credentials from secret data.
pub fn parse_api_credentials(
    secret_name: &str,
    namespace: &str,
    data: Option<&BTreeMap<String, ByteString>>,
) -> OperatorResult<ApiCredentials> {
    let data = data.ok_or_else(|| {
        OperatorError::InvalidConfig(format!(
            "Secret '{}' in namespace '{}' has no data field",
            secret_name, namespace
        ))
    })?;

    Ok(ApiCredentials {
        username: parse_secret_string(data, "username", secret_name, namespace)?,
        password: parse_secret_string(data, "password", secret_name, namespace)?,
    })
}

fn parse_secret_string(
    data: &BTreeMap<String, ByteString>,
    key: &str,
    secret_name: &str,
    namespace: &str,
) -> OperatorResult<String> {
    let bytes = data
        .get(key)
        .ok_or_else(|| {
            OperatorError::InvalidConfig(format!(
                "failed to get a {} from secret '{}' in namespace '{}'",
                key, secret_name, namespace
            ))
        })?
        .0
        .clone();

    String::from_utf8(bytes).map_err(|_| {
        OperatorError::InvalidConfig(format!(
            "Secret '{}' contains invalid UTF-8 in '{}' field",
            secret_name, key
        ))
    })
}
