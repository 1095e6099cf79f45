//! Core client implementation.

use crate::error::{ClientError, Result};
use reqwest::{Client as HttpClient, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::time::Duration;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// How the client verifies the server certificate.
#[derive(Clone, Default)]
pub enum TlsVerification {
    /// Verify against the built-in root store.
    #[default]
    Verified,
    /// Verify against an additional PEM-encoded CA bundle.
    CustomCa(Vec<u8>),
    /// Accept any certificate. Only for test clusters with self-signed certs.
    Insecure,
}

impl fmt::Debug for TlsVerification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Verified => write!(f, "Verified"),
            Self::CustomCa(pem) => write!(f, "CustomCa({} bytes)", pem.len()),
            Self::Insecure => write!(f, "Insecure"),
        }
    }
}

/// Connection settings for a [`Client`].
///
/// Fixed at construction; a client never changes its transport afterwards.
#[derive(Clone)]
pub struct ClientConfig {
    base_url: String,
    username: String,
    password: String,
    timeout: Duration,
    tls: TlsVerification,
}

impl ClientConfig {
    /// Create a config for the given API URL and basic-auth credentials.
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
            timeout: DEFAULT_TIMEOUT,
            tls: TlsVerification::Verified,
        }
    }

    /// Set the per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set how server certificates are verified.
    #[must_use]
    pub fn with_tls(mut self, tls: TlsVerification) -> Self {
        self.tls = tls;
        self
    }

    /// The configured API URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The configured timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The configured TLS verification mode.
    pub fn tls(&self) -> &TlsVerification {
        &self.tls
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("timeout", &self.timeout)
            .field("tls", &self.tls)
            .finish()
    }
}

/// A client for the Redis Enterprise database REST API.
///
/// Every call is a single attempt bounded by the configured timeout. Callers
/// that need retries get them from repeated reconciliation.
///
/// # Example
///
/// ```no_run
/// use rdbc_client::{Client, ClientConfig, DatabaseUid};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ClientConfig::new("https://cluster.example.com:9443", "admin@example.com", "pw");
/// let client = Client::new(config)?;
///
/// let uid = DatabaseUid::new(1).unwrap();
/// if client.database_exists(uid).await? {
///     let db = client.get_database(uid).await?;
///     println!("{} listens on {}", db.name, db.endpoint);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    base_url: String,
    username: String,
    password: String,
    http: HttpClient,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid, the CA bundle cannot be parsed,
    /// or the HTTP client cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let ClientConfig {
            base_url,
            username,
            password,
            timeout,
            tls,
        } = config;

        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ClientError::InvalidUrl(format!(
                "URL must start with http:// or https://, got: {}",
                base_url
            )));
        }

        let mut builder = HttpClient::builder().timeout(timeout);
        match tls {
            TlsVerification::Verified => {}
            TlsVerification::CustomCa(pem) => {
                let certs = reqwest::Certificate::from_pem_bundle(&pem)
                    .map_err(|e| ClientError::Tls(format!("invalid CA bundle: {}", e)))?;
                if certs.is_empty() {
                    return Err(ClientError::Tls("CA bundle contains no certificates".into()));
                }
                for cert in certs {
                    builder = builder.add_root_certificate(cert);
                }
            }
            TlsVerification::Insecure => {
                tracing::warn!(
                    url = %base_url,
                    "TLS certificate verification disabled for database API client"
                );
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            username,
            password,
            http: builder.build()?,
        })
    }

    /// Build a full URL from a path below `/v1`.
    pub(crate) fn url(&self, path: &str) -> String {
        let path = path.strip_prefix('/').unwrap_or(path);
        format!("{}/v1/{}", self.base_url, path)
    }

    fn with_auth(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.basic_auth(&self.username, Some(&self.password))
    }

    /// Execute a GET request.
    pub(crate) async fn get(&self, path: &str) -> Result<Response> {
        let url = self.url(path);
        tracing::debug!(url = %url, "GET");
        let request = self.with_auth(self.http.get(&url));

        request.send().await.map_err(ClientError::Http)
    }

    /// Execute a POST request with a JSON body.
    pub(crate) async fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<Response> {
        let url = self.url(path);
        tracing::debug!(url = %url, "POST");
        let request = self.with_auth(self.http.post(&url)).json(body);

        request.send().await.map_err(ClientError::Http)
    }

    /// Execute a DELETE request.
    pub(crate) async fn delete(&self, path: &str) -> Result<Response> {
        let url = self.url(path);
        tracing::debug!(url = %url, "DELETE");
        let request = self.with_auth(self.http.delete(&url));

        request.send().await.map_err(ClientError::Http)
    }

    /// Handle a response and deserialize JSON.
    ///
    /// Any status of 300 or above is an error carrying the response body.
    pub(crate) async fn handle_response<T: DeserializeOwned>(
        &self,
        response: Response,
    ) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;

        if status.is_success() {
            Ok(serde_json::from_str(&body)?)
        } else {
            Err(api_error(status, body))
        }
    }

    /// Handle a response whose body is not needed.
    pub(crate) async fn handle_empty_response(&self, response: Response) -> Result<()> {
        let status = response.status();

        if status.is_success() {
            Ok(())
        } else {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            Err(api_error(status, body))
        }
    }
}

fn api_error(status: StatusCode, body: String) -> ClientError {
    let message = if body.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("Unknown error")
            .to_string()
    } else {
        body
    };

    ClientError::Api {
        status: status.as_u16(),
        message,
    }
}
