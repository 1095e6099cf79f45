//! Operator configuration.
//!
//! Everything is read from the environment. A missing or malformed value is
//! returned as a fatal [`OperatorError`]; the caller decides whether to exit.

use crate::error::{OperatorError, OperatorResult};
use rdbc_client::{DEFAULT_TIMEOUT, TlsVerification};
use std::time::Duration;

/// Namespace holding the API credential secret.
pub const REDIS_NAMESPACE_ENV: &str = "REDIS_NS";

/// Name of the secret with the API `username` and `password`.
pub const REDIS_CRED_SECRET_ENV: &str = "REDIS_CRED_SECRET";

/// Base URL of the database REST API.
pub const REDIS_API_ENV: &str = "REDIS_API";

/// Per-request timeout in seconds.
pub const REDIS_API_TIMEOUT_ENV: &str = "REDIS_API_TIMEOUT_SECS";

/// Path to a PEM CA bundle for the API endpoint.
pub const REDIS_API_CA_CERT_ENV: &str = "REDIS_API_CA_CERT";

/// Disable certificate verification for the API endpoint.
pub const REDIS_API_INSECURE_ENV: &str = "REDIS_API_INSECURE_SKIP_VERIFY";

/// Restrict the controller to a single namespace.
pub const WATCH_NAMESPACE_ENV: &str = "WATCH_NAMESPACE";

/// How the API endpoint's certificate is verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TlsMode {
    /// Built-in root store.
    Verified,
    /// Additional CA bundle read from this path.
    CustomCa(String),
    /// No verification.
    Insecure,
}

/// Operator configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Namespace holding the API credential secret.
    pub credentials_namespace: String,
    /// Name of the API credential secret.
    pub credentials_secret: String,
    /// Database API base URL.
    pub api_url: String,
    /// Per-request timeout for the database API.
    pub api_timeout: Duration,
    /// TLS verification for the database API.
    pub tls: TlsMode,
    /// Namespace to watch, or all namespaces when `None`.
    pub watch_namespace: Option<String>,
}

impl OperatorConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> OperatorResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through a lookup function.
    pub fn from_lookup<F>(lookup: F) -> OperatorResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required =
            |key: &str| optional(key).ok_or_else(|| OperatorError::MissingConfig(key.to_string()));

        let credentials_namespace = required(REDIS_NAMESPACE_ENV)?;
        let credentials_secret = required(REDIS_CRED_SECRET_ENV)?;
        let api_url = required(REDIS_API_ENV)?;

        if !api_url.starts_with("http://") && !api_url.starts_with("https://") {
            return Err(OperatorError::InvalidConfig(format!(
                "{} must be an http:// or https:// URL, got: {}",
                REDIS_API_ENV, api_url
            )));
        }

        let api_timeout = match optional(REDIS_API_TIMEOUT_ENV) {
            None => DEFAULT_TIMEOUT,
            Some(raw) => {
                let secs: u64 = raw.trim().parse().map_err(|_| {
                    OperatorError::InvalidConfig(format!(
                        "{} must be a number of seconds, got: {}",
                        REDIS_API_TIMEOUT_ENV, raw
                    ))
                })?;
                if secs == 0 {
                    return Err(OperatorError::InvalidConfig(format!(
                        "{} must be greater than zero",
                        REDIS_API_TIMEOUT_ENV
                    )));
                }
                Duration::from_secs(secs)
            }
        };

        let insecure = match optional(REDIS_API_INSECURE_ENV) {
            None => false,
            Some(raw) => parse_bool(&raw).ok_or_else(|| {
                OperatorError::InvalidConfig(format!(
                    "{} must be true or false, got: {}",
                    REDIS_API_INSECURE_ENV, raw
                ))
            })?,
        };

        let tls = match (insecure, optional(REDIS_API_CA_CERT_ENV)) {
            (true, Some(_)) => {
                return Err(OperatorError::InvalidConfig(format!(
                    "{} and {} are mutually exclusive",
                    REDIS_API_INSECURE_ENV, REDIS_API_CA_CERT_ENV
                )));
            }
            (true, None) => TlsMode::Insecure,
            (false, Some(path)) => TlsMode::CustomCa(path),
            (false, None) => TlsMode::Verified,
        };

        Ok(Self {
            credentials_namespace,
            credentials_secret,
            api_url,
            api_timeout,
            tls,
            watch_namespace: optional(WATCH_NAMESPACE_ENV),
        })
    }

    /// Resolve the TLS mode into client settings, reading the CA bundle if any.
    pub fn tls_verification(&self) -> OperatorResult<TlsVerification> {
        match &self.tls {
            TlsMode::Verified => Ok(TlsVerification::Verified),
            TlsMode::Insecure => Ok(TlsVerification::Insecure),
            TlsMode::CustomCa(path) => std::fs::read(path)
                .map(TlsVerification::CustomCa)
                .map_err(|e| {
                    OperatorError::InvalidConfig(format!(
                        "failed to read CA bundle {}: {}",
                        path, e
                    ))
                }),
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}
