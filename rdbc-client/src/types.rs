//! Shared types for the database API.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bytes per megabyte as used by the `memory_size` field.
const BYTES_PER_MEGABYTE: u64 = 1024 * 1024;

/// Identity of a database on the remote cluster.
///
/// The REST API models database ids as positive 32-bit signed integers, so a
/// valid uid lies in `1..=i32::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatabaseUid(u32);

impl DatabaseUid {
    /// Largest uid the API accepts.
    pub const MAX: u32 = i32::MAX as u32;

    /// Create a uid, rejecting zero and values outside the signed 32-bit range.
    pub fn new(value: u32) -> Option<Self> {
        if value == 0 || value > Self::MAX {
            None
        } else {
            Some(Self(value))
        }
    }

    /// Get the raw integer value.
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for DatabaseUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DatabaseUid {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: u32 = s
            .trim()
            .parse()
            .map_err(|e| format!("invalid database uid '{}': {}", s, e))?;
        Self::new(value).ok_or_else(|| format!("database uid out of range: {}", value))
    }
}

/// Kind of database to provision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    /// Redis database. The only kind this client provisions.
    Redis,
    /// Any other kind reported by the server.
    #[serde(other)]
    Other,
}

/// Request body for `POST /v1/bdbs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateDatabase {
    /// Requested uid.
    pub uid: DatabaseUid,
    /// Database name.
    pub name: String,
    /// Database type.
    #[serde(rename = "type")]
    pub database_type: DatabaseType,
    /// Memory limit in bytes.
    pub memory_size: u64,
    /// Password clients must present.
    #[serde(rename = "authentication_redis_pass")]
    pub password: String,
}

impl CreateDatabase {
    /// Describe a Redis database sized in megabytes.
    pub fn redis(
        uid: DatabaseUid,
        name: impl Into<String>,
        size_megabytes: u64,
        password: impl Into<String>,
    ) -> Self {
        Self {
            uid,
            name: name.into(),
            database_type: DatabaseType::Redis,
            memory_size: megabytes_to_bytes(size_megabytes),
            password: password.into(),
        }
    }
}

/// Network endpoint of a database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// DNS name clients connect to.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A database as reported by `GET /v1/bdbs/{uid}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseInfo {
    /// Database uid.
    pub uid: DatabaseUid,
    /// Database name.
    pub name: String,
    /// Database type.
    pub database_type: DatabaseType,
    /// Memory limit in bytes.
    pub memory_size: u64,
    /// Client password.
    pub password: String,
    /// First endpoint listed by the server.
    pub endpoint: Endpoint,
}

impl DatabaseInfo {
    /// Memory limit in whole megabytes.
    pub fn size_megabytes(&self) -> u64 {
        self.memory_size / BYTES_PER_MEGABYTE
    }
}

/// Convert a size in megabytes to the byte count the API expects.
pub fn megabytes_to_bytes(megabytes: u64) -> u64 {
    megabytes.saturating_mul(BYTES_PER_MEGABYTE)
}
