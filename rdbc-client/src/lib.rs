//! Typed Rust client for the Redis Enterprise database REST API.
//!
//! Covers the four `/v1/bdbs` operations an operator needs to manage the
//! lifecycle of a database: existence checks, creation, fetching connection
//! details, and deletion. Requests use basic authentication and verified TLS
//! unless the [`ClientConfig`] says otherwise.
//!
//! # Example
//!
//! ```no_run
//! use rdbc_client::{Client, ClientConfig, CreateDatabase, DatabaseUid};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::new(ClientConfig::new(
//!     "https://cluster.example.com:9443",
//!     "admin@example.com",
//!     "password",
//! ))?;
//!
//! let uid = DatabaseUid::new(17).unwrap();
//! let request = CreateDatabase::redis(uid, "cache1", 100, "s3cret");
//! let uid = client.create_database(&request).await?;
//!
//! let db = client.get_database(uid).await?;
//! println!("connect to {}", db.endpoint);
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! ```no_run
//! # use rdbc_client::{Client, ClientConfig, ClientError, DatabaseUid};
//! # async fn example(client: Client, uid: DatabaseUid) -> Result<(), ClientError> {
//! match client.get_database(uid).await {
//!     Ok(db) => println!("Found: {}", db.name),
//!     Err(e) if e.is_not_found() => println!("Database not found"),
//!     Err(e) => println!("Error: {}", e),
//! }
//! # Ok(())
//! # }
//! ```

mod client;
mod databases;
mod error;
mod types;

pub use client::{Client, ClientConfig, DEFAULT_TIMEOUT, TlsVerification};
pub use error::{ClientError, Result};
pub use types::{
    CreateDatabase, DatabaseInfo, DatabaseType, DatabaseUid, Endpoint, megabytes_to_bytes,
};
