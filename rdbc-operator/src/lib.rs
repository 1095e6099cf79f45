//! Redis Enterprise database operator
//!
//! This crate provides a Kubernetes operator that keeps Redis Enterprise
//! databases in sync with `Rdbc` custom resources.
//!
//! # Custom Resource Definitions
//!
//! - **Rdbc**: Claims a Redis database of a given size. The operator creates or
//!   adopts the database, publishes its endpoint and password in the Secret
//!   `<name>-redis-credentials`, and deletes the database with the resource.
//!
//! # Example
//!
//! ```yaml
//! apiVersion: rdbc.io/v1alpha1
//! kind: Rdbc
//! metadata:
//!   name: cache1
//!   namespace: apps
//! spec:
//!   displayName: cache1
//!   sizeMegabytes: 100
//! ```
//!
//! To adopt an existing database, set the `rdbc.io/database-uid` annotation to
//! its uid before the first reconcile.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod audit;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod observability;
pub mod remote;
pub mod security;
pub mod store;
pub mod testing;

pub use config::OperatorConfig;
pub use crd::{Rdbc, RdbcSpec, RdbcStatus};
pub use error::{OperatorError, OperatorResult};
