//! Database API seam used by the reconciler.

use crate::error::OperatorResult;
use rdbc_client::{Client, CreateDatabase, DatabaseInfo, DatabaseUid};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by database API operations.
pub type RemoteFuture<'a, T> = Pin<Box<dyn Future<Output = OperatorResult<T>> + Send + 'a>>;

/// Operations the reconciler needs from the database cluster.
///
/// Implementations must treat "already gone" as success for [`delete`](Self::delete).
pub trait DatabaseApi: Send + Sync {
    /// Whether a database with this uid exists.
    fn exists(&self, uid: DatabaseUid) -> RemoteFuture<'_, bool>;

    /// Create a database and return the uid the server assigned.
    fn create<'a>(&'a self, request: &'a CreateDatabase) -> RemoteFuture<'a, DatabaseUid>;

    /// Fetch a database's endpoint and password.
    fn fetch(&self, uid: DatabaseUid) -> RemoteFuture<'_, DatabaseInfo>;

    /// Delete a database. A missing database is not an error.
    fn delete(&self, uid: DatabaseUid) -> RemoteFuture<'_, ()>;
}

impl DatabaseApi for Client {
    fn exists(&self, uid: DatabaseUid) -> RemoteFuture<'_, bool> {
        Box::pin(async move { Ok(self.database_exists(uid).await?) })
    }

    fn create<'a>(&'a self, request: &'a CreateDatabase) -> RemoteFuture<'a, DatabaseUid> {
        Box::pin(async move { Ok(self.create_database(request).await?) })
    }

    fn fetch(&self, uid: DatabaseUid) -> RemoteFuture<'_, DatabaseInfo> {
        Box::pin(async move { Ok(self.get_database(uid).await?) })
    }

    fn delete(&self, uid: DatabaseUid) -> RemoteFuture<'_, ()> {
        Box::pin(async move { Ok(self.delete_database(uid).await?) })
    }
}
