//! In-memory collaborators for exercising the reconciler without a cluster.
//!
//! [`InMemoryStore`] behaves like the API server for the parts the reconciler
//! relies on: resourceVersion checks, a status subresource, and finalizer-gated
//! deletion. [`FakeDatabaseApi`] stands in for the database REST API and records
//! every mutating call.
//!
//! # Example
//!
//! ```ignore
//! let store = Arc::new(InMemoryStore::new());
//! let databases = Arc::new(FakeDatabaseApi::new());
//! let controller = RdbcController::new(test_context(store.clone(), databases.clone()));
//!
//! let key = store.insert(rdbc).record_key()?;
//! controller.reconcile(&key).await?;
//! assert_eq!(databases.create_requests().len(), 1);
//! ```

use crate::controller::ControllerContext;
use crate::crd::{Rdbc, RdbcStatus, RecordKey};
use crate::error::{OperatorError, OperatorResult};
use crate::remote::{DatabaseApi, RemoteFuture};
use crate::store::{RecordStore, SecretStore, StoreFuture};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;
use parking_lot::Mutex;
use rdbc_client::{ClientError, CreateDatabase, DatabaseInfo, DatabaseUid, Endpoint};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

type ReplaceFilter = Box<dyn Fn(&Rdbc) -> bool + Send + Sync>;

/// Build a controller context over the in-memory collaborators.
pub fn test_context(
    store: Arc<InMemoryStore>,
    databases: Arc<FakeDatabaseApi>,
) -> Arc<ControllerContext> {
    Arc::new(ControllerContext::from_parts(
        store.clone(),
        store,
        databases,
    ))
}

/// In-memory record and secret store.
pub struct InMemoryStore {
    records: Mutex<HashMap<RecordKey, Rdbc>>,
    secrets: Mutex<HashMap<(String, String), Secret>>,
    next_version: AtomicU64,
    reject_replace: Mutex<Option<ReplaceFilter>>,
    status_writes: AtomicUsize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            secrets: Mutex::new(HashMap::new()),
            next_version: AtomicU64::new(1),
            reject_replace: Mutex::new(None),
            status_writes: AtomicUsize::new(0),
        }
    }

    fn bump(&self) -> String {
        self.next_version.fetch_add(1, Ordering::SeqCst).to_string()
    }

    /// Store a new record, filling in uid, generation, and resourceVersion.
    ///
    /// # Panics
    ///
    /// Panics if the record has no namespace.
    pub fn insert(&self, mut record: Rdbc) -> Rdbc {
        let key = record.record_key().expect("test record must be namespaced");
        if record.metadata.uid.is_none() {
            record.metadata.uid = Some(format!("uid-{}", key));
        }
        if record.metadata.generation.is_none() {
            record.metadata.generation = Some(1);
        }
        record.metadata.resource_version = Some(self.bump());
        self.records.lock().insert(key, record.clone());
        record
    }

    /// Current stored copy of a record.
    pub fn record(&self, key: &RecordKey) -> Option<Rdbc> {
        self.records.lock().get(key).cloned()
    }

    /// Edit a stored record the way a user would, bumping its generation.
    pub fn edit(&self, key: &RecordKey, edit: impl FnOnce(&mut Rdbc)) {
        let version = self.bump();
        let mut records = self.records.lock();
        if let Some(record) = records.get_mut(key) {
            edit(record);
            record.metadata.generation = Some(record.metadata.generation.unwrap_or(0) + 1);
            record.metadata.resource_version = Some(version);
        }
    }

    /// Mark a record for deletion. Records without finalizers disappear at once.
    pub fn request_deletion(&self, key: &RecordKey) {
        let version = self.bump();
        let mut records = self.records.lock();
        let Some(record) = records.get_mut(key) else {
            return;
        };

        if record.finalizers().is_empty() {
            records.remove(key);
            return;
        }
        record.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        record.metadata.resource_version = Some(version);
    }

    /// Fail every record replace for which `filter` returns true.
    pub fn reject_replace_if(&self, filter: impl Fn(&Rdbc) -> bool + Send + Sync + 'static) {
        *self.reject_replace.lock() = Some(Box::new(filter));
    }

    /// Stop failing record replaces.
    pub fn allow_all_replaces(&self) {
        *self.reject_replace.lock() = None;
    }

    /// Number of successful status writes.
    pub fn status_writes(&self) -> usize {
        self.status_writes.load(Ordering::SeqCst)
    }

    /// Current stored copy of a secret.
    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.secrets
            .lock()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Delete a secret behind the operator's back.
    pub fn remove_secret(&self, namespace: &str, name: &str) {
        self.secrets
            .lock()
            .remove(&(namespace.to_string(), name.to_string()));
    }

    fn conflict(record: &Rdbc) -> OperatorError {
        OperatorError::Conflict {
            kind: "Rdbc".to_string(),
            name: record.name_any(),
        }
    }

    fn not_found(kind: &str, name: String, namespace: String) -> OperatorError {
        OperatorError::NotFound {
            kind: kind.to_string(),
            name,
            namespace,
        }
    }

    fn replace_record(&self, incoming: &Rdbc) -> OperatorResult<Rdbc> {
        let key = incoming.record_key()?;

        if let Some(filter) = self.reject_replace.lock().as_ref() {
            if filter(incoming) {
                return Err(Self::conflict(incoming));
            }
        }

        let version = self.bump();
        let mut records = self.records.lock();
        let stored = records
            .get(&key)
            .ok_or_else(|| Self::not_found("Rdbc", key.name.clone(), key.namespace.clone()))?;

        if stored.metadata.resource_version != incoming.metadata.resource_version {
            return Err(Self::conflict(incoming));
        }

        let mut updated = incoming.clone();
        updated.status = stored.status.clone();
        updated.metadata.uid = stored.metadata.uid.clone();
        updated.metadata.generation = stored.metadata.generation;
        updated.metadata.deletion_timestamp = stored.metadata.deletion_timestamp.clone();
        updated.metadata.resource_version = Some(version);

        if updated.deletion_requested() && updated.finalizers().is_empty() {
            records.remove(&key);
        } else {
            records.insert(key, updated.clone());
        }
        Ok(updated)
    }

    fn write_status(&self, incoming: &Rdbc, status: &RdbcStatus) -> OperatorResult<Rdbc> {
        let key = incoming.record_key()?;
        let version = self.bump();
        let mut records = self.records.lock();
        let stored = records
            .get_mut(&key)
            .ok_or_else(|| Self::not_found("Rdbc", key.name.clone(), key.namespace.clone()))?;

        if incoming.metadata.resource_version.is_some()
            && stored.metadata.resource_version != incoming.metadata.resource_version
        {
            return Err(Self::conflict(incoming));
        }

        stored.status = Some(status.clone());
        stored.metadata.resource_version = Some(version);
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored.clone())
    }

    fn secret_key(secret: &Secret) -> (String, String) {
        (secret.namespace().unwrap_or_default(), secret.name_any())
    }
}

impl RecordStore for InMemoryStore {
    fn get<'a>(&'a self, key: &'a RecordKey) -> StoreFuture<'a, Option<Rdbc>> {
        Box::pin(async move { Ok(self.record(key)) })
    }

    fn replace<'a>(&'a self, record: &'a Rdbc) -> StoreFuture<'a, Rdbc> {
        Box::pin(async move { self.replace_record(record) })
    }

    fn patch_status<'a>(
        &'a self,
        record: &'a Rdbc,
        status: &'a RdbcStatus,
    ) -> StoreFuture<'a, Rdbc> {
        Box::pin(async move { self.write_status(record, status) })
    }
}

impl SecretStore for InMemoryStore {
    fn get<'a>(&'a self, namespace: &'a str, name: &'a str) -> StoreFuture<'a, Option<Secret>> {
        Box::pin(async move { Ok(self.secret(namespace, name)) })
    }

    fn create<'a>(&'a self, secret: &'a Secret) -> StoreFuture<'a, Secret> {
        Box::pin(async move {
            let key = Self::secret_key(secret);
            let version = self.bump();
            let mut secrets = self.secrets.lock();
            if secrets.contains_key(&key) {
                return Err(OperatorError::Conflict {
                    kind: "Secret".to_string(),
                    name: key.1,
                });
            }

            let mut created = secret.clone();
            created.metadata.resource_version = Some(version);
            secrets.insert(key, created.clone());
            Ok(created)
        })
    }

    fn replace<'a>(&'a self, secret: &'a Secret) -> StoreFuture<'a, Secret> {
        Box::pin(async move {
            let key = Self::secret_key(secret);
            let version = self.bump();
            let mut secrets = self.secrets.lock();
            if !secrets.contains_key(&key) {
                return Err(Self::not_found("Secret", key.1, key.0));
            }

            let mut replaced = secret.clone();
            replaced.metadata.resource_version = Some(version);
            secrets.insert(key, replaced.clone());
            Ok(replaced)
        })
    }
}

/// Scriptable stand-in for the database REST API.
pub struct FakeDatabaseApi {
    databases: Mutex<BTreeMap<DatabaseUid, DatabaseInfo>>,
    creates: Mutex<Vec<CreateDatabase>>,
    deletes: Mutex<Vec<DatabaseUid>>,
    exists_calls: AtomicUsize,
    all_taken: AtomicBool,
    fail_creates: AtomicBool,
    fail_fetches: AtomicBool,
    fail_deletes: AtomicBool,
    lose_create_response: AtomicBool,
    assign_uid: Mutex<Option<DatabaseUid>>,
}

impl Default for FakeDatabaseApi {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDatabaseApi {
    /// Create an API with no databases.
    pub fn new() -> Self {
        Self {
            databases: Mutex::new(BTreeMap::new()),
            creates: Mutex::new(Vec::new()),
            deletes: Mutex::new(Vec::new()),
            exists_calls: AtomicUsize::new(0),
            all_taken: AtomicBool::new(false),
            fail_creates: AtomicBool::new(false),
            fail_fetches: AtomicBool::new(false),
            fail_deletes: AtomicBool::new(false),
            lose_create_response: AtomicBool::new(false),
            assign_uid: Mutex::new(None),
        }
    }

    /// Endpoint the fake reports for a newly created database.
    pub fn default_endpoint(uid: DatabaseUid) -> Endpoint {
        Endpoint {
            host: format!("redis-{}.cluster.local", uid),
            port: 12000,
        }
    }

    /// Seed an existing database.
    pub fn insert(&self, info: DatabaseInfo) {
        self.databases.lock().insert(info.uid, info);
    }

    /// Current state of a database.
    pub fn database(&self, uid: DatabaseUid) -> Option<DatabaseInfo> {
        self.databases.lock().get(&uid).cloned()
    }

    /// Number of databases that currently exist.
    pub fn database_count(&self) -> usize {
        self.databases.lock().len()
    }

    /// Change a database's endpoint.
    pub fn set_endpoint(&self, uid: DatabaseUid, endpoint: Endpoint) {
        if let Some(db) = self.databases.lock().get_mut(&uid) {
            db.endpoint = endpoint;
        }
    }

    /// Change a database's password.
    pub fn set_password(&self, uid: DatabaseUid, password: &str) {
        if let Some(db) = self.databases.lock().get_mut(&uid) {
            db.password = password.to_string();
        }
    }

    /// Remove a database behind the operator's back.
    pub fn remove(&self, uid: DatabaseUid) {
        self.databases.lock().remove(&uid);
    }

    /// Report every uid as taken.
    pub fn occupy_all_uids(&self) {
        self.all_taken.store(true, Ordering::SeqCst);
    }

    /// Make create calls fail.
    pub fn fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    /// Make fetch calls fail.
    pub fn fail_fetches(&self, fail: bool) {
        self.fail_fetches.store(fail, Ordering::SeqCst);
    }

    /// Make delete calls fail.
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Have the next create commit the database and then fail, as a timed out
    /// or garbled response would.
    pub fn lose_next_create_response(&self) {
        self.lose_create_response.store(true, Ordering::SeqCst);
    }

    /// Have the next create report this uid instead of the requested one.
    pub fn assign_uid_on_next_create(&self, uid: DatabaseUid) {
        *self.assign_uid.lock() = Some(uid);
    }

    /// Every create request received.
    pub fn create_requests(&self) -> Vec<CreateDatabase> {
        self.creates.lock().clone()
    }

    /// Every uid a delete was issued for.
    pub fn deleted(&self) -> Vec<DatabaseUid> {
        self.deletes.lock().clone()
    }

    /// Number of existence probes.
    pub fn exists_calls(&self) -> usize {
        self.exists_calls.load(Ordering::SeqCst)
    }

    fn unavailable() -> OperatorError {
        OperatorError::Remote(ClientError::Api {
            status: 503,
            message: "injected failure".to_string(),
        })
    }
}

impl DatabaseApi for FakeDatabaseApi {
    fn exists(&self, uid: DatabaseUid) -> RemoteFuture<'_, bool> {
        Box::pin(async move {
            self.exists_calls.fetch_add(1, Ordering::SeqCst);
            if self.all_taken.load(Ordering::SeqCst) {
                return Ok(true);
            }
            Ok(self.databases.lock().contains_key(&uid))
        })
    }

    fn create<'a>(&'a self, request: &'a CreateDatabase) -> RemoteFuture<'a, DatabaseUid> {
        Box::pin(async move {
            self.creates.lock().push(request.clone());
            if self.fail_creates.load(Ordering::SeqCst) {
                return Err(Self::unavailable());
            }

            let uid = self.assign_uid.lock().take().unwrap_or(request.uid);
            self.insert(DatabaseInfo {
                uid,
                name: request.name.clone(),
                database_type: request.database_type,
                memory_size: request.memory_size,
                password: request.password.clone(),
                endpoint: Self::default_endpoint(uid),
            });

            if self.lose_create_response.swap(false, Ordering::SeqCst) {
                return Err(OperatorError::Remote(ClientError::InvalidResponse(
                    "timed out".to_string(),
                )));
            }
            Ok(uid)
        })
    }

    fn fetch(&self, uid: DatabaseUid) -> RemoteFuture<'_, DatabaseInfo> {
        Box::pin(async move {
            if self.fail_fetches.load(Ordering::SeqCst) {
                return Err(Self::unavailable());
            }
            self.database(uid).ok_or_else(|| {
                OperatorError::Remote(ClientError::Api {
                    status: 404,
                    message: format!("bdb {} not found", uid),
                })
            })
        })
    }

    fn delete(&self, uid: DatabaseUid) -> RemoteFuture<'_, ()> {
        Box::pin(async move {
            self.deletes.lock().push(uid);
            if self.fail_deletes.load(Ordering::SeqCst) {
                return Err(Self::unavailable());
            }
            self.databases.lock().remove(&uid);
            Ok(())
        })
    }
}
