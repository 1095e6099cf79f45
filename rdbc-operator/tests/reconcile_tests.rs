//! End-to-end reconcile tests over the in-memory store and fake database API.

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::ResourceExt;
use kube::runtime::controller::Action;
use rdbc_client::{DatabaseInfo, DatabaseType, DatabaseUid, Endpoint};
use rdbc_operator::controller::{
    CREDENTIALS_ENDPOINT_KEY, CREDENTIALS_PASSWORD_KEY, RdbcController, ReconcileAction,
    credentials_secret_name, error_policy,
};
use rdbc_operator::crd::{
    DATABASE_FINALIZER, DATABASE_NAME_ANNOTATION, DATABASE_UID_ANNOTATION, Rdbc, RdbcPhase,
    RdbcSpec, RecordKey, SIZE_MEGABYTES_ANNOTATION,
};
use rdbc_operator::error::OperatorError;
use rdbc_operator::store::SecretStore;
use rdbc_operator::testing::{FakeDatabaseApi, InMemoryStore, test_context};
use std::sync::Arc;
use std::time::Duration;

const NAMESPACE: &str = "apps";

struct Harness {
    store: Arc<InMemoryStore>,
    databases: Arc<FakeDatabaseApi>,
    controller: RdbcController,
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let databases = Arc::new(FakeDatabaseApi::new());
    let controller = RdbcController::new(test_context(store.clone(), databases.clone()));
    Harness {
        store,
        databases,
        controller,
    }
}

fn rdbc(name: &str, size_megabytes: u32) -> Rdbc {
    let mut rdbc = Rdbc::new(
        name,
        RdbcSpec {
            display_name: name.to_string(),
            size_megabytes,
            password: None,
        },
    );
    rdbc.metadata.namespace = Some(NAMESPACE.to_string());
    rdbc
}

fn with_uid_annotation(mut rdbc: Rdbc, uid: u32) -> Rdbc {
    rdbc.annotations_mut()
        .insert(DATABASE_UID_ANNOTATION.to_string(), uid.to_string());
    rdbc
}

fn uid(value: u32) -> DatabaseUid {
    DatabaseUid::new(value).unwrap()
}

fn existing_database(value: u32, name: &str) -> DatabaseInfo {
    DatabaseInfo {
        uid: uid(value),
        name: name.to_string(),
        database_type: DatabaseType::Redis,
        memory_size: 104_857_600,
        password: "existing-pass".to_string(),
        endpoint: Endpoint {
            host: "redis-existing.cluster.local".to_string(),
            port: 16379,
        },
    }
}

fn secret_value(secret: &Secret, key: &str) -> String {
    let data = secret.data.as_ref().unwrap();
    String::from_utf8(data[key].0.clone()).unwrap()
}

fn credentials(h: &Harness, record: &str) -> Option<Secret> {
    h.store.secret(NAMESPACE, &credentials_secret_name(record))
}

#[tokio::test]
async fn test_new_claim_creates_database_and_publishes_credentials() {
    let h = harness();
    let key = RecordKey::new(NAMESPACE, "cache1");
    h.store.insert(rdbc("cache1", 100));

    let action = h.controller.reconcile(&key).await.unwrap();
    assert_eq!(action, ReconcileAction::requeue_short());

    let requests = h.databases.create_requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.name, "cache1");
    assert_eq!(request.memory_size, 104_857_600);
    assert_eq!(request.database_type, DatabaseType::Redis);
    assert_eq!(request.password.len(), 16);

    let stored = h.store.record(&key).unwrap();
    assert!(stored.has_finalizer());
    assert_eq!(stored.database_uid().unwrap(), Some(request.uid));
    assert_eq!(
        stored.annotations().get(DATABASE_NAME_ANNOTATION),
        Some(&"cache1".to_string())
    );
    assert_eq!(
        stored.annotations().get(SIZE_MEGABYTES_ANNOTATION),
        Some(&"100".to_string())
    );

    let endpoint = FakeDatabaseApi::default_endpoint(request.uid).to_string();
    let secret = credentials(&h, "cache1").unwrap();
    assert_eq!(secret_value(&secret, CREDENTIALS_ENDPOINT_KEY), endpoint);
    assert_eq!(secret_value(&secret, CREDENTIALS_PASSWORD_KEY), request.password);

    let status = stored.status.unwrap();
    assert_eq!(status.phase, RdbcPhase::Bound);
    assert_eq!(status.message.as_deref(), Some("ready"));
    assert_eq!(status.external_id, Some(request.uid.get()));
    assert_eq!(status.endpoint_url, Some(endpoint));
    assert_eq!(status.observed_generation, Some(1));
}

#[tokio::test]
async fn test_repeated_reconcile_creates_once() {
    let h = harness();
    let key = RecordKey::new(NAMESPACE, "cache1");
    h.store.insert(rdbc("cache1", 100));

    h.controller.reconcile(&key).await.unwrap();
    let writes = h.store.status_writes();

    let action = h.controller.reconcile(&key).await.unwrap();
    assert_eq!(action, ReconcileAction::requeue_long());
    h.controller.reconcile(&key).await.unwrap();

    assert_eq!(h.databases.create_requests().len(), 1);
    assert_eq!(h.databases.database_count(), 1);
    assert_eq!(h.store.status_writes(), writes);
}

#[tokio::test]
async fn test_spec_password_is_used() {
    let h = harness();
    let key = RecordKey::new(NAMESPACE, "cache1");
    let mut record = rdbc("cache1", 100);
    record.spec.password = Some("chosen-password".to_string());
    h.store.insert(record);

    h.controller.reconcile(&key).await.unwrap();

    assert_eq!(h.databases.create_requests()[0].password, "chosen-password");
    let secret = credentials(&h, "cache1").unwrap();
    assert_eq!(
        secret_value(&secret, CREDENTIALS_PASSWORD_KEY),
        "chosen-password"
    );
}

#[tokio::test]
async fn test_failed_uid_write_deletes_new_database() {
    let h = harness();
    let key = RecordKey::new(NAMESPACE, "cache1");
    h.store.insert(rdbc("cache1", 100));
    h.store
        .reject_replace_if(|r| r.annotations().contains_key(DATABASE_UID_ANNOTATION));

    let err = h.controller.reconcile(&key).await.unwrap_err();
    assert!(matches!(err, OperatorError::Conflict { .. }));
    assert!(err.is_retryable());

    let created = h.databases.create_requests()[0].uid;
    assert_eq!(h.databases.deleted(), vec![created]);
    assert_eq!(h.databases.database_count(), 0);

    let stored = h.store.record(&key).unwrap();
    assert_eq!(stored.database_uid().unwrap(), None);
    assert!(stored.has_finalizer());
    let message = stored.status.unwrap().message.unwrap();
    assert!(message.contains("Conflict"), "unexpected message: {}", message);

    h.store.allow_all_replaces();
    h.controller.reconcile(&key).await.unwrap();

    assert_eq!(h.databases.create_requests().len(), 2);
    assert_eq!(h.databases.database_count(), 1);
}

#[tokio::test]
async fn test_failed_compensation_still_reports_conflict() {
    let h = harness();
    let key = RecordKey::new(NAMESPACE, "cache1");
    h.store.insert(rdbc("cache1", 100));
    h.store
        .reject_replace_if(|r| r.annotations().contains_key(DATABASE_UID_ANNOTATION));
    h.databases.fail_deletes(true);

    let err = h.controller.reconcile(&key).await.unwrap_err();
    assert!(matches!(err, OperatorError::Conflict { .. }));

    let created = h.databases.create_requests()[0].uid;
    assert_eq!(h.databases.deleted(), vec![created]);
    assert!(h.databases.database(created).is_some());

    let stored = h.store.record(&key).unwrap();
    assert_eq!(stored.database_uid().unwrap(), None);
    let message = stored.status.unwrap().message.unwrap();
    assert!(message.contains("Conflict"), "unexpected message: {}", message);
}

#[tokio::test]
async fn test_create_error_after_commit_deletes_database() {
    let h = harness();
    let key = RecordKey::new(NAMESPACE, "cache1");
    h.store.insert(rdbc("cache1", 100));
    h.databases.lose_next_create_response();

    let err = h.controller.reconcile(&key).await.unwrap_err();
    assert!(err.is_retryable());
    assert!(err.to_string().contains("timed out"));

    let first = h.databases.create_requests()[0].uid;
    assert_eq!(h.databases.deleted(), vec![first]);
    assert_eq!(h.databases.database_count(), 0);
    assert_eq!(h.store.record(&key).unwrap().database_uid().unwrap(), None);

    h.controller.reconcile(&key).await.unwrap();

    let second = h.databases.create_requests()[1].uid;
    assert_eq!(h.databases.database_count(), 1);
    assert!(h.databases.database(second).is_some());
    assert_eq!(h.store.record(&key).unwrap().database_uid().unwrap(), Some(second));
}

#[tokio::test]
async fn test_server_assigned_uid_is_recorded() {
    let h = harness();
    let key = RecordKey::new(NAMESPACE, "cache1");
    h.store.insert(rdbc("cache1", 100));
    h.databases.assign_uid_on_next_create(uid(777));

    h.controller.reconcile(&key).await.unwrap();

    assert!(h.databases.deleted().is_empty());
    assert_eq!(h.databases.database_count(), 1);
    let stored = h.store.record(&key).unwrap();
    assert_eq!(stored.database_uid().unwrap(), Some(uid(777)));
    assert_eq!(stored.status.unwrap().external_id, Some(777));
}

#[tokio::test]
async fn test_recorded_uid_adopts_existing_database() {
    let h = harness();
    let key = RecordKey::new(NAMESPACE, "legacy");
    h.databases.insert(existing_database(4242, "legacy"));
    h.store.insert(with_uid_annotation(rdbc("legacy", 100), 4242));

    h.controller.reconcile(&key).await.unwrap();

    assert!(h.databases.create_requests().is_empty());

    let secret = credentials(&h, "legacy").unwrap();
    assert_eq!(
        secret_value(&secret, CREDENTIALS_ENDPOINT_KEY),
        "redis-existing.cluster.local:16379"
    );
    assert_eq!(secret_value(&secret, CREDENTIALS_PASSWORD_KEY), "existing-pass");

    let stored = h.store.record(&key).unwrap();
    assert!(stored.binding_recorded(uid(4242)));
    assert_eq!(stored.status.unwrap().external_id, Some(4242));
}

#[tokio::test]
async fn test_adopted_database_survives_failed_uid_write() {
    let h = harness();
    let key = RecordKey::new(NAMESPACE, "legacy");
    h.store.insert(with_uid_annotation(rdbc("legacy", 100), 4242));
    h.store
        .reject_replace_if(|r| r.annotations().contains_key(DATABASE_NAME_ANNOTATION));

    let err = h.controller.reconcile(&key).await.unwrap_err();
    assert!(err.is_retryable());

    let requests = h.databases.create_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].uid, uid(4242));
    assert!(h.databases.deleted().is_empty());
    assert!(h.databases.database(uid(4242)).is_some());
}

#[tokio::test]
async fn test_identity_exhaustion_is_fatal() {
    let h = harness();
    let key = RecordKey::new(NAMESPACE, "cache1");
    h.store.insert(rdbc("cache1", 100));
    h.databases.occupy_all_uids();

    let err = h.controller.reconcile(&key).await.unwrap_err();
    assert!(matches!(err, OperatorError::IdentityExhausted { attempts: 3 }));
    assert!(err.is_fatal());
    assert_eq!(h.databases.exists_calls(), 3);
    assert!(h.databases.create_requests().is_empty());

    let message = h.store.record(&key).unwrap().status.unwrap().message.unwrap();
    assert!(message.contains("Could not allocate database identity"));
}

#[tokio::test]
async fn test_identity_conflict_deletes_new_database() {
    let h = harness();
    let key = RecordKey::new(NAMESPACE, "legacy");
    h.store.insert(with_uid_annotation(rdbc("legacy", 100), 4242));
    h.databases.assign_uid_on_next_create(uid(999));

    let err = h.controller.reconcile(&key).await.unwrap_err();
    assert!(matches!(
        err,
        OperatorError::IdentityConflict {
            recorded: 4242,
            returned: 999
        }
    ));
    assert!(err.is_fatal());
    assert_eq!(h.databases.deleted(), vec![uid(999)]);

    let stored = h.store.record(&key).unwrap();
    assert_eq!(stored.database_uid().unwrap(), Some(uid(4242)));
}

#[tokio::test]
async fn test_malformed_uid_annotation_is_fatal() {
    let h = harness();
    let key = RecordKey::new(NAMESPACE, "cache1");
    let mut record = rdbc("cache1", 100);
    record
        .annotations_mut()
        .insert(DATABASE_UID_ANNOTATION.to_string(), "twelve".to_string());
    h.store.insert(record);

    let err = h.controller.reconcile(&key).await.unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(h.databases.exists_calls(), 0);
    assert!(!h.store.record(&key).unwrap().has_finalizer());
}

#[tokio::test]
async fn test_finalizer_stays_until_database_is_deleted() {
    let h = harness();
    let key = RecordKey::new(NAMESPACE, "cache1");
    h.store.insert(rdbc("cache1", 100));
    h.controller.reconcile(&key).await.unwrap();
    let created = h.databases.create_requests()[0].uid;

    h.store.request_deletion(&key);
    h.databases.fail_deletes(true);

    let err = h.controller.reconcile(&key).await.unwrap_err();
    assert!(err.is_retryable());

    let stored = h.store.record(&key).unwrap();
    assert!(stored.has_finalizer());
    assert_eq!(stored.status.unwrap().phase, RdbcPhase::Deleting);
    assert!(h.databases.database(created).is_some());

    h.databases.fail_deletes(false);
    let action = h.controller.reconcile(&key).await.unwrap();

    assert_eq!(action, ReconcileAction::Done);
    assert!(h.store.record(&key).is_none());
    assert!(h.databases.database(created).is_none());
}

#[tokio::test]
async fn test_deletion_when_database_already_gone() {
    let h = harness();
    let key = RecordKey::new(NAMESPACE, "cache1");
    h.store.insert(rdbc("cache1", 100));
    h.controller.reconcile(&key).await.unwrap();
    let created = h.databases.create_requests()[0].uid;

    h.databases.remove(created);
    h.store.request_deletion(&key);

    h.controller.reconcile(&key).await.unwrap();
    assert!(h.store.record(&key).is_none());
    assert!(h.databases.deleted().is_empty());

    // Record is gone, a late event is a no-op.
    assert_eq!(
        h.controller.reconcile(&key).await.unwrap(),
        ReconcileAction::Done
    );
}

#[tokio::test]
async fn test_deletion_before_binding_skips_remote() {
    let h = harness();
    let key = RecordKey::new(NAMESPACE, "cache1");
    let mut record = rdbc("cache1", 100);
    record.finalizers_mut().push(DATABASE_FINALIZER.to_string());
    h.store.insert(record);
    h.store.request_deletion(&key);

    h.controller.reconcile(&key).await.unwrap();

    assert!(h.store.record(&key).is_none());
    assert_eq!(h.databases.exists_calls(), 0);
    assert!(h.databases.deleted().is_empty());
}

#[tokio::test]
async fn test_credentials_follow_remote_changes() {
    let h = harness();
    let key = RecordKey::new(NAMESPACE, "cache1");
    h.store.insert(rdbc("cache1", 100));
    h.controller.reconcile(&key).await.unwrap();
    let created = h.databases.create_requests()[0].uid;

    h.databases.set_endpoint(
        created,
        Endpoint {
            host: "redis-moved.cluster.local".to_string(),
            port: 18000,
        },
    );
    h.databases.set_password(created, "rotated");

    let action = h.controller.reconcile(&key).await.unwrap();
    assert_eq!(action, ReconcileAction::requeue_long());

    let secret = credentials(&h, "cache1").unwrap();
    assert_eq!(
        secret_value(&secret, CREDENTIALS_ENDPOINT_KEY),
        "redis-moved.cluster.local:18000"
    );
    assert_eq!(secret_value(&secret, CREDENTIALS_PASSWORD_KEY), "rotated");

    let status = h.store.record(&key).unwrap().status.unwrap();
    assert_eq!(
        status.endpoint_url.as_deref(),
        Some("redis-moved.cluster.local:18000")
    );
}

#[tokio::test]
async fn test_deleted_credentials_secret_is_recreated() {
    let h = harness();
    let key = RecordKey::new(NAMESPACE, "cache1");
    h.store.insert(rdbc("cache1", 100));
    h.controller.reconcile(&key).await.unwrap();
    let created = h.databases.create_requests()[0].uid;

    let action = h.controller.reconcile(&key).await.unwrap();
    assert_eq!(action, ReconcileAction::requeue_long());

    h.store.remove_secret(NAMESPACE, &credentials_secret_name("cache1"));
    assert!(credentials(&h, "cache1").is_none());

    let action = h.controller.reconcile(&key).await.unwrap();
    assert_eq!(action, ReconcileAction::requeue_short());

    let secret = credentials(&h, "cache1").unwrap();
    assert_eq!(
        secret_value(&secret, CREDENTIALS_ENDPOINT_KEY),
        FakeDatabaseApi::default_endpoint(created).to_string()
    );
    assert_eq!(
        secret_value(&secret, CREDENTIALS_PASSWORD_KEY),
        h.databases.database(created).unwrap().password
    );
    assert_eq!(h.databases.create_requests().len(), 1);
}

#[tokio::test]
async fn test_secret_controlled_by_another_object_is_left_alone() {
    let h = harness();
    let key = RecordKey::new(NAMESPACE, "cache1");
    h.store.insert(rdbc("cache1", 100));

    let foreign = Secret {
        metadata: ObjectMeta {
            name: Some(credentials_secret_name("cache1")),
            namespace: Some(NAMESPACE.to_string()),
            owner_references: Some(vec![OwnerReference {
                api_version: "apps/v1".to_string(),
                kind: "Deployment".to_string(),
                name: "web".to_string(),
                uid: "deployment-uid".to_string(),
                controller: Some(true),
                block_owner_deletion: None,
            }]),
            ..Default::default()
        },
        ..Default::default()
    };
    SecretStore::create(h.store.as_ref(), &foreign).await.unwrap();

    let err = h.controller.reconcile(&key).await.unwrap_err();
    assert!(matches!(err, OperatorError::ForeignSecret { .. }));
    assert!(err.is_retryable());

    let secret = credentials(&h, "cache1").unwrap();
    assert!(secret.data.is_none());
    assert_eq!(secret.owner_references().len(), 1);
    assert_eq!(secret.owner_references()[0].name, "web");

    let message = h.store.record(&key).unwrap().status.unwrap().message.unwrap();
    assert!(
        message.contains("already controlled by Deployment/web"),
        "unexpected message: {}",
        message
    );
}

#[tokio::test]
async fn test_fetch_failure_is_reported_in_status() {
    let h = harness();
    let key = RecordKey::new(NAMESPACE, "cache1");
    h.store.insert(rdbc("cache1", 100));
    h.databases.fail_fetches(true);

    let err = h.controller.reconcile(&key).await.unwrap_err();
    assert!(err.is_retryable());

    let stored = h.store.record(&key).unwrap();
    assert!(stored.database_uid().unwrap().is_some());
    assert!(credentials(&h, "cache1").is_none());
    let message = stored.status.unwrap().message.unwrap();
    assert!(message.contains("injected failure"));

    h.databases.fail_fetches(false);
    h.controller.reconcile(&key).await.unwrap();

    let status = h.store.record(&key).unwrap().status.unwrap();
    assert_eq!(status.message.as_deref(), Some("ready"));
    assert_eq!(h.databases.create_requests().len(), 1);
}

#[tokio::test]
async fn test_spec_edit_updates_binding_and_generation() {
    let h = harness();
    let key = RecordKey::new(NAMESPACE, "cache1");
    h.store.insert(rdbc("cache1", 100));
    h.controller.reconcile(&key).await.unwrap();

    h.store.edit(&key, |r| r.spec.size_megabytes = 200);
    h.controller.reconcile(&key).await.unwrap();

    let stored = h.store.record(&key).unwrap();
    assert_eq!(
        stored.annotations().get(SIZE_MEGABYTES_ANNOTATION),
        Some(&"200".to_string())
    );
    assert_eq!(stored.status.unwrap().observed_generation, Some(2));
    assert_eq!(h.databases.create_requests().len(), 1);
}

#[tokio::test]
async fn test_missing_record_is_noop() {
    let h = harness();
    let key = RecordKey::new(NAMESPACE, "ghost");

    let action = h.controller.reconcile(&key).await.unwrap();
    assert_eq!(action, ReconcileAction::Done);
    assert_eq!(h.databases.exists_calls(), 0);
}

#[test]
fn test_error_policy_parks_fatal_errors() {
    let store = Arc::new(InMemoryStore::new());
    let ctx = test_context(store, Arc::new(FakeDatabaseApi::new()));
    let record = Arc::new(rdbc("cache1", 100));

    let fatal = OperatorError::IdentityExhausted { attempts: 3 };
    assert_eq!(
        error_policy(record.clone(), &fatal, ctx.clone()),
        Action::await_change()
    );

    let retryable = OperatorError::Conflict {
        kind: "Rdbc".to_string(),
        name: "cache1".to_string(),
    };
    assert_eq!(
        error_policy(record, &retryable, ctx),
        Action::requeue(Duration::from_secs(30))
    );
}
