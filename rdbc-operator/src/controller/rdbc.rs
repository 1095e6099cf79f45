//! Rdbc controller implementation.

use super::{
    ControllerContext, CredentialProjector, FinalizerManager, Lifecycle, Projection,
    ReconcileAction,
};
use crate::audit::audit_logger;
use crate::crd::{Rdbc, RdbcPhase, RdbcStatus, RecordKey};
use crate::error::{OperatorError, OperatorResult};
use kube::ResourceExt;
use rand::Rng;
use rand::distributions::Alphanumeric;
use rdbc_client::{CreateDatabase, DatabaseUid};
use std::sync::Arc;

/// Status message written after a successful reconcile.
pub const READY_MESSAGE: &str = "ready";

/// Candidate uids probed before giving up on allocation.
const IDENTITY_PROBES: usize = 3;

const GENERATED_PASSWORD_LEN: usize = 16;

/// Generate a random alphanumeric database password.
pub fn generate_password() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

fn random_uid() -> DatabaseUid {
    let mut rng = rand::thread_rng();
    loop {
        if let Some(uid) = DatabaseUid::new(rng.gen_range(1..=DatabaseUid::MAX)) {
            return uid;
        }
    }
}

/// Database the reconciler intends to bind.
struct Resolved {
    request: CreateDatabase,
    /// Uid came from the record rather than allocation.
    adopted: bool,
    /// Already probed and known to be absent.
    known_absent: bool,
}

/// Controller for Rdbc resources.
#[derive(Clone)]
pub struct RdbcController {
    ctx: Arc<ControllerContext>,
    finalizers: FinalizerManager,
    projector: CredentialProjector,
}

impl RdbcController {
    /// Create a new Rdbc controller.
    pub fn new(ctx: Arc<ControllerContext>) -> Self {
        Self {
            finalizers: FinalizerManager::new(ctx.clone()),
            projector: CredentialProjector::new(ctx.clone()),
            ctx,
        }
    }

    /// Reconcile the Rdbc delivered by the watch stream.
    ///
    /// The object is only used for its key; the record is re-read so every
    /// decision is made against the latest stored version.
    pub async fn reconcile_object(&self, rdbc: Arc<Rdbc>) -> OperatorResult<ReconcileAction> {
        let key = rdbc.record_key()?;
        self.reconcile(&key).await
    }

    /// Reconcile an Rdbc.
    ///
    /// This is the main reconciliation loop that:
    /// 1. Runs finalization if deletion was requested
    /// 2. Attaches the finalizer before any remote mutation
    /// 3. Resolves, and if needed creates, the database
    /// 4. Records the database uid on the Rdbc
    /// 5. Publishes the credentials secret
    /// 6. Updates the status
    ///
    /// On error the status message is set to the error text and the error is
    /// returned for the error policy to classify.
    pub async fn reconcile(&self, key: &RecordKey) -> OperatorResult<ReconcileAction> {
        let Some(record) = self.ctx.records.get(key).await? else {
            tracing::debug!(record = %key, "Rdbc no longer exists");
            return Ok(ReconcileAction::Done);
        };

        tracing::info!(
            name = %key.name,
            namespace = %key.namespace,
            size_megabytes = record.spec.size_megabytes,
            "Reconciling Rdbc"
        );

        let result = match Lifecycle::observe(&record) {
            Ok(Lifecycle::Terminated) => Ok(ReconcileAction::Done),
            Ok(Lifecycle::Deleting) => self.handle_deleting(record).await,
            Ok(Lifecycle::New) | Ok(Lifecycle::Bound(_)) => self.handle_active(record).await,
            Err(e) => Err(e),
        };

        if let Err(error) = &result {
            tracing::warn!(
                record = %key,
                error = %error,
                fatal = error.is_fatal(),
                "Reconcile failed"
            );
            self.report_failure(key, error).await;
        }

        result
    }

    /// Delete the database, then let the record go.
    async fn handle_deleting(&self, record: Rdbc) -> OperatorResult<ReconcileAction> {
        tracing::info!(
            name = %record.name_any(),
            "Rdbc is being deleted, cleaning up database"
        );

        let status = RdbcStatus {
            phase: RdbcPhase::Deleting,
            message: Some("deleting database".to_string()),
            ..record.status_or_default()
        };
        let record = self.write_status(record, status).await?;

        let cleanup = self.finalizers.cleanup(&record).await?;
        tracing::debug!(name = %record.name_any(), ?cleanup, "Database cleanup finished");
        self.finalizers.release(&record).await?;

        Ok(ReconcileAction::Done)
    }

    /// Bring a live record to `Bound`.
    async fn handle_active(&self, record: Rdbc) -> OperatorResult<ReconcileAction> {
        let recorded_uid = record.database_uid()?;

        let record = self.finalizers.attach(&record).await?;

        let resolved = match recorded_uid {
            Some(uid) => Self::adopt(&record, uid),
            None => self.allocate(&record).await?,
        };

        let (record, uid, created) = self.ensure_database(record, &resolved).await?;

        let record = self
            .persist_binding(record, uid, created && recorded_uid.is_none())
            .await?;

        let db = self.ctx.databases.fetch(uid).await?;
        if db.size_megabytes() != u64::from(record.spec.size_megabytes) {
            tracing::warn!(
                name = %record.name_any(),
                uid = %uid,
                requested = record.spec.size_megabytes,
                actual = db.size_megabytes(),
                "Database size differs from spec; resizing is not supported"
            );
        }

        let projection = self.projector.project(&record, &db).await?;

        let status = RdbcStatus {
            phase: RdbcPhase::Bound,
            endpoint_url: Some(db.endpoint.to_string()),
            external_id: Some(uid.get()),
            message: Some(READY_MESSAGE.to_string()),
            observed_generation: record.metadata.generation,
        };
        self.write_status(record, status).await?;

        Ok(match projection {
            Projection::Created => ReconcileAction::requeue_short(),
            Projection::Updated => ReconcileAction::requeue_long(),
        })
    }

    fn password_for(record: &Rdbc) -> String {
        record
            .spec
            .password
            .clone()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(generate_password)
    }

    fn adopt(record: &Rdbc, uid: DatabaseUid) -> Resolved {
        tracing::debug!(name = %record.name_any(), uid = %uid, "Using recorded database uid");
        Resolved {
            request: CreateDatabase::redis(
                uid,
                record.spec.display_name.clone(),
                u64::from(record.spec.size_megabytes),
                Self::password_for(record),
            ),
            adopted: true,
            known_absent: false,
        }
    }

    /// Pick a random uid not in use on the cluster.
    async fn allocate(&self, record: &Rdbc) -> OperatorResult<Resolved> {
        for attempt in 1..=IDENTITY_PROBES {
            let candidate = random_uid();
            if !self.ctx.databases.exists(candidate).await? {
                tracing::debug!(
                    name = %record.name_any(),
                    uid = %candidate,
                    attempt,
                    "Allocated database uid"
                );
                return Ok(Resolved {
                    request: CreateDatabase::redis(
                        candidate,
                        record.spec.display_name.clone(),
                        u64::from(record.spec.size_megabytes),
                        Self::password_for(record),
                    ),
                    adopted: false,
                    known_absent: true,
                });
            }
            tracing::debug!(uid = %candidate, attempt, "Candidate uid already in use");
        }

        Err(OperatorError::IdentityExhausted {
            attempts: IDENTITY_PROBES,
        })
    }

    /// Create the database unless it already exists.
    ///
    /// Returns the stored record, the bound uid, and whether this call created it.
    async fn ensure_database(
        &self,
        record: Rdbc,
        resolved: &Resolved,
    ) -> OperatorResult<(Rdbc, DatabaseUid, bool)> {
        let uid = resolved.request.uid;

        if !resolved.known_absent && self.ctx.databases.exists(uid).await? {
            tracing::debug!(
                name = %record.name_any(),
                uid = %uid,
                "Database exists, skipping create"
            );
            return Ok((record, uid, false));
        }

        let status = RdbcStatus {
            phase: RdbcPhase::Provisioning,
            message: Some("creating database".to_string()),
            ..record.status_or_default()
        };
        let record = self.write_status(record, status).await?;

        tracing::info!(
            name = %record.name_any(),
            uid = %uid,
            memory_size = resolved.request.memory_size,
            "Creating database"
        );
        let returned = match self.ctx.databases.create(&resolved.request).await {
            Ok(returned) => returned,
            Err(error) => {
                if !resolved.adopted {
                    self.discard_unrecorded(&record, uid).await;
                }
                return Err(error);
            }
        };

        if !resolved.adopted && returned != uid {
            tracing::debug!(
                name = %record.name_any(),
                requested = %uid,
                returned = %returned,
                "Server assigned a different uid than allocated"
            );
        }

        if resolved.adopted && returned != uid {
            self.compensate(
                &record,
                returned,
                "server assigned a different uid than recorded",
            )
            .await;
            return Err(OperatorError::IdentityConflict {
                recorded: uid.get(),
                returned: returned.get(),
            });
        }

        Ok((record, returned, true))
    }

    /// Record the uid, display name, and size on the Rdbc.
    ///
    /// When `owns_database` is set and the write fails, the database is deleted
    /// again so it is not orphaned.
    async fn persist_binding(
        &self,
        record: Rdbc,
        uid: DatabaseUid,
        owns_database: bool,
    ) -> OperatorResult<Rdbc> {
        if record.binding_recorded(uid) {
            return Ok(record);
        }

        match self.ctx.records.replace(&record.with_binding(uid)).await {
            Ok(updated) => {
                tracing::info!(name = %record.name_any(), uid = %uid, "Database uid recorded");
                Ok(updated)
            }
            Err(error) => {
                if owns_database {
                    self.compensate(&record, uid, "failed to record database uid")
                        .await;
                }
                Err(error)
            }
        }
    }

    /// Delete an allocated database whose create call failed after the server
    /// may already have committed it.
    ///
    /// The allocated uid is not recorded anywhere, so a database left behind
    /// here would never be found again.
    async fn discard_unrecorded(&self, record: &Rdbc, uid: DatabaseUid) {
        match self.ctx.databases.exists(uid).await {
            Ok(true) => {
                self.compensate(
                    record,
                    uid,
                    "create failed after the database was committed",
                )
                .await;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::error!(
                    name = %record.name_any(),
                    uid = %uid,
                    error = %e,
                    "Could not check for a database left by a failed create"
                );
            }
        }
    }

    /// Best-effort delete of a database this reconcile just created.
    async fn compensate(&self, record: &Rdbc, uid: DatabaseUid, reason: &str) {
        tracing::warn!(
            name = %record.name_any(),
            uid = %uid,
            reason,
            "Deleting just-created database"
        );

        let result = self.ctx.databases.delete(uid).await;
        audit_logger().log_database_deletion(
            &uid.to_string(),
            &record.namespace().unwrap_or_default(),
            reason,
            if result.is_ok() { "success" } else { "error" },
        );

        if let Err(e) = result {
            tracing::error!(uid = %uid, error = %e, "Compensating delete failed");
        }
    }

    /// Write status if it differs from what is stored.
    async fn write_status(&self, record: Rdbc, status: RdbcStatus) -> OperatorResult<Rdbc> {
        if record.status.as_ref() == Some(&status) {
            return Ok(record);
        }
        self.ctx.records.patch_status(&record, &status).await
    }

    /// Put the error text on the latest stored record.
    async fn report_failure(&self, key: &RecordKey, error: &OperatorError) {
        let latest = match self.ctx.records.get(key).await {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(
                    record = %key,
                    error = %e,
                    "Could not reload Rdbc to report error"
                );
                return;
            }
        };

        let status = RdbcStatus {
            message: Some(error.to_string()),
            ..latest.status_or_default()
        };
        if let Err(e) = self.write_status(latest, status).await {
            tracing::warn!(record = %key, error = %e, "Could not write error status");
        }
    }
}

/// Handle errors during reconciliation.
///
/// Fatal errors wait for the Rdbc to change; everything else is retried.
pub fn error_policy(
    rdbc: Arc<Rdbc>,
    error: &OperatorError,
    _ctx: Arc<ControllerContext>,
) -> kube::runtime::controller::Action {
    if error.is_fatal() {
        tracing::error!(
            name = %rdbc.name_any(),
            error = %error,
            "Reconciliation failed permanently"
        );
        kube::runtime::controller::Action::await_change()
    } else {
        tracing::error!(name = %rdbc.name_any(), error = %error, "Reconciliation error");
        ReconcileAction::requeue_medium().into()
    }
}
