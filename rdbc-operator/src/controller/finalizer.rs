//! Deletion guard for Rdbc records.
//!
//! The finalizer is attached before any database is created and removed only
//! after the database is confirmed gone, so deleting an Rdbc never leaves an
//! orphaned database behind.

use super::ControllerContext;
use crate::audit::audit_logger;
use crate::crd::{DATABASE_FINALIZER, Rdbc};
use crate::error::OperatorResult;
use kube::ResourceExt;
use rdbc_client::DatabaseUid;
use std::sync::Arc;

/// Where a record stands in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// No database recorded yet.
    New,
    /// Bound to a database.
    Bound(DatabaseUid),
    /// Deletion requested, cleanup still owed.
    Deleting,
    /// Deletion requested and nothing left for this controller to do.
    Terminated,
}

impl Lifecycle {
    /// Classify a record.
    ///
    /// Deletion takes precedence over everything else. The uid annotation is
    /// only parsed for live records.
    pub fn observe(record: &Rdbc) -> OperatorResult<Self> {
        if record.deletion_requested() {
            return Ok(if record.has_finalizer() {
                Lifecycle::Deleting
            } else {
                Lifecycle::Terminated
            });
        }

        Ok(match record.database_uid()? {
            Some(uid) => Lifecycle::Bound(uid),
            None => Lifecycle::New,
        })
    }
}

/// Result of remote cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cleanup {
    /// No uid was ever recorded.
    NothingToDelete,
    /// The recorded database was already gone.
    AlreadyAbsent(DatabaseUid),
    /// The recorded database was deleted.
    Deleted(DatabaseUid),
}

/// Attaches and releases the cleanup finalizer.
#[derive(Clone)]
pub struct FinalizerManager {
    ctx: Arc<ControllerContext>,
}

impl FinalizerManager {
    /// Create a new finalizer manager.
    pub fn new(ctx: Arc<ControllerContext>) -> Self {
        Self { ctx }
    }

    /// Make sure the finalizer is present, returning the stored record.
    pub async fn attach(&self, record: &Rdbc) -> OperatorResult<Rdbc> {
        if record.has_finalizer() {
            return Ok(record.clone());
        }

        tracing::debug!(
            name = %record.name_any(),
            namespace = ?record.namespace(),
            "Adding finalizer"
        );

        let mut updated = record.clone();
        updated.finalizers_mut().push(DATABASE_FINALIZER.to_string());
        self.ctx.records.replace(&updated).await
    }

    /// Delete the recorded database, if any.
    ///
    /// Safe to repeat: a database that is already gone counts as cleaned up.
    pub async fn cleanup(&self, record: &Rdbc) -> OperatorResult<Cleanup> {
        let Some(uid) = record.database_uid()? else {
            tracing::info!(
                name = %record.name_any(),
                "No database recorded, nothing to delete"
            );
            return Ok(Cleanup::NothingToDelete);
        };

        if !self.ctx.databases.exists(uid).await? {
            tracing::info!(name = %record.name_any(), uid = %uid, "Database already absent");
            return Ok(Cleanup::AlreadyAbsent(uid));
        }

        let namespace = record.namespace().unwrap_or_default();
        let result = self.ctx.databases.delete(uid).await;
        audit_logger().log_database_deletion(
            &uid.to_string(),
            &namespace,
            &format!("Rdbc {} deleted", record.name_any()),
            if result.is_ok() { "success" } else { "error" },
        );
        result?;

        tracing::info!(name = %record.name_any(), uid = %uid, "Database deleted");
        Ok(Cleanup::Deleted(uid))
    }

    /// Remove the finalizer so the record can go away.
    pub async fn release(&self, record: &Rdbc) -> OperatorResult<()> {
        if !record.has_finalizer() {
            return Ok(());
        }

        let mut updated = record.clone();
        updated.finalizers_mut().retain(|f| f != DATABASE_FINALIZER);
        self.ctx.records.replace(&updated).await?;

        tracing::info!(name = %record.name_any(), "Finalizer removed");
        Ok(())
    }
}
