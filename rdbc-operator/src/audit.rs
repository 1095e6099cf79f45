//! Audit logging for security-relevant operator actions.
//!
//! Provides structured audit logs on the `audit` tracing target for:
//! - Reading the database API credential secret
//! - Publishing database credentials into application namespaces
//! - Deleting databases on the remote cluster

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Audit event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// API credential secret was read.
    CredentialResolve,
    /// Database credentials were written to a derived secret.
    CredentialProjection,
    /// A database was deleted on the remote cluster.
    DatabaseDeletion,
}

/// Audit event severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSeverity {
    /// Routine operation.
    Info,
    /// Failed or unusual operation.
    Warning,
}

/// Audit event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Timestamp in RFC3339 format.
    pub timestamp: String,
    /// Event type.
    pub event_type: AuditEventType,
    /// Severity level.
    pub severity: AuditSeverity,
    /// Service account that performed the action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Resource acted on (secret name, database uid).
    pub resource: String,
    /// Namespace of the resource or of the owning Rdbc.
    pub namespace: String,
    /// Outcome of the operation (success, error).
    pub outcome: String,
    /// Additional context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AuditEvent {
    /// Create a new audit event.
    pub fn new(
        event_type: AuditEventType,
        severity: AuditSeverity,
        resource: String,
        namespace: String,
        outcome: String,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            event_type,
            severity,
            subject: None,
            resource,
            namespace,
            outcome,
            message: None,
        }
    }

    /// Set the subject.
    pub fn with_subject(mut self, subject: String) -> Self {
        self.subject = Some(subject);
        self
    }

    /// Set the message.
    pub fn with_message(mut self, message: String) -> Self {
        self.message = Some(message);
        self
    }

    /// Log the audit event as JSON.
    pub fn log(&self) {
        let json = match serde_json::to_string(self) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize audit event");
                return;
            }
        };

        match self.severity {
            AuditSeverity::Info => {
                info!(
                    target: "audit",
                    event_type = ?self.event_type,
                    resource = %self.resource,
                    outcome = %self.outcome,
                    "{}",
                    json
                );
            }
            AuditSeverity::Warning => {
                warn!(
                    target: "audit",
                    event_type = ?self.event_type,
                    resource = %self.resource,
                    outcome = %self.outcome,
                    "{}",
                    json
                );
            }
        }
    }
}

fn severity_for(outcome: &str) -> AuditSeverity {
    if outcome == "success" {
        AuditSeverity::Info
    } else {
        AuditSeverity::Warning
    }
}

/// Audit logger for the operator.
pub struct AuditLogger {
    service_account: String,
}

impl AuditLogger {
    /// Create a new audit logger.
    pub fn new(service_account: String) -> Self {
        Self { service_account }
    }

    /// Log resolution of the API credential secret.
    pub fn log_credential_resolve(&self, secret_name: &str, namespace: &str, outcome: &str) {
        AuditEvent::new(
            AuditEventType::CredentialResolve,
            severity_for(outcome),
            secret_name.to_string(),
            namespace.to_string(),
            outcome.to_string(),
        )
        .with_subject(self.service_account.clone())
        .with_message("Resolved database API credentials".to_string())
        .log();
    }

    /// Log a write of database credentials into a derived secret.
    pub fn log_credential_projection(
        &self,
        secret_name: &str,
        namespace: &str,
        action: &str,
        outcome: &str,
    ) {
        AuditEvent::new(
            AuditEventType::CredentialProjection,
            severity_for(outcome),
            secret_name.to_string(),
            namespace.to_string(),
            outcome.to_string(),
        )
        .with_subject(self.service_account.clone())
        .with_message(format!("Credential secret {}", action))
        .log();
    }

    /// Log deletion of a database.
    pub fn log_database_deletion(&self, uid: &str, namespace: &str, reason: &str, outcome: &str) {
        AuditEvent::new(
            AuditEventType::DatabaseDeletion,
            severity_for(outcome),
            format!("bdb/{}", uid),
            namespace.to_string(),
            outcome.to_string(),
        )
        .with_subject(self.service_account.clone())
        .with_message(reason.to_string())
        .log();
    }
}

static AUDIT_LOGGER: once_cell::sync::Lazy<AuditLogger> = once_cell::sync::Lazy::new(|| {
    AuditLogger::new("system:serviceaccount:rdbc-system:rdbc-operator".to_string())
});

/// Get the process-wide audit logger.
pub fn audit_logger() -> &'static AuditLogger {
    &AUDIT_LOGGER
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_event_creation() {
        let event = AuditEvent::new(
            AuditEventType::CredentialProjection,
            AuditSeverity::Info,
            "cache1-redis-credentials".to_string(),
            "apps".to_string(),
            "success".to_string(),
        )
        .with_subject("test-operator".to_string())
        .with_message("Credential secret created".to_string());

        assert_eq!(event.resource, "cache1-redis-credentials");
        assert_eq!(event.namespace, "apps");
        assert_eq!(event.subject, Some("test-operator".to_string()));
    }

    #[test]
    fn test_audit_event_serialization() {
        let event = AuditEvent::new(
            AuditEventType::DatabaseDeletion,
            AuditSeverity::Warning,
            "bdb/42".to_string(),
            "apps".to_string(),
            "error".to_string(),
        );

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("database_deletion"));
        assert!(json.contains("bdb/42"));
        assert!(json.contains("warning"));
    }

    #[test]
    fn test_severity_follows_outcome() {
        assert_eq!(severity_for("success"), AuditSeverity::Info);
        assert_eq!(severity_for("error"), AuditSeverity::Warning);
    }
}
