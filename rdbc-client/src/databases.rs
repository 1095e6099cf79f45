//! Database (bdb) operations.

use crate::client::Client;
use crate::error::{ClientError, Result};
use crate::types::{CreateDatabase, DatabaseInfo, DatabaseType, DatabaseUid, Endpoint};
use reqwest::StatusCode;
use serde::Deserialize;

/// Response from creating a database. Only the assigned uid is used.
#[derive(Debug, Deserialize)]
struct CreateResponse {
    uid: u32,
}

/// Response from getting a single database.
#[derive(Debug, Deserialize)]
struct GetResponse {
    uid: u32,
    name: String,
    #[serde(rename = "type")]
    database_type: DatabaseType,
    memory_size: u64,
    #[serde(default)]
    authentication_redis_pass: Option<String>,
    #[serde(default)]
    endpoints: Vec<EndpointResponse>,
}

#[derive(Debug, Deserialize)]
struct EndpointResponse {
    dns_name: String,
    port: u16,
}

fn uid_from_response(raw: u32) -> Result<DatabaseUid> {
    DatabaseUid::new(raw)
        .ok_or_else(|| ClientError::InvalidResponse(format!("server returned invalid uid {}", raw)))
}

impl Client {
    /// Check whether a database with the given uid exists.
    ///
    /// A 404 maps to `false`; any other non-success status is an error.
    pub async fn database_exists(&self, uid: DatabaseUid) -> Result<bool> {
        let response = self.get(&format!("bdbs/{}", uid)).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }

        self.handle_empty_response(response).await?;
        Ok(true)
    }

    /// Create a database and return the uid the server assigned.
    ///
    /// # Errors
    ///
    /// Any status of 300 or above is returned as [`ClientError::Api`] carrying
    /// the response body.
    pub async fn create_database(&self, request: &CreateDatabase) -> Result<DatabaseUid> {
        tracing::info!(
            uid = %request.uid,
            name = %request.name,
            memory_size = request.memory_size,
            "Creating database"
        );

        let response = self.post("bdbs", request).await?;
        let created: CreateResponse = self.handle_response(response).await?;

        uid_from_response(created.uid)
    }

    /// Fetch a database.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Api`] with status 404 when the database does not
    /// exist, and [`ClientError::InvalidResponse`] when the server lists no
    /// endpoints or no password.
    pub async fn get_database(&self, uid: DatabaseUid) -> Result<DatabaseInfo> {
        let response = self.get(&format!("bdbs/{}", uid)).await?;
        let db: GetResponse = self.handle_response(response).await?;

        let endpoint = db
            .endpoints
            .into_iter()
            .next()
            .map(|ep| Endpoint {
                host: ep.dns_name,
                port: ep.port,
            })
            .ok_or_else(|| {
                ClientError::InvalidResponse(format!("endpoints list is empty for database {}", uid))
            })?;

        let password = db.authentication_redis_pass.ok_or_else(|| {
            ClientError::InvalidResponse(format!("database {} has no password", uid))
        })?;

        tracing::debug!(uid = %uid, endpoint = %endpoint, "Fetched database");

        Ok(DatabaseInfo {
            uid: uid_from_response(db.uid)?,
            name: db.name,
            database_type: db.database_type,
            memory_size: db.memory_size,
            password,
            endpoint,
        })
    }

    /// Delete a database. Deleting a database that is already gone succeeds.
    pub async fn delete_database(&self, uid: DatabaseUid) -> Result<()> {
        let response = self.delete(&format!("bdbs/{}", uid)).await?;

        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!(uid = %uid, "Database already absent");
            return Ok(());
        }

        self.handle_empty_response(response).await?;
        tracing::info!(uid = %uid, "Deleted database");
        Ok(())
    }
}
