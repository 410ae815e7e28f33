//! Two-phase draft publishing to the cloud catalog.
//!
//! Phase 1 creates (or reuses) the schema container; a rejection here
//! aborts the whole publish. Phase 2 pushes one request per table,
//! collecting per-table failures while the loop continues, so a single bad
//! table never blocks the rest. The aggregated [`PublishOutcome`] carries
//! successes and failures together; deciding what that means for the
//! draft's sync flag is the caller's job.

use crate::config::CatalogConfig;
use crate::error::AgentError;
use crate::models::{
    ColumnMeta, ConnectionProfile, Dialect, PublishFailure, PublishOutcome, SchemaDraft,
    TableDefinition,
};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Catalog endpoints the publisher needs.
///
/// Production traffic goes through [`HttpCatalogClient`]; tests substitute
/// their own implementation.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    /// Creates or reuses the schema container, returning its id.
    async fn create_schema(
        &self,
        name: &str,
        dialect: Dialect,
        database_name_prefix: &str,
    ) -> Result<i64>;

    /// Registers one table under a container, returning the table id.
    async fn create_schema_table(&self, schema_id: i64, table: &TableDefinition) -> Result<i64>;
}

#[derive(Serialize)]
struct SchemaPayload<'a> {
    name: &'a str,
    dialect: &'a str,
    database_name_prefix: &'a str,
}

#[derive(Serialize)]
struct SchemaTablePayload<'a> {
    schema_id: i64,
    table_name: &'a str,
    definition: &'a str,
    column_metadata: &'a [ColumnMeta],
}

#[derive(Deserialize)]
struct IdEnvelope {
    data: IdData,
}

#[derive(Deserialize)]
struct IdData {
    id: i64,
}

/// Bearer-authenticated catalog client.
///
/// # Security
/// The token lives inside the client and is attached per request; it never
/// appears in errors or logs.
pub struct HttpCatalogClient {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl HttpCatalogClient {
    /// Builds a client with the configured per-call timeout.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the underlying HTTP client
    /// cannot be constructed.
    pub fn new(catalog: &CatalogConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                AgentError::configuration(format!("failed to build catalog HTTP client: {e}"))
            })?;

        Ok(Self {
            base_url: catalog.trimmed_base().to_string(),
            token: catalog.token.clone(),
            client,
        })
    }

    async fn post_for_id<T: Serialize + Sync>(&self, path: &str, payload: &T) -> Result<i64> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                AgentError::cloud_sync(format!("POST {path} failed: {e}"), Vec::new())
            })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK && status != reqwest::StatusCode::CREATED {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::cloud_sync(
                format!("POST {path} returned {status}: {body}"),
                Vec::new(),
            ));
        }

        let envelope: IdEnvelope = response.json().await.map_err(|e| {
            AgentError::cloud_sync(
                format!("POST {path} returned an unexpected body (no data.id): {e}"),
                Vec::new(),
            )
        })?;

        Ok(envelope.data.id)
    }
}

#[async_trait]
impl CatalogApi for HttpCatalogClient {
    async fn create_schema(
        &self,
        name: &str,
        dialect: Dialect,
        database_name_prefix: &str,
    ) -> Result<i64> {
        self.post_for_id(
            "/api/schemas",
            &SchemaPayload {
                name,
                dialect: dialect.as_tag(),
                database_name_prefix,
            },
        )
        .await
    }

    async fn create_schema_table(&self, schema_id: i64, table: &TableDefinition) -> Result<i64> {
        self.post_for_id(
            "/api/schema-tables",
            &SchemaTablePayload {
                schema_id,
                table_name: &table.table_name,
                definition: &table.definition,
                column_metadata: &table.column_metadata,
            },
        )
        .await
    }
}

/// Unwraps the publisher's own context from a catalog error so per-table
/// failure reasons read cleanly.
fn failure_reason(error: &AgentError) -> String {
    match error {
        AgentError::CloudSync { context, .. } => context.clone(),
        other => other.to_string(),
    }
}

/// Publishes a draft: container first, then one request per table.
///
/// # Errors
///
/// Phase-1 rejection aborts the publish and surfaces as
/// [`AgentError::CloudSync`]. Phase-2 failures do **not** error here; they
/// are aggregated into the returned outcome.
pub async fn publish_draft(
    api: &dyn CatalogApi,
    profile: &ConnectionProfile,
    draft: &SchemaDraft,
) -> Result<PublishOutcome> {
    let container_name = format!("BD Cliente: {}", profile.dbname);

    tracing::info!(
        "publishing draft '{}': {} table(s) to container '{}'",
        draft.connection_key,
        draft.structure.len(),
        container_name
    );

    let schema_id = api
        .create_schema(&container_name, profile.dialect, &profile.dbname)
        .await?;
    tracing::info!("schema container ready (id {schema_id})");

    let mut table_ids = BTreeMap::new();
    let mut failures = Vec::new();

    for table in &draft.structure {
        match api.create_schema_table(schema_id, table).await {
            Ok(id) => {
                tracing::debug!("table '{}' accepted (id {id})", table.table_name);
                table_ids.insert(table.table_name.clone(), id);
            }
            Err(e) => {
                let reason = failure_reason(&e);
                tracing::warn!("table '{}' rejected: {}", table.table_name, reason);
                failures.push(PublishFailure {
                    table: table.table_name.clone(),
                    reason,
                });
            }
        }
    }

    tracing::info!(
        "publish finished: {} accepted, {} failed",
        table_ids.len(),
        failures.len()
    );

    Ok(PublishOutcome {
        schema_id,
        table_ids,
        failures,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::models::ColumnMeta;
    use std::sync::Mutex;

    struct StubCatalog {
        schema_result: std::result::Result<i64, String>,
        reject_tables: Vec<String>,
        calls: Mutex<Vec<String>>,
    }

    impl StubCatalog {
        fn accepting() -> Self {
            Self {
                schema_result: Ok(77),
                reject_tables: Vec::new(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CatalogApi for StubCatalog {
        async fn create_schema(
            &self,
            name: &str,
            _dialect: Dialect,
            _database_name_prefix: &str,
        ) -> Result<i64> {
            self.calls.lock().unwrap().push(format!("schema:{name}"));
            match &self.schema_result {
                Ok(id) => Ok(*id),
                Err(reason) => Err(AgentError::cloud_sync(reason.clone(), Vec::new())),
            }
        }

        async fn create_schema_table(
            &self,
            schema_id: i64,
            table: &TableDefinition,
        ) -> Result<i64> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("table:{}", table.table_name));
            if self.reject_tables.contains(&table.table_name) {
                return Err(AgentError::cloud_sync(
                    "422 Unprocessable Entity".to_string(),
                    Vec::new(),
                ));
            }
            let suffix = i64::try_from(table.table_name.len()).unwrap();
            Ok(schema_id * 100 + suffix)
        }
    }

    fn profile() -> ConnectionProfile {
        serde_json::from_value(serde_json::json!({
            "dialect": "mariadb",
            "username": "obi",
            "password": "obi$2025",
            "host": "db.client.lan",
            "port": 3306,
            "dbname": "traro"
        }))
        .unwrap()
    }

    fn draft(tables: &[&str]) -> SchemaDraft {
        SchemaDraft {
            connection_key: "traro_cases".to_string(),
            structure: tables
                .iter()
                .map(|name| TableDefinition {
                    table_name: (*name).to_string(),
                    definition: format!("CREATE TABLE {name} (\n  id INT PRIMARY KEY,\n);"),
                    column_metadata: vec![ColumnMeta {
                        col: "id".to_string(),
                        data_type: "INT".to_string(),
                        label: "Identificador".to_string(),
                        is_default: true,
                    }],
                })
                .collect(),
            cloud_refs: None,
            is_synced: false,
            last_scanned_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_container_rejection_aborts_before_tables() {
        let api = StubCatalog {
            schema_result: Err("401 Unauthorized".to_string()),
            ..StubCatalog::accepting()
        };

        let err = publish_draft(&api, &profile(), &draft(&["traro.a", "traro.b"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cloud sync failed"));

        let calls = api.calls.lock().unwrap();
        assert_eq!(calls.len(), 1, "no table call may happen: {calls:?}");
    }

    #[tokio::test]
    async fn test_per_table_failures_do_not_stop_the_loop() {
        let api = StubCatalog {
            reject_tables: vec!["traro.b".to_string()],
            ..StubCatalog::accepting()
        };

        let outcome = publish_draft(&api, &profile(), &draft(&["traro.a", "traro.b", "traro.c"]))
            .await
            .unwrap();

        assert_eq!(outcome.schema_id, 77);
        assert_eq!(outcome.table_ids.len(), 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].table, "traro.b");
        assert!(outcome.failures[0].reason.contains("422"));
        assert!(!outcome.is_complete(3));

        // All three tables were attempted despite the middle failure.
        let calls = api.calls.lock().unwrap();
        assert_eq!(calls.len(), 4);
    }

    #[tokio::test]
    async fn test_complete_publish() {
        let api = StubCatalog::accepting();
        let outcome = publish_draft(&api, &profile(), &draft(&["traro.a"]))
            .await
            .unwrap();

        assert!(outcome.is_complete(1));
        assert!(outcome.failures.is_empty());
    }

    #[test]
    fn test_container_payload_shape() {
        let payload = SchemaPayload {
            name: "BD Cliente: traro",
            dialect: "mariadb",
            database_name_prefix: "traro",
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["name"], "BD Cliente: traro");
        assert_eq!(value["dialect"], "mariadb");
        assert_eq!(value["database_name_prefix"], "traro");
    }
}
