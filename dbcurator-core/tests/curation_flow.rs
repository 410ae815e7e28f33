//! End-to-end curation pipeline over the public API.
//!
//! Stage a scanned structure, curate a label, publish, and ask, with the
//! catalog and translator stubbed out, so everything here runs without a
//! database or network. The draft store is the file-backed one, and the
//! reopen steps mirror how state crosses one-shot agent invocations.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use async_trait::async_trait;
use dbcurator_core::config::{AgentConfig, CatalogConfig};
use dbcurator_core::drafts::{DraftStore, JsonDraftStore};
use dbcurator_core::publish::CatalogApi;
use dbcurator_core::registry::ConnectionRegistry;
use dbcurator_core::reports::{MemoryDashboardStore, MemoryReportStore};
use dbcurator_core::translate::{Translation, Translator};
use dbcurator_core::{
    Agent, AgentError, ColumnMeta, ConnectionProfile, Dialect, Result, TableDefinition,
    TableSelection,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SENSITIVE_PASSWORD: &str = "obi$2025-secret";

/// Catalog stub that records every call and can reject named tables.
struct RecordingCatalog {
    reject: Mutex<Vec<String>>,
    calls: Mutex<Vec<String>>,
    published: Mutex<Vec<TableDefinition>>,
    next_id: Mutex<i64>,
}

impl RecordingCatalog {
    fn accepting() -> Self {
        Self {
            reject: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
            next_id: Mutex::new(100),
        }
    }

    fn rejecting(tables: &[&str]) -> Self {
        let stub = Self::accepting();
        *stub.reject.lock().unwrap() = tables.iter().map(ToString::to_string).collect();
        stub
    }
}

#[async_trait]
impl CatalogApi for RecordingCatalog {
    async fn create_schema(
        &self,
        name: &str,
        dialect: Dialect,
        database_name_prefix: &str,
    ) -> Result<i64> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("schema:{name}:{}:{database_name_prefix}", dialect.as_tag()));
        Ok(500)
    }

    async fn create_schema_table(&self, schema_id: i64, table: &TableDefinition) -> Result<i64> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("table:{schema_id}:{}", table.table_name));
        if self.reject.lock().unwrap().contains(&table.table_name) {
            return Err(AgentError::cloud_sync(
                "422 Unprocessable Entity".to_string(),
                Vec::new(),
            ));
        }
        self.published.lock().unwrap().push(table.clone());
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        Ok(*next)
    }
}

/// Translator stub returning a canned statement, recording each request.
struct RecordingTranslator {
    sql: String,
    requests: Mutex<Vec<(String, Vec<TableSelection>)>>,
}

impl RecordingTranslator {
    fn answering(sql: &str) -> Self {
        Self {
            sql: sql.to_string(),
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Translator for RecordingTranslator {
    async fn translate(&self, question: &str, tables: &[TableSelection]) -> Result<Translation> {
        self.requests
            .lock()
            .unwrap()
            .push((question.to_string(), tables.to_vec()));
        Ok(Translation {
            sql: self.sql.clone(),
            explanation: Some("generated".to_string()),
        })
    }
}

fn profile() -> ConnectionProfile {
    serde_json::from_value(serde_json::json!({
        "dialect": "mysql",
        "username": "obi",
        "password": SENSITIVE_PASSWORD,
        "host": "127.0.0.1",
        "port": 1,
        "dbname": "traro"
    }))
    .unwrap()
}

fn registry() -> ConnectionRegistry {
    let mut entries = BTreeMap::new();
    entries.insert("traro_cases".to_string(), profile());
    ConnectionRegistry::from_entries(entries)
}

fn config(dir: &Path) -> AgentConfig {
    let mut config = AgentConfig::new(
        dir.join("connections.json"),
        CatalogConfig {
            base_url: "http://localhost:1".to_string(),
            token: "test-token".to_string(),
        },
    );
    config.drafts_path = dir.join("drafts.json");
    config.connect_timeout = Duration::from_millis(200);
    config.query_timeout = Duration::from_secs(1);
    config
}

fn table(name: &str, cols: &[(&str, &str)]) -> TableDefinition {
    TableDefinition {
        table_name: name.to_string(),
        definition: format!("CREATE TABLE {name} (\n  id INT,\n);"),
        column_metadata: cols
            .iter()
            .map(|(col, label)| ColumnMeta {
                col: (*col).to_string(),
                data_type: "INT".to_string(),
                label: (*label).to_string(),
                is_default: true,
            })
            .collect(),
    }
}

fn agent_with(
    dir: &Path,
    drafts: Arc<JsonDraftStore>,
    catalog: Arc<RecordingCatalog>,
    translator: Arc<RecordingTranslator>,
) -> Agent {
    Agent::with_parts(
        config(dir),
        registry(),
        drafts,
        catalog,
        translator,
        Arc::new(MemoryReportStore::new()),
        Arc::new(MemoryDashboardStore::new()),
    )
}

async fn staged_store(dir: &Path) -> Arc<JsonDraftStore> {
    let drafts = Arc::new(JsonDraftStore::open(dir.join("drafts.json")).unwrap());
    drafts
        .upsert_after_scan(
            "traro_cases",
            vec![
                table(
                    "traro.casos",
                    &[("id", "Identificador"), ("fecha_ingreso", "Fecha Ingreso")],
                ),
                table("traro.expedientes", &[("id", "Identificador")]),
            ],
        )
        .await
        .unwrap();
    drafts
}

#[tokio::test]
async fn test_relabel_then_publish_lands_curated_labels() {
    let dir = tempfile::tempdir().unwrap();
    let drafts = staged_store(dir.path()).await;
    let catalog = Arc::new(RecordingCatalog::accepting());
    let translator = Arc::new(RecordingTranslator::answering("SELECT 1"));
    let agent = agent_with(dir.path(), drafts, Arc::clone(&catalog), translator);

    agent
        .relabel("traro_cases", "casos", "fecha_ingreso", "Fecha de Ingreso")
        .await
        .unwrap();

    let published = agent.publish("traro_cases").await.unwrap();
    assert!(published.is_synced);
    let refs = published.cloud_refs.clone().unwrap();
    assert_eq!(refs.schema_id, 500);
    assert_eq!(refs.table_ids.len(), 2);

    // Container first, then tables in draft order.
    let calls = catalog.calls.lock().unwrap().clone();
    assert_eq!(calls[0], "schema:BD Cliente: traro:mysql:traro");
    assert_eq!(calls[1], "table:500:traro.casos");
    assert_eq!(calls[2], "table:500:traro.expedientes");

    // The curated label is what went over the wire.
    let sent = catalog.published.lock().unwrap().clone();
    let casos = sent.iter().find(|t| t.table_name == "traro.casos").unwrap();
    let label = &casos
        .column_metadata
        .iter()
        .find(|c| c.col == "fecha_ingreso")
        .unwrap()
        .label;
    assert_eq!(label, "Fecha de Ingreso");

    // A later invocation reopens the same file and sees the synced state.
    drop(agent);
    let reopened = JsonDraftStore::open(dir.path().join("drafts.json")).unwrap();
    let draft = reopened.get("traro_cases").await.unwrap();
    assert!(draft.is_synced);
    assert_eq!(draft.cloud_refs.unwrap().schema_id, 500);
}

#[tokio::test]
async fn test_partial_publish_errors_then_retry_completes() {
    let dir = tempfile::tempdir().unwrap();
    let drafts = staged_store(dir.path()).await;
    let catalog = Arc::new(RecordingCatalog::rejecting(&["traro.expedientes"]));
    let translator = Arc::new(RecordingTranslator::answering("SELECT 1"));
    let agent = agent_with(
        dir.path(),
        Arc::clone(&drafts),
        Arc::clone(&catalog),
        translator,
    );

    let err = agent.publish("traro_cases").await.unwrap_err();
    match &err {
        AgentError::CloudSync { context, failures } => {
            assert!(context.contains("published 1 of 2"), "context: {context}");
            assert!(failures[0].contains("traro.expedientes"));
        }
        other => panic!("expected CloudSync, got {other:?}"),
    }

    // The accepted table kept its id even though the publish errored.
    let partial = drafts.get("traro_cases").await.unwrap();
    assert!(!partial.is_synced);
    let refs = partial.cloud_refs.clone().unwrap();
    assert_eq!(refs.table_ids.len(), 1);
    assert!(refs.table_ids.contains_key("traro.casos"));

    // Retry with the rejection gone completes the sync.
    catalog.reject.lock().unwrap().clear();
    let retried = agent.publish("traro_cases").await.unwrap();
    assert!(retried.is_synced);
    assert_eq!(retried.cloud_refs.unwrap().table_ids.len(), 2);
}

#[tokio::test]
async fn test_ask_vets_translated_sql() {
    let dir = tempfile::tempdir().unwrap();
    let drafts = staged_store(dir.path()).await;
    let catalog = Arc::new(RecordingCatalog::accepting());
    let translator = Arc::new(RecordingTranslator::answering("DELETE FROM casos"));
    let agent = agent_with(dir.path(), drafts, catalog, translator);

    agent.publish("traro_cases").await.unwrap();

    // The translator's output goes through the same gate as raw queries.
    let err = agent
        .ask("traro_cases", "borra todos los casos")
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::SqlRejected { .. }));
}

#[cfg(feature = "mysql")]
#[tokio::test]
async fn test_ask_carries_published_context_and_redacts_failures() {
    let dir = tempfile::tempdir().unwrap();
    let drafts = staged_store(dir.path()).await;
    let catalog = Arc::new(RecordingCatalog::accepting());
    let translator = Arc::new(RecordingTranslator::answering("SELECT id FROM casos"));
    let agent = agent_with(
        dir.path(),
        Arc::clone(&drafts),
        catalog,
        Arc::clone(&translator),
    );

    agent.publish("traro_cases").await.unwrap();
    let refs = drafts
        .get("traro_cases")
        .await
        .unwrap()
        .cloud_refs
        .unwrap();

    // Port 1 refuses the connection, so ask fails at execution, after
    // the translator has already been called with the published context.
    let err = agent
        .ask("traro_cases", "cuantos casos hay")
        .await
        .unwrap_err();

    let requests = translator.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    let (question, selections) = &requests[0];
    assert_eq!(question, "cuantos casos hay");
    assert_eq!(selections.len(), 2);
    assert_eq!(selections[0].table_id, refs.table_ids["traro.casos"]);
    assert_eq!(selections[0].columns, vec!["id", "fecha_ingreso"]);
    assert_eq!(selections[1].table_id, refs.table_ids["traro.expedientes"]);

    let rendered = format!("{err} / {err:?}");
    assert!(
        !rendered.contains(SENSITIVE_PASSWORD),
        "password leaked in ask error: {rendered}"
    );
    assert!(!rendered.contains("obi%242025-secret"));
    assert!(rendered.contains("****"));
}
