//! The agent service facade.
//!
//! One [`Agent`] wires the registry, the stores, and the HTTP
//! collaborators together and exposes the verbs a command surface calls:
//! scanning, draft curation, publishing, gated execution, ask, and the
//! report/dashboard catalog. Credential-bearing state stays inside;
//! everything returned or logged from here is already redacted.

use crate::config::AgentConfig;
use crate::drafts::{DraftStore, JsonDraftStore};
use crate::dsn::resolve_dsn;
use crate::error::AgentError;
use crate::models::{
    Dashboard, DashboardPatch, Dialect, NewDashboard, NewReport, QueryOutput, Report, ReportPatch,
    SchemaDraft, TableDefinition, TableSelection,
};
use crate::publish::{publish_draft, CatalogApi, HttpCatalogClient};
use crate::registry::ConnectionRegistry;
use crate::reports::{
    visible_reports, DashboardStore, MemoryDashboardStore, MemoryReportStore, ReportStore,
};
use crate::translate::{HttpTranslator, Translator};
use crate::{executor, introspect, sqlgate, Result};
use serde::Serialize;
use std::sync::Arc;

/// One registry entry as shown to operators.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionListing {
    pub key: String,
    pub dialect: Dialect,
    /// Redacted DSN, or the resolver's complaint when the profile does
    /// not resolve.
    pub target: String,
}

/// What one `ask` round produced.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    /// SQL from the translator, already vetted by the gate.
    pub sql: String,
    pub explanation: Option<String>,
    pub output: QueryOutput,
}

/// The agent: every operation the outside world may trigger goes through
/// one of these methods.
pub struct Agent {
    config: AgentConfig,
    registry: ConnectionRegistry,
    drafts: Arc<dyn DraftStore>,
    catalog: Arc<dyn CatalogApi>,
    translator: Arc<dyn Translator>,
    reports: Arc<dyn ReportStore>,
    dashboards: Arc<dyn DashboardStore>,
}

impl Agent {
    /// Wires the production collaborators: the JSON-file registry, the
    /// file-backed draft store, the HTTP catalog client and translator,
    /// and in-memory report and dashboard stores.
    ///
    /// # Errors
    ///
    /// Fails when the registry or draft store file is unreadable or
    /// malformed, or when an HTTP client cannot be built from the catalog
    /// settings.
    pub fn from_config(config: AgentConfig) -> Result<Self> {
        let registry = ConnectionRegistry::load(&config.registry_path)?;
        let drafts = JsonDraftStore::open(&config.drafts_path)?;
        let catalog = HttpCatalogClient::new(&config.catalog, config.http_timeout)?;
        let translator = HttpTranslator::new(&config.catalog, config.http_timeout)?;
        Ok(Self::with_parts(
            config,
            registry,
            Arc::new(drafts),
            Arc::new(catalog),
            Arc::new(translator),
            Arc::new(MemoryReportStore::new()),
            Arc::new(MemoryDashboardStore::new()),
        ))
    }

    /// Wires explicit collaborators; tests substitute stubs here.
    #[must_use]
    pub fn with_parts(
        config: AgentConfig,
        registry: ConnectionRegistry,
        drafts: Arc<dyn DraftStore>,
        catalog: Arc<dyn CatalogApi>,
        translator: Arc<dyn Translator>,
        reports: Arc<dyn ReportStore>,
        dashboards: Arc<dyn DashboardStore>,
    ) -> Self {
        Self {
            config,
            registry,
            drafts,
            catalog,
            translator,
            reports,
            dashboards,
        }
    }

    /// Registered connections with redacted targets, in key order.
    #[must_use]
    pub fn connections(&self) -> Vec<ConnectionListing> {
        self.registry
            .all()
            .map(|(key, profile)| {
                let target = match resolve_dsn(profile) {
                    Ok(dsn) => dsn.redacted(),
                    Err(e) => format!("unresolvable: {e}"),
                };
                ConnectionListing {
                    key: key.to_string(),
                    dialect: profile.dialect,
                    target,
                }
            })
            .collect()
    }

    /// Introspects the client database behind a key and stages the result
    /// as the connection's draft, replacing any previous structure.
    ///
    /// # Errors
    ///
    /// Unknown key, connection failure, or table listing failure.
    pub async fn scan(&self, key: &str) -> Result<SchemaDraft> {
        let profile = self.registry.get(key)?;
        let structure = introspect::scan_structure(profile, &self.config).await?;
        self.drafts.upsert_after_scan(key, structure).await
    }

    /// Fetches the staged draft for a key.
    ///
    /// # Errors
    ///
    /// [`AgentError::DraftNotFound`] when nothing was scanned yet.
    pub async fn draft(&self, key: &str) -> Result<SchemaDraft> {
        self.drafts.get(key).await
    }

    /// Keys with a staged draft.
    pub async fn draft_keys(&self) -> Vec<String> {
        self.drafts.keys().await
    }

    /// Replaces the draft structure with a human-edited one and marks the
    /// draft out of sync.
    ///
    /// # Errors
    ///
    /// [`AgentError::DraftNotFound`] when nothing was scanned yet.
    pub async fn apply_edit(
        &self,
        key: &str,
        definitions: Vec<TableDefinition>,
    ) -> Result<SchemaDraft> {
        self.drafts.apply_human_edit(key, definitions).await
    }

    /// Changes one column label in the draft. A convenience built on
    /// [`Agent::apply_edit`]; `table` may be the qualified name or the
    /// bare table name.
    ///
    /// # Errors
    ///
    /// Names the table or column when either is not in the draft.
    pub async fn relabel(
        &self,
        key: &str,
        table: &str,
        column: &str,
        label: &str,
    ) -> Result<SchemaDraft> {
        let draft = self.drafts.get(key).await?;
        let mut structure = draft.structure;

        let table_def = structure
            .iter_mut()
            .find(|t| {
                t.table_name == table
                    || t.table_name
                        .split_once('.')
                        .is_some_and(|(_, bare)| bare == table)
            })
            .ok_or_else(|| {
                AgentError::configuration(format!("table '{table}' is not in the draft for '{key}'"))
            })?;
        let table_name = table_def.table_name.clone();

        let meta = table_def
            .column_metadata
            .iter_mut()
            .find(|c| c.col == column)
            .ok_or_else(|| {
                AgentError::configuration(format!(
                    "column '{column}' is not in table '{table_name}'"
                ))
            })?;
        meta.label = label.to_string();

        self.drafts.apply_human_edit(key, structure).await
    }

    /// Publishes the draft to the cloud catalog and records the returned
    /// ids. Complete success marks the draft synced and returns it; any
    /// per-table failure leaves it unsynced and surfaces as an error
    /// carrying the aggregated failure list, with the partial id map
    /// already recorded.
    ///
    /// # Errors
    ///
    /// Unknown key, missing draft, container rejection (nothing
    /// recorded), or a partial table batch.
    pub async fn publish(&self, key: &str) -> Result<SchemaDraft> {
        let profile = self.registry.get(key)?;
        let draft = self.drafts.get(key).await?;
        let expected = draft.structure.len();

        let outcome = publish_draft(self.catalog.as_ref(), profile, &draft).await?;
        let updated = self.drafts.record_publish_result(key, &outcome).await?;

        if !outcome.is_complete(expected) {
            let failures = outcome
                .failures
                .iter()
                .map(|f| format!("{}: {}", f.table, f.reason))
                .collect();
            return Err(AgentError::cloud_sync(
                format!(
                    "published {} of {expected} table(s) for '{key}'",
                    outcome.table_ids.len()
                ),
                failures,
            ));
        }
        Ok(updated)
    }

    /// Runs one read-only statement against the keyed connection.
    ///
    /// The gate vets the text before the key is even resolved, so a
    /// rejected statement never touches the registry or a database.
    ///
    /// # Errors
    ///
    /// [`AgentError::SqlRejected`], unknown key, or an execution failure.
    pub async fn execute(&self, key: &str, sql: &str) -> Result<QueryOutput> {
        sqlgate::ensure_read_only(sql)?;
        let profile = self.registry.get(key)?;
        executor::execute(profile, sql, &self.config).await
    }

    /// Answers a natural-language question against a published draft:
    /// translate, gate, execute.
    ///
    /// Translation context is built from the draft in structure order,
    /// one entry per published table with its full column list.
    ///
    /// # Errors
    ///
    /// Fails when the draft is missing, unsynced, or empty; when the
    /// translator fails; when the returned SQL is rejected by the gate;
    /// or when execution fails.
    pub async fn ask(&self, key: &str, question: &str) -> Result<Answer> {
        let profile = self.registry.get(key)?;
        let draft = self.drafts.get(key).await?;

        let refs = match (&draft.cloud_refs, draft.is_synced) {
            (Some(refs), true) => refs,
            _ => {
                return Err(AgentError::configuration(format!(
                    "draft for '{key}' is not synced with the catalog (publish it first)"
                )));
            }
        };

        let selections: Vec<TableSelection> = draft
            .structure
            .iter()
            .filter_map(|table| {
                refs.table_ids.get(&table.table_name).map(|&table_id| TableSelection {
                    table_id,
                    columns: table.column_metadata.iter().map(|c| c.col.clone()).collect(),
                })
            })
            .collect();

        if selections.is_empty() {
            return Err(AgentError::configuration(format!(
                "draft for '{key}' has no published tables to ask about"
            )));
        }

        let translation = self.translator.translate(question, &selections).await?;
        sqlgate::ensure_read_only(&translation.sql)?;
        let output = executor::execute(profile, &translation.sql, &self.config).await?;

        Ok(Answer {
            sql: translation.sql,
            explanation: translation.explanation,
            output,
        })
    }

    /// Saves a new report.
    ///
    /// # Errors
    ///
    /// Storage failure.
    pub async fn create_report(&self, new: NewReport) -> Result<Report> {
        self.reports.create(new).await
    }

    /// One newest-first page of reports the user may see.
    ///
    /// Pagination applies to the candidate fetch before the visibility
    /// filter, so the returned page may hold fewer than `limit` items.
    ///
    /// # Errors
    ///
    /// Storage failure.
    pub async fn list_visible_reports(
        &self,
        user: &str,
        role: Option<&str>,
        container: Option<i64>,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Report>> {
        let page = self.reports.list(skip, limit).await?;
        Ok(visible_reports(page, user, role, container))
    }

    /// Applies a partial update to a report.
    ///
    /// # Errors
    ///
    /// [`AgentError::ReportNotFound`] for an unknown id.
    pub async fn update_report(&self, id: i64, patch: ReportPatch) -> Result<Report> {
        self.reports.update(id, patch).await
    }

    /// Deletes a report.
    ///
    /// # Errors
    ///
    /// [`AgentError::ReportNotFound`] for an unknown id.
    pub async fn delete_report(&self, id: i64) -> Result<()> {
        self.reports.delete(id).await
    }

    /// Creates a dashboard.
    ///
    /// # Errors
    ///
    /// Storage failure.
    pub async fn create_dashboard(&self, new: NewDashboard) -> Result<Dashboard> {
        self.dashboards.create(new).await
    }

    /// The user's dashboards, newest first.
    ///
    /// # Errors
    ///
    /// Storage failure.
    pub async fn list_dashboards(&self, user: &str) -> Result<Vec<Dashboard>> {
        self.dashboards.list(user).await
    }

    /// Applies a partial update to a dashboard.
    ///
    /// # Errors
    ///
    /// [`AgentError::DashboardNotFound`] for an unknown id.
    pub async fn update_dashboard(&self, id: i64, patch: DashboardPatch) -> Result<Dashboard> {
        self.dashboards.update(id, patch).await
    }

    /// Deletes a dashboard and cascades to its embedded reports.
    ///
    /// # Errors
    ///
    /// [`AgentError::DashboardNotFound`] for an unknown id.
    pub async fn delete_dashboard(&self, id: i64) -> Result<()> {
        let dashboard = self.dashboards.get(id).await?;
        self.dashboards.delete(id).await?;
        let removed = self.reports.delete_for_dashboard(id).await?;
        tracing::info!(
            "deleted dashboard {id} ('{}') and {removed} embedded report(s)",
            dashboard.title
        );
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::CatalogConfig;
    use crate::drafts::MemoryDraftStore;
    use crate::models::{ColumnMeta, ConnectionProfile, ReportScope};
    use crate::translate::Translation;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    struct NullCatalog;

    #[async_trait]
    impl CatalogApi for NullCatalog {
        async fn create_schema(
            &self,
            _name: &str,
            _dialect: Dialect,
            _database_name_prefix: &str,
        ) -> Result<i64> {
            Ok(1)
        }

        async fn create_schema_table(
            &self,
            _schema_id: i64,
            _table: &TableDefinition,
        ) -> Result<i64> {
            Ok(1)
        }
    }

    struct CannedTranslator;

    #[async_trait]
    impl Translator for CannedTranslator {
        async fn translate(
            &self,
            _question: &str,
            _tables: &[TableSelection],
        ) -> Result<Translation> {
            Ok(Translation {
                sql: "SELECT 1".to_string(),
                explanation: None,
            })
        }
    }

    fn test_config() -> AgentConfig {
        AgentConfig::new(
            PathBuf::from("connections.json"),
            CatalogConfig {
                base_url: "https://catalog.example.com".to_string(),
                token: "tok".to_string(),
            },
        )
    }

    fn mysql_profile() -> ConnectionProfile {
        serde_json::from_value(serde_json::json!({
            "dialect": "mysql",
            "username": "obi",
            "password": "obi$2025",
            "host": "db.client.lan",
            "port": 3306,
            "dbname": "traro"
        }))
        .unwrap()
    }

    fn table_def() -> TableDefinition {
        TableDefinition {
            table_name: "traro.casos".to_string(),
            definition: "CREATE TABLE traro.casos (\n  id INT NOT NULL PRIMARY KEY,\n);"
                .to_string(),
            column_metadata: vec![ColumnMeta {
                col: "id".to_string(),
                data_type: "INT".to_string(),
                label: "Identificador".to_string(),
                is_default: true,
            }],
        }
    }

    fn agent(registry: ConnectionRegistry, drafts: Arc<MemoryDraftStore>) -> Agent {
        Agent::with_parts(
            test_config(),
            registry,
            drafts,
            Arc::new(NullCatalog),
            Arc::new(CannedTranslator),
            Arc::new(MemoryReportStore::new()),
            Arc::new(MemoryDashboardStore::new()),
        )
    }

    #[tokio::test]
    async fn test_execute_gates_before_resolving_the_key() {
        let agent = agent(ConnectionRegistry::default(), Arc::new(MemoryDraftStore::new()));

        // The key does not exist either, but the gate speaks first.
        let err = agent.execute("nope", "DROP TABLE clients").await.unwrap_err();
        assert!(matches!(err, AgentError::SqlRejected { .. }));
    }

    #[tokio::test]
    async fn test_ask_requires_a_synced_draft() {
        let mut entries = BTreeMap::new();
        entries.insert("traro_cases".to_string(), mysql_profile());
        let drafts = Arc::new(MemoryDraftStore::new());
        drafts
            .upsert_after_scan("traro_cases", vec![table_def()])
            .await
            .unwrap();

        let agent = agent(ConnectionRegistry::from_entries(entries), drafts);
        let err = agent.ask("traro_cases", "¿cuántos casos?").await.unwrap_err();
        assert!(err.to_string().contains("publish it first"));
    }

    #[tokio::test]
    async fn test_relabel_edits_one_label_and_unsyncs() {
        let drafts = Arc::new(MemoryDraftStore::new());
        drafts
            .upsert_after_scan("traro_cases", vec![table_def()])
            .await
            .unwrap();
        let agent = agent(ConnectionRegistry::default(), drafts);

        // Bare table name resolves against the qualified one.
        let updated = agent
            .relabel("traro_cases", "casos", "id", "Clave")
            .await
            .unwrap();
        assert_eq!(updated.structure[0].column_metadata[0].label, "Clave");
        assert!(!updated.is_synced);

        let err = agent
            .relabel("traro_cases", "casos", "missing_col", "X")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing_col"));

        let err = agent
            .relabel("traro_cases", "facturas", "id", "X")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("facturas"));
    }

    #[tokio::test]
    async fn test_delete_dashboard_cascades_to_embedded_reports() {
        let agent = agent(ConnectionRegistry::default(), Arc::new(MemoryDraftStore::new()));

        let dashboard = agent
            .create_dashboard(NewDashboard {
                title: "panel".to_string(),
                user_identifier: "a".to_string(),
                layout: serde_json::Value::Null,
                context_definition: Vec::new(),
            })
            .await
            .unwrap();

        for name in ["embedded 1", "embedded 2"] {
            agent
                .create_report(NewReport {
                    name: name.to_string(),
                    user_identifier: "a".to_string(),
                    report_type: "table".to_string(),
                    scope: ReportScope::Personal,
                    scope_target: Vec::new(),
                    question: None,
                    sql_query: "SELECT 1".to_string(),
                    dashboard_id: Some(dashboard.id),
                    conversation_id: None,
                })
                .await
                .unwrap();
        }
        agent
            .create_report(NewReport {
                name: "libre".to_string(),
                user_identifier: "a".to_string(),
                report_type: "table".to_string(),
                scope: ReportScope::Personal,
                scope_target: Vec::new(),
                question: None,
                sql_query: "SELECT 1".to_string(),
                dashboard_id: None,
                conversation_id: None,
            })
            .await
            .unwrap();

        agent.delete_dashboard(dashboard.id).await.unwrap();

        let remaining = agent
            .list_visible_reports("a", None, None, 0, 100)
            .await
            .unwrap();
        let names: Vec<String> = remaining.into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["libre".to_string()]);
    }

    #[tokio::test]
    async fn test_connections_listing_redacts_passwords() {
        let mut entries = BTreeMap::new();
        entries.insert("traro_cases".to_string(), mysql_profile());
        let agent = agent(
            ConnectionRegistry::from_entries(entries),
            Arc::new(MemoryDraftStore::new()),
        );

        let listing = agent.connections();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].key, "traro_cases");
        assert!(listing[0].target.contains("****"));
        assert!(!listing[0].target.contains("obi%242025"));
        assert!(!listing[0].target.contains("obi$2025"));
    }
}
