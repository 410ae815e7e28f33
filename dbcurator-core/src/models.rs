//! Core data structures for schema curation, publishing, and reporting.
//!
//! Everything that crosses a module boundary lives here: registry profiles,
//! scanned table structures, drafts, publish outcomes, reports, and query
//! results. Structures are typed end to end; JSON appears only at storage
//! and wire boundaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use zeroize::Zeroize;

use crate::error::AgentError;

/// Supported client database engines.
///
/// The set is closed: anything outside these five tags fails with
/// [`AgentError::UnsupportedDialect`], including while deserializing a
/// registry file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Dialect {
    MariaDb,
    MySql,
    PostgreSql,
    Oracle,
    SqlServer,
}

impl TryFrom<String> for Dialect {
    type Error = AgentError;

    fn try_from(tag: String) -> crate::Result<Self> {
        Self::from_tag(&tag)
    }
}

impl From<Dialect> for String {
    fn from(dialect: Dialect) -> Self {
        dialect.as_tag().to_string()
    }
}

impl Dialect {
    /// Canonical lowercase tag, as used in registry files and catalog payloads.
    #[must_use]
    pub const fn as_tag(self) -> &'static str {
        match self {
            Self::MariaDb => "mariadb",
            Self::MySql => "mysql",
            Self::PostgreSql => "postgresql",
            Self::Oracle => "oracle",
            Self::SqlServer => "sqlserver",
        }
    }

    /// Parses a dialect tag, case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::UnsupportedDialect`] naming the offending tag.
    pub fn from_tag(tag: &str) -> crate::Result<Self> {
        match tag.trim().to_lowercase().as_str() {
            "mariadb" => Ok(Self::MariaDb),
            "mysql" => Ok(Self::MySql),
            "postgresql" => Ok(Self::PostgreSql),
            "oracle" => Ok(Self::Oracle),
            "sqlserver" => Ok(Self::SqlServer),
            other => Err(AgentError::unsupported_dialect(other)),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

impl std::str::FromStr for Dialect {
    type Err = AgentError;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::from_tag(s)
    }
}

fn default_odbc_driver() -> String {
    "ODBC Driver 17 for SQL Server".to_string()
}

/// One registered client database, as loaded from the connections file.
///
/// # Security
/// The password is wiped from memory on drop and masked in `Debug` output.
/// Profiles are never serialized back out.
#[derive(Clone, Deserialize)]
pub struct ConnectionProfile {
    pub dialect: Dialect,
    pub username: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub dbname: String,
    /// Only meaningful for SQL Server DSNs.
    #[serde(default = "default_odbc_driver")]
    pub odbc_driver: String,
}

impl Drop for ConnectionProfile {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}

impl fmt::Debug for ConnectionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionProfile")
            .field("dialect", &self.dialect)
            .field("username", &self.username)
            .field("password", &"****")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("odbc_driver", &self.odbc_driver)
            .finish()
    }
}

/// Raw column facts as reported by an engine's catalog views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub is_primary_key: bool,
}

/// Per-column catalog metadata, shaped for the publish payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    /// Technical column name.
    pub col: String,
    /// Engine-reported type text.
    #[serde(rename = "type")]
    pub data_type: String,
    /// Human-readable label; seeded by the humanizer, overridable by a person.
    pub label: String,
    /// True when the column is part of the primary key.
    pub is_default: bool,
}

/// One scanned table: qualified name, rendered DDL, and column metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    /// `"{dbname}.{table}"`.
    pub table_name: String,
    /// Canonical `CREATE TABLE` text.
    pub definition: String,
    pub column_metadata: Vec<ColumnMeta>,
}

/// Cloud-side identifiers recorded after publishing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudRefs {
    /// Remote schema container id.
    pub schema_id: i64,
    /// Remote table id per qualified table name.
    pub table_ids: BTreeMap<String, i64>,
}

/// Locally staged schema for one connection, awaiting curation and publish.
///
/// At most one draft exists per connection key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDraft {
    pub connection_key: String,
    pub structure: Vec<TableDefinition>,
    pub cloud_refs: Option<CloudRefs>,
    /// Only true after a publish where every table succeeded.
    pub is_synced: bool,
    pub last_scanned_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One table the catalog rejected during publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishFailure {
    pub table: String,
    pub reason: String,
}

/// Aggregated result of a two-phase publish: successes and failures together.
#[derive(Debug, Clone, Serialize)]
pub struct PublishOutcome {
    pub schema_id: i64,
    /// Remote id per qualified table name, in draft order.
    pub table_ids: BTreeMap<String, i64>,
    pub failures: Vec<PublishFailure>,
}

impl PublishOutcome {
    /// True when every expected table was accepted by the catalog.
    #[must_use]
    pub fn is_complete(&self, expected_tables: usize) -> bool {
        self.failures.is_empty() && self.table_ids.len() == expected_tables
    }
}

/// Who may see a saved report in the library view.
///
/// Dashboard-embedded reports are not a scope of their own: listing inside
/// a container bypasses these rules entirely.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportScope {
    #[default]
    Personal,
    Global,
    Role,
}

fn default_report_type() -> String {
    "table".to_string()
}

/// One published table with a chosen set of columns.
///
/// Doubles as translation context (the columns become `include_columns`)
/// and as a dashboard's stored question context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSelection {
    /// Cloud id assigned when the table was published.
    pub table_id: i64,
    pub columns: Vec<String>,
}

/// A saved report: a curated SQL answer with visibility rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: i64,
    pub name: String,
    pub user_identifier: String,
    #[serde(rename = "type", default = "default_report_type")]
    pub report_type: String,
    #[serde(default)]
    pub scope: ReportScope,
    /// Role names; only meaningful for [`ReportScope::Role`].
    #[serde(default)]
    pub scope_target: Vec<String>,
    pub question: Option<String>,
    pub sql_query: String,
    /// Set for dashboard-embedded reports; drives cascade deletion.
    pub dashboard_id: Option<i64>,
    /// Continuity token for chat-style refinement of the same question.
    pub conversation_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to create a report.
#[derive(Debug, Clone, Deserialize)]
pub struct NewReport {
    pub name: String,
    pub user_identifier: String,
    #[serde(rename = "type", default = "default_report_type")]
    pub report_type: String,
    #[serde(default)]
    pub scope: ReportScope,
    #[serde(default)]
    pub scope_target: Vec<String>,
    #[serde(default)]
    pub question: Option<String>,
    pub sql_query: String,
    #[serde(default)]
    pub dashboard_id: Option<i64>,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

/// Partial update for a report; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportPatch {
    pub name: Option<String>,
    pub sql_query: Option<String>,
    pub question: Option<String>,
    pub scope: Option<ReportScope>,
    pub scope_target: Option<Vec<String>>,
    pub conversation_id: Option<String>,
}

/// A saved dashboard; deleting one cascades to its embedded reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dashboard {
    pub id: i64,
    pub title: String,
    pub user_identifier: String,
    /// Free-form layout document owned by the front end.
    pub layout: JsonValue,
    /// Ordered table context for questions asked inside this dashboard.
    #[serde(default)]
    pub context_definition: Vec<TableSelection>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to create a dashboard.
#[derive(Debug, Clone, Deserialize)]
pub struct NewDashboard {
    pub title: String,
    pub user_identifier: String,
    #[serde(default)]
    pub layout: JsonValue,
    #[serde(default)]
    pub context_definition: Vec<TableSelection>,
}

/// Partial update for a dashboard; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DashboardPatch {
    pub title: Option<String>,
    pub layout: Option<JsonValue>,
    pub context_definition: Option<Vec<TableSelection>>,
}

/// Eagerly materialized result of one gateway statement.
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<JsonValue>>,
    pub row_count: usize,
}
