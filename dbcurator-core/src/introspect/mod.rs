//! Client database schema introspection.
//!
//! Each dialect adapter lists base tables and fetches ordered column facts
//! from the engine's catalog views; the dialect-agnostic half lives here:
//! qualified names, canonical `CREATE TABLE` text, and seeded column
//! labels. A connection or table-listing failure is fatal for the scan; a
//! column fetch failing for one table skips that table with a warning and
//! the scan continues.

#[cfg(feature = "mssql")]
mod mssql;
#[cfg(feature = "mysql")]
mod mysql;
pub(crate) mod oracle;
#[cfg(feature = "postgresql")]
mod postgres;

use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::humanize::humanize_column;
use crate::models::{ColumnMeta, ColumnSpec, ConnectionProfile, Dialect, TableDefinition};
use crate::Result;

/// One table as an adapter hands it back, before labeling and rendering.
#[derive(Debug, Clone)]
pub(crate) struct IntrospectedTable {
    pub(crate) name: String,
    pub(crate) columns: Vec<ColumnSpec>,
}

/// Scans the client database behind a profile and returns its structure,
/// one [`TableDefinition`] per surviving table, in introspection order.
///
/// MariaDB shares the MySQL adapter.
///
/// # Errors
///
/// Returns [`AgentError::DatabaseConnection`] when connecting or listing
/// tables fails; the message carries only a redacted target. Dialects not
/// compiled into this build fail with a configuration error.
pub async fn scan_structure(
    profile: &ConnectionProfile,
    config: &AgentConfig,
) -> Result<Vec<TableDefinition>> {
    let raw = match profile.dialect {
        #[cfg(feature = "mysql")]
        Dialect::MariaDb | Dialect::MySql => mysql::scan(profile, config).await?,
        #[cfg(feature = "postgresql")]
        Dialect::PostgreSql => postgres::scan(profile, config).await?,
        #[cfg(feature = "mssql")]
        Dialect::SqlServer => mssql::scan(profile, config).await?,
        Dialect::Oracle => return Err(oracle::unavailable()),
        #[allow(unreachable_patterns)]
        other => {
            return Err(AgentError::configuration(format!(
                "support for {other} is not compiled into this build"
            )));
        }
    };

    tracing::info!(
        "scan of '{}' collected {} table(s)",
        profile.dbname,
        raw.len()
    );

    Ok(raw
        .into_iter()
        .map(|table| build_table_definition(&profile.dbname, table))
        .collect())
}

/// Turns raw column facts into the draft-facing form: the qualified name,
/// the canonical DDL text, and per-column metadata with seeded labels.
fn build_table_definition(dbname: &str, table: IntrospectedTable) -> TableDefinition {
    let qualified_name = format!("{dbname}.{}", table.name);
    let definition = render_ddl(&qualified_name, &table.columns);

    let column_metadata = table
        .columns
        .into_iter()
        .map(|column| ColumnMeta {
            label: humanize_column(&column.name),
            data_type: column.data_type.to_uppercase(),
            is_default: column.is_primary_key,
            col: column.name,
        })
        .collect();

    TableDefinition {
        table_name: qualified_name,
        definition,
        column_metadata,
    }
}

fn render_ddl(qualified_name: &str, columns: &[ColumnSpec]) -> String {
    let mut lines = Vec::with_capacity(columns.len() + 2);
    lines.push(format!("CREATE TABLE {qualified_name} ("));

    for column in columns {
        let mut line = format!("  {} {}", column.name, column.data_type.to_uppercase());
        if !column.is_nullable {
            line.push_str(" NOT NULL");
        }
        if column.is_primary_key {
            line.push_str(" PRIMARY KEY");
        }
        line.push(',');
        lines.push(line);
    }

    lines.push(");".to_string());
    lines.join("\n")
}
