//! MySQL and MariaDB introspection over `INFORMATION_SCHEMA`.

use super::IntrospectedTable;
use crate::config::AgentConfig;
use crate::dsn::{DsnParts, resolve_dsn};
use crate::error::AgentError;
use crate::models::{ColumnSpec, ConnectionProfile};
use crate::Result;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::{Connection, Row};

// Identifier columns are cast to CHAR so MySQL 8.0+ servers do not hand
// back VARBINARY values the client refuses to decode.
const TABLES_QUERY: &str = r#"
    SELECT CAST(TABLE_NAME AS CHAR) as TABLE_NAME
    FROM INFORMATION_SCHEMA.TABLES
    WHERE TABLE_SCHEMA = ?
    AND TABLE_TYPE = 'BASE TABLE'
    ORDER BY TABLE_NAME
"#;

const COLUMNS_QUERY: &str = r#"
    SELECT
        CAST(COLUMN_NAME AS CHAR) as COLUMN_NAME,
        CAST(COLUMN_TYPE AS CHAR) as COLUMN_TYPE,
        CAST(IS_NULLABLE AS CHAR) as IS_NULLABLE,
        CAST(COLUMN_KEY AS CHAR) as COLUMN_KEY
    FROM INFORMATION_SCHEMA.COLUMNS
    WHERE TABLE_SCHEMA = ?
    AND TABLE_NAME = ?
    ORDER BY ORDINAL_POSITION
"#;

pub(super) async fn scan(
    profile: &ConnectionProfile,
    config: &AgentConfig,
) -> Result<Vec<IntrospectedTable>> {
    let dsn = resolve_dsn(profile)?;
    let target = dsn.redacted();
    let parts = DsnParts::from_dsn(&dsn)?;

    let options = MySqlConnectOptions::new()
        .host(&parts.host)
        .port(parts.port.unwrap_or(3306))
        .username(&parts.username)
        .password(&parts.password)
        .database(&parts.database);

    tracing::info!("connecting to {target}");
    let mut conn = tokio::time::timeout(
        config.connect_timeout,
        MySqlConnection::connect_with(&options),
    )
    .await
    .map_err(|e| AgentError::connection_failed(format!("connect to {target} timed out"), e))?
    .map_err(|e| AgentError::connection_failed(format!("connect to {target} failed"), e))?;

    let result = collect_tables(&mut conn, profile, config, &target).await;
    let _ = conn.close().await;
    result
}

async fn collect_tables(
    conn: &mut MySqlConnection,
    profile: &ConnectionProfile,
    config: &AgentConfig,
    target: &str,
) -> Result<Vec<IntrospectedTable>> {
    let table_rows = tokio::time::timeout(
        config.query_timeout,
        sqlx::query(TABLES_QUERY)
            .bind(&profile.dbname)
            .fetch_all(&mut *conn),
    )
    .await
    .map_err(|e| {
        AgentError::connection_failed(format!("table listing on {target} timed out"), e)
    })?
    .map_err(|e| {
        AgentError::connection_failed(format!("failed to enumerate tables on {target}"), e)
    })?;

    let mut tables = Vec::with_capacity(table_rows.len());
    for row in &table_rows {
        let name: String = row
            .try_get("TABLE_NAME")
            .map_err(|e| AgentError::connection_failed("failed to read a table name", e))?;

        match collect_columns(conn, profile, config, &name).await {
            Ok(columns) => {
                tracing::debug!("table '{}' has {} column(s)", name, columns.len());
                tables.push(IntrospectedTable { name, columns });
            }
            Err(e) => {
                tracing::warn!("skipping table '{}': {}", name, e);
            }
        }
    }

    Ok(tables)
}

async fn collect_columns(
    conn: &mut MySqlConnection,
    profile: &ConnectionProfile,
    config: &AgentConfig,
    table: &str,
) -> Result<Vec<ColumnSpec>> {
    let rows = tokio::time::timeout(
        config.query_timeout,
        sqlx::query(COLUMNS_QUERY)
            .bind(&profile.dbname)
            .bind(table)
            .fetch_all(&mut *conn),
    )
    .await
    .map_err(|e| {
        AgentError::connection_failed(format!("column listing for '{table}' timed out"), e)
    })?
    .map_err(|e| {
        AgentError::connection_failed(format!("failed to collect columns for '{table}'"), e)
    })?;

    let mut columns = Vec::with_capacity(rows.len());
    for row in &rows {
        let name: String = row
            .try_get("COLUMN_NAME")
            .map_err(|e| AgentError::connection_failed("failed to read a column name", e))?;
        let data_type: String = row
            .try_get("COLUMN_TYPE")
            .map_err(|e| AgentError::connection_failed("failed to read a column type", e))?;
        let is_nullable: String = row
            .try_get("IS_NULLABLE")
            .map_err(|e| AgentError::connection_failed("failed to read a nullability flag", e))?;
        let column_key: String = row
            .try_get("COLUMN_KEY")
            .map_err(|e| AgentError::connection_failed("failed to read a key flag", e))?;

        columns.push(ColumnSpec {
            name,
            data_type,
            is_nullable: is_nullable == "YES",
            is_primary_key: column_key == "PRI",
        });
    }

    Ok(columns)
}
