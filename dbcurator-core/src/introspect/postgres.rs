//! PostgreSQL introspection over `information_schema`.
//!
//! Scans the `public` schema, which is where the client applications this
//! agent fronts keep their tables.

use super::IntrospectedTable;
use crate::config::AgentConfig;
use crate::dsn::{DsnParts, resolve_dsn};
use crate::error::AgentError;
use crate::models::{ColumnSpec, ConnectionProfile};
use crate::Result;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{Connection, Row};

const TABLES_QUERY: &str = r#"
    SELECT table_name
    FROM information_schema.tables
    WHERE table_schema = 'public'
    AND table_type = 'BASE TABLE'
    ORDER BY table_name
"#;

const COLUMNS_QUERY: &str = r#"
    SELECT
        c.column_name,
        c.data_type,
        c.is_nullable,
        CASE
            WHEN pk.column_name IS NOT NULL THEN true
            ELSE false
        END as is_primary_key
    FROM information_schema.columns c
    LEFT JOIN (
        SELECT
            kcu.column_name,
            kcu.table_name,
            kcu.table_schema
        FROM information_schema.table_constraints tc
        JOIN information_schema.key_column_usage kcu
            ON tc.constraint_name = kcu.constraint_name
            AND tc.table_schema = kcu.table_schema
        WHERE tc.constraint_type = 'PRIMARY KEY'
    ) pk ON pk.column_name = c.column_name
        AND pk.table_name = c.table_name
        AND pk.table_schema = c.table_schema
    WHERE c.table_name = $1
    AND c.table_schema = 'public'
    ORDER BY c.ordinal_position
"#;

pub(super) async fn scan(
    profile: &ConnectionProfile,
    config: &AgentConfig,
) -> Result<Vec<IntrospectedTable>> {
    let dsn = resolve_dsn(profile)?;
    let target = dsn.redacted();
    let parts = DsnParts::from_dsn(&dsn)?;

    let options = PgConnectOptions::new()
        .host(&parts.host)
        .port(parts.port.unwrap_or(5432))
        .username(&parts.username)
        .password(&parts.password)
        .database(&parts.database);

    tracing::info!("connecting to {target}");
    let mut conn = tokio::time::timeout(
        config.connect_timeout,
        PgConnection::connect_with(&options),
    )
    .await
    .map_err(|e| AgentError::connection_failed(format!("connect to {target} timed out"), e))?
    .map_err(|e| AgentError::connection_failed(format!("connect to {target} failed"), e))?;

    let result = collect_tables(&mut conn, config, &target).await;
    let _ = conn.close().await;
    result
}

async fn collect_tables(
    conn: &mut PgConnection,
    config: &AgentConfig,
    target: &str,
) -> Result<Vec<IntrospectedTable>> {
    let table_rows = tokio::time::timeout(
        config.query_timeout,
        sqlx::query(TABLES_QUERY).fetch_all(&mut *conn),
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
            .try_get("table_name")
            .map_err(|e| AgentError::connection_failed("failed to read a table name", e))?;

        match collect_columns(conn, config, &name).await {
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
    conn: &mut PgConnection,
    config: &AgentConfig,
    table: &str,
) -> Result<Vec<ColumnSpec>> {
    let rows = tokio::time::timeout(
        config.query_timeout,
        sqlx::query(COLUMNS_QUERY).bind(table).fetch_all(&mut *conn),
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
            .try_get("column_name")
            .map_err(|e| AgentError::connection_failed("failed to read a column name", e))?;
        let data_type: String = row
            .try_get("data_type")
            .map_err(|e| AgentError::connection_failed("failed to read a column type", e))?;
        let is_nullable: String = row
            .try_get("is_nullable")
            .map_err(|e| AgentError::connection_failed("failed to read a nullability flag", e))?;
        let is_primary_key: bool = row
            .try_get("is_primary_key")
            .map_err(|e| AgentError::connection_failed("failed to read a key flag", e))?;

        columns.push(ColumnSpec {
            name,
            data_type,
            is_nullable: is_nullable == "YES",
            is_primary_key,
        });
    }

    Ok(columns)
}
