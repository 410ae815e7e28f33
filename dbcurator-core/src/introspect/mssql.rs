//! SQL Server introspection over TDS.
//!
//! Scans the `dbo` schema. The ODBC driver name carried in the DSN exists
//! for interoperability with other tooling; the TDS client here connects
//! directly and does not use it.

use super::IntrospectedTable;
use crate::config::AgentConfig;
use crate::dsn::{DsnParts, resolve_dsn};
use crate::error::AgentError;
use crate::models::{ColumnSpec, ConnectionProfile};
use crate::Result;
use tiberius::{AuthMethod, Client, Config};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

const TABLES_QUERY: &str = "SELECT TABLE_NAME \
     FROM INFORMATION_SCHEMA.TABLES \
     WHERE TABLE_SCHEMA = 'dbo' AND TABLE_TYPE = 'BASE TABLE' \
     ORDER BY TABLE_NAME";

const COLUMNS_QUERY: &str = "SELECT \
         c.COLUMN_NAME, \
         c.DATA_TYPE, \
         c.IS_NULLABLE, \
         CASE WHEN pk.COLUMN_NAME IS NOT NULL THEN 1 ELSE 0 END AS IS_PRIMARY_KEY \
     FROM INFORMATION_SCHEMA.COLUMNS c \
     LEFT JOIN ( \
         SELECT kcu.COLUMN_NAME, kcu.TABLE_NAME, kcu.TABLE_SCHEMA \
         FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc \
         JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu \
             ON tc.CONSTRAINT_NAME = kcu.CONSTRAINT_NAME \
             AND tc.TABLE_SCHEMA = kcu.TABLE_SCHEMA \
         WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY' \
     ) pk ON pk.COLUMN_NAME = c.COLUMN_NAME \
         AND pk.TABLE_NAME = c.TABLE_NAME \
         AND pk.TABLE_SCHEMA = c.TABLE_SCHEMA \
     WHERE c.TABLE_SCHEMA = 'dbo' AND c.TABLE_NAME = @P1 \
     ORDER BY c.ORDINAL_POSITION";

pub(super) async fn scan(
    profile: &ConnectionProfile,
    config: &AgentConfig,
) -> Result<Vec<IntrospectedTable>> {
    let dsn = resolve_dsn(profile)?;
    let target = dsn.redacted();
    let parts = DsnParts::from_dsn(&dsn)?;

    let mut tds = Config::new();
    tds.host(&parts.host);
    tds.port(parts.port.unwrap_or(1433));
    tds.database(&parts.database);
    tds.authentication(AuthMethod::sql_server(&parts.username, &parts.password));

    tracing::info!("connecting to {target}");
    let mut client = connect(&tds, config, &target).await?;
    let result = collect_tables(&mut client, config).await;
    let _ = client.close().await;
    result
}

async fn connect(
    tds: &Config,
    config: &AgentConfig,
    target: &str,
) -> Result<Client<Compat<TcpStream>>> {
    let tcp = tokio::time::timeout(config.connect_timeout, TcpStream::connect(tds.get_addr()))
        .await
        .map_err(|e| AgentError::connection_failed(format!("connect to {target} timed out"), e))?
        .map_err(|e| AgentError::connection_failed(format!("connect to {target} failed"), e))?;

    tcp.set_nodelay(true)
        .map_err(|e| AgentError::connection_failed(format!("connect to {target} failed"), e))?;

    tokio::time::timeout(
        config.connect_timeout,
        Client::connect(tds.clone(), tcp.compat_write()),
    )
    .await
    .map_err(|e| AgentError::connection_failed(format!("handshake with {target} timed out"), e))?
    .map_err(|e| AgentError::connection_failed(format!("handshake with {target} failed"), e))
}

async fn collect_tables(
    client: &mut Client<Compat<TcpStream>>,
    config: &AgentConfig,
) -> Result<Vec<IntrospectedTable>> {
    let rows = tokio::time::timeout(config.query_timeout, async {
        client.query(TABLES_QUERY, &[]).await?.into_first_result().await
    })
    .await
    .map_err(|e| AgentError::connection_failed("table listing timed out", e))?
    .map_err(|e| AgentError::connection_failed("failed to enumerate tables", e))?;

    let mut tables = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(name) = row.get::<&str, _>(0).map(str::to_string) else {
            continue;
        };

        match collect_columns(client, config, &name).await {
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
    client: &mut Client<Compat<TcpStream>>,
    config: &AgentConfig,
    table: &str,
) -> Result<Vec<ColumnSpec>> {
    let rows = tokio::time::timeout(config.query_timeout, async {
        client
            .query(COLUMNS_QUERY, &[&table])
            .await?
            .into_first_result()
            .await
    })
    .await
    .map_err(|e| {
        AgentError::connection_failed(format!("column listing for '{table}' timed out"), e)
    })?
    .map_err(|e| {
        AgentError::connection_failed(format!("failed to collect columns for '{table}'"), e)
    })?;

    let mut columns = Vec::with_capacity(rows.len());
    for row in &rows {
        let (Some(name), Some(data_type), Some(is_nullable), Some(pk_flag)) = (
            row.get::<&str, _>(0),
            row.get::<&str, _>(1),
            row.get::<&str, _>(2),
            row.get::<i32, _>(3),
        ) else {
            continue;
        };

        columns.push(ColumnSpec {
            name: name.to_string(),
            data_type: data_type.to_string(),
            is_nullable: is_nullable == "YES",
            is_primary_key: pk_flag == 1,
        });
    }

    Ok(columns)
}
