//! Gateway statement execution.
//!
//! Runs an already-vetted read-only statement against a client database
//! and materializes the whole result set. Nothing here is pooled: every
//! execution opens a dedicated connection, runs one statement, and closes
//! it before the result is handed back, on failure paths included.

use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::models::{ConnectionProfile, Dialect, QueryOutput};
use crate::Result;
use serde_json::Value as JsonValue;

#[cfg(any(feature = "mysql", feature = "postgresql", feature = "mssql"))]
use crate::dsn::{DsnParts, resolve_dsn};
#[cfg(any(feature = "mysql", feature = "postgresql", feature = "mssql"))]
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
#[cfg(any(feature = "mysql", feature = "postgresql"))]
use sqlx::{Column, Connection, Row};

/// Runs one read-only statement and returns the materialized result.
///
/// Callers are expected to have vetted the statement through
/// [`crate::sqlgate::ensure_read_only`] first; nothing here re-checks it.
/// Column names come from the result metadata of the first row, so a
/// statement matching zero rows reports an empty column list.
///
/// # Errors
///
/// Returns [`AgentError::DatabaseConnection`] when the connection cannot
/// be established and [`AgentError::QueryExecution`] when the statement
/// itself fails or times out. Messages carry only a redacted target.
pub async fn execute(
    profile: &ConnectionProfile,
    sql: &str,
    config: &AgentConfig,
) -> Result<QueryOutput> {
    let execution_id = uuid::Uuid::new_v4();
    tracing::debug!("execution {execution_id} statement: {sql}");

    let output = match profile.dialect {
        #[cfg(feature = "mysql")]
        Dialect::MariaDb | Dialect::MySql => mysql_query(profile, sql, config).await?,
        #[cfg(feature = "postgresql")]
        Dialect::PostgreSql => postgres_query(profile, sql, config).await?,
        #[cfg(feature = "mssql")]
        Dialect::SqlServer => mssql_query(profile, sql, config).await?,
        Dialect::Oracle => return Err(crate::introspect::oracle::unavailable()),
        #[allow(unreachable_patterns)]
        other => {
            return Err(AgentError::configuration(format!(
                "support for {other} is not compiled into this build"
            )));
        }
    };

    tracing::info!(
        "execution {execution_id} on '{}' returned {} row(s)",
        profile.dbname,
        output.row_count
    );
    Ok(output)
}

#[cfg(feature = "mysql")]
async fn mysql_query(
    profile: &ConnectionProfile,
    sql: &str,
    config: &AgentConfig,
) -> Result<QueryOutput> {
    use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};

    let dsn = resolve_dsn(profile)?;
    let target = dsn.redacted();
    let parts = DsnParts::from_dsn(&dsn)?;

    let options = MySqlConnectOptions::new()
        .host(&parts.host)
        .port(parts.port.unwrap_or(3306))
        .username(&parts.username)
        .password(&parts.password)
        .database(&parts.database);

    tracing::debug!("connecting to {target}");
    let mut conn = tokio::time::timeout(
        config.connect_timeout,
        MySqlConnection::connect_with(&options),
    )
    .await
    .map_err(|e| AgentError::connection_failed(format!("connect to {target} timed out"), e))?
    .map_err(|e| AgentError::connection_failed(format!("connect to {target} failed"), e))?;

    let fetched = tokio::time::timeout(
        config.query_timeout,
        sqlx::query(sql).fetch_all(&mut conn),
    )
    .await;
    let _ = conn.close().await;

    let rows = match fetched {
        Ok(Ok(rows)) => rows,
        Ok(Err(e)) => {
            return Err(AgentError::query_failed(
                format!("statement failed on {target}"),
                e,
            ));
        }
        Err(e) => {
            return Err(AgentError::query_failed(
                format!("statement on {target} timed out"),
                e,
            ));
        }
    };

    let columns = rows.first().map_or_else(Vec::new, |row| {
        row.columns().iter().map(|c| c.name().to_string()).collect()
    });
    let data: Vec<Vec<JsonValue>> = rows
        .iter()
        .map(|row| (0..row.len()).map(|i| mysql_cell(row, i)).collect())
        .collect();

    let row_count = data.len();
    Ok(QueryOutput {
        columns,
        rows: data,
        row_count,
    })
}

#[cfg(feature = "mysql")]
fn mysql_cell(row: &sqlx::mysql::MySqlRow, index: usize) -> JsonValue {
    if let Ok(value) = row.try_get::<Option<String>, _>(index) {
        return value.map_or(JsonValue::Null, JsonValue::String);
    }
    if let Ok(value) = row.try_get::<Option<i64>, _>(index) {
        return value.map_or(JsonValue::Null, |v| JsonValue::Number(v.into()));
    }
    if let Ok(value) = row.try_get::<Option<i32>, _>(index) {
        return value.map_or(JsonValue::Null, |v| JsonValue::Number(v.into()));
    }
    if let Ok(value) = row.try_get::<Option<i16>, _>(index) {
        return value.map_or(JsonValue::Null, |v| JsonValue::Number(v.into()));
    }
    if let Ok(value) = row.try_get::<Option<f64>, _>(index) {
        return value
            .and_then(serde_json::Number::from_f64)
            .map_or(JsonValue::Null, JsonValue::Number);
    }
    if let Ok(value) = row.try_get::<Option<f32>, _>(index) {
        return value
            .and_then(|v| serde_json::Number::from_f64(f64::from(v)))
            .map_or(JsonValue::Null, JsonValue::Number);
    }
    if let Ok(value) = row.try_get::<Option<bool>, _>(index) {
        return value.map_or(JsonValue::Null, JsonValue::Bool);
    }
    if let Ok(value) = row.try_get::<Option<DateTime<Utc>>, _>(index) {
        return value.map_or(JsonValue::Null, |v| JsonValue::String(v.to_rfc3339()));
    }
    if let Ok(value) = row.try_get::<Option<NaiveDateTime>, _>(index) {
        return value.map_or(JsonValue::Null, |v| JsonValue::String(v.to_string()));
    }
    if let Ok(value) = row.try_get::<Option<NaiveDate>, _>(index) {
        return value.map_or(JsonValue::Null, |v| JsonValue::String(v.to_string()));
    }
    // DECIMAL and engine-specific types land here.
    JsonValue::Null
}

#[cfg(feature = "postgresql")]
async fn postgres_query(
    profile: &ConnectionProfile,
    sql: &str,
    config: &AgentConfig,
) -> Result<QueryOutput> {
    use sqlx::postgres::{PgConnectOptions, PgConnection};

    let dsn = resolve_dsn(profile)?;
    let target = dsn.redacted();
    let parts = DsnParts::from_dsn(&dsn)?;

    let options = PgConnectOptions::new()
        .host(&parts.host)
        .port(parts.port.unwrap_or(5432))
        .username(&parts.username)
        .password(&parts.password)
        .database(&parts.database);

    tracing::debug!("connecting to {target}");
    let mut conn = tokio::time::timeout(
        config.connect_timeout,
        PgConnection::connect_with(&options),
    )
    .await
    .map_err(|e| AgentError::connection_failed(format!("connect to {target} timed out"), e))?
    .map_err(|e| AgentError::connection_failed(format!("connect to {target} failed"), e))?;

    let fetched = tokio::time::timeout(
        config.query_timeout,
        sqlx::query(sql).fetch_all(&mut conn),
    )
    .await;
    let _ = conn.close().await;

    let rows = match fetched {
        Ok(Ok(rows)) => rows,
        Ok(Err(e)) => {
            return Err(AgentError::query_failed(
                format!("statement failed on {target}"),
                e,
            ));
        }
        Err(e) => {
            return Err(AgentError::query_failed(
                format!("statement on {target} timed out"),
                e,
            ));
        }
    };

    let columns = rows.first().map_or_else(Vec::new, |row| {
        row.columns().iter().map(|c| c.name().to_string()).collect()
    });
    let data: Vec<Vec<JsonValue>> = rows
        .iter()
        .map(|row| (0..row.len()).map(|i| postgres_cell(row, i)).collect())
        .collect();

    let row_count = data.len();
    Ok(QueryOutput {
        columns,
        rows: data,
        row_count,
    })
}

// The PostgreSQL decoder refuses to widen INT4/INT2 and FLOAT4 on the
// client, so the chain tries each width explicitly.
#[cfg(feature = "postgresql")]
fn postgres_cell(row: &sqlx::postgres::PgRow, index: usize) -> JsonValue {
    if let Ok(value) = row.try_get::<Option<String>, _>(index) {
        return value.map_or(JsonValue::Null, JsonValue::String);
    }
    if let Ok(value) = row.try_get::<Option<i64>, _>(index) {
        return value.map_or(JsonValue::Null, |v| JsonValue::Number(v.into()));
    }
    if let Ok(value) = row.try_get::<Option<i32>, _>(index) {
        return value.map_or(JsonValue::Null, |v| JsonValue::Number(v.into()));
    }
    if let Ok(value) = row.try_get::<Option<i16>, _>(index) {
        return value.map_or(JsonValue::Null, |v| JsonValue::Number(v.into()));
    }
    if let Ok(value) = row.try_get::<Option<f64>, _>(index) {
        return value
            .and_then(serde_json::Number::from_f64)
            .map_or(JsonValue::Null, JsonValue::Number);
    }
    if let Ok(value) = row.try_get::<Option<f32>, _>(index) {
        return value
            .and_then(|v| serde_json::Number::from_f64(f64::from(v)))
            .map_or(JsonValue::Null, JsonValue::Number);
    }
    if let Ok(value) = row.try_get::<Option<bool>, _>(index) {
        return value.map_or(JsonValue::Null, JsonValue::Bool);
    }
    if let Ok(value) = row.try_get::<Option<DateTime<Utc>>, _>(index) {
        return value.map_or(JsonValue::Null, |v| JsonValue::String(v.to_rfc3339()));
    }
    if let Ok(value) = row.try_get::<Option<NaiveDateTime>, _>(index) {
        return value.map_or(JsonValue::Null, |v| JsonValue::String(v.to_string()));
    }
    if let Ok(value) = row.try_get::<Option<NaiveDate>, _>(index) {
        return value.map_or(JsonValue::Null, |v| JsonValue::String(v.to_string()));
    }
    JsonValue::Null
}

#[cfg(feature = "mssql")]
async fn mssql_query(
    profile: &ConnectionProfile,
    sql: &str,
    config: &AgentConfig,
) -> Result<QueryOutput> {
    use tiberius::{AuthMethod, Config};

    let dsn = resolve_dsn(profile)?;
    let target = dsn.redacted();
    let parts = DsnParts::from_dsn(&dsn)?;

    let mut tds = Config::new();
    tds.host(&parts.host);
    tds.port(parts.port.unwrap_or(1433));
    tds.database(&parts.database);
    tds.authentication(AuthMethod::sql_server(&parts.username, &parts.password));

    tracing::debug!("connecting to {target}");
    let mut client = mssql_connect(&tds, config, &target).await?;

    let fetched = tokio::time::timeout(config.query_timeout, async {
        client.query(sql, &[]).await?.into_first_result().await
    })
    .await;
    let _ = client.close().await;

    let rows = match fetched {
        Ok(Ok(rows)) => rows,
        Ok(Err(e)) => {
            return Err(AgentError::query_failed(
                format!("statement failed on {target}"),
                e,
            ));
        }
        Err(e) => {
            return Err(AgentError::query_failed(
                format!("statement on {target} timed out"),
                e,
            ));
        }
    };

    let columns = rows.first().map_or_else(Vec::new, |row| {
        row.columns().iter().map(|c| c.name().to_string()).collect()
    });
    let data: Vec<Vec<JsonValue>> = rows
        .iter()
        .map(|row| (0..row.len()).map(|i| mssql_cell(row, i)).collect())
        .collect();

    let row_count = data.len();
    Ok(QueryOutput {
        columns,
        rows: data,
        row_count,
    })
}

#[cfg(feature = "mssql")]
async fn mssql_connect(
    tds: &tiberius::Config,
    config: &AgentConfig,
    target: &str,
) -> Result<tiberius::Client<tokio_util::compat::Compat<tokio::net::TcpStream>>> {
    use tokio::net::TcpStream;
    use tokio_util::compat::TokioAsyncWriteCompatExt;

    let tcp = tokio::time::timeout(config.connect_timeout, TcpStream::connect(tds.get_addr()))
        .await
        .map_err(|e| AgentError::connection_failed(format!("connect to {target} timed out"), e))?
        .map_err(|e| AgentError::connection_failed(format!("connect to {target} failed"), e))?;

    tcp.set_nodelay(true)
        .map_err(|e| AgentError::connection_failed(format!("connect to {target} failed"), e))?;

    tokio::time::timeout(
        config.connect_timeout,
        tiberius::Client::connect(tds.clone(), tcp.compat_write()),
    )
    .await
    .map_err(|e| AgentError::connection_failed(format!("handshake with {target} timed out"), e))?
    .map_err(|e| AgentError::connection_failed(format!("handshake with {target} failed"), e))
}

// TDS reports INT columns narrow, so i32 and i16 sit between the i64 and
// float steps. A NULL of any type falls through every step.
#[cfg(feature = "mssql")]
fn mssql_cell(row: &tiberius::Row, index: usize) -> JsonValue {
    if let Ok(Some(v)) = row.try_get::<&str, _>(index) {
        return JsonValue::String(v.to_string());
    }
    if let Ok(Some(v)) = row.try_get::<i64, _>(index) {
        return JsonValue::Number(v.into());
    }
    if let Ok(Some(v)) = row.try_get::<i32, _>(index) {
        return JsonValue::Number(v.into());
    }
    if let Ok(Some(v)) = row.try_get::<i16, _>(index) {
        return JsonValue::Number(v.into());
    }
    if let Ok(Some(v)) = row.try_get::<f64, _>(index) {
        return serde_json::Number::from_f64(v).map_or(JsonValue::Null, JsonValue::Number);
    }
    if let Ok(Some(v)) = row.try_get::<f32, _>(index) {
        return serde_json::Number::from_f64(f64::from(v))
            .map_or(JsonValue::Null, JsonValue::Number);
    }
    if let Ok(Some(v)) = row.try_get::<bool, _>(index) {
        return JsonValue::Bool(v);
    }
    if let Ok(Some(v)) = row.try_get::<DateTime<Utc>, _>(index) {
        return JsonValue::String(v.to_rfc3339());
    }
    if let Ok(Some(v)) = row.try_get::<NaiveDateTime, _>(index) {
        return JsonValue::String(v.to_string());
    }
    if let Ok(Some(v)) = row.try_get::<NaiveDate, _>(index) {
        return JsonValue::String(v.to_string());
    }
    JsonValue::Null
}
