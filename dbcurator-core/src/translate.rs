//! Natural-language to SQL translation client.
//!
//! The catalog exposes a translation endpoint that turns an operator
//! question into a SQL statement, scoped to tables the agent has already
//! published. Only the client contract lives here; what the service does
//! with the returned SQL (gate it, run it) is `service`'s business.

use crate::config::CatalogConfig;
use crate::error::AgentError;
use crate::models::TableSelection;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Translator verdict: the SQL to run plus an optional explanation.
#[derive(Debug, Clone, Deserialize)]
pub struct Translation {
    pub sql: String,
    #[serde(default)]
    pub explanation: Option<String>,
}

/// Question-to-SQL translation seam.
///
/// [`HttpTranslator`] is the production implementation; tests substitute
/// a canned one.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translates a question against the given published tables.
    async fn translate(&self, question: &str, tables: &[TableSelection]) -> Result<Translation>;
}

#[derive(Serialize)]
struct TranslateBody<'a> {
    question: &'a str,
    schema_table_ids: Vec<i64>,
    schema_config: Vec<SchemaConfigEntry<'a>>,
}

// use_full_schema is always false: the translator gets the column list,
// never whole-table context, which bounds the payload on wide tables.
#[derive(Serialize)]
struct SchemaConfigEntry<'a> {
    table_id: i64,
    use_full_schema: bool,
    include_columns: &'a [String],
}

impl<'a> TranslateBody<'a> {
    fn new(question: &'a str, tables: &'a [TableSelection]) -> Self {
        Self {
            question,
            schema_table_ids: tables.iter().map(|t| t.table_id).collect(),
            schema_config: tables
                .iter()
                .map(|t| SchemaConfigEntry {
                    table_id: t.table_id,
                    use_full_schema: false,
                    include_columns: &t.columns,
                })
                .collect(),
        }
    }
}

#[derive(Deserialize)]
struct TranslationEnvelope {
    data: Translation,
}

/// Bearer-authenticated client for `POST {base}/api/translate`.
pub struct HttpTranslator {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl HttpTranslator {
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
                AgentError::configuration(format!("failed to build translator HTTP client: {e}"))
            })?;

        Ok(Self {
            base_url: catalog.trimmed_base().to_string(),
            token: catalog.token.clone(),
            client,
        })
    }
}

#[async_trait]
impl Translator for HttpTranslator {
    async fn translate(&self, question: &str, tables: &[TableSelection]) -> Result<Translation> {
        let url = format!("{}/api/translate", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&TranslateBody::new(question, tables))
            .send()
            .await
            .map_err(|e| AgentError::translation_failed("POST /api/translate failed", e))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(AgentError::Translation {
                context: format!("POST /api/translate returned {status}"),
                source: detail.into(),
            });
        }

        let envelope: TranslationEnvelope = response.json().await.map_err(|e| {
            AgentError::translation_failed("translator returned an unexpected body (no data.sql)", e)
        })?;

        Ok(envelope.data)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_body_forces_column_granularity() {
        let tables = vec![
            TableSelection {
                table_id: 11,
                columns: vec!["id".to_string(), "monto".to_string()],
            },
            TableSelection {
                table_id: 12,
                columns: vec!["id".to_string()],
            },
        ];
        let body = serde_json::to_value(TranslateBody::new("ventas del mes", &tables)).unwrap();

        assert_eq!(body["question"], "ventas del mes");
        assert_eq!(body["schema_table_ids"], serde_json::json!([11, 12]));
        assert_eq!(body["schema_config"][0]["table_id"], 11);
        assert_eq!(body["schema_config"][0]["use_full_schema"], false);
        assert_eq!(
            body["schema_config"][0]["include_columns"],
            serde_json::json!(["id", "monto"])
        );
        assert_eq!(body["schema_config"][1]["use_full_schema"], false);
    }

    #[test]
    fn test_envelope_with_explanation() {
        let envelope: TranslationEnvelope = serde_json::from_value(serde_json::json!({
            "data": {
                "sql": "SELECT COUNT(*) FROM ventas",
                "explanation": "Cuenta las filas de ventas"
            }
        }))
        .unwrap();
        assert_eq!(envelope.data.sql, "SELECT COUNT(*) FROM ventas");
        assert_eq!(
            envelope.data.explanation.as_deref(),
            Some("Cuenta las filas de ventas")
        );
    }

    #[test]
    fn test_envelope_without_explanation() {
        let envelope: TranslationEnvelope = serde_json::from_value(serde_json::json!({
            "data": { "sql": "SELECT 1" }
        }))
        .unwrap();
        assert!(envelope.data.explanation.is_none());
    }
}
