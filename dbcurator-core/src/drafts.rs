//! Locally staged schema drafts, one per connection key.
//!
//! A draft is the curation surface between a scan and a publish: the
//! scanned structure lands here, a human hands back an edited structure,
//! and the publish step records cloud ids and the sync flag. Two stores
//! ship behind the [`DraftStore`] trait: an in-memory one for embedding
//! and tests, and a JSON-file one so one-shot agent invocations can chain
//! scan, edit, and publish.
//!
//! All mutations go through one async mutex, so concurrent operations on
//! the same key cannot interleave their read-modify-write cycles.

use crate::error::AgentError;
use crate::models::{CloudRefs, PublishOutcome, SchemaDraft, TableDefinition};
use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::Mutex;

/// Storage boundary for schema drafts.
#[async_trait]
pub trait DraftStore: Send + Sync {
    /// Replaces the draft structure for a key after a scan.
    ///
    /// A full overwrite: previous label edits are dropped (the scan is the
    /// new truth), previously recorded cloud refs are retained, and
    /// `is_synced` resets to false.
    async fn upsert_after_scan(
        &self,
        key: &str,
        structure: Vec<TableDefinition>,
    ) -> Result<SchemaDraft>;

    /// Fetches the draft for a key.
    async fn get(&self, key: &str) -> Result<SchemaDraft>;

    /// Replaces the draft structure with a human-edited one.
    ///
    /// Also a full overwrite, and `is_synced` is forced false; unlike a
    /// scan this never exists without a prior draft, so an unknown key is
    /// an error rather than an insert.
    async fn apply_human_edit(
        &self,
        key: &str,
        structure: Vec<TableDefinition>,
    ) -> Result<SchemaDraft>;

    /// Records a publish outcome: cloud ids for the accepted tables, and
    /// `is_synced` only when every table in the draft was accepted.
    async fn record_publish_result(
        &self,
        key: &str,
        outcome: &PublishOutcome,
    ) -> Result<SchemaDraft>;

    /// Keys with a stored draft, sorted.
    async fn keys(&self) -> Vec<String>;
}

// State transitions shared by the memory and file stores.

fn upsert_scan(
    drafts: &mut BTreeMap<String, SchemaDraft>,
    key: &str,
    structure: Vec<TableDefinition>,
) -> SchemaDraft {
    let now = Utc::now();
    let draft = match drafts.get_mut(key) {
        Some(existing) => {
            existing.structure = structure;
            existing.is_synced = false;
            existing.last_scanned_at = now;
            existing.updated_at = now;
            existing.clone()
        }
        None => {
            let draft = SchemaDraft {
                connection_key: key.to_string(),
                structure,
                cloud_refs: None,
                is_synced: false,
                last_scanned_at: now,
                updated_at: now,
            };
            drafts.insert(key.to_string(), draft.clone());
            draft
        }
    };

    tracing::debug!(
        "draft for '{}' holds {} table(s), synced={}",
        key,
        draft.structure.len(),
        draft.is_synced
    );
    draft
}

fn replace_structure(
    drafts: &mut BTreeMap<String, SchemaDraft>,
    key: &str,
    structure: Vec<TableDefinition>,
) -> Result<SchemaDraft> {
    let draft = drafts
        .get_mut(key)
        .ok_or_else(|| AgentError::draft_not_found(key))?;

    draft.structure = structure;
    draft.is_synced = false;
    draft.updated_at = Utc::now();

    Ok(draft.clone())
}

fn merge_publish(
    drafts: &mut BTreeMap<String, SchemaDraft>,
    key: &str,
    outcome: &PublishOutcome,
) -> Result<SchemaDraft> {
    let draft = drafts
        .get_mut(key)
        .ok_or_else(|| AgentError::draft_not_found(key))?;

    // Start from previously recorded ids so tables that failed this
    // round keep the refs an earlier publish already earned.
    let mut table_ids = draft
        .cloud_refs
        .take()
        .map(|refs| refs.table_ids)
        .unwrap_or_default();
    table_ids.extend(outcome.table_ids.iter().map(|(t, id)| (t.clone(), *id)));

    draft.cloud_refs = Some(CloudRefs {
        schema_id: outcome.schema_id,
        table_ids,
    });
    draft.is_synced = outcome.is_complete(draft.structure.len());
    draft.updated_at = Utc::now();

    Ok(draft.clone())
}

/// In-memory draft store.
#[derive(Debug, Default)]
pub struct MemoryDraftStore {
    inner: Mutex<BTreeMap<String, SchemaDraft>>,
}

impl MemoryDraftStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DraftStore for MemoryDraftStore {
    async fn upsert_after_scan(
        &self,
        key: &str,
        structure: Vec<TableDefinition>,
    ) -> Result<SchemaDraft> {
        let mut drafts = self.inner.lock().await;
        Ok(upsert_scan(&mut drafts, key, structure))
    }

    async fn get(&self, key: &str) -> Result<SchemaDraft> {
        let drafts = self.inner.lock().await;
        drafts
            .get(key)
            .cloned()
            .ok_or_else(|| AgentError::draft_not_found(key))
    }

    async fn apply_human_edit(
        &self,
        key: &str,
        structure: Vec<TableDefinition>,
    ) -> Result<SchemaDraft> {
        let mut drafts = self.inner.lock().await;
        replace_structure(&mut drafts, key, structure)
    }

    async fn record_publish_result(
        &self,
        key: &str,
        outcome: &PublishOutcome,
    ) -> Result<SchemaDraft> {
        let mut drafts = self.inner.lock().await;
        merge_publish(&mut drafts, key, outcome)
    }

    async fn keys(&self) -> Vec<String> {
        let drafts = self.inner.lock().await;
        drafts.keys().cloned().collect()
    }
}

/// File-backed draft store holding every draft in one JSON document.
///
/// Each mutation rewrites the whole file under the lock; reads are served
/// from memory. Small by construction (a handful of drafts, one per
/// connection key), so whole-file rewrites are cheaper than being clever.
#[derive(Debug)]
pub struct JsonDraftStore {
    path: PathBuf,
    inner: Mutex<BTreeMap<String, SchemaDraft>>,
}

impl JsonDraftStore {
    /// Opens the store, loading any drafts the file already holds.
    ///
    /// A missing file is an empty store; the file appears on first write.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Registry`] when the file exists but cannot be
    /// read or is not valid JSON.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let drafts = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).map_err(|e| {
                AgentError::registry(
                    format!("draft store {} is not valid JSON", path.display()),
                    e,
                )
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("draft store {} does not exist yet", path.display());
                BTreeMap::new()
            }
            Err(e) => {
                return Err(AgentError::registry(
                    format!("draft store {} is unreadable", path.display()),
                    e,
                ));
            }
        };
        Ok(Self {
            path,
            inner: Mutex::new(drafts),
        })
    }

    async fn persist(&self, drafts: &BTreeMap<String, SchemaDraft>) -> Result<()> {
        let body = serde_json::to_string_pretty(drafts)
            .map_err(|e| AgentError::registry("draft store serialization failed", e))?;
        tokio::fs::write(&self.path, body).await.map_err(|e| {
            AgentError::registry(
                format!("draft store {} is unwritable", self.path.display()),
                e,
            )
        })
    }
}

#[async_trait]
impl DraftStore for JsonDraftStore {
    async fn upsert_after_scan(
        &self,
        key: &str,
        structure: Vec<TableDefinition>,
    ) -> Result<SchemaDraft> {
        let mut drafts = self.inner.lock().await;
        let draft = upsert_scan(&mut drafts, key, structure);
        self.persist(&drafts).await?;
        Ok(draft)
    }

    async fn get(&self, key: &str) -> Result<SchemaDraft> {
        let drafts = self.inner.lock().await;
        drafts
            .get(key)
            .cloned()
            .ok_or_else(|| AgentError::draft_not_found(key))
    }

    async fn apply_human_edit(
        &self,
        key: &str,
        structure: Vec<TableDefinition>,
    ) -> Result<SchemaDraft> {
        let mut drafts = self.inner.lock().await;
        let draft = replace_structure(&mut drafts, key, structure)?;
        self.persist(&drafts).await?;
        Ok(draft)
    }

    async fn record_publish_result(
        &self,
        key: &str,
        outcome: &PublishOutcome,
    ) -> Result<SchemaDraft> {
        let mut drafts = self.inner.lock().await;
        let draft = merge_publish(&mut drafts, key, outcome)?;
        self.persist(&drafts).await?;
        Ok(draft)
    }

    async fn keys(&self) -> Vec<String> {
        let drafts = self.inner.lock().await;
        drafts.keys().cloned().collect()
    }
}
