//! Saved reports, dashboards, and the visibility filter.
//!
//! Reports carry a scope deciding who sees them in the library view.
//! Listing inside a dashboard bypasses scope entirely: membership in the
//! container is the whole rule, since access was granted when the
//! container itself was shared. Pagination runs on the newest-first
//! candidate list before the visibility filter, so a returned page may
//! hold fewer items than the requested limit.

use crate::error::AgentError;
use crate::models::{
    Dashboard, DashboardPatch, NewDashboard, NewReport, Report, ReportPatch, ReportScope,
};
use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

/// Storage boundary for saved reports.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Inserts a report and returns it with its assigned id.
    async fn create(&self, new: NewReport) -> Result<Report>;

    /// Fetches one report by id.
    async fn get(&self, id: i64) -> Result<Report>;

    /// Returns one newest-first page of all reports, unfiltered.
    ///
    /// Visibility is the caller's concern: [`visible_reports`] runs on the
    /// returned page, so fewer than `limit` items may survive it.
    async fn list(&self, skip: usize, limit: usize) -> Result<Vec<Report>>;

    /// Applies a partial update and returns the new state.
    async fn update(&self, id: i64, patch: ReportPatch) -> Result<Report>;

    /// Deletes one report.
    async fn delete(&self, id: i64) -> Result<()>;

    /// Deletes every report embedded in the given dashboard and returns
    /// how many went away. This is the container cascade.
    async fn delete_for_dashboard(&self, dashboard_id: i64) -> Result<usize>;
}

/// Storage boundary for dashboards.
#[async_trait]
pub trait DashboardStore: Send + Sync {
    async fn create(&self, new: NewDashboard) -> Result<Dashboard>;
    async fn get(&self, id: i64) -> Result<Dashboard>;
    /// Returns the user's dashboards, newest first.
    async fn list(&self, user: &str) -> Result<Vec<Dashboard>>;
    async fn update(&self, id: i64, patch: DashboardPatch) -> Result<Dashboard>;
    async fn delete(&self, id: i64) -> Result<()>;
}

/// Filters a candidate page down to what the requesting user may see.
///
/// With a container the rule is membership and nothing else. Without one,
/// the library rules apply: global reports for everyone, personal ones
/// for their owner, role-scoped ones for holders of a named role, and
/// owners always see their own.
#[must_use]
pub fn visible_reports(
    candidates: Vec<Report>,
    user: &str,
    role: Option<&str>,
    container: Option<i64>,
) -> Vec<Report> {
    match container {
        Some(dashboard_id) => candidates
            .into_iter()
            .filter(|report| report.dashboard_id == Some(dashboard_id))
            .collect(),
        None => candidates
            .into_iter()
            .filter(|report| is_visible(report, user, role))
            .collect(),
    }
}

// A role-scoped report with an empty target list fails closed: nobody but
// the owner sees it.
fn is_visible(report: &Report, user: &str, role: Option<&str>) -> bool {
    if report.user_identifier == user {
        return true;
    }
    match report.scope {
        ReportScope::Global => true,
        ReportScope::Personal => false,
        ReportScope::Role => {
            role.is_some_and(|role| report.scope_target.iter().any(|target| target == role))
        }
    }
}

#[derive(Debug, Default)]
struct ReportRows {
    next_id: i64,
    rows: BTreeMap<i64, Report>,
}

/// In-memory report store.
///
/// Ids are assigned monotonically, so reverse id order is creation order.
#[derive(Debug, Default)]
pub struct MemoryReportStore {
    inner: Mutex<ReportRows>,
}

impl MemoryReportStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReportStore for MemoryReportStore {
    async fn create(&self, new: NewReport) -> Result<Report> {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let now = Utc::now();
        let report = Report {
            id: inner.next_id,
            name: new.name,
            user_identifier: new.user_identifier,
            report_type: new.report_type,
            scope: new.scope,
            scope_target: new.scope_target,
            question: new.question,
            sql_query: new.sql_query,
            dashboard_id: new.dashboard_id,
            conversation_id: new.conversation_id,
            created_at: now,
            updated_at: now,
        };
        inner.rows.insert(report.id, report.clone());
        Ok(report)
    }

    async fn get(&self, id: i64) -> Result<Report> {
        let inner = self.inner.lock().await;
        inner
            .rows
            .get(&id)
            .cloned()
            .ok_or_else(|| AgentError::report_not_found(id))
    }

    async fn list(&self, skip: usize, limit: usize) -> Result<Vec<Report>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .rows
            .values()
            .rev()
            .skip(skip)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update(&self, id: i64, patch: ReportPatch) -> Result<Report> {
        let mut inner = self.inner.lock().await;
        let report = inner
            .rows
            .get_mut(&id)
            .ok_or_else(|| AgentError::report_not_found(id))?;

        if let Some(name) = patch.name {
            report.name = name;
        }
        if let Some(sql_query) = patch.sql_query {
            report.sql_query = sql_query;
        }
        if let Some(question) = patch.question {
            report.question = Some(question);
        }
        if let Some(scope) = patch.scope {
            report.scope = scope;
        }
        if let Some(scope_target) = patch.scope_target {
            report.scope_target = scope_target;
        }
        if let Some(conversation_id) = patch.conversation_id {
            report.conversation_id = Some(conversation_id);
        }
        report.updated_at = Utc::now();
        Ok(report.clone())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .rows
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AgentError::report_not_found(id))
    }

    async fn delete_for_dashboard(&self, dashboard_id: i64) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        let before = inner.rows.len();
        inner
            .rows
            .retain(|_, report| report.dashboard_id != Some(dashboard_id));
        Ok(before - inner.rows.len())
    }
}

#[derive(Debug, Default)]
struct DashboardRows {
    next_id: i64,
    rows: BTreeMap<i64, Dashboard>,
}

/// In-memory dashboard store.
#[derive(Debug, Default)]
pub struct MemoryDashboardStore {
    inner: Mutex<DashboardRows>,
}

impl MemoryDashboardStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DashboardStore for MemoryDashboardStore {
    async fn create(&self, new: NewDashboard) -> Result<Dashboard> {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let now = Utc::now();
        let dashboard = Dashboard {
            id: inner.next_id,
            title: new.title,
            user_identifier: new.user_identifier,
            layout: new.layout,
            context_definition: new.context_definition,
            created_at: now,
            updated_at: now,
        };
        inner.rows.insert(dashboard.id, dashboard.clone());
        Ok(dashboard)
    }

    async fn get(&self, id: i64) -> Result<Dashboard> {
        let inner = self.inner.lock().await;
        inner
            .rows
            .get(&id)
            .cloned()
            .ok_or_else(|| AgentError::dashboard_not_found(id))
    }

    async fn list(&self, user: &str) -> Result<Vec<Dashboard>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .rows
            .values()
            .rev()
            .filter(|dashboard| dashboard.user_identifier == user)
            .cloned()
            .collect())
    }

    async fn update(&self, id: i64, patch: DashboardPatch) -> Result<Dashboard> {
        let mut inner = self.inner.lock().await;
        let dashboard = inner
            .rows
            .get_mut(&id)
            .ok_or_else(|| AgentError::dashboard_not_found(id))?;

        if let Some(title) = patch.title {
            dashboard.title = title;
        }
        if let Some(layout) = patch.layout {
            dashboard.layout = layout;
        }
        if let Some(context_definition) = patch.context_definition {
            dashboard.context_definition = context_definition;
        }
        dashboard.updated_at = Utc::now();
        Ok(dashboard.clone())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .rows
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AgentError::dashboard_not_found(id))
    }
}
