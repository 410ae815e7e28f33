//! Core library for the dbcurator on-prem agent.
//!
//! The agent sits inside a client's network. It introspects the client's
//! databases, stages a human-curated schema draft per connection,
//! publishes curated drafts to the cloud BI catalog, and exposes a
//! read-only query gateway so catalog-produced SQL can run against live
//! data without the cloud ever holding the client's credentials.
//!
//! # Security Guarantees
//! - Client credentials are zeroized on drop and never appear in logs,
//!   error messages, or published payloads
//! - Statements arriving from outside pass the read-only SQL gate before
//!   they touch a client database
//! - Gateway connections are dedicated and closed on every path
//!
//! # Architecture
//! - `registry` and `dsn` resolve connection keys to dialect DSNs
//! - `introspect` collects structure, staged by `drafts` for curation
//! - `publish` syncs a draft to the catalog in two phases
//! - `translate` asks the catalog to turn an operator question into SQL
//! - `sqlgate` and `executor` vet and run gateway statements
//! - [`service::Agent`] composes everything behind one facade

pub mod config;
pub mod drafts;
pub mod dsn;
pub mod error;
pub mod executor;
pub mod humanize;
pub mod introspect;
pub mod logging;
pub mod models;
pub mod publish;
pub mod registry;
pub mod reports;
pub mod service;
pub mod sqlgate;
pub mod translate;

// Re-export commonly used types
pub use error::{AgentError, Result};
pub use models::{
    CloudRefs, ColumnMeta, ColumnSpec, ConnectionProfile, Dashboard, DashboardPatch, Dialect,
    NewDashboard, NewReport, PublishFailure, PublishOutcome, QueryOutput, Report, ReportPatch,
    ReportScope, SchemaDraft, TableDefinition, TableSelection,
};
pub use service::{Agent, Answer, ConnectionListing};
