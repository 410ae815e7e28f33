//! On-prem curation agent.
//!
//! This binary drives the whole pipeline from the client's premises:
//! scanning client databases into local drafts, curating the generated
//! column labels, publishing curated drafts to the cloud catalog, and
//! executing read-only SQL on the cloud product's behalf. Client
//! credentials never leave the machine; every target printed or logged
//! is already redacted.

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};
use dbcurator_core::{
    config::{AgentConfig, CatalogConfig},
    logging::init_logging,
    Agent, AgentError, QueryOutput, SchemaDraft, TableDefinition,
};
use serde_json::Value as JsonValue;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "dbcurator-agent")]
#[command(about = "On-prem schema curation and query gateway agent")]
#[command(version)]
#[command(long_about = "
Dbcurator Agent - on-prem side of the curated BI catalog

The agent runs next to the client's databases. It scans their structure
into local drafts, lets a curator fix the generated column labels,
publishes curated drafts to the cloud catalog, and answers read-only
queries on behalf of the cloud product. Client credentials stay in the
local connection registry and never travel.

SECURITY FEATURES:
- Credentials live only in the local registry file
- Passwords are redacted in every log line and error
- Gateway statements pass a read-only safety gate
- Published payloads carry structure and labels, never rows

SUPPORTED DATABASES:
- MySQL / MariaDB
- PostgreSQL
- SQL Server
- Oracle (registry entries resolve; driver not yet wired)

EXAMPLES:
  dbcurator-agent connections
  dbcurator-agent scan traro_cases
  dbcurator-agent draft show traro_cases --json > draft.json
  dbcurator-agent draft relabel traro_cases casos fecha_ingreso 'Fecha de Ingreso'
  dbcurator-agent publish traro_cases
  dbcurator-agent query traro_cases 'SELECT estado, COUNT(*) FROM casos GROUP BY estado'
  dbcurator-agent ask traro_cases 'cuantos casos se abrieron este mes'
")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Option<Command>,

    /// Connection registry path
    #[arg(
        long,
        env = "CONNECTIONS_REGISTRY",
        default_value = "connections.json",
        help = "Path to the connection registry JSON file"
    )]
    pub registry: PathBuf,

    /// Draft store path
    #[arg(
        long,
        env = "DRAFTS_PATH",
        default_value = "drafts.json",
        help = "Path to the draft store JSON file"
    )]
    pub drafts: PathBuf,

    /// Cloud catalog base URL
    #[arg(
        long,
        env = "CATALOG_API_URL",
        default_value = "http://localhost:8000",
        help = "Base URL of the cloud catalog API"
    )]
    pub catalog_url: String,

    /// Cloud catalog API token
    #[arg(
        long,
        env = "CATALOG_API_TOKEN",
        default_value = "",
        hide_env_values = true,
        help = "Bearer token for the cloud catalog (required by publish and ask)"
    )]
    pub catalog_token: String,
}

#[derive(Args)]
pub struct GlobalArgs {
    /// Increase verbosity
    #[arg(
        short,
        long,
        action = clap::ArgAction::Count,
        help = "Increase verbosity (-v, -vv, -vvv)"
    )]
    pub verbose: u8,

    /// Suppress output
    #[arg(short, long, help = "Suppress all output except errors")]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// List registered connections with redacted targets
    Connections,
    /// Scan a client database and stage its structure as a draft
    Scan(ScanArgs),
    /// Inspect and edit staged drafts
    #[command(subcommand)]
    Draft(DraftCommand),
    /// Publish a curated draft to the cloud catalog
    Publish(PublishArgs),
    /// Run one read-only statement through the gateway
    Query(QueryArgs),
    /// Ask a natural-language question against published tables
    Ask(AskArgs),
}

#[derive(Subcommand)]
pub enum DraftCommand {
    /// List staged drafts and their sync state
    List,
    /// Print one draft
    Show(ShowArgs),
    /// Change one column label
    Relabel(RelabelArgs),
    /// Replace a draft's structure from a JSON file
    Edit(EditArgs),
}

#[derive(Args)]
pub struct ScanArgs {
    /// Connection key from the registry
    #[arg(help = "Connection key from the registry")]
    pub key: String,
}

#[derive(Args)]
pub struct ShowArgs {
    /// Connection key
    #[arg(help = "Connection key of the draft")]
    pub key: String,

    /// Emit JSON
    #[arg(long, help = "Print the draft as JSON")]
    pub json: bool,
}

#[derive(Args)]
pub struct RelabelArgs {
    /// Connection key
    #[arg(help = "Connection key of the draft")]
    pub key: String,

    /// Table name
    #[arg(help = "Table name, qualified (db.table) or bare")]
    pub table: String,

    /// Column name
    #[arg(help = "Column to relabel")]
    pub column: String,

    /// New label
    #[arg(help = "Human-facing label, e.g. 'Fecha de Ingreso'")]
    pub label: String,
}

#[derive(Args)]
pub struct EditArgs {
    /// Connection key
    #[arg(help = "Connection key of the draft")]
    pub key: String,

    /// Edited structure file
    #[arg(help = "JSON file holding the edited structure")]
    pub file: PathBuf,
}

#[derive(Args)]
pub struct PublishArgs {
    /// Connection key
    #[arg(help = "Connection key of the draft to publish")]
    pub key: String,
}

#[derive(Args)]
pub struct QueryArgs {
    /// Connection key
    #[arg(help = "Connection key from the registry")]
    pub key: String,

    /// SQL text
    #[arg(help = "Read-only SQL statement; anything else is rejected")]
    pub sql: String,

    /// Emit JSON
    #[arg(long, help = "Print the result as JSON")]
    pub json: bool,
}

#[derive(Args)]
pub struct AskArgs {
    /// Connection key
    #[arg(help = "Connection key from the registry")]
    pub key: String,

    /// Question text
    #[arg(help = "Natural-language question about the published tables")]
    pub question: String,

    /// Emit JSON
    #[arg(long, help = "Print the generated SQL and result as JSON")]
    pub json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.global.verbose, cli.global.quiet)?;

    let Some(command) = &cli.command else {
        eprintln!("Error: a subcommand is required");
        eprintln!("Use --help for usage information");
        std::process::exit(1);
    };

    // Commands that talk to the catalog cannot do anything useful without
    // a token, so fail before opening any state.
    if matches!(command, Command::Publish(_) | Command::Ask(_)) && cli.catalog_token.is_empty() {
        eprintln!("Error: --catalog-token (or CATALOG_API_TOKEN) is required for this command");
        std::process::exit(1);
    }

    let mut config = AgentConfig::new(
        cli.registry.clone(),
        CatalogConfig {
            base_url: cli.catalog_url.clone(),
            token: cli.catalog_token.clone(),
        },
    );
    config.drafts_path = cli.drafts.clone();

    let agent = Agent::from_config(config)?;

    match command {
        Command::Connections => {
            list_connections(&agent);
            Ok(())
        }
        Command::Scan(args) => scan(&agent, &args.key).await,
        Command::Draft(DraftCommand::List) => list_drafts(&agent).await,
        Command::Draft(DraftCommand::Show(args)) => show_draft(&agent, args).await,
        Command::Draft(DraftCommand::Relabel(args)) => relabel(&agent, args).await,
        Command::Draft(DraftCommand::Edit(args)) => edit_draft(&agent, args).await,
        Command::Publish(args) => publish(&agent, &args.key).await,
        Command::Query(args) => query(&agent, args).await,
        Command::Ask(args) => ask(&agent, args).await,
    }
}

/// Prints every registry entry with its redacted target.
fn list_connections(agent: &Agent) {
    let listing = agent.connections();
    if listing.is_empty() {
        println!("No connections registered");
        return;
    }
    for entry in listing {
        println!("{:<24} {:<12} {}", entry.key, entry.dialect.as_tag(), entry.target);
    }
}

async fn scan(agent: &Agent, key: &str) -> anyhow::Result<()> {
    info!("Scanning '{key}'...");
    let draft = agent.scan(key).await.map_err(|e| {
        error!("Scan failed: {e}");
        e
    })?;

    info!("✓ Staged {} table(s) for '{key}'", draft.structure.len());
    for table in &draft.structure {
        println!("{}  ({} columns)", table.table_name, table.column_metadata.len());
    }
    println!("\nReview labels with: dbcurator-agent draft show {key}");
    Ok(())
}

async fn list_drafts(agent: &Agent) -> anyhow::Result<()> {
    let keys = agent.draft_keys().await;
    if keys.is_empty() {
        println!("No drafts staged");
        return Ok(());
    }
    for key in keys {
        let draft = agent.draft(&key).await?;
        let state = if draft.is_synced { "synced" } else { "not synced" };
        println!("{key:<24} {} table(s), {state}", draft.structure.len());
    }
    Ok(())
}

async fn show_draft(agent: &Agent, args: &ShowArgs) -> anyhow::Result<()> {
    let draft = agent.draft(&args.key).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&draft)?);
        return Ok(());
    }

    println!(
        "Draft for '{}'  (synced: {}, last scanned: {})",
        draft.connection_key, draft.is_synced, draft.last_scanned_at
    );
    for table in &draft.structure {
        println!("\n{}", table.table_name);
        for column in &table.column_metadata {
            let marker = if column.is_default { "*" } else { " " };
            println!(
                "  {marker} {:<30} {:<20} {}",
                column.col, column.data_type, column.label
            );
        }
    }
    println!("\ncolumns marked * still carry their generated label");
    Ok(())
}

async fn relabel(agent: &Agent, args: &RelabelArgs) -> anyhow::Result<()> {
    let draft = agent
        .relabel(&args.key, &args.table, &args.column, &args.label)
        .await?;

    info!("✓ Label for {}.{} is now '{}'", args.table, args.column, args.label);
    println!(
        "Draft updated; run 'dbcurator-agent publish {}' to sync the catalog",
        draft.connection_key
    );
    Ok(())
}

async fn edit_draft(agent: &Agent, args: &EditArgs) -> anyhow::Result<()> {
    let text = tokio::fs::read_to_string(&args.file)
        .await
        .with_context(|| format!("cannot read {}", args.file.display()))?;
    let structure = parse_structure(&text).with_context(|| {
        format!(
            "{} holds neither a definitions array nor a draft dump",
            args.file.display()
        )
    })?;

    let draft = agent.apply_edit(&args.key, structure).await?;
    info!(
        "✓ Replaced draft for '{}': {} table(s), synced={}",
        args.key,
        draft.structure.len(),
        draft.is_synced
    );
    Ok(())
}

/// Accepts either a bare definitions array or a full `draft show --json`
/// dump, whose `structure` field is taken.
fn parse_structure(text: &str) -> serde_json::Result<Vec<TableDefinition>> {
    serde_json::from_str::<Vec<TableDefinition>>(text)
        .or_else(|_| serde_json::from_str::<SchemaDraft>(text).map(|draft| draft.structure))
}

async fn publish(agent: &Agent, key: &str) -> anyhow::Result<()> {
    info!("Publishing draft for '{key}'...");
    match agent.publish(key).await {
        Ok(draft) => {
            if let Some(refs) = &draft.cloud_refs {
                info!(
                    "✓ Published {} table(s) under schema {}",
                    refs.table_ids.len(),
                    refs.schema_id
                );
            }
            println!("Draft for '{key}' is synced");
            Ok(())
        }
        Err(AgentError::CloudSync { context, failures }) => {
            error!("Publish incomplete: {context}");
            for failure in &failures {
                error!("  {failure}");
            }
            // Accepted tables kept their cloud ids; a retry publishes the
            // rest under the same schema.
            anyhow::bail!("publish incomplete: {context}");
        }
        Err(e) => {
            error!("Publish failed: {e}");
            Err(e.into())
        }
    }
}

async fn query(agent: &Agent, args: &QueryArgs) -> anyhow::Result<()> {
    let output = agent.execute(&args.key, &args.sql).await.map_err(|e| {
        error!("Query failed: {e}");
        e
    })?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }
    print_rows(&output);
    Ok(())
}

async fn ask(agent: &Agent, args: &AskArgs) -> anyhow::Result<()> {
    info!("Translating question for '{}'...", args.key);
    let answer = agent.ask(&args.key, &args.question).await.map_err(|e| {
        error!("Ask failed: {e}");
        e
    })?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&answer)?);
        return Ok(());
    }

    println!("SQL: {}", answer.sql);
    if let Some(explanation) = &answer.explanation {
        println!("Explanation: {explanation}");
    }
    println!();
    print_rows(&answer.output);
    Ok(())
}

fn print_rows(output: &QueryOutput) {
    if output.row_count == 0 {
        println!("0 rows");
        return;
    }
    print_aligned(&output.columns, &output.rows);
    println!("\n{} row(s)", output.row_count);
}

fn print_aligned(columns: &[String], rows: &[Vec<JsonValue>]) {
    let rendered: Vec<Vec<String>> = rows
        .iter()
        .map(|row| row.iter().map(render_cell).collect())
        .collect();

    let mut widths: Vec<usize> = columns.iter().map(String::len).collect();
    for row in &rendered {
        for (i, cell) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(i) {
                *width = (*width).max(cell.len());
            }
        }
    }

    let header: Vec<String> = columns
        .iter()
        .zip(widths.iter().copied())
        .map(|(name, width)| format!("{name:<width$}"))
        .collect();
    println!("{}", header.join("  "));
    let rule: Vec<String> = widths.iter().map(|width| "-".repeat(*width)).collect();
    println!("{}", rule.join("  "));

    for row in &rendered {
        let line: Vec<String> = row
            .iter()
            .zip(widths.iter().copied())
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect();
        println!("{}", line.join("  "));
    }
}

fn render_cell(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "NULL".to_string(),
        JsonValue::String(text) => text.clone(),
        other => other.to_string(),
    }
}
