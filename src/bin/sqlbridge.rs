use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use serde_json::Value as JsonValue;
use sqlbridge::{
    DryRunDialect, EntityDataProvider, EntityDefinition, EntityMetadata, ExecutedStatement,
    Filter, FindOptions, SqlDatabase, SqlResult, Sort, Value,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "sqlbridge")]
#[command(about = "Preview the SQL compiled for an entity definition")]
struct Cli {
    /// Entity definition (JSON)
    #[arg(long, global = true)]
    entity: Option<PathBuf>,

    /// sqlite, postgres or mysql
    #[arg(long, global = true, default_value = "sqlite")]
    dialect: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// SELECT statement of a find call
    Find {
        #[arg(long)]
        filter: Option<String>,
        #[arg(long)]
        sort: Option<String>,
        #[arg(long)]
        limit: Option<u64>,
        #[arg(long)]
        page: Option<u64>,
    },
    /// COUNT statement
    Count {
        #[arg(long)]
        filter: Option<String>,
    },
    /// WHERE predicate with values inlined
    Where {
        #[arg(long)]
        filter: String,
    },
    /// CREATE TABLE statement
    Schema,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let path = cli.entity.as_deref().ok_or_else(|| anyhow!("--entity <FILE> is required"))?;
    let entity = load_entity(path)?;
    let output = run(cli.command, entity, &cli.dialect).await?;
    println!("{}", output);
    Ok(())
}

/// Compile `command` for `entity` against a dry-run `dialect` preset and
/// return the text to print.
async fn run(command: Command, entity: EntityMetadata, dialect: &str) -> Result<String> {
    let entity = Arc::new(entity);
    let preset = DryRunDialect::preset(dialect)
        .ok_or_else(|| anyhow!("unknown dialect '{}' (expected sqlite, postgres or mysql)", dialect))?;
    let db = SqlDatabase::new(Arc::new(preset.clone()));

    match command {
        Command::Find {
            filter,
            sort,
            limit,
            page,
        } => {
            let mut options = FindOptions::new();
            if let Some(filter) = filter {
                options = options.filter(parse_filter(&filter)?);
            }
            if let Some(sort) = sort {
                let json: JsonValue = serde_json::from_str(&sort).context("--sort is not valid JSON")?;
                options = options.sort(Sort::from_json(&json)?);
            }
            options.limit = limit;
            options.page = page;
            db.entity_provider(entity).find(options).await?;
            last_statement(&preset)
        }
        Command::Count { filter } => {
            let filter = match filter {
                Some(text) => parse_filter(&text)?,
                None => Filter::all(),
            };
            preset.push_result(SqlResult::new(vec!["count".into()], vec![vec![Value::from(0)]]));
            db.entity_provider(entity).count(&filter).await?;
            last_statement(&preset)
        }
        Command::Where { filter } => Ok(db.filter_to_raw(entity, &parse_filter(&filter)?).await?),
        Command::Schema => {
            db.ensure_schema(&[entity]).await?;
            last_statement(&preset)
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sqlbridge=warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_entity(path: &Path) -> Result<EntityMetadata> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read entity definition '{}'", path.display()))?;
    let metadata = EntityDefinition::from_json_str(&text)?.into_metadata()?;
    Ok(metadata)
}

fn parse_filter(text: &str) -> Result<Filter> {
    let json: JsonValue = serde_json::from_str(text).context("--filter is not valid JSON")?;
    Ok(Filter::from_json(&json)?)
}

fn last_statement(dialect: &DryRunDialect) -> Result<String> {
    let statement = dialect
        .last_statement()
        .ok_or_else(|| anyhow!("no statement was produced"))?;
    Ok(render_statement(&statement))
}

fn render_statement(statement: &ExecutedStatement) -> String {
    if statement.params.is_empty() {
        return statement.sql.clone();
    }
    let values: Vec<JsonValue> = statement.params.iter().map(|v| v.to_json()).collect();
    format!("{}\n-- params: {}", statement.sql, JsonValue::Array(values))
}
