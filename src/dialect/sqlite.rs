// ============================================================================
// SQLite Dialect (sqlx)
// ============================================================================
//
// Commands run on a pooled connection, or on the transaction connection
// when the dialect was handed to a transaction action. The transaction is
// held in a shared slot that is emptied on commit / rollback, so a scoped
// dialect that outlives its transaction can no longer reach a connection.
// Nested transactions use savepoints `sp_1`, `sp_2`, ...
//
// ============================================================================

use super::{
    DialectCapabilities, SqlCommand, SqlImplementation, SqlResult, SqlTransactionAction,
    returns_rows,
};
use crate::core::{Result, SqlError, Value};
use crate::metadata::EntityMetadata;
use crate::metadata::db_names::double_quote_identifier;
use crate::schema::create_table_sql;
use async_trait::async_trait;
use chrono::SecondsFormat;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions,
    SqliteRow,
};
use sqlx::{Arguments, Column, Row, Sqlite, Transaction, TypeInfo, ValueRef};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;

const IN_MEMORY_URL: &str = "sqlite::memory:";

/// Connection settings for [`SqliteDialect::connect`].
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    pub url: String,
    pub max_connections: u32,
    /// Use `returning` on insert / update. Turn off to exercise the re-fetch path.
    pub supports_returning: bool,
    /// Run `create table if not exists` when an entity is first used.
    pub create_tables: bool,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl SqliteConfig {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            max_connections: 5,
            supports_returning: true,
            create_tables: true,
        }
    }

    /// Private in-memory database. Limited to one connection, which is kept
    /// open for the lifetime of the pool.
    pub fn in_memory() -> Self {
        Self::new(IN_MEMORY_URL).max_connections(1)
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn without_returning(mut self) -> Self {
        self.supports_returning = false;
        self
    }

    pub fn create_tables(mut self, create: bool) -> Self {
        self.create_tables = create;
        self
    }

    fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }
}

type SharedTransaction = Arc<Mutex<Option<Transaction<'static, Sqlite>>>>;

#[derive(Clone)]
struct TransactionSlot {
    connection: SharedTransaction,
    depth: usize,
}

#[derive(Clone)]
pub struct SqliteDialect {
    pool: SqlitePool,
    config: Arc<SqliteConfig>,
    transaction: Option<TransactionSlot>,
}

fn driver(err: sqlx::Error) -> SqlError {
    SqlError::Driver(err.to_string())
}

impl SqliteDialect {
    pub async fn connect(config: SqliteConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| SqlError::Configuration(format!("invalid sqlite url '{}': {}", config.url, e)))?
            .create_if_missing(true);

        let mut pool_options = SqlitePoolOptions::new().max_connections(config.max_connections.max(1));
        if config.is_in_memory() {
            // every new connection would open a different empty database
            pool_options = pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options.connect_with(options).await.map_err(driver)?;
        tracing::debug!(url = %config.url, "sqlite pool connected");

        Ok(Self {
            pool,
            config: Arc::new(config),
            transaction: None,
        })
    }

    pub async fn in_memory() -> Result<Self> {
        Self::connect(SqliteConfig::in_memory()).await
    }

    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    fn scoped(&self, connection: SharedTransaction, depth: usize) -> Self {
        Self {
            pool: self.pool.clone(),
            config: self.config.clone(),
            transaction: Some(TransactionSlot { connection, depth }),
        }
    }

    async fn run_plain(&self, sql: &str) -> Result<()> {
        match self.create_command().execute(sql).await {
            Ok(_) => Ok(()),
            Err(SqlError::Driver(message)) => Err(SqlError::Execution {
                message,
                sql: sql.to_string(),
                params: Vec::new(),
            }),
            Err(err) => Err(err),
        }
    }
}

enum Target {
    Pool(SqlitePool),
    Transaction(SharedTransaction),
}

struct SqliteCommand {
    target: Target,
    params: Vec<Value>,
}

fn bind(args: &mut SqliteArguments<'_>, value: Value) -> Result<()> {
    let bound = match value {
        Value::Null => args.add(None::<String>),
        Value::Integer(i) => args.add(i),
        Value::Float(f) => args.add(f),
        Value::Text(s) => args.add(s),
        Value::Boolean(b) => args.add(b),
        Value::Timestamp(t) => args.add(t.to_rfc3339_opts(SecondsFormat::Millis, true)),
        Value::Json(j) => args.add(j.to_string()),
    };
    bound.map_err(|e| SqlError::Driver(format!("failed to bind parameter: {}", e)))
}

fn decode_cell(row: &SqliteRow, index: usize) -> Result<Value> {
    let raw = row.try_get_raw(index).map_err(driver)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let storage = raw.type_info().name().to_string();
    let value = match storage.as_str() {
        "INTEGER" | "BOOLEAN" => Value::Integer(row.try_get_unchecked::<i64, _>(index).map_err(driver)?),
        "REAL" | "NUMERIC" => Value::Float(row.try_get_unchecked::<f64, _>(index).map_err(driver)?),
        "BLOB" => {
            let bytes = row.try_get_unchecked::<Vec<u8>, _>(index).map_err(driver)?;
            Value::Text(String::from_utf8_lossy(&bytes).into_owned())
        }
        _ => Value::Text(row.try_get_unchecked::<String, _>(index).map_err(driver)?),
    };
    Ok(value)
}

fn decode_rows(rows: &[SqliteRow]) -> Result<SqlResult> {
    let columns = rows
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();
    let rows = rows
        .iter()
        .map(|row| (0..row.len()).map(|i| decode_cell(row, i)).collect::<Result<Vec<_>>>())
        .collect::<Result<Vec<_>>>()?;
    Ok(SqlResult::new(columns, rows))
}

async fn run(connection: &mut SqliteConnection, sql: &str, params: Vec<Value>) -> Result<SqlResult> {
    let mut args = SqliteArguments::default();
    for value in params {
        bind(&mut args, value)?;
    }
    let query = sqlx::query_with(sql, args);

    if returns_rows(sql) {
        let rows = query.fetch_all(&mut *connection).await.map_err(driver)?;
        decode_rows(&rows)
    } else {
        let done = query.execute(&mut *connection).await.map_err(driver)?;
        Ok(SqlResult::empty()
            .with_rows_affected(done.rows_affected())
            .with_last_insert_id(done.last_insert_rowid()))
    }
}

#[async_trait]
impl SqlCommand for SqliteCommand {
    fn param(&mut self, value: Value) -> String {
        self.params.push(value);
        "?".to_string()
    }

    async fn execute(&mut self, sql: &str) -> Result<SqlResult> {
        let params = std::mem::take(&mut self.params);
        match &self.target {
            Target::Pool(pool) => {
                let mut connection = pool.acquire().await.map_err(driver)?;
                run(&mut connection, sql, params).await
            }
            Target::Transaction(shared) => {
                let mut slot = shared.lock().await;
                let transaction = slot.as_mut().ok_or(SqlError::TransactionCompleted)?;
                run(&mut *transaction, sql, params).await
            }
        }
    }
}

#[async_trait]
impl SqlImplementation for SqliteDialect {
    fn create_command(&self) -> Box<dyn SqlCommand> {
        let target = match &self.transaction {
            Some(slot) => Target::Transaction(slot.connection.clone()),
            None => Target::Pool(self.pool.clone()),
        };
        Box::new(SqliteCommand {
            target,
            params: Vec::new(),
        })
    }

    fn capabilities(&self) -> DialectCapabilities {
        DialectCapabilities {
            supports_returning: self.config.supports_returning,
            supports_json_column: false,
            order_by_nulls_first: false,
        }
    }

    fn wrap_identifier(&self, name: &str) -> String {
        double_quote_identifier(name)
    }

    async fn entity_first_use(&self, entity: &EntityMetadata) -> Result<()> {
        if self.config.create_tables {
            let ddl = create_table_sql(entity, &double_quote_identifier);
            tracing::debug!(entity = entity.key(), "creating table on first use");
            self.run_plain(&ddl).await?;
        }
        Ok(())
    }

    async fn ensure_schema(&self, entities: &[Arc<EntityMetadata>]) -> Result<()> {
        for entity in entities {
            self.run_plain(&create_table_sql(entity, &double_quote_identifier)).await?;
        }
        Ok(())
    }

    async fn transaction(&self, action: SqlTransactionAction) -> Result<()> {
        let Some(slot) = &self.transaction else {
            let transaction = self.pool.begin().await.map_err(driver)?;
            let shared: SharedTransaction = Arc::new(Mutex::new(Some(transaction)));
            tracing::debug!("transaction started");

            let outcome = action(Arc::new(self.scoped(shared.clone(), 1))).await;

            let transaction = shared.lock().await.take().ok_or(SqlError::TransactionCompleted)?;
            return match outcome {
                Ok(()) => {
                    transaction.commit().await.map_err(driver)?;
                    tracing::debug!("transaction committed");
                    Ok(())
                }
                Err(err) => {
                    if let Err(rollback) = transaction.rollback().await {
                        tracing::warn!(error = %rollback, "transaction rollback failed");
                    }
                    Err(err)
                }
            };
        };

        let savepoint = format!("sp_{}", slot.depth);
        self.run_plain(&format!("savepoint {}", savepoint)).await?;
        let outcome = action(Arc::new(self.scoped(slot.connection.clone(), slot.depth + 1))).await;
        match outcome {
            Ok(()) => self.run_plain(&format!("release savepoint {}", savepoint)).await,
            Err(err) => {
                let rollback = format!("rollback to savepoint {0}; release savepoint {0}", savepoint);
                for statement in rollback.split("; ") {
                    if let Err(e) = self.run_plain(statement).await {
                        tracing::warn!(error = %e, savepoint = %savepoint, "savepoint rollback failed");
                    }
                }
                Err(err)
            }
        }
    }

    async fn end(&self) -> Result<()> {
        if self.transaction.is_none() {
            self.pool.close().await;
            tracing::debug!("sqlite pool closed");
        }
        Ok(())
    }
}
