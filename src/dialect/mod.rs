// ============================================================================
// Dialect Adapter Contract
// ============================================================================
//
// Everything the core needs from a backend:
// - a command factory producing parameterised statements
// - a capability record, read once when a `SqlDatabase` is built
// - limit/offset syntax and identifier wrapping
// - lifecycle hooks (first use of an entity, schema, transactions, end)
//
// The core degrades behaviour from the capability flags only; it never
// looks at which backend it is talking to.
//
// ============================================================================

pub mod dry_run;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use crate::core::{Result, SqlError, Value};
use crate::metadata::EntityMetadata;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

pub use dry_run::{DryRunDialect, ExecutedStatement};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteConfig, SqliteDialect};

/// Rows returned by a statement, addressed by select position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// Rows changed by a mutation, when the driver reports it.
    pub rows_affected: Option<u64>,
    /// Generated key of the last INSERT, when the driver reports it.
    pub last_insert_id: Option<i64>,
}

impl SqlResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns,
            rows,
            rows_affected: None,
            last_insert_id: None,
        }
    }

    pub fn with_rows_affected(mut self, rows_affected: u64) -> Self {
        self.rows_affected = Some(rows_affected);
        self
    }

    pub fn with_last_insert_id(mut self, id: i64) -> Self {
        self.last_insert_id = Some(id);
        self
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_name_at(&self, index: usize) -> Option<&str> {
        self.columns.get(index).map(String::as_str)
    }
}

/// One statement under construction. `param` appends a value to the
/// statement's parameter stream and returns the token that refers to it.
#[async_trait]
pub trait SqlCommand: Send {
    fn param(&mut self, value: Value) -> String;

    async fn execute(&mut self, sql: &str) -> Result<SqlResult>;
}

/// Placeholder syntax of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenStyle {
    /// `?`
    #[default]
    Question,
    /// `$1`, `$2`, ...
    Dollar,
    /// `?1`, `?2`, ...
    Numbered,
    /// `:p1`, `:p2`, ...
    Named,
}

impl TokenStyle {
    /// Token for the `position`-th (1-based) parameter.
    pub fn token(self, position: usize) -> String {
        match self {
            Self::Question => "?".to_string(),
            Self::Dollar => format!("${}", position),
            Self::Numbered => format!("?{}", position),
            Self::Named => format!(":p{}", position),
        }
    }
}

/// Collects parameters without executing anything.
#[derive(Debug, Clone, Default)]
pub struct ParameterStream {
    style: TokenStyle,
    values: Vec<Value>,
}

impl ParameterStream {
    pub fn new(style: TokenStyle) -> Self {
        Self {
            style,
            values: Vec::new(),
        }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

#[async_trait]
impl SqlCommand for ParameterStream {
    fn param(&mut self, value: Value) -> String {
        self.values.push(value);
        self.style.token(self.values.len())
    }

    async fn execute(&mut self, _sql: &str) -> Result<SqlResult> {
        Err(SqlError::UnsupportedOperation("a parameter stream cannot execute statements".into()))
    }
}

/// Inlines every parameter as an SQL literal.
#[derive(Debug, Clone, Copy, Default)]
pub struct LiteralCommand;

#[async_trait]
impl SqlCommand for LiteralCommand {
    fn param(&mut self, value: Value) -> String {
        value.to_sql_literal()
    }

    async fn execute(&mut self, _sql: &str) -> Result<SqlResult> {
        Err(SqlError::UnsupportedOperation("a literal command cannot execute statements".into()))
    }
}

/// What a backend supports. Checked once per `SqlDatabase`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialectCapabilities {
    /// INSERT / UPDATE accept a `returning` clause.
    pub supports_returning: bool,
    /// JSON values can be stored natively.
    pub supports_json_column: bool,
    /// Emit `nulls first` / `nulls last` so NULLs sort as the smallest value.
    pub order_by_nulls_first: bool,
}

impl Default for DialectCapabilities {
    fn default() -> Self {
        Self {
            supports_returning: true,
            supports_json_column: false,
            order_by_nulls_first: false,
        }
    }
}

/// Callback run inside a dialect transaction; receives an implementation
/// bound to the transaction's single connection.
pub type SqlTransactionAction =
    Box<dyn FnOnce(Arc<dyn SqlImplementation>) -> BoxFuture<'static, Result<()>> + Send>;

/// Box an async closure as a [`SqlTransactionAction`].
pub fn transaction_action<F, Fut>(action: F) -> SqlTransactionAction
where
    F: FnOnce(Arc<dyn SqlImplementation>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Box::new(move |sql| Box::pin(action(sql)))
}

#[async_trait]
pub trait SqlImplementation: Send + Sync {
    fn create_command(&self) -> Box<dyn SqlCommand>;

    fn capabilities(&self) -> DialectCapabilities;

    fn limit_syntax(&self, limit: u64, offset: u64) -> String {
        format!("limit {} offset {}", limit, offset)
    }

    fn wrap_identifier(&self, name: &str) -> String {
        name.to_string()
    }

    /// Called once per entity per `SqlDatabase`, before its first statement.
    async fn entity_first_use(&self, entity: &EntityMetadata) -> Result<()>;

    async fn ensure_schema(&self, _entities: &[Arc<EntityMetadata>]) -> Result<()> {
        Ok(())
    }

    /// Run `action` in a transaction: commit when it succeeds, roll back
    /// and return its error unchanged when it fails. Called on an
    /// implementation that is already transactional, this nests
    /// (savepoint or pass-through, at the dialect's discretion).
    async fn transaction(&self, action: SqlTransactionAction) -> Result<()>;

    /// Signalled after every successful insert / update / delete.
    fn after_mutation(&self) {}

    async fn end(&self) -> Result<()> {
        Ok(())
    }
}

/// Upper-cased first word of a statement.
pub fn leading_keyword(sql: &str) -> String {
    sql.split_whitespace()
        .next()
        .map(|word| word.trim_start_matches('(').to_ascii_uppercase())
        .unwrap_or_default()
}

/// Whether a statement produces a row set (queries, or mutations with a
/// `returning` clause).
pub fn returns_rows(sql: &str) -> bool {
    match leading_keyword(sql).as_str() {
        "SELECT" | "WITH" | "VALUES" | "PRAGMA" | "EXPLAIN" => true,
        _ => sql
            .split_whitespace()
            .any(|word| word.eq_ignore_ascii_case("returning")),
    }
}
