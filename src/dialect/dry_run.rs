// ============================================================================
// Dry-Run Dialect
// ============================================================================
//
// A backend that executes nothing. Every statement is recorded with its
// bound parameters and answered from a queue of scripted results, so the
// SQL a provider emits (and the fallback flows it takes) can be inspected
// for any capability combination.
//
// Presets mirror common backends:
//
//   sqlite    `?`   "ident"   returning
//   postgres  `$n`  "ident"   returning, json columns, nulls first/last
//   mysql     `?`   `ident`   no returning, json columns
//
// ============================================================================

use super::{
    DialectCapabilities, SqlCommand, SqlImplementation, SqlResult, SqlTransactionAction,
    TokenStyle, returns_rows,
};
use crate::core::{Result, SqlError, Value};
use crate::metadata::EntityMetadata;
use crate::schema::create_table_sql;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// A statement as it would have been sent to the database.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedStatement {
    pub sql: String,
    pub params: Vec<Value>,
}

#[derive(Debug)]
enum Scripted {
    Rows(SqlResult),
    Failure(String),
}

#[derive(Debug, Default)]
struct DryRunState {
    statements: Vec<ExecutedStatement>,
    scripted: VecDeque<Scripted>,
    first_used: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DryRunDialect {
    state: Arc<Mutex<DryRunState>>,
    mutations: Arc<AtomicUsize>,
    style: TokenStyle,
    capabilities: DialectCapabilities,
    quote: Option<char>,
    depth: usize,
}

impl Default for DryRunDialect {
    fn default() -> Self {
        Self::new()
    }
}

impl DryRunDialect {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(DryRunState::default())),
            mutations: Arc::new(AtomicUsize::new(0)),
            style: TokenStyle::Question,
            capabilities: DialectCapabilities::default(),
            quote: None,
            depth: 0,
        }
    }

    /// Dialect named `sqlite`, `postgres` or `mysql`.
    pub fn preset(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sqlite" => Some(Self::new().quote_identifiers('"')),
            "postgres" | "postgresql" => Some(
                Self::new()
                    .token_style(TokenStyle::Dollar)
                    .quote_identifiers('"')
                    .with_json_columns()
                    .order_by_nulls_first(),
            ),
            "mysql" => Some(
                Self::new()
                    .quote_identifiers('`')
                    .without_returning()
                    .with_json_columns(),
            ),
            _ => None,
        }
    }

    pub fn token_style(mut self, style: TokenStyle) -> Self {
        self.style = style;
        self
    }

    pub fn without_returning(mut self) -> Self {
        self.capabilities.supports_returning = false;
        self
    }

    pub fn with_json_columns(mut self) -> Self {
        self.capabilities.supports_json_column = true;
        self
    }

    pub fn order_by_nulls_first(mut self) -> Self {
        self.capabilities.order_by_nulls_first = true;
        self
    }

    pub fn quote_identifiers(mut self, quote: char) -> Self {
        self.quote = Some(quote);
        self
    }

    fn state(&self) -> MutexGuard<'_, DryRunState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Answer the next executed statement with `result`.
    pub fn push_result(&self, result: SqlResult) {
        self.state().scripted.push_back(Scripted::Rows(result));
    }

    /// Fail the next executed statement with a driver error.
    pub fn push_error(&self, message: &str) {
        self.state().scripted.push_back(Scripted::Failure(message.to_string()));
    }

    pub fn statements(&self) -> Vec<ExecutedStatement> {
        self.state().statements.clone()
    }

    pub fn last_statement(&self) -> Option<ExecutedStatement> {
        self.state().statements.last().cloned()
    }

    pub fn clear(&self) {
        let mut state = self.state();
        state.statements.clear();
        state.scripted.clear();
    }

    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    pub fn first_used_entities(&self) -> Vec<String> {
        self.state().first_used.clone()
    }

    fn record(&self, sql: String, params: Vec<Value>) {
        self.state().statements.push(ExecutedStatement { sql, params });
    }

    fn nested(&self) -> Self {
        Self {
            depth: self.depth + 1,
            ..self.clone()
        }
    }
}

struct DryRunCommand {
    dialect: DryRunDialect,
    params: Vec<Value>,
}

#[async_trait]
impl SqlCommand for DryRunCommand {
    fn param(&mut self, value: Value) -> String {
        self.params.push(value);
        self.dialect.style.token(self.params.len())
    }

    async fn execute(&mut self, sql: &str) -> Result<SqlResult> {
        let params = std::mem::take(&mut self.params);
        let mut state = self.dialect.state();
        state.statements.push(ExecutedStatement {
            sql: sql.to_string(),
            params,
        });
        match state.scripted.pop_front() {
            Some(Scripted::Rows(result)) => Ok(result),
            Some(Scripted::Failure(message)) => Err(SqlError::Driver(message)),
            None if returns_rows(sql) => Ok(SqlResult::empty()),
            None => Ok(SqlResult::empty().with_rows_affected(1)),
        }
    }
}

#[async_trait]
impl SqlImplementation for DryRunDialect {
    fn create_command(&self) -> Box<dyn SqlCommand> {
        Box::new(DryRunCommand {
            dialect: self.clone(),
            params: Vec::new(),
        })
    }

    fn capabilities(&self) -> DialectCapabilities {
        self.capabilities
    }

    fn wrap_identifier(&self, name: &str) -> String {
        match self.quote {
            None => name.to_string(),
            Some(q) => name
                .split('.')
                .map(|part| {
                    let doubled = part.replace(q, &format!("{q}{q}"));
                    format!("{q}{doubled}{q}")
                })
                .collect::<Vec<_>>()
                .join("."),
        }
    }

    async fn entity_first_use(&self, entity: &EntityMetadata) -> Result<()> {
        self.state().first_used.push(entity.key().to_string());
        Ok(())
    }

    async fn ensure_schema(&self, entities: &[Arc<EntityMetadata>]) -> Result<()> {
        for entity in entities {
            let ddl = create_table_sql(entity, &|name: &str| self.wrap_identifier(name));
            self.record(ddl, Vec::new());
        }
        Ok(())
    }

    async fn transaction(&self, action: SqlTransactionAction) -> Result<()> {
        let savepoint = format!("sp_{}", self.depth);
        let (begin, commit, rollback) = if self.depth == 0 {
            ("begin".to_string(), "commit".to_string(), "rollback".to_string())
        } else {
            (
                format!("savepoint {}", savepoint),
                format!("release savepoint {}", savepoint),
                format!("rollback to savepoint {}", savepoint),
            )
        };

        self.record(begin, Vec::new());
        match action(Arc::new(self.nested())).await {
            Ok(()) => {
                self.record(commit, Vec::new());
                Ok(())
            }
            Err(err) => {
                self.record(rollback, Vec::new());
                Err(err)
            }
        }
    }

    fn after_mutation(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::transaction_action;

    #[tokio::test]
    async fn test_records_statements_and_replays_results() {
        let dialect = DryRunDialect::preset("postgres").unwrap();
        dialect.push_result(SqlResult::new(vec!["n".into()], vec![vec![Value::from(5)]]));

        let mut command = dialect.create_command();
        let a = command.param(Value::from(1));
        let b = command.param(Value::from("x"));
        let result = command
            .execute(&format!("select count(*) as n from t where a = {} and b = {}", a, b))
            .await
            .unwrap();

        assert_eq!(result.rows, vec![vec![Value::Integer(5)]]);
        let statement = dialect.last_statement().unwrap();
        assert_eq!(statement.sql, "select count(*) as n from t where a = $1 and b = $2");
        assert_eq!(statement.params, vec![Value::Integer(1), Value::Text("x".into())]);
    }

    #[tokio::test]
    async fn test_scripted_errors_are_driver_errors() {
        let dialect = DryRunDialect::new();
        dialect.push_error("boom");
        let err = dialect.create_command().execute("delete from t").await.unwrap_err();
        assert!(matches!(err, SqlError::Driver(m) if m == "boom"));
    }

    #[test]
    fn test_presets() {
        let mysql = DryRunDialect::preset("mysql").unwrap();
        assert!(!mysql.capabilities().supports_returning);
        assert_eq!(mysql.wrap_identifier("shop.orders"), "`shop`.`orders`");
        assert!(DryRunDialect::preset("oracle").is_none());
    }

    #[tokio::test]
    async fn test_nested_transactions_use_savepoints() {
        let dialect = DryRunDialect::new();
        dialect
            .transaction(transaction_action(|outer| async move {
                outer
                    .transaction(transaction_action(|_inner| async {
                        Err(SqlError::InvalidFilter("stop".into()))
                    }))
                    .await
                    .ok();
                Ok(())
            }))
            .await
            .unwrap();

        let sql: Vec<String> = dialect.statements().into_iter().map(|s| s.sql).collect();
        assert_eq!(
            sql,
            vec!["begin", "savepoint sp_1", "rollback to savepoint sp_1", "commit"]
        );
    }
}
