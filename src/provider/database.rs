// ============================================================================
// SqlDatabase
// ============================================================================
//
// Owns a dialect implementation and everything derived from it once:
// capabilities, the statement log configuration and the per-entity DB
// names (resolved on first use, together with the dialect's first-use
// hook). Cheap to clone; clones share state.
//
// ============================================================================

use super::entity::SqlEntityDataProvider;
use super::transaction::{CompletedFlag, GuardedSql};
use super::{DataProvider, DataProviderAction, EntityDataProvider};
use crate::core::{Result, SqlError};
use crate::dialect::{
    DialectCapabilities, LiteralCommand, SqlCommand, SqlImplementation, SqlResult,
    transaction_action,
};
use crate::filter::{Filter, FilterCompiler, RawFilter, RawFilterContext};
use crate::logging::{LoggingCommand, SqlLogConfig, execution_failure};
use crate::metadata::converters::json_string;
use crate::metadata::{EntityDbNames, EntityMetadata};
use crate::schema::create_table_sql;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

type NameMemo = Arc<Mutex<HashMap<String, Arc<EntityDbNames>>>>;

struct DatabaseInner {
    sql: Arc<dyn SqlImplementation>,
    capabilities: DialectCapabilities,
    log: Arc<SqlLogConfig>,
    names: NameMemo,
}

#[derive(Clone)]
pub struct SqlDatabase {
    inner: Arc<DatabaseInner>,
}

impl SqlDatabase {
    pub fn new(sql: Arc<dyn SqlImplementation>) -> Self {
        Self::with_log_config(sql, SqlLogConfig::default())
    }

    pub fn with_log_config(sql: Arc<dyn SqlImplementation>, log: SqlLogConfig) -> Self {
        let capabilities = sql.capabilities();
        Self {
            inner: Arc::new(DatabaseInner {
                sql,
                capabilities,
                log: Arc::new(log),
                names: Arc::new(Mutex::new(HashMap::new())),
            }),
        }
    }

    pub fn capabilities(&self) -> DialectCapabilities {
        self.inner.capabilities
    }

    pub fn log_config(&self) -> &SqlLogConfig {
        &self.inner.log
    }

    pub(crate) fn sql(&self) -> &Arc<dyn SqlImplementation> {
        &self.inner.sql
    }

    /// A new statement; execution is logged per the log configuration and
    /// failures carry the statement text and arguments.
    pub fn create_command(&self) -> Box<dyn SqlCommand> {
        Box::new(LoggingCommand::new(self.inner.sql.create_command(), self.inner.log.clone()))
    }

    /// Run a hand-written statement.
    pub async fn execute(&self, sql: &str) -> Result<SqlResult> {
        self.create_command().execute(sql).await
    }

    /// Entity as stored by this dialect: JSON fields become string-encoded
    /// JSON when the dialect has no JSON columns.
    fn storage_entity(&self, entity: Arc<EntityMetadata>) -> Arc<EntityMetadata> {
        if self.inner.capabilities.supports_json_column {
            return entity;
        }
        let json_fields: Vec<String> = entity
            .fields()
            .iter()
            .filter(|f| f.value_converter().field_type_in_db() == Some("json"))
            .map(|f| f.key().to_string())
            .collect();
        if json_fields.is_empty() {
            return entity;
        }

        let converter = json_string();
        let mut rewritten = (*entity).clone();
        for key in &json_fields {
            rewritten = rewritten.with_converter(key, converter.clone());
        }
        Arc::new(rewritten)
    }

    pub fn entity_provider(&self, entity: Arc<EntityMetadata>) -> SqlEntityDataProvider {
        SqlEntityDataProvider::new(self.storage_entity(entity), self.clone())
    }

    /// DB names of `entity`, running the dialect's first-use hook the first
    /// time the entity is seen by this database.
    pub(crate) async fn db_names(&self, entity: &EntityMetadata) -> Result<Arc<EntityDbNames>> {
        let mut memo = self.inner.names.lock().await;
        if let Some(names) = memo.get(entity.key()) {
            return Ok(names.clone());
        }

        let sql = &self.inner.sql;
        if let Err(err) = sql.entity_first_use(entity).await {
            return Err(self.schema_failure(&[entity], err));
        }
        let names = Arc::new(EntityDbNames::resolve(entity, &|name: &str| sql.wrap_identifier(name)));
        memo.insert(entity.key().to_string(), names.clone());
        Ok(names)
    }

    /// Filter injecting dialect-specific SQL; see [`RawFilter`].
    pub fn raw_filter<F, Fut>(build: F) -> Filter
    where
        F: Fn(RawFilterContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        Filter::raw(RawFilter::new(build))
    }

    /// WHERE predicate of `filter` with every value inlined as a literal,
    /// for embedding in hand-written SQL. Matches everything when empty.
    ///
    /// ```
    /// # use sqlbridge::*;
    /// # use std::sync::Arc;
    /// # tokio_test::block_on(async {
    /// let task = Arc::new(
    ///     EntityMetadata::builder("Task")
    ///         .field(FieldMetadata::integer("id"))
    ///         .field(FieldMetadata::text("title"))
    ///         .build()?,
    /// );
    /// let db = SqlDatabase::new(Arc::new(DryRunDialect::preset("sqlite").unwrap()));
    /// let filter = Filter::and(vec![Filter::eq("title", "it's"), Filter::is_in("id", [1, 2])]);
    /// assert_eq!(
    ///     db.filter_to_raw(task, &filter).await?,
    ///     "\"title\" = 'it''s' and \"id\" in (1, 2)"
    /// );
    /// # Ok::<(), SqlError>(())
    /// # }).unwrap();
    /// ```
    pub async fn filter_to_raw(&self, entity: Arc<EntityMetadata>, filter: &Filter) -> Result<String> {
        let entity = self.storage_entity(entity);
        let names = self.db_names(&entity).await?;
        let predicate = FilterCompiler::new(&entity, names)
            .compile(filter, &mut LiteralCommand)
            .await?;
        Ok(predicate.unwrap_or_default())
    }

    /// Run `action` in a transaction. The database handed to `action` is
    /// bound to the transaction's connection and stops working once
    /// `action` finishes; the original error of a failed action is returned
    /// after rollback.
    pub async fn transaction<F, Fut>(&self, action: F) -> Result<()>
    where
        F: FnOnce(SqlDatabase) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let parent = self.clone();
        self.inner
            .sql
            .transaction(transaction_action(move |sql| async move {
                let completed = CompletedFlag::default();
                let scoped = parent.scoped(Arc::new(GuardedSql::new(sql, completed.clone()))).await;
                let _completion = completed.guard();
                action(scoped).await
            }))
            .await
    }

    async fn scoped(&self, sql: Arc<GuardedSql>) -> SqlDatabase {
        let known = self.inner.names.lock().await.clone();
        SqlDatabase {
            inner: Arc::new(DatabaseInner {
                sql,
                capabilities: self.inner.capabilities,
                log: self.inner.log.clone(),
                names: Arc::new(Mutex::new(known)),
            }),
        }
    }

    pub async fn ensure_schema(&self, entities: &[Arc<EntityMetadata>]) -> Result<()> {
        let stored: Vec<Arc<EntityMetadata>> =
            entities.iter().cloned().map(|e| self.storage_entity(e)).collect();
        match self.inner.sql.ensure_schema(&stored).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let entities: Vec<&EntityMetadata> = stored.iter().map(|e| e.as_ref()).collect();
                Err(self.schema_failure(&entities, err))
            }
        }
    }

    /// Adapter schema failures surface as logged `Execution` errors. When
    /// the adapter did not name the statement, the generated DDL stands in.
    fn schema_failure(&self, entities: &[&EntityMetadata], err: SqlError) -> SqlError {
        match err {
            SqlError::Driver(_) | SqlError::Execution { .. } => {
                let sql = &self.inner.sql;
                let ddl = entities
                    .iter()
                    .map(|e| create_table_sql(e, &|name: &str| sql.wrap_identifier(name)))
                    .collect::<Vec<_>>()
                    .join(";\n");
                execution_failure(&self.inner.log, &ddl, &[], err)
            }
            other => other,
        }
    }

    pub async fn end(&self) -> Result<()> {
        self.inner.sql.end().await
    }
}

#[async_trait]
impl DataProvider for SqlDatabase {
    fn entity_data_provider(&self, entity: Arc<EntityMetadata>) -> Arc<dyn EntityDataProvider> {
        Arc::new(self.entity_provider(entity))
    }

    async fn transaction(&self, action: DataProviderAction) -> Result<()> {
        SqlDatabase::transaction(self, move |scoped| action(Arc::new(scoped))).await
    }

    async fn ensure_schema(&self, entities: &[Arc<EntityMetadata>]) -> Result<()> {
        SqlDatabase::ensure_schema(self, entities).await
    }

    async fn end(&self) -> Result<()> {
        SqlDatabase::end(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SqlError;
    use crate::dialect::DryRunDialect;
    use crate::metadata::FieldMetadata;

    fn task() -> Arc<EntityMetadata> {
        Arc::new(
            EntityMetadata::builder("Task")
                .db_name("tasks")
                .field(FieldMetadata::integer("id"))
                .field(FieldMetadata::text("title"))
                .field(FieldMetadata::json("tags"))
                .build()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_first_use_runs_once_per_entity() {
        let dialect = DryRunDialect::new();
        let db = SqlDatabase::new(Arc::new(dialect.clone()));
        let entity = task();
        let (a, b) = tokio::join!(db.db_names(&entity), db.db_names(&entity));
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(dialect.first_used_entities(), vec!["Task".to_string()]);
    }

    #[tokio::test]
    async fn test_json_fields_rewritten_without_json_columns() {
        let entity = task();
        let plain = SqlDatabase::new(Arc::new(DryRunDialect::new()));
        let stored = plain.storage_entity(entity.clone());
        assert_eq!(stored.field("tags").unwrap().value_converter().field_type_in_db(), Some("text"));
        assert_eq!(entity.field("tags").unwrap().value_converter().field_type_in_db(), Some("json"));

        let native = SqlDatabase::new(Arc::new(DryRunDialect::preset("postgres").unwrap()));
        assert!(Arc::ptr_eq(&native.storage_entity(entity.clone()), &entity));
    }

    #[tokio::test]
    async fn test_filter_to_raw_inlines_literals() {
        let db = SqlDatabase::new(Arc::new(DryRunDialect::preset("sqlite").unwrap()));
        let filter = Filter::and(vec![Filter::eq("title", "it's"), Filter::is_in("id", [1, 2])]);
        let raw = db.filter_to_raw(task(), &filter).await.unwrap();
        assert_eq!(raw, "\"title\" = 'it''s' and \"id\" in (1, 2)");
        assert_eq!(db.filter_to_raw(task(), &Filter::all()).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_scoped_database_fails_after_transaction() {
        let dialect = DryRunDialect::new();
        let db = SqlDatabase::new(Arc::new(dialect.clone()));
        let leaked = Arc::new(std::sync::Mutex::new(None));
        let slot = leaked.clone();

        db.transaction(move |scoped| async move {
            scoped.execute("select 1").await?;
            *slot.lock().unwrap() = Some(scoped);
            Ok(())
        })
        .await
        .unwrap();

        let scoped = leaked.lock().unwrap().take().unwrap();
        let err = scoped.execute("select 2").await.unwrap_err();
        assert!(matches!(err, SqlError::TransactionCompleted));
        let sql: Vec<String> = dialect.statements().into_iter().map(|s| s.sql).collect();
        assert_eq!(sql, vec!["begin", "select 1", "commit"]);
    }

    #[tokio::test]
    async fn test_failed_action_error_is_returned_unchanged() {
        let dialect = DryRunDialect::new();
        let db = SqlDatabase::new(Arc::new(dialect.clone()));
        let err = db
            .transaction(|scoped| async move {
                scoped.execute("delete from tasks").await?;
                Err(SqlError::Conversion("bad value".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SqlError::Conversion(ref m) if m == "bad value"));
        assert_eq!(dialect.last_statement().unwrap().sql, "rollback");
    }
}
