// ============================================================================
// Transaction Guard
// ============================================================================
//
// A transaction action receives a `SqlDatabase` built on `GuardedSql`: the
// dialect's transaction-bound implementation plus a shared completed flag.
// The flag is set as soon as the action finishes (returns, fails or
// panics). From then on every statement, nested transaction or first-use
// hook attempted through the scoped handle fails with
// `SqlError::TransactionCompleted` before reaching the dialect.
//
// ============================================================================

use crate::core::{Result, SqlError, Value};
use crate::dialect::{
    DialectCapabilities, SqlCommand, SqlImplementation, SqlResult, SqlTransactionAction,
};
use crate::metadata::EntityMetadata;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Default)]
pub(crate) struct CompletedFlag(Arc<AtomicBool>);

impl CompletedFlag {
    pub(crate) fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.is_set() {
            Err(SqlError::TransactionCompleted)
        } else {
            Ok(())
        }
    }

    /// Sets the flag when dropped.
    pub(crate) fn guard(&self) -> CompletionGuard {
        CompletionGuard(self.clone())
    }
}

pub(crate) struct CompletionGuard(CompletedFlag);

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        (self.0).0.store(true, Ordering::SeqCst);
    }
}

pub(crate) struct GuardedSql {
    inner: Arc<dyn SqlImplementation>,
    completed: CompletedFlag,
}

impl GuardedSql {
    pub(crate) fn new(inner: Arc<dyn SqlImplementation>, completed: CompletedFlag) -> Self {
        Self { inner, completed }
    }
}

struct GuardedCommand {
    inner: Box<dyn SqlCommand>,
    completed: CompletedFlag,
}

#[async_trait]
impl SqlCommand for GuardedCommand {
    fn param(&mut self, value: Value) -> String {
        self.inner.param(value)
    }

    async fn execute(&mut self, sql: &str) -> Result<SqlResult> {
        self.completed.check()?;
        self.inner.execute(sql).await
    }
}

#[async_trait]
impl SqlImplementation for GuardedSql {
    fn create_command(&self) -> Box<dyn SqlCommand> {
        Box::new(GuardedCommand {
            inner: self.inner.create_command(),
            completed: self.completed.clone(),
        })
    }

    fn capabilities(&self) -> DialectCapabilities {
        self.inner.capabilities()
    }

    fn limit_syntax(&self, limit: u64, offset: u64) -> String {
        self.inner.limit_syntax(limit, offset)
    }

    fn wrap_identifier(&self, name: &str) -> String {
        self.inner.wrap_identifier(name)
    }

    async fn entity_first_use(&self, entity: &EntityMetadata) -> Result<()> {
        self.completed.check()?;
        self.inner.entity_first_use(entity).await
    }

    async fn ensure_schema(&self, entities: &[Arc<EntityMetadata>]) -> Result<()> {
        self.completed.check()?;
        self.inner.ensure_schema(entities).await
    }

    async fn transaction(&self, action: SqlTransactionAction) -> Result<()> {
        self.completed.check()?;
        self.inner.transaction(action).await
    }

    fn after_mutation(&self) {
        self.inner.after_mutation();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::DryRunDialect;

    #[tokio::test]
    async fn test_commands_fail_after_completion() {
        let dialect = DryRunDialect::new();
        let flag = CompletedFlag::default();
        let guarded = GuardedSql::new(Arc::new(dialect.clone()), flag.clone());

        let mut early = guarded.create_command();
        early.execute("select 1").await.unwrap();

        let mut late = guarded.create_command();
        drop(flag.guard());
        assert!(matches!(late.execute("select 2").await, Err(SqlError::TransactionCompleted)));
        assert_eq!(dialect.statements().len(), 1);
    }
}
