// ============================================================================
// Data Provider API
// ============================================================================
//
// The surface exposed to the REST / live-query layer: one provider per
// database, one entity provider per entity. Operations take filter trees
// and sorts, return decoded records, and fail with typed `SqlError`s.
//
// ============================================================================

pub mod database;
pub mod entity;
pub mod transaction;

use crate::core::{Record, Result, Value};
use crate::filter::Filter;
use crate::metadata::EntityMetadata;
use crate::sort::Sort;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

pub use database::SqlDatabase;
pub use entity::{BULK_INSERT_CHUNK, SqlEntityDataProvider};

/// Identity of a row: the value of a single identity field, or one value
/// per field of a compound identity.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityId {
    Single(Value),
    Compound(Record),
}

impl From<Value> for EntityId {
    fn from(value: Value) -> Self {
        Self::Single(value)
    }
}

impl From<i64> for EntityId {
    fn from(value: i64) -> Self {
        Self::Single(Value::Integer(value))
    }
}

impl From<i32> for EntityId {
    fn from(value: i32) -> Self {
        Self::Single(Value::Integer(value as i64))
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self::Single(Value::Text(value.to_string()))
    }
}

impl From<Record> for EntityId {
    fn from(values: Record) -> Self {
        Self::Compound(values)
    }
}

/// Options of a `find` call.
///
/// `page` is 1-based and only meaningful with a `limit`. A limit of zero
/// means no limit.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub filter: Option<Filter>,
    pub sort: Option<Sort>,
    pub limit: Option<u64>,
    pub page: Option<u64>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn sort(mut self, sort: Sort) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn page(mut self, page: u64) -> Self {
        self.page = Some(page);
        self
    }
}

#[async_trait]
pub trait EntityDataProvider: Send + Sync {
    async fn count(&self, filter: &Filter) -> Result<u64>;

    async fn find(&self, options: FindOptions) -> Result<Vec<Record>>;

    async fn insert(&self, data: Record) -> Result<Record>;

    async fn update(&self, id: &EntityId, data: Record) -> Result<Record>;

    async fn delete(&self, id: &EntityId) -> Result<()>;
}

/// Callback run inside `DataProvider::transaction` with a provider scoped
/// to the transaction.
pub type DataProviderAction =
    Box<dyn FnOnce(Arc<dyn DataProvider>) -> BoxFuture<'static, Result<()>> + Send>;

/// Box an async closure as a [`DataProviderAction`].
pub fn provider_action<F, Fut>(action: F) -> DataProviderAction
where
    F: FnOnce(Arc<dyn DataProvider>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Box::new(move |provider| Box::pin(action(provider)))
}

#[async_trait]
pub trait DataProvider: Send + Sync {
    fn entity_data_provider(&self, entity: Arc<EntityMetadata>) -> Arc<dyn EntityDataProvider>;

    async fn transaction(&self, action: DataProviderAction) -> Result<()>;

    async fn ensure_schema(&self, entities: &[Arc<EntityMetadata>]) -> Result<()>;

    async fn end(&self) -> Result<()>;
}
