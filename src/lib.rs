// ============================================================================
// sqlbridge Library
// ============================================================================
//
// Portable filter compilation and CRUD data access over SQL backends.
//
// A `Filter` tree and a `Sort` describe what to read; `SqlDatabase` turns
// them into parameterised statements for whatever `SqlImplementation` it
// wraps, runs them and decodes the rows through the entity's value
// converters. Backends differ only through `DialectCapabilities`.
//
// ============================================================================

pub mod core;
pub mod dialect;
pub mod filter;
pub mod logging;
pub mod metadata;
pub mod provider;
pub mod schema;
pub mod sort;

pub use self::core::{ErrorKind, Record, Result, SqlError, Value, record};
pub use dialect::{
    DialectCapabilities, DryRunDialect, ExecutedStatement, SqlCommand, SqlImplementation,
    SqlResult, TokenStyle,
};
#[cfg(feature = "sqlite")]
pub use dialect::{SqliteConfig, SqliteDialect};
pub use filter::{Filter, FilterCompiler, RawFilter, RawFilterContext};
pub use logging::{LogMode, SqlLogConfig};
pub use metadata::{EntityDefinition, EntityMetadata, FieldMetadata, ValueType};
pub use provider::{
    DataProvider, EntityDataProvider, EntityId, FindOptions, SqlDatabase, SqlEntityDataProvider,
    provider_action,
};
pub use sort::{Sort, SortSegment};

// ============================================================================
// Example
// ============================================================================
//
// ```ignore
// use sqlbridge::*;
// use std::sync::Arc;
//
// let task = Arc::new(
//     EntityMetadata::builder("Task")
//         .db_name("tasks")
//         .field(FieldMetadata::integer("id").auto_increment())
//         .field(FieldMetadata::text("title"))
//         .build()?,
// );
//
// let db = SqlDatabase::with_log_config(
//     Arc::new(SqliteDialect::in_memory().await?),
//     SqlLogConfig::one_liner(),
// );
// let tasks = db.entity_provider(task);
// tasks.insert(record([("title", "write docs")])).await?;
// let open = tasks
//     .find(FindOptions::new().filter(Filter::contains("title", "docs")).limit(10))
//     .await?;
// ```
