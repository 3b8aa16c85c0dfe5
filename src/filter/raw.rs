use super::compiler::Piece;
use crate::core::{Result, SqlError, Value};
use crate::metadata::EntityDbNames;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

// Parameter tokens handed to raw builders are placeholders: the compiler
// swaps each one for a dialect token while concatenating the final text,
// so values are bound in the order their tokens appear.
const MARKER: char = '\u{1}';

pub type RawSqlFuture = BoxFuture<'static, Result<String>>;

/// Dialect-specific SQL injected into a WHERE clause.
///
/// The builder receives a [`RawFilterContext`] and returns predicate text.
/// Values must go through [`RawFilterContext::param`]; the builder may
/// await other work (e.g. look up related rows) before returning.
///
/// ```ignore
/// let city = "London".to_string();
/// let filter = SqlDatabase::raw_filter(move |ctx| {
///     let city = city.clone();
///     async move {
///         Ok(format!(
///             "\"customerId\" in (select id from customers where city = {})",
///             ctx.param(city)
///         ))
///     }
/// });
/// ```
#[derive(Clone)]
pub struct RawFilter {
    build: Arc<dyn Fn(RawFilterContext) -> RawSqlFuture + Send + Sync>,
}

impl RawFilter {
    pub fn new<F, Fut>(build: F) -> Self
    where
        F: Fn(RawFilterContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        Self {
            build: Arc::new(move |ctx| Box::pin(build(ctx))),
        }
    }

    pub(crate) fn start(&self, ctx: RawFilterContext) -> RawSqlFuture {
        (self.build)(ctx)
    }
}

impl fmt::Debug for RawFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RawFilter(..)")
    }
}

/// Handed to raw filter builders: parameter binding plus name lookup.
#[derive(Clone)]
pub struct RawFilterContext {
    names: Arc<EntityDbNames>,
    params: Arc<Mutex<Vec<Value>>>,
}

impl RawFilterContext {
    pub(crate) fn new(names: Arc<EntityDbNames>) -> Self {
        Self {
            names,
            params: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Bind a value; returns the token to embed in the SQL text.
    pub fn param(&self, value: impl Into<Value>) -> String {
        let mut params = self.params.lock().unwrap_or_else(|e| e.into_inner());
        params.push(value.into());
        format!("{MARKER}{}{MARKER}", params.len() - 1)
    }

    /// SQL text for a field of the filtered entity.
    pub fn db_name_of(&self, key: &str) -> Result<String> {
        self.names.column_of(key).map(str::to_string)
    }

    /// Wrapped table name of the filtered entity.
    pub fn table(&self) -> &str {
        self.names.table()
    }

    fn take_params(&self) -> Vec<Value> {
        let mut params = self.params.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *params)
    }

    /// Split builder output into text and parameter pieces.
    pub(crate) fn into_pieces(self, sql: &str) -> Result<Vec<Piece>> {
        let params = self.take_params();
        let parts: Vec<&str> = sql.split(MARKER).collect();
        if parts.len() % 2 == 0 {
            return Err(SqlError::InvalidFilter("raw filter contains a malformed parameter token".into()));
        }

        let mut pieces = Vec::with_capacity(parts.len());
        for (i, part) in parts.into_iter().enumerate() {
            if i % 2 == 0 {
                if !part.is_empty() {
                    pieces.push(Piece::Sql(part.to_string()));
                }
                continue;
            }
            let value = part
                .parse::<usize>()
                .ok()
                .and_then(|index| params.get(index))
                .ok_or_else(|| SqlError::InvalidFilter(format!("raw filter references unknown parameter '{}'", part)))?;
            pieces.push(Piece::Param(value.clone()));
        }
        Ok(pieces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{EntityMetadata, FieldMetadata};

    fn context() -> RawFilterContext {
        let entity = EntityMetadata::builder("T")
            .field(FieldMetadata::integer("id"))
            .build()
            .unwrap();
        RawFilterContext::new(Arc::new(EntityDbNames::resolve(&entity, &|n: &str| n.to_string())))
    }

    #[test]
    fn test_tokens_split_into_pieces() {
        let ctx = context();
        let sql = format!("a = {} and b = {}", ctx.param(1), ctx.param("x"));
        let pieces = ctx.into_pieces(&sql).unwrap();
        assert_eq!(
            pieces,
            vec![
                Piece::Sql("a = ".into()),
                Piece::Param(Value::Integer(1)),
                Piece::Sql(" and b = ".into()),
                Piece::Param(Value::Text("x".into())),
            ]
        );
    }

    #[test]
    fn test_reused_token_binds_twice() {
        let ctx = context();
        let token = ctx.param(5);
        let pieces = ctx.into_pieces(&format!("{token} between x and {token}")).unwrap();
        assert_eq!(pieces.iter().filter(|p| matches!(p, Piece::Param(_))).count(), 2);
    }

    #[test]
    fn test_truncated_token_rejected() {
        let ctx = context();
        let token = ctx.param(5);
        let broken = &token[..token.len() - 1];
        assert!(ctx.into_pieces(broken).is_err());
    }
}
