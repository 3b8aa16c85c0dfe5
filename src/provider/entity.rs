// ============================================================================
// Entity Data Provider
// ============================================================================
//
// Builds and runs the statements of one entity:
//
//   count   select count(*) as count from t [where ..]
//   find    select cols from t [where ..] order by .. [limit ..]
//   insert  insert into t (..) values (..) [returning cols]
//   update  update t set .. where <identity> [returning cols]
//   delete  delete from t where <identity>
//
// Without `returning`, insert and update re-read the row: by the generated
// key for auto-increment identities, otherwise by the identity values. The
// re-read must find exactly one row.
//
// ============================================================================

use super::database::SqlDatabase;
use super::{EntityDataProvider, EntityId, FindOptions};
use crate::core::{Record, Result, SqlError, Value};
use crate::dialect::{SqlCommand, SqlResult};
use crate::filter::{Filter, FilterCompiler};
use crate::metadata::{EntityDbNames, EntityMetadata, FieldMetadata};
use crate::sort::Sort;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Rows per statement in `bulk_insert`.
pub const BULK_INSERT_CHUNK: usize = 250;

#[derive(Clone)]
pub struct SqlEntityDataProvider {
    entity: Arc<EntityMetadata>,
    database: SqlDatabase,
}

impl SqlEntityDataProvider {
    pub(crate) fn new(entity: Arc<EntityMetadata>, database: SqlDatabase) -> Self {
        Self { entity, database }
    }

    /// The entity as stored (after any JSON storage rewrite).
    pub fn entity(&self) -> &EntityMetadata {
        &self.entity
    }

    fn selected_fields(&self) -> impl Iterator<Item = &FieldMetadata> {
        self.entity.fields().iter().filter(|f| !f.is_server_expression())
    }

    fn select_columns(&self, names: &EntityDbNames) -> Result<String> {
        let columns = self
            .selected_fields()
            .map(|f| names.column_of(f.key()))
            .collect::<Result<Vec<_>>>()?;
        Ok(columns.join(", "))
    }

    fn decode_row(&self, row: &[Value]) -> Result<Record> {
        let mut record = Record::new();
        for (index, field) in self.selected_fields().enumerate() {
            let decode_error = |message: String| SqlError::Decode {
                entity: self.entity.key().to_string(),
                field: field.key().to_string(),
                message,
            };
            let raw = row
                .get(index)
                .ok_or_else(|| decode_error(format!("result has no column at position {}", index)))?;
            let value = field
                .value_converter()
                .from_db(raw)
                .map_err(|e| decode_error(e.to_string()))?;
            record.insert(field.key().to_string(), value);
        }
        Ok(record)
    }

    fn decode_single(&self, result: &SqlResult, operation: &str) -> Result<Record> {
        match result.rows.as_slice() {
            [row] => self.decode_row(row),
            rows => Err(SqlError::cardinality(self.entity.key(), operation, rows.len())),
        }
    }

    fn after_mutation(&self) {
        self.database.sql().after_mutation();
    }

    /// Identity values addressed by `id`, one per identity field.
    fn id_values(&self, id: &EntityId, operation: &str) -> Result<Record> {
        let keys = self.entity.id_keys();
        let missing = |field: &str| SqlError::MissingIdentity {
            entity: self.entity.key().to_string(),
            operation: operation.to_string(),
            field: field.to_string(),
        };

        let mut values = Record::new();
        match id {
            EntityId::Single(value) => {
                if let Some(extra) = keys.get(1) {
                    return Err(missing(extra));
                }
                let key = &keys[0];
                if value.is_null() {
                    return Err(missing(key));
                }
                values.insert(key.clone(), value.clone());
            }
            EntityId::Compound(record) => {
                for key in keys {
                    match record.get(key) {
                        Some(value) if !value.is_null() => {
                            values.insert(key.clone(), value.clone());
                        }
                        _ => return Err(missing(key)),
                    }
                }
            }
        }
        Ok(values)
    }

    fn id_filter(values: &Record) -> Filter {
        let mut parts: Vec<Filter> = values.iter().map(|(k, v)| Filter::eq(k, v.clone())).collect();
        if parts.len() == 1 {
            parts.remove(0)
        } else {
            Filter::And(parts)
        }
    }

    /// Writable fields present in `data`, with their converted values.
    fn written_values(&self, data: &Record, skip_nulls: bool) -> Result<Vec<(&FieldMetadata, Value)>> {
        let mut written = Vec::new();
        for field in self.entity.fields().iter().filter(|f| !f.is_db_read_only()) {
            let Some(value) = data.get(field.key()) else {
                continue;
            };
            let converted = field.value_converter().to_db(value)?;
            if skip_nulls && converted.is_null() {
                continue;
            }
            written.push((field, converted));
        }
        Ok(written)
    }

    async fn find_one(&self, filter: Filter, operation: &str) -> Result<Record> {
        let names = self.database.db_names(&self.entity).await?;
        let mut command = self.database.create_command();
        let where_clause = FilterCompiler::new(&self.entity, names.clone())
            .where_clause(&filter, &mut *command)
            .await?;
        let sql = format!("select {} from {}{}", self.select_columns(&names)?, names.table(), where_clause);
        let result = command.execute(&sql).await?;
        self.decode_single(&result, operation)
    }

    fn order_by(&self, names: &EntityDbNames, sort: &Sort) -> Result<String> {
        let nulls_first = self.database.capabilities().order_by_nulls_first;
        let mut segments = Vec::with_capacity(sort.segments().len());
        for segment in sort.segments() {
            let mut text = names.column_of(&segment.field)?.to_string();
            if segment.descending {
                text.push_str(" desc");
            }
            if nulls_first {
                text.push_str(if segment.descending { " nulls last" } else { " nulls first" });
            }
            segments.push(text);
        }
        Ok(segments.join(", "))
    }

    /// Insert `rows` in multi-row statements of [`BULK_INSERT_CHUNK`] rows.
    /// Returns the number of rows inserted.
    pub async fn bulk_insert(&self, rows: Vec<Record>) -> Result<u64> {
        let names = self.database.db_names(&self.entity).await?;
        let mut inserted = 0u64;

        for chunk in rows.chunks(BULK_INSERT_CHUNK) {
            let converted = chunk
                .iter()
                .map(|row| self.written_values(row, true))
                .collect::<Result<Vec<_>>>()?;
            let keys: BTreeSet<&str> = converted
                .iter()
                .flat_map(|row| row.iter().map(|(f, _)| f.key()))
                .collect();
            let fields: Vec<&FieldMetadata> = self
                .entity
                .fields()
                .iter()
                .filter(|f| keys.contains(f.key()))
                .collect();
            if fields.is_empty() {
                for _ in chunk {
                    self.insert(Record::new()).await?;
                }
                inserted += chunk.len() as u64;
                continue;
            }

            let mut command = self.database.create_command();
            let mut tuples = Vec::with_capacity(converted.len());
            for row in converted {
                let mut tokens = Vec::with_capacity(fields.len());
                for field in &fields {
                    let value = row
                        .iter()
                        .find(|(f, _)| f.key() == field.key())
                        .map(|(_, v)| v.clone())
                        .unwrap_or(Value::Null);
                    tokens.push(command.param(value));
                }
                tuples.push(format!("({})", tokens.join(", ")));
            }
            let columns = fields
                .iter()
                .map(|f| names.column_of(f.key()))
                .collect::<Result<Vec<_>>>()?;
            let sql = format!(
                "insert into {} ({}) values {}",
                names.table(),
                columns.join(", "),
                tuples.join(", ")
            );
            let result = command.execute(&sql).await?;
            self.after_mutation();
            inserted += result.rows_affected.unwrap_or(chunk.len() as u64);
        }
        Ok(inserted)
    }
}

#[async_trait]
impl EntityDataProvider for SqlEntityDataProvider {
    async fn count(&self, filter: &Filter) -> Result<u64> {
        let names = self.database.db_names(&self.entity).await?;
        let mut command = self.database.create_command();
        let where_clause = FilterCompiler::new(&self.entity, names.clone())
            .where_clause(filter, &mut *command)
            .await?;
        let sql = format!("select count(*) as count from {}{}", names.table(), where_clause);
        let result = command.execute(&sql).await?;

        result
            .rows
            .first()
            .and_then(|row| row.first())
            .and_then(Value::as_i64)
            .map(|count| count.max(0) as u64)
            .ok_or_else(|| SqlError::Decode {
                entity: self.entity.key().to_string(),
                field: "count".to_string(),
                message: "count query returned no number".to_string(),
            })
    }

    async fn find(&self, options: FindOptions) -> Result<Vec<Record>> {
        let names = self.database.db_names(&self.entity).await?;
        let mut command = self.database.create_command();

        let mut sql = format!("select {} from {}", self.select_columns(&names)?, names.table());
        if let Some(filter) = &options.filter {
            let where_clause = FilterCompiler::new(&self.entity, names.clone())
                .where_clause(filter, &mut *command)
                .await?;
            sql.push_str(&where_clause);
        }

        let limit = options.limit.filter(|l| *l > 0);
        let sort = match (&options.sort, limit) {
            (Some(sort), None) if !sort.is_empty() => sort.clone(),
            (sort, _) => Sort::create_unique_sort(&self.entity, sort.as_ref()),
        };
        sql.push_str(" order by ");
        sql.push_str(&self.order_by(&names, &sort)?);

        if let Some(limit) = limit {
            let page = options.page.unwrap_or(1).max(1);
            let offset = (page - 1).checked_mul(limit).ok_or_else(|| {
                SqlError::InvalidFilter(format!("page {} of {} rows is out of range", page, limit))
            })?;
            sql.push(' ');
            sql.push_str(&self.database.sql().limit_syntax(limit, offset));
        }

        let result = command.execute(&sql).await?;
        result.rows.iter().map(|row| self.decode_row(row)).collect()
    }

    async fn insert(&self, data: Record) -> Result<Record> {
        let names = self.database.db_names(&self.entity).await?;
        let mut command = self.database.create_command();

        let written = self.written_values(&data, true)?;
        let mut sql = if written.is_empty() {
            format!("insert into {} default values", names.table())
        } else {
            let mut columns = Vec::with_capacity(written.len());
            let mut tokens = Vec::with_capacity(written.len());
            for (field, value) in written {
                columns.push(names.column_of(field.key())?.to_string());
                tokens.push(command.param(value));
            }
            format!(
                "insert into {} ({}) values ({})",
                names.table(),
                columns.join(", "),
                tokens.join(", ")
            )
        };

        if self.database.capabilities().supports_returning {
            sql.push_str(" returning ");
            sql.push_str(&self.select_columns(&names)?);
            let result = command.execute(&sql).await?;
            let row = self.decode_single(&result, "insert")?;
            self.after_mutation();
            return Ok(row);
        }

        let result = command.execute(&sql).await?;
        self.after_mutation();

        let filter = match self.entity.auto_increment_id() {
            Some(id_field) => {
                let generated = result.last_insert_id.ok_or_else(|| SqlError::Execution {
                    message: format!(
                        "insert into '{}' did not report the generated '{}'",
                        self.entity.key(),
                        id_field.key()
                    ),
                    sql: sql.clone(),
                    params: Vec::new(),
                })?;
                Filter::eq(id_field.key(), generated)
            }
            None => {
                let id = EntityId::Compound(data);
                Self::id_filter(&self.id_values(&id, "insert")?)
            }
        };
        self.find_one(filter, "insert").await
    }

    async fn update(&self, id: &EntityId, data: Record) -> Result<Record> {
        let original = self.id_values(id, "update")?;
        let names = self.database.db_names(&self.entity).await?;

        let written = self.written_values(&data, false)?;
        if written.is_empty() {
            return self.find_one(Self::id_filter(&original), "update").await;
        }

        let mut command = self.database.create_command();
        let mut assignments = Vec::with_capacity(written.len());
        for (field, value) in written {
            assignments.push(format!("{} = {}", names.column_of(field.key())?, command.param(value)));
        }
        let where_clause = FilterCompiler::new(&self.entity, names.clone())
            .where_clause(&Self::id_filter(&original), &mut *command)
            .await?;
        let mut sql = format!("update {} set {}{}", names.table(), assignments.join(", "), where_clause);

        if self.database.capabilities().supports_returning {
            sql.push_str(" returning ");
            sql.push_str(&self.select_columns(&names)?);
            let result = command.execute(&sql).await?;
            let row = self.decode_single(&result, "update")?;
            self.after_mutation();
            return Ok(row);
        }

        let result = command.execute(&sql).await?;
        match result.rows_affected {
            Some(affected) if affected != 1 => {
                return Err(SqlError::cardinality(self.entity.key(), "update", affected as usize));
            }
            _ => {}
        }
        self.after_mutation();

        // the row is found under its new identity when `data` changed it
        let mut current = original;
        for (key, value) in current.iter_mut() {
            match data.get(key) {
                Some(changed) if !changed.is_null() => *value = changed.clone(),
                _ => {}
            }
        }
        self.find_one(Self::id_filter(&current), "update").await
    }

    async fn delete(&self, id: &EntityId) -> Result<()> {
        let values = self.id_values(id, "delete")?;
        let names = self.database.db_names(&self.entity).await?;
        let mut command = self.database.create_command();
        let where_clause = FilterCompiler::new(&self.entity, names.clone())
            .where_clause(&Self::id_filter(&values), &mut *command)
            .await?;
        command
            .execute(&format!("delete from {}{}", names.table(), where_clause))
            .await?;
        self.after_mutation();
        Ok(())
    }
}
