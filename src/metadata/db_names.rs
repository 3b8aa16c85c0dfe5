use super::EntityMetadata;
use crate::core::{Result, SqlError};
use std::collections::HashMap;

/// Dialect-resolved names of one entity: the wrapped table name and the
/// SQL text that stands for each field (a wrapped column name, or the
/// parenthesised expression of an SQL-expression field).
///
/// Resolved once per entity per `SqlDatabase` and memoised there.
#[derive(Debug, Clone)]
pub struct EntityDbNames {
    entity_key: String,
    table: String,
    columns: HashMap<String, String>,
}

impl EntityDbNames {
    pub fn resolve(entity: &EntityMetadata, wrap_identifier: &dyn Fn(&str) -> String) -> Self {
        let columns = entity
            .fields()
            .iter()
            .filter(|f| !f.is_server_expression())
            .map(|f| {
                let sql = match f.sql_expression_text() {
                    Some(expression) => format!("({})", expression),
                    None => wrap_identifier(f.column_name()),
                };
                (f.key().to_string(), sql)
            })
            .collect();

        Self {
            entity_key: entity.key().to_string(),
            table: wrap_identifier(entity.db_name()),
            columns,
        }
    }

    pub fn entity_key(&self) -> &str {
        &self.entity_key
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// SQL text for a field. Fails for unknown fields and for fields
    /// computed by the application, which have nothing to reference.
    pub fn column_of(&self, key: &str) -> Result<&str> {
        self.columns
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| SqlError::field_not_found(&self.entity_key, key))
    }
}

/// Double-quote an identifier, part by part for schema-qualified names.
/// Parts that are already quoted are left alone.
pub fn double_quote_identifier(name: &str) -> String {
    name.split('.')
        .map(|part| {
            if part.starts_with('"') {
                part.to_string()
            } else {
                format!("\"{}\"", part.replace('"', "\"\""))
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::FieldMetadata;

    fn entity() -> EntityMetadata {
        EntityMetadata::builder("Order")
            .db_name("sales.orders")
            .field(FieldMetadata::integer("id"))
            .field(FieldMetadata::text("customer").db_name("customer_id"))
            .field(FieldMetadata::integer("lines").sql_expression("select count(*) from lines"))
            .field(FieldMetadata::text("label").server_expression())
            .build()
            .unwrap()
    }

    #[test]
    fn test_names_are_wrapped() {
        let names = EntityDbNames::resolve(&entity(), &double_quote_identifier);
        assert_eq!(names.table(), "\"sales\".\"orders\"");
        assert_eq!(names.column_of("customer").unwrap(), "\"customer_id\"");
        assert_eq!(names.column_of("lines").unwrap(), "(select count(*) from lines)");
    }

    #[test]
    fn test_server_expressions_have_no_column() {
        let names = EntityDbNames::resolve(&entity(), &|n: &str| n.to_string());
        assert!(matches!(names.column_of("label"), Err(SqlError::FieldNotFound { .. })));
        assert!(names.column_of("missing").is_err());
    }
}
