// ============================================================================
// Schema DDL
// ============================================================================
//
// `create table if not exists` text for an entity. Adapters run it on entity
// first use or from `ensure_schema`.
//
// Column rules:
// - a single auto-increment identity becomes `integer primary key autoincrement`
// - non-nullable numbers and booleans get `default 0 not null`
// - non-nullable text gets `default '' not null`
// - non-nullable dates get `not null` without a default
// - other identities are declared by a trailing `primary key (..)`
// - SQL-expression and server-expression fields have no column
//
// ============================================================================

use crate::metadata::{EntityMetadata, FieldMetadata, ValueType};

/// Storage type name and default clause of one column.
fn column_type(field: &FieldMetadata) -> (&'static str, Option<&'static str>) {
    let by_converter = field.value_converter().field_type_in_db().and_then(|t| match t {
        "integer" => Some(ValueType::Integer),
        "text" => Some(ValueType::Text),
        "json" => Some(ValueType::Json),
        _ => None,
    });

    match by_converter.unwrap_or(field.value_type()) {
        ValueType::Integer => ("integer", Some("default 0 not null")),
        ValueType::Number => ("numeric", Some("default 0 not null")),
        ValueType::Boolean => ("integer", Some("default 0 not null")),
        ValueType::Text => ("text", Some("default '' not null")),
        ValueType::Date => ("text", Some("not null")),
        ValueType::Json => ("json", None),
    }
}

pub fn create_table_sql(entity: &EntityMetadata, wrap_identifier: &dyn Fn(&str) -> String) -> String {
    let auto_id = entity.auto_increment_id().map(FieldMetadata::key);

    let mut columns = Vec::new();
    for field in entity.fields().iter().filter(|f| f.has_column()) {
        let name = wrap_identifier(field.column_name());
        if Some(field.key()) == auto_id {
            columns.push(format!("{} integer primary key autoincrement", name));
            continue;
        }
        let (type_name, default) = column_type(field);
        let is_id = entity.id_keys().iter().any(|k| k == field.key());
        match default {
            Some(default) if !field.is_allow_null() || is_id => {
                columns.push(format!("{} {} {}", name, type_name, default))
            }
            _ => columns.push(format!("{} {}", name, type_name)),
        }
    }

    if auto_id.is_none() {
        let keys: Vec<String> = entity
            .id_fields()
            .map(|f| wrap_identifier(f.column_name()))
            .collect();
        columns.push(format!("primary key ({})", keys.join(", ")));
    }

    format!(
        "create table if not exists {} ({})",
        wrap_identifier(entity.db_name()),
        columns.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::db_names::double_quote_identifier;

    #[test]
    fn test_auto_increment_identity() {
        let entity = EntityMetadata::builder("Task")
            .db_name("tasks")
            .field(FieldMetadata::integer("id").auto_increment())
            .field(FieldMetadata::text("title"))
            .field(FieldMetadata::text("notes").allow_null())
            .field(FieldMetadata::integer("titleLength").sql_expression("length(title)"))
            .build()
            .unwrap();
        assert_eq!(
            create_table_sql(&entity, &double_quote_identifier),
            "create table if not exists \"tasks\" (\"id\" integer primary key autoincrement, \
             \"title\" text default '' not null, \"notes\" text)"
        );
    }

    #[test]
    fn test_required_date_is_not_null() {
        let entity = EntityMetadata::builder("Event")
            .field(FieldMetadata::integer("id"))
            .field(FieldMetadata::date("startsAt"))
            .field(FieldMetadata::date("endsAt").allow_null())
            .build()
            .unwrap();
        assert_eq!(
            create_table_sql(&entity, &|n: &str| n.to_string()),
            "create table if not exists Event (id integer default 0 not null, \
             startsAt text not null, endsAt text, primary key (id))"
        );
    }

    #[test]
    fn test_compound_identity() {
        let entity = EntityMetadata::builder("Line")
            .field(FieldMetadata::integer("orderId"))
            .field(FieldMetadata::integer("lineNo"))
            .field(FieldMetadata::number("price"))
            .field(FieldMetadata::boolean("shipped"))
            .field(FieldMetadata::date("shippedAt").allow_null())
            .id(["orderId", "lineNo"])
            .build()
            .unwrap();
        assert_eq!(
            create_table_sql(&entity, &|n: &str| n.to_string()),
            "create table if not exists Line (orderId integer default 0 not null, \
             lineNo integer default 0 not null, price numeric default 0 not null, \
             shipped integer default 0 not null, shippedAt text, primary key (orderId, lineNo))"
        );
    }
}
