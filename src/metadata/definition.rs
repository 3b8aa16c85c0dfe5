use super::{EntityMetadata, FieldMetadata, ValueType};
use crate::core::{Result, SqlError};
use serde::{Deserialize, Serialize};

/// Serialisable entity description, e.g. loaded from a JSON file.
///
/// ```json
/// { "key": "Task", "dbName": "tasks", "id": ["id"],
///   "fields": [ { "key": "id", "type": "integer", "autoIncrement": true },
///               { "key": "title", "type": "text" } ] }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDefinition {
    pub key: String,
    #[serde(default)]
    pub db_name: Option<String>,
    pub fields: Vec<FieldDefinition>,
    #[serde(default)]
    pub id: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    pub key: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default)]
    pub db_name: Option<String>,
    #[serde(default)]
    pub allow_null: bool,
    #[serde(default)]
    pub auto_increment: bool,
    #[serde(default)]
    pub db_read_only: bool,
    #[serde(default)]
    pub server_expression: bool,
    #[serde(default)]
    pub sql_expression: Option<String>,
}

impl EntityDefinition {
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| SqlError::InvalidMetadata(e.to_string()))
    }

    pub fn into_metadata(self) -> Result<EntityMetadata> {
        let mut builder = EntityMetadata::builder(&self.key);
        if let Some(db_name) = &self.db_name {
            builder = builder.db_name(db_name);
        }
        for def in self.fields {
            builder = builder.field(def.into_field());
        }
        builder.id(self.id).build()
    }
}

impl FieldDefinition {
    fn into_field(self) -> FieldMetadata {
        let mut field = FieldMetadata::new(&self.key, self.value_type);
        if let Some(db_name) = &self.db_name {
            field = field.db_name(db_name);
        }
        if let Some(expression) = &self.sql_expression {
            field = field.sql_expression(expression);
        }
        if self.allow_null {
            field = field.allow_null();
        }
        if self.auto_increment {
            field = field.auto_increment();
        }
        if self.db_read_only {
            field = field.db_read_only();
        }
        if self.server_expression {
            field = field.server_expression();
        }
        field
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_from_json() {
        let def = EntityDefinition::from_json_str(
            r#"{ "key": "Task", "dbName": "tasks",
                 "fields": [ { "key": "id", "type": "integer", "autoIncrement": true },
                             { "key": "title", "type": "text", "dbName": "task_title" } ] }"#,
        )
        .unwrap();
        let entity = def.into_metadata().unwrap();
        assert_eq!(entity.db_name(), "tasks");
        assert_eq!(entity.field("title").unwrap().column_name(), "task_title");
        assert!(entity.auto_increment_id().is_some());
    }

    #[test]
    fn test_unknown_type_rejected() {
        let result = EntityDefinition::from_json_str(r#"{ "key": "T", "fields": [ { "key": "a", "type": "blob" } ] }"#);
        assert!(matches!(result, Err(SqlError::InvalidMetadata(_))));
    }
}
