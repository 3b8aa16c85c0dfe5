// ============================================================================
// Entity / Field Metadata
// ============================================================================
//
// Read-only descriptors consumed by the filter compiler and the statement
// builder. They are built once and shared (`Arc<EntityMetadata>`) across
// every operation against the entity.
//
// ============================================================================

pub mod converters;
pub mod db_names;
pub mod definition;

use crate::core::{Result, SqlError};
use converters::{
    BooleanConverter, DateTimeConverter, IntegerConverter, JsonConverter, NumberConverter,
    TextConverter, ValueConverter,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

pub use converters::JsonStringConverter;
pub use db_names::EntityDbNames;
pub use definition::{EntityDefinition, FieldDefinition};

/// Declared application type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Integer,
    Number,
    Text,
    Boolean,
    Date,
    Json,
}

impl ValueType {
    pub fn default_converter(self) -> Arc<dyn ValueConverter> {
        match self {
            Self::Integer => Arc::new(IntegerConverter),
            Self::Number => Arc::new(NumberConverter),
            Self::Text => Arc::new(TextConverter),
            Self::Boolean => Arc::new(BooleanConverter),
            Self::Date => Arc::new(DateTimeConverter),
            Self::Json => Arc::new(JsonConverter),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldMetadata {
    key: String,
    db_name: String,
    value_type: ValueType,
    converter: Arc<dyn ValueConverter>,
    sql_expression: Option<String>,
    is_server_expression: bool,
    db_read_only: bool,
    allow_null: bool,
    auto_increment: bool,
}

impl FieldMetadata {
    pub fn new(key: &str, value_type: ValueType) -> Self {
        Self {
            key: key.to_string(),
            db_name: key.to_string(),
            value_type,
            converter: value_type.default_converter(),
            sql_expression: None,
            is_server_expression: false,
            db_read_only: false,
            allow_null: false,
            auto_increment: false,
        }
    }

    pub fn integer(key: &str) -> Self {
        Self::new(key, ValueType::Integer)
    }

    pub fn number(key: &str) -> Self {
        Self::new(key, ValueType::Number)
    }

    pub fn text(key: &str) -> Self {
        Self::new(key, ValueType::Text)
    }

    pub fn boolean(key: &str) -> Self {
        Self::new(key, ValueType::Boolean)
    }

    pub fn date(key: &str) -> Self {
        Self::new(key, ValueType::Date)
    }

    pub fn json(key: &str) -> Self {
        Self::new(key, ValueType::Json)
    }

    /// Set the column name (defaults to the key)
    pub fn db_name(mut self, db_name: &str) -> Self {
        self.db_name = db_name.to_string();
        self
    }

    pub fn converter(mut self, converter: Arc<dyn ValueConverter>) -> Self {
        self.converter = converter;
        self
    }

    /// Compute the field with an SQL expression instead of a column.
    /// Such fields are selected and filterable but never written.
    pub fn sql_expression(mut self, expression: &str) -> Self {
        self.sql_expression = Some(expression.to_string());
        self
    }

    /// The field is computed by the application; it has no column at all.
    pub fn server_expression(mut self) -> Self {
        self.is_server_expression = true;
        self
    }

    pub fn db_read_only(mut self) -> Self {
        self.db_read_only = true;
        self
    }

    pub fn allow_null(mut self) -> Self {
        self.allow_null = true;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn column_name(&self) -> &str {
        &self.db_name
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn value_converter(&self) -> &Arc<dyn ValueConverter> {
        &self.converter
    }

    pub fn sql_expression_text(&self) -> Option<&str> {
        self.sql_expression.as_deref()
    }

    pub fn is_server_expression(&self) -> bool {
        self.is_server_expression
    }

    pub fn is_allow_null(&self) -> bool {
        self.allow_null
    }

    pub fn is_auto_increment(&self) -> bool {
        self.auto_increment
    }

    /// Backed by a real column (not computed by SQL or by the application).
    pub fn has_column(&self) -> bool {
        !self.is_server_expression && self.sql_expression.is_none()
    }

    /// Never written by INSERT / UPDATE.
    pub fn is_db_read_only(&self) -> bool {
        self.db_read_only || !self.has_column() || self.auto_increment
    }
}

/// Entity descriptor: ordered fields, identity fields and table name.
#[derive(Debug, Clone)]
pub struct EntityMetadata {
    key: String,
    db_name: String,
    fields: Vec<FieldMetadata>,
    id_fields: Vec<String>,
}

impl EntityMetadata {
    pub fn builder(key: &str) -> EntityBuilder {
        EntityBuilder {
            key: key.to_string(),
            db_name: None,
            fields: Vec::new(),
            id_fields: Vec::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Unwrapped table name. May be schema qualified (`schema.table`).
    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    pub fn fields(&self) -> &[FieldMetadata] {
        &self.fields
    }

    pub fn field(&self, key: &str) -> Result<&FieldMetadata> {
        self.fields
            .iter()
            .find(|f| f.key == key)
            .ok_or_else(|| SqlError::field_not_found(&self.key, key))
    }

    pub fn id_fields(&self) -> impl Iterator<Item = &FieldMetadata> {
        self.id_fields.iter().filter_map(|k| self.fields.iter().find(|f| &f.key == k))
    }

    pub fn id_keys(&self) -> &[String] {
        &self.id_fields
    }

    /// The single identity field, when it is generated by the database.
    pub fn auto_increment_id(&self) -> Option<&FieldMetadata> {
        match self.id_fields.as_slice() {
            [only] => self.fields.iter().find(|f| &f.key == only && f.auto_increment),
            _ => None,
        }
    }

    /// Copy of this entity with one field's converter replaced.
    pub(crate) fn with_converter(&self, key: &str, converter: Arc<dyn ValueConverter>) -> Self {
        let mut copy = self.clone();
        for field in copy.fields.iter_mut().filter(|f| f.key == key) {
            field.converter = converter.clone();
        }
        copy
    }
}

pub struct EntityBuilder {
    key: String,
    db_name: Option<String>,
    fields: Vec<FieldMetadata>,
    id_fields: Vec<String>,
}

impl EntityBuilder {
    /// Set the table name (defaults to the entity key)
    pub fn db_name(mut self, db_name: &str) -> Self {
        self.db_name = Some(db_name.to_string());
        self
    }

    pub fn field(mut self, field: FieldMetadata) -> Self {
        self.fields.push(field);
        self
    }

    /// Declare the identity fields. Defaults to the first field.
    pub fn id<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.id_fields = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn build(self) -> Result<EntityMetadata> {
        if self.fields.is_empty() {
            return Err(SqlError::InvalidMetadata(format!("entity '{}' has no fields", self.key)));
        }

        let mut keys = HashSet::new();
        let mut columns = HashSet::new();
        for field in &self.fields {
            if !keys.insert(field.key.as_str()) {
                return Err(SqlError::InvalidMetadata(format!(
                    "duplicate field '{}' in entity '{}'",
                    field.key, self.key
                )));
            }
            if field.has_column() && !columns.insert(field.db_name.as_str()) {
                return Err(SqlError::InvalidMetadata(format!(
                    "duplicate column '{}' in entity '{}'",
                    field.db_name, self.key
                )));
            }
        }

        let id_fields = if self.id_fields.is_empty() {
            vec![self.fields[0].key.clone()]
        } else {
            self.id_fields
        };
        for id in &id_fields {
            let field = self
                .fields
                .iter()
                .find(|f| &f.key == id)
                .ok_or_else(|| SqlError::field_not_found(&self.key, id))?;
            if !field.has_column() {
                return Err(SqlError::InvalidMetadata(format!(
                    "identity field '{}' of entity '{}' has no column",
                    id, self.key
                )));
            }
        }

        Ok(EntityMetadata {
            db_name: self.db_name.unwrap_or_else(|| self.key.clone()),
            key: self.key,
            fields: self.fields,
            id_fields,
        })
    }
}
