// ============================================================================
// Sort
// ============================================================================
//
// Ordered ORDER BY segments. Paged reads need a total order, so
// `Sort::create_unique_sort` appends the identity fields missing from a
// sort; without it pages over concurrently mutated data are not
// reproducible.
//
// ============================================================================

use crate::core::{Result, SqlError};
use crate::metadata::EntityMetadata;
use serde_json::{Map, Value as JsonValue};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSegment {
    pub field: String,
    pub descending: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sort {
    segments: Vec<SortSegment>,
}

impl Sort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn asc(mut self, field: &str) -> Self {
        self.segments.push(SortSegment {
            field: field.to_string(),
            descending: false,
        });
        self
    }

    pub fn desc(mut self, field: &str) -> Self {
        self.segments.push(SortSegment {
            field: field.to_string(),
            descending: true,
        });
        self
    }

    pub fn segments(&self) -> &[SortSegment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// `sort` (or an empty sort) followed by every identity field it does
    /// not already mention, ascending.
    pub fn create_unique_sort(entity: &EntityMetadata, sort: Option<&Sort>) -> Sort {
        let mut unique = sort.cloned().unwrap_or_default();
        for key in entity.id_keys() {
            if !unique.segments.iter().any(|s| &s.field == key) {
                unique = unique.asc(key);
            }
        }
        unique
    }

    /// `{ "title": "asc", "id": "desc" }`
    pub fn from_json(json: &JsonValue) -> Result<Sort> {
        let object = json
            .as_object()
            .ok_or_else(|| SqlError::InvalidFilter(format!("expected a sort object, got {}", json)))?;

        let mut sort = Sort::new();
        for (field, direction) in object {
            sort = match direction.as_str().map(str::to_ascii_lowercase).as_deref() {
                Some("asc") => sort.asc(field),
                Some("desc") => sort.desc(field),
                _ => {
                    return Err(SqlError::InvalidFilter(format!(
                        "sort direction of '{}' must be \"asc\" or \"desc\"",
                        field
                    )));
                }
            };
        }
        Ok(sort)
    }

    pub fn to_json(&self) -> JsonValue {
        let mut object = Map::new();
        for s in &self.segments {
            let direction = if s.descending { "desc" } else { "asc" };
            object.insert(s.field.clone(), JsonValue::String(direction.into()));
        }
        JsonValue::Object(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::FieldMetadata;
    use serde_json::json;

    fn line() -> EntityMetadata {
        EntityMetadata::builder("Line")
            .field(FieldMetadata::integer("orderId"))
            .field(FieldMetadata::integer("lineNo"))
            .field(FieldMetadata::text("sku"))
            .id(["orderId", "lineNo"])
            .build()
            .unwrap()
    }

    #[test]
    fn test_unique_sort_from_nothing_uses_identity() {
        let sort = Sort::create_unique_sort(&line(), None);
        assert_eq!(sort, Sort::new().asc("orderId").asc("lineNo"));
    }

    #[test]
    fn test_unique_sort_keeps_caller_segments_first() {
        let sort = Sort::create_unique_sort(&line(), Some(&Sort::new().desc("sku").desc("lineNo")));
        assert_eq!(sort, Sort::new().desc("sku").desc("lineNo").asc("orderId"));
    }

    #[test]
    fn test_json_encoding() {
        let sort = Sort::from_json(&json!({ "sku": "DESC", "orderId": "asc" })).unwrap();
        assert_eq!(sort, Sort::new().desc("sku").asc("orderId"));
        assert_eq!(sort.to_json(), json!({ "sku": "desc", "orderId": "asc" }));
        assert!(Sort::from_json(&json!({ "sku": 1 })).is_err());
    }
}
