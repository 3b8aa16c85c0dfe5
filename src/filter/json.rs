// JSON wire shape of filters, as sent by REST clients:
//
//   { "id": [1, 3] }                          in
//   { "title": { "$contains": "x" } }         operators
//   { "$or": [ {..}, {..} ], "done": false }  composition
//
// Raw filters only exist server side and cannot be encoded.

use super::{CompareOp, Filter, MatchMode};
use crate::core::{Result, SqlError, Value};
use serde_json::{Map, Value as JsonValue, json};

impl Filter {
    pub fn from_json(json: &JsonValue) -> Result<Filter> {
        let object = json
            .as_object()
            .ok_or_else(|| SqlError::InvalidFilter(format!("expected a JSON object, got {}", json)))?;

        let mut conditions = Vec::new();
        for (key, value) in object {
            match key.as_str() {
                "$and" => conditions.push(Filter::And(parse_list(key, value)?)),
                "$or" => conditions.push(Filter::Or(parse_list(key, value)?)),
                "$not" => conditions.push(Filter::negate(Filter::from_json(value)?)),
                field if field.starts_with('$') => {
                    return Err(SqlError::InvalidFilter(format!("unknown operator '{}'", field)));
                }
                field => field_conditions(field, value, &mut conditions)?,
            }
        }

        Ok(if conditions.len() == 1 {
            conditions.remove(0)
        } else {
            Filter::And(conditions)
        })
    }

    pub fn to_json(&self) -> Result<JsonValue> {
        let json = match self {
            Filter::Compare { field, op, value } => {
                let value = value.to_json();
                match op {
                    CompareOp::Eq if !(value.is_array() || value.is_object()) => json!({ field: value }),
                    _ => json!({ field: { op_name(*op): value } }),
                }
            }
            Filter::In { field, values, negated } => {
                let list: Vec<JsonValue> = values.iter().map(Value::to_json).collect();
                if *negated {
                    json!({ field: { "$nin": list } })
                } else {
                    json!({ field: list })
                }
            }
            Filter::Match { field, pattern, mode } => json!({ field: { match_name(*mode): pattern } }),
            Filter::And(children) => json!({ "$and": to_json_list(children)? }),
            Filter::Or(children) => json!({ "$or": to_json_list(children)? }),
            Filter::Not(child) => json!({ "$not": child.to_json()? }),
            Filter::Raw(_) => {
                return Err(SqlError::InvalidFilter("raw filters cannot be serialised".into()));
            }
        };
        Ok(json)
    }
}

fn parse_list(key: &str, value: &JsonValue) -> Result<Vec<Filter>> {
    value
        .as_array()
        .ok_or_else(|| SqlError::InvalidFilter(format!("'{}' expects an array", key)))?
        .iter()
        .map(Filter::from_json)
        .collect()
}

fn to_json_list(children: &[Filter]) -> Result<Vec<JsonValue>> {
    children.iter().map(Filter::to_json).collect()
}

fn is_operator_object(object: &Map<String, JsonValue>) -> bool {
    !object.is_empty() && object.keys().all(|k| k.starts_with('$'))
}

fn field_conditions(field: &str, value: &JsonValue, out: &mut Vec<Filter>) -> Result<()> {
    match value {
        JsonValue::Array(items) => out.push(Filter::is_in(field, items.iter().map(Value::from_json))),
        JsonValue::Object(ops) if is_operator_object(ops) => {
            for (op, operand) in ops {
                out.push(operator(field, op, operand)?);
            }
        }
        JsonValue::Object(_) => out.push(Filter::eq(field, Value::Json(value.clone()))),
        scalar => out.push(Filter::eq(field, Value::from_json(scalar))),
    }
    Ok(())
}

fn operator(field: &str, op: &str, operand: &JsonValue) -> Result<Filter> {
    let text = || {
        operand
            .as_str()
            .ok_or_else(|| SqlError::InvalidFilter(format!("'{}' on '{}' expects a string", op, field)))
    };
    let list = || {
        operand
            .as_array()
            .map(|items| items.iter().map(Value::from_json).collect::<Vec<_>>())
            .ok_or_else(|| SqlError::InvalidFilter(format!("'{}' on '{}' expects an array", op, field)))
    };
    let scalar = || match operand {
        JsonValue::Array(_) | JsonValue::Object(_) => Value::Json(operand.clone()),
        other => Value::from_json(other),
    };

    Ok(match op {
        "$eq" => Filter::eq(field, scalar()),
        "$ne" if operand.is_array() => Filter::not_in(field, list()?),
        "$ne" => Filter::ne(field, scalar()),
        "$gt" => Filter::gt(field, scalar()),
        "$gte" => Filter::gte(field, scalar()),
        "$lt" => Filter::lt(field, scalar()),
        "$lte" => Filter::lte(field, scalar()),
        "$in" => Filter::is_in(field, list()?),
        "$nin" => Filter::not_in(field, list()?),
        "$contains" => Filter::contains(field, text()?),
        "$notContains" => Filter::not_contains(field, text()?),
        "$startsWith" => Filter::starts_with(field, text()?),
        "$endsWith" => Filter::ends_with(field, text()?),
        other => {
            return Err(SqlError::InvalidFilter(format!("unknown operator '{}' on '{}'", other, field)));
        }
    })
}

fn op_name(op: CompareOp) -> &'static str {
    match op {
        CompareOp::Eq => "$eq",
        CompareOp::Ne => "$ne",
        CompareOp::Lt => "$lt",
        CompareOp::Lte => "$lte",
        CompareOp::Gt => "$gt",
        CompareOp::Gte => "$gte",
    }
}

fn match_name(mode: MatchMode) -> &'static str {
    match mode {
        MatchMode::Contains => "$contains",
        MatchMode::NotContains => "$notContains",
        MatchMode::StartsWith => "$startsWith",
        MatchMode::EndsWith => "$endsWith",
    }
}
