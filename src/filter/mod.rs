// ============================================================================
// Filter Algebra
// ============================================================================
//
// Dialect-independent row predicates over entity fields. A `Filter` is
// built per call, compiled by `FilterCompiler` into a WHERE fragment plus
// bound parameters, and discarded.
//
// ============================================================================

pub mod compiler;
pub mod json;
pub mod raw;

use crate::core::Value;

pub use compiler::FilterCompiler;
pub use raw::{RawFilter, RawFilterContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl CompareOp {
    pub fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
        }
    }
}

/// Case-insensitive string matching modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
}

#[derive(Debug, Clone)]
pub enum Filter {
    Compare {
        field: String,
        op: CompareOp,
        value: Value,
    },
    In {
        field: String,
        values: Vec<Value>,
        negated: bool,
    },
    Match {
        field: String,
        pattern: String,
        mode: MatchMode,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Raw(RawFilter),
}

impl Filter {
    /// Matches every row.
    pub fn all() -> Self {
        Self::And(Vec::new())
    }

    fn compare(field: &str, op: CompareOp, value: impl Into<Value>) -> Self {
        Self::Compare {
            field: field.to_string(),
            op,
            value: value.into(),
        }
    }

    /// `field = value`; comparing with NULL compiles to `is null`.
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Eq, value)
    }

    pub fn ne(field: &str, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Ne, value)
    }

    pub fn lt(field: &str, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Lt, value)
    }

    pub fn lte(field: &str, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Lte, value)
    }

    pub fn gt(field: &str, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Gt, value)
    }

    pub fn gte(field: &str, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOp::Gte, value)
    }

    pub fn is_null(field: &str) -> Self {
        Self::eq(field, Value::Null)
    }

    pub fn is_not_null(field: &str) -> Self {
        Self::ne(field, Value::Null)
    }

    pub fn is_in<I, V>(field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::In {
            field: field.to_string(),
            values: values.into_iter().map(Into::into).collect(),
            negated: false,
        }
    }

    pub fn not_in<I, V>(field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::In {
            field: field.to_string(),
            values: values.into_iter().map(Into::into).collect(),
            negated: true,
        }
    }

    fn matching(field: &str, pattern: &str, mode: MatchMode) -> Self {
        Self::Match {
            field: field.to_string(),
            pattern: pattern.to_string(),
            mode,
        }
    }

    pub fn contains(field: &str, pattern: &str) -> Self {
        Self::matching(field, pattern, MatchMode::Contains)
    }

    pub fn not_contains(field: &str, pattern: &str) -> Self {
        Self::matching(field, pattern, MatchMode::NotContains)
    }

    pub fn starts_with(field: &str, pattern: &str) -> Self {
        Self::matching(field, pattern, MatchMode::StartsWith)
    }

    pub fn ends_with(field: &str, pattern: &str) -> Self {
        Self::matching(field, pattern, MatchMode::EndsWith)
    }

    pub fn and(children: Vec<Filter>) -> Self {
        Self::And(children)
    }

    pub fn or(children: Vec<Filter>) -> Self {
        Self::Or(children)
    }

    pub fn negate(child: Filter) -> Self {
        Self::Not(Box::new(child))
    }

    pub fn raw(raw: RawFilter) -> Self {
        Self::Raw(raw)
    }

    /// Combine with another filter, flattening nested `And`s.
    pub fn and_also(self, other: Filter) -> Self {
        match (self, other) {
            (Self::And(mut left), Self::And(right)) => {
                left.extend(right);
                Self::And(left)
            }
            (Self::And(mut left), other) => {
                left.push(other);
                Self::And(left)
            }
            (this, other) => Self::And(vec![this, other]),
        }
    }
}
