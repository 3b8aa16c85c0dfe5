// ============================================================================
// Filter Compiler
// ============================================================================
//
// Turns a `Filter` tree into WHERE text plus parameters in three passes:
//
// 1. plan    - synchronous walk: resolves every field, converts values with
//              the field converters and starts raw builders. Structural
//              errors surface here, before anything is awaited or emitted.
// 2. resolve - awaits all raw builders concurrently.
// 3. render  - folds constant branches, then concatenates the text and
//              binds each value through the command as its token is
//              written, so parameters follow textual order for every
//              token style.
//
// ============================================================================

use super::raw::RawFilterContext;
use super::{CompareOp, Filter, MatchMode};
use crate::core::{Result, SqlError, Value};
use crate::dialect::SqlCommand;
use crate::metadata::{EntityDbNames, EntityMetadata};
use futures::future::{BoxFuture, try_join_all};
use std::sync::Arc;

/// Predicate matching no rows.
pub const NEVER: &str = "1 = 0";

const LIKE_ESCAPE: char = '!';

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Piece {
    Sql(String),
    Param(Value),
}

#[derive(Debug)]
enum Plan {
    Predicate(Vec<Piece>),
    Always,
    Never,
    And(Vec<Plan>),
    Or(Vec<Plan>),
    Not(Box<Plan>),
    Raw(usize),
}

/// Folded condition. `grouped` marks text that needs parentheses when it
/// is nested inside another group.
enum Condition {
    All,
    Nothing,
    Sql { pieces: Vec<Piece>, grouped: bool },
}

type PendingRaw = BoxFuture<'static, Result<Vec<Piece>>>;

pub struct FilterCompiler<'a> {
    entity: &'a EntityMetadata,
    names: Arc<EntityDbNames>,
}

impl<'a> FilterCompiler<'a> {
    pub fn new(entity: &'a EntityMetadata, names: Arc<EntityDbNames>) -> Self {
        Self { entity, names }
    }

    /// Compile `filter`; `None` means the filter matches every row.
    pub async fn compile<C>(&self, filter: &Filter, command: &mut C) -> Result<Option<String>>
    where
        C: SqlCommand + ?Sized,
    {
        let mut pending = Vec::new();
        let plan = self.plan(filter, &mut pending)?;
        let resolved = if pending.is_empty() {
            Vec::new()
        } else {
            try_join_all(pending).await?
        };

        Ok(match fold(&plan, &resolved) {
            Condition::All => None,
            Condition::Nothing => Some(NEVER.to_string()),
            Condition::Sql { pieces, .. } => Some(bind(pieces, command)),
        })
    }

    /// `" where <predicate>"`, or an empty string when nothing is filtered.
    pub async fn where_clause<C>(&self, filter: &Filter, command: &mut C) -> Result<String>
    where
        C: SqlCommand + ?Sized,
    {
        Ok(match self.compile(filter, command).await? {
            Some(predicate) => format!(" where {}", predicate),
            None => String::new(),
        })
    }

    fn plan(&self, filter: &Filter, pending: &mut Vec<PendingRaw>) -> Result<Plan> {
        match filter {
            Filter::Compare { field, op, value } => self.plan_compare(field, *op, value),
            Filter::In { field, values, negated } => self.plan_in(field, values, *negated),
            Filter::Match { field, pattern, mode } => self.plan_match(field, pattern, *mode),
            Filter::And(children) => Ok(Plan::And(
                children
                    .iter()
                    .map(|c| self.plan(c, pending))
                    .collect::<Result<Vec<_>>>()?,
            )),
            Filter::Or(children) => Ok(Plan::Or(
                children
                    .iter()
                    .map(|c| self.plan(c, pending))
                    .collect::<Result<Vec<_>>>()?,
            )),
            Filter::Not(child) => Ok(Plan::Not(Box::new(self.plan(child, pending)?))),
            Filter::Raw(raw) => {
                let ctx = RawFilterContext::new(self.names.clone());
                let build = raw.start(ctx.clone());
                pending.push(Box::pin(async move {
                    let sql = build.await?;
                    ctx.into_pieces(&sql)
                }));
                Ok(Plan::Raw(pending.len() - 1))
            }
        }
    }

    /// Column text and converted value for one field reference.
    fn resolve(&self, key: &str) -> Result<(String, &crate::metadata::FieldMetadata)> {
        let field = self.entity.field(key)?;
        let column = self.names.column_of(key)?;
        Ok((column.to_string(), field))
    }

    fn plan_compare(&self, key: &str, op: CompareOp, value: &Value) -> Result<Plan> {
        let (column, field) = self.resolve(key)?;
        let value = field.value_converter().to_db(value)?;

        let pieces = match (op, value.is_null()) {
            (CompareOp::Eq, true) => vec![Piece::Sql(format!("{} is null", column))],
            (CompareOp::Ne, true) => vec![Piece::Sql(format!("{} is not null", column))],
            (_, true) => {
                return Err(SqlError::InvalidFilter(format!(
                    "cannot compare '{}' {} NULL",
                    key,
                    op.sql()
                )));
            }
            (CompareOp::Ne, false) if field.is_allow_null() => vec![
                Piece::Sql(format!("({} <> ", column)),
                Piece::Param(value),
                Piece::Sql(format!(" or {} is null)", column)),
            ],
            (op, false) => vec![Piece::Sql(format!("{} {} ", column, op.sql())), Piece::Param(value)],
        };
        Ok(Plan::Predicate(pieces))
    }

    fn plan_in(&self, key: &str, values: &[Value], negated: bool) -> Result<Plan> {
        let (column, field) = self.resolve(key)?;
        if values.is_empty() {
            return Ok(if negated { Plan::Always } else { Plan::Never });
        }

        let mut has_null = false;
        let mut list = Vec::with_capacity(values.len());
        for value in values {
            let converted = field.value_converter().to_db(value)?;
            if converted.is_null() {
                has_null = true;
            } else {
                list.push(converted);
            }
        }

        let mut pieces = Vec::new();
        if !list.is_empty() {
            let keyword = if negated { "not in" } else { "in" };
            pieces.push(Piece::Sql(format!("{} {} (", column, keyword)));
            for (i, value) in list.into_iter().enumerate() {
                if i > 0 {
                    pieces.push(Piece::Sql(", ".into()));
                }
                pieces.push(Piece::Param(value));
            }
            pieces.push(Piece::Sql(")".into()));
        }

        let null_test = match (negated, has_null) {
            (false, true) => Some(format!("{} is null", column)),
            (true, true) => Some(format!("{} is not null", column)),
            (true, false) if field.is_allow_null() => Some(format!("{} is null", column)),
            _ => None,
        };

        Ok(match null_test {
            None => Plan::Predicate(pieces),
            Some(test) if pieces.is_empty() => Plan::Predicate(vec![Piece::Sql(test)]),
            Some(test) => {
                let joiner = if negated && has_null { " and " } else { " or " };
                pieces.insert(0, Piece::Sql("(".into()));
                pieces.push(Piece::Sql(format!("{}{})", joiner, test)));
                Plan::Predicate(pieces)
            }
        })
    }

    fn plan_match(&self, key: &str, pattern: &str, mode: MatchMode) -> Result<Plan> {
        let (column, field) = self.resolve(key)?;
        let escaped = escape_like(pattern);
        let like = match mode {
            MatchMode::Contains | MatchMode::NotContains => format!("%{}%", escaped),
            MatchMode::StartsWith => format!("{}%", escaped),
            MatchMode::EndsWith => format!("%{}", escaped),
        };

        let pieces = if mode == MatchMode::NotContains {
            let test = vec![
                Piece::Sql(format!("lower({}) not like lower(", column)),
                Piece::Param(Value::Text(like)),
                Piece::Sql(format!(") escape '{}'", LIKE_ESCAPE)),
            ];
            if field.is_allow_null() {
                let mut wrapped = vec![Piece::Sql(format!("({} is null or ", column))];
                wrapped.extend(test);
                wrapped.push(Piece::Sql(")".into()));
                wrapped
            } else {
                test
            }
        } else {
            vec![
                Piece::Sql(format!("lower({}) like lower(", column)),
                Piece::Param(Value::Text(like)),
                Piece::Sql(format!(") escape '{}'", LIKE_ESCAPE)),
            ]
        };
        Ok(Plan::Predicate(pieces))
    }
}

fn escape_like(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        if c == LIKE_ESCAPE || c == '%' || c == '_' {
            out.push(LIKE_ESCAPE);
        }
        out.push(c);
    }
    out
}

fn fold(plan: &Plan, resolved: &[Vec<Piece>]) -> Condition {
    match plan {
        Plan::Predicate(pieces) => Condition::Sql {
            pieces: pieces.clone(),
            grouped: false,
        },
        Plan::Always => Condition::All,
        Plan::Never => Condition::Nothing,
        Plan::Raw(index) => {
            let pieces = &resolved[*index];
            let blank = pieces
                .iter()
                .all(|p| matches!(p, Piece::Sql(s) if s.trim().is_empty()));
            if blank {
                Condition::All
            } else {
                Condition::Sql {
                    pieces: pieces.clone(),
                    grouped: true,
                }
            }
        }
        Plan::And(children) => {
            let mut parts = Vec::new();
            for child in children {
                match fold(child, resolved) {
                    Condition::All => {}
                    Condition::Nothing => return Condition::Nothing,
                    sql => parts.push(sql),
                }
            }
            join(parts, " and ", Condition::All)
        }
        Plan::Or(children) => {
            let mut parts = Vec::new();
            for child in children {
                match fold(child, resolved) {
                    Condition::Nothing => {}
                    Condition::All => return Condition::All,
                    sql => parts.push(sql),
                }
            }
            join(parts, " or ", Condition::Nothing)
        }
        Plan::Not(child) => match fold(child, resolved) {
            Condition::All => Condition::Nothing,
            Condition::Nothing => Condition::All,
            Condition::Sql { pieces, .. } => {
                let mut negated = vec![Piece::Sql("not (".into())];
                negated.extend(pieces);
                negated.push(Piece::Sql(")".into()));
                Condition::Sql {
                    pieces: negated,
                    grouped: false,
                }
            }
        },
    }
}

fn join(mut parts: Vec<Condition>, separator: &str, empty: Condition) -> Condition {
    match parts.len() {
        0 => empty,
        1 => parts.remove(0),
        _ => {
            let mut pieces = Vec::new();
            for (i, part) in parts.into_iter().enumerate() {
                if i > 0 {
                    pieces.push(Piece::Sql(separator.to_string()));
                }
                if let Condition::Sql { pieces: inner, grouped } = part {
                    if grouped {
                        pieces.push(Piece::Sql("(".into()));
                        pieces.extend(inner);
                        pieces.push(Piece::Sql(")".into()));
                    } else {
                        pieces.extend(inner);
                    }
                }
            }
            Condition::Sql { pieces, grouped: true }
        }
    }
}

fn bind<C: SqlCommand + ?Sized>(pieces: Vec<Piece>, command: &mut C) -> String {
    let mut sql = String::new();
    for piece in pieces {
        match piece {
            Piece::Sql(text) => sql.push_str(&text),
            Piece::Param(value) => sql.push_str(&command.param(value)),
        }
    }
    sql
}
