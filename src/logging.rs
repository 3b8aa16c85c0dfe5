// ============================================================================
// Statement Logging
// ============================================================================
//
// `LoggingCommand` decorates every command a `SqlDatabase` hands out. It
// records bound arguments, times execution, reports statements through
// `tracing` according to an explicit `SqlLogConfig`, and turns adapter
// failures into `SqlError::Execution` carrying the SQL text and arguments.
//
// ============================================================================

use crate::core::{Result, SqlError, Value};
use crate::dialect::{SqlCommand, SqlResult, leading_keyword};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value as JsonValue};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
    static ref ICONS: HashMap<&'static str, &'static str> = HashMap::from([
        ("INSERT", "⚪"),
        ("SELECT", "🔵"),
        ("UPDATE", "🟣"),
        ("DELETE", "🟤"),
        ("CREATE", "🟩"),
        ("ALTER", "🟨"),
        ("DROP", "🟥"),
        ("TRUNCATE", "⬛"),
        ("GRANT", "🟪"),
        ("REVOKE", "🟫"),
    ]);
}

const FALLBACK_ICON: &str = "💢";

/// One executed statement, as handed to a custom log callback.
#[derive(Debug)]
pub struct StatementLog<'a> {
    pub duration: Duration,
    pub sql: &'a str,
    pub args: &'a [(String, Value)],
}

pub type LogCallback = Arc<dyn Fn(&StatementLog<'_>) + Send + Sync>;

#[derive(Clone, Default)]
pub enum LogMode {
    #[default]
    Off,
    /// Statement text followed by arguments and duration
    Full,
    /// Single line: icon, duration, collapsed SQL, arguments
    OneLiner,
    Custom(LogCallback),
}

impl fmt::Debug for LogMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => f.write_str("Off"),
            Self::Full => f.write_str("Full"),
            Self::OneLiner => f.write_str("OneLiner"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Statement logging configuration, passed to `SqlDatabase` at
/// construction. Disabled by default.
#[derive(Debug, Clone, Default)]
pub struct SqlLogConfig {
    pub mode: LogMode,
    /// Statements faster than this are not logged
    pub duration_threshold: Duration,
}

impl SqlLogConfig {
    pub fn off() -> Self {
        Self::default()
    }

    pub fn full() -> Self {
        Self {
            mode: LogMode::Full,
            ..Self::default()
        }
    }

    pub fn one_liner() -> Self {
        Self {
            mode: LogMode::OneLiner,
            ..Self::default()
        }
    }

    pub fn custom<F>(callback: F) -> Self
    where
        F: Fn(&StatementLog<'_>) + Send + Sync + 'static,
    {
        Self {
            mode: LogMode::Custom(Arc::new(callback)),
            ..Self::default()
        }
    }

    pub fn duration_threshold(mut self, threshold: Duration) -> Self {
        self.duration_threshold = threshold;
        self
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self.mode, LogMode::Off)
    }
}

/// Render `sql` on one line with its icon and duration.
pub fn format_one_liner(duration: Duration, sql: &str, args: &[(String, Value)]) -> String {
    let collapsed = WHITESPACE.replace_all(sql.trim(), " ");
    let keyword = leading_keyword(&collapsed);
    let icon = ICONS.get(keyword.as_str()).copied().unwrap_or(FALLBACK_ICON);
    format!(
        "{} ({:.3}) {} {}",
        icon,
        duration.as_secs_f64(),
        collapsed,
        format_args_json(args)
    )
}

/// Arguments keyed by token; positional `?` tokens are listed in order.
pub fn format_args_json(args: &[(String, Value)]) -> JsonValue {
    let distinct: HashSet<&str> = args.iter().map(|(t, _)| t.as_str()).collect();
    if distinct.len() == args.len() {
        let mut map = Map::new();
        for (token, value) in args {
            map.insert(token.clone(), value.to_json());
        }
        JsonValue::Object(map)
    } else {
        JsonValue::Array(args.iter().map(|(_, v)| v.to_json()).collect())
    }
}

pub(crate) struct LoggingCommand {
    origin: Box<dyn SqlCommand>,
    config: Arc<SqlLogConfig>,
    args: Vec<(String, Value)>,
}

impl LoggingCommand {
    pub(crate) fn new(origin: Box<dyn SqlCommand>, config: Arc<SqlLogConfig>) -> Self {
        Self {
            origin,
            config,
            args: Vec::new(),
        }
    }

    fn log_success(&self, duration: Duration, sql: &str) {
        if duration < self.config.duration_threshold {
            return;
        }
        match &self.config.mode {
            LogMode::Off => {}
            LogMode::Full => tracing::info!(
                target: "sqlbridge::sql",
                duration = duration.as_secs_f64(),
                arguments = %format_args_json(&self.args),
                "{}",
                sql
            ),
            LogMode::OneLiner => {
                tracing::info!(target: "sqlbridge::sql", "{}", format_one_liner(duration, sql, &self.args))
            }
            LogMode::Custom(callback) => callback(&StatementLog {
                duration,
                sql,
                args: &self.args,
            }),
        }
    }
}

#[async_trait]
impl SqlCommand for LoggingCommand {
    fn param(&mut self, value: Value) -> String {
        let token = self.origin.param(value.clone());
        self.args.push((token.clone(), value));
        token
    }

    async fn execute(&mut self, sql: &str) -> Result<SqlResult> {
        let start = Instant::now();
        match self.origin.execute(sql).await {
            Ok(result) => {
                self.log_success(start.elapsed(), sql);
                Ok(result)
            }
            Err(err) => Err(execution_failure(&self.config, sql, &self.args, err)),
        }
    }
}

/// Log a failed statement and return it as `SqlError::Execution` carrying
/// `sql` and `args`. `TransactionCompleted` passes through untouched.
pub(crate) fn execution_failure(
    config: &SqlLogConfig,
    sql: &str,
    args: &[(String, Value)],
    err: SqlError,
) -> SqlError {
    if matches!(err, SqlError::TransactionCompleted) {
        return err;
    }
    if config.is_enabled() {
        tracing::error!(
            target: "sqlbridge::sql",
            arguments = %format_args_json(args),
            error = %err,
            "{}",
            sql
        );
    }
    match err {
        execution @ SqlError::Execution { .. } => execution,
        other => SqlError::Execution {
            message: other.to_string(),
            sql: sql.to_string(),
            params: args.to_vec(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{DryRunDialect, SqlImplementation};
    use std::sync::Mutex;

    #[test]
    fn test_one_liner_collapses_whitespace() {
        let line = format_one_liner(
            Duration::from_millis(1500),
            "select a,\n\t b\r\n  from t where a = $1",
            &[("$1".into(), Value::from(3))],
        );
        assert_eq!(line, "🔵 (1.500) select a, b from t where a = $1 {\"$1\":3}");
    }

    #[test]
    fn test_unknown_keyword_icon() {
        let line = format_one_liner(Duration::ZERO, "pragma table_info(t)", &[]);
        assert!(line.starts_with(FALLBACK_ICON));
    }

    #[test]
    fn test_positional_args_render_as_list() {
        let args = vec![("?".to_string(), Value::from(1)), ("?".to_string(), Value::from("a"))];
        assert_eq!(format_args_json(&args).to_string(), "[1,\"a\"]");
    }

    #[tokio::test]
    async fn test_custom_callback_sees_arguments() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let config = SqlLogConfig::custom(move |log| {
            sink.lock().unwrap().push((log.sql.to_string(), log.args.len()));
        });
        let dialect = DryRunDialect::new();
        let mut command = LoggingCommand::new(dialect.create_command(), Arc::new(config));
        let token = command.param(Value::from(1));
        command.execute(&format!("select 1 where 1 = {}", token)).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![("select 1 where 1 = ?".to_string(), 1)]);
    }

    #[tokio::test]
    async fn test_failures_carry_sql_and_arguments() {
        let dialect = DryRunDialect::new();
        dialect.push_error("constraint failed");
        let mut command = LoggingCommand::new(dialect.create_command(), Arc::new(SqlLogConfig::off()));
        let token = command.param(Value::from("x"));
        let err = command.execute(&format!("insert into t (a) values ({})", token)).await.unwrap_err();
        match err {
            SqlError::Execution { message, sql, params } => {
                assert!(message.contains("constraint failed"));
                assert_eq!(sql, "insert into t (a) values (?)");
                assert_eq!(params, vec![("?".to_string(), Value::Text("x".into()))]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_execution_failure_keeps_transaction_completed() {
        let config = SqlLogConfig::full();
        let err = execution_failure(&config, "select 1", &[], SqlError::TransactionCompleted);
        assert!(matches!(err, SqlError::TransactionCompleted));

        let err = execution_failure(&config, "create table t (a)", &[], SqlError::Driver("locked".into()));
        assert!(matches!(err, SqlError::Execution { ref sql, .. } if sql == "create table t (a)"));
    }
}
