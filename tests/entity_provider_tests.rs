use serde_json::json;
use sqlbridge::{
    DryRunDialect, EntityDataProvider, EntityId, EntityMetadata, ErrorKind, FieldMetadata,
    Filter, FindOptions, SqlDatabase, SqlError, SqlLogConfig, SqlResult, Value, record,
};
use std::sync::{Arc, Mutex};

fn task() -> Arc<EntityMetadata> {
    Arc::new(
        EntityMetadata::builder("Task")
            .db_name("tasks")
            .field(FieldMetadata::integer("id"))
            .field(FieldMetadata::text("title"))
            .build()
            .unwrap(),
    )
}

fn counter() -> Arc<EntityMetadata> {
    Arc::new(
        EntityMetadata::builder("Counter")
            .db_name("counters")
            .field(FieldMetadata::integer("id").auto_increment())
            .field(FieldMetadata::text("label"))
            .field(FieldMetadata::json("meta").allow_null())
            .build()
            .unwrap(),
    )
}

fn line() -> Arc<EntityMetadata> {
    Arc::new(
        EntityMetadata::builder("Line")
            .db_name("lines")
            .field(FieldMetadata::integer("orderId"))
            .field(FieldMetadata::integer("lineNo"))
            .field(FieldMetadata::text("sku"))
            .id(["orderId", "lineNo"])
            .build()
            .unwrap(),
    )
}

fn rows(columns: &[&str], rows: Vec<Vec<Value>>) -> SqlResult {
    SqlResult::new(columns.iter().map(|c| c.to_string()).collect(), rows)
}

fn sql_of(dialect: &DryRunDialect) -> Vec<String> {
    dialect.statements().into_iter().map(|s| s.sql).collect()
}

#[tokio::test]
async fn test_insert_with_returning_reads_row_from_statement() {
    let dialect = DryRunDialect::preset("postgres").unwrap();
    dialect.push_result(rows(&["id", "title"], vec![vec![Value::from(1), Value::from("x")]]));
    let tasks = SqlDatabase::new(Arc::new(dialect.clone())).entity_provider(task());

    let row = tasks.insert(record([("id", Value::from(1)), ("title", Value::from("x"))])).await.unwrap();
    assert_eq!(row, record([("id", Value::from(1)), ("title", Value::from("x"))]));
    assert_eq!(
        sql_of(&dialect),
        vec!["insert into \"tasks\" (\"id\", \"title\") values ($1, $2) returning \"id\", \"title\""]
    );
    assert_eq!(dialect.mutation_count(), 1);
}

#[tokio::test]
async fn test_insert_without_returning_refetches_by_identity() {
    let dialect = DryRunDialect::preset("mysql").unwrap();
    dialect.push_result(SqlResult::empty().with_rows_affected(1));
    dialect.push_result(rows(&["id", "title"], vec![vec![Value::from(1), Value::from("x")]]));
    let tasks = SqlDatabase::new(Arc::new(dialect.clone())).entity_provider(task());

    let row = tasks.insert(record([("id", Value::from(1)), ("title", Value::from("x"))])).await.unwrap();
    assert_eq!(row, record([("id", Value::from(1)), ("title", Value::from("x"))]));

    let statements = dialect.statements();
    assert_eq!(statements[0].sql, "insert into `tasks` (`id`, `title`) values (?, ?)");
    assert_eq!(statements[1].sql, "select `id`, `title` from `tasks` where `id` = ?");
    assert_eq!(statements[1].params, vec![Value::Integer(1)]);
}

#[tokio::test]
async fn test_refetch_reports_actual_row_count() {
    let dialect = DryRunDialect::preset("mysql").unwrap();
    dialect.push_result(SqlResult::empty().with_rows_affected(1));
    dialect.push_result(rows(
        &["id", "title"],
        vec![
            vec![Value::from(1), Value::from("x")],
            vec![Value::from(1), Value::from("older")],
        ],
    ));
    let tasks = SqlDatabase::new(Arc::new(dialect.clone())).entity_provider(task());

    let err = tasks
        .insert(record([("id", Value::from(1)), ("title", Value::from("x"))]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cardinality);
    assert!(matches!(err, SqlError::Cardinality { expected: 1, actual: 2, .. }));
    assert!(err.to_string().contains("2"));
}

#[tokio::test]
async fn test_insert_without_returning_uses_generated_key() {
    let dialect = DryRunDialect::preset("mysql").unwrap();
    dialect.push_result(SqlResult::empty().with_rows_affected(1).with_last_insert_id(7));
    dialect.push_result(rows(
        &["id", "label", "meta"],
        vec![vec![Value::from(7), Value::from("clicks"), Value::Null]],
    ));
    let counters = SqlDatabase::new(Arc::new(dialect.clone())).entity_provider(counter());

    let row = counters
        .insert(record([("id", Value::from(99)), ("label", Value::from("clicks"))]))
        .await
        .unwrap();
    assert_eq!(row.get("id"), Some(&Value::Integer(7)));

    let statements = dialect.statements();
    // auto-increment identities are never written
    assert_eq!(statements[0].sql, "insert into `counters` (`label`) values (?)");
    assert_eq!(statements[1].params, vec![Value::Integer(7)]);
}

#[tokio::test]
async fn test_insert_with_nothing_to_write_uses_default_values() {
    let dialect = DryRunDialect::preset("sqlite").unwrap();
    dialect.push_result(rows(
        &["id", "label", "meta"],
        vec![vec![Value::from(1), Value::from(""), Value::Null]],
    ));
    let counters = SqlDatabase::new(Arc::new(dialect.clone())).entity_provider(counter());

    counters.insert(record([("meta", Value::Null)])).await.unwrap();
    assert_eq!(
        sql_of(&dialect),
        vec!["insert into \"counters\" default values returning \"id\", \"label\", \"meta\""]
    );
}

#[tokio::test]
async fn test_json_fields_are_stored_as_text_without_json_columns() {
    let dialect = DryRunDialect::preset("sqlite").unwrap();
    dialect.push_result(rows(
        &["id", "label", "meta"],
        vec![vec![Value::from(1), Value::from("a"), Value::from("{\"tags\":[\"x\"]}")]],
    ));
    let counters = SqlDatabase::new(Arc::new(dialect.clone())).entity_provider(counter());

    let row = counters
        .insert(record([
            ("label", Value::from("a")),
            ("meta", Value::Json(json!({ "tags": ["x"] }))),
        ]))
        .await
        .unwrap();
    assert_eq!(row.get("meta"), Some(&Value::Json(json!({ "tags": ["x"] }))));
    assert_eq!(
        dialect.statements()[0].params,
        vec![Value::from("a"), Value::Text("{\"tags\":[\"x\"]}".into())]
    );
}

#[tokio::test]
async fn test_update_compound_identity_matches_both_components() {
    let dialect = DryRunDialect::preset("postgres").unwrap();
    dialect.push_result(rows(
        &["orderId", "lineNo", "sku"],
        vec![vec![Value::from(1), Value::from(2), Value::from("B-7")]],
    ));
    let lines = SqlDatabase::new(Arc::new(dialect.clone())).entity_provider(line());

    let id = EntityId::from(record([("orderId", 1), ("lineNo", 2)]));
    lines.update(&id, record([("sku", "B-7")])).await.unwrap();

    let statement = dialect.last_statement().unwrap();
    assert_eq!(
        statement.sql,
        "update \"lines\" set \"sku\" = $1 where \"lineNo\" = $2 and \"orderId\" = $3 \
         returning \"orderId\", \"lineNo\", \"sku\""
    );
    assert_eq!(statement.params, vec![Value::from("B-7"), Value::Integer(2), Value::Integer(1)]);
}

#[tokio::test]
async fn test_partial_compound_identity_is_rejected() {
    let dialect = DryRunDialect::new();
    let lines = SqlDatabase::new(Arc::new(dialect.clone())).entity_provider(line());

    let err = lines.delete(&EntityId::from(1)).await.unwrap_err();
    assert!(matches!(err, SqlError::MissingIdentity { ref field, .. } if field == "lineNo"));

    let err = lines
        .update(&EntityId::from(record([("orderId", 1)])), record([("sku", "x")]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Structural);
    assert!(dialect.statements().is_empty());
}

#[tokio::test]
async fn test_update_without_returning_refetches_under_new_identity() {
    let dialect = DryRunDialect::preset("mysql").unwrap();
    dialect.push_result(SqlResult::empty().with_rows_affected(1));
    dialect.push_result(rows(
        &["orderId", "lineNo", "sku"],
        vec![vec![Value::from(1), Value::from(5), Value::from("A")]],
    ));
    let lines = SqlDatabase::new(Arc::new(dialect.clone())).entity_provider(line());

    let id = EntityId::from(record([("orderId", 1), ("lineNo", 2)]));
    let row = lines.update(&id, record([("lineNo", 5)])).await.unwrap();
    assert_eq!(row.get("lineNo"), Some(&Value::Integer(5)));

    let statements = dialect.statements();
    assert_eq!(
        statements[0].sql,
        "update `lines` set `lineNo` = ? where `lineNo` = ? and `orderId` = ?"
    );
    assert_eq!(
        statements[1].sql,
        "select `orderId`, `lineNo`, `sku` from `lines` where `lineNo` = ? and `orderId` = ?"
    );
    assert_eq!(statements[1].params, vec![Value::Integer(5), Value::Integer(1)]);
}

#[tokio::test]
async fn test_update_touching_no_rows_is_a_cardinality_error() {
    let dialect = DryRunDialect::preset("mysql").unwrap();
    dialect.push_result(SqlResult::empty().with_rows_affected(0));
    let tasks = SqlDatabase::new(Arc::new(dialect.clone())).entity_provider(task());

    let err = tasks.update(&EntityId::from(3), record([("title", "y")])).await.unwrap_err();
    assert!(matches!(err, SqlError::Cardinality { actual: 0, .. }));
    assert_eq!(dialect.mutation_count(), 0);
}

#[tokio::test]
async fn test_update_with_nothing_writable_only_reads() {
    let dialect = DryRunDialect::preset("sqlite").unwrap();
    dialect.push_result(rows(&["id", "title"], vec![vec![Value::from(3), Value::from("c")]]));
    let tasks = SqlDatabase::new(Arc::new(dialect.clone())).entity_provider(task());

    let row = tasks.update(&EntityId::from(3), record([("unknown", "x")])).await.unwrap();
    assert_eq!(row.get("title"), Some(&Value::from("c")));
    assert_eq!(sql_of(&dialect), vec!["select \"id\", \"title\" from \"tasks\" where \"id\" = ?"]);
}

#[tokio::test]
async fn test_delete_by_identity() {
    let dialect = DryRunDialect::preset("postgres").unwrap();
    let tasks = SqlDatabase::new(Arc::new(dialect.clone())).entity_provider(task());

    tasks.delete(&EntityId::from(9)).await.unwrap();
    let statement = dialect.last_statement().unwrap();
    assert_eq!(statement.sql, "delete from \"tasks\" where \"id\" = $1");
    assert_eq!(statement.params, vec![Value::Integer(9)]);
    assert_eq!(dialect.mutation_count(), 1);
}

#[tokio::test]
async fn test_count_statement() {
    let dialect = DryRunDialect::preset("sqlite").unwrap();
    dialect.push_result(rows(&["count"], vec![vec![Value::from(2)]]));
    let tasks = SqlDatabase::new(Arc::new(dialect.clone())).entity_provider(task());

    let count = tasks.count(&Filter::contains("title", "a")).await.unwrap();
    assert_eq!(count, 2);
    assert_eq!(
        dialect.last_statement().unwrap().sql,
        "select count(*) as count from \"tasks\" where lower(\"title\") like lower(?) escape '!'"
    );
}

#[tokio::test]
async fn test_execution_errors_carry_statement_and_arguments() {
    let dialect = DryRunDialect::preset("postgres").unwrap();
    dialect.push_error("duplicate key value violates unique constraint");
    let tasks = SqlDatabase::new(Arc::new(dialect.clone())).entity_provider(task());

    let err = tasks
        .insert(record([("id", Value::from(1)), ("title", Value::from("x"))]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Execution);
    match err {
        SqlError::Execution { message, sql, params } => {
            assert!(message.contains("duplicate key"));
            assert!(sql.starts_with("insert into \"tasks\""));
            assert_eq!(
                params,
                vec![("$1".to_string(), Value::from(1)), ("$2".to_string(), Value::from("x"))]
            );
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(dialect.mutation_count(), 0);
}

#[tokio::test]
async fn test_custom_log_receives_every_statement() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let log = SqlLogConfig::custom(move |entry| sink.lock().unwrap().push(entry.sql.to_string()));

    let dialect = DryRunDialect::preset("sqlite").unwrap();
    let db = SqlDatabase::with_log_config(Arc::new(dialect.clone()), log);
    let tasks = db.entity_provider(task());
    tasks.find(FindOptions::new().limit(1)).await.unwrap();
    tasks.delete(&EntityId::from(1)).await.unwrap();

    assert_eq!(*seen.lock().unwrap(), sql_of(&dialect));
}

#[tokio::test]
async fn test_first_use_runs_once_across_providers() {
    let dialect = DryRunDialect::new();
    let db = SqlDatabase::new(Arc::new(dialect.clone()));
    db.entity_provider(task()).find(FindOptions::new()).await.unwrap();
    db.entity_provider(task()).delete(&EntityId::from(1)).await.unwrap();
    db.entity_provider(line()).find(FindOptions::new()).await.unwrap();
    assert_eq!(dialect.first_used_entities(), vec!["Task".to_string(), "Line".to_string()]);
}
