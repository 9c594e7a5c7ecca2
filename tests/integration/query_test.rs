//! Query execution integration tests.
//!
//! Tests cursor-bounded execution and the direct fallback against a live server.

use pg_runner::config::ConnectionConfig;
use pg_runner::db::{run_query, QueryResult, Value};

use super::get_test_connection;

#[tokio::test]
async fn test_execute_simple_select() {
    let Some(config) = get_test_connection() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let result = run_query(
        "SELECT 1 as num, 'hello' as greeting",
        &config,
        QueryResult::new(),
    )
    .await
    .unwrap();

    assert_eq!(result.columns.len(), 2);
    assert_eq!(result.columns[0].name, "num");
    assert_eq!(result.columns[1].name, "greeting");
    assert_eq!(result.rows, vec![vec![Value::Int(1), Value::from("hello")]]);
    assert!(!result.incomplete);
}

#[tokio::test]
async fn test_cap_marks_incomplete() {
    let Some(mut config) = get_test_connection() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    config.max_rows = 2;

    let result = run_query(
        "select g from generate_series(1, 3) g",
        &config,
        QueryResult::new(),
    )
    .await
    .unwrap();

    assert_eq!(result.rows, vec![vec![Value::Int(1)], vec![Value::Int(2)]]);
    assert!(result.incomplete);
}

#[tokio::test]
async fn test_exact_cap_is_complete() {
    let Some(mut config) = get_test_connection() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    config.max_rows = 2;

    let result = run_query(
        "select g from generate_series(1, 2) g",
        &config,
        QueryResult::new(),
    )
    .await
    .unwrap();

    assert_eq!(result.row_count, 2);
    assert!(!result.incomplete);
}

#[tokio::test]
async fn test_multi_statement_falls_back_uncapped() {
    let Some(mut config) = get_test_connection() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    config.max_rows = 2;

    let result = run_query(
        "select 1 as n; select g from generate_series(2, 4) g",
        &config,
        QueryResult::new(),
    )
    .await
    .unwrap();

    assert_eq!(result.row_count, 4);
    assert!(!result.incomplete);
    assert_eq!(result.rows[3], vec![Value::from("4")]);
}

#[tokio::test]
async fn test_show_runs_through_cursor() {
    let Some(config) = get_test_connection() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let result = run_query("SHOW server_version", &config, QueryResult::new())
        .await
        .unwrap();

    assert_eq!(result.row_count, 1);
    assert_eq!(result.columns[0].name, "server_version");
    assert!(!result.incomplete);
}

/// Runs `sql` with the default cap, for setup and teardown.
async fn run(config: &ConnectionConfig, sql: &str) -> QueryResult {
    run_query(sql, config, QueryResult::new()).await.unwrap()
}

#[tokio::test]
async fn test_insert_returning_is_capped() {
    let Some(mut config) = get_test_connection() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    run(&config, "drop table if exists pg_runner_insert_returning").await;
    run(&config, "create table pg_runner_insert_returning (id int)").await;

    config.max_rows = 2;
    let result = run_query(
        "insert into pg_runner_insert_returning select g from generate_series(1, 5) g returning id",
        &config,
        QueryResult::new(),
    )
    .await
    .unwrap();

    assert_eq!(result.rows, vec![vec![Value::Int(1)], vec![Value::Int(2)]]);
    assert_eq!(result.columns[0].data_type, "int4");
    assert!(result.incomplete);

    // Every row was inserted and committed; only the returned rows were capped.
    let count = run(&config, "select count(*)::int as n from pg_runner_insert_returning").await;
    assert_eq!(count.rows, vec![vec![Value::Int(5)]]);

    run(&config, "drop table pg_runner_insert_returning").await;
}

#[tokio::test]
async fn test_data_modifying_cte_is_capped() {
    let Some(mut config) = get_test_connection() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    run(&config, "drop table if exists pg_runner_cte_delete").await;
    run(
        &config,
        "create table pg_runner_cte_delete as select g as id from generate_series(1, 5) g",
    )
    .await;

    config.max_rows = 2;
    let result = run_query(
        "with d as (delete from pg_runner_cte_delete returning id) select id from d order by id",
        &config,
        QueryResult::new(),
    )
    .await
    .unwrap();

    assert_eq!(result.row_count, 2);
    assert!(result.incomplete);

    run(&config, "drop table pg_runner_cte_delete").await;
}

#[tokio::test]
async fn test_explain_is_capped() {
    let Some(mut config) = get_test_connection() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };
    config.max_rows = 2;

    let result = run_query(
        "explain select * from generate_series(1, 10) a join generate_series(1, 10) b on a = b",
        &config,
        QueryResult::new(),
    )
    .await
    .unwrap();

    assert_eq!(result.columns[0].name, "QUERY PLAN");
    assert_eq!(result.row_count, 2);
    assert!(result.incomplete);
}

#[tokio::test]
async fn test_execute_query_with_syntax_error() {
    let Some(config) = get_test_connection() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let err = run_query("SELEC * FROM users", &config, QueryResult::new())
        .await
        .unwrap_err();

    let error_msg = err.to_string().to_lowercase();
    assert!(
        error_msg.contains("syntax") || error_msg.contains("error"),
        "Expected syntax error, got: {}",
        error_msg
    );
}

#[tokio::test]
async fn test_execute_empty_result_keeps_columns() {
    let Some(config) = get_test_connection() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let result = run_query(
        "select 1 as one where false",
        &config,
        QueryResult::new(),
    )
    .await
    .unwrap();

    assert!(result.is_empty());
    assert_eq!(result.columns.len(), 1);
    assert_eq!(result.columns[0].name, "one");
}
