//! Row-cap and fallback behaviour of the query runner.
//!
//! Exercised against a scripted session so no server is needed.

use pg_runner::db::{MockSession, QueryResult, QueryRunner, SessionEvent, Value};
use pg_runner::error::RunnerError;
use pretty_assertions::assert_eq;

fn server_rows(count: usize) -> Vec<Vec<Value>> {
    (0..count).map(|i| vec![Value::Int(i as i64)]).collect()
}

#[tokio::test]
async fn test_row_cap_boundaries() {
    let cap = 5;
    for available in [0, 1, cap - 1, cap, cap + 1, cap * 3] {
        let result = QueryRunner::new(cap)
            .run(
                MockSession::with_rows(server_rows(available)),
                "select n",
                QueryResult::new(),
            )
            .await
            .unwrap();

        let expected = available.min(cap);
        assert_eq!(result.rows, server_rows(expected), "available={available}");
        assert_eq!(result.row_count, expected);
        assert_eq!(result.incomplete, available > cap, "available={available}");
    }
}

#[tokio::test]
async fn test_probe_row_never_surfaces() {
    let result = QueryRunner::new(2)
        .run(
            MockSession::with_rows(vec![
                vec![Value::from("A")],
                vec![Value::from("B")],
                vec![Value::from("C")],
            ]),
            "select letter",
            QueryResult::new(),
        )
        .await
        .unwrap();

    assert_eq!(result.rows, vec![vec![Value::from("A")], vec![Value::from("B")]]);
    assert!(result.incomplete);
    assert!(!result.rows.contains(&vec![Value::from("C")]));
}

#[tokio::test]
async fn test_fallback_ignores_cap() {
    for cap in [0, 1, 2, 100] {
        let session = MockSession::with_rows(server_rows(4)).failing_cursor();
        let result = QueryRunner::new(cap)
            .run(session, "select 1; select 2", QueryResult::new())
            .await
            .unwrap();

        assert_eq!(result.row_count, 4, "cap={cap}");
        assert!(!result.incomplete, "cap={cap}");
    }
}

#[tokio::test]
async fn test_connection_released_on_every_path() {
    let cases = [
        MockSession::with_rows(server_rows(3)),
        MockSession::with_rows(server_rows(3)).failing_close_cursor(),
        MockSession::with_rows(server_rows(3)).failing_cursor(),
        MockSession::with_rows(server_rows(3))
            .failing_cursor()
            .failing_direct(),
    ];

    for session in cases {
        let events = session.events();
        let _ = QueryRunner::new(1)
            .run(session, "select n", QueryResult::new())
            .await;

        let recorded = events.snapshot();
        assert_eq!(recorded.last(), Some(&SessionEvent::Close), "{recorded:?}");
        assert_eq!(
            recorded.iter().filter(|e| **e == SessionEvent::Close).count(),
            1
        );
    }
}

#[tokio::test]
async fn test_fallback_failure_is_query_error() {
    let session = MockSession::with_rows(server_rows(1))
        .failing_cursor()
        .failing_direct();

    let err = QueryRunner::new(10)
        .run(session, "selec 1", QueryResult::new())
        .await
        .unwrap_err();

    assert!(matches!(err, RunnerError::Query(_)));
    assert_eq!(err.category(), "Query Error");
}
