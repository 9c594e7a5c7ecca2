//! Catalog query integration tests.

use pg_runner::db::{run_query, QueryResult, Schema, SCHEMA_SQL};

use super::get_test_connection;

#[tokio::test]
async fn test_schema_query_lists_user_tables() {
    let Some(config) = get_test_connection() else {
        eprintln!("Skipping test: DATABASE_URL not set");
        return;
    };

    let result = run_query(SCHEMA_SQL, &config, QueryResult::new())
        .await
        .unwrap();

    let names: Vec<&str> = result.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(
        names,
        ["table_schema", "table_name", "column_name", "data_type"]
    );

    let schema = Schema::from_result(&result);
    for namespace in &schema.namespaces {
        assert!(
            !["pg_catalog", "pg_toast", "information_schema"].contains(&namespace.name.as_str()),
            "system schema {} should be excluded",
            namespace.name
        );
        for table in &namespace.tables {
            for column in &table.columns {
                assert!(!column.data_type.starts_with('_'));
            }
        }
    }
}
