//! Runs only when SWITCHBOARD_TEST_DATABASE_URL points at a Postgres server.

use std::sync::Arc;

use channel::{Batch, Call, Outcome};
use policy::{Operation, QueryPolicy};
use runtime::{ChartQueue, CommandExecutor, Dispatcher, QueryExecutor, Registry};
use serde_json::json;
use sqlx::postgres::PgPoolOptions;

async fn executor() -> Option<QueryExecutor> {
    let url = std::env::var("SWITCHBOARD_TEST_DATABASE_URL").ok()?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await
        .ok()?;
    Some(QueryExecutor::from_pool(pool, QueryPolicy::default()))
}

#[tokio::test]
async fn select_one_through_dispatcher() {
    let Some(queries) = executor().await else {
        return;
    };
    let dispatcher = Dispatcher::new(Registry::standard(
        Arc::new(queries),
        Arc::new(CommandExecutor::default()),
        Arc::new(ChartQueue::new()),
    ));

    let responses = dispatcher
        .process(Batch::new(vec![
            Call::new("a", "query_database", json!({"query": "SELECT 1", "operation": "select"})),
            Call::new("b", "bogus", json!({})),
        ]))
        .await;

    let a = responses.iter().find(|r| r.id == "a").unwrap();
    assert_eq!(
        a.outcome,
        Outcome::success(json!({"rows": [{"?column?": 1}], "rowCount": 1}))
    );
    let b = responses.iter().find(|r| r.id == "b").unwrap();
    assert_eq!(b.outcome, Outcome::failure("Unknown function: bogus"));
}

#[tokio::test]
async fn writes_report_rows_affected_and_release_connections() {
    let Some(queries) = executor().await else {
        return;
    };

    let table = format!("sb_items_{}", std::process::id());
    sqlx::query(sqlx::AssertSqlSafe(format!("CREATE TABLE {table} (id serial PRIMARY KEY, label text)")))
        .execute(queries.pool())
        .await
        .unwrap();

    // More runs than pooled connections: each run must hand its connection back.
    for label in ["a", "b", "c", "d"] {
        queries
            .run(
                &format!("INSERT INTO {table} (label) VALUES ($1)"),
                Operation::Insert,
                &[label.to_string()],
            )
            .await
            .unwrap();
    }

    let _ = queries
        .run("SELECT * FROM missing_table_xyz", Operation::Select, &[])
        .await
        .unwrap_err();

    let typed = queries
        .run(
            "SELECT 1::int8 AS n, 'x'::text AS t, true AS b, 1.5::numeric AS d, NULL::text AS z",
            Operation::Select,
            &[],
        )
        .await
        .unwrap();
    assert_eq!(
        serde_json::Value::Object(typed.rows[0].clone()),
        json!({"n": 1, "t": "x", "b": true, "d": "1.5", "z": null})
    );

    let wide = queries
        .run(
            "SELECT ARRAY[1, 2]::int2[] AS small, ARRAY[0.5]::float4[] AS reals, \
             ARRAY[1.5]::numeric[] AS decimals, '1 day'::interval AS span, \
             '10.0.0.1'::inet AS host, '10.0.0.0/8'::cidr AS net, \
             point '(1,2)' AS unmapped",
            Operation::Select,
            &[],
        )
        .await
        .unwrap();
    assert_eq!(
        serde_json::Value::Object(wide.rows[0].clone()),
        json!({
            "small": [1, 2],
            "reals": [0.5],
            "decimals": ["1.5"],
            "span": "P0M1DT0S",
            "host": "10.0.0.1",
            "net": "10.0.0.0/8",
            "unmapped": null
        })
    );

    let updated = queries
        .run(
            &format!("UPDATE {table} SET label = 'z' WHERE label <> $1"),
            Operation::Update,
            &["a".to_string()],
        )
        .await
        .unwrap();
    assert_eq!(updated.row_count, 3);
    assert!(updated.rows.is_empty());

    let columns = queries.describe_table("public", &table).await.unwrap();
    assert_eq!(columns.len(), 2);
    assert_eq!(columns[1].column_name, "label");
    assert!(queries.list_tables("public").await.unwrap().contains(&table));
    assert!(queries.ping().await.is_ok());

    sqlx::query(sqlx::AssertSqlSafe(format!("DROP TABLE {table}")))
        .execute(queries.pool())
        .await
        .unwrap();
}
