//! Pooled Postgres query execution.
//!
//! Every query passes the [`QueryPolicy`] before a connection is acquired.
//! Connections come from a bounded pool and go back to it on every path,
//! including faults.

use std::time::{Duration, Instant};

use policy::{Decision, Operation, QueryPolicy};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::postgres::types::{Oid, PgInterval};
use sqlx::postgres::{
    PgConnectOptions, PgPool, PgPoolOptions, PgRow, PgSslMode, PgTypeInfo, PgTypeKind,
};
use sqlx::{Column, Decode, Postgres, Row, Type, TypeInfo};
use thiserror::Error;
use tracing::{debug, warn};

use crate::tools::ToolError;

/// Connection and pool settings for the data store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    /// Require TLS (certificates are not verified).
    pub ssl: bool,
    /// Maximum concurrently open connections.
    pub max_connections: u32,
    /// Idle connections are closed after this long.
    pub idle_timeout_ms: u64,
    /// How long a call waits for a free connection.
    pub acquire_timeout_ms: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "postgres".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            ssl: false,
            max_connections: 20,
            idle_timeout_ms: 30_000,
            acquire_timeout_ms: 5_000,
        }
    }
}

impl DatabaseSettings {
    pub fn connect_options(&self) -> PgConnectOptions {
        let options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.database)
            .username(&self.user)
            .ssl_mode(if self.ssl {
                PgSslMode::Require
            } else {
                PgSslMode::Prefer
            });
        if self.password.is_empty() {
            options
        } else {
            options.password(&self.password)
        }
    }

    pub fn pool_options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(self.max_connections.max(1))
            .min_connections(0)
            .idle_timeout(Duration::from_millis(self.idle_timeout_ms))
            .acquire_timeout(Duration::from_millis(self.acquire_timeout_ms))
    }
}

/// Errors from the query backend.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("{0}")]
    Rejected(String),

    #[error("connection pool: {0}")]
    Pool(String),

    #[error("{0}")]
    Database(String),
}

impl QueryError {
    fn from_acquire(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => {
                QueryError::Pool("timed out waiting for a database connection".to_string())
            }
            sqlx::Error::PoolClosed => QueryError::Pool("pool is closed".to_string()),
            other => QueryError::Pool(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for QueryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => QueryError::from_acquire(err),
            sqlx::Error::Database(db) => QueryError::Database(db.message().to_string()),
            other => QueryError::Database(other.to_string()),
        }
    }
}

impl From<QueryError> for ToolError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::Rejected(reason) => ToolError::Rejected(reason),
            other => ToolError::Backend(other.to_string()),
        }
    }
}

/// Rows returned by a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub rows: Vec<Map<String, Value>>,
    pub row_count: u64,
}

/// A column of a table, as reported by the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub column_name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub column_default: Option<String>,
}

/// Validates and runs queries on a shared connection pool.
#[derive(Debug, Clone)]
pub struct QueryExecutor {
    pool: PgPool,
    policy: QueryPolicy,
}

impl QueryExecutor {
    /// Build an executor whose pool connects on first use.
    pub fn new(settings: &DatabaseSettings, policy: QueryPolicy) -> Self {
        let pool = settings
            .pool_options()
            .connect_lazy_with(settings.connect_options());
        Self::from_pool(pool, policy)
    }

    pub fn from_pool(pool: PgPool, policy: QueryPolicy) -> Self {
        Self { pool, policy }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn policy(&self) -> &QueryPolicy {
        &self.policy
    }

    /// Apply the safety policy without touching the pool.
    pub fn validate(&self, query: &str, operation: Operation) -> Result<(), QueryError> {
        match self.policy.check(query, operation) {
            Decision::Allow => Ok(()),
            Decision::Deny { reason } => Err(QueryError::Rejected(reason)),
        }
    }

    /// Run a parameterized query.
    ///
    /// Parameters bind positionally to `$1`, `$2`, ... as text.
    pub async fn run(
        &self,
        query: &str,
        operation: Operation,
        params: &[String],
    ) -> Result<QueryResult, QueryError> {
        self.validate(query, operation)?;

        let started = Instant::now();
        let mut conn = self.pool.acquire().await.map_err(QueryError::from_acquire)?;

        let mut statement = sqlx::query(sqlx::AssertSqlSafe(query));
        for param in params {
            statement = statement.bind(param.as_str());
        }

        let result = if returns_rows(query, operation) {
            statement.fetch_all(&mut *conn).await.map(|rows| {
                let rows: Vec<_> = rows.iter().map(row_to_json).collect();
                QueryResult {
                    row_count: rows.len() as u64,
                    rows,
                }
            })
        } else {
            statement
                .execute(&mut *conn)
                .await
                .map(|done| QueryResult {
                    rows: Vec::new(),
                    row_count: done.rows_affected(),
                })
        };
        drop(conn);

        match result {
            Ok(result) => {
                debug!(
                    %operation,
                    rows = result.row_count,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "query complete"
                );
                Ok(result)
            }
            Err(e) => {
                warn!(%operation, error = %e, "query failed");
                Err(e.into())
            }
        }
    }

    /// Names of the base tables in `schema`.
    pub async fn list_tables(&self, schema: &str) -> Result<Vec<String>, QueryError> {
        let tables = sqlx::query_scalar::<_, String>(
            "SELECT table_name::text FROM information_schema.tables
             WHERE table_schema = $1 AND table_type = 'BASE TABLE'
             ORDER BY table_name",
        )
        .bind(schema)
        .fetch_all(&self.pool)
        .await?;
        Ok(tables)
    }

    /// Columns of `schema.table` in ordinal order. Empty if the table is unknown.
    pub async fn describe_table(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnInfo>, QueryError> {
        let rows = sqlx::query(
            "SELECT column_name::text AS column_name,
                    data_type::text AS data_type,
                    (is_nullable = 'YES') AS is_nullable,
                    column_default::text AS column_default
             FROM information_schema.columns
             WHERE table_schema = $1 AND table_name = $2
             ORDER BY ordinal_position",
        )
        .bind(schema)
        .bind(table)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(ColumnInfo {
                    column_name: row.try_get("column_name")?,
                    data_type: row.try_get("data_type")?,
                    is_nullable: row.try_get("is_nullable")?,
                    column_default: row.try_get("column_default")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(QueryError::from)
    }

    /// Round-trip a trivial query.
    pub async fn ping(&self) -> Result<(), QueryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn returns_rows(query: &str, operation: Operation) -> bool {
    operation.is_read_only() || query.to_lowercase().contains("returning")
}

fn row_to_json(row: &PgRow) -> Map<String, Value> {
    row.columns()
        .iter()
        .map(|column| {
            let value = column_value(row, column.ordinal(), column.type_info());
            (column.name().to_string(), value)
        })
        .collect()
}

/// Decode one column into JSON by its Postgres type.
///
/// Types without a mapping become null; raw wire bytes are never passed on.
fn column_value(row: &PgRow, idx: usize, type_info: &PgTypeInfo) -> Value {
    use sqlx::types::chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
    use sqlx::types::ipnetwork::IpNetwork;
    use sqlx::types::{Decimal, Uuid};

    match type_info.name() {
        "BOOL" => cell::<bool>(row, idx, Value::from),
        "INT2" => cell::<i16>(row, idx, Value::from),
        "INT4" => cell::<i32>(row, idx, Value::from),
        "INT8" => cell::<i64>(row, idx, Value::from),
        "OID" => cell::<Oid>(row, idx, |oid| Value::from(oid.0)),
        "FLOAT4" => cell::<f32>(row, idx, Value::from),
        "FLOAT8" => cell::<f64>(row, idx, Value::from),
        "NUMERIC" => cell::<Decimal>(row, idx, text),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CITEXT" => {
            cell::<String>(row, idx, Value::from)
        }
        "JSON" | "JSONB" => cell::<Value>(row, idx, |v| v),
        "UUID" => cell::<Uuid>(row, idx, text),
        "DATE" => cell::<NaiveDate>(row, idx, text),
        "TIME" => cell::<NaiveTime>(row, idx, text),
        "TIMESTAMP" => cell::<NaiveDateTime>(row, idx, |t| Value::String(format_timestamp(&t))),
        "TIMESTAMPTZ" => cell::<DateTime<Utc>>(row, idx, |t| Value::String(t.to_rfc3339())),
        "INTERVAL" => cell::<PgInterval>(row, idx, |i| Value::String(format_interval(&i))),
        "INET" => cell::<IpNetwork>(row, idx, |net| Value::String(format_inet(&net))),
        "CIDR" => cell::<IpNetwork>(row, idx, text),
        "BYTEA" => cell::<Vec<u8>>(row, idx, |bytes| Value::String(format_bytea(&bytes))),
        "TEXT[]" | "VARCHAR[]" | "BPCHAR[]" | "NAME[]" => {
            cell::<Vec<String>>(row, idx, Value::from)
        }
        "INT2[]" => cell::<Vec<i16>>(row, idx, Value::from),
        "INT4[]" => cell::<Vec<i32>>(row, idx, Value::from),
        "INT8[]" => cell::<Vec<i64>>(row, idx, Value::from),
        "BOOL[]" => cell::<Vec<bool>>(row, idx, Value::from),
        "FLOAT4[]" => cell::<Vec<f32>>(row, idx, Value::from),
        "FLOAT8[]" => cell::<Vec<f64>>(row, idx, Value::from),
        "NUMERIC[]" => cell::<Vec<Decimal>>(row, idx, |ds| {
            texts(ds.iter().map(ToString::to_string).collect())
        }),
        "UUID[]" => cell::<Vec<Uuid>>(row, idx, |us| {
            texts(us.iter().map(ToString::to_string).collect())
        }),
        "DATE[]" => cell::<Vec<NaiveDate>>(row, idx, |ds| {
            texts(ds.iter().map(ToString::to_string).collect())
        }),
        "TIMESTAMPTZ[]" => cell::<Vec<DateTime<Utc>>>(row, idx, |ts| {
            texts(ts.iter().map(DateTime::to_rfc3339).collect())
        }),
        "JSONB[]" => cell::<Vec<Value>>(row, idx, Value::Array),
        "VOID" => Value::Null,
        // Enum values travel as their label, even in binary format.
        _ if matches!(type_info.kind(), PgTypeKind::Enum(_)) => {
            match row.try_get_unchecked::<Option<String>, _>(idx) {
                Ok(label) => label.map(Value::String).unwrap_or(Value::Null),
                Err(e) => {
                    debug!(column = idx, error = %e, "failed to decode enum column");
                    Value::Null
                }
            }
        }
        other => {
            debug!(
                column = idx,
                type_name = other,
                "unsupported column type, returning null"
            );
            Value::Null
        }
    }
}

fn text(value: impl ToString) -> Value {
    Value::String(value.to_string())
}

fn texts(values: Vec<String>) -> Value {
    Value::Array(values.into_iter().map(Value::String).collect())
}

fn format_timestamp(t: &sqlx::types::chrono::NaiveDateTime) -> String {
    t.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
}

/// ISO 8601 duration, e.g. `P1M2DT3.5S`.
fn format_interval(interval: &PgInterval) -> String {
    let seconds = interval.microseconds as f64 / 1_000_000.0;
    format!("P{}M{}DT{}S", interval.months, interval.days, seconds)
}

/// Host addresses print without the `/32` (or `/128`) suffix.
fn format_inet(net: &sqlx::types::ipnetwork::IpNetwork) -> String {
    let host_prefix = if net.is_ipv4() { 32 } else { 128 };
    if net.prefix() == host_prefix {
        net.ip().to_string()
    } else {
        net.to_string()
    }
}

fn format_bytea(bytes: &[u8]) -> String {
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("\\x{hex}")
}

fn cell<'r, T>(row: &'r PgRow, idx: usize, convert: impl FnOnce(T) -> Value) -> Value
where
    T: Decode<'r, Postgres> + Type<Postgres>,
{
    match row.try_get::<Option<T>, _>(idx) {
        Ok(Some(value)) => convert(value),
        Ok(None) => Value::Null,
        Err(e) => {
            debug!(column = idx, error = %e, "failed to decode column");
            Value::Null
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_executor() -> QueryExecutor {
        let settings = DatabaseSettings {
            host: "127.0.0.1".to_string(),
            port: 1,
            acquire_timeout_ms: 500,
            ..DatabaseSettings::default()
        };
        QueryExecutor::new(&settings, QueryPolicy::default())
    }

    #[test]
    fn settings_defaults() {
        let settings = DatabaseSettings::default();
        assert_eq!(settings.port, 5432);
        assert_eq!(settings.max_connections, 20);
        assert_eq!(settings.idle_timeout_ms, 30_000);
    }

    #[test]
    fn returning_clause_yields_rows() {
        assert!(returns_rows("SELECT 1", Operation::Select));
        assert!(returns_rows(
            "INSERT INTO t (a) VALUES ($1) RETURNING id",
            Operation::Insert
        ));
        assert!(!returns_rows("UPDATE t SET a = 1", Operation::Update));
    }

    #[test]
    fn intervals_format_as_iso_durations() {
        let interval = PgInterval {
            months: 1,
            days: 2,
            microseconds: 3_500_000,
        };
        assert_eq!(format_interval(&interval), "P1M2DT3.5S");
    }

    #[test]
    fn inet_hosts_drop_full_prefix() {
        use sqlx::types::ipnetwork::IpNetwork;

        let host: IpNetwork = "10.0.0.1".parse().unwrap();
        let net: IpNetwork = "10.0.0.0/8".parse().unwrap();
        assert_eq!(format_inet(&host), "10.0.0.1");
        assert_eq!(format_inet(&net), "10.0.0.0/8");
    }

    #[tokio::test]
    async fn rejects_drop_before_touching_pool() {
        let executor = unreachable_executor();
        let err = executor
            .run("DROP TABLE x", Operation::Select, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Rejected(_)));
        assert_eq!(executor.pool().size(), 0);
    }

    #[tokio::test]
    async fn rejects_unbounded_delete() {
        let executor = unreachable_executor();
        let err = executor
            .run("DELETE FROM users", Operation::Delete, &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("WHERE"));
    }

    #[tokio::test]
    async fn connection_fault_is_a_backend_error() {
        let executor = unreachable_executor();
        let err = executor
            .run("DELETE FROM users WHERE id = $1", Operation::Delete, &["1".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Pool(_)));
        assert!(matches!(ToolError::from(err), ToolError::Backend(_)));
    }
}
