//! SQL execution capability.
//!
//! [`SqlExecutor`] is the one seam through which the pipeline reads source
//! databases. [`SqliteExecutor`] is the adapter over an sqlx pool. Results
//! are columnar so callers that only need one column never build rows.

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use std::time::Duration;

use crate::error::{PipelineError, Result};
use crate::models::Scalar;

/// One output column of a query.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultColumn {
    pub name: String,
    pub values: Vec<Scalar>,
}

/// Columnar query result. Empty results carry no columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<ResultColumn>,
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.columns.first().map_or(0, |c| c.values.len())
    }

    pub fn column(&self, name: &str) -> Option<&[Scalar]> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }

    /// Values of the first column, consuming the result.
    pub fn into_first_column(self) -> Vec<Scalar> {
        self.columns
            .into_iter()
            .next()
            .map(|c| c.values)
            .unwrap_or_default()
    }
}

#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn execute_query(&self, sql: &str) -> Result<QueryResult>;
}

/// [`SqlExecutor`] over an sqlx SQLite pool.
#[derive(Clone)]
pub struct SqliteExecutor {
    pool: SqlitePool,
}

impl SqliteExecutor {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SqlExecutor for SqliteExecutor {
    async fn execute_query(&self, sql: &str) -> Result<QueryResult> {
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        rows_to_columns(&rows)
    }
}

/// Run `sql` under a hard wall-clock limit.
///
/// The in-flight query future is dropped on expiry; no retry is attempted.
pub async fn execute_with_timeout(
    executor: &dyn SqlExecutor,
    sql: &str,
    timeout: Duration,
) -> Result<QueryResult> {
    match tokio::time::timeout(timeout, executor.execute_query(sql)).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::Timeout {
            operation: "query".to_string(),
            seconds: timeout.as_secs(),
        }),
    }
}

/// A column as reported by `PRAGMA table_info`.
#[derive(Debug, Clone, PartialEq)]
pub struct TableColumn {
    pub name: String,
    pub declared_type: String,
    pub primary_key: bool,
}

/// User tables of the database, `sqlite_sequence` excluded.
pub async fn list_tables(executor: &dyn SqlExecutor) -> Result<Vec<String>> {
    let result = executor
        .execute_query("SELECT name FROM sqlite_master WHERE type='table' ORDER BY rowid")
        .await?;
    Ok(result
        .into_first_column()
        .into_iter()
        .filter_map(|v| v.as_text().map(str::to_string))
        .filter(|name| name != "sqlite_sequence")
        .collect())
}

pub async fn table_columns(executor: &dyn SqlExecutor, table: &str) -> Result<Vec<TableColumn>> {
    let sql = format!("PRAGMA table_info(`{}`)", table.replace('`', "``"));
    let result = executor.execute_query(&sql).await?;

    let (Some(names), Some(types), Some(pks)) = (
        result.column("name"),
        result.column("type"),
        result.column("pk"),
    ) else {
        return Ok(Vec::new());
    };

    Ok(names
        .iter()
        .zip(types)
        .zip(pks)
        .filter_map(|((name, ty), pk)| {
            Some(TableColumn {
                name: name.as_text()?.to_string(),
                declared_type: ty.as_text().unwrap_or_default().to_string(),
                primary_key: matches!(pk, Scalar::Integer(n) if *n > 0),
            })
        })
        .collect())
}

fn rows_to_columns(rows: &[SqliteRow]) -> Result<QueryResult> {
    let Some(first) = rows.first() else {
        return Ok(QueryResult::default());
    };

    let mut columns: Vec<ResultColumn> = first
        .columns()
        .iter()
        .map(|c| ResultColumn {
            name: c.name().to_string(),
            values: Vec::with_capacity(rows.len()),
        })
        .collect();

    for row in rows {
        for (i, column) in columns.iter_mut().enumerate() {
            column.values.push(decode_scalar(row, i)?);
        }
    }

    Ok(QueryResult { columns })
}

/// Decode a cell by its storage class rather than its declared type.
///
/// Text is read as raw bytes so that invalid UTF-8 degrades to replacement
/// characters instead of failing the whole query.
pub fn decode_scalar(row: &SqliteRow, index: usize) -> Result<Scalar> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Scalar::Null);
    }
    let storage = raw.type_info().name().to_string();

    let value = match storage.as_str() {
        "INTEGER" => Scalar::Integer(row.try_get_unchecked::<i64, _>(index)?),
        "REAL" => Scalar::Real(row.try_get_unchecked::<f64, _>(index)?),
        "BLOB" => Scalar::Blob(row.try_get_unchecked::<Vec<u8>, _>(index)?),
        _ => {
            let bytes = row.try_get_unchecked::<Vec<u8>, _>(index)?;
            Scalar::Text(String::from_utf8_lossy(&bytes).into_owned())
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connect_memory;

    struct Stalled;

    #[async_trait]
    impl SqlExecutor for Stalled {
        async fn execute_query(&self, _sql: &str) -> Result<QueryResult> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(QueryResult::default())
        }
    }

    #[tokio::test]
    async fn test_columnar_result_with_mixed_types() {
        let pool = connect_memory().await.unwrap();
        sqlx::query("CREATE TABLE t (a INTEGER, b TEXT, c REAL)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO t VALUES (1, 'x', 1.5), (NULL, 'y', 2.0)")
            .execute(&pool)
            .await
            .unwrap();

        let executor = SqliteExecutor::new(pool);
        let result = executor
            .execute_query("SELECT a, b, c FROM t ORDER BY b")
            .await
            .unwrap();

        assert_eq!(result.row_count(), 2);
        assert_eq!(
            result.column("a").unwrap(),
            &[Scalar::Integer(1), Scalar::Null]
        );
        assert_eq!(result.column("b").unwrap()[1], Scalar::from("y"));
        assert_eq!(result.column("c").unwrap()[0], Scalar::Real(1.5));
    }

    #[tokio::test]
    async fn test_introspection() {
        let pool = connect_memory().await.unwrap();
        sqlx::query("CREATE TABLE people (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT, age)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO people (name) VALUES ('ann')")
            .execute(&pool)
            .await
            .unwrap();
        let executor = SqliteExecutor::new(pool);

        assert_eq!(list_tables(&executor).await.unwrap(), vec!["people"]);

        let columns = table_columns(&executor, "people").await.unwrap();
        assert_eq!(columns.len(), 3);
        assert!(columns[0].primary_key);
        assert_eq!(columns[1].declared_type, "TEXT");
        assert_eq!(columns[2].declared_type, "");
        assert!(table_columns(&executor, "missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bad_sql_is_execution_error() {
        let pool = connect_memory().await.unwrap();
        let executor = SqliteExecutor::new(pool);
        let err = executor
            .execute_query("SELECT * FROM missing")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Execution(_)));
    }

    #[tokio::test]
    async fn test_timeout_surfaces_as_timeout_error() {
        let err = execute_with_timeout(&Stalled, "SELECT 1", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Timeout { .. }));
        assert!(err.retryable());
    }
}
