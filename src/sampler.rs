//! Representative literal values pulled straight from a source database.

use std::sync::Arc;

use crate::error::{PipelineError, Result};
use crate::execution::SqlExecutor;
use crate::models::{column_key, DatabaseInfo, Scalar, ValueMap};

/// Samples of every column of one database.
#[derive(Debug, Default)]
pub struct DatabaseSample {
    pub values: ValueMap,
    /// `table.column` entries whose sampling failed.
    pub failures: Vec<String>,
}

pub struct ValueSampler {
    executor: Arc<dyn SqlExecutor>,
    max_value_chars: usize,
}

impl ValueSampler {
    pub fn new(executor: Arc<dyn SqlExecutor>, max_value_chars: usize) -> Self {
        Self {
            executor,
            max_value_chars,
        }
    }

    /// Up to `limit` distinct, non-null, non-empty values in random order.
    pub async fn sample(&self, table: &str, column: &str, limit: usize) -> Result<Vec<Scalar>> {
        let sql = sample_query(table, column, limit);
        let result = self
            .executor
            .execute_query(&sql)
            .await
            .map_err(|e| match e {
                PipelineError::Timeout { .. } => e,
                other => PipelineError::Retrieval(format!(
                    "sampling {}.{}: {}",
                    table, column, other
                )),
            })?;

        Ok(result
            .into_first_column()
            .into_iter()
            .map(|v| truncate_value(v, self.max_value_chars))
            .collect())
    }

    /// Sample every real column. A failing column is logged and recorded,
    /// never fatal.
    pub async fn sample_database(&self, info: &DatabaseInfo, limit: usize) -> DatabaseSample {
        let mut sample = DatabaseSample::default();

        for column in info.real_columns() {
            let Some(table) = info.table_name_of(column) else {
                continue;
            };
            match self.sample(table, &column.name, limit).await {
                Ok(values) => {
                    sample.values.insert(column_key(table, &column.name), values);
                }
                Err(e) => {
                    tracing::warn!(db_id = %info.db_id, table, column = %column.name, "{}", e);
                    sample.failures.push(format!("{}.{}", table, column.name));
                }
            }
        }

        sample
    }
}

fn sample_query(table: &str, column: &str, limit: usize) -> String {
    let t = backtick(table);
    let c = backtick(column);
    format!(
        "SELECT DISTINCT {c} FROM {t} WHERE {c} IS NOT NULL AND {c} != '' ORDER BY RANDOM() LIMIT {limit}"
    )
}

fn backtick(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Cut text longer than `max_chars` characters and mark it with `...`.
pub fn truncate_value(value: Scalar, max_chars: usize) -> Scalar {
    match value {
        Scalar::Text(s) if s.chars().count() > max_chars => {
            let mut cut: String = s.chars().take(max_chars).collect();
            cut.push_str("...");
            Scalar::Text(cut)
        }
        other => other,
    }
}
