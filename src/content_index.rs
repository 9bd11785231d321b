//! Bulk construction of the per-database lexical content indexes.
//!
//! Every distinct short, non-numeric string value of every column becomes
//! one [`IndexDocument`] with id `table-**-column-**-<ordinal>`, where the
//! ordinal counts the column's non-numeric string values.

use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;

use crate::dataset::DatasetLayout;
use crate::db;
use crate::error::PipelineError;
use crate::execution::{execute_with_timeout, list_tables, table_columns, SqlExecutor, SqliteExecutor};
use crate::lexical::ID_SEPARATOR;
use crate::models::Scalar;
use crate::text_index::{Fts5Index, IndexDocument, TextSearchIndex};

const MAX_CONTENT_CHARS: usize = 40;

/// Outcome of a bulk per-database build.
#[derive(Debug, Default)]
pub struct IndexReport {
    /// `(db_id, documents written)` per successful database.
    pub built: Vec<(String, usize)>,
    pub failed: Vec<String>,
}

pub struct ContentIndexBuilder {
    timeout: Duration,
}

impl ContentIndexBuilder {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Documents for every table and column of one database.
    ///
    /// A failing column is logged and skipped. A timeout is returned.
    pub async fn extract_documents(
        &self,
        executor: &dyn SqlExecutor,
    ) -> crate::error::Result<Vec<IndexDocument>> {
        let mut documents = Vec::new();

        for table in list_tables(executor).await? {
            for column in table_columns(executor, &table).await? {
                let sql = format!(
                    "SELECT DISTINCT `{c}` FROM `{t}` WHERE `{c}` IS NOT NULL",
                    c = column.name.replace('`', "``"),
                    t = table.replace('`', "``"),
                );
                let values = match execute_with_timeout(executor, &sql, self.timeout).await {
                    Ok(result) => result.into_first_column(),
                    Err(e @ PipelineError::Timeout { .. }) => return Err(e),
                    Err(e) => {
                        tracing::warn!(table = %table, column = %column.name, "skipping column: {}", e);
                        continue;
                    }
                };

                let texts = values.into_iter().filter_map(|v| match v {
                    Scalar::Text(s) if !is_numeric(&s) => Some(s),
                    _ => None,
                });
                for (ordinal, text) in texts.enumerate() {
                    let len = text.chars().count();
                    if len == 0 || len > MAX_CONTENT_CHARS {
                        continue;
                    }
                    documents.push(IndexDocument {
                        id: document_id(&table, &column.name, ordinal),
                        contents: text,
                    });
                }
            }
        }

        Ok(documents)
    }

    /// Rebuild the index at `index_dir` from the database at `db_path`.
    pub async fn build_database(&self, db_path: &Path, index_dir: &Path) -> Result<usize> {
        let pool = db::open_readonly(db_path).await?;
        let executor = SqliteExecutor::new(pool.clone());
        let documents = self.extract_documents(&executor).await;
        pool.close().await;
        let documents =
            documents.with_context(|| format!("Failed to extract {}", db_path.display()))?;

        let index = Fts5Index::create(index_dir).await?;
        index.build(&documents).await?;
        let indexed = index.document_count().await;
        index.close().await;
        Ok(indexed? as usize)
    }

    /// Rebuild the indexes of every database in the dataset, one at a time.
    ///
    /// A failing database is logged and the run continues; a timeout ends
    /// the run.
    pub async fn build_all(&self, layout: &DatasetLayout) -> Result<IndexReport> {
        let mut report = IndexReport::default();

        for db_id in layout.list_database_ids()? {
            let db_path = layout.database_path(&db_id);
            tracing::info!(db_id = %db_id, "building content index");

            match self
                .build_database(&db_path, &layout.content_index_dir(&db_id))
                .await
            {
                Ok(count) => {
                    tracing::info!(db_id = %db_id, documents = count, "content index built");
                    report.built.push((db_id, count));
                }
                Err(e) => {
                    // Retryable errors are left to the caller.
                    if let Some(pe) = e.downcast_ref::<PipelineError>() {
                        if pe.retryable() {
                            tracing::error!(
                                db_id = %db_id,
                                code = pe.code() as i32,
                                "content indexing aborted: {}",
                                pe
                            );
                            return Err(e);
                        }
                    }
                    tracing::error!(db_id = %db_id, "content index failed: {:#}", e);
                    report.failed.push(db_id);
                }
            }
        }

        Ok(report)
    }
}

pub fn document_id(table: &str, column: &str, ordinal: usize) -> String {
    format!("{table}{ID_SEPARATOR}{column}{ID_SEPARATOR}{ordinal}")
}

/// Whether the text parses as a number, surrounding whitespace ignored.
fn is_numeric(text: &str) -> bool {
    text.trim().parse::<f64>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexical::parse_document_id;
    use tempfile::TempDir;

    async fn write_db(path: &Path) {
        let pool = db::connect_store(path, 1).await.unwrap();
        sqlx::query("CREATE TABLE city (id INTEGER PRIMARY KEY, name TEXT, code TEXT)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO city (name, code) VALUES \
             ('Oslo', '47'), ('', 'NO-1'), (NULL, ' 3.5 '), \
             ('a name well beyond the forty character limit', 'NO-2')",
        )
        .execute(&pool)
        .await
        .unwrap();
        pool.close().await;
    }

    #[test]
    fn test_numeric_detection() {
        assert!(is_numeric("12"));
        assert!(is_numeric(" 3.5 "));
        assert!(is_numeric("-1e3"));
        assert!(!is_numeric("NO-1"));
        assert!(!is_numeric(""));
    }

    #[test]
    fn test_document_id_round_trips_through_parser() {
        let id = document_id("city", "name", 3);
        assert_eq!(id, "city-**-name-**-3");
        assert_eq!(parse_document_id(&id), Some(("city", "name")));
    }

    #[tokio::test]
    async fn test_extract_documents_filters_values() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("geo.sqlite");
        write_db(&path).await;

        let pool = db::open_readonly(&path).await.unwrap();
        let builder = ContentIndexBuilder::new(Duration::from_secs(60));
        let docs = builder
            .extract_documents(&SqliteExecutor::new(pool))
            .await
            .unwrap();

        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["city-**-name-**-0", "city-**-code-**-0", "city-**-code-**-1"]
        );
        assert_eq!(docs[0].contents, "Oslo");
        assert_eq!(docs[2].contents, "NO-2");
    }

    #[tokio::test]
    async fn test_build_all_skips_broken_databases() {
        let tmp = TempDir::new().unwrap();
        let layout = DatasetLayout::new(tmp.path(), "dev");

        let good = layout.database_path("geo");
        std::fs::create_dir_all(good.parent().unwrap()).unwrap();
        write_db(&good).await;

        let bad = layout.database_path("broken");
        std::fs::create_dir_all(bad.parent().unwrap()).unwrap();
        std::fs::write(&bad, vec![b'x'; 4096]).unwrap();

        let builder = ContentIndexBuilder::new(Duration::from_secs(60));
        let report = builder.build_all(&layout).await.unwrap();

        assert_eq!(report.built, vec![("geo".to_string(), 3)]);
        assert_eq!(report.failed, vec!["broken".to_string()]);

        let index = Fts5Index::open(&layout.content_index_dir("geo")).await.unwrap();
        assert_eq!(index.document_count().await.unwrap(), 3);
    }
}
