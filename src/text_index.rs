//! Full-text index over database cell values.
//!
//! [`TextSearchIndex`] is the contract the lexical matcher depends on:
//! build once from `{id, contents}` documents, then answer many queries in
//! one batch call. [`Fts5Index`] implements it with an SQLite FTS5 table
//! (BM25 ranking) stored in one file per database.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::db;

const INDEX_FILE: &str = "index.sqlite";
const INSERT_BATCH: usize = 5000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub id: String,
    pub contents: String,
}

/// One ranked match for a query.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    /// Stored document as JSON: `{"id": .., "contents": ..}`.
    pub raw: String,
    /// Higher is better.
    pub score: f64,
}

/// Query text to its ranked hits. Every input query has an entry.
pub type BatchResults = HashMap<String, Vec<SearchHit>>;

#[async_trait]
pub trait TextSearchIndex: Send + Sync {
    async fn build(&self, documents: &[IndexDocument]) -> Result<()>;

    /// Run every query, up to `threads` at a time, and return once all are
    /// done. A query that fails yields no hits rather than failing the batch.
    async fn batch_search(&self, queries: &[String], k: usize, threads: usize)
        -> Result<BatchResults>;
}

pub struct Fts5Index {
    pool: SqlitePool,
}

impl Fts5Index {
    /// Remove whatever is at `dir` and start an empty index there.
    pub async fn create(dir: &Path) -> Result<Self> {
        if dir.exists() {
            std::fs::remove_dir_all(dir)
                .with_context(|| format!("Failed to clear index folder {}", dir.display()))?;
        }
        std::fs::create_dir_all(dir)?;
        Self::connect(dir).await
    }

    /// Open an index previously written by [`Fts5Index::create`].
    pub async fn open(dir: &Path) -> Result<Self> {
        if !dir.join(INDEX_FILE).is_file() {
            bail!("No content index at {}", dir.display());
        }
        Self::connect(dir).await
    }

    async fn connect(dir: &Path) -> Result<Self> {
        let pool = db::connect_store(&dir.join(INDEX_FILE), 8).await?;

        // FTS5 CREATE is not idempotent natively, so check first
        let exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='contents_fts'",
        )
        .fetch_one(&pool)
        .await?;

        if !exists {
            sqlx::query(
                r#"
                CREATE VIRTUAL TABLE contents_fts USING fts5(
                    id UNINDEXED,
                    contents,
                    raw UNINDEXED
                )
                "#,
            )
            .execute(&pool)
            .await?;
        }

        Ok(Self { pool })
    }

    pub async fn document_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM contents_fts")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl TextSearchIndex for Fts5Index {
    async fn build(&self, documents: &[IndexDocument]) -> Result<()> {
        for batch in documents.chunks(INSERT_BATCH) {
            let mut tx = self.pool.begin().await?;
            for doc in batch {
                let raw = serde_json::to_string(doc)?;
                sqlx::query("INSERT INTO contents_fts (id, contents, raw) VALUES (?, ?, ?)")
                    .bind(&doc.id)
                    .bind(&doc.contents)
                    .bind(raw)
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await?;
        }
        Ok(())
    }

    async fn batch_search(
        &self,
        queries: &[String],
        k: usize,
        threads: usize,
    ) -> Result<BatchResults> {
        let semaphore = Arc::new(Semaphore::new(threads.max(1)));
        let mut tasks = JoinSet::new();
        let mut results: BatchResults = HashMap::with_capacity(queries.len());

        for query in queries {
            if results.contains_key(query) {
                continue;
            }
            results.insert(query.clone(), Vec::new());

            let permit = semaphore.clone().acquire_owned().await?;
            let pool = self.pool.clone();
            let query = query.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let hits = match search_one(&pool, &query, k).await {
                    Ok(hits) => hits,
                    Err(e) => {
                        tracing::warn!(query = %query, "text search failed: {}", e);
                        Vec::new()
                    }
                };
                (query, hits)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (query, hits) = joined?;
            results.insert(query, hits);
        }

        Ok(results)
    }
}

async fn search_one(pool: &SqlitePool, query: &str, k: usize) -> Result<Vec<SearchHit>> {
    let Some(expr) = match_expression(query) else {
        return Ok(Vec::new());
    };

    let rows = sqlx::query(
        r#"
        SELECT id, raw, rank
        FROM contents_fts
        WHERE contents_fts MATCH ?
        ORDER BY rank
        LIMIT ?
        "#,
    )
    .bind(expr)
    .bind(k as i64)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let rank: f64 = row.get("rank");
            SearchHit {
                id: row.get("id"),
                raw: row.get("raw"),
                score: -rank, // negate so higher = better
            }
        })
        .collect())
}

/// Turn free text into an FTS5 expression: every word quoted, OR-ed.
///
/// Returns `None` when the text has no searchable words.
pub fn match_expression(text: &str) -> Option<String> {
    let terms: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t.to_lowercase()))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn doc(id: &str, contents: &str) -> IndexDocument {
        IndexDocument {
            id: id.to_string(),
            contents: contents.to_string(),
        }
    }

    #[test]
    fn test_match_expression() {
        assert_eq!(
            match_expression("New York's \"best\""),
            Some("\"new\" OR \"york\" OR \"s\" OR \"best\"".to_string())
        );
        assert_eq!(match_expression(" -- ? "), None);
    }

    #[tokio::test]
    async fn test_build_and_batch_search() {
        let tmp = TempDir::new().unwrap();
        let index = Fts5Index::create(&tmp.path().join("shop")).await.unwrap();
        index
            .build(&[
                doc("city-**-name-**-0", "New York"),
                doc("city-**-name-**-1", "York"),
                doc("city-**-name-**-2", "Boston"),
            ])
            .await
            .unwrap();
        assert_eq!(index.document_count().await.unwrap(), 3);

        let queries = vec![
            "york".to_string(),
            "chicago".to_string(),
            "york".to_string(),
            "???".to_string(),
        ];
        let results = index.batch_search(&queries, 10, 2).await.unwrap();

        assert_eq!(results.len(), 3);
        let york = &results["york"];
        assert_eq!(york.len(), 2);
        assert!(york.iter().any(|h| h.id == "city-**-name-**-0"));
        assert!(results["chicago"].is_empty());
        assert!(results["???"].is_empty());

        let parsed: IndexDocument = serde_json::from_str(&york[0].raw).unwrap();
        assert_eq!(parsed.id, york[0].id);
    }

    #[tokio::test]
    async fn test_create_clears_previous_index() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("shop");

        let first = Fts5Index::create(&dir).await.unwrap();
        first.build(&[doc("t-**-c-**-0", "alpha")]).await.unwrap();
        first.close().await;

        let second = Fts5Index::create(&dir).await.unwrap();
        assert_eq!(second.document_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_open_missing_index_fails() {
        let tmp = TempDir::new().unwrap();
        assert!(Fts5Index::open(&tmp.path().join("none")).await.is_err());
    }
}
