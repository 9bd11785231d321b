//! Semantic retrieval of database cell values.
//!
//! Each database has its own vector collection (named by `db_id`) holding
//! the distinct short string values of its descriptive text columns, with
//! `{table, column}` metadata. [`CellIndexer`] fills the collections;
//! [`SemanticCellRetriever`] looks up question literals in them.

use anyhow::Result;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

use crate::config::CellsConfig;
use crate::execution::{list_tables, table_columns, SqlExecutor};
use crate::models::{group_hits, Relevance, RetrievalHit, Scalar, ValueMap};
use crate::vector_store::{Metadata, VectorDocument, VectorStore};

/// Substrings that mark a column as an identifier, link or timestamp.
const SKIP_KEYWORDS: &[&str] = &[
    "_id", " id", "url", "email", "web", "time", "date", "address",
];

/// Result of one retrieval: deduplicated hits, plus the literals whose
/// search failed and so contributed nothing.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CellMatches {
    pub hits: Vec<RetrievalHit>,
    pub failed: Vec<String>,
}

impl CellMatches {
    pub fn values(&self) -> ValueMap {
        group_hits(&self.hits)
    }
}

pub struct SemanticCellRetriever {
    store: Arc<dyn VectorStore>,
    threshold: f32,
    k: usize,
}

impl SemanticCellRetriever {
    pub fn new(store: Arc<dyn VectorStore>, config: &CellsConfig) -> Self {
        Self {
            store,
            threshold: config.threshold,
            k: config.k,
        }
    }

    /// One nearest-neighbour search per searchable literal, results
    /// deduplicated on `table|column|content` in first-seen order.
    ///
    /// A failed search is logged and its literal listed in
    /// [`CellMatches::failed`].
    pub async fn retrieve(&self, db_id: &str, literals: &[Value]) -> CellMatches {
        let mut seen = HashSet::new();
        let mut found = CellMatches::default();

        for literal in literals {
            let Some(text) = searchable_literal(literal) else {
                continue;
            };

            let matches = match self.store.search(db_id, text, self.threshold, self.k).await {
                Ok(matches) => matches,
                Err(e) => {
                    tracing::warn!(db_id, literal = text, "cell search failed: {:#}", e);
                    found.failed.push(text.to_string());
                    continue;
                }
            };

            for m in matches {
                let (Some(table), Some(column)) =
                    (metadata_str(&m.metadata, "table"), metadata_str(&m.metadata, "column"))
                else {
                    tracing::warn!(db_id, content = %m.content, "cell match without table/column metadata");
                    continue;
                };
                let key = format!("{}|{}|{}", table, column, m.content);
                if seen.insert(key) {
                    found.hits.push(RetrievalHit {
                        table: table.to_string(),
                        column: column.to_string(),
                        content: m.content,
                        relevance: Relevance::Semantic(m.distance),
                    });
                }
            }
        }

        found
    }
}

/// Only non-empty strings that are not all digits are searched.
fn searchable_literal(literal: &Value) -> Option<&str> {
    let text = literal.as_str()?;
    if text.is_empty() || text.chars().all(|c| c.is_ascii_digit()) {
        None
    } else {
        Some(text)
    }
}

fn metadata_str<'a>(metadata: &'a Metadata, key: &str) -> Option<&'a str> {
    metadata.get(key).and_then(Value::as_str)
}

/// Whether a column's values should be embedded.
pub fn is_indexable_column(name: &str, declared_type: &str, primary_key: bool) -> bool {
    let lower = name.to_lowercase();
    declared_type.to_lowercase().contains("text")
        && !primary_key
        && !SKIP_KEYWORDS.iter().any(|k| lower.contains(k))
        && !lower.ends_with("id")
}

pub struct CellIndexer {
    store: Arc<dyn VectorStore>,
    max_str_len: usize,
    batch_size: usize,
}

impl CellIndexer {
    pub fn new(store: Arc<dyn VectorStore>, config: &CellsConfig) -> Self {
        Self {
            store,
            max_str_len: config.max_str_len,
            batch_size: config.batch_size,
        }
    }

    /// Rebuild the collection of one database. Returns the number of cells
    /// written.
    pub async fn index_database(&self, db_id: &str, executor: &dyn SqlExecutor) -> Result<usize> {
        self.store.recreate_collection(db_id).await?;

        let mut total = 0;
        for table in list_tables(executor).await? {
            let mut documents = Vec::new();

            for column in table_columns(executor, &table).await? {
                if !is_indexable_column(&column.name, &column.declared_type, column.primary_key) {
                    tracing::debug!(table = %table, column = %column.name, "skipping column");
                    continue;
                }

                let sql = format!(
                    "SELECT DISTINCT `{c}` FROM `{t}` WHERE `{c}` IS NOT NULL",
                    c = column.name.replace('`', "``"),
                    t = table.replace('`', "``"),
                );
                let values = executor.execute_query(&sql).await?.into_first_column();

                for value in values {
                    let Scalar::Text(text) = value else {
                        continue;
                    };
                    if text.chars().count() > self.max_str_len {
                        continue;
                    }
                    let mut metadata = Metadata::new();
                    metadata.insert("table".into(), Value::from(table.as_str()));
                    metadata.insert("column".into(), Value::from(column.name.as_str()));
                    documents.push(VectorDocument::new(text, metadata));
                }
            }

            let batches = documents.len().div_ceil(self.batch_size.max(1));
            for (i, batch) in documents.chunks(self.batch_size.max(1)).enumerate() {
                self.store.add_documents(db_id, batch).await?;
                tracing::info!(
                    db_id,
                    table = %table,
                    "batch {}/{} written",
                    i + 1,
                    batches
                );
            }
            total += documents.len();
        }

        tracing::info!(db_id, cells = total, "cell collection rebuilt");
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::VectorMatch;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Answers every search from a fixed list; fails on the literal "boom".
    struct CannedStore {
        matches: Vec<VectorMatch>,
        added: Mutex<Vec<VectorDocument>>,
        searches: Mutex<Vec<String>>,
    }

    impl CannedStore {
        fn new(matches: Vec<VectorMatch>) -> Self {
            Self {
                matches,
                added: Mutex::new(Vec::new()),
                searches: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl VectorStore for CannedStore {
        async fn search(
            &self,
            _collection: &str,
            query: &str,
            threshold: f32,
            k: usize,
        ) -> Result<Vec<VectorMatch>> {
            self.searches.lock().unwrap().push(query.to_string());
            if query == "boom" {
                anyhow::bail!("store unavailable");
            }
            Ok(self
                .matches
                .iter()
                .filter(|m| m.distance < threshold)
                .take(k)
                .cloned()
                .collect())
        }

        async fn add_documents(&self, _collection: &str, documents: &[VectorDocument]) -> Result<()> {
            self.added.lock().unwrap().extend_from_slice(documents);
            Ok(())
        }

        async fn recreate_collection(&self, _collection: &str) -> Result<()> {
            self.added.lock().unwrap().clear();
            Ok(())
        }

        async fn count(&self, _collection: &str) -> Result<i64> {
            Ok(self.added.lock().unwrap().len() as i64)
        }
    }

    fn cell(table: &str, column: &str, content: &str, distance: f32) -> VectorMatch {
        let mut metadata = Metadata::new();
        metadata.insert("table".into(), Value::from(table));
        metadata.insert("column".into(), Value::from(column));
        VectorMatch {
            content: content.to_string(),
            metadata,
            distance,
        }
    }

    #[test]
    fn test_indexable_columns() {
        assert!(is_indexable_column("city", "TEXT", false));
        assert!(is_indexable_column("name", "varchar text", false));
        assert!(!is_indexable_column("city", "INTEGER", false));
        assert!(!is_indexable_column("code", "TEXT", true));
        assert!(!is_indexable_column("customer_id", "TEXT", false));
        assert!(!is_indexable_column("Order ID", "TEXT", false));
        assert!(!is_indexable_column("homepage_url", "TEXT", false));
        assert!(!is_indexable_column("BirthDate", "TEXT", false));
        assert!(!is_indexable_column("paid", "TEXT", false));
    }

    #[tokio::test]
    async fn test_threshold_dedup_and_literal_filter() {
        let store = Arc::new(CannedStore::new(vec![
            cell("city", "name", "Boston", 0.1),
            cell("city", "name", "Austin", 0.79),
            cell("city", "name", "Houston", 0.8),
        ]));
        let retriever = SemanticCellRetriever::new(store.clone(), &CellsConfig::default());

        let literals = vec![
            Value::from("Boston"),
            Value::from("2012"),
            Value::from(3),
            Value::from(""),
            Value::from("boom"),
            Value::from("Bostn"),
        ];
        let found = retriever.retrieve("geo", &literals).await;

        let contents: Vec<&str> = found.hits.iter().map(|h| h.content.as_str()).collect();
        assert_eq!(contents, vec!["Boston", "Austin"]);
        assert_eq!(found.failed, vec!["boom".to_string()]);
        assert_eq!(
            *store.searches.lock().unwrap(),
            vec!["Boston".to_string(), "boom".to_string(), "Bostn".to_string()]
        );

        let again = retriever.retrieve("geo", &literals).await;
        assert_eq!(found, again);
    }

    #[tokio::test]
    async fn test_matches_without_metadata_are_skipped() {
        let mut bare = cell("t", "c", "x", 0.1);
        bare.metadata.clear();
        let store = Arc::new(CannedStore::new(vec![bare, cell("t", "c", "y", 0.2)]));
        let retriever = SemanticCellRetriever::new(store, &CellsConfig::default());

        let found = retriever.retrieve("db", &[Value::from("anything")]).await;
        assert!(found.failed.is_empty());
        assert_eq!(found.values()["t.c"], vec![Scalar::from("y")]);
    }

    #[tokio::test]
    async fn test_index_database_filters_columns_and_values() {
        let pool = crate::db::connect_memory().await.unwrap();
        sqlx::query(
            "CREATE TABLE shop (code TEXT PRIMARY KEY, city TEXT, shop_id TEXT, size INTEGER)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO shop VALUES ('a', 'Oslo', 'x1', 1), ('b', 'Oslo', 'x2', 2), \
             ('c', NULL, 'x3', 3), ('d', 'Bergen-by-the-sea', 'x4', 4)",
        )
        .execute(&pool)
        .await
        .unwrap();
        let executor = crate::execution::SqliteExecutor::new(pool);

        let store = Arc::new(CannedStore::new(Vec::new()));
        let config = CellsConfig {
            max_str_len: 10,
            batch_size: 1,
            ..CellsConfig::default()
        };
        let indexer = CellIndexer::new(store.clone(), &config);
        let written = indexer.index_database("shops", &executor).await.unwrap();

        assert_eq!(written, 1);
        let added = store.added.lock().unwrap();
        assert_eq!(added[0].content, "Oslo");
        assert_eq!(added[0].metadata["table"], "shop");
        assert_eq!(added[0].metadata["column"], "city");
    }
}
