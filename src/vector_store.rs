//! Nearest-neighbour document store.
//!
//! [`VectorStore`] is what the cell and skeleton retrievers query.
//! [`SqliteVectorStore`] keeps one row per document with its embedding as
//! a BLOB and ranks a collection by brute-force distance in Rust, the same
//! way regardless of which [`EmbeddingProvider`] produced the vectors.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::sync::Arc;

use crate::config::DistanceMetric;
use crate::db;
use crate::embedding::{
    blob_to_vec, cosine_distance, embed_batched, embed_query, squared_l2_distance, vec_to_blob,
    EmbeddingProvider,
};

pub type Metadata = Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct VectorDocument {
    pub id: String,
    pub content: String,
    pub metadata: Metadata,
}

impl VectorDocument {
    /// A document with a fresh random id.
    pub fn new(content: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            metadata,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub content: String,
    pub metadata: Metadata,
    /// Lower is more similar.
    pub distance: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// The `k` nearest documents to `query`, keeping only those with
    /// distance strictly below `threshold`, nearest first.
    async fn search(
        &self,
        collection: &str,
        query: &str,
        threshold: f32,
        k: usize,
    ) -> Result<Vec<VectorMatch>>;

    async fn add_documents(&self, collection: &str, documents: &[VectorDocument]) -> Result<()>;

    /// Drop every document of `collection`.
    async fn recreate_collection(&self, collection: &str) -> Result<()>;

    async fn count(&self, collection: &str) -> Result<i64>;
}

pub struct SqliteVectorStore {
    pool: SqlitePool,
    embedder: Arc<dyn EmbeddingProvider>,
    metric: DistanceMetric,
    batch_size: usize,
}

impl SqliteVectorStore {
    pub async fn open(
        path: &Path,
        embedder: Arc<dyn EmbeddingProvider>,
        metric: DistanceMetric,
        batch_size: usize,
    ) -> Result<Self> {
        let pool = db::connect_store(path, 4).await?;
        Self::with_pool(pool, embedder, metric, batch_size).await
    }

    pub async fn with_pool(
        pool: SqlitePool,
        embedder: Arc<dyn EmbeddingProvider>,
        metric: DistanceMetric,
        batch_size: usize,
    ) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vector_documents (
                id TEXT PRIMARY KEY,
                collection TEXT NOT NULL,
                content TEXT NOT NULL,
                metadata_json TEXT NOT NULL DEFAULT '{}',
                model TEXT NOT NULL,
                dims INTEGER NOT NULL,
                embedding BLOB NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_vector_documents_collection ON vector_documents(collection)",
        )
        .execute(&pool)
        .await?;

        Ok(Self {
            pool,
            embedder,
            metric,
            batch_size,
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self.metric {
            DistanceMetric::L2 => squared_l2_distance(a, b),
            DistanceMetric::Cosine => cosine_distance(a, b),
        }
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn search(
        &self,
        collection: &str,
        query: &str,
        threshold: f32,
        k: usize,
    ) -> Result<Vec<VectorMatch>> {
        let query_vec = embed_query(self.embedder.as_ref(), query).await?;

        let rows = sqlx::query(
            "SELECT content, metadata_json, embedding FROM vector_documents WHERE collection = ?",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        let mut scored: Vec<(f32, &sqlx::sqlite::SqliteRow)> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                (self.distance(&query_vec, &blob_to_vec(&blob)), row)
            })
            .collect();

        scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        let mut matches = Vec::new();
        for (distance, row) in scored {
            if distance >= threshold {
                continue;
            }
            let metadata_json: String = row.get("metadata_json");
            let metadata: Metadata = serde_json::from_str(&metadata_json)?;
            matches.push(VectorMatch {
                content: row.get("content"),
                metadata,
                distance,
            });
        }
        Ok(matches)
    }

    async fn add_documents(&self, collection: &str, documents: &[VectorDocument]) -> Result<()> {
        if documents.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();
        let vectors = embed_batched(self.embedder.as_ref(), &texts, self.batch_size).await?;
        if vectors.len() != documents.len() {
            bail!(
                "Expected {} embeddings, got {}",
                documents.len(),
                vectors.len()
            );
        }

        let mut tx = self.pool.begin().await?;
        for (doc, vector) in documents.iter().zip(vectors.iter()) {
            sqlx::query(
                r#"
                INSERT INTO vector_documents (id, collection, content, metadata_json, model, dims, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    collection = excluded.collection,
                    content = excluded.content,
                    metadata_json = excluded.metadata_json,
                    model = excluded.model,
                    dims = excluded.dims,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&doc.id)
            .bind(collection)
            .bind(&doc.content)
            .bind(serde_json::to_string(&doc.metadata)?)
            .bind(self.embedder.model_name())
            .bind(vector.len() as i64)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn recreate_collection(&self, collection: &str) -> Result<()> {
        sqlx::query("DELETE FROM vector_documents WHERE collection = ?")
            .bind(collection)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count(&self, collection: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM vector_documents WHERE collection = ?")
                .bind(collection)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}
