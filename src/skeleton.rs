//! Few-shot example retrieval by question skeleton.
//!
//! A skeleton is a question with its literal values masked out. Training
//! examples are stored with their skeleton as the embedded content and the
//! original question, evidence and SQL as metadata.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

use crate::config::SkeletonConfig;
use crate::vector_store::{Metadata, VectorDocument, VectorMatch, VectorStore};

/// One training example as found in the skeleton file.
#[derive(Debug, Clone, Deserialize)]
pub struct SkeletonExample {
    pub skeleton: String,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub sql: String,
    #[serde(default)]
    pub evidence: String,
    #[serde(default)]
    pub db: String,
    #[serde(default)]
    pub id: Option<Value>,
}

pub struct SkeletonRetriever {
    store: Arc<dyn VectorStore>,
    collection: String,
    threshold: f32,
    k: usize,
}

impl SkeletonRetriever {
    pub fn new(store: Arc<dyn VectorStore>, config: &SkeletonConfig) -> Self {
        Self {
            store,
            collection: config.collection.clone(),
            threshold: config.threshold,
            k: config.k,
        }
    }

    /// Similar examples rendered as `Question: ..\nEvidence: ..\nSQL: ..`,
    /// nearest first.
    pub async fn retrieve(&self, question_skeleton: &str) -> Result<Vec<String>> {
        let matches = self
            .store
            .search(&self.collection, question_skeleton, self.threshold, self.k)
            .await
            .with_context(|| format!("Skeleton search in '{}' failed", self.collection))?;
        Ok(matches.iter().map(render_example).collect())
    }
}

/// `Question/Evidence/SQL` block of one example. A missing or non-string
/// metadata field renders as the empty string, never as a `None` marker.
pub fn render_example(m: &VectorMatch) -> String {
    let field = |key: &str| {
        m.metadata
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    format!(
        "Question: {}\nEvidence: {}\nSQL: {}",
        field("question"),
        field("evidence"),
        field("sql")
    )
}

pub struct SkeletonIngestor {
    store: Arc<dyn VectorStore>,
    collection: String,
    batch_size: usize,
}

impl SkeletonIngestor {
    pub fn new(store: Arc<dyn VectorStore>, collection: &str, batch_size: usize) -> Self {
        Self {
            store,
            collection: collection.to_string(),
            batch_size,
        }
    }

    pub fn load(path: &Path) -> Result<Vec<SkeletonExample>> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read skeleton file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse skeleton file: {}", path.display()))
    }

    /// Replace the collection with `examples`. Returns the number written.
    pub async fn ingest(&self, examples: &[SkeletonExample]) -> Result<usize> {
        self.store.recreate_collection(&self.collection).await?;

        let documents: Vec<VectorDocument> = examples
            .iter()
            .enumerate()
            .map(|(idx, example)| {
                let mut metadata = Metadata::new();
                metadata.insert("question".into(), Value::from(example.question.as_str()));
                metadata.insert("sql".into(), Value::from(example.sql.as_str()));
                metadata.insert("evidence".into(), Value::from(example.evidence.as_str()));
                metadata.insert("db".into(), Value::from(example.db.as_str()));
                metadata.insert(
                    "id".into(),
                    example.id.clone().unwrap_or_else(|| Value::from(idx)),
                );
                VectorDocument {
                    id: format!("id_{}", idx),
                    content: example.skeleton.clone(),
                    metadata,
                }
            })
            .collect();

        for batch in documents.chunks(self.batch_size.max(1)) {
            self.store.add_documents(&self.collection, batch).await?;
        }

        tracing::info!(
            collection = %self.collection,
            examples = documents.len(),
            "skeleton collection rebuilt"
        );
        Ok(documents.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_example_with_missing_fields() {
        let mut metadata = Metadata::new();
        metadata.insert("question".into(), Value::from("How many _?"));
        metadata.insert("sql".into(), Value::from("SELECT COUNT(*) FROM t"));
        let m = VectorMatch {
            content: "How many _?".into(),
            metadata,
            distance: 0.3,
        };
        assert_eq!(
            render_example(&m),
            "Question: How many _?\nEvidence: \nSQL: SELECT COUNT(*) FROM t"
        );
    }

    #[test]
    fn test_example_defaults() {
        let examples: Vec<SkeletonExample> =
            serde_json::from_str(r#"[{"skeleton": "list _", "question": "list cats"}]"#).unwrap();
        assert_eq!(examples[0].sql, "");
        assert!(examples[0].id.is_none());
    }
}
