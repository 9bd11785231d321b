//! Request-time orchestration and bulk workflows.
//!
//! [`SchemaPipeline`] owns the configuration, the dataset layout and the
//! [`ConnectionCache`] of source databases. Every workflow runs databases
//! one at a time; a database that fails is logged with its id and skipped.
//!
//! Value sources feed the assembler in priority order: semantic cell
//! matches, then lexical matches, then sampled values.

use anyhow::{Context, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::assembler::assemble;
use crate::cells::{CellIndexer, CellMatches, SemanticCellRetriever};
use crate::config::Config;
use crate::content_index::{ContentIndexBuilder, IndexReport};
use crate::dataset::DatasetLayout;
use crate::db::{self, ConnectionCache};
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::execution::{SqlExecutor, SqliteExecutor};
use crate::lexical::LexicalMatcher;
use crate::light_schema::{render_light_schema, ColumnMeanings};
use crate::models::{DatabaseInfo, QuestionRecord, ValueMap};
use crate::sampler::{DatabaseSample, ValueSampler};
use crate::skeleton::{SkeletonIngestor, SkeletonRetriever};
use crate::text_index::Fts5Index;
use crate::vector_store::{SqliteVectorStore, VectorStore};

/// Whether every value source contributed to an assembled schema.
#[derive(Debug, Clone, PartialEq)]
pub enum Coverage {
    Full,
    /// Assembled without some values; one reason per missing source.
    Reduced(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct AssembledSchema {
    pub db_id: String,
    pub ddl: String,
    pub coverage: Coverage,
}

#[derive(Debug, Default)]
pub struct AugmentReport {
    pub augmented: usize,
    pub reduced: usize,
    /// Positions in the input of questions left without a schema.
    pub failed: Vec<usize>,
}

pub struct SchemaPipeline {
    config: Config,
    layout: DatasetLayout,
    connections: ConnectionCache,
    lexical: LexicalMatcher,
}

impl SchemaPipeline {
    pub fn new(config: Config) -> Self {
        let layout = DatasetLayout::from_config(&config);
        let connections = ConnectionCache::new(config.db.cache_capacity, config.db.in_memory);
        let lexical = LexicalMatcher::new(&config.lexical);
        Self {
            config,
            layout,
            connections,
            lexical,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn layout(&self) -> &DatasetLayout {
        &self.layout
    }

    pub fn connections(&self) -> &ConnectionCache {
        &self.connections
    }

    pub fn load_metadata(&self) -> Result<Vec<DatabaseInfo>> {
        crate::dataset::load_metadata(&self.layout.tables_path())
    }

    pub fn load_questions(&self) -> Result<Vec<QuestionRecord>> {
        crate::dataset::load_questions(&self.layout.questions_path())
    }

    /// Column meanings from the configured file, or none.
    pub fn load_column_meanings(&self) -> Result<ColumnMeanings> {
        match &self.config.dataset.column_meaning_path {
            Some(path) => ColumnMeanings::load(path),
            None => Ok(ColumnMeanings::default()),
        }
    }

    async fn executor(&self, db_id: &str) -> Result<Arc<dyn SqlExecutor>> {
        let pool = self
            .connections
            .get_or_load(&self.layout.database_path(db_id))
            .await?;
        Ok(Arc::new(SqliteExecutor::new(pool)))
    }

    /// Sampled values of every column of one database.
    pub async fn sample_database(&self, info: &DatabaseInfo) -> Result<DatabaseSample> {
        let executor = self.executor(&info.db_id).await?;
        let sampler = ValueSampler::new(executor, self.config.sampling.max_value_chars);
        Ok(sampler
            .sample_database(info, self.config.sampling.limit)
            .await)
    }

    /// `db_id -> DDL` with sampled values only.
    pub async fn ddl_schemas(&self, infos: &[DatabaseInfo]) -> BTreeMap<String, String> {
        let mut schemas = BTreeMap::new();

        for info in infos {
            let result: Result<String> = async {
                let sample = self.sample_database(info).await?;
                assemble(info, &[&sample.values]).map_err(anyhow::Error::from)
            }
            .await;

            match result {
                Ok(ddl) => {
                    schemas.insert(info.db_id.clone(), ddl);
                }
                Err(e) => tracing::error!(db_id = %info.db_id, "schema assembly failed: {:#}", e),
            }
        }

        tracing::info!(databases = schemas.len(), "ddl schemas assembled");
        schemas
    }

    /// `db_id -> light markdown schema`.
    pub async fn light_schemas(
        &self,
        infos: &[DatabaseInfo],
        meanings: &ColumnMeanings,
    ) -> BTreeMap<String, String> {
        let mut schemas = BTreeMap::new();

        for info in infos {
            match self.sample_database(info).await {
                Ok(sample) => {
                    schemas.insert(
                        info.db_id.clone(),
                        render_light_schema(info, &sample.values, meanings),
                    );
                }
                Err(e) => tracing::error!(db_id = %info.db_id, "light schema failed: {:#}", e),
            }
        }

        schemas
    }

    /// Fill `schema` on every question with a value-augmented DDL.
    ///
    /// Questions are processed in slices of `lexical.batch_size`; within a
    /// slice every database gets a single lexical batch search covering
    /// all of its questions.
    pub async fn augment_questions(
        &self,
        infos: &[DatabaseInfo],
        questions: &mut [QuestionRecord],
        cells: Option<&SemanticCellRetriever>,
    ) -> AugmentReport {
        let by_id: HashMap<&str, &DatabaseInfo> =
            infos.iter().map(|i| (i.db_id.as_str(), i)).collect();
        let mut report = AugmentReport::default();

        let used: HashSet<&str> = questions.iter().map(|q| q.db_id.as_str()).collect();
        let mut samples: HashMap<String, DatabaseSample> = HashMap::new();
        for db_id in used {
            let Some(info) = by_id.get(db_id) else {
                continue;
            };
            match self.sample_database(info).await {
                Ok(sample) => {
                    samples.insert(db_id.to_string(), sample);
                }
                Err(e) => tracing::warn!(db_id, "sampling unavailable: {:#}", e),
            }
        }

        let batch_size = self.config.lexical.batch_size.max(1);
        let batches = questions.len().div_ceil(batch_size);
        for (batch_index, batch) in questions.chunks_mut(batch_size).enumerate() {
            tracing::info!("augmenting batch {}/{}", batch_index + 1, batches);
            let offset = batch_index * batch_size;

            let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
            for (i, question) in batch.iter().enumerate() {
                groups.entry(question.db_id.clone()).or_default().push(i);
            }

            for (db_id, members) in groups {
                let Some(info) = by_id.get(db_id.as_str()) else {
                    tracing::error!(db_id = %db_id, "no metadata for database");
                    report.failed.extend(members.iter().map(|i| offset + i));
                    continue;
                };

                let texts: Vec<String> = members.iter().map(|&i| batch[i].full_text()).collect();
                let (query_hits, lexical_gap) = match self.search_lexical(&db_id, &texts).await {
                    Ok(hits) => (hits, false),
                    Err(e) => {
                        tracing::warn!(db_id = %db_id, "lexical retrieval unavailable: {:#}", e);
                        (HashMap::new(), true)
                    }
                };

                let empty = DatabaseSample::default();
                let sample = samples.get(&db_id).unwrap_or(&empty);
                let degraded = lexical_gap
                    || !samples.contains_key(&db_id)
                    || !sample.failures.is_empty();

                for (&i, text) in members.iter().zip(&texts) {
                    let question = &mut batch[i];
                    let lexical = self.lexical.relevant_values(&query_hits, text);
                    let cell_matches = match cells {
                        Some(retriever) => {
                            retriever.retrieve(&db_id, &question.database_literals).await
                        }
                        None => CellMatches::default(),
                    };
                    let semantic = cell_matches.values();

                    match assemble(info, &[&semantic, &lexical, &sample.values]) {
                        Ok(ddl) => {
                            question.schema = Some(ddl);
                            report.augmented += 1;
                            if degraded || !cell_matches.failed.is_empty() {
                                report.reduced += 1;
                            }
                        }
                        Err(e) => {
                            tracing::error!(
                                db_id = %db_id,
                                code = e.code() as i32,
                                fatal = e.is_fatal(),
                                "schema assembly failed: {}",
                                e
                            );
                            report.failed.push(offset + i);
                        }
                    }
                }
            }
        }

        tracing::info!(
            augmented = report.augmented,
            reduced = report.reduced,
            failed = report.failed.len(),
            "questions augmented"
        );
        report
    }

    async fn search_lexical(
        &self,
        db_id: &str,
        texts: &[String],
    ) -> Result<crate::lexical::QueryHits> {
        let index = Fts5Index::open(&self.layout.content_index_dir(db_id)).await?;
        let hits = self.lexical.search_database(&index, texts).await;
        index.close().await;
        hits
    }

    /// Assemble the schema for one interactive question.
    ///
    /// Value sources that fail are reported through [`Coverage::Reduced`];
    /// only an assembly failure is an error.
    pub async fn assemble_for_question(
        &self,
        info: &DatabaseInfo,
        question_text: &str,
        literals: &[serde_json::Value],
        cells: Option<&SemanticCellRetriever>,
    ) -> Result<AssembledSchema> {
        let mut reasons = Vec::new();

        let sampled = match self.sample_database(info).await {
            Ok(sample) => {
                reasons.extend(
                    sample
                        .failures
                        .iter()
                        .map(|c| format!("sampling failed for {}", c)),
                );
                sample.values
            }
            Err(e) => {
                tracing::warn!(db_id = %info.db_id, "sampling unavailable: {:#}", e);
                reasons.push(format!("sampling unavailable: {}", e));
                ValueMap::new()
            }
        };

        let lexical = match self
            .search_lexical(&info.db_id, &[question_text.to_string()])
            .await
        {
            Ok(hits) => self.lexical.relevant_values(&hits, question_text),
            Err(e) => {
                tracing::warn!(db_id = %info.db_id, "lexical retrieval unavailable: {:#}", e);
                reasons.push(format!("lexical retrieval unavailable: {}", e));
                ValueMap::new()
            }
        };

        let semantic = match cells {
            Some(retriever) => {
                let found = retriever.retrieve(&info.db_id, literals).await;
                reasons.extend(
                    found
                        .failed
                        .iter()
                        .map(|l| format!("semantic retrieval failed for '{}'", l)),
                );
                found.values()
            }
            None => ValueMap::new(),
        };

        let ddl = assemble(info, &[&semantic, &lexical, &sampled])
            .with_context(|| format!("Failed to assemble schema for '{}'", info.db_id))?;

        let coverage = if reasons.is_empty() {
            Coverage::Full
        } else {
            Coverage::Reduced(reasons)
        };
        Ok(AssembledSchema {
            db_id: info.db_id.clone(),
            ddl,
            coverage,
        })
    }

    /// Rebuild the lexical content index of every database.
    pub async fn index_contents(&self) -> Result<IndexReport> {
        let builder = ContentIndexBuilder::new(Duration::from_secs(
            self.config.index.extraction_timeout_secs,
        ));
        builder.build_all(&self.layout).await
    }

    /// Rebuild the cell collection of every database.
    pub async fn index_cells(&self, store: Arc<dyn VectorStore>) -> Result<IndexReport> {
        let indexer = CellIndexer::new(store, &self.config.cells);
        let mut report = IndexReport::default();

        for db_id in self.layout.list_database_ids()? {
            let result: Result<usize> = async {
                let pool = db::open_readonly(&self.layout.database_path(&db_id)).await?;
                let executor = SqliteExecutor::new(pool.clone());
                let written = indexer.index_database(&db_id, &executor).await;
                pool.close().await;
                written
            }
            .await;

            match result {
                Ok(count) => report.built.push((db_id, count)),
                Err(e) => {
                    tracing::error!(db_id = %db_id, "cell indexing failed: {:#}", e);
                    report.failed.push(db_id);
                }
            }
        }

        Ok(report)
    }

    /// Replace the skeleton collection with the examples in `path`.
    pub async fn index_skeletons(&self, store: Arc<dyn VectorStore>, path: &Path) -> Result<usize> {
        let examples = SkeletonIngestor::load(path)?;
        let ingestor = SkeletonIngestor::new(
            store,
            &self.config.skeleton.collection,
            self.config.skeleton.batch_size,
        );
        ingestor.ingest(&examples).await
    }

    pub fn cell_retriever(&self, store: Arc<dyn VectorStore>) -> SemanticCellRetriever {
        SemanticCellRetriever::new(store, &self.config.cells)
    }

    pub fn skeleton_retriever(&self, store: Arc<dyn VectorStore>) -> SkeletonRetriever {
        SkeletonRetriever::new(store, &self.config.skeleton)
    }
}

/// Open the configured vector store with the configured embedding provider.
pub async fn open_vector_store(config: &Config) -> Result<Arc<SqliteVectorStore>> {
    let provider: Arc<dyn EmbeddingProvider> = Arc::from(create_provider(&config.embedding)?);
    let store = SqliteVectorStore::open(
        &config.index.vector_path,
        provider,
        config.index.distance,
        config.embedding.batch_size,
    )
    .await?;
    Ok(Arc::new(store))
}

pub fn find_database<'a>(infos: &'a [DatabaseInfo], db_id: &str) -> Option<&'a DatabaseInfo> {
    infos.iter().find(|i| i.db_id == db_id)
}
