//! # Schema Linker CLI (`slink`)
//!
//! The `slink` binary builds the retrieval indexes and produces
//! value-augmented schemas for a text-to-SQL dataset.
//!
//! ## Usage
//!
//! ```bash
//! slink --config ./config/slink.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `slink index contents` | Build the lexical content index of every database |
//! | `slink index cells` | Embed descriptive cell values into the vector store |
//! | `slink index skeletons <file>` | Load training question skeletons |
//! | `slink schema ddl` | Write `db_id -> DDL` with sampled values |
//! | `slink schema augment` | Write the questions with a per-question `schema` |
//! | `slink schema light` | Write `db_id -> markdown schema` |
//! | `slink schema question` | Assemble the schema for one question |
//! | `slink retrieve cells` | Show cell values matching some literals |
//! | `slink retrieve skeletons` | Show examples similar to a skeleton |

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

use schema_linker::config::{self, Config};
use schema_linker::dataset::write_json;
use schema_linker::logging::init_logging;
use schema_linker::models::question_text;
use schema_linker::pipeline::{find_database, open_vector_store, Coverage, SchemaPipeline};
use schema_linker::vector_store::VectorStore;

/// Schema linking and value retrieval for text-to-SQL.
///
/// All commands read a TOML configuration file given with `--config`.
#[derive(Parser)]
#[command(
    name = "slink",
    about = "Schema linking and value retrieval for text-to-SQL",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/slink.toml")]
    config: PathBuf,

    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build retrieval indexes.
    Index {
        #[command(subcommand)]
        target: IndexTarget,
    },

    /// Produce schemas.
    Schema {
        #[command(subcommand)]
        action: SchemaAction,
    },

    /// Inspect retrieval results.
    Retrieve {
        #[command(subcommand)]
        target: RetrieveTarget,
    },
}

#[derive(Subcommand)]
enum IndexTarget {
    /// Rebuild the FTS5 content index of every database.
    Contents,
    /// Rebuild the cell collections of every database.
    ///
    /// Requires an embedding provider.
    Cells,
    /// Replace the skeleton collection with the examples in a JSON file.
    Skeletons {
        /// JSON array of `{skeleton, question, sql, evidence, db, id}`.
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum SchemaAction {
    /// `db_id -> DDL` for every database, sampled values only.
    Ddl {
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Every question with an added value-augmented `schema`.
    Augment {
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// `db_id -> markdown schema` for every database.
    Light {
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Assemble and print the schema for one question.
    Question {
        #[arg(long)]
        db: String,
        #[arg(long)]
        question: String,
        #[arg(long, default_value = "")]
        evidence: String,
        /// Literal mentioned by the question; repeatable.
        #[arg(long = "literal")]
        literals: Vec<String>,
    },
}

#[derive(Subcommand)]
enum RetrieveTarget {
    /// Cell values of one database similar to the given literals.
    Cells {
        #[arg(long)]
        db: String,
        #[arg(required = true)]
        literals: Vec<String>,
    },
    /// Training examples similar to a question skeleton.
    Skeletons { skeleton: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Index { target } => run_index(cfg, target).await,
        Commands::Schema { action } => run_schema(cfg, action).await,
        Commands::Retrieve { target } => run_retrieve(cfg, target).await,
    }
}

async fn embedding_store(cfg: &Config) -> Result<Arc<dyn VectorStore>> {
    if !cfg.embedding.is_enabled() {
        bail!("This command needs an embedding provider; set [embedding] provider in the config");
    }
    let store: Arc<dyn VectorStore> = open_vector_store(cfg).await?;
    Ok(store)
}

/// The vector store when embeddings are configured, or none.
async fn optional_store(cfg: &Config) -> Result<Option<Arc<dyn VectorStore>>> {
    if cfg.embedding.is_enabled() {
        Ok(Some(embedding_store(cfg).await?))
    } else {
        tracing::info!("embedding provider disabled, semantic cell retrieval skipped");
        Ok(None)
    }
}

async fn run_index(cfg: Config, target: IndexTarget) -> Result<()> {
    let pipeline = SchemaPipeline::new(cfg);

    match target {
        IndexTarget::Contents => {
            let report = pipeline.index_contents().await?;
            println!(
                "Content indexes built: {} databases, {} failed.",
                report.built.len(),
                report.failed.len()
            );
            for db_id in &report.failed {
                println!("  failed: {}", db_id);
            }
        }
        IndexTarget::Cells => {
            let store = embedding_store(pipeline.config()).await?;
            let report = pipeline.index_cells(store).await?;
            let cells: usize = report.built.iter().map(|(_, n)| n).sum();
            println!(
                "Cell collections built: {} databases, {} cells, {} failed.",
                report.built.len(),
                cells,
                report.failed.len()
            );
            for db_id in &report.failed {
                println!("  failed: {}", db_id);
            }
        }
        IndexTarget::Skeletons { file } => {
            let store = embedding_store(pipeline.config()).await?;
            let count = pipeline.index_skeletons(store, &file).await?;
            println!(
                "Loaded {} examples into '{}'.",
                count,
                pipeline.config().skeleton.collection
            );
        }
    }

    Ok(())
}

async fn run_schema(cfg: Config, action: SchemaAction) -> Result<()> {
    let store = match &action {
        SchemaAction::Augment { .. } | SchemaAction::Question { .. } => optional_store(&cfg).await?,
        _ => None,
    };
    let pipeline = SchemaPipeline::new(cfg);
    let cells = store.map(|s| pipeline.cell_retriever(s));
    let infos = pipeline.load_metadata()?;

    match action {
        SchemaAction::Ddl { output } => {
            let schemas = pipeline.ddl_schemas(&infos).await;
            let path = output.unwrap_or_else(|| pipeline.layout().output_path("ddl_schema"));
            write_json(&path, &schemas)?;
            println!("Wrote {} schemas to {}", schemas.len(), path.display());
        }
        SchemaAction::Augment { output } => {
            let mut questions = pipeline.load_questions()?;
            let report = pipeline
                .augment_questions(&infos, &mut questions, cells.as_ref())
                .await;
            let path = output.unwrap_or_else(|| pipeline.layout().output_path("with_schema"));
            write_json(&path, &questions)?;
            println!(
                "Wrote {} questions to {} ({} reduced, {} without schema)",
                questions.len(),
                path.display(),
                report.reduced,
                report.failed.len()
            );
        }
        SchemaAction::Light { output } => {
            let meanings = pipeline.load_column_meanings()?;
            let schemas = pipeline.light_schemas(&infos, &meanings).await;
            let path = output.unwrap_or_else(|| pipeline.layout().output_path("light_schema"));
            write_json(&path, &schemas)?;
            println!("Wrote {} schemas to {}", schemas.len(), path.display());
        }
        SchemaAction::Question {
            db,
            question,
            evidence,
            literals,
        } => {
            let Some(info) = find_database(&infos, &db) else {
                bail!("Unknown database: {}", db);
            };
            let literals: Vec<Value> = literals.into_iter().map(Value::from).collect();
            let schema = pipeline
                .assemble_for_question(
                    info,
                    &question_text(&evidence, &question),
                    &literals,
                    cells.as_ref(),
                )
                .await?;

            println!("{}", schema.ddl);
            if let Coverage::Reduced(reasons) = &schema.coverage {
                println!("\n-- coverage reduced: {}", reasons.join("; "));
            }
        }
    }

    Ok(())
}

async fn run_retrieve(cfg: Config, target: RetrieveTarget) -> Result<()> {
    let store = embedding_store(&cfg).await?;
    let pipeline = SchemaPipeline::new(cfg);

    match target {
        RetrieveTarget::Cells { db, literals } => {
            let literals: Vec<Value> = literals.into_iter().map(Value::from).collect();
            let found = pipeline.cell_retriever(store).retrieve(&db, &literals).await;
            if found.hits.is_empty() {
                println!("No matching cells.");
            }
            for hit in &found.hits {
                println!("{}\t{}", hit.key(), hit.content);
            }
            if !found.failed.is_empty() {
                bail!("Cell search failed for: {}", found.failed.join(", "));
            }
        }
        RetrieveTarget::Skeletons { skeleton } => {
            let examples = pipeline
                .skeleton_retriever(store)
                .retrieve(&skeleton)
                .await?;
            if examples.is_empty() {
                println!("No similar examples.");
            } else {
                println!("{}", examples.join("\n\n"));
            }
        }
    }

    Ok(())
}
