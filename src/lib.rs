//! # Schema Linker
//!
//! Schema linking and value retrieval for natural-language-to-SQL.
//!
//! Given a question against an SQLite database, the pipeline produces a
//! compact `CREATE TABLE` rendering of the schema in which every column is
//! annotated with a handful of representative values: values the question
//! mentions (found lexically or semantically) first, sampled values after.
//! The text is meant to be placed in a language-model prompt.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────┐   ┌─────────────┐
//! │   Sampler    │──▶│                  │   │             │
//! ├──────────────┤   │  merged values   │──▶│  Assembler  │──▶ DDL text
//! │ Lexical FTS5 │──▶│  per table.col   │   │             │
//! ├──────────────┤   │                  │   └─────────────┘
//! │ Vector cells │──▶│                  │
//! └──────────────┘   └──────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! slink index contents          # build lexical content indexes
//! slink index cells             # embed cell values
//! slink schema ddl              # db_id -> DDL with sampled values
//! slink schema augment          # per-question value-augmented schemas
//! slink schema question --db shop --question "orders from Oslo"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Metadata, values and retrieval hits |
//! | [`error`] | Typed pipeline errors |
//! | [`identifier`] | SQL identifier quoting |
//! | [`db`] | SQLite connections and the connection cache |
//! | [`execution`] | SQL execution capability |
//! | [`sampler`] | Column value sampling |
//! | [`text_index`] | Full-text index contract and FTS5 adapter |
//! | [`content_index`] | Bulk content index construction |
//! | [`lexical`] | Lexical value matching |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`vector_store`] | Vector store contract and SQLite adapter |
//! | [`cells`] | Semantic cell retrieval and indexing |
//! | [`skeleton`] | Few-shot example retrieval |
//! | [`assembler`] | DDL assembly |
//! | [`light_schema`] | Markdown schema rendering |
//! | [`dataset`] | Dataset layout and JSON files |
//! | [`pipeline`] | Workflows |

pub mod assembler;
pub mod cells;
pub mod config;
pub mod content_index;
pub mod dataset;
pub mod db;
pub mod embedding;
pub mod error;
pub mod execution;
pub mod identifier;
pub mod lexical;
pub mod light_schema;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod sampler;
pub mod skeleton;
pub mod text_index;
pub mod vector_store;
