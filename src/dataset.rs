//! Dataset layout and JSON files.
//!
//! A dataset folder for evaluation type `<type>` looks like:
//!
//! ```text
//! <folder>/<type>_tables.json                     metadata document
//! <folder>/<type>.json                            questions
//! <folder>/<type>_databases/<db>/<db>.sqlite      source databases
//! <folder>/db_contents_index/<db>/                lexical content indexes
//! ```

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::Config;
use crate::models::{DatabaseInfo, QuestionRecord, RawDatabaseInfo};

#[derive(Debug, Clone)]
pub struct DatasetLayout {
    folder: PathBuf,
    evaluation_type: String,
    index_root: PathBuf,
}

impl DatasetLayout {
    pub fn new(folder: impl Into<PathBuf>, evaluation_type: &str) -> Self {
        let folder = folder.into();
        let index_root = folder.join("db_contents_index");
        Self {
            folder,
            evaluation_type: evaluation_type.to_string(),
            index_root,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut layout = Self::new(&config.dataset.folder, &config.dataset.evaluation_type);
        if let Some(root) = &config.index.root {
            layout.index_root = root.clone();
        }
        layout
    }

    pub fn evaluation_type(&self) -> &str {
        &self.evaluation_type
    }

    pub fn tables_path(&self) -> PathBuf {
        self.folder
            .join(format!("{}_tables.json", self.evaluation_type))
    }

    pub fn questions_path(&self) -> PathBuf {
        self.folder.join(format!("{}.json", self.evaluation_type))
    }

    pub fn databases_dir(&self) -> PathBuf {
        self.folder
            .join(format!("{}_databases", self.evaluation_type))
    }

    pub fn database_path(&self, db_id: &str) -> PathBuf {
        self.databases_dir()
            .join(db_id)
            .join(format!("{}.sqlite", db_id))
    }

    pub fn index_root(&self) -> &Path {
        &self.index_root
    }

    pub fn content_index_dir(&self, db_id: &str) -> PathBuf {
        self.index_root.join(db_id)
    }

    /// Default location of a generated artifact, e.g. `dev_ddl_schema.json`.
    pub fn output_path(&self, artifact: &str) -> PathBuf {
        self.folder
            .join(format!("{}_{}.json", self.evaluation_type, artifact))
    }

    /// Ids of every `<db>/<db>.sqlite` under the databases folder, sorted.
    pub fn list_database_ids(&self) -> Result<Vec<String>> {
        let dir = self.databases_dir();
        let mut ids = Vec::new();

        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
            let entry =
                entry.with_context(|| format!("Failed to list databases in {}", dir.display()))?;
            if !entry.file_type().is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str() else {
                continue;
            };
            if entry.path().join(format!("{}.sqlite", name)).is_file() {
                ids.push(name.to_string());
            }
        }

        ids.sort();
        Ok(ids)
    }
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Pretty-printed JSON, creating parent directories as needed.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let content = serde_json::to_string_pretty(value)?;
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}

/// Load and validate the metadata document.
pub fn load_metadata(path: &Path) -> Result<Vec<DatabaseInfo>> {
    let raw: Vec<RawDatabaseInfo> = read_json(path)?;
    raw.into_iter()
        .map(|r| DatabaseInfo::try_from(r).map_err(anyhow::Error::from))
        .collect::<Result<Vec<_>>>()
        .with_context(|| format!("Invalid metadata in {}", path.display()))
}

pub fn load_questions(path: &Path) -> Result<Vec<QuestionRecord>> {
    read_json(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_paths() {
        let layout = DatasetLayout::new("/data/bird", "dev");
        assert_eq!(layout.tables_path(), PathBuf::from("/data/bird/dev_tables.json"));
        assert_eq!(layout.questions_path(), PathBuf::from("/data/bird/dev.json"));
        assert_eq!(
            layout.database_path("shop"),
            PathBuf::from("/data/bird/dev_databases/shop/shop.sqlite")
        );
        assert_eq!(
            layout.content_index_dir("shop"),
            PathBuf::from("/data/bird/db_contents_index/shop")
        );
        assert_eq!(
            layout.output_path("ddl_schema"),
            PathBuf::from("/data/bird/dev_ddl_schema.json")
        );
    }

    #[test]
    fn test_index_root_override() {
        let mut config = Config::for_dataset("/data/bird", "test");
        config.index.root = Some(PathBuf::from("/idx"));
        let layout = DatasetLayout::from_config(&config);
        assert_eq!(layout.content_index_dir("a"), PathBuf::from("/idx/a"));
        assert_eq!(layout.tables_path(), PathBuf::from("/data/bird/test_tables.json"));
    }

    #[test]
    fn test_list_database_ids() {
        let tmp = TempDir::new().unwrap();
        let layout = DatasetLayout::new(tmp.path(), "dev");
        for db in ["beta", "alpha"] {
            let dir = layout.databases_dir().join(db);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join(format!("{}.sqlite", db)), b"").unwrap();
        }
        std::fs::create_dir_all(layout.databases_dir().join("no_file")).unwrap();

        assert_eq!(layout.list_database_ids().unwrap(), vec!["alpha", "beta"]);
    }

    #[test]
    fn test_invalid_metadata_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("dev_tables.json");
        write_json(
            &path,
            &serde_json::json!([{
                "db_id": "bad",
                "table_names_original": ["t"],
                "column_names_original": [[0, "a"]],
                "column_names": [],
                "column_types": ["text"]
            }]),
        )
        .unwrap();

        let err = load_metadata(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("differ in length"));
    }
}
