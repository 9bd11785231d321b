//! Core data models used throughout the pipeline.
//!
//! The metadata document arrives as position-correlated arrays
//! (`column_names_original`, `column_names`, `column_types`). It is parsed
//! into [`RawDatabaseInfo`] and immediately converted into a
//! [`DatabaseInfo`] whose [`Column`] records carry every per-column field
//! together, so the rest of the crate never indexes parallel arrays.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::PipelineError;

/// Values per column, keyed by lower-cased `table.column`.
pub type ValueMap = HashMap<String, Vec<Scalar>>;

/// Lower-cased `table.column` key used by every value map.
pub fn column_key(table: &str, column: &str) -> String {
    format!("{}.{}", table, column).to_lowercase()
}

/// A primary-key entry: one column index or a composite group.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum PrimaryKey {
    Single(usize),
    Composite(Vec<usize>),
}

impl PrimaryKey {
    pub fn contains(&self, column_index: usize) -> bool {
        match self {
            PrimaryKey::Single(idx) => *idx == column_index,
            PrimaryKey::Composite(group) => group.contains(&column_index),
        }
    }

    pub fn indices(&self) -> Vec<usize> {
        match self {
            PrimaryKey::Single(idx) => vec![*idx],
            PrimaryKey::Composite(group) => group.clone(),
        }
    }
}

/// One record of the `<type>_tables.json` metadata document, as stored.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawDatabaseInfo {
    pub db_id: String,
    pub table_names_original: Vec<String>,
    pub column_names_original: Vec<(i64, String)>,
    pub column_names: Vec<(i64, String)>,
    pub column_types: Vec<String>,
    #[serde(default)]
    pub primary_keys: Vec<PrimaryKey>,
    #[serde(default)]
    pub foreign_keys: Vec<(usize, usize)>,
}

/// A single column with all of its metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    /// Position in the database-wide column list (what PK/FK indices refer to).
    pub index: usize,
    /// Owning table; `None` for the `*` wildcard.
    pub table_index: Option<usize>,
    pub name: String,
    /// Human-readable name or description; may be empty.
    pub comment: String,
    pub column_type: String,
}

impl Column {
    pub fn is_wildcard(&self) -> bool {
        self.table_index.is_none() || self.name == "*"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub source: usize,
    pub target: usize,
}

/// Validated database metadata.
#[derive(Debug, Clone)]
pub struct DatabaseInfo {
    pub db_id: String,
    pub table_names: Vec<String>,
    pub columns: Vec<Column>,
    pub primary_keys: Vec<PrimaryKey>,
    pub foreign_keys: Vec<ForeignKey>,
}

impl DatabaseInfo {
    /// Columns belonging to `table_index`, in declaration order.
    pub fn table_columns(&self, table_index: usize) -> impl Iterator<Item = &Column> {
        self.columns
            .iter()
            .filter(move |c| c.table_index == Some(table_index))
    }

    /// Every column except the wildcard.
    pub fn real_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| !c.is_wildcard())
    }

    pub fn table_name_of(&self, column: &Column) -> Option<&str> {
        column
            .table_index
            .and_then(|t| self.table_names.get(t))
            .map(String::as_str)
    }

    pub fn is_primary_key(&self, column_index: usize) -> bool {
        self.primary_keys.iter().any(|pk| pk.contains(column_index))
    }
}

impl TryFrom<RawDatabaseInfo> for DatabaseInfo {
    type Error = PipelineError;

    fn try_from(raw: RawDatabaseInfo) -> Result<Self, Self::Error> {
        let invalid = |reason: String| PipelineError::Metadata {
            db_id: raw.db_id.clone(),
            reason,
        };

        let n = raw.column_names_original.len();
        if raw.column_types.len() != n || raw.column_names.len() != n {
            return Err(invalid(format!(
                "column arrays differ in length: {} original names, {} names, {} types",
                n,
                raw.column_names.len(),
                raw.column_types.len()
            )));
        }

        let mut columns = Vec::with_capacity(n);
        for (index, (((table_idx, name), (_, comment)), column_type)) in raw
            .column_names_original
            .iter()
            .zip(raw.column_names.iter())
            .zip(raw.column_types.iter())
            .enumerate()
        {
            let table_index = match *table_idx {
                t if t < 0 => None,
                t if (t as usize) < raw.table_names_original.len() => Some(t as usize),
                t => {
                    return Err(invalid(format!(
                        "column '{}' references missing table index {}",
                        name, t
                    )))
                }
            };
            columns.push(Column {
                index,
                table_index,
                name: name.clone(),
                comment: comment.clone(),
                column_type: column_type.clone(),
            });
        }

        for pk in &raw.primary_keys {
            for idx in pk.indices() {
                if idx >= n {
                    return Err(invalid(format!("primary key index {} out of range", idx)));
                }
            }
        }

        let mut foreign_keys = Vec::with_capacity(raw.foreign_keys.len());
        for &(source, target) in &raw.foreign_keys {
            for idx in [source, target] {
                if columns.get(idx).map_or(true, |c| c.table_index.is_none()) {
                    return Err(invalid(format!(
                        "foreign key ({}, {}) does not resolve to a table column",
                        source, target
                    )));
                }
            }
            foreign_keys.push(ForeignKey { source, target });
        }

        Ok(DatabaseInfo {
            db_id: raw.db_id,
            table_names: raw.table_names_original,
            columns,
            primary_keys: raw.primary_keys,
            foreign_keys,
        })
    }
}

/// A single cell value read from a relational source.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Scalar {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Render as a list element literal: text single-quoted with escapes,
    /// numbers bare, blobs as `b'..'`.
    pub fn render(&self) -> String {
        match self {
            Scalar::Null => "None".to_string(),
            Scalar::Integer(i) => i.to_string(),
            Scalar::Real(f) => render_real(*f),
            Scalar::Text(s) => quote_text(s),
            Scalar::Blob(bytes) => {
                let mut out = String::from("b'");
                for &b in bytes {
                    match b {
                        b'\\' => out.push_str("\\\\"),
                        b'\'' => out.push_str("\\'"),
                        0x20..=0x7e => out.push(b as char),
                        _ => out.push_str(&format!("\\x{:02x}", b)),
                    }
                }
                out.push('\'');
                out
            }
        }
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Text(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Scalar::Text(s)
    }
}

impl From<i64> for Scalar {
    fn from(i: i64) -> Self {
        Scalar::Integer(i)
    }
}

impl From<f64> for Scalar {
    fn from(f: f64) -> Self {
        Scalar::Real(f)
    }
}

impl Serialize for Scalar {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Scalar::Null => serializer.serialize_none(),
            Scalar::Integer(i) => serializer.serialize_i64(*i),
            Scalar::Real(f) => serializer.serialize_f64(*f),
            Scalar::Text(s) => serializer.serialize_str(s),
            Scalar::Blob(b) => serializer.serialize_str(&String::from_utf8_lossy(b)),
        }
    }
}

fn render_real(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        let s = if f > 0.0 { "inf" } else { "-inf" };
        s.to_string()
    } else {
        // Debug keeps a trailing `.0` on integral values.
        format!("{:?}", f)
    }
}

fn quote_text(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Render a value list as `[v1, v2, ...]`.
pub fn render_values(values: &[Scalar]) -> String {
    let parts: Vec<String> = values.iter().map(Scalar::render).collect();
    format!("[{}]", parts.join(", "))
}

/// A value proposed for a column by one of the value sources.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnValueCandidate {
    pub table: String,
    pub column: String,
    pub value: Scalar,
    pub score: Option<f64>,
}

/// How a [`RetrievalHit`] was judged relevant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Relevance {
    /// Substring-overlap score in `[0, 1]`, higher is better.
    Lexical(f64),
    /// Vector distance, lower is better.
    Semantic(f32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalHit {
    pub table: String,
    pub column: String,
    pub content: String,
    pub relevance: Relevance,
}

impl RetrievalHit {
    pub fn key(&self) -> String {
        column_key(&self.table, &self.column)
    }

    pub fn into_candidate(self) -> ColumnValueCandidate {
        let score = match self.relevance {
            Relevance::Lexical(s) => Some(s),
            Relevance::Semantic(_) => None,
        };
        ColumnValueCandidate {
            table: self.table,
            column: self.column,
            value: Scalar::Text(self.content),
            score,
        }
    }
}

/// Group candidates into a [`ValueMap`], keeping their order within each
/// column.
pub fn group_candidates(candidates: impl IntoIterator<Item = ColumnValueCandidate>) -> ValueMap {
    let mut map: ValueMap = HashMap::new();
    for candidate in candidates {
        map.entry(column_key(&candidate.table, &candidate.column))
            .or_default()
            .push(candidate.value);
    }
    map
}

/// [`group_candidates`] over retrieval hits.
pub fn group_hits(hits: &[RetrievalHit]) -> ValueMap {
    group_candidates(hits.iter().cloned().map(RetrievalHit::into_candidate))
}

/// One question of a text-to-SQL dataset.
///
/// Fields this crate does not interpret are kept in `extra` and written
/// back unchanged.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuestionRecord {
    pub db_id: String,
    pub question: String,
    #[serde(default)]
    pub evidence: String,
    #[serde(rename = "SQL", default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub database_literals: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_skeleton: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl QuestionRecord {
    /// Evidence and question joined the way every lexical query sees them.
    pub fn full_text(&self) -> String {
        question_text(&self.evidence, &self.question)
    }
}

/// `evidence\nquestion`, or the question alone when there is no evidence.
pub fn question_text(evidence: &str, question: &str) -> String {
    if evidence.trim().is_empty() {
        question.to_string()
    } else {
        format!("{}\n{}", evidence, question)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_shop() -> RawDatabaseInfo {
        serde_json::from_value(serde_json::json!({
            "db_id": "shop",
            "table_names_original": ["customer", "order"],
            "column_names_original": [[-1, "*"], [0, "id"], [0, "name"], [1, "id"], [1, "customer_id"]],
            "column_names": [[-1, "*"], [0, "id"], [0, "customer name"], [1, "id"], [1, "customer id"]],
            "column_types": ["text", "integer", "text", "integer", "integer"],
            "primary_keys": [1, [3, 4]],
            "foreign_keys": [[4, 1]]
        }))
        .unwrap()
    }

    #[test]
    fn test_structured_columns_from_raw() {
        let info = DatabaseInfo::try_from(raw_shop()).unwrap();
        assert_eq!(info.columns.len(), 5);
        assert!(info.columns[0].is_wildcard());
        assert_eq!(info.columns[2].comment, "customer name");
        assert_eq!(info.table_columns(1).count(), 2);
        assert_eq!(info.real_columns().count(), 4);
        assert!(info.is_primary_key(4));
        assert_eq!(info.foreign_keys[0], ForeignKey { source: 4, target: 1 });
    }

    #[test]
    fn test_mismatched_arrays_rejected() {
        let mut raw = raw_shop();
        raw.column_types.pop();
        let err = DatabaseInfo::try_from(raw).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("differ in length"));
    }

    #[test]
    fn test_dangling_foreign_key_rejected() {
        let mut raw = raw_shop();
        raw.foreign_keys.push((4, 99));
        assert!(DatabaseInfo::try_from(raw).is_err());
    }

    #[test]
    fn test_render_values() {
        let values = vec![
            Scalar::from("alpha"),
            Scalar::from("it's"),
            Scalar::Integer(7),
            Scalar::Real(2.0),
            Scalar::Real(0.25),
        ];
        assert_eq!(render_values(&values), r#"['alpha', "it's", 7, 2.0, 0.25]"#);
    }

    #[test]
    fn test_render_text_with_both_quotes() {
        let v = Scalar::from(r#"a'b"c"#);
        assert_eq!(v.render(), r#"'a\'b"c'"#);
    }

    #[test]
    fn test_hits_become_grouped_candidates() {
        let hit = |table: &str, content: &str, relevance| RetrievalHit {
            table: table.to_string(),
            column: "Name".to_string(),
            content: content.to_string(),
            relevance,
        };
        let lexical = hit("Customer", "Ann Lee", Relevance::Lexical(0.9));
        let candidate = lexical.clone().into_candidate();
        assert_eq!(candidate.score, Some(0.9));
        assert_eq!(candidate.value, Scalar::from("Ann Lee"));

        let values = group_hits(&[
            lexical,
            hit("customer", "Bob Stone", Relevance::Semantic(0.2)),
            hit("city", "Oslo", Relevance::Semantic(0.1)),
        ]);
        assert_eq!(
            values["customer.name"],
            vec![Scalar::from("Ann Lee"), Scalar::from("Bob Stone")]
        );
        assert_eq!(values["city.name"], vec![Scalar::from("Oslo")]);
    }

    #[test]
    fn test_question_full_text() {
        let mut record: QuestionRecord = serde_json::from_value(serde_json::json!({
            "question_id": 3,
            "db_id": "shop",
            "question": "How many orders?",
            "evidence": "",
            "difficulty": "simple"
        }))
        .unwrap();
        assert_eq!(record.full_text(), "How many orders?");
        assert_eq!(record.extra.get("difficulty").unwrap(), "simple");

        record.evidence = "orders refers to order".into();
        assert_eq!(record.full_text(), "orders refers to order\nHow many orders?");
    }
}
