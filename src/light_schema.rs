//! Markdown "light schema" rendering.
//!
//! A lighter alternative to the DDL: one section per table with a
//! markdown column table, followed by primary and foreign keys.
//!
//! ```text
//! ## Table: customer
//! ### Column information
//! | column_name | column_type | column_description | value_examples |
//! |:------------|:------------|:-------------------|:---------------|
//! | id          | integer     |                    | [1, 2]         |
//! ### Primary keys
//! ['id']
//! ```

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;

use crate::models::{column_key, render_values, DatabaseInfo, Scalar, ValueMap};

/// Column descriptions keyed by `(db_id, table, column)`.
#[derive(Debug, Default, Clone)]
pub struct ColumnMeanings {
    entries: HashMap<(String, String, String), String>,
}

impl ColumnMeanings {
    /// Build from `db|table|column` keys. `#` is dropped and newlines are
    /// flattened to spaces. Malformed keys are ignored.
    pub fn from_raw(raw: HashMap<String, String>) -> Self {
        let mut entries = HashMap::with_capacity(raw.len());
        for (key, value) in raw {
            let parts: Vec<&str> = key.split('|').collect();
            let [db, table, column] = parts.as_slice() else {
                tracing::warn!(key = %key, "ignoring malformed column meaning key");
                continue;
            };
            let text = value.replace('#', "").replace('\n', " ").trim().to_string();
            entries.insert((db.to_string(), table.to_string(), column.to_string()), text);
        }
        Self { entries }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read column meanings: {}", path.display()))?;
        let raw: HashMap<String, String> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse column meanings: {}", path.display()))?;
        Ok(Self::from_raw(raw))
    }

    pub fn get(&self, db_id: &str, table: &str, column: &str) -> &str {
        self.entries
            .get(&(db_id.to_string(), table.to_string(), column.to_string()))
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Render the light schema of one database. Every table gets a section,
/// each followed by a newline.
pub fn render_light_schema(info: &DatabaseInfo, sampled: &ValueMap, meanings: &ColumnMeanings) -> String {
    let mut primary_keys: Vec<Vec<Scalar>> = vec![Vec::new(); info.table_names.len()];
    for pk in &info.primary_keys {
        for idx in pk.indices() {
            let column = &info.columns[idx];
            if let Some(t) = column.table_index {
                primary_keys[t].push(Scalar::from(column.name.as_str()));
            }
        }
    }

    let mut foreign_keys: Vec<Vec<Scalar>> = vec![Vec::new(); info.table_names.len()];
    for fk in &info.foreign_keys {
        let source = &info.columns[fk.source];
        let target = &info.columns[fk.target];
        let (Some(st), Some(tt)) = (source.table_index, target.table_index) else {
            continue;
        };
        let desc = format!(
            "{}.{} = {}.{}",
            info.table_names[st], source.name, info.table_names[tt], target.name
        );
        foreign_keys[st].push(Scalar::from(desc.as_str()));
        foreign_keys[tt].push(Scalar::from(desc));
    }

    let mut schema = String::new();
    for (t, table) in info.table_names.iter().enumerate() {
        let rows: Vec<[String; 4]> = info
            .table_columns(t)
            .map(|c| {
                let samples = sampled
                    .get(&column_key(table, &c.name))
                    .map(|v| render_values(v))
                    .unwrap_or_else(|| "[]".to_string());
                [
                    c.name.clone(),
                    c.column_type.clone(),
                    meanings.get(&info.db_id, table, &c.name).to_string(),
                    samples,
                ]
            })
            .collect();

        let mut sections = vec![format!(
            "## Table: {}\n### Column information\n{}",
            table,
            markdown_table(
                ["column_name", "column_type", "column_description", "value_examples"],
                &rows
            )
        )];
        if !primary_keys[t].is_empty() {
            sections.push(format!("### Primary keys\n{}", render_values(&primary_keys[t])));
        }
        if !foreign_keys[t].is_empty() {
            sections.push(format!("### Foreign keys\n{}", render_values(&foreign_keys[t])));
        }

        schema.push_str(&sections.join("\n"));
        schema.push('\n');
    }
    schema
}

/// Left-aligned pipe table with every column padded to its widest cell.
fn markdown_table(headers: [&str; 4], rows: &[[String; 4]]) -> String {
    let clean = |s: &str| s.replace('\n', " ");
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(clean(cell).chars().count());
        }
    }

    let line = |cells: Vec<String>| {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!(" {}{} ", c, " ".repeat(w - c.chars().count())))
            .collect();
        format!("|{}|", padded.join("|"))
    };

    let mut out = vec![line(headers.iter().map(|h| h.to_string()).collect())];
    let rule: Vec<String> = widths.iter().map(|w| format!(":{}", "-".repeat(w + 1))).collect();
    out.push(format!("|{}|", rule.join("|")));
    for row in rows {
        out.push(line(row.iter().map(|c| clean(c)).collect()));
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawDatabaseInfo;

    fn shop() -> DatabaseInfo {
        let raw: RawDatabaseInfo = serde_json::from_value(serde_json::json!({
            "db_id": "shop",
            "table_names_original": ["customer", "orders"],
            "column_names_original": [[-1, "*"], [0, "id"], [1, "id"], [1, "customer_id"]],
            "column_names": [[-1, "*"], [0, "id"], [1, "id"], [1, "customer id"]],
            "column_types": ["text", "integer", "integer", "integer"],
            "primary_keys": [1, 2],
            "foreign_keys": [[3, 1]]
        }))
        .unwrap();
        DatabaseInfo::try_from(raw).unwrap()
    }

    #[test]
    fn test_column_meanings_cleanup() {
        let mut raw = HashMap::new();
        raw.insert("shop|customer|id".to_string(), "#Unique\nidentifier ".to_string());
        raw.insert("broken".to_string(), "x".to_string());
        let meanings = ColumnMeanings::from_raw(raw);
        assert_eq!(meanings.len(), 1);
        assert_eq!(meanings.get("shop", "customer", "id"), "Unique identifier");
        assert_eq!(meanings.get("shop", "customer", "name"), "");
    }

    #[test]
    fn test_markdown_table_padding() {
        let rows = vec![[
            "id".to_string(),
            "integer".to_string(),
            "".to_string(),
            "[1]".to_string(),
        ]];
        let table = markdown_table(["a", "b", "c", "d"], &rows);
        assert_eq!(
            table,
            "| a  | b       | c | d   |\n|:---|:--------|:--|:----|\n| id | integer |   | [1] |"
        );
    }

    #[test]
    fn test_render_light_schema() {
        let mut sampled = ValueMap::new();
        sampled.insert("customer.id".into(), vec![Scalar::Integer(1), Scalar::Integer(2)]);
        let mut raw = HashMap::new();
        raw.insert("shop|orders|customer_id".to_string(), "buyer".to_string());

        let schema = render_light_schema(&shop(), &sampled, &ColumnMeanings::from_raw(raw));

        assert!(schema.starts_with("## Table: customer\n### Column information\n"));
        assert!(schema.contains("| [1, 2]"));
        assert!(schema.contains("### Primary keys\n['id']"));
        assert!(schema.contains("| buyer "));
        assert_eq!(
            schema.matches("### Foreign keys\n['orders.customer_id = customer.id']").count(),
            2
        );
        assert!(schema.ends_with("\n"));
    }
}
