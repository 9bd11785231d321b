//! Value-augmented DDL rendering.
//!
//! Produces one `CREATE TABLE` statement per table, in declaration order,
//! each column annotated with its human-readable comment (when it adds
//! something over the raw name) and up to six example values.
//!
//! ```text
//! CREATE TABLE `order` (
//!     id integer,
//!     customer_id integer, -- buyer, example: [3, 7]
//!     PRIMARY KEY (id),
//!     CONSTRAINT fk_order_customer_id FOREIGN KEY (customer_id) REFERENCES customer (id)
//! );
//! ```

use std::collections::HashSet;

use crate::error::{PipelineError, Result};
use crate::identifier::format_identifier;
use crate::models::{column_key, render_values, Column, DatabaseInfo, Scalar, ValueMap};

/// Example values kept per column.
pub const MAX_COLUMN_VALUES: usize = 6;

const INDENT: &str = "    ";

/// Values for `key` from each map in priority order, deduplicated in
/// first-seen order and cut to `max`.
pub fn merge_values(key: &str, layers: &[&ValueMap], max: usize) -> Vec<Scalar> {
    let mut seen = HashSet::new();
    layers
        .iter()
        .filter_map(|layer| layer.get(key))
        .flatten()
        .filter(|v| seen.insert(v.render()))
        .take(max)
        .cloned()
        .collect()
}

/// Whether the comment only restates the column name.
fn comment_is_redundant(name: &str, comment: &str) -> bool {
    if comment.trim().is_empty() {
        return true;
    }
    let name = name.to_lowercase();
    let comment = comment.to_lowercase();
    name == comment || name == comment.replace(' ', "_") || name == comment.replace(' ', "")
}

fn render_column(column: &Column, values: &[Scalar]) -> String {
    let mut line = format!(
        "{}{} {},",
        INDENT,
        format_identifier(&column.name),
        column.column_type
    );
    if comment_is_redundant(&column.name, &column.comment) {
        if !values.is_empty() {
            line.push_str(&format!(" -- example: {}", render_values(values)));
        }
    } else {
        line.push_str(&format!(" -- {}", column.comment));
        if !values.is_empty() {
            line.push_str(&format!(", example: {}", render_values(values)));
        }
    }
    line
}

fn constraint_part(name: &str) -> String {
    name.to_lowercase().replace(' ', "_")
}

/// Render the schema of one database.
///
/// `layers` are value maps keyed by lower-cased `table.column`, highest
/// priority first (semantic, lexical, sampled).
pub fn assemble(info: &DatabaseInfo, layers: &[&ValueMap]) -> Result<String> {
    let mut tables = Vec::new();

    for (table_index, table_name) in info.table_names.iter().enumerate() {
        let mut lines = Vec::new();
        let mut pk_columns: Vec<&str> = Vec::new();
        let mut fk_lines: Vec<String> = Vec::new();

        for column in info.table_columns(table_index) {
            let values = merge_values(
                &column_key(table_name, &column.name),
                layers,
                MAX_COLUMN_VALUES,
            );
            lines.push(render_column(column, &values));

            if info.is_primary_key(column.index) && !pk_columns.contains(&column.name.as_str()) {
                pk_columns.push(&column.name);
            }

            for fk in info.foreign_keys.iter().filter(|fk| fk.source == column.index) {
                let target = &info.columns[fk.target];
                let target_table = info.table_name_of(target).unwrap_or_default();
                let line = format!(
                    "{}CONSTRAINT fk_{}_{} FOREIGN KEY ({}) REFERENCES {} ({}),",
                    INDENT,
                    constraint_part(table_name),
                    constraint_part(&column.name),
                    format_identifier(&column.name),
                    format_identifier(target_table),
                    format_identifier(&target.name)
                );
                if !fk_lines.contains(&line) {
                    fk_lines.push(line);
                }
            }
        }

        if lines.is_empty() {
            continue;
        }

        if !pk_columns.is_empty() {
            let names: Vec<String> = pk_columns.iter().map(|c| format_identifier(c)).collect();
            lines.push(format!("{}PRIMARY KEY ({}),", INDENT, names.join(", ")));
        }
        lines.extend(fk_lines);

        let mut ddl = format!("CREATE TABLE {} (\n{}", format_identifier(table_name), lines.join("\n"));
        if ddl.ends_with(',') {
            ddl.pop();
        }
        ddl.push_str("\n);");
        tables.push(ddl);
    }

    let ddl = tables.join("\n\n");
    check_coverage(info, &ddl)?;
    Ok(ddl)
}

/// Every real column name must occur in the rendered text, ignoring case.
pub fn check_coverage(info: &DatabaseInfo, ddl: &str) -> Result<()> {
    let lower = ddl.to_lowercase();
    for column in info.real_columns() {
        if !lower.contains(&column.name.to_lowercase()) {
            return Err(PipelineError::AssemblyInvariant {
                db_id: info.db_id.clone(),
                column: column.name.clone(),
            });
        }
    }
    Ok(())
}
