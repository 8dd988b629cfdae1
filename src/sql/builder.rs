//! Statement text for COPY INTO, aggregate INSERT and MERGE INTO.
//!
//! - <https://docs.databricks.com/en/sql/language-manual/delta-copy-into.html>
//! - <https://docs.databricks.com/en/sql/language-manual/delta-merge-into.html>

use serde::{Deserialize, Serialize};

use super::quote::{quote_identifier, quote_path, quote_table, string_literal};
use super::types::{cast_expression, column_type_name};
use crate::bulkload::{MergeSpec, SchemaDescriptor, TableIdentifier};

/// Delimited layout shared by the file writer and the COPY statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFormat {
    pub delimiter: char,
    pub null_string: String,
    /// Let quoted values span lines. The reader splits records at every line break
    /// unless this is declared.
    #[serde(default)]
    pub multi_line: bool,
}

impl Default for FileFormat {
    fn default() -> Self {
        Self {
            delimiter: '\t',
            null_string: "\\N".to_string(),
            multi_line: false,
        }
    }
}

/// `COPY INTO` loading one staged file into `table`.
///
/// Every non-skip column is read by its position in the full column list, so skipped
/// columns still advance the `_cN` counter.
pub fn build_copy_into(
    table: &TableIdentifier,
    file_path: &str,
    schema: &SchemaDescriptor,
    format: &FileFormat,
) -> String {
    let select = schema
        .columns()
        .iter()
        .enumerate()
        .filter(|(_, column)| !column.skip)
        .map(|(i, column)| {
            format!(
                "{} {}",
                cast_expression(i, column),
                quote_identifier(&column.name)
            )
        })
        .collect::<Vec<_>>()
        .join(" , ");

    let mut options = format!(
        "'nullValue' = {} ,  'delimiter' = {}",
        string_literal(&format.null_string),
        string_literal(&format.delimiter.to_string()),
    );
    if format.multi_line {
        options.push_str(" ,  'multiLine' = 'true'");
    }

    format!(
        "COPY INTO {} FROM ( SELECT {} FROM {} ) FILEFORMAT = CSV  FORMAT_OPTIONS ( {} )",
        quote_table(table),
        select,
        quote_path(file_path),
        options,
    )
}

/// Single `INSERT ... UNION ALL` consolidating `from` into `to`.
/// Returns `None` when there is nothing to aggregate.
pub fn build_aggregate_insert(from: &[TableIdentifier], to: &TableIdentifier) -> Option<String> {
    if from.is_empty() {
        return None;
    }

    let sources = from
        .iter()
        .map(|t| format!("SELECT * FROM {}", quote_table(t)))
        .collect::<Vec<_>>()
        .join(" UNION ALL ");

    Some(format!("INSERT INTO {} ( {} );", quote_table(to), sources))
}

/// `MERGE INTO target T USING source S ...`.
///
/// The INSERT column list is every schema column in order; callers pass the schema of
/// the columns that exist in `source`.
pub fn build_merge(
    source: &TableIdentifier,
    schema: &SchemaDescriptor,
    target: &TableIdentifier,
    merge: &MergeSpec,
) -> String {
    let on = merge
        .merge_keys()
        .iter()
        .map(|key| {
            let key = quote_identifier(key);
            format!("T.{} = S.{}", key, key)
        })
        .collect::<Vec<_>>()
        .join(" AND ");

    let update = match merge.merge_rule() {
        Some(rule) => rule.join(", "),
        None => schema
            .column_names()
            .map(|name| {
                let column = quote_identifier(name);
                format!("{} = S.{}", column, column)
            })
            .collect::<Vec<_>>()
            .join(", "),
    };

    format!(
        "MERGE INTO {} T  USING {} S  ON ({}) WHEN MATCHED THEN  UPDATE SET {} WHEN NOT MATCHED THEN INSERT ({}) VALUES ({});",
        quote_table(target),
        quote_table(source),
        on,
        update,
        column_list(schema, ""),
        column_list(schema, "S."),
    )
}

/// `CREATE TABLE IF NOT EXISTS` with the mapped type of every non-skip column.
pub fn build_create_table(table: &TableIdentifier, schema: &SchemaDescriptor) -> String {
    let columns = schema
        .columns()
        .iter()
        .filter(|c| !c.skip)
        .map(|c| {
            let mut def = format!("{} {}", quote_identifier(&c.name), column_type_name(c));
            if c.not_null {
                def.push_str(" NOT NULL");
            }
            def
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!("CREATE TABLE IF NOT EXISTS {} ({})", quote_table(table), columns)
}

pub fn build_drop_table(table: &TableIdentifier) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_table(table))
}

pub fn build_delete_all(table: &TableIdentifier) -> String {
    format!("DELETE FROM {}", quote_table(table))
}

fn column_list(schema: &SchemaDescriptor, prefix: &str) -> String {
    schema
        .column_names()
        .map(|name| format!("{}{}", prefix, quote_identifier(name)))
        .collect::<Vec<_>>()
        .join(", ")
}
