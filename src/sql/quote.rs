//! Identifier and literal quoting for Databricks SQL.
//!
//! See <https://docs.databricks.com/en/sql/language-manual/sql-ref-identifiers.html>.

use crate::bulkload::TableIdentifier;

pub const IDENTIFIER_QUOTE: char = '`';
pub const PATH_QUOTE: char = '"';

/// Backtick-quote an identifier, doubling embedded backticks.
pub fn quote_identifier(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    out.push(IDENTIFIER_QUOTE);
    for ch in name.chars() {
        if ch == IDENTIFIER_QUOTE {
            out.push(IDENTIFIER_QUOTE);
        }
        out.push(ch);
    }
    out.push(IDENTIFIER_QUOTE);
    out
}

/// `catalog`.`schema`.`name`, omitting absent parts.
pub fn quote_table(table: &TableIdentifier) -> String {
    let mut parts = Vec::with_capacity(3);
    if let Some(catalog) = &table.catalog {
        parts.push(quote_identifier(catalog));
    }
    if let Some(schema) = &table.schema {
        parts.push(quote_identifier(schema));
    }
    parts.push(quote_identifier(&table.name));
    parts.join(".")
}

/// Double-quoted file path literal, as used in `COPY INTO ... FROM "<path>"`.
pub fn quote_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 2);
    out.push(PATH_QUOTE);
    push_escaped(&mut out, path, PATH_QUOTE);
    out.push(PATH_QUOTE);
    out
}

/// Single-quoted string literal with backslash escapes.
pub fn string_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    push_escaped(&mut out, value, '\'');
    out.push('\'');
    out
}

fn push_escaped(out: &mut String, value: &str, quote: char) {
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
}
