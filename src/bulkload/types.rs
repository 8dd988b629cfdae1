use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::LoadError;

/// A warehouse table. Missing catalog/schema mean "whatever the connection is using".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableIdentifier {
    pub catalog: Option<String>,
    pub schema: Option<String>,
    pub name: String,
}

impl TableIdentifier {
    pub fn new(catalog: Option<&str>, schema: Option<&str>, name: &str) -> Self {
        Self {
            catalog: catalog.map(str::to_string),
            schema: schema.map(str::to_string),
            name: name.to_string(),
        }
    }

    pub fn qualified(catalog: &str, schema: &str, name: &str) -> Self {
        Self::new(Some(catalog), Some(schema), name)
    }

    pub fn unqualified(name: &str) -> Self {
        Self::new(None, None, name)
    }

    pub fn with_name(&self, name: &str) -> Self {
        Self {
            catalog: self.catalog.clone(),
            schema: self.schema.clone(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for TableIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(catalog) = &self.catalog {
            write!(f, "{}.", catalog)?;
        }
        if let Some(schema) = &self.schema {
            write!(f, "{}.", schema)?;
        }
        write!(f, "{}", self.name)
    }
}

/// Generic column type family, as reported by catalog metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Float,
    Real,
    Double,
    Decimal,
    Numeric,
    Char,
    Varchar,
    LongVarchar,
    Clob,
    Binary,
    Varbinary,
    Blob,
    Date,
    Time,
    Timestamp,
    TimestampWithTimezone,
    Other,
}

impl SqlType {
    /// Classify a catalog type name such as `BIGINT`, `DECIMAL(10,2)` or `STRING`.
    pub fn from_type_name(type_name: &str) -> Self {
        let upper = type_name.trim().to_uppercase();
        let base = upper.split('(').next().unwrap_or("").trim();

        match base {
            "BOOLEAN" | "BOOL" => SqlType::Boolean,
            "TINYINT" | "BYTE" => SqlType::TinyInt,
            "SMALLINT" | "SHORT" => SqlType::SmallInt,
            "INT" | "INTEGER" => SqlType::Integer,
            "BIGINT" | "LONG" => SqlType::BigInt,
            "FLOAT" => SqlType::Float,
            "REAL" => SqlType::Real,
            "DOUBLE" | "DOUBLE PRECISION" => SqlType::Double,
            "DECIMAL" | "DEC" => SqlType::Decimal,
            "NUMERIC" => SqlType::Numeric,
            "CHAR" | "CHARACTER" | "NCHAR" => SqlType::Char,
            "VARCHAR" | "CHARACTER VARYING" | "NVARCHAR" => SqlType::Varchar,
            "STRING" | "TEXT" | "LONGVARCHAR" => SqlType::LongVarchar,
            "CLOB" => SqlType::Clob,
            "BINARY" => SqlType::Binary,
            "VARBINARY" => SqlType::Varbinary,
            "BLOB" => SqlType::Blob,
            "DATE" => SqlType::Date,
            "TIME" => SqlType::Time,
            "TIMESTAMP" | "TIMESTAMP_NTZ" | "DATETIME" => SqlType::Timestamp,
            "TIMESTAMP_LTZ" | "TIMESTAMPTZ" | "TIMESTAMP WITH TIME ZONE" => {
                SqlType::TimestampWithTimezone
            }
            _ => SqlType::Other,
        }
    }
}

/// One destination column.
///
/// `skip` columns are never named in generated SQL but still occupy a position in the
/// staged file, so the positional `_cN` references of the remaining columns stay aligned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub sql_type: SqlType,
    pub simple_type_name: String,
    /// Type text used verbatim in DDL and casts when present.
    pub declared_type: Option<String>,
    pub size: u32,
    pub decimal_digits: Option<u32>,
    pub char_octet_length: u32,
    pub not_null: bool,
    pub is_primary_key: bool,
    pub skip: bool,
}

impl ColumnDescriptor {
    /// A column whose type is known only as generic metadata.
    pub fn generic(
        name: &str,
        sql_type: SqlType,
        simple_type_name: &str,
        size: u32,
        decimal_digits: Option<u32>,
    ) -> Self {
        Self {
            name: name.to_string(),
            sql_type,
            simple_type_name: simple_type_name.to_uppercase(),
            declared_type: None,
            size,
            decimal_digits,
            char_octet_length: 0,
            not_null: false,
            is_primary_key: false,
            skip: false,
        }
    }

    /// A column with an explicitly declared warehouse type (e.g. `string`, `bigint`).
    pub fn declared(name: &str, declared_type: &str) -> Self {
        Self {
            name: name.to_string(),
            sql_type: SqlType::from_type_name(declared_type),
            simple_type_name: declared_type.to_uppercase(),
            declared_type: Some(declared_type.to_string()),
            size: 0,
            decimal_digits: None,
            char_octet_length: 0,
            not_null: false,
            is_primary_key: false,
            skip: false,
        }
    }

    /// Placeholder for an input column that has no destination counterpart.
    pub fn skipped(name: &str) -> Self {
        Self {
            skip: true,
            ..Self::declared(name, "string")
        }
    }
}

/// Ordered destination columns. Order defines the staged file layout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaDescriptor {
    columns: Vec<ColumnDescriptor>,
}

impl SchemaDescriptor {
    pub fn new(columns: Vec<ColumnDescriptor>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Columns that are actually loaded, in order.
    pub fn without_skipped(&self) -> SchemaDescriptor {
        SchemaDescriptor::new(self.columns.iter().filter(|c| !c.skip).cloned().collect())
    }

    pub fn find(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .or_else(|| self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name)))
    }

    /// Map input column names onto an existing destination schema.
    ///
    /// Each input position keeps its slot. Matching is exact first, then
    /// case-insensitive; unmatched inputs become `skip` columns.
    pub fn align_to(&self, existing: &SchemaDescriptor) -> SchemaDescriptor {
        let columns = self
            .columns
            .iter()
            .map(|input| match existing.find(&input.name) {
                Some(target) => target.clone(),
                None => ColumnDescriptor::skipped(&input.name),
            })
            .collect();
        SchemaDescriptor::new(columns)
    }
}

/// Upsert specification. At least one merge key is required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeSpec {
    merge_keys: Vec<String>,
    merge_rule: Option<Vec<String>>,
}

impl MergeSpec {
    pub fn new(merge_keys: Vec<String>, merge_rule: Option<Vec<String>>) -> Result<Self, LoadError> {
        if merge_keys.is_empty() {
            return Err(LoadError::Config(
                "merge requires at least one merge key".to_string(),
            ));
        }
        // An empty rule list means "no custom rule".
        let merge_rule = merge_rule.filter(|rule| !rule.is_empty());
        Ok(Self {
            merge_keys,
            merge_rule,
        })
    }

    pub fn merge_keys(&self) -> &[String] {
        &self.merge_keys
    }

    pub fn merge_rule(&self) -> Option<&[String]> {
        self.merge_rule.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_type_from_type_name() {
        assert_eq!(SqlType::from_type_name("bigint"), SqlType::BigInt);
        assert_eq!(SqlType::from_type_name("DECIMAL(10,2)"), SqlType::Decimal);
        assert_eq!(SqlType::from_type_name("string"), SqlType::LongVarchar);
        assert_eq!(SqlType::from_type_name("varchar(20)"), SqlType::Varchar);
        assert_eq!(
            SqlType::from_type_name("double precision"),
            SqlType::Double
        );
        assert_eq!(SqlType::from_type_name("INTERVAL DAY"), SqlType::Other);
    }

    #[test]
    fn test_merge_spec_requires_keys() {
        let err = MergeSpec::new(vec![], None).unwrap_err();
        assert!(matches!(err, LoadError::Config(_)));
    }

    #[test]
    fn test_merge_spec_empty_rule_is_default() {
        let spec = MergeSpec::new(vec!["id".to_string()], Some(vec![])).unwrap();
        assert_eq!(spec.merge_rule(), None);
        assert_eq!(spec.merge_keys(), ["id".to_string()]);
    }

    #[test]
    fn test_align_marks_unknown_columns_skipped() {
        let existing = SchemaDescriptor::new(vec![
            ColumnDescriptor::declared("ID", "bigint"),
            ColumnDescriptor::declared("name", "string"),
        ]);
        let input = SchemaDescriptor::new(vec![
            ColumnDescriptor::declared("id", "string"),
            ColumnDescriptor::declared("extra", "string"),
            ColumnDescriptor::declared("name", "string"),
        ]);

        let aligned = input.align_to(&existing);
        let names: Vec<&str> = aligned.column_names().collect();
        assert_eq!(names, vec!["ID", "extra", "name"]);
        assert!(!aligned.columns()[0].skip);
        assert_eq!(aligned.columns()[0].declared_type.as_deref(), Some("bigint"));
        assert!(aligned.columns()[1].skip);
        assert_eq!(aligned.without_skipped().len(), 2);
    }

    #[test]
    fn test_table_identifier_display() {
        assert_eq!(
            TableIdentifier::qualified("main", "default", "t").to_string(),
            "main.default.t"
        );
        assert_eq!(TableIdentifier::unqualified("t").to_string(), "t");
        assert_eq!(
            TableIdentifier::unqualified("t").with_name("u"),
            TableIdentifier::unqualified("u")
        );
    }
}
