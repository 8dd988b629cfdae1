//! Destination table discovery through catalog metadata.
//!
//! One session sees every catalog and schema the principal can read, so a table name
//! alone can match tables elsewhere. Metadata rows are only trusted when they belong to
//! the session's active catalog and schema.

use std::collections::HashSet;

use tracing::{error, trace};

use super::types::{ColumnDescriptor, SchemaDescriptor, SqlType, TableIdentifier};
use crate::error::WarehouseError;
use crate::warehouse::{CatalogScoped, ColumnRow, WarehouseConnection};

pub struct TableMetadataInspector<'a> {
    connection: &'a dyn WarehouseConnection,
}

impl<'a> TableMetadataInspector<'a> {
    pub fn new(connection: &'a dyn WarehouseConnection) -> Self {
        Self { connection }
    }

    /// Whether a metadata row describes `table` as seen from the active session.
    ///
    /// An explicit catalog or schema that differs from the session's is reported but
    /// does not short-circuit; the row still has to sit in the active catalog/schema.
    pub fn accepts(&self, row: &impl CatalogScoped, table: &TableIdentifier) -> bool {
        let active_catalog = self.connection.active_catalog();
        let active_schema = self.connection.active_schema();

        match table.catalog.as_deref() {
            None => trace!("no catalog on {}, checking against the session", table),
            Some(catalog) if !same_name(catalog, active_catalog) => error!(
                "catalog of {} differs from the session catalog ({}, {})",
                table, catalog, active_catalog
            ),
            Some(_) => {}
        }
        match table.schema.as_deref() {
            None => trace!("no schema on {}, checking against the session", table),
            Some(schema) if !same_name(schema, active_schema) => error!(
                "schema of {} differs from the session schema ({}, {})",
                table, schema, active_schema
            ),
            Some(_) => {}
        }

        same_name(row.catalog(), active_catalog) && same_name(row.schema(), active_schema)
    }

    /// Not finding the table is `Ok(false)`, never an error.
    pub async fn table_exists(&self, table: &TableIdentifier) -> Result<bool, WarehouseError> {
        let rows = self
            .connection
            .list_tables(table.catalog.as_deref(), table.schema.as_deref(), &table.name)
            .await?;
        Ok(rows.iter().any(|row| self.accepts(row, table)))
    }

    /// Schema of an existing table with primary-key flags, or `None` if it is absent.
    ///
    /// Columns of types the listing cannot represent (intervals, `TIMESTAMP_NTZ`) are
    /// already missing from the listing itself.
    pub async fn schema_from_existing(
        &self,
        table: &TableIdentifier,
    ) -> Result<Option<SchemaDescriptor>, WarehouseError> {
        // Primary-key lookups on a missing table fail on this warehouse
        if !self.table_exists(table).await? {
            return Ok(None);
        }

        let catalog = table.catalog.as_deref();
        let schema = table.schema.as_deref();

        let primary_keys: HashSet<String> = self
            .connection
            .list_primary_keys(catalog, schema, &table.name)
            .await?
            .into_iter()
            .filter(|row| self.accepts(row, table))
            .map(|row| row.column_name)
            .collect();

        let columns: Vec<ColumnDescriptor> = self
            .connection
            .list_columns(catalog, schema, &table.name)
            .await?
            .into_iter()
            .filter(|row| self.accepts(row, table))
            .map(|row| {
                let is_primary_key = primary_keys.contains(&row.column_name);
                column_from_row(row, is_primary_key)
            })
            .collect();

        if columns.is_empty() {
            return Ok(None);
        }
        Ok(Some(SchemaDescriptor::new(columns)))
    }
}

fn same_name(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

fn column_from_row(row: ColumnRow, is_primary_key: bool) -> ColumnDescriptor {
    let sql_type = SqlType::from_type_name(&row.type_name);
    let mut column = ColumnDescriptor::generic(
        &row.column_name,
        sql_type,
        &row.type_name,
        row.column_size,
        row.decimal_digits,
    );
    column.char_octet_length = row.char_octet_length;
    column.not_null = !row.nullable;
    column.is_primary_key = is_primary_key;
    column
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::{PrimaryKeyRow, TableRow};
    use async_trait::async_trait;

    /// Session on `main.default` whose metadata listings ignore the filters, like a
    /// pattern search that also matches other catalogs.
    struct StubConnection {
        tables: Vec<TableRow>,
        columns: Vec<ColumnRow>,
        primary_keys: Vec<PrimaryKeyRow>,
    }

    #[async_trait]
    impl WarehouseConnection for StubConnection {
        fn active_catalog(&self) -> &str {
            "main"
        }

        fn active_schema(&self) -> &str {
            "default"
        }

        async fn execute(&self, _sql: &str) -> Result<(), WarehouseError> {
            Ok(())
        }

        async fn execute_update(&self, _sql: &str) -> Result<u64, WarehouseError> {
            Ok(0)
        }

        async fn commit(&self) -> Result<(), WarehouseError> {
            Ok(())
        }

        async fn rollback(&self) -> Result<(), WarehouseError> {
            Ok(())
        }

        async fn list_tables(
            &self,
            _catalog: Option<&str>,
            _schema: Option<&str>,
            table: &str,
        ) -> Result<Vec<TableRow>, WarehouseError> {
            Ok(self
                .tables
                .iter()
                .filter(|t| t.name == table)
                .cloned()
                .collect())
        }

        async fn list_columns(
            &self,
            _catalog: Option<&str>,
            _schema: Option<&str>,
            table: &str,
        ) -> Result<Vec<ColumnRow>, WarehouseError> {
            Ok(self
                .columns
                .iter()
                .filter(|c| c.table == table)
                .cloned()
                .collect())
        }

        async fn list_primary_keys(
            &self,
            _catalog: Option<&str>,
            _schema: Option<&str>,
            table: &str,
        ) -> Result<Vec<PrimaryKeyRow>, WarehouseError> {
            Ok(self
                .primary_keys
                .iter()
                .filter(|k| k.table == table)
                .cloned()
                .collect())
        }
    }

    fn table_row(catalog: &str, schema: &str, name: &str) -> TableRow {
        TableRow {
            catalog: catalog.to_string(),
            schema: schema.to_string(),
            name: name.to_string(),
        }
    }

    fn column_row(catalog: &str, table: &str, name: &str, type_name: &str) -> ColumnRow {
        ColumnRow {
            catalog: catalog.to_string(),
            schema: "default".to_string(),
            table: table.to_string(),
            column_name: name.to_string(),
            type_name: type_name.to_string(),
            column_size: 0,
            decimal_digits: None,
            char_octet_length: 0,
            nullable: true,
        }
    }

    fn stub() -> StubConnection {
        StubConnection {
            tables: vec![
                table_row("MAIN", "Default", "events"),
                table_row("other", "default", "orders"),
                table_row("main", "staging", "orders"),
            ],
            columns: vec![
                column_row("main", "events", "id", "BIGINT"),
                column_row("other", "events", "leaked", "STRING"),
                ColumnRow {
                    column_size: 10,
                    decimal_digits: Some(2),
                    nullable: false,
                    ..column_row("main", "events", "amount", "DECIMAL")
                },
            ],
            primary_keys: vec![
                PrimaryKeyRow {
                    catalog: "main".to_string(),
                    schema: "default".to_string(),
                    table: "events".to_string(),
                    column_name: "id".to_string(),
                },
                PrimaryKeyRow {
                    catalog: "other".to_string(),
                    schema: "default".to_string(),
                    table: "events".to_string(),
                    column_name: "amount".to_string(),
                },
            ],
        }
    }

    #[tokio::test]
    async fn test_table_exists_in_active_scope() {
        let conn = stub();
        let inspector = TableMetadataInspector::new(&conn);

        assert!(inspector
            .table_exists(&TableIdentifier::unqualified("events"))
            .await
            .unwrap());
        assert!(inspector
            .table_exists(&TableIdentifier::qualified("main", "default", "events"))
            .await
            .unwrap());
        assert!(!inspector
            .table_exists(&TableIdentifier::unqualified("missing"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_tables_outside_active_scope_are_ignored() {
        let conn = stub();
        let inspector = TableMetadataInspector::new(&conn);

        // "orders" exists only in other.default and main.staging
        assert!(!inspector
            .table_exists(&TableIdentifier::unqualified("orders"))
            .await
            .unwrap());
        assert!(!inspector
            .table_exists(&TableIdentifier::qualified("other", "default", "orders"))
            .await
            .unwrap());
        assert!(!inspector
            .table_exists(&TableIdentifier::qualified("main", "staging", "orders"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_schema_from_existing() {
        let conn = stub();
        let inspector = TableMetadataInspector::new(&conn);

        let schema = inspector
            .schema_from_existing(&TableIdentifier::unqualified("events"))
            .await
            .unwrap()
            .unwrap();

        let names: Vec<&str> = schema.column_names().collect();
        assert_eq!(names, vec!["id", "amount"]);

        let id = &schema.columns()[0];
        assert!(id.is_primary_key);
        assert_eq!(id.simple_type_name, "BIGINT");

        let amount = &schema.columns()[1];
        assert!(!amount.is_primary_key);
        assert!(amount.not_null);
        assert_eq!(amount.sql_type, SqlType::Decimal);
        assert_eq!(amount.size, 10);
        assert_eq!(amount.decimal_digits, Some(2));
    }

    #[tokio::test]
    async fn test_schema_of_missing_table_is_none() {
        let conn = stub();
        let inspector = TableMetadataInspector::new(&conn);
        assert!(inspector
            .schema_from_existing(&TableIdentifier::unqualified("orders"))
            .await
            .unwrap()
            .is_none());
    }
}
