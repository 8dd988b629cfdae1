//! Warehouse SQL connection interface.
//!
//! The bulk-load core only needs synchronous-looking statement execution plus the three
//! catalog metadata listings below. Implementations decide how the active
//! catalog/schema are established.

use async_trait::async_trait;

use crate::error::WarehouseError;

/// A metadata row that belongs to some catalog and schema.
pub trait CatalogScoped {
    fn catalog(&self) -> &str;
    fn schema(&self) -> &str;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRow {
    pub catalog: String,
    pub schema: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRow {
    pub catalog: String,
    pub schema: String,
    pub table: String,
    pub column_name: String,
    pub type_name: String,
    pub column_size: u32,
    pub decimal_digits: Option<u32>,
    pub char_octet_length: u32,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryKeyRow {
    pub catalog: String,
    pub schema: String,
    pub table: String,
    pub column_name: String,
}

macro_rules! catalog_scoped {
    ($($row:ty),*) => {
        $(impl CatalogScoped for $row {
            fn catalog(&self) -> &str {
                &self.catalog
            }

            fn schema(&self) -> &str {
                &self.schema
            }
        })*
    };
}

catalog_scoped!(TableRow, ColumnRow, PrimaryKeyRow);

/// An open SQL session against the warehouse.
#[async_trait]
pub trait WarehouseConnection: Send + Sync {
    /// Catalog the session resolves unqualified names against.
    fn active_catalog(&self) -> &str;

    /// Schema the session resolves unqualified names against.
    fn active_schema(&self) -> &str;

    async fn execute(&self, sql: &str) -> Result<(), WarehouseError>;

    /// Execute a DML/COPY statement and return the affected row count when reported.
    async fn execute_update(&self, sql: &str) -> Result<u64, WarehouseError>;

    async fn commit(&self) -> Result<(), WarehouseError>;

    async fn rollback(&self) -> Result<(), WarehouseError>;

    /// Tables named `table`, optionally restricted by catalog/schema.
    async fn list_tables(
        &self,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: &str,
    ) -> Result<Vec<TableRow>, WarehouseError>;

    /// Columns of tables named `table`, in ordinal order.
    async fn list_columns(
        &self,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: &str,
    ) -> Result<Vec<ColumnRow>, WarehouseError>;

    async fn list_primary_keys(
        &self,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: &str,
    ) -> Result<Vec<PrimaryKeyRow>, WarehouseError>;

    async fn close(&self) -> Result<(), WarehouseError> {
        Ok(())
    }
}

/// Opens warehouse sessions. Load tasks open one session each.
#[async_trait]
pub trait WarehouseConnector: std::fmt::Debug + Send + Sync {
    async fn connect(&self) -> Result<Box<dyn WarehouseConnection>, WarehouseError>;
}
