#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use stageload::bulkload::{ColumnDescriptor, SchemaDescriptor};
use stageload::error::{TransportError, WarehouseError};
use stageload::staging::{ObjectStoreStaging, StagingClient};
use stageload::warehouse::{
    ColumnRow, PrimaryKeyRow, TableRow, WarehouseConnection, WarehouseConnector,
};

pub const CATALOG: &str = "main";
pub const SCHEMA: &str = "default";

/// Ordered record of everything the fakes were asked to do.
pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn new_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn snapshot(log: &EventLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

fn record(log: &EventLog, event: String) {
    log.lock().unwrap().push(event);
}

/// In-memory staging that logs each call into the shared event log.
#[derive(Debug)]
pub struct RecordingStaging {
    pub inner: ObjectStoreStaging,
    events: EventLog,
}

impl RecordingStaging {
    pub fn new(events: EventLog) -> Self {
        Self {
            inner: ObjectStoreStaging::in_memory(),
            events,
        }
    }
}

#[async_trait]
impl StagingClient for RecordingStaging {
    async fn create_volume(
        &self,
        catalog: &str,
        schema: &str,
        name: &str,
    ) -> Result<(), TransportError> {
        self.inner.create_volume(catalog, schema, name).await?;
        record(
            &self.events,
            format!("CREATE VOLUME {}.{}.{}", catalog, schema, name),
        );
        Ok(())
    }

    async fn delete_volume(&self, full_name: &str) -> Result<(), TransportError> {
        self.inner.delete_volume(full_name).await?;
        record(&self.events, format!("DELETE VOLUME {}", full_name));
        Ok(())
    }

    async fn list_volumes(
        &self,
        catalog: &str,
        schema: &str,
    ) -> Result<Vec<String>, TransportError> {
        self.inner.list_volumes(catalog, schema).await
    }

    async fn upload_file(&self, path: &str, local: &Path) -> Result<(), TransportError> {
        self.inner.upload_file(path, local).await?;
        record(&self.events, format!("UPLOAD {}", path));
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<(), TransportError> {
        self.inner.delete_file(path).await?;
        record(&self.events, format!("DELETE FILE {}", path));
        Ok(())
    }

    async fn list_files(&self, directory: &str) -> Result<Vec<String>, TransportError> {
        self.inner.list_files(directory).await
    }
}

/// Warehouse stand-in: logs statements, serves canned metadata and fails statements
/// containing any configured marker.
#[derive(Debug, Clone)]
pub struct FakeWarehouse {
    events: EventLog,
    fail_on: Vec<String>,
    tables: Vec<TableRow>,
    columns: Vec<ColumnRow>,
    primary_keys: Vec<PrimaryKeyRow>,
    statement_delay: Duration,
    open_sessions: Arc<AtomicUsize>,
}

impl FakeWarehouse {
    pub fn new(events: EventLog) -> Self {
        Self {
            events,
            fail_on: Vec::new(),
            tables: Vec::new(),
            columns: Vec::new(),
            primary_keys: Vec::new(),
            statement_delay: Duration::ZERO,
            open_sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn fail_on(mut self, marker: &str) -> Self {
        self.fail_on.push(marker.to_string());
        self
    }

    pub fn statement_delay(mut self, delay: Duration) -> Self {
        self.statement_delay = delay;
        self
    }

    /// Register an existing table in the active catalog/schema.
    pub fn with_table(mut self, name: &str, columns: &[(&str, &str)], primary_keys: &[&str]) -> Self {
        self.tables.push(TableRow {
            catalog: CATALOG.to_string(),
            schema: SCHEMA.to_string(),
            name: name.to_string(),
        });
        for (column, type_name) in columns {
            self.columns.push(ColumnRow {
                catalog: CATALOG.to_string(),
                schema: SCHEMA.to_string(),
                table: name.to_string(),
                column_name: column.to_string(),
                type_name: type_name.to_string(),
                column_size: 0,
                decimal_digits: None,
                char_octet_length: 0,
                nullable: true,
            });
        }
        for key in primary_keys {
            self.primary_keys.push(PrimaryKeyRow {
                catalog: CATALOG.to_string(),
                schema: SCHEMA.to_string(),
                table: name.to_string(),
                column_name: key.to_string(),
            });
        }
        self
    }

    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WarehouseConnector for FakeWarehouse {
    async fn connect(&self) -> Result<Box<dyn WarehouseConnection>, WarehouseError> {
        self.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            warehouse: self.clone(),
        }))
    }
}

struct FakeSession {
    warehouse: FakeWarehouse,
}

impl FakeSession {
    async fn run(&self, sql: &str) -> Result<u64, WarehouseError> {
        if !self.warehouse.statement_delay.is_zero() {
            tokio::time::sleep(self.warehouse.statement_delay).await;
        }
        record(&self.warehouse.events, sql.to_string());
        if self.warehouse.fail_on.iter().any(|m| sql.contains(m.as_str())) {
            return Err(WarehouseError::Statement {
                code: "INJECTED_FAILURE".to_string(),
                message: "statement rejected".to_string(),
                sql: sql.to_string(),
            });
        }
        Ok(1)
    }
}

#[async_trait]
impl WarehouseConnection for FakeSession {
    fn active_catalog(&self) -> &str {
        CATALOG
    }

    fn active_schema(&self) -> &str {
        SCHEMA
    }

    async fn execute(&self, sql: &str) -> Result<(), WarehouseError> {
        self.run(sql).await.map(|_| ())
    }

    async fn execute_update(&self, sql: &str) -> Result<u64, WarehouseError> {
        self.run(sql).await
    }

    async fn commit(&self) -> Result<(), WarehouseError> {
        record(&self.warehouse.events, "COMMIT".to_string());
        Ok(())
    }

    async fn rollback(&self) -> Result<(), WarehouseError> {
        record(&self.warehouse.events, "ROLLBACK".to_string());
        Ok(())
    }

    async fn list_tables(
        &self,
        _catalog: Option<&str>,
        _schema: Option<&str>,
        table: &str,
    ) -> Result<Vec<TableRow>, WarehouseError> {
        Ok(self
            .warehouse
            .tables
            .iter()
            .filter(|t| t.name.eq_ignore_ascii_case(table))
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
            .warehouse
            .columns
            .iter()
            .filter(|c| c.table.eq_ignore_ascii_case(table))
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
            .warehouse
            .primary_keys
            .iter()
            .filter(|k| k.table.eq_ignore_ascii_case(table))
            .cloned()
            .collect())
    }

    async fn close(&self) -> Result<(), WarehouseError> {
        self.warehouse.open_sessions.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Input schema of declared columns.
pub fn declared_schema(columns: &[(&str, &str)]) -> SchemaDescriptor {
    SchemaDescriptor::new(
        columns
            .iter()
            .map(|(name, type_name)| ColumnDescriptor::declared(name, type_name))
            .collect(),
    )
}

/// `count` rows of `(id, "name-<id>")`.
pub fn numbered_rows(count: usize) -> Vec<Vec<Option<String>>> {
    (0..count)
        .map(|i| vec![Some(i.to_string()), Some(format!("name-{}", i))])
        .collect()
}

/// Staged paths in upload order.
pub fn uploaded_paths(events: &[String]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| e.strip_prefix("UPLOAD "))
        .map(str::to_string)
        .collect()
}

pub fn position(events: &[String], predicate: impl Fn(&str) -> bool) -> Option<usize> {
    events.iter().position(|e| predicate(e))
}
