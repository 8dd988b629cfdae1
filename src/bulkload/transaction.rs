//! One bulk load from start to finish.
//!
//! `BulkLoader::begin` creates the staging volume, resolves the destination schema and
//! sets up one intermediate table per task. Tasks load their rows through
//! `StagedBatchInsert`; `commit` moves the intermediate data into the destination in a
//! single statement sequence and `abort` tears everything down.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::batch_insert::StagedBatchInsert;
use super::collect::{collect_insert, collect_merge, run_in_transaction};
use super::metadata::TableMetadataInspector;
use super::pipeline::{LoadPipeline, LoadSummary, PipelineOptions};
use super::types::{MergeSpec, SchemaDescriptor, TableIdentifier};
use crate::error::{LoadError, WarehouseError};
use crate::sql::{build_aggregate_insert, build_create_table, build_drop_table};
use crate::staging::{StagingVolumeManager, TransactionContext};
use crate::warehouse::{WarehouseConnection, WarehouseConnector};

/// Longest table name the warehouse accepts.
const MAX_TABLE_NAME_LEN: usize = 127;
const INTERMEDIATE_MARKER: &str = "_bl_tmp";
const SUFFIX_ALPHABET: [char; 36] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h',
    'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z',
];

/// How loaded rows reach the destination table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LoadMode {
    /// COPY into intermediate tables, then one `INSERT ... UNION ALL`.
    #[default]
    Insert,
    /// COPY straight into the destination.
    InsertDirect,
    /// Like `Insert`, emptying the destination in the same commit step.
    TruncateInsert,
    /// Drop and recreate the destination from the input schema, then insert.
    Replace,
    /// COPY into intermediate tables, then MERGE on the merge keys.
    Merge,
}

impl LoadMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadMode::Insert => "insert",
            LoadMode::InsertDirect => "insert_direct",
            LoadMode::TruncateInsert => "truncate_insert",
            LoadMode::Replace => "replace",
            LoadMode::Merge => "merge",
        }
    }

    pub fn uses_intermediate_tables(&self) -> bool {
        !matches!(self, LoadMode::InsertDirect)
    }
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoadMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insert" => Ok(LoadMode::Insert),
            "insert_direct" => Ok(LoadMode::InsertDirect),
            "truncate_insert" => Ok(LoadMode::TruncateInsert),
            "replace" => Ok(LoadMode::Replace),
            "merge" => Ok(LoadMode::Merge),
            "merge_direct" => Err("mode 'merge_direct' is not supported, use 'merge'".to_string()),
            other => Err(format!("unknown mode '{}'", other)),
        }
    }
}

impl TryFrom<String> for LoadMode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LoadMode> for String {
    fn from(mode: LoadMode) -> Self {
        mode.as_str().to_string()
    }
}

#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub table: TableIdentifier,
    pub mode: LoadMode,
    pub merge: Option<MergeSpec>,
    /// Runs before the data becomes visible in the destination.
    pub before_load: Option<String>,
    /// Runs right after the data is in the destination, before the commit.
    pub after_load: Option<String>,
    pub batch_rows: u64,
    pub temp_dir: PathBuf,
    pub pipeline: PipelineOptions,
}

impl LoadOptions {
    pub fn new(table: TableIdentifier, mode: LoadMode) -> Self {
        Self {
            table,
            mode,
            merge: None,
            before_load: None,
            after_load: None,
            batch_rows: 100_000,
            temp_dir: std::env::temp_dir(),
            pipeline: PipelineOptions::default(),
        }
    }
}

/// Entry point for loads into one destination table.
#[derive(Debug, Clone)]
pub struct BulkLoader {
    staging: StagingVolumeManager,
    connector: Arc<dyn WarehouseConnector>,
    options: Arc<LoadOptions>,
}

impl BulkLoader {
    pub fn new(
        staging: StagingVolumeManager,
        connector: Arc<dyn WarehouseConnector>,
        mut options: LoadOptions,
    ) -> Self {
        options.pipeline.cleanup = staging.cleanup();
        Self {
            staging,
            connector,
            options: Arc::new(options),
        }
    }

    pub fn options(&self) -> &LoadOptions {
        &self.options
    }

    /// Create the staging volume and destination-side tables for `task_count` tasks.
    ///
    /// `input` lists the columns in the order rows will be supplied.
    pub async fn begin(
        &self,
        input: SchemaDescriptor,
        task_count: usize,
    ) -> Result<LoadTransaction, LoadError> {
        let options = self.options.clone();
        if options.mode == LoadMode::Merge && options.merge.is_none() {
            return Err(LoadError::Config(
                "merge mode requires merge_keys".to_string(),
            ));
        }

        let connection = self.connector.connect().await?;
        let context = match self
            .staging
            .begin(connection.active_catalog(), connection.active_schema())
            .await
        {
            Ok(context) => context,
            Err(e) => {
                close_connection(connection.as_ref()).await;
                return Err(e);
            }
        };

        let mut transaction = LoadTransaction {
            staging: self.staging.clone(),
            connector: self.connector.clone(),
            options,
            connection,
            context,
            destination_schema: SchemaDescriptor::default(),
            load_schema: SchemaDescriptor::default(),
            intermediate_schema: SchemaDescriptor::default(),
            intermediates: Vec::new(),
        };

        match transaction.setup(input, task_count).await {
            Ok(()) => Ok(transaction),
            Err(e) => {
                transaction.abort().await;
                Err(e)
            }
        }
    }

    /// Single-task load of `rows`, committed on success and aborted on failure.
    pub async fn load_rows<I>(
        &self,
        input: SchemaDescriptor,
        rows: I,
    ) -> Result<LoadSummary, LoadError>
    where
        I: IntoIterator<Item = Vec<Option<String>>>,
    {
        let transaction = self.begin(input, 1).await?;
        match transaction.run_task(0, rows).await {
            Ok(summary) => {
                transaction.commit().await?;
                Ok(summary)
            }
            Err(e) => {
                transaction.abort().await;
                Err(e)
            }
        }
    }
}

pub struct LoadTransaction {
    staging: StagingVolumeManager,
    connector: Arc<dyn WarehouseConnector>,
    options: Arc<LoadOptions>,
    connection: Box<dyn WarehouseConnection>,
    context: TransactionContext,
    /// Columns of the destination table, in table order.
    destination_schema: SchemaDescriptor,
    /// Input positions mapped onto destination columns; drives COPY.
    load_schema: SchemaDescriptor,
    /// Layout of the intermediate tables, nullable throughout.
    intermediate_schema: SchemaDescriptor,
    intermediates: Vec<TableIdentifier>,
}

impl fmt::Debug for LoadTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadTransaction")
            .field("table", &self.options.table)
            .field("mode", &self.options.mode)
            .field("volume", &self.context.volume().full_name())
            .field("intermediates", &self.intermediates)
            .finish()
    }
}

impl LoadTransaction {
    pub fn context(&self) -> &TransactionContext {
        &self.context
    }

    pub fn intermediate_tables(&self) -> &[TableIdentifier] {
        &self.intermediates
    }

    pub fn load_schema(&self) -> &SchemaDescriptor {
        &self.load_schema
    }

    async fn setup(&mut self, input: SchemaDescriptor, task_count: usize) -> Result<(), LoadError> {
        let table = self.options.table.clone();
        let mode = self.options.mode;

        let existing = if mode == LoadMode::Replace {
            None
        } else {
            TableMetadataInspector::new(self.connection.as_ref())
                .schema_from_existing(&table)
                .await?
        };

        match existing {
            Some(destination) => {
                self.load_schema = input.align_to(&destination);
                self.destination_schema = destination;
            }
            None => {
                if mode != LoadMode::Replace {
                    info!("Creating table {}", table);
                    self.execute(&build_create_table(&table, &input)).await?;
                }
                self.destination_schema = input.without_skipped();
                self.load_schema = input;
            }
        }

        if mode.uses_intermediate_tables() {
            let suffix = nanoid::nanoid!(8, &SUFFIX_ALPHABET);
            // MERGE touches only the supplied columns; INSERT ... SELECT * is positional.
            let layout = if mode == LoadMode::Merge {
                self.load_schema.without_skipped()
            } else {
                self.destination_schema.clone()
            };
            self.intermediate_schema = SchemaDescriptor::new(
                layout
                    .columns()
                    .iter()
                    .cloned()
                    .map(|mut c| {
                        c.not_null = false;
                        c
                    })
                    .collect(),
            );

            for index in 0..task_count.max(1) {
                let intermediate =
                    table.with_name(&intermediate_table_name(&table.name, &suffix, index));
                info!("Creating intermediate table {}", intermediate);
                self.execute(&build_create_table(&intermediate, &self.intermediate_schema))
                    .await?;
                self.intermediates.push(intermediate);
            }
        } else if let Some(sql) = self.options.before_load.clone() {
            run_in_transaction(self.connection.as_ref(), Some(sql.as_str()), &[], None).await?;
        }
        Ok(())
    }

    async fn execute(&self, sql: &str) -> Result<(), WarehouseError> {
        debug!("{}", sql);
        self.connection.execute(sql).await
    }

    /// COPY target of task `index`.
    pub fn task_table(&self, index: usize) -> Result<TableIdentifier, LoadError> {
        if !self.options.mode.uses_intermediate_tables() {
            return Ok(self.options.table.clone());
        }
        self.intermediates.get(index).cloned().ok_or_else(|| {
            LoadError::Config(format!(
                "task {} out of range ({} tasks)",
                index,
                self.intermediates.len()
            ))
        })
    }

    /// Writer/pipeline pair for task `index`, already prepared.
    pub async fn open_task(&self, index: usize) -> Result<StagedBatchInsert, LoadError> {
        let target = self.task_table(index)?;
        let pipeline = LoadPipeline::new(
            self.context.clone(),
            self.staging.client(),
            self.connector.clone(),
            self.options.pipeline.clone(),
        );
        let mut insert = StagedBatchInsert::new(
            &self.options.temp_dir,
            self.load_schema.len(),
            self.options.batch_rows,
            pipeline,
        )?;
        if let Err(e) = insert.prepare(target, self.load_schema.clone()).await {
            insert.close().await;
            return Err(e);
        }
        Ok(insert)
    }

    /// Load every row through task `index` and wait for its files to land.
    pub async fn run_task<I>(&self, index: usize, rows: I) -> Result<LoadSummary, LoadError>
    where
        I: IntoIterator<Item = Vec<Option<String>>>,
    {
        let mut task = self.open_task(index).await?;
        let result = async {
            for row in rows {
                task.add_row(&row)?;
            }
            task.finish().await
        }
        .await;
        task.close().await;
        result
    }

    /// Publish the loaded data, then drop intermediates and release the staging volume.
    pub async fn commit(self) -> Result<(), LoadError> {
        let result = self.publish().await;
        self.drop_intermediates().await;
        match &result {
            Ok(()) => self.staging.complete(&self.context).await,
            Err(_) => self.staging.abort(&self.context).await,
        }
        close_connection(self.connection.as_ref()).await;
        result.map_err(LoadError::from)
    }

    /// Tear down after a failure. Cleanup errors are logged, never returned.
    pub async fn abort(self) {
        self.drop_intermediates().await;
        self.staging.abort(&self.context).await;
        close_connection(self.connection.as_ref()).await;
    }

    async fn publish(&self) -> Result<(), WarehouseError> {
        let connection = self.connection.as_ref();
        let table = &self.options.table;
        let before = self.options.before_load.as_deref();
        let after = self.options.after_load.as_deref();

        info!(
            "Publishing into {} ({} mode, {} intermediate tables)",
            table,
            self.options.mode,
            self.intermediates.len()
        );
        match self.options.mode {
            LoadMode::InsertDirect => match after {
                Some(sql) => run_in_transaction(connection, None, &[], Some(sql)).await,
                None => connection.commit().await,
            },
            LoadMode::Insert => {
                collect_insert(connection, &self.intermediates, table, false, before, after).await
            }
            LoadMode::TruncateInsert => {
                collect_insert(connection, &self.intermediates, table, true, before, after).await
            }
            LoadMode::Replace => {
                let mut statements = vec![
                    build_drop_table(table),
                    build_create_table(table, &self.destination_schema),
                ];
                statements.extend(build_aggregate_insert(&self.intermediates, table));
                run_in_transaction(connection, before, &statements, after).await
            }
            LoadMode::Merge => {
                let merge = self.options.merge.as_ref().ok_or_else(|| {
                    WarehouseError::Protocol("merge mode without merge keys".to_string())
                })?;
                collect_merge(
                    connection,
                    &self.intermediates,
                    &self.intermediate_schema,
                    table,
                    merge,
                    before,
                    after,
                )
                .await
            }
        }
    }

    async fn drop_intermediates(&self) {
        for table in &self.intermediates {
            if let Err(e) = self.execute(&build_drop_table(table)).await {
                warn!("Failed to drop intermediate table {}: {}", table, e);
            }
        }
    }
}

async fn close_connection(connection: &dyn WarehouseConnection) {
    if let Err(e) = connection.close().await {
        warn!("Failed to close warehouse session: {}", e);
    }
}

/// `{table}_{suffix}_bl_tmp{NNN}`, shortening the table part to stay within the limit.
pub fn intermediate_table_name(table: &str, suffix: &str, index: usize) -> String {
    let tail = format!("_{}{}{:03}", suffix, INTERMEDIATE_MARKER, index);
    let budget = MAX_TABLE_NAME_LEN.saturating_sub(tail.chars().count());
    let head: String = table.chars().take(budget).collect();
    format!("{}{}", head, tail)
}
