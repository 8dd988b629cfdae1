//! Upload-then-COPY execution of flushed batch files.
//!
//! Each flushed file becomes one spawned task that uploads the file to a fresh path in
//! the transaction's staging volume and then loads it with `COPY INTO` over its own
//! warehouse session. Tasks for different files run concurrently and may finish in any
//! order; inside a task the load never starts before the upload has succeeded.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::types::{SchemaDescriptor, TableIdentifier};
use super::writer::LocalBatch;
use crate::error::{LoadError, WarehouseError};
use crate::sql::{build_copy_into, FileFormat};
use crate::staging::{StageCleanup, StagingClient, TransactionContext};
use crate::warehouse::{WarehouseConnection, WarehouseConnector};

pub const DEFAULT_MAX_CONCURRENT_UPLOADS: usize = 8;
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub format: FileFormat,
    pub cleanup: StageCleanup,
    /// Uploads in flight at once. Submission never waits on this.
    pub max_concurrent_uploads: usize,
    /// How long `close()` lets running tasks finish before aborting them.
    pub shutdown_grace: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            format: FileFormat::default(),
            cleanup: StageCleanup::default(),
            max_concurrent_uploads: DEFAULT_MAX_CONCURRENT_UPLOADS,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

/// Totals reported by `finish()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub files: u64,
    pub rows: u64,
}

/// State every task of one pipeline reads.
struct UnitShared {
    client: Arc<dyn StagingClient>,
    connector: Arc<dyn WarehouseConnector>,
    table: TableIdentifier,
    schema: SchemaDescriptor,
    format: FileFormat,
    cleanup: StageCleanup,
    uploads: Semaphore,
}

/// One flushed file on its way to the destination table.
struct PendingUnit {
    staged_path: String,
    batch: LocalBatch,
}

pub struct LoadPipeline {
    context: TransactionContext,
    client: Arc<dyn StagingClient>,
    connector: Arc<dyn WarehouseConnector>,
    options: PipelineOptions,
    shared: Option<Arc<UnitShared>>,
    connection: Option<Box<dyn WarehouseConnection>>,
    tasks: JoinSet<Result<u64, LoadError>>,
    submitted: LoadSummary,
    closed: bool,
}

impl fmt::Debug for LoadPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadPipeline")
            .field("volume", &self.context.volume().full_name())
            .field("in_flight", &self.tasks.len())
            .field("submitted", &self.submitted)
            .field("closed", &self.closed)
            .finish()
    }
}

impl LoadPipeline {
    pub fn new(
        context: TransactionContext,
        client: Arc<dyn StagingClient>,
        connector: Arc<dyn WarehouseConnector>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            context,
            client,
            connector,
            options,
            shared: None,
            connection: None,
            tasks: JoinSet::new(),
            submitted: LoadSummary::default(),
            closed: false,
        }
    }

    /// Fix the COPY target and open the session held for the pipeline's lifetime.
    pub async fn prepare(
        &mut self,
        table: TableIdentifier,
        schema: SchemaDescriptor,
    ) -> Result<(), LoadError> {
        if self.closed {
            return Err(LoadError::Closed);
        }
        self.connection = Some(self.connector.connect().await?);
        self.shared = Some(Arc::new(UnitShared {
            client: self.client.clone(),
            connector: self.connector.clone(),
            table,
            schema,
            format: self.options.format.clone(),
            cleanup: self.options.cleanup,
            uploads: Semaphore::new(self.options.max_concurrent_uploads.max(1)),
        }));
        Ok(())
    }

    /// Hand a closed batch file to a background task; returns its staged path.
    pub fn submit(&mut self, batch: LocalBatch) -> Result<String, LoadError> {
        if self.closed {
            return Err(LoadError::Closed);
        }
        let shared = self
            .shared
            .clone()
            .ok_or_else(|| LoadError::Config("pipeline used before prepare".to_string()))?;

        let staged_path = self.context.next_file_path();
        self.submitted.files += 1;
        self.submitted.rows += batch.rows;

        let unit = PendingUnit {
            staged_path: staged_path.clone(),
            batch,
        };
        self.tasks.spawn(run_unit(shared, unit));
        Ok(staged_path)
    }

    pub fn format(&self) -> &FileFormat {
        &self.options.format
    }

    /// Tasks submitted and not yet collected.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    pub fn submitted(&self) -> LoadSummary {
        self.submitted
    }

    /// Await every task. The first failure wins, but the rest are still awaited so
    /// their cleanup settles before this returns.
    pub async fn finish(&mut self) -> Result<LoadSummary, LoadError> {
        let mut first_error: Option<LoadError> = None;
        let mut copied_rows = 0u64;

        while let Some(joined) = self.tasks.join_next().await {
            let outcome = joined
                .map_err(|e| LoadError::TaskAborted(e.to_string()))
                .and_then(|result| result);
            match outcome {
                Ok(rows) => copied_rows += rows,
                Err(e) if first_error.is_none() => first_error = Some(e),
                Err(e) => warn!("Additional load failure: {}", e),
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        debug!("Warehouse reported {} copied rows", copied_rows);
        info!(
            "Loaded {} files. ({} rows)",
            self.submitted.files, self.submitted.rows
        );
        Ok(self.submitted)
    }

    /// Stop accepting work, give running tasks the grace period, abort the rest and
    /// release the session. Safe to call more than once and after a failed `finish()`.
    pub async fn close(&mut self) {
        self.closed = true;

        if !self.tasks.is_empty() {
            let grace = self.options.shutdown_grace;
            let tasks = &mut self.tasks;
            let drained = tokio::time::timeout(grace, async {
                while let Some(joined) = tasks.join_next().await {
                    match joined {
                        Ok(Err(e)) => warn!("Load task failed during shutdown: {}", e),
                        Err(e) => warn!("Load task ended abnormally during shutdown: {}", e),
                        Ok(Ok(_)) => {}
                    }
                }
            })
            .await;

            if drained.is_err() {
                warn!(
                    "Abandoning {} load tasks still running after {:?}",
                    self.tasks.len(),
                    grace
                );
                self.tasks.abort_all();
                while self.tasks.join_next().await.is_some() {}
            }
        }

        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.close().await {
                warn!("Failed to close warehouse session: {}", e);
            }
        }
    }
}

async fn run_unit(shared: Arc<UnitShared>, unit: PendingUnit) -> Result<u64, LoadError> {
    let PendingUnit { staged_path, batch } = unit;

    match upload_and_copy(&shared, &staged_path, batch).await {
        Ok(rows) => Ok(rows),
        Err(source) => {
            let cleanup_attempted = shared.cleanup.on_error();
            if cleanup_attempted {
                if let Err(e) = shared.client.delete_file(&staged_path).await {
                    warn!("Failed to delete staged file {}: {}", staged_path, e);
                }
            }
            Err(LoadError::StagedFile {
                path: staged_path,
                cleanup_attempted,
                source: Box::new(source),
            })
        }
    }
}

async fn upload_and_copy(
    shared: &UnitShared,
    staged_path: &str,
    batch: LocalBatch,
) -> Result<u64, LoadError> {
    let line_breaks = batch.line_breaks;
    upload(shared, staged_path, batch).await?;

    info!("Running COPY from file {}", staged_path);
    let start = Instant::now();
    let rows = copy(shared, staged_path, line_breaks).await?;
    info!(
        "Loaded file {} ({:.2} seconds for COPY)",
        staged_path,
        start.elapsed().as_secs_f64()
    );

    if shared.cleanup.on_success() {
        shared.client.delete_file(staged_path).await?;
    }
    Ok(rows)
}

/// The local file goes away with `batch` on every exit path.
async fn upload(shared: &UnitShared, staged_path: &str, batch: LocalBatch) -> Result<(), LoadError> {
    let _permit = shared.uploads.acquire().await.map_err(|_| LoadError::Closed)?;

    info!(
        "Uploading file {} to managed volume ({} bytes {} rows)",
        staged_path, batch.bytes, batch.rows
    );
    let start = Instant::now();
    shared.client.upload_file(staged_path, &batch.path).await?;
    info!(
        "Uploaded file {} ({:.2} seconds)",
        staged_path,
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

async fn copy(shared: &UnitShared, staged_path: &str, line_breaks: bool) -> Result<u64, LoadError> {
    let sql = if line_breaks && !shared.format.multi_line {
        let format = FileFormat {
            multi_line: true,
            ..shared.format.clone()
        };
        build_copy_into(&shared.table, staged_path, &shared.schema, &format)
    } else {
        build_copy_into(&shared.table, staged_path, &shared.schema, &shared.format)
    };
    debug!("{}", sql);

    let connection = shared.connector.connect().await?;
    let result: Result<u64, WarehouseError> = async {
        let rows = connection.execute_update(&sql).await?;
        connection.commit().await?;
        Ok(rows)
    }
    .await;

    if let Err(e) = connection.close().await {
        warn!("Failed to close warehouse session: {}", e);
    }
    Ok(result?)
}
