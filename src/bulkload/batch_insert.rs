use std::path::Path;

use super::pipeline::{LoadPipeline, LoadSummary};
use super::types::{SchemaDescriptor, TableIdentifier};
use super::writer::BatchFileWriter;
use crate::error::LoadError;

/// Per-task load lifecycle: `prepare`, rows interleaved with `flush`, one `finish`,
/// and `close` on every path.
#[derive(Debug)]
pub struct StagedBatchInsert {
    writer: BatchFileWriter,
    pipeline: LoadPipeline,
    total_rows: u64,
}

impl StagedBatchInsert {
    pub fn new(
        temp_dir: &Path,
        columns: usize,
        batch_rows: u64,
        pipeline: LoadPipeline,
    ) -> Result<Self, LoadError> {
        let writer =
            BatchFileWriter::new(temp_dir, pipeline.format().clone(), columns, batch_rows)?;
        Ok(Self {
            writer,
            pipeline,
            total_rows: 0,
        })
    }

    pub async fn prepare(
        &mut self,
        table: TableIdentifier,
        schema: SchemaDescriptor,
    ) -> Result<(), LoadError> {
        self.pipeline.prepare(table, schema).await
    }

    /// Buffer one row, flushing once the current file reaches the batch size.
    pub fn add_row<S: AsRef<str>>(&mut self, values: &[Option<S>]) -> Result<(), LoadError> {
        self.writer.add_row(values)?;
        self.total_rows += 1;
        if self.writer.is_full() {
            self.flush()?;
        }
        Ok(())
    }

    /// Hand the current file (if it holds any rows) to the pipeline.
    pub fn flush(&mut self) -> Result<(), LoadError> {
        if let Some(batch) = self.writer.take_batch()? {
            self.pipeline.submit(batch)?;
        }
        Ok(())
    }

    pub fn total_rows(&self) -> u64 {
        self.total_rows
    }

    /// Flush what is buffered and wait for every load to complete.
    pub async fn finish(&mut self) -> Result<LoadSummary, LoadError> {
        self.flush()?;
        self.pipeline.finish().await
    }

    pub async fn close(&mut self) {
        self.writer.close();
        self.pipeline.close().await;
    }
}
