//! Staged bulk loading: local batch files, upload + COPY pipeline, and the
//! transaction that publishes intermediate tables into the destination.

pub mod batch_insert;
pub mod collect;
pub mod metadata;
pub mod pipeline;
pub mod transaction;
pub mod types;
pub mod writer;

pub use batch_insert::StagedBatchInsert;
pub use collect::{collect_insert, collect_merge};
pub use metadata::TableMetadataInspector;
pub use pipeline::{LoadPipeline, LoadSummary, PipelineOptions};
pub use transaction::{BulkLoader, LoadMode, LoadOptions, LoadTransaction};
pub use types::{ColumnDescriptor, MergeSpec, SchemaDescriptor, SqlType, TableIdentifier};
pub use writer::{BatchFileWriter, LocalBatch};
