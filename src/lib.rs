pub mod bulkload;
pub mod config;
pub mod databricks;
pub mod error;
pub mod sql;
pub mod staging;
pub mod warehouse;

pub use bulkload::{BulkLoader, LoadMode, LoadOptions};
pub use error::{LoadError, TransportError, WarehouseError};
