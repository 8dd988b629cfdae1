use std::error::Error as StdError;

use thiserror::Error;

/// Failure talking to a remote API or moving bytes around.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{method} {url} returned {status}: {message}")]
    Status {
        method: String,
        url: String,
        status: u16,
        message: String,
    },

    #[error("object store operation failed: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("staging volume {0} does not exist")]
    VolumeNotFound(String),

    #[error("invalid object path: {0}")]
    InvalidPath(String),

    #[error("local file access failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure reported by (or while talking to) the warehouse SQL endpoint.
#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("statement failed [{code}]: {message}")]
    Statement {
        code: String,
        message: String,
        sql: String,
    },

    #[error("statement {statement_id} ended in state {state}")]
    UnexpectedState { statement_id: String, state: String },

    #[error("malformed warehouse response: {0}")]
    Protocol(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl From<reqwest::Error> for WarehouseError {
    fn from(e: reqwest::Error) -> Self {
        WarehouseError::Transport(TransportError::Http(e))
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("transport failed: {0}")]
    Transport(#[from] TransportError),

    #[error("warehouse execution failed: {0}")]
    Warehouse(#[from] WarehouseError),

    #[error("local file write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("loading staged file {path} failed")]
    StagedFile {
        path: String,
        cleanup_attempted: bool,
        #[source]
        source: Box<LoadError>,
    },

    #[error("load task aborted: {0}")]
    TaskAborted(String),

    #[error("pipeline is closed")]
    Closed,
}

impl LoadError {
    /// Deepest error in the `source()` chain.
    pub fn root_cause(&self) -> &(dyn StdError + 'static) {
        let mut current: &(dyn StdError + 'static) = self;
        while let Some(next) = current.source() {
            current = next;
        }
        current
    }

    /// Whether staged-object cleanup already ran for this failure.
    pub fn cleanup_attempted(&self) -> bool {
        matches!(
            self,
            LoadError::StagedFile {
                cleanup_attempted: true,
                ..
            }
        )
    }
}
