// src/staging/mod.rs
use async_trait::async_trait;
use chrono::Utc;
use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{LoadError, TransportError};

pub mod store;

pub use store::ObjectStoreStaging;

/// Warehouse-side file staging API. Every call is independent; no batching.
#[async_trait]
pub trait StagingClient: Debug + Send + Sync {
    // Volume lifecycle
    async fn create_volume(
        &self,
        catalog: &str,
        schema: &str,
        name: &str,
    ) -> Result<(), TransportError>;
    /// `full_name` is `catalog.schema.volume`.
    async fn delete_volume(&self, full_name: &str) -> Result<(), TransportError>;
    async fn list_volumes(&self, catalog: &str, schema: &str)
        -> Result<Vec<String>, TransportError>;

    // Object operations, on `/Volumes/...` paths
    async fn upload_file(&self, path: &str, local: &Path) -> Result<(), TransportError>;
    async fn delete_file(&self, path: &str) -> Result<(), TransportError>;
    async fn list_files(&self, directory: &str) -> Result<Vec<String>, TransportError>;
}

/// Timestamp, marker and a random 128-bit hex suffix; valid as a Unity Catalog name.
///
/// See <https://docs.databricks.com/en/sql/language-manual/sql-ref-names.html>.
pub fn unique_object_name() -> String {
    format!(
        "{}_stage_{}",
        Utc::now().format("%Y%m%d%H%M%S"),
        uuid::Uuid::new_v4().simple()
    )
}

/// `/Volumes/<catalog>/<schema>/<volume>/<file>`
pub fn volume_file_path(catalog: &str, schema: &str, volume: &str, file: &str) -> String {
    format!("/Volumes/{}/{}/{}/{}", catalog, schema, volume, file)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingVolume {
    pub catalog: String,
    pub schema: String,
    pub name: String,
}

impl StagingVolume {
    pub fn full_name(&self) -> String {
        format!("{}.{}.{}", self.catalog, self.schema, self.name)
    }

    pub fn directory(&self) -> String {
        format!("/Volumes/{}/{}/{}", self.catalog, self.schema, self.name)
    }

    pub fn file_path(&self, file: &str) -> String {
        volume_file_path(&self.catalog, &self.schema, &self.name, file)
    }
}

/// Per-transaction state threaded through every pipeline. Owns the volume name.
#[derive(Debug, Clone)]
pub struct TransactionContext {
    volume: Arc<StagingVolume>,
}

impl TransactionContext {
    pub fn new(volume: StagingVolume) -> Self {
        Self {
            volume: Arc::new(volume),
        }
    }

    pub fn volume(&self) -> &StagingVolume {
        &self.volume
    }

    /// Fresh object path inside the transaction's volume; never reused.
    pub fn next_file_path(&self) -> String {
        self.volume.file_path(&unique_object_name())
    }
}

/// When staged data is removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageCleanup {
    pub delete_stage: bool,
    pub delete_stage_on_error: bool,
}

impl StageCleanup {
    pub fn on_success(&self) -> bool {
        self.delete_stage
    }

    pub fn on_error(&self) -> bool {
        self.delete_stage && self.delete_stage_on_error
    }
}

/// Creates and removes the one staging volume of a load transaction.
#[derive(Debug, Clone)]
pub struct StagingVolumeManager {
    client: Arc<dyn StagingClient>,
    prefix: String,
    cleanup: StageCleanup,
}

impl StagingVolumeManager {
    pub fn new(client: Arc<dyn StagingClient>, prefix: &str, cleanup: StageCleanup) -> Self {
        Self {
            client,
            prefix: prefix.to_string(),
            cleanup,
        }
    }

    pub fn client(&self) -> Arc<dyn StagingClient> {
        self.client.clone()
    }

    pub fn cleanup(&self) -> StageCleanup {
        self.cleanup
    }

    pub async fn create_volume(
        &self,
        catalog: &str,
        schema: &str,
        name: &str,
    ) -> Result<(), TransportError> {
        info!("Creating staging volume {}.{}.{}", catalog, schema, name);
        self.client.create_volume(catalog, schema, name).await
    }

    pub async fn delete_volume(
        &self,
        catalog: &str,
        schema: &str,
        name: &str,
    ) -> Result<(), TransportError> {
        let full_name = format!("{}.{}.{}", catalog, schema, name);
        info!("Deleting staging volume {}", full_name);
        self.client.delete_volume(&full_name).await
    }

    /// Create the transaction's volume and hand back the context that owns its name.
    pub async fn begin(&self, catalog: &str, schema: &str) -> Result<TransactionContext, LoadError> {
        let volume = StagingVolume {
            catalog: catalog.to_string(),
            schema: schema.to_string(),
            name: format!("{}{}", self.prefix, unique_object_name()),
        };
        self.create_volume(&volume.catalog, &volume.schema, &volume.name)
            .await?;
        Ok(TransactionContext::new(volume))
    }

    /// Success path. A failed delete is logged; the data is already loaded.
    pub async fn complete(&self, context: &TransactionContext) {
        if self.cleanup.on_success() {
            self.delete_quietly(context.volume()).await;
        }
    }

    /// Failure path. Never masks the failure that triggered it.
    pub async fn abort(&self, context: &TransactionContext) {
        if self.cleanup.on_error() {
            self.delete_quietly(context.volume()).await;
        } else {
            info!(
                "Leaving staging volume {} in place for inspection",
                context.volume().full_name()
            );
        }
    }

    async fn delete_quietly(&self, volume: &StagingVolume) {
        if let Err(e) = self
            .delete_volume(&volume.catalog, &volume.schema, &volume.name)
            .await
        {
            warn!("Failed to delete staging volume {}: {}", volume.full_name(), e);
        }
    }
}
