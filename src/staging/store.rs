// src/staging/store.rs
use async_trait::async_trait;
use futures::TryStreamExt;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{path::Path as ObjectPath, ObjectStore};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::StagingClient;
use crate::error::TransportError;

type VolumeKey = (String, String, String);

/// Staging backed by any `ObjectStore`, laid out like Unity Catalog volumes
/// (`Volumes/<catalog>/<schema>/<volume>/...`). Used for local runs and tests.
#[derive(Debug)]
pub struct ObjectStoreStaging {
    store: Arc<dyn ObjectStore>,
    volumes: Mutex<BTreeSet<VolumeKey>>,
}

impl ObjectStoreStaging {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            volumes: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()))
    }

    /// Stage below a local directory, which must exist.
    pub fn local(root: &Path) -> Result<Self, TransportError> {
        let store = LocalFileSystem::new_with_prefix(root)?;
        Ok(Self::new(Arc::new(store)))
    }

    pub fn store(&self) -> Arc<dyn ObjectStore> {
        self.store.clone()
    }

    fn volume_set(&self) -> std::sync::MutexGuard<'_, BTreeSet<VolumeKey>> {
        // The set is only touched in short critical sections; recover from poisoning.
        self.volumes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn to_object_path(path: &str) -> Result<(VolumeKey, ObjectPath), TransportError> {
        // /Volumes/<catalog>/<schema>/<volume>[/<rest>]
        let trimmed = path.trim_start_matches('/');
        let parts: Vec<&str> = trimmed.split('/').collect();
        if parts.len() < 4 || parts[0] != "Volumes" || parts.iter().any(|p| p.is_empty()) {
            return Err(TransportError::InvalidPath(path.to_string()));
        }
        let key = (
            parts[1].to_string(),
            parts[2].to_string(),
            parts[3].to_string(),
        );
        Ok((key, ObjectPath::from_iter(parts)))
    }

    fn volume_prefix(key: &VolumeKey) -> ObjectPath {
        ObjectPath::from_iter(["Volumes", key.0.as_str(), key.1.as_str(), key.2.as_str()])
    }

    fn to_volume_path(location: &ObjectPath) -> String {
        let parts: Vec<String> = location
            .parts()
            .map(|part| {
                let encoded = part.as_ref().to_string();
                urlencoding::decode(&encoded)
                    .map(|decoded| decoded.into_owned())
                    .unwrap_or(encoded)
            })
            .collect();
        format!("/{}", parts.join("/"))
    }

    fn require_volume(&self, key: &VolumeKey) -> Result<(), TransportError> {
        if self.volume_set().contains(key) {
            Ok(())
        } else {
            Err(TransportError::VolumeNotFound(format!(
                "{}.{}.{}",
                key.0, key.1, key.2
            )))
        }
    }
}

#[async_trait]
impl StagingClient for ObjectStoreStaging {
    async fn create_volume(
        &self,
        catalog: &str,
        schema: &str,
        name: &str,
    ) -> Result<(), TransportError> {
        self.volume_set()
            .insert((catalog.to_string(), schema.to_string(), name.to_string()));
        Ok(())
    }

    async fn delete_volume(&self, full_name: &str) -> Result<(), TransportError> {
        let key = self
            .volume_set()
            .iter()
            .find(|(c, s, v)| format!("{}.{}.{}", c, s, v) == full_name)
            .cloned()
            .ok_or_else(|| TransportError::VolumeNotFound(full_name.to_string()))?;

        // Managed volumes take their files with them
        let prefix = Self::volume_prefix(&key);
        let objects: Vec<_> = self.store.list(Some(&prefix)).try_collect().await?;
        for obj in objects {
            self.store.delete(&obj.location).await?;
        }

        self.volume_set().remove(&key);
        Ok(())
    }

    async fn list_volumes(
        &self,
        catalog: &str,
        schema: &str,
    ) -> Result<Vec<String>, TransportError> {
        Ok(self
            .volume_set()
            .iter()
            .filter(|(c, s, _)| c == catalog && s == schema)
            .map(|(_, _, v)| v.clone())
            .collect())
    }

    async fn upload_file(&self, path: &str, local: &Path) -> Result<(), TransportError> {
        let (key, location) = Self::to_object_path(path)?;
        self.require_volume(&key)?;

        let data = tokio::fs::read(local).await?;
        self.store.put(&location, data.into()).await?;
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<(), TransportError> {
        let (_, location) = Self::to_object_path(path)?;
        self.store.delete(&location).await?;
        Ok(())
    }

    async fn list_files(&self, directory: &str) -> Result<Vec<String>, TransportError> {
        let (_, prefix) = Self::to_object_path(directory)?;
        let objects: Vec<_> = self.store.list(Some(&prefix)).try_collect().await?;
        let mut files: Vec<String> = objects
            .iter()
            .map(|obj| Self::to_volume_path(&obj.location))
            .collect();
        files.sort();
        Ok(files)
    }
}
