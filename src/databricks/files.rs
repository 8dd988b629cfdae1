use std::path::Path;

use async_trait::async_trait;
use reqwest::{Body, Method};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

use super::ApiClient;
use crate::error::TransportError;
use crate::staging::StagingClient;

const VOLUMES_API: &str = "api/2.1/unity-catalog/volumes";
const FILES_API: &str = "api/2.0/fs/files";
const DIRECTORIES_API: &str = "api/2.0/fs/directories";
const NO_SEGMENTS: [&str; 0] = [];

#[derive(Debug, Serialize)]
struct CreateVolumeRequest<'a> {
    catalog_name: &'a str,
    schema_name: &'a str,
    name: &'a str,
    volume_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct VolumeInfo {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ListVolumesResponse {
    #[serde(default)]
    volumes: Vec<VolumeInfo>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DirectoryEntry {
    path: String,
    #[serde(default)]
    is_directory: bool,
}

#[derive(Debug, Deserialize)]
struct ListDirectoryResponse {
    #[serde(default)]
    contents: Vec<DirectoryEntry>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Staging through Unity Catalog managed volumes and the Files API.
#[derive(Debug, Clone)]
pub struct DatabricksFiles {
    api: ApiClient,
}

impl DatabricksFiles {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    fn volume_path_segments(path: &str) -> Result<Vec<&str>, TransportError> {
        if !path.starts_with("/Volumes/") {
            return Err(TransportError::InvalidPath(path.to_string()));
        }
        Ok(path.split('/').filter(|s| !s.is_empty()).collect())
    }
}

#[async_trait]
impl StagingClient for DatabricksFiles {
    async fn create_volume(
        &self,
        catalog: &str,
        schema: &str,
        name: &str,
    ) -> Result<(), TransportError> {
        let url = self.api.endpoint(VOLUMES_API, NO_SEGMENTS)?;
        let request = self
            .api
            .request(Method::POST, url)
            .await?
            .json(&CreateVolumeRequest {
                catalog_name: catalog,
                schema_name: schema,
                name,
                volume_type: "MANAGED",
            });
        self.api.send("POST", request).await?;
        Ok(())
    }

    async fn delete_volume(&self, full_name: &str) -> Result<(), TransportError> {
        let url = self.api.endpoint(VOLUMES_API, [full_name])?;
        let request = self.api.request(Method::DELETE, url).await?;
        self.api.send("DELETE", request).await?;
        Ok(())
    }

    async fn list_volumes(
        &self,
        catalog: &str,
        schema: &str,
    ) -> Result<Vec<String>, TransportError> {
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut url = self.api.endpoint(VOLUMES_API, NO_SEGMENTS)?;
            {
                let mut query = url.query_pairs_mut();
                query
                    .append_pair("catalog_name", catalog)
                    .append_pair("schema_name", schema);
                if let Some(token) = &page_token {
                    query.append_pair("page_token", token);
                }
            }
            let request = self.api.request(Method::GET, url).await?;
            let page: ListVolumesResponse = self.api.send("GET", request).await?.json().await?;

            names.extend(page.volumes.into_iter().map(|v| v.name));
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(names)
    }

    async fn upload_file(&self, path: &str, local: &Path) -> Result<(), TransportError> {
        let mut url = self
            .api
            .endpoint(FILES_API, Self::volume_path_segments(path)?)?;
        url.query_pairs_mut().append_pair("overwrite", "true");

        let file = tokio::fs::File::open(local).await?;
        let length = file.metadata().await?.len();
        let body = Body::wrap_stream(ReaderStream::new(file));

        let request = self
            .api
            .request(Method::PUT, url)
            .await?
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .header(reqwest::header::CONTENT_LENGTH, length)
            .body(body);
        self.api.send("PUT", request).await?;
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<(), TransportError> {
        let url = self
            .api
            .endpoint(FILES_API, Self::volume_path_segments(path)?)?;
        let request = self.api.request(Method::DELETE, url).await?;
        self.api.send("DELETE", request).await?;
        Ok(())
    }

    async fn list_files(&self, directory: &str) -> Result<Vec<String>, TransportError> {
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut url = self
                .api
                .endpoint(DIRECTORIES_API, Self::volume_path_segments(directory)?)?;
            if let Some(token) = &page_token {
                url.query_pairs_mut().append_pair("page_token", token);
            }
            let request = self.api.request(Method::GET, url).await?;
            let page: ListDirectoryResponse = self.api.send("GET", request).await?.json().await?;

            files.extend(
                page.contents
                    .into_iter()
                    .filter(|entry| !entry.is_directory)
                    .map(|entry| entry.path),
            );
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        files.sort();
        Ok(files)
    }
}
