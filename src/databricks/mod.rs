//! Databricks workspace REST clients.
//!
//! - Unity Catalog volumes: <https://docs.databricks.com/api/workspace/volumes>
//! - Files: <https://docs.databricks.com/api/workspace/files>
//! - SQL statement execution: <https://docs.databricks.com/api/workspace/statementexecution>

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::TransportError;

pub mod auth;
pub mod files;
pub mod statement;

pub use auth::{Credentials, TokenProvider};
pub use files::DatabricksFiles;
pub use statement::{StatementConnection, StatementConnector};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// `product_name/product_version`, sent as the User-Agent of every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAgent {
    pub product_name: String,
    pub product_version: String,
}

impl UserAgent {
    pub fn header_value(&self) -> String {
        format!("{}/{}", self.product_name, self.product_version)
    }
}

fn default_user_agent() -> String {
    format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

#[derive(Debug)]
struct ApiInner {
    http: Client,
    base_url: Url,
    tokens: TokenProvider,
}

/// Authenticated HTTP access to one workspace. Clones share the connection pool and
/// token cache.
#[derive(Debug, Clone)]
pub struct ApiClient {
    inner: Arc<ApiInner>,
}

impl ApiClient {
    pub fn new(
        base_url: Url,
        credentials: Credentials,
        user_agent: Option<&UserAgent>,
    ) -> Result<Self, TransportError> {
        let agent = user_agent
            .map(UserAgent::header_value)
            .unwrap_or_else(default_user_agent);

        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(agent)
            .build()?;
        let tokens = TokenProvider::new(credentials, &base_url)?;

        Ok(Self {
            inner: Arc::new(ApiInner {
                http,
                base_url,
                tokens,
            }),
        })
    }

    /// Client for `https://{server_hostname}`.
    pub fn for_host(
        server_hostname: &str,
        credentials: Credentials,
        user_agent: Option<&UserAgent>,
    ) -> Result<Self, TransportError> {
        let base_url = workspace_url(server_hostname)?;
        Self::new(base_url, credentials, user_agent)
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// `{base}/{prefix}/{segments...}`, each segment percent-encoded.
    pub fn endpoint<'a, I>(&self, prefix: &str, segments: I) -> Result<Url, TransportError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut url = self.inner.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::InvalidPath(self.inner.base_url.to_string()))?
            .pop_if_empty()
            .extend(prefix.split('/').filter(|s| !s.is_empty()))
            .extend(segments);
        Ok(url)
    }

    pub async fn request(&self, method: Method, url: Url) -> Result<RequestBuilder, TransportError> {
        let token = self.inner.tokens.bearer_token(&self.inner.http).await?;
        Ok(self.inner.http.request(method, url).bearer_auth(token))
    }

    /// Send and turn any non-2xx reply into `TransportError::Status`.
    pub async fn send(&self, method: &str, builder: RequestBuilder) -> Result<Response, TransportError> {
        let response = builder.send().await?;
        check_status(method, response).await
    }
}

/// Workspace root URL from a bare hostname, or from a full URL when a scheme is given.
pub fn workspace_url(server_hostname: &str) -> Result<Url, TransportError> {
    let raw = if server_hostname.contains("://") {
        server_hostname.to_string()
    } else {
        format!("https://{}", server_hostname)
    };
    Url::parse(&raw).map_err(|e| TransportError::InvalidPath(format!("{}: {}", raw, e)))
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

pub(crate) async fn check_status(method: &str, response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ApiErrorBody>(&body) {
        Ok(ApiErrorBody {
            error_code: Some(code),
            message: Some(message),
        }) => format!("{}: {}", code, message),
        Ok(ApiErrorBody {
            message: Some(message),
            ..
        }) => message,
        _ => body,
    };

    Err(TransportError::Status {
        method: method.to_string(),
        url,
        status: status.as_u16(),
        message,
    })
}
