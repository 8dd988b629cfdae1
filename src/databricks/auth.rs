use std::fmt;
use std::time::{Duration, Instant};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;
use url::Url;

use crate::error::TransportError;

/// Tokens are refreshed this long before the server-side expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);
const OAUTH_SCOPE: &str = "all-apis";

/// Workspace credentials. The `auth_type` field is the discriminator.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "auth_type", rename_all = "kebab-case")]
pub enum Credentials {
    /// Personal access token sent as a bearer token.
    Pat { personal_access_token: String },
    /// OAuth machine-to-machine (client credentials) with a service principal.
    #[serde(rename = "oauth-m2m")]
    OauthM2m {
        oauth2_client_id: String,
        oauth2_client_secret: String,
    },
}

impl Credentials {
    /// Returns the auth type as written in configuration (e.g. "pat", "oauth-m2m")
    pub fn auth_type(&self) -> &'static str {
        match self {
            Credentials::Pat { .. } => "pat",
            Credentials::OauthM2m { .. } => "oauth-m2m",
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Pat { .. } => f
                .debug_struct("Pat")
                .field("personal_access_token", &"***")
                .finish(),
            Credentials::OauthM2m {
                oauth2_client_id, ..
            } => f
                .debug_struct("OauthM2m")
                .field("oauth2_client_id", oauth2_client_id)
                .field("oauth2_client_secret", &"***")
                .finish(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Hands out bearer tokens, fetching and caching OAuth tokens as needed.
pub struct TokenProvider {
    credentials: Credentials,
    token_url: Url,
    cached: Mutex<Option<CachedToken>>,
}

impl fmt::Debug for TokenProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenProvider")
            .field("credentials", &self.credentials)
            .field("token_url", &self.token_url.as_str())
            .finish()
    }
}

impl TokenProvider {
    /// `base_url` is the workspace root; OAuth tokens come from `{base_url}/oidc/v1/token`.
    pub fn new(credentials: Credentials, base_url: &Url) -> Result<Self, TransportError> {
        let token_url = base_url
            .join("oidc/v1/token")
            .map_err(|e| TransportError::InvalidPath(e.to_string()))?;
        Ok(Self {
            credentials,
            token_url,
            cached: Mutex::new(None),
        })
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub async fn bearer_token(&self, http: &Client) -> Result<String, TransportError> {
        match &self.credentials {
            Credentials::Pat {
                personal_access_token,
            } => Ok(personal_access_token.clone()),
            Credentials::OauthM2m {
                oauth2_client_id,
                oauth2_client_secret,
            } => {
                let mut cached = self.cached.lock().await;
                if let Some(token) = cached.as_ref() {
                    if Instant::now() < token.refresh_at {
                        return Ok(token.value.clone());
                    }
                }

                debug!("Requesting OAuth token from {}", self.token_url);
                let response = http
                    .post(self.token_url.clone())
                    .basic_auth(oauth2_client_id, Some(oauth2_client_secret))
                    .form(&[("grant_type", "client_credentials"), ("scope", OAUTH_SCOPE)])
                    .send()
                    .await?;
                let response = super::check_status("POST", response).await?;
                let body: TokenResponse = response.json().await?;

                let lifetime = Duration::from_secs(body.expires_in.unwrap_or(3600));
                let token = CachedToken {
                    value: body.access_token,
                    refresh_at: Instant::now() + lifetime.saturating_sub(EXPIRY_MARGIN),
                };
                let value = token.value.clone();
                *cached = Some(token);
                Ok(value)
            }
        }
    }
}
