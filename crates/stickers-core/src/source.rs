//! Remote manifest source.
//!
//! A [`ManifestSource`] performs a single fetch attempt. Retrying and
//! concurrency limits belong to the [`FetchDispatcher`](crate::FetchDispatcher).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::StatusCode;
use tracing::debug;

use crate::error::{CompileError, CompileResult};
use crate::types::{RemoteManifest, SourceConfig};

/// User agent for manifest requests.
pub const SOURCE_USER_AGENT: &str = concat!("stickers-core/", env!("CARGO_PKG_VERSION"));

/// Header carrying the pack key.
const PACK_KEY_HEADER: &str = "x-pack-key";

/// Anything that can fetch the manifest of a pack given its id and key.
#[async_trait]
pub trait ManifestSource: Send + Sync {
    async fn fetch_manifest(&self, id: &str, key: &str) -> CompileResult<RemoteManifest>;
}

/// Manifest source backed by the HTTP manifest API.
#[derive(Debug, Clone)]
pub struct HttpManifestSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpManifestSource {
    /// Create a new HTTP source.
    pub fn new(config: &SourceConfig) -> CompileResult<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(USER_AGENT, HeaderValue::from_static(SOURCE_USER_AGENT));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(default_headers)
            .build()
            .map_err(|e| CompileError::Config {
                message: format!("failed to create HTTP client: {}", e),
            })?;

        // Normalize base URL (remove trailing slash)
        let base_url = config.url.trim_end_matches('/').to_string();

        Ok(Self { client, base_url })
    }

    /// Base URL requests are made against.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ManifestSource for HttpManifestSource {
    async fn fetch_manifest(&self, id: &str, key: &str) -> CompileResult<RemoteManifest> {
        let url = format!("{}/packs/{}/manifest", self.base_url, id);
        debug!(url = %url, "fetching manifest");

        let key = HeaderValue::from_str(key).map_err(|e| CompileError::InvalidKey {
            id: id.to_string(),
            message: format!("not a valid header value: {}", e),
        })?;

        let response = self
            .client
            .get(&url)
            .header(PACK_KEY_HEADER, key)
            .send()
            .await?;

        let status = response.status();
        match status {
            s if s.is_success() => {
                response
                    .json::<RemoteManifest>()
                    .await
                    .map_err(|e| CompileError::InvalidResponse {
                        message: format!("failed to parse manifest for {}: {}", id, e),
                    })
            }

            StatusCode::NOT_FOUND => Err(CompileError::NotFound { id: id.to_string() }),

            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(Duration::from_secs);

                Err(CompileError::RateLimited { retry_after })
            }

            _ => {
                let message = response.text().await.unwrap_or_else(|_| status.to_string());
                Err(CompileError::Network {
                    message: format!("HTTP {}: {}", status.as_u16(), message),
                })
            }
        }
    }
}
