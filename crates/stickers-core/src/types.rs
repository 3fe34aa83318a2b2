//! Data model and configuration types.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata for one sticker pack, as listed in the input file.
///
/// The same shape is embedded as `meta` in every compiled partial. `extra`
/// holds the freeform fields of the input entry and never contains `id` or
/// `key`, so neither can be shadowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackMetadata {
    /// Pack id (the input mapping key).
    pub id: String,

    /// Decryption key passed to the remote source.
    pub key: String,

    /// Pass-through fields, in input order.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PackMetadata {
    /// Create metadata with no extra fields.
    pub fn new(id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            key: key.into(),
            extra: Map::new(),
        }
    }

    /// Add a pass-through field. `id` and `key` are ignored.
    pub fn with_extra(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        if name != "id" && name != "key" {
            self.extra.insert(name, value.into());
        }
        self
    }
}

/// Reference to a single sticker inside a pack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StickerRef {
    /// Sticker id within the pack.
    pub id: u32,

    /// Emoji associated with the sticker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emoji: Option<String>,
}

/// Manifest returned by the remote source.
///
/// Only the fields that end up in a [`Manifest`] are kept; the rest of the
/// document is ignored during deserialization.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteManifest {
    pub title: String,
    pub author: String,
    pub cover: StickerRef,
    #[serde(default)]
    pub stickers: Vec<StickerRef>,
}

impl RemoteManifest {
    /// Project the manifest to the fields retained at build time.
    pub fn project(self) -> Manifest {
        Manifest {
            title: self.title,
            author: self.author,
            cover: self.cover,
        }
    }
}

/// Subset of a pack manifest retained in the compiled artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub title: String,
    pub author: String,
    pub cover: StickerRef,
}

/// Compiled record for one pack: manifest projection plus input metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StickerPackPartial {
    pub manifest: Manifest,
    pub meta: PackMetadata,
}

impl StickerPackPartial {
    /// Pack id.
    pub fn id(&self) -> &str {
        &self.meta.id
    }
}

/// Remote source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Base URL of the manifest API.
    #[serde(default = "default_source_url")]
    pub url: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_source_url() -> String {
    "https://api.signalstickers.org/v1".to_string()
}

fn default_timeout() -> u64 {
    30
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: default_source_url(),
            timeout_secs: default_timeout(),
        }
    }
}

impl SourceConfig {
    /// Create config from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `STICKERS_API_URL` | Manifest API base URL |
    /// | `STICKERS_API_TIMEOUT` | Request timeout in seconds |
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("STICKERS_API_URL").unwrap_or_else(|_| default_source_url()),
            timeout_secs: std::env::var("STICKERS_API_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_timeout),
        }
    }

    /// Set the base URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Set the request timeout.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// Default number of simultaneous fetches.
pub const DEFAULT_CONCURRENCY: usize = 6;

/// Default number of retries after the first failed attempt.
pub const DEFAULT_RETRIES: u32 = 2;

/// Fetch dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Maximum number of fetches in flight.
    pub concurrency: usize,

    /// Retries after the first attempt.
    pub retries: u32,

    /// Backoff before the first retry; doubles on each further retry.
    pub base_backoff: Duration,

    /// Upper bound on any single backoff.
    pub max_backoff: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            retries: DEFAULT_RETRIES,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl DispatchConfig {
    /// Create config from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `STICKERS_CONCURRENCY` | Maximum simultaneous fetches (default: 6) |
    /// | `STICKERS_MAX_RETRIES` | Retries per pack (default: 2) |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            concurrency: std::env::var("STICKERS_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.concurrency),
            retries: std::env::var("STICKERS_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.retries),
            ..defaults
        }
    }

    /// Set the concurrency bound (at least 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Set the retry budget.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Set the base backoff. `Duration::ZERO` disables sleeping between attempts.
    pub fn with_base_backoff(mut self, backoff: Duration) -> Self {
        self.base_backoff = backoff;
        self
    }

    /// Total attempts per pack.
    pub fn max_attempts(&self) -> u32 {
        self.retries + 1
    }
}
