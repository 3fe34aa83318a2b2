//! Compiler for the sticker pack directory.
//!
//! Turns a YAML file of sticker pack ids and keys into a single JSON array of
//! pack partials (manifest title, author and cover plus the pack's metadata),
//! providing:
//!
//! - Per-pack on-disk cache, so a warm rebuild issues no remote requests
//! - Bounded-concurrency manifest fetching with retries
//! - Deterministic output order matching the input file
//! - Input schema validation and maintenance helpers
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use stickers_core::{CompileOptions, Compiler, HttpManifestSource, SourceConfig};
//!
//! # async fn example() -> Result<(), stickers_core::CompileError> {
//! let source = HttpManifestSource::new(&SourceConfig::from_env())?;
//! let options = CompileOptions::new("stickers.yml", "dist/partials.json");
//!
//! let report = Compiler::new(options, Arc::new(source)).compile().await?;
//! println!("wrote {} packs ({}% from cache)", report.written, report.cache_hit_rate());
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `STICKERS_API_URL` | Manifest API base URL |
//! | `STICKERS_API_TIMEOUT` | Request timeout in seconds (default: 30) |
//! | `STICKERS_CONCURRENCY` | Maximum simultaneous fetches (default: 6) |
//! | `STICKERS_MAX_RETRIES` | Retries per pack (default: 2) |

pub mod cache;
pub mod compiler;
pub mod dispatch;
pub mod error;
mod fs;
pub mod input;
pub mod report;
pub mod resolver;
pub mod source;
pub mod types;

// Re-export main types
pub use cache::{PackCache, DEFAULT_CACHE_DIR};
pub use compiler::{CompileOptions, Compiler};
pub use dispatch::{FetchDispatcher, FetchHandler, FetchTask};
pub use error::{CompileError, CompileResult};
pub use input::{
    check_deletions, count_artifact_entries, load_input, parse_input, reverse_document,
    validate_document, ValidationReport,
};
pub use report::{format_bytes, CompileReport, DroppedPack, ProgressEvent, ProgressSink};
pub use resolver::{build_partial, PackResolver, Resolution};
pub use source::{HttpManifestSource, ManifestSource, SOURCE_USER_AGENT};
pub use types::{
    DispatchConfig, Manifest, PackMetadata, RemoteManifest, SourceConfig, StickerPackPartial,
    StickerRef, DEFAULT_CONCURRENCY, DEFAULT_RETRIES,
};
