//! Input file loading, validation and maintenance helpers.
//!
//! The input is a YAML mapping from pack id to pack metadata:
//!
//! ```yaml
//! 4830e258138fca961ab2151d9596755c:
//!   id: 4830e258138fca961ab2151d9596755c
//!   key: 9a40d3e5e3bd4bd9e5b0a1ac4d8b5ef5bb3a2b3d3f77d9c9d0c1f1e1d2c3b4a5
//!   tags: [cats]
//! ```
//!
//! Entry order is significant: the compiled artifact lists packs in the order
//! they appear here.

use std::path::Path;
use std::sync::OnceLock;

use jsonschema::Draft;
use serde::Deserialize;
use serde_json::{Map, Value};
use serde_yaml::Mapping;
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{CompileError, CompileResult};
use crate::types::PackMetadata;

/// Maximum number of schema errors reported per document.
const MAX_SCHEMA_ERRORS: usize = 20;

const STICKERS_SCHEMA_JSON: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/stickers.schema.json"
));

static VALIDATOR: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(default)]
    id: Option<String>,
    key: String,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// Read and parse an input file.
///
/// Fails if the file is not YAML (by extension), cannot be read, or does not
/// have the expected shape.
pub async fn load_input(path: &Path) -> CompileResult<Vec<PackMetadata>> {
    check_extension(path)?;

    let text = fs::read_to_string(path)
        .await
        .map_err(|e| CompileError::Input {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    let packs = parse_input(&text)?;
    debug!(path = %path.display(), packs = packs.len(), "loaded input file");
    Ok(packs)
}

fn check_extension(path: &Path) -> CompileResult<()> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("yml") | Some("yaml") => Ok(()),
        _ => Err(CompileError::Input {
            path: path.to_path_buf(),
            message: "input file must be in the YAML format".to_string(),
        }),
    }
}

/// Parse input text into pack metadata, in file order.
pub fn parse_input(text: &str) -> CompileResult<Vec<PackMetadata>> {
    let mapping = parse_mapping(text)?;
    let mut packs = Vec::with_capacity(mapping.len());

    for (key, value) in mapping {
        let id = key
            .as_str()
            .ok_or_else(|| CompileError::InvalidInput {
                message: format!("pack id must be a string, got {:?}", key),
            })?
            .to_string();

        if !value.is_mapping() {
            return Err(CompileError::InvalidInput {
                message: format!("entry {} must be a mapping", id),
            });
        }

        let entry: RawEntry =
            serde_yaml::from_value(value).map_err(|e| CompileError::InvalidInput {
                message: format!("entry {}: {}", id, e),
            })?;

        if let Some(declared) = entry.id.as_deref() {
            if declared != id {
                warn!(id = %id, declared, "entry id does not match its mapping key, using key");
            }
        }

        packs.push(PackMetadata {
            id,
            key: entry.key,
            extra: entry.extra,
        });
    }

    Ok(packs)
}

fn parse_mapping(text: &str) -> CompileResult<Mapping> {
    let doc: serde_yaml::Value =
        serde_yaml::from_str(text).map_err(|e| CompileError::InvalidInput {
            message: format!("failed to parse YAML: {}", e),
        })?;

    match doc {
        serde_yaml::Value::Mapping(m) => Ok(m),
        serde_yaml::Value::Null => Ok(Mapping::new()),
        _ => Err(CompileError::InvalidInput {
            message: "input must be a mapping of pack ids to metadata".to_string(),
        }),
    }
}

/// Outcome of validating an input document.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    /// Number of entries in the document (0 if it did not parse).
    pub packs: usize,

    /// Human-readable problems; empty when the document is valid.
    pub diagnostics: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

fn compiled_validator() -> CompileResult<&'static jsonschema::Validator> {
    VALIDATOR
        .get_or_init(|| {
            let schema: Value = serde_json::from_str(STICKERS_SCHEMA_JSON)
                .map_err(|e| format!("failed to parse embedded schema: {e}"))?;

            jsonschema::options()
                .with_draft(Draft::Draft202012)
                .build(&schema)
                .map_err(|e| format!("failed to compile schema: {e}"))
        })
        .as_ref()
        .map_err(|e| CompileError::Config { message: e.clone() })
}

/// Validate an input document against the pack directory schema.
///
/// Syntax errors, duplicate ids and schema violations are all reported as
/// diagnostics rather than errors so callers can print every problem at once.
pub fn validate_document(text: &str) -> CompileResult<ValidationReport> {
    let validator = compiled_validator()?;

    let mapping = match parse_mapping(text) {
        Ok(m) => m,
        Err(e) => {
            return Ok(ValidationReport {
                packs: 0,
                diagnostics: vec![e.to_string()],
            })
        }
    };

    let mut report = ValidationReport {
        packs: mapping.len(),
        diagnostics: Vec::new(),
    };

    let instance = match serde_json::to_value(&mapping) {
        Ok(v) => v,
        Err(e) => {
            report
                .diagnostics
                .push(format!("document cannot be represented as JSON: {e}"));
            return Ok(report);
        }
    };

    report.diagnostics.extend(
        validator
            .iter_errors(&instance)
            .take(MAX_SCHEMA_ERRORS)
            .map(|e| e.to_string()),
    );

    for (key, value) in &mapping {
        let (Some(key), Some(declared)) = (key.as_str(), value.get("id").and_then(|v| v.as_str()))
        else {
            continue;
        };
        if key != declared {
            report
                .diagnostics
                .push(format!("entry {key} declares a different id: {declared}"));
        }
    }

    Ok(report)
}

/// Check that the document does not remove too many packs compared to a
/// previously published artifact.
pub fn check_deletions(local: usize, baseline: usize, max_deletions: usize) -> Option<String> {
    let removed = baseline.saturating_sub(local);
    if removed > max_deletions {
        Some(format!(
            "input would delete {removed} sticker packs, which is more than the allowed maximum of {max_deletions}"
        ))
    } else {
        None
    }
}

/// Count the entries of a previously compiled artifact.
pub async fn count_artifact_entries(path: &Path) -> CompileResult<usize> {
    let text = fs::read_to_string(path)
        .await
        .map_err(|e| CompileError::Input {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    let doc: Value = serde_json::from_str(&text).map_err(|e| CompileError::InvalidInput {
        message: format!("{}: {}", path.display(), e),
    })?;

    doc.as_array()
        .map(Vec::len)
        .ok_or_else(|| CompileError::InvalidInput {
            message: format!("{}: artifact must be a JSON array", path.display()),
        })
}

/// Rewrite an input document with its entries in reverse order.
pub fn reverse_document(text: &str) -> CompileResult<String> {
    let mapping = parse_mapping(text)?;
    let mut entries: Vec<_> = mapping.into_iter().collect();
    entries.reverse();
    let reversed: Mapping = entries.into_iter().collect();

    serde_yaml::to_string(&reversed).map_err(|e| CompileError::InvalidInput {
        message: format!("failed to serialize YAML: {}", e),
    })
}
