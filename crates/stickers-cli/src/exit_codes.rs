//! Process exit codes. Scripts and CI jobs depend on these values.

pub const SUCCESS: i32 = 0;
pub const VALIDATION_FAILED: i32 = 1; // Input is well-formed YAML but not a valid directory
pub const FATAL: i32 = 2; // Input, output or cache directory unusable
pub const DEGRADED: i32 = 3; // Artifact written, but some packs were dropped
