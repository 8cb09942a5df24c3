//! Job kinds, parameters, and the wire manifest.
//!
//! A manifest is immutable once written: workers never rewrite its
//! contents, and lifecycle progress is represented by which store prefix
//! currently holds it. Unknown fields are preserved on round-trip so older
//! workers can carry newer manifests untouched.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::layout;
use crate::slug::{is_valid_slug, safe_slug};

/// Camera angle names for the render output contract, in orbit order.
/// A render job produces one image per angle per character.
pub const RENDER_ANGLES: [&str; 8] = [
    "front",
    "front_right",
    "right",
    "back_right",
    "back",
    "back_left",
    "left",
    "front_left",
];

/// Closed enumeration of execution recipes. Extending it is a code change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Render,
    Character,
}

impl JobKind {
    /// Wire / id-prefix representation.
    pub fn name(self) -> &'static str {
        match self {
            Self::Render => "render",
            Self::Character => "character",
        }
    }

    /// Parse from the wire representation.
    pub fn from_name(name: &str) -> Result<Self, CoreError> {
        match name {
            "render" => Ok(Self::Render),
            "character" => Ok(Self::Character),
            other => Err(CoreError::Validation(format!(
                "Unknown job kind '{other}'. Must be one of: render, character"
            ))),
        }
    }
}

/// Recipe parameters carried by a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParams {
    /// Store-relative path of the entry script under `scripts/`.
    pub script: String,

    /// Character names to render; each becomes an output subdirectory named
    /// by its sanitized form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub characters: Option<Vec<String>>,

    /// Store-relative paths under `assets/` that the job requires staged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assets: Option<Vec<String>>,

    /// Subpath under the workstation's working directory where downloaded
    /// results land by default.
    pub output_dir: String,

    /// Free-form scalar overrides, passed to the tool as `--param KEY=VAL`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub overrides: BTreeMap<String, serde_json::Value>,

    /// Fields this version does not understand, preserved on round-trip.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl JobParams {
    pub fn new(script: impl Into<String>, output_dir: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            characters: None,
            assets: None,
            output_dir: output_dir.into(),
            overrides: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }
}

/// The on-wire serialization of a job (JSON).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobManifest {
    pub job_id: String,
    pub job_type: JobKind,
    pub created_at: DateTime<Utc>,
    pub params: JobParams,

    /// Unknown top-level fields, preserved on round-trip.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl JobManifest {
    /// Build a manifest with a freshly generated id. Does not validate;
    /// call [`JobManifest::validate`] before uploading.
    pub fn new(kind: JobKind, params: JobParams) -> Self {
        let now = Utc::now();
        Self {
            job_id: new_job_id(kind, now),
            job_type: kind,
            created_at: now,
            params,
            extra: BTreeMap::new(),
        }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, CoreError> {
        serde_json::from_slice(bytes)
            .map_err(|e| CoreError::Validation(format!("Malformed job manifest: {e}")))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CoreError> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| CoreError::Internal(format!("Failed to serialize manifest: {e}")))
    }

    /// Validate the manifest against its declared kind.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !is_valid_slug(&self.job_id) {
            return Err(CoreError::Validation(format!(
                "Job id '{}' is not a valid path segment",
                self.job_id
            )));
        }
        validate_params(self.job_type, &self.params)
    }
}

/// Generate a job id: `<kind>_<YYYYMMDD>_<HHMMSS>_<random8>`.
///
/// Lexicographic order over ids of one kind equals creation-time order,
/// which is what gives the worker queue its oldest-first behaviour. The
/// shape always satisfies [`is_valid_slug`].
pub fn new_job_id(kind: JobKind, now: DateTime<Utc>) -> String {
    let stamp = now.format("%Y%m%d_%H%M%S");
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{stamp}_{}", kind.name(), &random[..8])
}

/// Validate recipe parameters for a job kind.
///
/// Both kinds currently share one schema: a required entry script, a
/// required output subpath, optional character names and asset paths.
/// Character names are *collapsed* by the sanitizer (spaces are fine);
/// path-like fields are rejected outright when any segment fails it.
pub fn validate_params(kind: JobKind, params: &JobParams) -> Result<(), CoreError> {
    let _ = kind;

    validate_store_path("script", &params.script)?;

    if params.output_dir.is_empty() {
        return Err(CoreError::Validation(
            "Missing required param 'output_dir'".into(),
        ));
    }
    for segment in params.output_dir.split('/') {
        if !is_valid_slug(segment) {
            return Err(CoreError::Validation(format!(
                "Output dir '{}' contains an invalid path segment '{segment}'",
                params.output_dir
            )));
        }
    }

    if let Some(characters) = &params.characters {
        for name in characters {
            if safe_slug(name).is_empty() {
                return Err(CoreError::Validation(format!(
                    "Character name '{name}' sanitizes to an empty path segment"
                )));
            }
        }
    }

    if let Some(assets) = &params.assets {
        for asset in assets {
            validate_store_path("assets", asset)?;
        }
    }

    for (key, value) in &params.overrides {
        if value.is_object() || value.is_array() {
            return Err(CoreError::Validation(format!(
                "Override '{key}' must be a scalar"
            )));
        }
    }

    Ok(())
}

/// Validate a store-relative path field: non-empty, relative, no `..`
/// segments, and within the object-key charset.
fn validate_store_path(field: &str, path: &str) -> Result<(), CoreError> {
    if path.is_empty() {
        return Err(CoreError::Validation(format!(
            "Missing required param '{field}'"
        )));
    }
    if path.starts_with('/') || path.ends_with('/') {
        return Err(CoreError::Validation(format!(
            "Param '{field}' must be a relative path (got '{path}')"
        )));
    }
    if !layout::is_valid_key(path) || path.split('/').any(|seg| seg.is_empty() || seg == "..") {
        return Err(CoreError::Validation(format!(
            "Param '{field}' contains an invalid path '{path}'"
        )));
    }
    Ok(())
}
