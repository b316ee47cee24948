// Copyright The BLIS Authors
// SPDX-License-Identifier: Apache-2.0

//! Shared YAML/JSON loading helpers for all config document types.

use crate::error::Error;
use serde::de::DeserializeOwned;
use std::path::Path;

/// Deserializes a document of type `T` from a YAML string. `origin` is the
/// path (or pseudo-path such as `<inline>`) reported in errors.
pub fn from_yaml_str<T: DeserializeOwned>(yaml: &str, origin: &Path) -> Result<T, Error> {
    serde_yaml::from_str(yaml).map_err(|e| Error::DeserializationError {
        path: origin.to_path_buf(),
        format: "YAML",
        details: e.to_string(),
    })
}

/// Deserializes a document of type `T` from a JSON string.
pub fn from_json_str<T: DeserializeOwned>(json: &str, origin: &Path) -> Result<T, Error> {
    serde_json::from_str(json).map_err(|e| Error::DeserializationError {
        path: origin.to_path_buf(),
        format: "JSON",
        details: e.to_string(),
    })
}

/// Reads and deserializes a document from a file, picking the format from the
/// extension (`.json` is JSON, everything else is treated as YAML — YAML is a
/// superset of JSON, so mislabeled JSON files still load).
pub fn from_file<T: DeserializeOwned>(path: &Path) -> Result<T, Error> {
    let contents = std::fs::read_to_string(path).map_err(|e| Error::file_read(path, &e))?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => from_json_str(&contents, path),
        _ => from_yaml_str(&contents, path),
    }
}
