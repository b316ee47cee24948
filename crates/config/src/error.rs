// Copyright The BLIS Authors
// SPDX-License-Identifier: Apache-2.0

//! Errors for the config crate.
//!
//! Config and fetch errors are fatal before the simulation loop starts; they
//! carry enough context (file, option, URL, stage) to be actionable from the
//! command line without a stack trace.

use miette::Diagnostic;
use std::path::PathBuf;

/// Errors that can occur while loading, parsing, or validating configuration
/// documents, or while resolving a model config over HTTP.
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum Error {
    /// An error that occurred while reading a configuration file.
    #[error("failed to read `{path}`: {details}")]
    #[diagnostic(code(blis_config::file_read_error))]
    FileReadError {
        /// Path of the file that could not be read.
        path: PathBuf,
        /// A description of the underlying IO error.
        details: String,
    },

    /// An error that occurred while deserializing a configuration document.
    #[error("{format} deserialization error in `{path}`: {details}")]
    #[diagnostic(code(blis_config::deserialization_error))]
    DeserializationError {
        /// Path (or pseudo-path) of the offending document.
        path: PathBuf,
        /// The format of the document (e.g. "YAML").
        format: &'static str,
        /// A description of the error that occurred.
        details: String,
    },

    /// The document declares a schema version this build does not understand.
    #[error("unsupported spec version `{found}` (expected `{expected}`)")]
    #[diagnostic(code(blis_config::unsupported_version))]
    UnsupportedVersion {
        /// The version string found in the document.
        found: String,
        /// The version this build supports.
        expected: &'static str,
    },

    /// One or more options failed range or consistency validation.
    /// Each message names the offending option.
    #[error("invalid configuration:\n{}", errors.join("\n"))]
    #[diagnostic(code(blis_config::invalid_configuration))]
    InvalidConfiguration {
        /// One message per offending option.
        errors: Vec<String>,
    },

    /// A policy, scheduler, oracle, or scorer name is not in the registry.
    #[error("unknown {kind} `{name}`")]
    #[diagnostic(code(blis_config::unknown_variant))]
    UnknownVariant {
        /// The registry the name was looked up in (e.g. "routing policy").
        kind: &'static str,
        /// The unrecognized name.
        name: String,
    },

    /// A `name:weight` scorer list entry could not be parsed.
    #[error("invalid scorer spec `{spec}`: {details}")]
    #[diagnostic(code(blis_config::invalid_scorer_spec))]
    InvalidScorerSpec {
        /// The offending `name:weight` fragment.
        spec: String,
        /// What was wrong with it.
        details: String,
    },

    /// A HuggingFace repo name failed the `org/name` shape check.
    #[error("invalid model repo name `{repo}` (expected `org/name`)")]
    #[diagnostic(code(blis_config::invalid_repo_name))]
    InvalidRepoName {
        /// The rejected repo string.
        repo: String,
    },

    /// An HTTP fetch failed. `stage` distinguishes request, status, redirect,
    /// and body handling failures.
    #[error("model config fetch failed at {stage} for `{url}`: {details}")]
    #[diagnostic(code(blis_config::model_fetch_error))]
    ModelFetchError {
        /// The URL being fetched when the failure occurred.
        url: String,
        /// The fetch stage ("request", "status", "redirect", "body").
        stage: &'static str,
        /// A description of the failure.
        details: String,
    },

    /// A redirect pointed outside the allowed HuggingFace domains.
    #[error("refusing redirect from `{url}` to foreign host `{location}`")]
    #[diagnostic(code(blis_config::redirect_rejected))]
    RedirectRejected {
        /// The URL that issued the redirect.
        url: String,
        /// The rejected redirect target.
        location: String,
    },

    /// The response body exceeded the configured size cap.
    #[error("response body for `{url}` exceeds the {limit_bytes} byte cap")]
    #[diagnostic(code(blis_config::oversize_body))]
    OversizeBody {
        /// The URL whose body was too large.
        url: String,
        /// The enforced cap, in bytes.
        limit_bytes: u64,
    },

    /// The fetched document parsed as JSON but lacks the architecture fields
    /// that make a model config usable.
    #[error("model config from `{origin}` is semantically empty (missing {missing})")]
    #[diagnostic(code(blis_config::empty_model_config))]
    EmptyModelConfig {
        /// Where the document came from (path or URL).
        origin: String,
        /// The missing field list, comma separated.
        missing: String,
    },

    /// No source in the resolver chain produced a usable model config.
    #[error("could not resolve model config for `{repo}`: {attempts} attempt(s) failed")]
    #[diagnostic(code(blis_config::model_unresolved))]
    ModelUnresolved {
        /// The repo that was being resolved.
        repo: String,
        /// How many sources were tried.
        attempts: usize,
        /// The error from the last source tried.
        #[source]
        last: Box<Error>,
    },
}

impl Error {
    /// Convenience constructor used by the loaders.
    pub(crate) fn file_read(path: impl Into<PathBuf>, err: &std::io::Error) -> Self {
        Error::FileReadError {
            path: path.into(),
            details: err.to_string(),
        }
    }
}
