// Copyright The BLIS Authors
// SPDX-License-Identifier: Apache-2.0

//! HuggingFace-style model config (`config.json`) and its resolver chain.
//!
//! Resolution order: explicit path, then the local cache directory, then an
//! HTTPS fetch from the configured endpoint (huggingface.co by default).
//! Fetches follow redirects manually so the host allowlist and bearer-token
//! scoping stay explicit: the token is attached only to requests against the
//! configured endpoint host, and redirects leaving the HuggingFace domains
//! abort the fetch. Bodies are capped at 10 MB.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use url::Url;

/// Response-body cap for config fetches.
pub const MAX_BODY_BYTES: u64 = 10 * 1024 * 1024;

/// Maximum redirects followed per fetch.
const MAX_REDIRECTS: usize = 5;

/// Environment variable holding an optional HuggingFace bearer token.
pub const HF_TOKEN_ENV: &str = "HF_TOKEN";

fn repo_name_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"^[A-Za-z0-9._-]+/[A-Za-z0-9._-]+$")
            .unwrap_or_else(|e| panic!("repo-name regex must compile: {e}"))
    })
}

/// Architecture parameters extracted from a HuggingFace `config.json`.
///
/// Unknown fields are ignored; a document is usable once it carries
/// `num_hidden_layers` and `hidden_size`. The remaining accessors fall back
/// to the conventional derivations when a field is absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ModelConfig {
    /// Declared architectures, e.g. `["LlamaForCausalLM"]`.
    #[serde(default)]
    pub architectures: Vec<String>,
    /// Number of transformer layers.
    #[serde(default)]
    pub num_hidden_layers: Option<u32>,
    /// Model (embedding) dimension.
    #[serde(default)]
    pub hidden_size: Option<u32>,
    /// Attention head count.
    #[serde(default)]
    pub num_attention_heads: Option<u32>,
    /// KV head count (grouped-query attention).
    #[serde(default)]
    pub num_key_value_heads: Option<u32>,
    /// MLP inner dimension.
    #[serde(default)]
    pub intermediate_size: Option<u32>,
    /// Vocabulary size.
    #[serde(default)]
    pub vocab_size: Option<u32>,
    /// Per-head dimension, when declared explicitly.
    #[serde(default)]
    pub head_dim: Option<u32>,
    /// Maximum sequence length the model was trained for.
    #[serde(default)]
    pub max_position_embeddings: Option<u32>,
}

impl ModelConfig {
    /// Parses a `config.json` document and checks it is semantically usable.
    /// `source` names the path or URL in errors.
    pub fn from_json_str(json: &str, source: &str) -> Result<Self, Error> {
        let cfg: ModelConfig =
            serde_json::from_str(json).map_err(|e| Error::ModelFetchError {
                url: source.to_owned(),
                stage: "body",
                details: format!("not a JSON model config: {e}"),
            })?;
        let missing = cfg.missing_fields();
        if missing.is_empty() {
            Ok(cfg)
        } else {
            Err(Error::EmptyModelConfig {
                origin: source.to_owned(),
                missing: missing.join(", "),
            })
        }
    }

    fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.num_hidden_layers.is_none() {
            missing.push("num_hidden_layers");
        }
        if self.hidden_size.is_none() {
            missing.push("hidden_size");
        }
        missing
    }

    /// Transformer layer count. Panics if the config was not validated.
    #[must_use]
    pub fn layers(&self) -> u32 {
        self.num_hidden_layers
            .unwrap_or_else(|| panic!("validated model config lacks num_hidden_layers"))
    }

    /// Model dimension. Panics if the config was not validated.
    #[must_use]
    pub fn hidden(&self) -> u32 {
        self.hidden_size
            .unwrap_or_else(|| panic!("validated model config lacks hidden_size"))
    }

    /// Attention head count, defaulting to `hidden / 128`.
    #[must_use]
    pub fn heads(&self) -> u32 {
        self.num_attention_heads
            .unwrap_or_else(|| (self.hidden() / 128).max(1))
    }

    /// KV head count, defaulting to the attention head count.
    #[must_use]
    pub fn kv_heads(&self) -> u32 {
        self.num_key_value_heads.unwrap_or_else(|| self.heads())
    }

    /// Per-head dimension, defaulting to `hidden / heads`.
    #[must_use]
    pub fn head_dimension(&self) -> u32 {
        self.head_dim
            .unwrap_or_else(|| (self.hidden() / self.heads()).max(1))
    }

    /// MLP inner dimension, defaulting to `4 * hidden`.
    #[must_use]
    pub fn intermediate(&self) -> u32 {
        self.intermediate_size.unwrap_or_else(|| self.hidden() * 4)
    }

    /// Vocabulary size, defaulting to 32k.
    #[must_use]
    pub fn vocab(&self) -> u32 {
        self.vocab_size.unwrap_or(32_000)
    }
}

/// Resolves model configs from path, cache, or the network.
#[derive(Debug, Clone)]
pub struct ModelResolver {
    /// Highest-priority source: a local `config.json`.
    pub explicit_path: Option<PathBuf>,
    /// Cache directory; fetched configs are stored under `<cache>/<org>/<name>/config.json`.
    pub cache_dir: Option<PathBuf>,
    endpoint: Url,
    token: Option<String>,
}

impl Default for ModelResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelResolver {
    /// A resolver against huggingface.co, picking up `HF_TOKEN` when set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            explicit_path: None,
            cache_dir: None,
            endpoint: Url::parse("https://huggingface.co")
                .unwrap_or_else(|e| panic!("default endpoint must parse: {e}")),
            token: std::env::var(HF_TOKEN_ENV).ok().filter(|t| !t.is_empty()),
        }
    }

    /// Overrides the fetch endpoint. Used by tests against a local server.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: Url) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Overrides the bearer token.
    #[must_use]
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// Resolves a model config, trying explicit path, cache, then HTTP.
    /// Fails only when every source in the chain fails.
    pub fn resolve(&self, repo: &str) -> Result<ModelConfig, Error> {
        let mut attempts = 0usize;

        if let Some(path) = &self.explicit_path {
            attempts += 1;
            match load_model_file(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "explicit model config failed");
                }
            }
        }

        if let Some(cache) = self.cache_path(repo) {
            if cache.is_file() {
                attempts += 1;
                match load_model_file(&cache) {
                    Ok(cfg) => return Ok(cfg),
                    Err(e) => {
                        tracing::debug!(path = %cache.display(), error = %e, "cached model config failed");
                    }
                }
            }
        }

        attempts += 1;
        match self.fetch(repo) {
            Ok(cfg) => Ok(cfg),
            // Earlier failures were logged; the fetch error is the one a
            // user can act on.
            Err(e) => Err(Error::ModelUnresolved {
                repo: repo.to_owned(),
                attempts,
                last: Box::new(e),
            }),
        }
    }

    fn cache_path(&self, repo: &str) -> Option<PathBuf> {
        let cache = self.cache_dir.as_ref()?;
        if !repo_name_regex().is_match(repo) {
            return None;
        }
        Some(cache.join(repo).join("config.json"))
    }

    /// Fetches `config.json` for a repo over HTTPS, following redirects
    /// manually within the HuggingFace domain allowlist.
    pub fn fetch(&self, repo: &str) -> Result<ModelConfig, Error> {
        if !repo_name_regex().is_match(repo) {
            return Err(Error::InvalidRepoName {
                repo: repo.to_owned(),
            });
        }

        let client = reqwest::blocking::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::ModelFetchError {
                url: self.endpoint.to_string(),
                stage: "request",
                details: e.to_string(),
            })?;

        let mut url = self
            .endpoint
            .join(&format!("{repo}/resolve/main/config.json"))
            .map_err(|e| Error::ModelFetchError {
                url: self.endpoint.to_string(),
                stage: "request",
                details: e.to_string(),
            })?;

        for _ in 0..=MAX_REDIRECTS {
            let mut request = client.get(url.clone());
            if let Some(token) = &self.token {
                // Token scope: only the configured endpoint host ever sees
                // it; redirect targets (even sibling subdomains) do not.
                if url.host_str() == self.endpoint.host_str() {
                    request = request.bearer_auth(token);
                }
            }
            let response = request.send().map_err(|e| Error::ModelFetchError {
                url: url.to_string(),
                stage: "request",
                details: e.to_string(),
            })?;

            let status = response.status();
            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| Error::ModelFetchError {
                        url: url.to_string(),
                        stage: "redirect",
                        details: format!("{status} without a Location header"),
                    })?;
                let target = url.join(location).map_err(|e| Error::ModelFetchError {
                    url: url.to_string(),
                    stage: "redirect",
                    details: e.to_string(),
                })?;
                if !self.is_allowed_host(&target) {
                    return Err(Error::RedirectRejected {
                        url: url.to_string(),
                        location: target.to_string(),
                    });
                }
                url = target;
                continue;
            }

            if !status.is_success() {
                return Err(Error::ModelFetchError {
                    url: url.to_string(),
                    stage: "status",
                    details: format!("HTTP {status}"),
                });
            }

            if let Some(len) = response.content_length() {
                if len > MAX_BODY_BYTES {
                    return Err(Error::OversizeBody {
                        url: url.to_string(),
                        limit_bytes: MAX_BODY_BYTES,
                    });
                }
            }
            let mut body = Vec::new();
            let _ = response
                .take(MAX_BODY_BYTES + 1)
                .read_to_end(&mut body)
                .map_err(|e| Error::ModelFetchError {
                    url: url.to_string(),
                    stage: "body",
                    details: e.to_string(),
                })?;
            if body.len() as u64 > MAX_BODY_BYTES {
                return Err(Error::OversizeBody {
                    url: url.to_string(),
                    limit_bytes: MAX_BODY_BYTES,
                });
            }
            let text = String::from_utf8(body).map_err(|e| Error::ModelFetchError {
                url: url.to_string(),
                stage: "body",
                details: e.to_string(),
            })?;
            let cfg = ModelConfig::from_json_str(&text, url.as_str())?;
            self.store_in_cache(repo, &text);
            return Ok(cfg);
        }

        Err(Error::ModelFetchError {
            url: url.to_string(),
            stage: "redirect",
            details: format!("more than {MAX_REDIRECTS} redirects"),
        })
    }

    fn is_allowed_host(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        if Some(host) == self.endpoint.host_str() {
            return true;
        }
        host == "huggingface.co" || host.ends_with(".huggingface.co")
    }

    fn store_in_cache(&self, repo: &str, body: &str) {
        let Some(path) = self.cache_path(repo) else {
            return;
        };
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::debug!(path = %parent.display(), error = %e, "cache dir create failed");
                return;
            }
        }
        if let Err(e) = std::fs::write(&path, body) {
            tracing::debug!(path = %path.display(), error = %e, "cache write failed");
        }
    }
}

fn load_model_file(path: &Path) -> Result<ModelConfig, Error> {
    let contents = std::fs::read_to_string(path).map_err(|e| Error::file_read(path, &e))?;
    ModelConfig::from_json_str(&contents, &path.display().to_string())
}
