// Copyright The BLIS Authors
// SPDX-License-Identifier: Apache-2.0

//! Canonical, versioned workload specification.
//!
//! A workload spec fully determines the synthetic arrival stream: given the
//! same spec (including its seed) the generated stream is identical across
//! runs. Client entries split the aggregate rate by fraction and carry their
//! own arrival process and token-length distributions.

use crate::error::Error;
use crate::{SloClass, Ticks};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Current workload spec schema version.
pub const WORKLOAD_SPEC_VERSION_V1: &str = "blis/v1";

/// Inter-arrival process of one client.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ArrivalProcess {
    /// Exponential inter-arrival times (Poisson process).
    Poisson,
    /// Gamma inter-arrival times with the given shape; the scale is derived
    /// from the client rate so the mean inter-arrival time is preserved.
    Gamma {
        /// Gamma shape parameter (k). Shape 1 degenerates to Poisson.
        shape: f64,
    },
    /// Evenly spaced arrivals at the client rate.
    Constant,
}

/// Token-length distribution for inputs or outputs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum LengthDistribution {
    /// Normal distribution, truncated below at 1 token.
    Gaussian {
        /// Mean length in tokens.
        mean: f64,
        /// Standard deviation in tokens.
        std_dev: f64,
    },
    /// Exponential distribution with the given mean, truncated below at 1.
    Exponential {
        /// Mean length in tokens.
        mean: f64,
    },
    /// Every request has exactly this length.
    Constant {
        /// Length in tokens.
        value: u64,
    },
}

impl LengthDistribution {
    fn validation_errors(&self, option: &str) -> Vec<String> {
        let mut errors = Vec::new();
        match self {
            LengthDistribution::Gaussian { mean, std_dev } => {
                if !mean.is_finite() || *mean < 1.0 {
                    errors.push(format!("{option}.mean must be finite and at least 1"));
                }
                if !std_dev.is_finite() || *std_dev < 0.0 {
                    errors.push(format!("{option}.std_dev must be finite and not negative"));
                }
            }
            LengthDistribution::Exponential { mean } => {
                if !mean.is_finite() || *mean < 1.0 {
                    errors.push(format!("{option}.mean must be finite and at least 1"));
                }
            }
            LengthDistribution::Constant { value } => {
                if *value == 0 {
                    errors.push(format!("{option}.value must be at least 1"));
                }
            }
        }
        errors
    }
}

/// One client (traffic source) in the workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ClientSpec {
    /// Stable client identifier.
    pub id: String,

    /// Tenant the client belongs to. Defaults to the client id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,

    /// Fraction of the aggregate rate this client contributes. Fractions
    /// across clients must sum to 1.
    pub rate_fraction: f64,

    /// SLO class attached to this client's requests.
    #[serde(default = "default_slo_class")]
    pub slo_class: SloClass,

    /// Inter-arrival process.
    pub arrival: ArrivalProcess,

    /// Input (prompt) token-length distribution.
    pub input_tokens: LengthDistribution,

    /// Output (generation) token-length distribution.
    pub output_tokens: LengthDistribution,
}

fn default_slo_class() -> SloClass {
    SloClass::Interactive
}

/// The canonical workload specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct WorkloadSpec {
    /// Schema version; must be [`WORKLOAD_SPEC_VERSION_V1`].
    pub version: String,

    /// Aggregate arrival rate across all clients, in requests per second.
    pub rate: f64,

    /// Seed for stream generation.
    #[serde(default)]
    pub seed: u64,

    /// Generation horizon in ticks; no arrival is generated at or beyond it.
    #[serde(default = "default_horizon")]
    pub horizon: Ticks,

    /// Upper bound on generated requests across all clients.
    #[serde(default = "default_num_requests")]
    pub num_requests: usize,

    /// The traffic sources.
    pub clients: Vec<ClientSpec>,
}

fn default_horizon() -> Ticks {
    60_000_000
}
fn default_num_requests() -> usize {
    1000
}

impl WorkloadSpec {
    /// Loads a workload spec from a YAML or JSON file and validates it.
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let spec: WorkloadSpec = crate::io::from_file(path)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Loads a workload spec from a YAML string and validates it.
    pub fn from_yaml(yaml: &str) -> Result<Self, Error> {
        let spec: WorkloadSpec = crate::io::from_yaml_str(yaml, Path::new("<inline>"))?;
        spec.validate()?;
        Ok(spec)
    }

    /// Serializes the spec back to YAML.
    pub fn to_yaml(&self) -> Result<String, Error> {
        serde_yaml::to_string(self).map_err(|e| Error::DeserializationError {
            path: Path::new("<serialize>").to_path_buf(),
            format: "YAML",
            details: e.to_string(),
        })
    }

    /// Validates the version, rate, and every client entry.
    pub fn validate(&self) -> Result<(), Error> {
        if self.version != WORKLOAD_SPEC_VERSION_V1 {
            return Err(Error::UnsupportedVersion {
                found: self.version.clone(),
                expected: WORKLOAD_SPEC_VERSION_V1,
            });
        }
        let errors = self.validation_errors();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidConfiguration { errors })
        }
    }

    /// Returns one message per invalid option. Empty means valid.
    #[must_use]
    pub fn validation_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if !self.rate.is_finite() || self.rate <= 0.0 {
            errors.push(format!("rate must be a positive finite number, got {}", self.rate));
        }
        if self.horizon <= 0 {
            errors.push("horizon must be greater than 0 ticks".to_owned());
        }
        if self.num_requests == 0 {
            errors.push("num_requests must be greater than 0".to_owned());
        }
        if self.clients.is_empty() {
            errors.push("clients must not be empty".to_owned());
        }
        let mut fraction_sum = 0.0;
        for client in &self.clients {
            let prefix = format!("clients.{}", client.id);
            if !client.rate_fraction.is_finite() || client.rate_fraction <= 0.0 {
                errors.push(format!("{prefix}.rate_fraction must be positive and finite"));
            }
            fraction_sum += client.rate_fraction;
            if let ArrivalProcess::Gamma { shape } = client.arrival {
                if !shape.is_finite() || shape <= 0.0 {
                    errors.push(format!("{prefix}.arrival.shape must be positive and finite"));
                }
            }
            errors.extend(
                client
                    .input_tokens
                    .validation_errors(&format!("{prefix}.input_tokens")),
            );
            errors.extend(
                client
                    .output_tokens
                    .validation_errors(&format!("{prefix}.output_tokens")),
            );
        }
        if !self.clients.is_empty() && (fraction_sum - 1.0).abs() > 1e-6 {
            errors.push(format!(
                "clients rate_fraction values must sum to 1, got {fraction_sum}"
            ));
        }
        let mut ids: Vec<&str> = self.clients.iter().map(|c| c.id.as_str()).collect();
        ids.sort_unstable();
        for pair in ids.windows(2) {
            if pair[0] == pair[1] {
                errors.push(format!("duplicate client id `{}`", pair[0]));
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn spec_yaml() -> &'static str {
        r#"
version: blis/v1
rate: 10.0
seed: 42
horizon: 60000000
num_requests: 50
clients:
  - id: chat
    rate_fraction: 0.7
    slo_class: interactive
    arrival: { kind: poisson }
    input_tokens: { kind: constant, value: 128 }
    output_tokens: { kind: constant, value: 32 }
  - id: batch-jobs
    rate_fraction: 0.3
    slo_class: batch
    arrival: { kind: gamma, shape: 2.0 }
    input_tokens: { kind: gaussian, mean: 512, std_dev: 64 }
    output_tokens: { kind: exponential, mean: 200 }
"#
    }

    #[test]
    fn canonical_spec_parses_and_validates() {
        let spec = WorkloadSpec::from_yaml(spec_yaml()).expect("spec should load");
        assert_eq!(spec.clients.len(), 2);
        assert_eq!(spec.clients[1].slo_class, SloClass::Batch);
    }

    #[test]
    fn yaml_round_trip_is_identity() {
        let spec = WorkloadSpec::from_yaml(spec_yaml()).expect("spec should load");
        let yaml = spec.to_yaml().expect("serialize");
        let again = WorkloadSpec::from_yaml(&yaml).expect("reload");
        assert_eq!(spec, again);
    }

    #[test]
    fn wrong_version_is_rejected() {
        let yaml = spec_yaml().replace("blis/v1", "blis/v9");
        let err = WorkloadSpec::from_yaml(&yaml).expect_err("must fail");
        assert!(err.to_string().contains("blis/v9"));
    }

    #[test]
    fn fractions_must_sum_to_one() {
        let yaml = spec_yaml().replace("rate_fraction: 0.3", "rate_fraction: 0.4");
        let err = WorkloadSpec::from_yaml(&yaml).expect_err("must fail");
        assert!(err.to_string().contains("rate_fraction"));
    }

    #[test]
    fn non_finite_rate_is_rejected() {
        let yaml = spec_yaml().replace("rate: 10.0", "rate: .nan");
        let err = WorkloadSpec::from_yaml(&yaml).expect_err("must fail");
        assert!(err.to_string().contains("rate"));
    }
}
