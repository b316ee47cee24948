// Copyright The BLIS Authors
// SPDX-License-Identifier: Apache-2.0

//! The defaults file: deployment defaults per model id, preset workloads, and
//! trained blackbox calibrations per (model, tp, gpu, backend) tuple.

use crate::error::Error;
use crate::workload::WorkloadSpec;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Deployment defaults for one model id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ModelDefaults {
    /// Default GPU SKU (key into the hardware config).
    pub gpu: String,
    /// Default tensor-parallel degree.
    pub tensor_parallel: u32,
    /// Serving backend version the calibration was trained against.
    pub backend: String,
    /// HuggingFace repo to resolve the model config from, when it differs
    /// from the model id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hf_repo: Option<String>,
}

/// Trained linear step-time coefficients, in microseconds.
///
/// `step_time = beta0 + beta1 * prefill_tokens + beta2 * decode_tokens`;
/// `queueing_time = alpha0 + alpha1 * input_tokens`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct BlackboxCoefficients {
    /// Constant per-step cost.
    pub beta0: f64,
    /// Per-prefill-token cost.
    pub beta1: f64,
    /// Per-decode-token cost.
    pub beta2: f64,
    /// Constant queue-pipeline overhead.
    #[serde(default)]
    pub alpha0: f64,
    /// Per-input-token queue-pipeline overhead.
    #[serde(default)]
    pub alpha1: f64,
    /// Per-output-token post-processing cost.
    #[serde(default = "default_output_token_us")]
    pub output_token_us: f64,
    /// Batch-formation overhead.
    #[serde(default = "default_scheduling_us")]
    pub scheduling_us: f64,
    /// Per-preemption overhead.
    #[serde(default = "default_preemption_us")]
    pub preemption_us: f64,
}

impl Default for BlackboxCoefficients {
    fn default() -> Self {
        Self {
            beta0: 5_000.0,
            beta1: 10.0,
            beta2: 50.0,
            alpha0: 100.0,
            alpha1: 0.1,
            output_token_us: default_output_token_us(),
            scheduling_us: default_scheduling_us(),
            preemption_us: default_preemption_us(),
        }
    }
}

fn default_output_token_us() -> f64 {
    10.0
}
fn default_scheduling_us() -> f64 {
    100.0
}
fn default_preemption_us() -> f64 {
    500.0
}

/// One trained calibration row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CalibrationEntry {
    /// Model id the calibration was trained for.
    pub model: String,
    /// Tensor-parallel degree.
    pub tensor_parallel: u32,
    /// GPU SKU.
    pub gpu: String,
    /// Serving backend version.
    pub backend: String,
    /// The trained coefficients.
    pub coefficients: BlackboxCoefficients,
    /// KV capacity measured for this deployment shape.
    pub total_kv_blocks: usize,
}

/// The defaults file document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(deny_unknown_fields)]
pub struct DefaultsFile {
    /// Deployment defaults per model id.
    #[serde(default)]
    pub models: BTreeMap<String, ModelDefaults>,

    /// Named preset workloads.
    #[serde(default)]
    pub presets: BTreeMap<String, WorkloadSpec>,

    /// Trained calibrations.
    #[serde(default)]
    pub calibrations: Vec<CalibrationEntry>,
}

impl DefaultsFile {
    /// Loads a defaults file from a YAML or JSON file.
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        crate::io::from_file(path)
    }

    /// Finds the calibration for a deployment shape, if one was trained.
    #[must_use]
    pub fn calibration(
        &self,
        model: &str,
        tensor_parallel: u32,
        gpu: &str,
        backend: &str,
    ) -> Option<&CalibrationEntry> {
        self.calibrations.iter().find(|c| {
            c.model == model
                && c.tensor_parallel == tensor_parallel
                && c.gpu == gpu
                && c.backend == backend
        })
    }

    /// Looks up a preset workload by name.
    pub fn preset(&self, name: &str) -> Result<&WorkloadSpec, Error> {
        self.presets.get(name).ok_or_else(|| Error::UnknownVariant {
            kind: "preset workload",
            name: name.to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calibration_lookup_matches_the_full_tuple() {
        let entry = CalibrationEntry {
            model: "llama-3-8b".to_owned(),
            tensor_parallel: 1,
            gpu: "h100".to_owned(),
            backend: "vllm-0.6".to_owned(),
            coefficients: BlackboxCoefficients::default(),
            total_kv_blocks: 8192,
        };
        let file = DefaultsFile {
            calibrations: vec![entry],
            ..DefaultsFile::default()
        };
        assert!(file.calibration("llama-3-8b", 1, "h100", "vllm-0.6").is_some());
        assert!(file.calibration("llama-3-8b", 2, "h100", "vllm-0.6").is_none());
    }

    #[test]
    fn missing_preset_is_an_error() {
        let file = DefaultsFile::default();
        let err = file.preset("sharegpt").expect_err("must fail");
        assert!(err.to_string().contains("sharegpt"));
    }
}
