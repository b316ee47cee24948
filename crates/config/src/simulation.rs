// Copyright The BLIS Authors
// SPDX-License-Identifier: Apache-2.0

//! Engine knobs: cluster sizing, KV tier sizing and transfer behavior, batch
//! formation limits, pipeline latencies, trace and fitness settings.
//!
//! Every knob has a default; validation reports each out-of-range option by
//! name so a run never starts on a half-understood configuration.

use crate::{SloClass, Ticks, TraceLevel};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which latency oracle backs the step-time model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OracleName {
    /// Linear calibrated model: `beta0 + beta1·prefill_tokens + beta2·decode_tokens`.
    #[default]
    Blackbox,
    /// Analytical FLOPs/bandwidth model derived from model and hardware configs.
    Roofline,
}

/// Engine-level simulation configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SimulationConfig {
    /// Number of simulated instances in the cluster.
    #[serde(default = "default_num_instances")]
    pub num_instances: usize,

    /// Simulated-time cutoff in ticks (microseconds). Events at or beyond the
    /// horizon are discarded.
    #[serde(default = "default_horizon")]
    pub horizon: Ticks,

    /// Seed for the driver RNG. Together with the workload spec this fully
    /// determines the run.
    #[serde(default)]
    pub seed: u64,

    /// GPU-tier KV capacity, in blocks, per instance.
    #[serde(default = "default_total_kv_blocks")]
    pub total_kv_blocks: usize,

    /// Tokens per KV block.
    #[serde(default = "default_block_size_tokens")]
    pub block_size_tokens: usize,

    /// CPU-tier KV capacity, in blocks, per instance. Zero disables tiering.
    #[serde(default)]
    pub kv_cpu_blocks: usize,

    /// GPU utilization fraction above which unreferenced blocks are offloaded
    /// to the CPU tier. Must be within [0, 1].
    #[serde(default = "default_kv_offload_threshold")]
    pub kv_offload_threshold: f64,

    /// Transfer bandwidth between tiers, in blocks per tick.
    #[serde(default = "default_kv_transfer_bandwidth")]
    pub kv_transfer_bandwidth: u64,

    /// Fixed latency added to every tier transfer, in ticks.
    #[serde(default)]
    pub kv_transfer_base_latency: Ticks,

    /// Offload-then-reload round trips of one block inside this window are
    /// counted as cache thrash, in ticks.
    #[serde(default = "default_kv_thrash_window")]
    pub kv_thrash_window: Ticks,

    /// Maximum co-scheduled requests per instance step.
    #[serde(default = "default_max_running_reqs")]
    pub max_running_reqs: usize,

    /// Maximum scheduled new tokens per instance step.
    #[serde(default = "default_max_scheduled_tokens")]
    pub max_scheduled_tokens: usize,

    /// Chunk cap for long prefills. Zero disables chunking (a prefill may
    /// still be split by the step token budget).
    #[serde(default)]
    pub long_prefill_token_threshold: usize,

    /// Maximum model sequence length. Batch formation never admits a
    /// request whose prompt plus generation target exceeds it.
    #[serde(default = "default_max_model_len")]
    pub max_model_len: usize,

    /// Latency between cluster arrival and the admission decision, in ticks.
    #[serde(default)]
    pub admission_latency: Ticks,

    /// Latency between the admission decision and the routing decision, in ticks.
    #[serde(default)]
    pub routing_latency: Ticks,

    /// Which latency oracle to use.
    #[serde(default)]
    pub oracle: OracleName,

    /// Model id (defaults-file key or HuggingFace `org/name` repo). Required
    /// by the roofline oracle; used by the blackbox oracle to look up trained
    /// coefficients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Tensor-parallel degree the oracle is parameterized with.
    #[serde(default = "default_tensor_parallel")]
    pub tensor_parallel: u32,

    /// Decision-trace verbosity.
    #[serde(default)]
    pub trace_level: TraceLevel,

    /// How many alternative targets to record per routing decision.
    #[serde(default = "default_counterfactual_k")]
    pub counterfactual_k: usize,

    /// Whether to append a decision-trace summary to the results.
    #[serde(default)]
    pub summarize_trace: bool,

    /// Per-SLO-class TTFT targets used for attainment reporting, in ticks.
    #[serde(default = "default_slo_ttft_targets")]
    pub slo_ttft_targets: BTreeMap<SloClass, Ticks>,

    /// Additive fitness weights over named metrics. Empty disables the
    /// fitness report.
    #[serde(default)]
    pub fitness_weights: BTreeMap<String, f64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            num_instances: default_num_instances(),
            horizon: default_horizon(),
            seed: 0,
            total_kv_blocks: default_total_kv_blocks(),
            block_size_tokens: default_block_size_tokens(),
            kv_cpu_blocks: 0,
            kv_offload_threshold: default_kv_offload_threshold(),
            kv_transfer_bandwidth: default_kv_transfer_bandwidth(),
            kv_transfer_base_latency: 0,
            kv_thrash_window: default_kv_thrash_window(),
            max_running_reqs: default_max_running_reqs(),
            max_scheduled_tokens: default_max_scheduled_tokens(),
            long_prefill_token_threshold: 0,
            max_model_len: default_max_model_len(),
            admission_latency: 0,
            routing_latency: 0,
            oracle: OracleName::default(),
            model: None,
            tensor_parallel: default_tensor_parallel(),
            trace_level: TraceLevel::default(),
            counterfactual_k: default_counterfactual_k(),
            summarize_trace: false,
            slo_ttft_targets: default_slo_ttft_targets(),
            fitness_weights: BTreeMap::new(),
        }
    }
}

impl SimulationConfig {
    /// Returns one message per out-of-range option. Empty means valid.
    #[must_use]
    pub fn validation_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.num_instances == 0 {
            errors.push("num_instances must be greater than 0".to_owned());
        }
        if self.horizon <= 0 {
            errors.push("horizon must be greater than 0 ticks".to_owned());
        }
        if self.total_kv_blocks == 0 {
            errors.push("total_kv_blocks must be greater than 0".to_owned());
        }
        if self.block_size_tokens == 0 {
            errors.push("block_size_tokens must be greater than 0".to_owned());
        }
        if !(0.0..=1.0).contains(&self.kv_offload_threshold) {
            errors.push(format!(
                "kv_offload_threshold must be within [0, 1], got {}",
                self.kv_offload_threshold
            ));
        }
        if self.kv_transfer_bandwidth == 0 {
            errors.push("kv_transfer_bandwidth must be at least 1 block per tick".to_owned());
        }
        if self.kv_transfer_base_latency < 0 {
            errors.push("kv_transfer_base_latency must not be negative".to_owned());
        }
        if self.kv_thrash_window < 0 {
            errors.push("kv_thrash_window must not be negative".to_owned());
        }
        if self.max_running_reqs == 0 {
            errors.push("max_running_reqs must be greater than 0".to_owned());
        }
        if self.max_scheduled_tokens == 0 {
            errors.push("max_scheduled_tokens must be greater than 0".to_owned());
        }
        if self.max_model_len == 0 {
            errors.push("max_model_len must be greater than 0".to_owned());
        }
        if self.admission_latency < 0 {
            errors.push("admission_latency must not be negative".to_owned());
        }
        if self.routing_latency < 0 {
            errors.push("routing_latency must not be negative".to_owned());
        }
        if self.tensor_parallel == 0 {
            errors.push("tensor_parallel must be greater than 0".to_owned());
        }
        if self.oracle == OracleName::Roofline && self.model.is_none() {
            errors.push("oracle = roofline requires a model".to_owned());
        }
        for (name, weight) in &self.fitness_weights {
            if !weight.is_finite() {
                errors.push(format!("fitness_weights.{name} must be finite"));
            }
        }
        errors
    }
}

fn default_num_instances() -> usize {
    1
}
fn default_horizon() -> Ticks {
    60_000_000
}
fn default_total_kv_blocks() -> usize {
    4096
}
fn default_block_size_tokens() -> usize {
    16
}
fn default_kv_offload_threshold() -> f64 {
    0.9
}
fn default_kv_thrash_window() -> Ticks {
    10_000_000
}
fn default_kv_transfer_bandwidth() -> u64 {
    1
}
fn default_max_running_reqs() -> usize {
    256
}
fn default_max_scheduled_tokens() -> usize {
    8192
}
fn default_max_model_len() -> usize {
    8192
}
fn default_tensor_parallel() -> u32 {
    1
}
fn default_counterfactual_k() -> usize {
    3
}
fn default_slo_ttft_targets() -> BTreeMap<SloClass, Ticks> {
    let mut targets = BTreeMap::new();
    let _ = targets.insert(SloClass::Interactive, 500_000);
    let _ = targets.insert(SloClass::Batch, 5_000_000);
    targets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(SimulationConfig::default().validation_errors().is_empty());
    }

    #[test]
    fn out_of_range_threshold_is_named() {
        let cfg = SimulationConfig {
            kv_offload_threshold: 1.5,
            ..SimulationConfig::default()
        };
        let errors = cfg.validation_errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("kv_offload_threshold"));
    }

    #[test]
    fn roofline_requires_a_model() {
        let cfg = SimulationConfig {
            oracle: OracleName::Roofline,
            ..SimulationConfig::default()
        };
        assert!(
            cfg.validation_errors()
                .iter()
                .any(|e| e.contains("roofline"))
        );
    }

    #[test]
    fn empty_yaml_document_uses_defaults() {
        let cfg: SimulationConfig =
            serde_yaml::from_str("{}").expect("empty mapping should deserialize");
        assert_eq!(cfg.block_size_tokens, 16);
        assert_eq!(cfg.horizon, 60_000_000);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = serde_yaml::from_str::<SimulationConfig>("kv_gpu_blocks: 3\n")
            .expect_err("unknown field must fail");
        assert!(err.to_string().contains("kv_gpu_blocks"));
    }
}
