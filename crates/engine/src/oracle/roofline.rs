// Copyright The BLIS Authors
// SPDX-License-Identifier: Apache-2.0

//! Analytical roofline latency model.
//!
//! Step time is the larger of the compute time (batch FLOPs over achieved
//! compute, via the hardware MFU table) and the memory time (weight reads
//! plus KV reads over peak HBM bandwidth), both divided across the
//! tensor-parallel group. Overheads that calibration would normally provide
//! (queueing, post-processing, scheduling, preemption) are fixed constants
//! here; the analytical model only replaces the forward-pass term.

use crate::oracle::{BatchWorkload, LatencyOracle};
use crate::request::Request;
use blis_config::Ticks;
use blis_config::hardware::GpuProfile;
use blis_config::model::ModelConfig;

const QUEUEING_US: f64 = 100.0;
const OUTPUT_TOKEN_US: f64 = 10.0;
const SCHEDULING_US: f64 = 100.0;
const PREEMPTION_US: f64 = 500.0;

/// Bytes per parameter / KV entry (half precision).
const BYTES_PER_ELEMENT: f64 = 2.0;

/// The analytical FLOPs/bandwidth oracle.
#[derive(Debug, Clone)]
pub struct RooflineOracle {
    gpu: GpuProfile,
    tensor_parallel: f64,
    /// Total parameter count derived from the architecture.
    params: f64,
    /// KV bytes appended per token (all layers, K and V).
    kv_bytes_per_token: f64,
}

impl RooflineOracle {
    /// An oracle for one model on one GPU SKU at a tensor-parallel degree.
    #[must_use]
    pub fn new(model: ModelConfig, gpu: GpuProfile, tensor_parallel: u32) -> Self {
        let layers = f64::from(model.layers());
        let hidden = f64::from(model.hidden());
        let kv_dim = f64::from(model.kv_heads()) * f64::from(model.head_dimension());
        let intermediate = f64::from(model.intermediate());
        let vocab = f64::from(model.vocab());

        // Attention: Q and O projections are h*h; K and V project to the
        // (possibly grouped) KV dimension. MLP assumes a gated three-matrix
        // block, the dominant shape in current decoder models.
        let attn = 2.0 * hidden * hidden + 2.0 * hidden * kv_dim;
        let mlp = 3.0 * hidden * intermediate;
        let params = layers * (attn + mlp) + vocab * hidden;
        let kv_bytes_per_token = 2.0 * layers * kv_dim * BYTES_PER_ELEMENT;

        Self {
            gpu,
            tensor_parallel: f64::from(tensor_parallel.max(1)),
            params,
            kv_bytes_per_token,
        }
    }

    /// Model parameter count the oracle derived, mostly for reporting.
    #[must_use]
    pub fn parameter_count(&self) -> f64 {
        self.params
    }
}

impl LatencyOracle for RooflineOracle {
    fn step_time(&self, batch: &BatchWorkload) -> Ticks {
        let tokens = batch.scheduled_tokens();
        if tokens == 0 {
            return 0;
        }
        let mfu = self.gpu.mfu_at(tokens);
        let flops = 2.0 * self.params * tokens as f64;
        let peak_flops = self.gpu.peak_tflops * 1e12 * mfu;
        let compute_s = flops / peak_flops / self.tensor_parallel;

        // Every step streams the weights once; decode additionally reads the
        // KV cache it attends over.
        let weight_bytes = self.params * BYTES_PER_ELEMENT;
        let kv_bytes = self.kv_bytes_per_token * batch.context_tokens as f64;
        let bandwidth = self.gpu.peak_hbm_gbps * 1e9;
        let memory_s = (weight_bytes + kv_bytes) / bandwidth / self.tensor_parallel;

        (compute_s.max(memory_s) * 1e6).round() as Ticks
    }

    fn queueing_time(&self, _request: &Request) -> Ticks {
        QUEUEING_US as Ticks
    }

    fn output_token_processing_time(&self) -> Ticks {
        OUTPUT_TOKEN_US as Ticks
    }

    fn scheduling_processing_time(&self) -> Ticks {
        SCHEDULING_US as Ticks
    }

    fn preemption_processing_time(&self) -> Ticks {
        PREEMPTION_US as Ticks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blis_config::hardware::MfuEntry;

    fn model() -> ModelConfig {
        ModelConfig::from_json_str(
            r#"{
                "num_hidden_layers": 32,
                "hidden_size": 4096,
                "num_attention_heads": 32,
                "num_key_value_heads": 8,
                "intermediate_size": 14336,
                "vocab_size": 128256
            }"#,
            "<test>",
        )
        .expect("valid model config")
    }

    fn gpu() -> GpuProfile {
        GpuProfile {
            peak_tflops: 989.0,
            peak_hbm_gbps: 3350.0,
            mfu_table: vec![
                MfuEntry { batched_tokens: 1, mfu: 0.05 },
                MfuEntry { batched_tokens: 512, mfu: 0.4 },
            ],
        }
    }

    #[test]
    fn derived_parameter_count_is_in_the_expected_range() {
        let o = RooflineOracle::new(model(), gpu(), 1);
        // Llama-3-8B-shaped: roughly 7-9 billion parameters.
        let billions = o.parameter_count() / 1e9;
        assert!((7.0..9.0).contains(&billions), "got {billions}B");
    }

    #[test]
    fn decode_steps_are_memory_bound() {
        let o = RooflineOracle::new(model(), gpu(), 1);
        let decode = BatchWorkload {
            prefill_tokens: 0,
            decode_tokens: 8,
            context_tokens: 8 * 1024,
            batch_size: 8,
        };
        let prefill = BatchWorkload {
            prefill_tokens: 4096,
            decode_tokens: 0,
            context_tokens: 0,
            batch_size: 1,
        };
        let decode_us = o.step_time(&decode);
        let prefill_us = o.step_time(&prefill);
        // A small decode step costs roughly one weight sweep; a 4k prefill
        // does orders of magnitude more compute.
        assert!(decode_us > 0);
        assert!(prefill_us > decode_us);
    }

    #[test]
    fn tensor_parallelism_divides_step_time() {
        let tp1 = RooflineOracle::new(model(), gpu(), 1);
        let tp4 = RooflineOracle::new(model(), gpu(), 4);
        let batch = BatchWorkload {
            prefill_tokens: 2048,
            decode_tokens: 0,
            context_tokens: 0,
            batch_size: 1,
        };
        let t1 = tp1.step_time(&batch);
        let t4 = tp4.step_time(&batch);
        // Up to rounding, 4-way TP quarters the step.
        assert!((t1 - t4 * 4).abs() <= 2, "t1={t1} t4={t4}");
    }

    #[test]
    fn empty_batches_cost_nothing() {
        let o = RooflineOracle::new(model(), gpu(), 1);
        assert_eq!(o.step_time(&BatchWorkload::default()), 0);
    }
}
