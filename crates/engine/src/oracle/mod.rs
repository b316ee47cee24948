// Copyright The BLIS Authors
// SPDX-License-Identifier: Apache-2.0

//! Latency oracles: pure delay models behind one narrow interface.
//!
//! An oracle answers five questions — step time, queueing overhead,
//! per-token post-processing, batch-formation overhead, preemption overhead
//! — deterministically and without side effects. Two variants share the
//! interface: the calibrated linear [`blackbox`] model and the analytical
//! [`roofline`] model. The engine clamps non-positive step durations to one
//! tick at the call site, so oracles only promise non-negative outputs.

use crate::request::Request;
use blis_config::Ticks;
use blis_config::defaults::BlackboxCoefficients;
use blis_config::hardware::GpuProfile;
use blis_config::model::ModelConfig;

pub mod blackbox;
pub mod roofline;

pub use blackbox::BlackboxOracle;
pub use roofline::RooflineOracle;

/// Workload summary of one step over a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchWorkload {
    /// Prompt tokens scheduled across the batch this step.
    pub prefill_tokens: u64,
    /// Decode tokens scheduled across the batch this step.
    pub decode_tokens: u64,
    /// Total KV context the decode tokens attend over.
    pub context_tokens: u64,
    /// Number of co-scheduled requests.
    pub batch_size: usize,
}

impl BatchWorkload {
    /// Total scheduled tokens this step.
    #[must_use]
    pub fn scheduled_tokens(&self) -> u64 {
        self.prefill_tokens + self.decode_tokens
    }
}

/// The oracle capability. Implementations are deterministic, side-effect
/// free, and return non-negative tick counts.
pub trait LatencyOracle: std::fmt::Debug {
    /// Wall time of one forward pass over the batch.
    fn step_time(&self, batch: &BatchWorkload) -> Ticks;

    /// Admission/queue-pipeline overhead for one request.
    fn queueing_time(&self, request: &Request) -> Ticks;

    /// Per-token detokenization and post-processing cost.
    fn output_token_processing_time(&self) -> Ticks;

    /// Overhead of forming a new batch.
    fn scheduling_processing_time(&self) -> Ticks;

    /// Overhead of evicting a request from a running batch.
    fn preemption_processing_time(&self) -> Ticks;
}

/// Resolved oracle parameterization; the registry maps config names onto
/// these variants.
#[derive(Debug, Clone)]
pub enum OracleSpec {
    /// Calibrated linear model.
    Blackbox(BlackboxCoefficients),
    /// Analytical FLOPs/bandwidth model.
    Roofline {
        /// Architecture parameters of the served model.
        model: ModelConfig,
        /// GPU peaks and MFU table.
        gpu: GpuProfile,
        /// Tensor-parallel degree.
        tensor_parallel: u32,
    },
}

/// Builds the oracle an instance runs with.
#[must_use]
pub fn build(spec: &OracleSpec) -> Box<dyn LatencyOracle> {
    match spec {
        OracleSpec::Blackbox(coefficients) => Box::new(BlackboxOracle::new(*coefficients)),
        OracleSpec::Roofline {
            model,
            gpu,
            tensor_parallel,
        } => Box::new(RooflineOracle::new(model.clone(), gpu.clone(), *tensor_parallel)),
    }
}
