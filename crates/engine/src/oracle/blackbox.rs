// Copyright The BLIS Authors
// SPDX-License-Identifier: Apache-2.0

//! Calibrated linear latency model.
//!
//! Step time is `beta0 + beta1 * prefill_tokens + beta2 * decode_tokens`,
//! with `alpha` coefficients for queue-pipeline overhead. Coefficients come
//! from the defaults file, trained per (model, tp, gpu, backend) tuple.

use crate::oracle::{BatchWorkload, LatencyOracle};
use crate::request::Request;
use blis_config::Ticks;
use blis_config::defaults::BlackboxCoefficients;

/// The linear "blackbox" oracle.
#[derive(Debug, Clone)]
pub struct BlackboxOracle {
    coefficients: BlackboxCoefficients,
}

impl BlackboxOracle {
    /// An oracle over trained coefficients.
    #[must_use]
    pub fn new(coefficients: BlackboxCoefficients) -> Self {
        Self { coefficients }
    }
}

fn to_ticks(us: f64) -> Ticks {
    us.max(0.0).round() as Ticks
}

impl LatencyOracle for BlackboxOracle {
    fn step_time(&self, batch: &BatchWorkload) -> Ticks {
        let c = &self.coefficients;
        to_ticks(
            c.beta0
                + c.beta1 * batch.prefill_tokens as f64
                + c.beta2 * batch.decode_tokens as f64,
        )
    }

    fn queueing_time(&self, request: &Request) -> Ticks {
        let c = &self.coefficients;
        to_ticks(c.alpha0 + c.alpha1 * request.input_tokens.len() as f64)
    }

    fn output_token_processing_time(&self) -> Ticks {
        to_ticks(self.coefficients.output_token_us)
    }

    fn scheduling_processing_time(&self) -> Ticks {
        to_ticks(self.coefficients.scheduling_us)
    }

    fn preemption_processing_time(&self) -> Ticks {
        to_ticks(self.coefficients.preemption_us)
    }
}
